use crate::commands::{
    connect, load_config, runtime, CommandResult, Failure, EXIT_MIGRATION, EXIT_SEED,
    EXIT_SEED_VERIFY,
};
use kiosk_db::{migrations, DemoDataset, SeedResult};
use serde_json::json;

pub fn run() -> CommandResult {
    match load() {
        Ok(seeded) => CommandResult::success_with(
            "seed",
            format!(
                "demo business `{}` loaded with {} products",
                seeded.business_id,
                seeded.products_seeded.len()
            ),
            json!({
                "business_id": seeded.business_id,
                "products": seeded.products_seeded,
            }),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}

fn load() -> Result<SeedResult, Failure> {
    let config = load_config()?;
    runtime()?.block_on(async {
        let pool = connect(&config).await?;
        let outcome = seed(&pool).await;
        pool.close().await;
        outcome
    })
}

async fn seed(pool: &kiosk_db::DbPool) -> Result<SeedResult, Failure> {
    migrations::run_pending(pool)
        .await
        .map_err(|error| ("migration", error.to_string(), EXIT_MIGRATION))?;
    let seeded = DemoDataset::load(pool)
        .await
        .map_err(|error| ("seed_execution", error.to_string(), EXIT_SEED))?;
    let verification = DemoDataset::verify(pool)
        .await
        .map_err(|error| ("seed_verification", error.to_string(), EXIT_SEED))?;

    if !verification.all_present {
        let failed = verification
            .checks
            .iter()
            .filter_map(|(check, passed)| (!passed).then_some(*check))
            .collect::<Vec<_>>();
        return Err(("seed_verification", verification_message(&failed), EXIT_SEED_VERIFY));
    }
    Ok(seeded)
}

fn verification_message(failed: &[&str]) -> String {
    if failed.is_empty() {
        "some seed data failed to load".to_string()
    } else {
        format!("seed verification failed for checks: {}", failed.join(", "))
    }
}
