use crate::commands::{connect, load_config, runtime, CommandResult, Failure, EXIT_MIGRATION};
use kiosk_db::migrations;

pub fn run() -> CommandResult {
    match apply() {
        Ok(()) => CommandResult::success("migrate", "applied pending migrations"),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("migrate", error_class, message, exit_code)
        }
    }
}

fn apply() -> Result<(), Failure> {
    let config = load_config()?;
    runtime()?.block_on(async {
        let pool = connect(&config).await?;
        let applied = migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), EXIT_MIGRATION));
        pool.close().await;
        applied
    })
}
