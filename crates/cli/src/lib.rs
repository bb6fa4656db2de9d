pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "kiosk",
    about = "Kiosk operator CLI",
    long_about = "Operate the storefront bot: migrations, demo data, config inspection, and readiness checks.",
    after_help = "Examples:\n  kiosk migrate\n  kiosk seed\n  kiosk doctor"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations")]
    Migrate,
    #[command(about = "Load the demo business and catalog; safe to run repeatedly")]
    Seed,
    #[command(about = "Show effective configuration with source attribution and redaction")]
    Config,
    #[command(about = "Check config, channel credentials, oracle, and database readiness")]
    Doctor,
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed => commands::seed::run(),
        Command::Config => commands::config::run(),
        Command::Doctor => commands::doctor::run(),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
