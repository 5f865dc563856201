//! intake CLI: intent extraction and staged catalog ingestion.
//!
//! Exit codes: 0 on success, 2 when the input failed validation, 1 for
//! system or dependency failures.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;
use intake_shared::{ErrorClass, IntakeError};

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);

    let Err(report) = commands::run(cli).await else {
        return Ok(());
    };

    let class = report
        .chain()
        .find_map(|cause| cause.downcast_ref::<IntakeError>())
        .map(IntakeError::class);

    match class {
        Some(ErrorClass::InvalidInput) => {
            eprintln!("input error: {report:?}");
            std::process::exit(2);
        }
        Some(ErrorClass::Dependency) => {
            eprintln!("dependency error: {report:?}");
            std::process::exit(1);
        }
        None => Err(report),
    }
}
