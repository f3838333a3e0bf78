use anyhow::Result;
use chainlog::cli::{self, Cli};
use chainlog::logging::init_logging;
use chainlog::{AuditError, AuditLogger};
use clap::Parser;
use std::process::ExitCode;
use tracing::error;

/// Exit code for a broken or unverifiable chain
const EXIT_INTEGRITY: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let integrity =
                matches!(e.downcast_ref::<AuditError>(), Some(err) if err.is_integrity());
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            if integrity {
                ExitCode::from(EXIT_INTEGRITY)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = cli.load_config()?;
    let _guard = init_logging(config.logging.dir.clone(), &config.logging.level)?;

    let logger = AuditLogger::new(config.audit)?;
    let outcome = cli::run(
        &cli,
        &logger,
        &mut std::io::stdin().lock(),
        &mut std::io::stdout().lock(),
    )
    .await;
    logger.close().await?;
    outcome
}
