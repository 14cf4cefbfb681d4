use std::fs::File;

use anyhow::{Context, Result};
use caja_mayor::{
    bin_utils::{Service, ServiceError},
    config::TreasuryConfig,
};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> Result<()> {
    // a local .env is optional
    dotenvy::dotenv().ok();
    let config = TreasuryConfig::from_env().context("Invalid TREASURY_* configuration")?;
    init_tracing(&config.log_level);

    let filename = std::env::args()
        .nth(1)
        .context("Expected a file name as the first argument")?;
    let file = File::open(&filename).with_context(|| format!("Failed to open `{filename}`"))?;

    let service = Service {
        input: file,
        output: &mut std::io::stdout(),
        config,
        error_printer: Box::new(|line, err| match err {
            ServiceError::Script(err) => eprintln!("Error at line {line}: {err}"),
            ServiceError::Ledger(err) => {
                tracing::warn!(line, kind = ?err.kind(), "operation refused: {err}")
            }
        }),
    };
    service.run()
}

/// Logs go to stderr so the CSV on stdout stays machine readable.
fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr),
        )
        .init();
}
