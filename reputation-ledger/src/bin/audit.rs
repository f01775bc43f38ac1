//! Ledger audit binary
//!
//! Re-derives every answer's vote aggregate from its vote rows and exits
//! non-zero if any stored aggregate drifted.
//!
//! Usage: `ledger-audit [CONFIG.toml]`. Without a path the configuration is
//! read from `REPUTATION_LEDGER_*` environment variables.

use anyhow::Context;
use reputation_ledger::{Config, Ledger};
use std::process::ExitCode;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    // Load configuration
    let config = match std::env::args().nth(1) {
        Some(path) => Config::from_file(&path)
            .with_context(|| format!("Failed to load config from {}", path))?,
        None => Config::from_env().context("Failed to load config from environment")?,
    };

    tracing::info!(data_dir = ?config.data_dir, "Starting ledger audit");

    let ledger = Ledger::open(config).context("Failed to open ledger")?;
    let report = ledger.audit().await.context("Audit failed")?;

    println!("{}", serde_json::to_string_pretty(&report)?);

    if report.is_clean() {
        Ok(ExitCode::SUCCESS)
    } else {
        tracing::error!(drifted = report.drifted.len(), "Vote aggregates drifted");
        Ok(ExitCode::FAILURE)
    }
}
