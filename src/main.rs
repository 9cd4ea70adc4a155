//! Loyalty Ledger CLI
//!
//! Replays a CSV of loyalty operations against an in-process provider and
//! outputs final account states.
//!
//! # Usage
//!
//! ```bash
//! cargo run -- operations.csv > accounts.csv
//! ```
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: Set to `debug` or `warn` to control logging verbosity
//! - `LOYALTY_CONFIG`: Optional TOML config file
//! - `LOYALTY_PROVIDER_TIMEOUT_MS`: Per-call provider timeout

use log::info;
use loyalty_ledger::{
    Config, IdentityStore, InMemoryProvider, LedgerError, LedgerStore, Reconciler, ReplayEngine,
    Result,
};
use std::env;
use std::fs::File;
use std::io::{self, BufReader};
use std::process;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    env_logger::init();

    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

async fn run() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        return Err(LedgerError::MissingArgument);
    }

    let config = Config::from_env()?;
    info!(
        "{} starting, provider timeout {:?}",
        config.service_name,
        config.provider.timeout()
    );

    let input_path = &args[1];
    let file = File::open(input_path)?;
    let reader = BufReader::new(file);

    let ledger = Arc::new(LedgerStore::new(Arc::new(IdentityStore::new())));
    let provider = Arc::new(InMemoryProvider::new());
    let engine = ReplayEngine::new(Reconciler::new(ledger, provider, &config));

    let summary = engine.process_csv(reader).await?;
    info!(
        "Replay finished: {} applied, {} rejected",
        summary.applied, summary.rejected
    );

    let stdout = io::stdout();
    let handle = stdout.lock();
    engine.write_output(handle)?;

    Ok(())
}
