use std::sync::Arc;

use common::logger::init_logger;
use mnemosyne::{Outcome, QueryCounters};
use mnemosyned::{config::AppConfig, purge, storage::init_store};

/// Logs the per-statement totals gathered since startup.
fn log_query_totals(counters: &QueryCounters) {
    for (query, outcome, count) in counters.snapshot() {
        tracing::info!(%outcome, count, query = %query, "statement totals");
    }
    tracing::info!(
        succeeded = counters.total(Outcome::Success),
        failed = counters.total(Outcome::Failure),
        "query totals"
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = AppConfig::from_env()?;
    init_logger("mnemosyned", cfg.json_logs);

    tracing::info!(engine = %cfg.storage_engine, schema = %cfg.schema, table = %cfg.table, "Starting mnemosyned...");

    let counters = Arc::new(QueryCounters::new());
    let store = init_store(&cfg, counters.clone()).await?;

    let purger = tokio::spawn(purge::run(store, cfg.purge_interval));

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    purger.abort();
    log_query_totals(&counters);

    Ok(())
}
