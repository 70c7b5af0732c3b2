use std::time::Duration;

use anyhow::Context;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};

use crate::config::AppConfig;

/// Pause between failed connection attempts.
const RETRY_BACKOFF: Duration = Duration::from_secs(1);

pub async fn connect(cfg: &AppConfig) -> anyhow::Result<PgPool> {
    connect_with_retry(
        &cfg.database_url,
        cfg.db_max_connections,
        cfg.db_connect_attempts,
        cfg.db_connect_timeout,
        RETRY_BACKOFF,
    )
    .await
}

/// Opens the pool, retrying up to `attempts` times with a fixed `backoff`.
pub async fn connect_with_retry(
    database_url: &str,
    max_connections: u32,
    attempts: u32,
    timeout: Duration,
    backoff: Duration,
) -> anyhow::Result<PgPool> {
    let attempts = attempts.max(1);
    let mut attempt = 1;

    loop {
        let res = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(timeout)
            .connect(database_url)
            .await;

        match res {
            Ok(pool) => {
                info!(attempt, max_connections, "connected to postgres");
                return Ok(pool);
            }
            Err(e) if attempt < attempts => {
                warn!(attempt, attempts, error = %e, "postgres connection failed; retrying");
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("could not connect to postgres after {attempts} attempts")
                });
            }
        }
    }
}
