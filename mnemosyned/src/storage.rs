use std::sync::Arc;

use anyhow::Context;
use mnemosyne::{
    MemorySessionStore, PostgresSessionStore, PostgresStoreConfig, QueryRecorder, SessionStore,
};
use tracing::info;

use crate::config::{AppConfig, StorageEngine};
use crate::db;

/// Builds the configured backend and makes sure its schema exists.
pub async fn init_store(
    cfg: &AppConfig,
    recorder: Arc<dyn QueryRecorder>,
) -> anyhow::Result<Arc<dyn SessionStore>> {
    let store: Arc<dyn SessionStore> = match cfg.storage_engine {
        StorageEngine::Postgres => {
            let config = PostgresStoreConfig {
                schema: cfg.schema.clone(),
                table: cfg.table.clone(),
                ..Default::default()
            };
            config.validate()?;

            let pool = db::connect(cfg).await?;
            Arc::new(PostgresSessionStore::new(pool, config, recorder)?)
        }
        StorageEngine::Memory => Arc::new(MemorySessionStore::new()),
    };

    store.setup().await.context("session storage setup failed")?;
    info!(engine = %cfg.storage_engine, "session storage ready");

    Ok(store)
}
