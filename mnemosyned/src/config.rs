use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;

/// Which [`SessionStore`](mnemosyne::SessionStore) backend the daemon runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageEngine {
    Postgres,
    Memory,
}

impl fmt::Display for StorageEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StorageEngine::Postgres => "postgres",
            StorageEngine::Memory => "memory",
        };
        f.write_str(s)
    }
}

impl FromStr for StorageEngine {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "postgres" => Ok(StorageEngine::Postgres),
            "memory" => Ok(StorageEngine::Memory),
            other => Err(anyhow::anyhow!("unknown storage engine: {}", other)),
        }
    }
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Database connection string.
    pub database_url: String,

    pub storage_engine: StorageEngine,

    // =========================
    // Storage naming
    // =========================
    /// Schema that owns the session table. Dropped by tear-down.
    pub schema: String,
    pub table: String,

    // =========================
    // Connection
    // =========================
    pub db_max_connections: u32,

    /// Connection attempts at startup before giving up.
    ///
    /// The database is often still booting when the daemon starts
    /// (containers, CI), so a handful of spaced attempts avoids a
    /// crash loop.
    pub db_connect_attempts: u32,

    /// Upper bound for one connection attempt.
    pub db_connect_timeout: Duration,

    // =========================
    // Maintenance
    // =========================
    /// How often expired rows are purged.
    ///
    /// The store never removes expired sessions by itself; this loop is
    /// the only reclaimer.
    pub purge_interval: Duration,

    /// Emit JSON logs instead of the human readable layout.
    pub json_logs: bool,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key/value source; missing keys take defaults.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL")
            .unwrap_or_else(|| "postgres://localhost:5432?sslmode=disable".to_string());

        let cfg = Self {
            database_url,
            storage_engine: parse_or(&lookup, "MNEMOSYNE_STORAGE_ENGINE", StorageEngine::Postgres)?,

            schema: lookup("MNEMOSYNE_SCHEMA").unwrap_or_else(|| "mnemosyne".to_string()),
            table: lookup("MNEMOSYNE_TABLE").unwrap_or_else(|| "session".to_string()),

            db_max_connections: parse_or(&lookup, "MNEMOSYNE_DB_MAX_CONNECTIONS", 16)?,
            db_connect_attempts: parse_or(&lookup, "MNEMOSYNE_DB_CONNECT_ATTEMPTS", 10)?,
            db_connect_timeout: Duration::from_secs(parse_or(
                &lookup,
                "MNEMOSYNE_DB_CONNECT_TIMEOUT_SECS",
                5,
            )?),

            purge_interval: Duration::from_secs(parse_or(
                &lookup,
                "MNEMOSYNE_PURGE_INTERVAL_SECS",
                60,
            )?),

            json_logs: lookup("APP_ENV").as_deref() == Some("production"),
        };

        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.db_max_connections == 0 {
            anyhow::bail!("MNEMOSYNE_DB_MAX_CONNECTIONS must be at least 1");
        }
        if self.purge_interval.is_zero() {
            anyhow::bail!("MNEMOSYNE_PURGE_INTERVAL_SECS must be at least 1");
        }
        Ok(())
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{e}"))
            .with_context(|| format!("invalid value {raw:?} for {key}")),
    }
}
