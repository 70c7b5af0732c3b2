//! PostgresSessionStore
//! --------------------
//! PostgreSQL-backed implementation of [`SessionStore`]. One table, keyed by
//! token, with the bag stored as an encoded blob.
//!
//!  - the pool is supplied by the caller and never closed here
//!  - `expire_at` is computed by the database (`NOW() + TTL`) to avoid
//!    clock skew between application hosts and the database
//!  - `set_value` serializes concurrent writers on the row lock taken by
//!    `SELECT ... FOR UPDATE`
//!  - every executed statement produces exactly one [`QueryRecorder`] record
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{debug, info, instrument, warn};

use super::predicate::{self, SESSION_COLUMNS};
use super::{
    ExpiryRange, SESSION_TTL_MINUTES, SessionFilter, SessionStore, validate_delete, validate_page,
    validate_subject,
};
use crate::error::{Result, StoreError};
use crate::metrics::{Outcome, QueryRecorder};
use crate::model::{Bag, Session};
use crate::token::{DEFAULT_TOKEN_SEED, Token, TokenGenerator};

const BEGIN: &str = "BEGIN";
const COMMIT: &str = "COMMIT";
const ROLLBACK: &str = "ROLLBACK";

/// Naming and token settings for [`PostgresSessionStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostgresStoreConfig {
    pub schema: String,
    pub table: String,
    /// Prefix prepended to every generated token.
    pub token_key: Vec<u8>,
}

impl Default for PostgresStoreConfig {
    fn default() -> Self {
        Self {
            schema: "mnemosyne".to_string(),
            table: "session".to_string(),
            token_key: hex::encode(DEFAULT_TOKEN_SEED).into_bytes(),
        }
    }
}

impl PostgresStoreConfig {
    pub fn qualified_table(&self) -> String {
        format!("{}.{}", self.schema, self.table)
    }

    /// Schema and table are interpolated into SQL text, so both must be
    /// plain lowercase identifiers.
    pub fn validate(&self) -> Result<()> {
        for (what, name) in [("schema", &self.schema), ("table", &self.table)] {
            if !is_identifier(name) {
                return Err(StoreError::invalid(format!(
                    "{what} name {name:?} is not a valid identifier"
                )));
            }
        }
        Ok(())
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };

    name.len() <= 63
        && (first.is_ascii_lowercase() || first == '_')
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// Statement texts rendered once per store. They double as metric labels.
#[derive(Debug)]
struct Statements {
    create_schema: String,
    create_table: String,
    create_index: String,
    drop_schema: String,
    insert: String,
    select_one: String,
    exists: String,
    delete_one: String,
    select_for_update: String,
    update_bag: String,
}

impl Statements {
    fn render(config: &PostgresStoreConfig) -> Self {
        let schema = &config.schema;
        let table = config.qualified_table();

        Self {
            create_schema: format!("CREATE SCHEMA IF NOT EXISTS {schema}"),
            create_table: format!(
                "CREATE TABLE IF NOT EXISTS {table} (\
                 token BYTEA PRIMARY KEY, \
                 subject_id TEXT NOT NULL, \
                 bag BYTEA NOT NULL, \
                 expire_at TIMESTAMPTZ NOT NULL)"
            ),
            create_index: format!(
                "CREATE INDEX IF NOT EXISTS {}_expire_at_idx ON {table} (expire_at)",
                config.table
            ),
            drop_schema: format!("DROP SCHEMA IF EXISTS {schema} CASCADE"),
            insert: format!(
                "INSERT INTO {table} (token, subject_id, bag, expire_at) \
                 VALUES ($1, $2, $3, NOW() + INTERVAL '{SESSION_TTL_MINUTES} minutes') \
                 RETURNING expire_at"
            ),
            select_one: format!("SELECT {SESSION_COLUMNS} FROM {table} WHERE token = $1 LIMIT 1"),
            exists: format!("SELECT EXISTS(SELECT 1 FROM {table} WHERE token = $1)"),
            delete_one: format!("DELETE FROM {table} WHERE token = $1"),
            select_for_update: format!("SELECT bag FROM {table} WHERE token = $1 FOR UPDATE"),
            update_bag: format!("UPDATE {table} SET bag = $2 WHERE token = $1"),
        }
    }
}

/// PostgreSQL session store.
///
/// Stateless apart from configuration; share it behind an `Arc`.
pub struct PostgresSessionStore {
    pool: PgPool,
    table: String,
    statements: Statements,
    generator: TokenGenerator,
    recorder: Arc<dyn QueryRecorder>,
}

impl PostgresSessionStore {
    pub fn new(
        pool: PgPool,
        config: PostgresStoreConfig,
        recorder: Arc<dyn QueryRecorder>,
    ) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            pool,
            table: config.qualified_table(),
            statements: Statements::render(&config),
            generator: TokenGenerator::system(config.token_key.clone()),
            recorder,
        })
    }

    /// Replaces the token generator, e.g. to use a different random source.
    pub fn with_generator(mut self, generator: TokenGenerator) -> Self {
        self.generator = generator;
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Fully qualified `schema.table` name.
    pub fn table(&self) -> &str {
        &self.table
    }

    fn observe<T>(
        &self,
        query: &str,
        res: std::result::Result<T, sqlx::Error>,
    ) -> std::result::Result<T, sqlx::Error> {
        let outcome = Outcome::from(&res);
        self.recorder.record(query, outcome);
        if let Err(e) = &res {
            warn!(target: "store", error = %e, query, "statement failed");
        }
        res
    }

    /// Steps 2-4 of `set_value`; the caller owns commit and rollback.
    async fn set_value_locked(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        token: &Token,
        key: &str,
        value: &str,
    ) -> Result<Bag> {
        let select = &self.statements.select_for_update;
        let res = sqlx::query_scalar::<_, Vec<u8>>(select)
            .bind(token.as_bytes())
            .fetch_optional(&mut **tx)
            .await;
        let Some(encoded) = self.observe(select, res)? else {
            return Err(StoreError::SessionNotFound);
        };

        let mut bag = Bag::decode(&encoded)?;
        bag.set(key, value);

        let update = &self.statements.update_bag;
        let res = sqlx::query(update)
            .bind(token.as_bytes())
            .bind(bag.encode()?)
            .execute(&mut **tx)
            .await;
        self.observe(update, res)?;

        Ok(bag)
    }
}

#[async_trait]
impl SessionStore for PostgresSessionStore {
    #[instrument(skip_all, target = "store", fields(subject_id = %subject_id, bag_len = bag.len()))]
    async fn start(&self, subject_id: &str, bag: Bag) -> Result<Session> {
        validate_subject(subject_id)?;

        let token = self.generator.generate()?;
        let encoded = bag.encode()?;

        let insert = &self.statements.insert;
        let res = sqlx::query_scalar::<_, DateTime<Utc>>(insert)
            .bind(token.as_bytes())
            .bind(subject_id)
            .bind(encoded)
            .fetch_one(&self.pool)
            .await;
        let expire_at = self.observe(insert, res).map_err(classify_insert)?;

        debug!(token = %token, %expire_at, "session started");

        Ok(Session {
            token,
            subject_id: subject_id.to_owned(),
            bag,
            expire_at,
        })
    }

    #[instrument(skip_all, target = "store", fields(token = %token))]
    async fn get(&self, token: &Token) -> Result<Session> {
        let select = &self.statements.select_one;
        let res = sqlx::query(select)
            .bind(token.as_bytes())
            .fetch_optional(&self.pool)
            .await;

        match self.observe(select, res)? {
            Some(row) => row_to_session(&row),
            None => Err(StoreError::SessionNotFound),
        }
    }

    #[instrument(skip_all, target = "store", fields(token = %token))]
    async fn exists(&self, token: &Token) -> Result<bool> {
        let select = &self.statements.exists;
        let res = sqlx::query_scalar::<_, bool>(select)
            .bind(token.as_bytes())
            .fetch_one(&self.pool)
            .await;

        Ok(self.observe(select, res)?)
    }

    #[instrument(skip_all, target = "store", fields(token = %token))]
    async fn abandon(&self, token: &Token) -> Result<bool> {
        let delete = &self.statements.delete_one;
        let res = sqlx::query(delete)
            .bind(token.as_bytes())
            .execute(&self.pool)
            .await;

        if self.observe(delete, res)?.rows_affected() == 0 {
            return Err(StoreError::SessionNotFound);
        }

        debug!("session abandoned");
        Ok(true)
    }

    #[instrument(skip_all, target = "store", fields(token = %token, key = %key))]
    async fn set_value(&self, token: &Token, key: &str, value: &str) -> Result<Bag> {
        let res = self.pool.begin().await;
        let mut tx = self.observe(BEGIN, res)?;

        match self.set_value_locked(&mut tx, token, key, value).await {
            Ok(bag) => {
                let res = tx.commit().await;
                self.observe(COMMIT, res)?;
                Ok(bag)
            }
            Err(err) => {
                // observe already logs a failed rollback
                let res = tx.rollback().await;
                let _ = self.observe(ROLLBACK, res);
                Err(err)
            }
        }
    }

    #[instrument(skip(self), target = "store")]
    async fn list(&self, offset: i64, limit: i64, range: &ExpiryRange) -> Result<Vec<Session>> {
        validate_page(offset, limit)?;

        let mut qb = predicate::select_page(&self.table, offset, limit, range);
        let query = qb.sql().to_owned();
        let res = qb.build().fetch_all(&self.pool).await;
        let rows = self.observe(&query, res)?;

        rows.iter().map(row_to_session).collect()
    }

    #[instrument(skip(self), target = "store")]
    async fn delete(&self, filter: &SessionFilter) -> Result<u64> {
        validate_delete(filter)?;

        let mut qb = predicate::delete_matching(&self.table, filter);
        let query = qb.sql().to_owned();
        let res = qb.build().execute(&self.pool).await;
        let affected = self.observe(&query, res)?.rows_affected();

        debug!(affected, "sessions deleted");
        Ok(affected)
    }

    #[instrument(skip_all, target = "store", fields(table = %self.table))]
    async fn setup(&self) -> Result<()> {
        let statements = [
            &self.statements.create_schema,
            &self.statements.create_table,
            &self.statements.create_index,
        ];

        for statement in statements {
            let res = sqlx::query(statement).execute(&self.pool).await;
            self.observe(statement, res)?;
        }

        info!("session schema ready");
        Ok(())
    }

    #[instrument(skip_all, target = "store", fields(table = %self.table))]
    async fn tear_down(&self) -> Result<()> {
        let statement = &self.statements.drop_schema;
        let res = sqlx::query(statement).execute(&self.pool).await;
        self.observe(statement, res)?;

        info!("session schema dropped");
        Ok(())
    }
}

fn classify_insert(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return StoreError::TokenConflict;
        }
    }
    StoreError::Storage(err)
}

fn row_to_session(r: &PgRow) -> Result<Session> {
    let token: Vec<u8> = r.try_get("token")?;
    let bag: Vec<u8> = r.try_get("bag")?;

    Ok(Session {
        token: Token::new(token),
        subject_id: r.try_get("subject_id")?,
        bag: Bag::decode(&bag)?,
        expire_at: r.try_get("expire_at")?,
    })
}
