pub mod memory_store;
pub mod postgres_store;
mod predicate;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{Result, StoreError};
use crate::model::{Bag, Session};
use crate::token::Token;

/// Lifetime assigned to a session by `start`. Not refreshed by other calls.
pub const SESSION_TTL_MINUTES: i64 = 30;

/// Storage contract for session state.
///
/// Implementations are shared across tasks behind an `Arc` and must not hold
/// in-process locks across calls. Every call may block on the backend; callers
/// apply their own timeouts.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Creates a session for `subject_id` with a fresh token and
    /// `expire_at = now + SESSION_TTL_MINUTES`.
    async fn start(&self, subject_id: &str, bag: Bag) -> Result<Session>;

    async fn get(&self, token: &Token) -> Result<Session>;

    async fn exists(&self, token: &Token) -> Result<bool>;

    /// Removes one session. Zero affected rows is `SessionNotFound`.
    async fn abandon(&self, token: &Token) -> Result<bool>;

    /// Sets one bag entry atomically and returns the whole resulting bag.
    async fn set_value(&self, token: &Token, key: &str, value: &str) -> Result<Bag>;

    /// Page of sessions whose expiry falls in `range` (all rows when unbounded).
    async fn list(&self, offset: i64, limit: i64, range: &ExpiryRange) -> Result<Vec<Session>>;

    /// Bulk delete; at least one filter is required. Returns rows removed.
    async fn delete(&self, filter: &SessionFilter) -> Result<u64>;

    /// Creates the backing schema if absent. Bootstrap only.
    async fn setup(&self) -> Result<()>;

    /// Destroys the backing schema. Bootstrap and tests only.
    async fn tear_down(&self) -> Result<()>;
}

/// Half-open expiry window: `from <= expire_at < to`. Either bound may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpiryRange {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl ExpiryRange {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn between(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            from: Some(from),
            to: Some(to),
        }
    }

    pub fn before(to: DateTime<Utc>) -> Self {
        Self {
            from: None,
            to: Some(to),
        }
    }

    pub fn since(from: DateTime<Utc>) -> Self {
        Self {
            from: Some(from),
            to: None,
        }
    }

    pub fn is_unbounded(&self) -> bool {
        self.from.is_none() && self.to.is_none()
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.from.is_none_or(|from| at >= from) && self.to.is_none_or(|to| at < to)
    }
}

/// Row selector shared by `list` and `delete`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionFilter {
    pub token: Option<Token>,
    pub expire_at: ExpiryRange,
}

impl SessionFilter {
    pub fn by_token(token: Token) -> Self {
        Self {
            token: Some(token),
            expire_at: ExpiryRange::unbounded(),
        }
    }

    pub fn by_expiry(range: ExpiryRange) -> Self {
        Self {
            token: None,
            expire_at: range,
        }
    }

    /// Everything that expired strictly before `now`.
    pub fn expired_before(now: DateTime<Utc>) -> Self {
        Self::by_expiry(ExpiryRange::before(now))
    }

    pub fn with_expiry(mut self, range: ExpiryRange) -> Self {
        self.expire_at = range;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.token.is_none() && self.expire_at.is_unbounded()
    }

    pub fn matches(&self, session: &Session) -> bool {
        self.token.as_ref().is_none_or(|t| *t == session.token)
            && self.expire_at.contains(session.expire_at)
    }
}

pub(crate) fn validate_subject(subject_id: &str) -> Result<()> {
    if subject_id.is_empty() {
        return Err(StoreError::invalid("session cannot be started, missing subject id"));
    }
    Ok(())
}

pub(crate) fn validate_page(offset: i64, limit: i64) -> Result<()> {
    if limit <= 0 {
        return Err(StoreError::invalid(
            "cannot retrieve list of sessions, limit needs to be higher than 0",
        ));
    }
    if offset < 0 {
        return Err(StoreError::invalid(
            "cannot retrieve list of sessions, offset cannot be negative",
        ));
    }
    Ok(())
}

pub(crate) fn validate_delete(filter: &SessionFilter) -> Result<()> {
    if filter.is_empty() {
        return Err(StoreError::invalid(
            "session cannot be deleted, no where parameter provided",
        ));
    }
    Ok(())
}
