use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use tracing::debug;

use super::{
    ExpiryRange, SESSION_TTL_MINUTES, SessionFilter, SessionStore, validate_delete, validate_page,
    validate_subject,
};
use crate::error::{Result, StoreError};
use crate::model::{Bag, Session};
use crate::token::{Token, TokenGenerator};

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// In-process session store with the same contract as the PostgreSQL one.
///
/// The map lock is held only for the duration of a single operation, which
/// gives `set_value` the same no-lost-update guarantee as the row lock.
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<Token, Session>>,
    generator: TokenGenerator,
    clock: Clock,
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            generator: TokenGenerator::default(),
            clock: Arc::new(Utc::now),
        }
    }
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_generator(mut self, generator: TokenGenerator) -> Self {
        self.generator = generator;
        self
    }

    /// Replaces the time source used to compute `expire_at`.
    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    /// Stores a fully formed session as-is, e.g. with a chosen `expire_at`.
    pub fn insert(&self, session: Session) -> Result<()> {
        match self.sessions.lock().entry(session.token.clone()) {
            Entry::Occupied(_) => Err(StoreError::TokenConflict),
            Entry::Vacant(slot) => {
                slot.insert(session);
                Ok(())
            }
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn start(&self, subject_id: &str, bag: Bag) -> Result<Session> {
        validate_subject(subject_id)?;

        let token = self.generator.generate()?;
        let session = Session {
            token,
            subject_id: subject_id.to_owned(),
            bag,
            expire_at: (self.clock)() + TimeDelta::minutes(SESSION_TTL_MINUTES),
        };

        self.insert(session.clone())?;
        debug!(target: "store", token = %session.token, "session started");

        Ok(session)
    }

    async fn get(&self, token: &Token) -> Result<Session> {
        self.sessions
            .lock()
            .get(token)
            .cloned()
            .ok_or(StoreError::SessionNotFound)
    }

    async fn exists(&self, token: &Token) -> Result<bool> {
        Ok(self.sessions.lock().contains_key(token))
    }

    async fn abandon(&self, token: &Token) -> Result<bool> {
        match self.sessions.lock().remove(token) {
            Some(_) => Ok(true),
            None => Err(StoreError::SessionNotFound),
        }
    }

    async fn set_value(&self, token: &Token, key: &str, value: &str) -> Result<Bag> {
        let mut sessions = self.sessions.lock();
        let session = sessions.get_mut(token).ok_or(StoreError::SessionNotFound)?;

        session.bag.set(key, value);
        Ok(session.bag.clone())
    }

    async fn list(&self, offset: i64, limit: i64, range: &ExpiryRange) -> Result<Vec<Session>> {
        validate_page(offset, limit)?;

        let mut matching: Vec<Session> = self
            .sessions
            .lock()
            .values()
            .filter(|s| range.contains(s.expire_at))
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.expire_at.cmp(&b.expire_at).then_with(|| a.token.cmp(&b.token)));

        Ok(matching
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn delete(&self, filter: &SessionFilter) -> Result<u64> {
        validate_delete(filter)?;

        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|_, s| !filter.matches(s));
        let affected = (before - sessions.len()) as u64;

        debug!(target: "store", affected, "sessions deleted");
        Ok(affected)
    }

    async fn setup(&self) -> Result<()> {
        Ok(())
    }

    async fn tear_down(&self) -> Result<()> {
        self.sessions.lock().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn expire_at_follows_injected_clock() {
        let now = Utc::now();
        let store = MemorySessionStore::new().with_clock(move || now);

        let session = store.start("subject", Bag::new()).await.unwrap();
        assert_eq!(session.expire_at, now + TimeDelta::minutes(30));
    }

    #[tokio::test]
    async fn insert_rejects_duplicate_token() {
        let store = MemorySessionStore::new();
        let session = store.start("subject", Bag::new()).await.unwrap();

        let err = store.insert(session).unwrap_err();
        assert!(matches!(err, StoreError::TokenConflict));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn tear_down_empties_the_store() {
        let store = MemorySessionStore::new();
        store.start("a", Bag::new()).await.unwrap();
        store.start("b", Bag::new()).await.unwrap();

        store.tear_down().await.unwrap();
        assert!(store.is_empty());
    }
}
