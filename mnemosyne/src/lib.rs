//! Server-side session storage.
//!
//! Sessions are short lived records keyed by an opaque [`Token`], bound to a
//! subject and carrying a small string [`Bag`]. The [`store::SessionStore`]
//! trait is the storage contract; [`store::postgres_store`] is the production
//! backend and [`store::memory_store`] the in-process one.

pub mod error;
pub mod metrics;
pub mod model;
pub mod store;
pub mod token;

pub use error::{Result, StoreError};
pub use metrics::{NoopRecorder, Outcome, QueryCounters, QueryRecorder};
pub use model::{Bag, Session};
pub use store::memory_store::MemorySessionStore;
pub use store::postgres_store::{PostgresSessionStore, PostgresStoreConfig};
pub use store::{ExpiryRange, SESSION_TTL_MINUTES, SessionFilter, SessionStore};
pub use token::{RandomBytes, SystemRandom, Token, TokenGenerator};
