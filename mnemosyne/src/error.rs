use thiserror::Error;

/// Classified failures of a [`SessionStore`](crate::store::SessionStore) call.
///
/// A transport maps these onto its own status codes: not-found, invalid
/// argument, and everything else as internal.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("session not found")]
    SessionNotFound,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Stored bag bytes do not decode. Data-integrity fault.
    #[error("malformed session bag: {0}")]
    MalformedBag(#[from] serde_json::Error),

    #[error("secure random source failed: {0}")]
    RandomSource(String),

    /// A freshly generated token already belongs to a stored session.
    #[error("generated token collides with an existing session")]
    TokenConflict,

    #[error("storage failure: {0}")]
    Storage(#[from] sqlx::Error),
}

impl StoreError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        StoreError::InvalidArgument(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::SessionNotFound)
    }

    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, StoreError::InvalidArgument(_))
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
