use std::fmt;
use std::sync::Arc;

use rand::TryRngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Seed hex-encoded into the prefix of every generated token.
pub const DEFAULT_TOKEN_SEED: &str = "1";

/// Number of random bytes behind each token (hex-encoded, so twice as many
/// token bytes).
pub const TOKEN_ENTROPY_BYTES: usize = 32;

/// Opaque session identifier. Equality is byte equality.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Token(Vec<u8>);

impl Token {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for Token {
    fn from(value: &str) -> Self {
        Self(value.as_bytes().to_vec())
    }
}

impl From<Vec<u8>> for Token {
    fn from(value: Vec<u8>) -> Self {
        Self(value)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token({self})")
    }
}

/// Source of cryptographically strong random bytes.
pub trait RandomBytes: Send + Sync {
    fn fill(&self, dest: &mut [u8]) -> Result<()>;
}

/// Operating system CSPRNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRandom;

impl RandomBytes for SystemRandom {
    fn fill(&self, dest: &mut [u8]) -> Result<()> {
        OsRng
            .try_fill_bytes(dest)
            .map_err(|e| StoreError::RandomSource(e.to_string()))
    }
}

/// Produces fixed-length tokens: `key ++ hex(random)`.
///
/// Uniqueness is probabilistic; the store reports a collision on insert as
/// [`StoreError::TokenConflict`].
#[derive(Clone)]
pub struct TokenGenerator {
    key: Vec<u8>,
    source: Arc<dyn RandomBytes>,
}

impl TokenGenerator {
    pub fn new(key: impl Into<Vec<u8>>, source: Arc<dyn RandomBytes>) -> Self {
        Self {
            key: key.into(),
            source,
        }
    }

    /// Generator over the OS random source with the given prefix.
    pub fn system(key: impl Into<Vec<u8>>) -> Self {
        Self::new(key, Arc::new(SystemRandom))
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// Length of every token this generator produces.
    pub fn token_len(&self) -> usize {
        self.key.len() + TOKEN_ENTROPY_BYTES * 2
    }

    pub fn generate(&self) -> Result<Token> {
        let mut seed = [0u8; TOKEN_ENTROPY_BYTES];
        self.source.fill(&mut seed)?;

        let mut bytes = Vec::with_capacity(self.token_len());
        bytes.extend_from_slice(&self.key);
        bytes.extend_from_slice(hex::encode(seed).as_bytes());

        Ok(Token(bytes))
    }
}

impl Default for TokenGenerator {
    fn default() -> Self {
        Self::system(hex::encode(DEFAULT_TOKEN_SEED))
    }
}

impl fmt::Debug for TokenGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenGenerator")
            .field("key", &String::from_utf8_lossy(&self.key))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    struct BrokenSource;

    impl RandomBytes for BrokenSource {
        fn fill(&self, _dest: &mut [u8]) -> Result<()> {
            Err(StoreError::RandomSource("entropy pool unavailable".into()))
        }
    }

    struct ZeroSource;

    impl RandomBytes for ZeroSource {
        fn fill(&self, dest: &mut [u8]) -> Result<()> {
            dest.fill(0);
            Ok(())
        }
    }

    #[test]
    fn default_key_is_hex_of_seed() {
        let generator = TokenGenerator::default();
        assert_eq!(generator.key(), b"31");

        let token = generator.generate().unwrap();
        assert!(token.as_bytes().starts_with(b"31"));
        assert_eq!(token.len(), generator.token_len());
        assert_eq!(token.len(), 2 + 64);
    }

    #[test]
    fn token_body_is_lowercase_hex() {
        let token = TokenGenerator::default().generate().unwrap();
        let body = &token.as_bytes()[2..];

        assert!(body.iter().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(b)));
    }

    #[test]
    fn custom_key_and_source_are_used() {
        let generator = TokenGenerator::new(b"ab".to_vec(), Arc::new(ZeroSource));
        let token = generator.generate().unwrap();

        let mut expected = b"ab".to_vec();
        expected.extend(std::iter::repeat_n(b'0', 64));
        assert_eq!(token.as_bytes(), expected.as_slice());
    }

    #[test]
    fn random_failure_propagates() {
        let generator = TokenGenerator::new(b"31".to_vec(), Arc::new(BrokenSource));
        let err = generator.generate().unwrap_err();

        assert!(matches!(err, StoreError::RandomSource(_)));
    }

    #[test]
    fn ten_thousand_tokens_do_not_collide() {
        let generator = TokenGenerator::default();
        let tokens: HashSet<Token> = (0..10_000).map(|_| generator.generate().unwrap()).collect();

        assert_eq!(tokens.len(), 10_000);
    }

    #[test]
    fn display_is_lossless_for_ascii_tokens() {
        let token = Token::from("31deadbeef");
        assert_eq!(token.to_string(), "31deadbeef");
        assert_eq!(format!("{token:?}"), "Token(31deadbeef)");
    }
}
