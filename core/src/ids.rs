//! Identifier types for astro-ledger.
//!
//! This module provides strongly-typed identifiers for users and audit records.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, OnceLock, PoisonError};
use ulid::{Generator, Ulid};

/// Maximum accepted length of a user identifier.
pub const MAX_USER_ID_LEN: usize = 128;

/// A user identifier issued by the identity provider.
///
/// User IDs are opaque strings (auth-provider uids). They are restricted to
/// ASCII alphanumerics and `-_.:@` so they can be embedded in URL paths and
/// used as storage key prefixes without escaping.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    /// Generate a new random `UserId` (for testing and local tooling).
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Return the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Return the raw bytes of the identifier.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    fn is_valid_char(c: char) -> bool {
        c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':' | '@')
    }
}

impl FromStr for UserId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || s.len() > MAX_USER_ID_LEN || !s.chars().all(Self::is_valid_char) {
            return Err(IdError::InvalidUserId);
        }
        Ok(Self(s.to_string()))
    }
}

impl fmt::Debug for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserId({})", self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for UserId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<UserId> for String {
    fn from(id: UserId) -> Self {
        id.0
    }
}

impl AsRef<[u8]> for UserId {
    fn as_ref(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

/// An adjustment record identifier using ULID for time-ordering.
///
/// Adjustment IDs are time-ordered so a user's audit trail sorts
/// chronologically by key. IDs generated within one process are strictly
/// increasing, including several records written in the same millisecond.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AdjustmentId(Ulid);

impl AdjustmentId {
    /// Generate a new `AdjustmentId` with the current timestamp.
    #[must_use]
    pub fn generate() -> Self {
        static GENERATOR: OnceLock<Mutex<Generator>> = OnceLock::new();

        let mut generator = GENERATOR
            .get_or_init(|| Mutex::new(Generator::new()))
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // Overflow needs 2^80 IDs in one millisecond.
        Self(generator.generate().unwrap_or_else(|_| Ulid::new()))
    }

    /// Return the bytes of the ULID (16 bytes).
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 16] {
        self.0.to_bytes()
    }

    /// Create an `AdjustmentId` from bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Ulid::from_bytes(bytes))
    }
}

impl FromStr for AdjustmentId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ulid = Ulid::from_string(s).map_err(|_| IdError::InvalidUlid)?;
        Ok(Self(ulid))
    }
}

impl fmt::Debug for AdjustmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AdjustmentId({})", self.0)
    }
}

impl fmt::Display for AdjustmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for AdjustmentId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AdjustmentId> for String {
    fn from(id: AdjustmentId) -> Self {
        id.0.to_string()
    }
}

/// Errors that can occur when parsing identifiers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// The input is not an acceptable user identifier.
    #[error("invalid user id")]
    InvalidUserId,

    /// The input is not a valid ULID.
    #[error("invalid ULID format")]
    InvalidUlid,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adjustment_ids_strictly_increase() {
        let ids: Vec<AdjustmentId> = (0..1000).map(|_| AdjustmentId::generate()).collect();
        assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn user_id_accepts_provider_uids() {
        let id: UserId = "Xk3vQ9pL2mZ8aB7cD1eF4gH5iJ6k".parse().unwrap();
        assert_eq!(id.as_str(), "Xk3vQ9pL2mZ8aB7cD1eF4gH5iJ6k");

        assert!("google-oauth2:1234@example.com".parse::<UserId>().is_ok());
    }

    #[test]
    fn user_id_rejects_unsafe_input() {
        assert_eq!("".parse::<UserId>(), Err(IdError::InvalidUserId));
        assert_eq!("a/b".parse::<UserId>(), Err(IdError::InvalidUserId));
        assert_eq!("a b".parse::<UserId>(), Err(IdError::InvalidUserId));
        assert_eq!("a\0b".parse::<UserId>(), Err(IdError::InvalidUserId));

        let too_long = "x".repeat(MAX_USER_ID_LEN + 1);
        assert_eq!(too_long.parse::<UserId>(), Err(IdError::InvalidUserId));
    }

    #[test]
    fn user_id_serde_rejects_invalid() {
        let parsed: Result<UserId, _> = serde_json::from_str("\"bad/uid\"");
        assert!(parsed.is_err());
    }

    #[test]
    fn adjustment_ids_sort_by_creation() {
        let first = AdjustmentId::generate();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = AdjustmentId::generate();
        assert!(first < second);
        assert_eq!(AdjustmentId::from_bytes(first.to_bytes()), first);
    }
}
