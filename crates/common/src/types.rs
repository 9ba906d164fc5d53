//! Identifiers shared by every Matchkeeper crate
//!
//! Matches are keyed by their ledger address. Participants are opaque
//! ledger account identifiers. Settlement attempts carry an [`AttemptId`]
//! so that retries of one logical settlement can be told apart from a new
//! dispatch.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Ledger address of a match
///
/// Addresses are compared case-insensitively, so they are normalised to
/// lowercase on construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MatchAddress(String);

impl MatchAddress {
    /// Parse an address, rejecting empty or whitespace-containing input
    pub fn parse(raw: impl AsRef<str>) -> Result<Self> {
        let raw = raw.as_ref().trim();
        if raw.is_empty() {
            return Err(Error::invalid_input("match address is empty"));
        }
        if raw.chars().any(char::is_whitespace) {
            return Err(Error::invalid_input(format!(
                "match address contains whitespace: {raw:?}"
            )));
        }
        Ok(Self(raw.to_ascii_lowercase()))
    }

    /// Get the normalised address string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for MatchAddress {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(value)
    }
}

impl From<MatchAddress> for String {
    fn from(value: MatchAddress) -> Self {
        value.0
    }
}

impl std::str::FromStr for MatchAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl std::fmt::Display for MatchAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a match participant (a ledger account)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(pub String);

impl ParticipantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ordered pair of participants; `first` is the ledger's player one
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Participants {
    pub first: ParticipantId,
    pub second: ParticipantId,
}

impl Participants {
    pub fn new(first: ParticipantId, second: ParticipantId) -> Self {
        Self { first, second }
    }
}

impl std::fmt::Display for Participants {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} vs {}", self.first, self.second)
    }
}

/// Idempotency token for one logical settlement dispatch
///
/// Every retry of the same dispatch reuses the token; a new dispatch on a
/// later scheduler cycle gets a fresh one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttemptId(pub Uuid);

impl AttemptId {
    /// Create a new random AttemptId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for AttemptId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AttemptId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
