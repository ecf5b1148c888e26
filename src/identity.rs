//! Participant identity
//!
//! Participants are identified by opaque strings issued by the surrounding
//! application. One identity is special: the caregiver has a fixed,
//! well-known identifier so that either side of a call can tell which
//! participant is the patient.

use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// The fixed identifier of the caregiver account.
pub const CAREGIVER_ID: &str = "caregiver";

/// Opaque participant identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    /// Create a new participant identity
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// The well-known caregiver identity
    #[must_use]
    pub fn caregiver() -> Self {
        Self(CAREGIVER_ID.to_string())
    }

    /// Parse an identity from an externally supplied string
    ///
    /// # Errors
    ///
    /// Returns an error if the string is empty or whitespace-only.
    pub fn parse(s: &str) -> anyhow::Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            anyhow::bail!("participant identity must not be empty");
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Whether this is the caregiver identity
    #[must_use]
    pub fn is_caregiver(&self) -> bool {
        self.0 == CAREGIVER_ID
    }

    /// Get the inner string
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ParticipantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ParticipantId {
    fn from(s: String) -> Self {
        Self(s)
    }
}
