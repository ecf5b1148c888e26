//! Media transport access tokens
//!
//! The media transport admits participants by token. Tokens come from an
//! external issuance endpoint; the call is remote and fallible, and its
//! failures must stay distinguishable from room connect failures.

use crate::identity::ParticipantId;
use crate::types::{ErrorCategory, RoomName};
use async_trait::async_trait;
use thiserror::Error;

/// Token issuance errors
#[derive(Error, Debug)]
pub enum TokenError {
    /// Endpoint unreachable
    #[error("video service token unavailable: {0}")]
    Unavailable(String),

    /// Endpoint reachable but refused the request
    #[error("video service rejected the token request: {0}")]
    Rejected(String),
}

impl TokenError {
    /// Machine-checkable category
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        ErrorCategory::TokenIssuanceFailed
    }
}

/// Opaque room access token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    /// Wrap an issued token
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner token string
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Token issuance endpoint
///
/// Not retried automatically; a failed issuance aborts the current connect
/// attempt and the user retries explicitly.
#[async_trait]
pub trait TokenProvider: Send + Sync + 'static {
    /// Obtain an access token scoped to one identity and one room
    async fn get_access_token(
        &self,
        identity: &ParticipantId,
        room: &RoomName,
    ) -> Result<AccessToken, TokenError>;
}

/// Provider that derives tokens locally
///
/// Suitable for tests and single-process deployments where the transport
/// does not verify tokens.
#[derive(Debug, Default)]
pub struct StaticTokenProvider;

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn get_access_token(
        &self,
        identity: &ParticipantId,
        room: &RoomName,
    ) -> Result<AccessToken, TokenError> {
        Ok(AccessToken::new(format!("{identity}@{room}")))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_provider_scopes_token() {
        let provider = StaticTokenProvider;
        let token = provider
            .get_access_token(
                &ParticipantId::new("patient-7"),
                &RoomName::for_patient(&ParticipantId::new("patient-7")),
            )
            .await
            .unwrap();
        assert_eq!(token.as_str(), "patient-7@call-patient-7");
    }

    #[test]
    fn test_category() {
        assert_eq!(
            TokenError::Unavailable("timeout".into()).category(),
            ErrorCategory::TokenIssuanceFailed
        );
    }
}
