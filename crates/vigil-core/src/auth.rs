//! Bearer-token plumbing for Google API adapters.

use secrecy::SecretString;
use thiserror::Error;

/// Error raised when no valid token can be produced.
#[derive(Debug, Error)]
#[error("failed to obtain access token: {message}")]
pub struct AuthError {
    /// What went wrong.
    pub message: String,
}

/// Supplies OAuth2 bearer tokens for outbound API calls.
///
/// The application-default-credentials exchange is deliberately outside this
/// crate; deployments mint short-lived tokens and hand them in through an
/// implementation of this trait.
pub trait AccessTokenProvider: Send + Sync {
    /// Returns a currently valid bearer token.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] when no token can be produced.
    fn access_token(&self) -> Result<SecretString, AuthError>;
}

/// Token provider backed by a fixed token string.
pub struct StaticTokenProvider {
    token: SecretString,
}

impl StaticTokenProvider {
    /// Wraps an already-minted token.
    #[must_use]
    pub fn new(token: SecretString) -> Self {
        Self { token }
    }
}

impl AccessTokenProvider for StaticTokenProvider {
    fn access_token(&self) -> Result<SecretString, AuthError> {
        Ok(self.token.clone())
    }
}
