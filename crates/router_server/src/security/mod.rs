//! Access control for incoming connections.
//!
//! The broker consults an [`AccessTokenValidator`] on every `Connect` before it
//! assigns a client id. What a token means is up to the validator.

use async_trait::async_trait;
use router_core::RouterError;
use tracing::debug;

/// Decides whether a connecting client may use the broker.
#[async_trait]
pub trait AccessTokenValidator: Send + Sync {
    /// `client_id` is the id the client asked to keep, if any.
    ///
    /// Returning an error refuses the connection; the error is sent back to the
    /// client inside the `ConnectResponse`.
    async fn validate(
        &self,
        client_id: Option<&str>,
        access_token: Option<&str>,
    ) -> Result<(), RouterError>;
}

/// Accepts exactly one shared secret.
#[derive(Debug, Clone)]
pub struct StaticTokenValidator {
    token: String,
}

impl StaticTokenValidator {
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into() }
    }
}

#[async_trait]
impl AccessTokenValidator for StaticTokenValidator {
    async fn validate(
        &self,
        client_id: Option<&str>,
        access_token: Option<&str>,
    ) -> Result<(), RouterError> {
        match access_token {
            Some(token) if token == self.token => Ok(()),
            _ => {
                debug!("🔒 Rejected access token from {}", client_id.unwrap_or("new client"));
                Err(RouterError::invalid_access_token())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use router_core::ErrorKind;

    #[tokio::test]
    async fn test_static_token_validator() {
        let validator = StaticTokenValidator::new("secret");

        assert!(validator.validate(None, Some("secret")).await.is_ok());

        let wrong = validator.validate(Some("abc"), Some("guess")).await.unwrap_err();
        assert_eq!(wrong.kind(), Some(ErrorKind::InvalidAccessToken));

        let missing = validator.validate(None, None).await.unwrap_err();
        assert_eq!(missing.kind(), Some(ErrorKind::InvalidAccessToken));
    }
}
