//! Client connection options.

use router_core::ACCESS_TOKEN_ENV_VAR;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientOptions {
    /// Identity to ask the broker to keep. Updated with the assigned id after
    /// every successful connect.
    pub client_id: Option<String>,

    pub access_token: Option<String>,
}

impl ClientOptions {
    /// Reads the access token a launcher injected into this process.
    pub fn from_env() -> Self {
        Self {
            client_id: None,
            access_token: std::env::var(ACCESS_TOKEN_ENV_VAR)
                .ok()
                .filter(|token| !token.is_empty()),
        }
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }
}
