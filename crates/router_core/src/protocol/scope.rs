//! Message scopes.
//!
//! A scope narrows who a message is meant for. The only scope the broker acts on
//! is a client scope, written `@<clientId>`: an `Invoke` carrying one goes to
//! that client directly instead of to the endpoint's registered owner. Any other
//! value is passed through untouched.

use serde::{Deserialize, Serialize};
use std::fmt;

const CLIENT_PREFIX: char = '@';

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageScope(String);

impl MessageScope {
    /// Parses a scope; the empty string is the default, application-wide scope.
    pub fn parse(value: impl Into<String>) -> Option<Self> {
        let value = value.into();
        (!value.is_empty()).then_some(Self(value))
    }

    /// The scope addressing exactly one client.
    pub fn from_client_id(client_id: &str) -> Self {
        Self(format!("{CLIENT_PREFIX}{client_id}"))
    }

    pub fn is_client_id(&self) -> bool {
        self.0.starts_with(CLIENT_PREFIX)
    }

    /// The addressed client, for client scopes.
    pub fn client_id(&self) -> Option<&str> {
        self.0.strip_prefix(CLIENT_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
