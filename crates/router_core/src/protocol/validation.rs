//! Name rules for topics and endpoints.

use crate::error::RouterError;

/// A topic name is valid when it contains at least one non-whitespace character.
pub fn is_valid_topic(topic: &str) -> bool {
    !topic.trim().is_empty()
}

/// Endpoint names follow the same rule as topics.
pub fn is_valid_endpoint(endpoint: &str) -> bool {
    !endpoint.trim().is_empty()
}

pub fn validate_topic(topic: &str) -> Result<(), RouterError> {
    if is_valid_topic(topic) {
        Ok(())
    } else {
        Err(RouterError::invalid_topic(topic))
    }
}

pub fn validate_endpoint(endpoint: &str) -> Result<(), RouterError> {
    if is_valid_endpoint(endpoint) {
        Ok(())
    } else {
        Err(RouterError::invalid_endpoint(endpoint))
    }
}
