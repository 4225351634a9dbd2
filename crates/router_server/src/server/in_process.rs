//! In-process connections to a running server.

use crate::server::core::MessageRouterServer;
use async_trait::async_trait;
use router_core::{ChannelError, Connector, DuplexChannel};
use std::sync::Arc;

/// Opens [`InProcessChannel`](router_core::InProcessChannel) connections to a server
/// in the same runtime.
#[derive(Debug, Clone)]
pub struct InProcessConnector {
    server: MessageRouterServer,
}

impl InProcessConnector {
    pub fn new(server: MessageRouterServer) -> Self {
        Self { server }
    }
}

#[async_trait]
impl Connector for InProcessConnector {
    async fn connect(&self) -> Result<Arc<dyn DuplexChannel>, ChannelError> {
        Ok(self.server.connect_in_process())
    }
}
