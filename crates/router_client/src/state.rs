//! Connection lifecycle states and the events published when they change.

use router_core::RouterError;
use std::fmt;

/// Lifecycle of a client's connection.
///
/// `Created → WsConnecting → ClientConnecting → Connected`, with `Closed`
/// reachable from every state. A closed client may connect again, which starts
/// a new cycle at `WsConnecting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientState {
    Created,
    /// Opening the transport.
    WsConnecting,
    /// Transport open; `Connect` sent, awaiting `ConnectResponse`.
    ClientConnecting,
    Connected,
    Closed,
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClientState::Created => "Created",
            ClientState::WsConnecting => "WsConnecting",
            ClientState::ClientConnecting => "ClientConnecting",
            ClientState::Connected => "Connected",
            ClientState::Closed => "Closed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    StateChanged(ClientState),
    Connected { client_id: String },
    /// `error` is `None` when the client closed the connection itself.
    Closed { error: Option<RouterError> },
}
