use std::sync::Arc;

use relay_core::{ConnectionId, RelayError};
use serde_json::Value;
use tokio::sync::oneshot;

/// Settles with the client's response body for one command.
///
/// Resolves to `Err` when the session goes away before answering; callers
/// treat that as "never answered".
pub type ReplyReceiver = oneshot::Receiver<Value>;

/// Capability to talk to one connected game client.
///
/// All methods are non-blocking: they enqueue a frame and return.
pub trait SessionHandle: Send + Sync {
    fn connection_id(&self) -> &ConnectionId;

    /// Send a command and get a receiver for its structured result.
    fn send_command(&self, command: &str) -> Result<ReplyReceiver, RelayError>;

    /// Show a chat message to the player.
    fn send_message(&self, message: &str) -> Result<(), RelayError>;

    /// Subscribe to a client-side event stream.
    fn subscribe(&self, event_name: &str) -> Result<(), RelayError>;
}

/// A registry entry as seen by a dispatch snapshot.
#[derive(Clone)]
pub struct Session {
    pub name: String,
    pub handle: Arc<dyn SessionHandle>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("name", &self.name)
            .field("connection_id", self.handle.connection_id())
            .finish()
    }
}
