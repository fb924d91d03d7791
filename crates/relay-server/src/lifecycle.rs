use std::sync::Arc;

use relay_core::ConnectionId;

use crate::registry::SessionRegistry;
use crate::session::SessionHandle;

/// Bridges transport connect/disconnect notifications to the registry.
#[derive(Clone)]
pub struct ConnectionLifecycle {
    registry: Arc<SessionRegistry>,
}

impl ConnectionLifecycle {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    pub fn on_connect(&self, name: &str, handle: Arc<dyn SessionHandle>) {
        self.registry.register(name, handle);
    }

    pub fn on_disconnect(&self, name: &str, connection_id: &ConnectionId) {
        self.registry.deregister_connection(name, connection_id);
    }
}
