//! Scriptable in-memory sessions for tests.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use relay_core::{ConnectionId, RelayError};
use serde_json::Value;
use tokio::sync::oneshot;

use crate::session::{ReplyReceiver, SessionHandle};

/// How a [`MockSession`] reacts to commands.
#[derive(Clone, Debug)]
pub enum MockBehavior {
    /// Answer every command with `body` after `delay`.
    Reply { delay: Duration, body: Value },
    /// Accept commands and never answer.
    Silent,
    /// Fail to send.
    FailSend,
    /// Accept the command, then drop the reply channel unanswered.
    Hangup,
}

pub struct MockSession {
    connection_id: ConnectionId,
    behavior: MockBehavior,
    pub commands: Mutex<Vec<String>>,
    pub messages: Mutex<Vec<String>>,
    pub subscriptions: Mutex<Vec<String>>,
    held: Mutex<Vec<oneshot::Sender<Value>>>,
}

impl MockSession {
    pub fn new(behavior: MockBehavior) -> Arc<Self> {
        Arc::new(Self {
            connection_id: ConnectionId::new(),
            behavior,
            commands: Mutex::new(Vec::new()),
            messages: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(Vec::new()),
            held: Mutex::new(Vec::new()),
        })
    }

    pub fn replying(delay_ms: u64, body: Value) -> Arc<Self> {
        Self::new(MockBehavior::Reply {
            delay: Duration::from_millis(delay_ms),
            body,
        })
    }
}

impl SessionHandle for MockSession {
    fn connection_id(&self) -> &ConnectionId {
        &self.connection_id
    }

    fn send_command(&self, command: &str) -> Result<ReplyReceiver, RelayError> {
        if matches!(self.behavior, MockBehavior::FailSend) {
            return Err(RelayError::SessionClosed);
        }
        self.commands.lock().push(command.to_string());

        let (tx, rx) = oneshot::channel();
        match &self.behavior {
            MockBehavior::Reply { delay, body } => {
                let delay = *delay;
                let body = body.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(body);
                });
            }
            MockBehavior::Silent => self.held.lock().push(tx),
            MockBehavior::Hangup => drop(tx),
            MockBehavior::FailSend => unreachable!(),
        }
        Ok(rx)
    }

    fn send_message(&self, message: &str) -> Result<(), RelayError> {
        self.messages.lock().push(message.to_string());
        Ok(())
    }

    fn subscribe(&self, event_name: &str) -> Result<(), RelayError> {
        self.subscriptions.lock().push(event_name.to_string());
        Ok(())
    }
}
