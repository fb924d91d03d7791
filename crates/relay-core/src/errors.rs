/// Error taxonomy for the relay.
///
/// Input errors surface to the HTTP caller; everything session-scoped is
/// logged and contained by the dispatcher.
#[derive(Clone, Debug, thiserror::Error)]
pub enum RelayError {
    // Caller input
    #[error("No Command Specified")]
    EmptyCommand,
    #[error("malformed command escape: {0}")]
    MalformedCommand(String),

    // Session transport
    #[error("session closed")]
    SessionClosed,
    #[error("send queue full")]
    SendQueueFull,
    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("serialization failed: {0}")]
    Serialization(String),
}

impl RelayError {
    /// True for errors caused by the HTTP caller's input.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::EmptyCommand | Self::MalformedCommand(_))
    }

    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::EmptyCommand => "empty_command",
            Self::MalformedCommand(_) => "malformed_command",
            Self::SessionClosed => "session_closed",
            Self::SendQueueFull => "send_queue_full",
            Self::Handshake(_) => "handshake",
            Self::Serialization(_) => "serialization",
        }
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_error_classification() {
        assert!(RelayError::EmptyCommand.is_client_error());
        assert!(RelayError::MalformedCommand("%zz".into()).is_client_error());
        assert!(!RelayError::SessionClosed.is_client_error());
        assert!(!RelayError::SendQueueFull.is_client_error());
        assert!(!RelayError::Handshake("timeout".into()).is_client_error());
    }

    #[test]
    fn empty_command_message_is_user_facing() {
        assert_eq!(RelayError::EmptyCommand.to_string(), "No Command Specified");
    }

    #[test]
    fn error_kind_strings() {
        assert_eq!(RelayError::SessionClosed.error_kind(), "session_closed");
        assert_eq!(RelayError::SendQueueFull.error_kind(), "send_queue_full");
        assert_eq!(RelayError::Serialization("x".into()).error_kind(), "serialization");
    }

    #[test]
    fn json_errors_convert() {
        let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let relay: RelayError = err.into();
        assert_eq!(relay.error_kind(), "serialization");
    }
}
