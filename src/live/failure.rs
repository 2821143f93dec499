use thiserror::Error;

/// Reasons a session ends in `Failed`, with user-facing messages
///
/// Every variant is handled the same way internally; the distinction only
/// drives what the user is told.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionFailure {
    #[error("Connection timeout")]
    OpenTimeout,

    #[error("Connection failed: {0}")]
    Transport(String),

    #[error("Connection lost unexpectedly")]
    AbnormalClosure,

    #[error("Invalid audio format sent")]
    MalformedData,

    #[error("Policy violation or invalid API key")]
    PolicyRejected,

    #[error("Secure connection could not be established")]
    Handshake,

    #[error("Protocol error")]
    ProtocolViolation,

    #[error("Connection closed ({code})")]
    Closed { code: u16 },

    /// The session driver stopped without reaching an end state
    #[error("Session stopped unexpectedly")]
    Internal,
}

impl SessionFailure {
    /// Map a close code to a failure; 1000 is a normal end
    pub fn from_close_code(code: u16) -> Option<Self> {
        match code {
            1000 => None,
            1002 => Some(SessionFailure::ProtocolViolation),
            1006 => Some(SessionFailure::AbnormalClosure),
            1007 => Some(SessionFailure::MalformedData),
            1008 => Some(SessionFailure::PolicyRejected),
            1015 => Some(SessionFailure::Handshake),
            other => Some(SessionFailure::Closed { code: other }),
        }
    }
}

/// Errors raised by a transport while connecting or exchanging frames
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportFault {
    #[error("TLS error: {0}")]
    Tls(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    /// The HTTP upgrade was answered with a non-101 status
    #[error("upgrade rejected with HTTP {status}")]
    Rejected { status: u16 },

    #[error("{0}")]
    Other(String),
}

impl TransportFault {
    pub fn failure(&self) -> SessionFailure {
        match self {
            TransportFault::Tls(_) => SessionFailure::Handshake,
            TransportFault::Protocol(_) => SessionFailure::ProtocolViolation,
            TransportFault::Rejected { status: 401 | 403 } => SessionFailure::PolicyRejected,
            TransportFault::Rejected { status } => {
                SessionFailure::Transport(format!("HTTP {}", status))
            }
            TransportFault::Other(message) => SessionFailure::Transport(message.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_code_messages() {
        assert_eq!(SessionFailure::from_close_code(1000), None);
        assert_eq!(
            SessionFailure::from_close_code(1006).unwrap().to_string(),
            "Connection lost unexpectedly"
        );
        assert_eq!(
            SessionFailure::from_close_code(1007).unwrap().to_string(),
            "Invalid audio format sent"
        );
        assert_eq!(
            SessionFailure::from_close_code(1008).unwrap().to_string(),
            "Policy violation or invalid API key"
        );
        assert_eq!(
            SessionFailure::from_close_code(4001).unwrap().to_string(),
            "Connection closed (4001)"
        );
        assert_eq!(
            SessionFailure::from_close_code(1002),
            Some(SessionFailure::ProtocolViolation)
        );
        assert_eq!(SessionFailure::from_close_code(1015), Some(SessionFailure::Handshake));
    }

    #[test]
    fn test_transport_fault_mapping() {
        assert_eq!(
            TransportFault::Rejected { status: 403 }.failure(),
            SessionFailure::PolicyRejected
        );
        assert_eq!(
            TransportFault::Tls("bad cert".into()).failure(),
            SessionFailure::Handshake
        );
        assert_eq!(
            TransportFault::Other("refused".into()).failure().to_string(),
            "Connection failed: refused"
        );
    }
}
