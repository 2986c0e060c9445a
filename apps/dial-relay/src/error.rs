use thiserror::Error;

/// Protocol violations reported back to the offending sender.
///
/// The `Display` text is the wire `message` of the failure envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("invalid remote uid")]
    InvalidRemoteUid,
    #[error("invalid local uid")]
    InvalidLocalUid,
    #[error("incorrect phase")]
    IncorrectPhase,
}

impl ProtocolError {
    /// Label used on the rejection counters.
    pub fn reason(self) -> &'static str {
        match self {
            ProtocolError::InvalidRemoteUid => "invalid_remote_uid",
            ProtocolError::InvalidLocalUid => "invalid_local_uid",
            ProtocolError::IncorrectPhase => "incorrect_phase",
        }
    }
}

/// Outbound delivery failures. Logged by the caller, never surfaced to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("outbound queue is full")]
    QueueFull,
    #[error("connection writer has gone away")]
    Closed,
}

impl SendError {
    pub fn reason(self) -> &'static str {
        match self {
            SendError::QueueFull => "queue_full",
            SendError::Closed => "closed",
        }
    }
}
