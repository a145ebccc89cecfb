use thiserror::Error;

pub const DISCOVERY_UNREACHABLE_MESSAGE: &str =
    "could not reach the discovery endpoint; start the companion launcher (remote debugging enabled) and retry";

/// Connection-level failure taxonomy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TraceError {
    #[error("discovery failed: {0}")]
    Discovery(String),
    #[error("transport failed: {0}")]
    Transport(String),
    #[error("producer reported an error: {0}")]
    Protocol(String),
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
}

impl TraceError {
    /// Whether the error tears the session down without a retry.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TraceError::Protocol(_) | TraceError::MalformedFrame(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("message decode failed: {0}")]
    Decode(String),
    #[error("command encode failed: {0}")]
    Encode(String),
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
}

impl From<WireError> for TraceError {
    fn from(err: WireError) -> Self {
        match err {
            WireError::MalformedFrame(reason) => TraceError::MalformedFrame(reason),
            other => TraceError::Protocol(other.to_string()),
        }
    }
}
