//! # Decode Session Error Types
//!
//! Typed failures for every blocking and control operation on the session.
//! Each variant maps to one failure class a caller can act on; there are no
//! partial-success returns.

use thiserror::Error;

/// Errors surfaced by the decode session.
#[derive(Error, Debug)]
pub enum DecodeError {
    /// Buffer-pool setup could not be satisfied.
    #[error("buffer pool setup failed: {0}")]
    ResourceExhausted(String),

    /// The decode engine could not be activated or stopped responding.
    #[error("decode engine unavailable: {0}")]
    DeviceUnavailable(String),

    /// A bounded wait for a decoder state transition elapsed. Distinct from
    /// the engine reporting a failure.
    #[error("timed out waiting for decoder state change")]
    Timeout,

    /// The engine reported something inconsistent with the session's own
    /// bookkeeping.
    #[error("engine protocol fault: {0}")]
    ProtocolFault(String),

    /// The caller passed a configuration or request the session cannot
    /// honor.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A blocking operation was cut short because a stop or flush ran
    /// underneath it.
    #[error("operation aborted by stop or flush")]
    Busy,

    /// A blocking operation was cut short because the session was torn
    /// down underneath it.
    #[error("wait interrupted by session teardown")]
    Interrupted,
}

impl DecodeError {
    /// Returns `true` when the error reflects a concurrent disruption
    /// (stop, flush, teardown) rather than a caller or device fault.
    pub fn is_disruption(&self) -> bool {
        matches!(self, DecodeError::Busy | DecodeError::Interrupted)
    }

    /// Returns `true` when the engine itself is at fault.
    pub fn is_device_fault(&self) -> bool {
        matches!(
            self,
            DecodeError::DeviceUnavailable(_) | DecodeError::ProtocolFault(_)
        )
    }
}

impl From<bridge_dsp::BridgeError> for DecodeError {
    fn from(err: bridge_dsp::BridgeError) -> Self {
        DecodeError::DeviceUnavailable(err.to_string())
    }
}

/// Result type for decode session operations.
pub type Result<T> = std::result::Result<T, DecodeError>;
