use thiserror::Error;

/// Failures raised by an engine transport implementation.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// The transport (or the engine behind it) is not reachable.
    #[error("engine transport not available: {0}")]
    NotAvailable(String),

    /// A command was accepted by the transport but the engine rejected it.
    #[error("engine command failed: {0}")]
    CommandFailed(String),

    /// The engine command queue refused the write.
    #[error("engine command queue full")]
    QueueFull,
}

pub type Result<T> = std::result::Result<T, BridgeError>;
