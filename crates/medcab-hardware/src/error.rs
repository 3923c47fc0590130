//! Error types for the serial transport.
//!
//! Transport errors are recovered locally where possible (connect backoff,
//! write retries) and only reach the caller once retries are exhausted.

/// Result type alias for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Errors raised by the connection manager and the command sequencer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// No channel is open.
    #[error("Serial channel not connected")]
    NotConnected,

    /// The port could not be opened.
    #[error("Failed to open {port}: {message}")]
    OpenFailed { port: String, message: String },

    /// Opening the port did not finish in time.
    #[error("Operation timeout after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// Every write attempt of a queued command failed.
    #[error("Write failed after {attempts} attempts: {message}")]
    RetriesExhausted { attempts: u32, message: String },

    /// The board never answered a written command.
    #[error("No response to opcode {opcode:#04x} after {sends} sends")]
    NoResponse { opcode: u8, sends: u32 },

    /// The command was dropped from the queue before it was written.
    #[error("Command cancelled")]
    Cancelled,

    /// The peer closed the channel.
    #[error("Connection lost")]
    ConnectionLost,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Create an open failure for `port`.
    pub fn open_failed(port: impl Into<String>, message: impl Into<String>) -> Self {
        Self::OpenFailed {
            port: port.into(),
            message: message.into(),
        }
    }

    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    /// Returns `true` if retrying the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Cancelled)
    }
}
