//! Error types for the serial monitor
//!
//! Startup errors are fatal, read warnings are reported inline and the loop
//! keeps going, and I/O failures on an open connection stop the loop.

use thiserror::Error;

/// Result type alias for monitor operations
pub type Result<T> = std::result::Result<T, MonitorError>;

/// Hint shown when a port cannot be opened
pub const PORT_HINT: &str = "Check if the port is correct and not open in another program.";

/// Errors raised while resolving arguments, connecting, or reading
#[derive(Error, Debug)]
pub enum MonitorError {
    /// Malformed command-line input
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The serial device could not be opened
    #[error("Error opening serial port {port}: {source}")]
    PortUnavailable {
        /// Port that failed to open
        port: String,
        #[source]
        source: serialport::Error,
    },

    /// Recoverable condition inside a single loop iteration
    #[error("{0}")]
    ReadWarning(String),

    /// I/O failure on an established connection (reads, writes, line control)
    #[error("Serial I/O failure: {0}")]
    Io(#[from] std::io::Error),
}

impl MonitorError {
    /// Whether the read loop may continue after this error
    pub fn is_recoverable(&self) -> bool {
        matches!(self, MonitorError::ReadWarning(_))
    }

    /// Process exit code for an error that ended the program
    pub fn exit_code(&self) -> i32 {
        match self {
            MonitorError::InvalidArgument(_) => 2,
            MonitorError::PortUnavailable { .. } => 1,
            MonitorError::ReadWarning(_) | MonitorError::Io(_) => 1,
        }
    }

    /// Remediation hint to print alongside the error, if any
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            MonitorError::PortUnavailable { .. } => Some(PORT_HINT),
            _ => None,
        }
    }
}
