//! Error types for catch-up classification and supervision
//!
//! All fallible operations in the workspace return [`Result`]. Terminal
//! recovery failures are *not* errors: they are reported as
//! `MonitorOutcome::Failed` values by the monitor crate. The variants here
//! cover decision failures (raised before anything destructive happens),
//! server/connection failures, malformed server data and configuration.

use std::io;
use thiserror::Error;

/// Result type alias for catch-up operations
pub type Result<T> = std::result::Result<T, Error>;

/// MySQL client error: can't connect to server
pub const CR_CONN_HOST_ERROR: u32 = 2003;
/// MySQL client error: server has gone away
pub const CR_SERVER_GONE_ERROR: u32 = 2006;
/// MySQL client error: lost connection during query
pub const CR_SERVER_LOST: u32 = 2013;
/// MySQL client error: lost connection at handshake/reading packet
pub const CR_SERVER_LOST_EXTENDED: u32 = 2055;
/// Server error: server shutdown in progress
pub const ER_SERVER_SHUTDOWN: u32 = 1053;

/// Error types for catch-up operations
///
/// # Categories
///
/// | Category | Variants |
/// |----------|----------|
/// | Decision | `AmbiguousRecovery`, `RecoveryImpossible`, `InvalidRecoveryMethod`, `RecoveryAborted` |
/// | Server | `Server` |
/// | Data | `InvalidTransactionSet`, `InvalidVersion`, `MissingColumn`, `UnexpectedValue` |
/// | System | `Config`, `Io` |
#[derive(Debug, Error)]
pub enum Error {
    // ==================== Decision ====================
    /// An explicit recovery method is required but none was supplied
    #[error("ambiguous recovery for {target}: {reason}")]
    AmbiguousRecovery {
        /// Endpoint of the target instance
        target: String,
        /// Why the engine could not pick a method on its own
        reason: String,
    },

    /// Neither recovery method can bring the target up to date
    #[error("recovery impossible for {target}: {reason}")]
    RecoveryImpossible {
        /// Endpoint of the target instance
        target: String,
        /// Why no method is usable
        reason: String,
    },

    /// The requested recovery method cannot be used
    #[error("invalid recovery method: {reason}")]
    InvalidRecoveryMethod {
        /// Why the method was rejected
        reason: String,
    },

    /// The operator declined every offered recovery method
    #[error("recovery aborted by operator for {target}")]
    RecoveryAborted {
        /// Endpoint of the target instance
        target: String,
    },

    // ==================== Server ====================
    /// Error reported by the server or the client library
    #[error("server error {code}: {message}")]
    Server {
        /// Server or client error number
        code: u32,
        /// Error message text
        message: String,
    },

    // ==================== Data ====================
    /// Transaction set text could not be parsed
    #[error("invalid transaction set '{input}': {reason}")]
    InvalidTransactionSet {
        /// Offending input
        input: String,
        /// Parse failure detail
        reason: String,
    },

    /// Server version string could not be parsed
    #[error("invalid server version '{0}'")]
    InvalidVersion(String),

    /// A result row lacked an expected column
    #[error("missing column '{0}'")]
    MissingColumn(String),

    /// A column held a value of an unexpected shape
    #[error("unexpected value for column '{column}': {value}")]
    UnexpectedValue {
        /// Column name
        column: String,
        /// Rendered value
        value: String,
    },

    // ==================== System ====================
    /// Configuration could not be loaded or is invalid
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Construct a server error
    pub fn server(code: u32, message: impl Into<String>) -> Self {
        Error::Server {
            code,
            message: message.into(),
        }
    }

    /// Server/client error number, if this is a server error
    pub fn server_code(&self) -> Option<u32> {
        match self {
            Error::Server { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Whether the client-side connection to the server was lost
    ///
    /// Includes the orderly-shutdown error, since the session is gone either way.
    pub fn is_connection_lost(&self) -> bool {
        matches!(
            self.server_code(),
            Some(
                CR_CONN_HOST_ERROR
                    | CR_SERVER_GONE_ERROR
                    | CR_SERVER_LOST
                    | CR_SERVER_LOST_EXTENDED
                    | ER_SERVER_SHUTDOWN
            )
        )
    }

    /// Whether the server reported an orderly shutdown
    pub fn is_server_shutdown(&self) -> bool {
        self.server_code() == Some(ER_SERVER_SHUTDOWN)
    }

    /// Whether this error was raised by the decision engine
    pub fn is_decision_error(&self) -> bool {
        matches!(
            self,
            Error::AmbiguousRecovery { .. }
                | Error::RecoveryImpossible { .. }
                | Error::InvalidRecoveryMethod { .. }
                | Error::RecoveryAborted { .. }
        )
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}
