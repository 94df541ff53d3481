//! Error types for dnsupdater
//!
//! Every updater reports failures through [`Error`]. Updater-local failures
//! carry the identity of the updater that raised them so that a failure
//! surfacing through several layers of indirection still says where it
//! happened.

use thiserror::Error;

/// Result type alias for dnsupdater operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for dnsupdater
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed target, missing domain, too few path segments
    #[error("{0}")]
    Validation(String),

    /// Unregistered protocol tag or a disallowed self-loop indirection
    #[error("Unsupported protocol: {0}")]
    UnsupportedProtocol(String),

    /// Request authentication failed
    ///
    /// The message is for logs only and is never sent back to a client.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Network, IO or TLS failure while talking to a remote end
    #[error("{updater}: {message}")]
    Transport {
        /// Updater that raised the error
        updater: String,
        /// Error message
        message: String,
    },

    /// The remote end reported a failure
    #[error("{updater}: {message}")]
    Remote {
        /// Updater that raised the error
        updater: String,
        /// Message reported by the remote end
        message: String,
    },

    /// A bounded wait expired
    #[error("{updater}: {message}")]
    Timeout {
        /// Updater that raised the error
        updater: String,
        /// Error message
        message: String,
    },

    /// The operation was interrupted while waiting
    #[error("Cancelled!")]
    Cancelled,

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors outside of an updater transport
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create an unsupported protocol error
    pub fn unsupported(protocol: impl Into<String>) -> Self {
        Self::UnsupportedProtocol(protocol.into())
    }

    /// Create an authentication error
    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    /// Create a transport error tagged with the updater name
    pub fn transport(updater: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            updater: updater.into(),
            message: message.into(),
        }
    }

    /// Create a remote error tagged with the updater name
    pub fn remote(updater: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Remote {
            updater: updater.into(),
            message: message.into(),
        }
    }

    /// Create a timeout error tagged with the updater name
    pub fn timeout(updater: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Timeout {
            updater: updater.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether this is a failure of the update itself rather than of the process
    ///
    /// The inbound HTTP handler answers these with `400` and the message;
    /// everything else is an internal error.
    pub fn is_update_failure(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::UnsupportedProtocol(_)
                | Self::Transport { .. }
                | Self::Remote { .. }
                | Self::Timeout { .. }
                | Self::Cancelled
        )
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
