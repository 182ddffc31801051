use berkeley_types::MessageError;
use thiserror::Error;

/// Transport-level failures. None of these are fatal to a running
/// coordinator; only [`NetworkError::Bind`] stops startup.
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Failed to bind listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to connect to coordinator at {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Message error: {0}")]
    Message(#[from] MessageError),
}
