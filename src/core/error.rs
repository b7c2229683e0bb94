use std::io;
use thiserror::Error;

/// Custom error types for the slotted collection protocol
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Radio error: {0}")]
    Radio(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Topology error: {0}")]
    Topology(String),

    #[error("Bootstrap failed: {0}")]
    Bootstrap(String),

    #[error("Desynchronized: {0}")]
    Desync(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Creates a new protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Error::Protocol(msg.into())
    }

    /// Creates a new radio error
    pub fn radio(msg: impl Into<String>) -> Self {
        Error::Radio(msg.into())
    }

    /// Creates a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Creates a new topology error
    pub fn topology(msg: impl Into<String>) -> Self {
        Error::Topology(msg.into())
    }

    /// Creates a new bootstrap error
    pub fn bootstrap(msg: impl Into<String>) -> Self {
        Error::Bootstrap(msg.into())
    }

    /// Creates a new desynchronization error
    pub fn desync(msg: impl Into<String>) -> Self {
        Error::Desync(msg.into())
    }

    /// Creates a new invalid state error
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Error::InvalidState(msg.into())
    }

    /// Whether this error ends the node's participation in the network
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Bootstrap(_) | Error::Desync(_) | Error::Radio(_) | Error::Io(_)
        )
    }
}
