use std::io;
use thiserror::Error;

/// Custom error types for the bus worker
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    #[error("Bridge error: {0}")]
    Bridge(String),
}

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Creates a new bridge error
    pub fn bridge(msg: impl Into<String>) -> Self {
        Error::Bridge(msg.into())
    }
}
