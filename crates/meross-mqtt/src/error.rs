//! Transport-level error type for the MQTT channel and LAN sender.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("publish error: {0}")]
    Publish(String),

    #[error("subscribe error: {0}")]
    Subscribe(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("http error: {0}")]
    Http(String),

    #[error("encryption error: {0}")]
    Encryption(String),

    #[error("{0}")]
    Other(String),
}

pub type TransportResult<T> = Result<T, TransportError>;
