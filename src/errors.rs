//! Errors for the flight-state engine
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EramError {
    #[error("MQTT connection failed")]
    MqttConnectionError(#[from] rumqttc::ConnectionError),

    #[error("MQTT client error")]
    MqttClientError(#[from] rumqttc::ClientError),

    #[error("Serialization error")]
    SerdeError(#[from] serde_json::Error),

    #[error("Configuration error")]
    ConfigError(#[from] config::ConfigError),

    #[error("IO error")]
    IoError(#[from] std::io::Error),

    #[error("Message channel closed")]
    ChannelClosed,

    #[error("Invalid configuration: {message}")]
    ConfigurationError { message: String },
}

/// Failure to decode a feed payload.
///
/// Envelope errors abort the whole payload; record errors are scoped to
/// one flight record and the rest of the envelope is still applied.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("malformed envelope: {reason}")]
    Envelope { reason: String, payload: String },

    #[error("malformed record #{index} ({}): {reason}", .guid.as_deref().unwrap_or("no guid"))]
    Record {
        index: usize,
        guid: Option<String>,
        reason: String,
    },
}

impl ParseError {
    /// Raw payload carried by an envelope failure
    pub fn payload(&self) -> Option<&str> {
        match self {
            ParseError::Envelope { payload, .. } => Some(payload),
            ParseError::Record { .. } => None,
        }
    }
}

/// Operator command failure, rendered verbatim as feedback text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("empty input")]
    EmptyInput,

    #[error("{0} FORMAT")]
    Format(String),

    #[error("{0} NOT FOUND")]
    UnknownFlid(String),

    #[error("{0} ILLEGAL POSITION")]
    InvalidPosition(char),
}
