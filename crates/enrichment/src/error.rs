use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use crate::secrets::SecretError;

#[derive(Error, Debug)]
pub enum EnrichmentError {
    /// Transport or HTTP failure without a structured backend message.
    #[error("{message}")]
    Network {
        message: String,
        status: Option<u16>,
    },

    /// Non-2xx response carrying a `detail` message from the backend.
    #[error("{0}")]
    BackendRejected(String),

    /// The referenced job or export does not exist.
    #[error("{0}")]
    NotFound(String),

    /// The progress channel dropped or could not be opened.
    #[error("Progress stream lost: {0}")]
    StreamTransport(String),

    /// A single progress message could not be parsed.
    #[error("Malformed progress event: {source}")]
    MalformedEvent {
        payload: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl EnrichmentError {
    pub fn network(message: impl Into<String>) -> Self {
        EnrichmentError::Network {
            message: message.into(),
            status: None,
        }
    }

    /// Message suitable for showing to a person.
    pub fn user_message(&self) -> String {
        match self {
            EnrichmentError::Network { message, .. } => message.clone(),
            EnrichmentError::BackendRejected(detail) => detail.clone(),
            EnrichmentError::NotFound(message) => message.clone(),
            EnrichmentError::StreamTransport(_) => {
                "Lost connection to the enrichment progress stream".to_string()
            }
            EnrichmentError::MalformedEvent { .. } => {
                "Received an unreadable progress update".to_string()
            }
            EnrichmentError::Config(e) => e.to_string(),
        }
    }

    /// HTTP status code, when the error came from a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            EnrichmentError::Network { status, .. } => *status,
            EnrichmentError::NotFound(_) => Some(404),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, EnrichmentError::NotFound(_))
    }

    /// Recovers an owned error from one shared by the request cache.
    pub(crate) fn from_shared(shared: Arc<EnrichmentError>) -> Self {
        match Arc::try_unwrap(shared) {
            Ok(err) => err,
            Err(shared) => match shared.as_ref() {
                EnrichmentError::Network { message, status } => EnrichmentError::Network {
                    message: message.clone(),
                    status: *status,
                },
                EnrichmentError::BackendRejected(d) => EnrichmentError::BackendRejected(d.clone()),
                EnrichmentError::NotFound(m) => EnrichmentError::NotFound(m.clone()),
                EnrichmentError::StreamTransport(m) => EnrichmentError::StreamTransport(m.clone()),
                other => EnrichmentError::network(other.to_string()),
            },
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },

    #[error("API token could not be resolved: {0}")]
    Secret(#[from] SecretError),
}

pub type Result<T> = std::result::Result<T, EnrichmentError>;
