use std::io;

use serde::{Deserialize, Serialize};
use serde_json::Error as JsonError;
use thiserror::Error;
use tokio::sync::mpsc::error::SendError as TokioSendError;

use crate::{document::Stage, event::AnalysisEvent};

/// Crate-wide error type.
///
/// `Clone` is required: a failed stage computation is cached like a success and the same error
/// value is handed to every caller that observes the failed entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum AnalysisError {
    #[error("{stage} failed for '{id}': {message}")]
    Stage {
        stage: Stage,
        id: String,
        message: String,
    },
    #[error("Unknown document id: {0}")]
    UnknownDocument(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("File System error: {0}")]
    Io(String),
    #[error("(De)Serialization error: {0}")]
    Serialization(String),
    #[error("Custom error: {0}")]
    Custom(String),
}

impl AnalysisError {
    pub fn stage(stage: Stage, id: impl Into<String>, message: impl Into<String>) -> Self {
        AnalysisError::Stage {
            stage,
            id: id.into(),
            message: message.into(),
        }
    }

    pub fn is_stage_failure(&self) -> bool {
        matches!(self, AnalysisError::Stage { .. })
    }
}

impl From<toml::de::Error> for AnalysisError {
    fn from(src: toml::de::Error) -> AnalysisError {
        AnalysisError::Config(format!("Toml deserialization error: {src}"))
    }
}

impl From<toml::ser::Error> for AnalysisError {
    fn from(src: toml::ser::Error) -> AnalysisError {
        AnalysisError::Serialization(format!("Toml serialization error: {src}"))
    }
}

impl From<JsonError> for AnalysisError {
    fn from(src: JsonError) -> AnalysisError {
        AnalysisError::Serialization(format!("JSON (de)serialization error: {src}"))
    }
}

impl From<io::Error> for AnalysisError {
    fn from(x: io::Error) -> Self {
        AnalysisError::Io(format!("IOError ({}): {x}", x.kind()))
    }
}

impl From<TokioSendError<AnalysisEvent>> for AnalysisError {
    fn from(x: TokioSendError<AnalysisEvent>) -> Self {
        AnalysisError::Io(format!(
            "Channel update send Error, could not transmit analysis event {:?}",
            x.0
        ))
    }
}
