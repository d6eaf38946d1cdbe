use thiserror::Error;

/// Faults raised by command handlers.
///
/// Everything except [`StageError::UnknownTool`] is absorbed by the dispatcher and
/// reported as a `false` result plus one warning.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("no entity with id '{0}'")]
    NotFound(String),
    #[error("malformed payload: {0}")]
    Malformed(String),
    #[error("unsupported {kind} '{value}'")]
    Unsupported { kind: &'static str, value: String },
    #[error("unknown tool '{0}'")]
    UnknownTool(String),
    #[error("no handler registered for action '{0}'")]
    UnknownAction(String),
    #[error("entity '{id}' already exists")]
    Duplicate { id: String },
    #[error("asset load failed for '{uri}': {reason}")]
    Load { uri: String, reason: String },
    #[error("media generation failed: {0}")]
    Media(String),
}

impl StageError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        StageError::Malformed(reason.into())
    }

    pub fn unsupported(kind: &'static str, value: impl Into<String>) -> Self {
        StageError::Unsupported { kind, value: value.into() }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, StageError::UnknownTool(_))
    }
}

pub type StageResult<T> = std::result::Result<T, StageError>;
