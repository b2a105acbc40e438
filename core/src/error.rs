//! Error types for continuity operations
//!
//! Only rejected input and unusable configuration surface as errors. An
//! unreachable layer, a silent source or a failed build are recorded as
//! values on the result types instead.

use std::path::PathBuf;
use thiserror::Error;

use crate::config::ConfigError;
use crate::gates::bypass::BypassError;

/// Continuity result type alias
pub type Result<T> = std::result::Result<T, ContinuityError>;

/// Continuity error taxonomy
#[derive(Debug, Error)]
pub enum ContinuityError {
    #[error("Invalid snapshot {session_id}: {reason}")]
    InvalidSnapshot { session_id: String, reason: String },

    #[error("Invalid session id: {0}")]
    InvalidSessionId(String),

    #[error(transparent)]
    Bypass(#[from] BypassError),

    #[error("Unknown gate: {0}")]
    UnknownGate(String),

    #[error("Invalid phase plan: {0}")]
    InvalidPhasePlan(String),

    #[error("Phase {0:?} is not in the phase plan")]
    UnknownPhase(String),

    #[error("Failed to create directory {path}: {source}")]
    DirectoryCreate {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to deserialize JSON: {source}")]
    JsonDeserialize { source: serde_json::Error },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ContinuityError {
    /// True when the caller supplied something that can never succeed as-is.
    pub fn is_rejected_input(&self) -> bool {
        matches!(
            self,
            Self::InvalidSnapshot { .. }
                | Self::InvalidSessionId(_)
                | Self::Bypass(BypassError::Rejected { .. })
                | Self::UnknownGate(_)
                | Self::InvalidPhasePlan(_)
                | Self::UnknownPhase(_)
        )
    }
}
