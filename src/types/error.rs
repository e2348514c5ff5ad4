//! Unified Error Type System
//!
//! Centralized error types for the entire application.
//!
//! - [`PaperError`] is the single library error
//! - [`CheckpointError`] describes why a snapshot record could not be trusted
//!
//! Library code propagates these with `?`; the binary converts them to
//! `anyhow::Error` at the top level.

use std::path::PathBuf;

use thiserror::Error;

// =============================================================================
// Checkpoint Errors
// =============================================================================

/// Snapshot validation errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CheckpointError {
    /// Snapshot format is newer than this build understands
    #[error("Checkpoint format version {found} is newer than supported version {supported}")]
    VersionUnsupported { found: u32, supported: u32 },

    /// Body does not hash to the recorded checksum
    #[error("Checkpoint corrupted: checksum mismatch (expected {expected}, got {computed})")]
    ChecksumMismatch { expected: u32, computed: u32 },

    /// A required header field is absent
    #[error("Checkpoint is missing required header field '{0}'")]
    MissingHeader(&'static str),

    #[error("Malformed checkpoint: {0}")]
    Malformed(String),

    #[error("Invalid stage marker: {0}")]
    InvalidStage(String),

    #[error("Checkpoint not found: {}", .0.display())]
    NotFound(PathBuf),
}

impl CheckpointError {
    /// Whether the record is damaged (as opposed to merely unsupported)
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::ChecksumMismatch { .. } | Self::MissingHeader(_) | Self::Malformed(_)
        )
    }
}

// =============================================================================
// Main Error Type
// =============================================================================

#[derive(Error, Debug)]
pub enum PaperError {
    // -------------------------------------------------------------------------
    // System Errors (auto From impl)
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // -------------------------------------------------------------------------
    // State Errors
    // -------------------------------------------------------------------------
    /// An update value does not fit the field it names
    #[error("Invalid update for field '{field}': {reason}")]
    InvalidUpdate { field: String, reason: String },

    /// A sequenced update was already applied
    #[error("Duplicate update: sequence {sequence} is not newer than {last_applied}")]
    DuplicateUpdate { sequence: u64, last_applied: u64 },

    // -------------------------------------------------------------------------
    // Checkpoint Errors
    // -------------------------------------------------------------------------
    #[error("{0}")]
    Checkpoint(#[from] CheckpointError),

    // -------------------------------------------------------------------------
    // Pipeline Errors
    // -------------------------------------------------------------------------
    /// A pipeline stage failed; nothing was merged or written for it
    #[error("Stage {stage} failed: {message}")]
    Stage { stage: String, message: String },

    #[error("Agent error: {0}")]
    Agent(String),

    // -------------------------------------------------------------------------
    // Domain Errors
    // -------------------------------------------------------------------------
    #[error("Session error: {0}")]
    Session(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

pub type Result<T> = std::result::Result<T, PaperError>;

// =============================================================================
// Helper Functions
// =============================================================================

impl PaperError {
    /// Create an invalid-update error
    pub fn invalid_update(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUpdate {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a stage failure error
    pub fn stage(stage: impl ToString, message: impl Into<String>) -> Self {
        Self::Stage {
            stage: stage.to_string(),
            message: message.into(),
        }
    }

    /// Check if this error means "the record is unusable, try an older one"
    pub fn is_corrupt_checkpoint(&self) -> bool {
        match self {
            Self::Checkpoint(e) => e.is_corruption(),
            Self::Json(_) => true,
            _ => false,
        }
    }
}

/// Context extension trait for adding context to errors
pub trait ResultExt<T> {
    /// Add context to an error
    fn with_context<C: Into<String>>(self, context: C) -> Result<T>;

    /// Add context using a closure (lazy evaluation)
    fn with_context_fn<F, C>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>;
}

impl<T, E: std::error::Error + Send + Sync + 'static> ResultExt<T> for std::result::Result<T, E> {
    fn with_context<C: Into<String>>(self, context: C) -> Result<T> {
        self.map_err(|e| PaperError::Storage(format!("{}: {}", context.into(), e)))
    }

    fn with_context_fn<F, C>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>,
    {
        self.map_err(|e| PaperError::Storage(format!("{}: {}", f().into(), e)))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoint_error_display() {
        let err = CheckpointError::VersionUnsupported {
            found: 9,
            supported: 3,
        };
        assert_eq!(
            err.to_string(),
            "Checkpoint format version 9 is newer than supported version 3"
        );
    }

    #[test]
    fn test_corruption_classification() {
        assert!(CheckpointError::MissingHeader("stage").is_corruption());
        assert!(
            CheckpointError::ChecksumMismatch {
                expected: 1,
                computed: 2
            }
            .is_corruption()
        );
        assert!(
            !CheckpointError::VersionUnsupported {
                found: 4,
                supported: 3
            }
            .is_corruption()
        );

        let parse_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(PaperError::from(parse_err).is_corrupt_checkpoint());
        assert!(!PaperError::Config("x".into()).is_corrupt_checkpoint());
    }

    #[test]
    fn test_with_context() {
        let res: std::result::Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "denied",
        ));
        let err = res.with_context("writing snapshot").unwrap_err();
        assert!(matches!(err, PaperError::Storage(ref m) if m.starts_with("writing snapshot")));
    }

    #[test]
    fn test_stage_error_display() {
        let err = PaperError::stage("q2a0", "empty answer");
        assert_eq!(err.to_string(), "Stage q2a0 failed: empty answer");
    }
}
