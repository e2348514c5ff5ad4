//! Configuration Types
//!
//! All configuration structures with sensible defaults.
//! Supports global (~/.config/papertrail/) and project (.papertrail/) level configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::constants::{checkpoint, workflow};
use crate::types::{PaperError, Result};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Configuration version
    pub version: String,

    /// Model endpoint settings (fingerprinted into snapshots)
    pub llm: LlmConfig,

    /// Question loop settings
    pub workflow: WorkflowConfig,

    /// Snapshot store and retention settings
    pub checkpoint: CheckpointConfig,

    /// Report output settings
    pub output: OutputConfig,

    /// Logging settings
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            llm: LlmConfig::default(),
            workflow: WorkflowConfig::default(),
            checkpoint: CheckpointConfig::default(),
            output: OutputConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Validate configuration values are within acceptable ranges.
    /// Returns `PaperError::Config` on validation failure.
    pub fn validate(&self) -> Result<()> {
        if self.llm.timeout_secs == 0 {
            return Err(PaperError::Config(
                "LLM timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.workflow.num_questions == 0 {
            return Err(PaperError::Config(
                "workflow.num_questions must be greater than 0".to_string(),
            ));
        }

        let cp = &self.checkpoint;
        if let Some(mb) = cp.max_size_mb
            && mb <= 0.0
        {
            return Err(PaperError::Config(format!(
                "checkpoint.max_size_mb must be positive, got {}",
                mb
            )));
        }
        if cp.max_files == Some(0) {
            return Err(PaperError::Config(
                "checkpoint.max_files must be greater than 0".to_string(),
            ));
        }
        if cp.max_age_days == Some(0) {
            return Err(PaperError::Config(
                "checkpoint.max_age_days must be greater than 0".to_string(),
            ));
        }
        if cp.keep_per_subject == Some(0) {
            return Err(PaperError::Config(
                "checkpoint.keep_per_subject must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

// =============================================================================
// LLM Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// API base URL
    pub base_url: String,

    /// Model answering questions
    pub analyzer_model: String,

    /// Model verifying answers and selecting questions
    pub reviewer_model: String,

    /// Upper bound in seconds on each agent call made by the pipeline
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            analyzer_model: "gpt-4".to_string(),
            reviewer_model: "gpt-3.5-turbo".to_string(),
            timeout_secs: 120,
        }
    }
}

// =============================================================================
// Workflow Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Questions selected for discussion
    pub num_questions: u32,

    /// Reviewer-requested follow-up answers per question
    pub max_followups_per_question: u32,

    /// Offer free-form follow-up questions after the report
    pub enable_follow_up: bool,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            num_questions: workflow::DEFAULT_NUM_QUESTIONS,
            max_followups_per_question: workflow::DEFAULT_MAX_FOLLOWUPS,
            enable_follow_up: true,
        }
    }
}

// =============================================================================
// Checkpoint Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    /// Write a snapshot after every stage
    pub enabled: bool,

    /// Store root; one subdirectory per subject
    pub dir: PathBuf,

    /// Write a markdown companion next to each snapshot
    pub readable: bool,

    /// Prune opportunistically when a session starts
    pub auto_cleanup: bool,

    /// Store-wide size ceiling in MiB
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_size_mb: Option<f64>,

    /// Store-wide snapshot count ceiling
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_files: Option<usize>,

    /// Delete snapshots older than this many days
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_age_days: Option<u32>,

    /// Snapshots kept per subject
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_per_subject: Option<usize>,

    /// Never prune snapshots of completed sessions
    pub keep_completed: bool,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: PathBuf::from(checkpoint::DEFAULT_DIR),
            readable: true,
            auto_cleanup: false,
            max_size_mb: None,
            max_files: None,
            max_age_days: None,
            keep_per_subject: None,
            keep_completed: true,
        }
    }
}

// =============================================================================
// Output & Logging
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory receiving final reports
    pub dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("output"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
