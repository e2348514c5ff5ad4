//! Global Constants
//!
//! Centralized constants for configuration and tuning.
//! All magic numbers should be defined here with documentation.

/// Workflow defaults
pub mod workflow {
    /// Number of questions selected for discussion
    pub const DEFAULT_NUM_QUESTIONS: u32 = 3;

    /// Reviewer-requested follow-up answers allowed per question
    pub const DEFAULT_MAX_FOLLOWUPS: u32 = 2;
}

/// Snapshot format and store layout
pub mod checkpoint {
    /// Current snapshot format version
    ///
    /// Increment this when making breaking changes to the snapshot layout.
    pub const FORMAT_VERSION: u32 = 3;

    /// Filename prefix of snapshot records
    pub const FILE_PREFIX: &str = "checkpoint_";

    /// Filename prefix of markdown companions
    pub const READABLE_PREFIX: &str = "readable_";

    /// Timestamp layout embedded in filenames (sorts lexically)
    pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S_%6f";

    /// Default store directory (relative to the working directory)
    pub const DEFAULT_DIR: &str = ".papertrail/checkpoints";

    /// File inside a local subject directory naming its source document
    pub const SOURCE_MARKER: &str = ".source";
}

/// Subject key resolution
pub mod subject {
    /// Characters of source text scanned for an embedded identifier
    pub const CONTENT_SCAN_CHARS: usize = 3000;

    /// Version suffix assumed for identifiers that carry none
    pub const DEFAULT_ARXIV_VERSION: &str = "v1";
}

/// Report output
pub mod output {
    /// Filename prefix of written reports
    pub const REPORT_PREFIX: &str = "paper_analysis_";
}

/// Retention defaults
pub mod retention {
    /// Bytes per mebibyte, used for size ceilings
    pub const BYTES_PER_MB: u64 = 1024 * 1024;

    /// Seconds per day, used for age ceilings
    pub const SECS_PER_DAY: i64 = 86_400;
}
