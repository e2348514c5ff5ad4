//! CLI Common Utilities
//!
//! Shared initialization for command handlers.

use std::path::{Path, PathBuf};

use crate::checkpoint::{Catalog, CheckpointStore, find_subject, next_custom_subject};
use crate::config::{Config, ConfigLoader};
use crate::pipeline::{SourceLoader, TextLoader};
use crate::types::{PaperError, Result, SubjectKey};

/// Command execution context
///
/// Loaded once per command: merged configuration plus the store it names.
pub struct CommandContext {
    pub config: Config,
    pub store: CheckpointStore,
}

impl CommandContext {
    /// Load configuration (with an optional explicit file) and open the store
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let config = ConfigLoader::load_with(config_path)?;
        let store = CheckpointStore::from_config(&config.checkpoint);
        Ok(Self { config, store })
    }

    pub fn catalog(&self) -> Catalog<'_> {
        Catalog::new(&self.store)
    }

    /// Subject key for a source document, without claiming one
    ///
    /// Returns the key and whether it is already associated with the
    /// document. An unknown local document gets the next free key.
    pub fn subject_for(&self, paper: &Path) -> Result<(SubjectKey, bool)> {
        let content = require_source(paper)
            .and_then(|p| TextLoader.load(&p))
            .unwrap_or_default();
        match find_subject(&self.store, paper, &content)? {
            Some(subject) => Ok((subject, true)),
            None => Ok((next_custom_subject(&self.store)?, false)),
        }
    }
}

/// Require the source document to exist
pub fn require_source(paper: &Path) -> Result<PathBuf> {
    if !paper.is_file() {
        return Err(PaperError::Session(format!(
            "Source file not found: {}",
            paper.display()
        )));
    }
    Ok(paper.to_path_buf())
}

/// Render a byte count for humans
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024 + 512 * 1024), "5.5 MB");
    }
}
