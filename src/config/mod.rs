//! Configuration Management
//!
//! Unified configuration system with hierarchical resolution:
//! 1. Built-in defaults
//! 2. Global config (~/.config/papertrail/config.toml)
//! 3. Project config (.papertrail/config.toml)
//! 4. Environment variables (PAPERTRAIL_*)
//! 5. CLI arguments (highest priority)

mod loader;
mod types;

pub use loader::{CONFIG_FILE, ConfigLoader, PROJECT_DIR};
pub use types::*;
