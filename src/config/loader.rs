//! Configuration Loader (Figment-based)
//!
//! Loads and merges configuration from multiple sources using Figment:
//! 1. Built-in defaults (Serialized)
//! 2. Global config (~/.config/papertrail/config.toml)
//! 3. Project config (.papertrail/config.toml, or an explicit --config path)
//! 4. Environment variables (PAPERTRAIL_* prefix, `__` between sections)

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use tracing::{debug, info};

use super::types::Config;
use crate::types::{PaperError, Result};

/// Project data directory name
pub const PROJECT_DIR: &str = ".papertrail";

/// Config file name inside global and project directories
pub const CONFIG_FILE: &str = "config.toml";

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with full resolution chain using Figment:
    /// defaults → global → project → env vars
    pub fn load() -> Result<Config> {
        Self::load_with(None)
    }

    /// Same as [`ConfigLoader::load`], with an explicit project config file
    pub fn load_with(project_override: Option<&Path>) -> Result<Config> {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        // Merge global config
        if let Some(global_path) = Self::global_config_path()
            && global_path.exists()
        {
            debug!("Loading global config from: {}", global_path.display());
            figment = figment.merge(Toml::file(&global_path));
        }

        // Merge project config
        let project_path = project_override
            .map(Path::to_path_buf)
            .unwrap_or_else(Self::project_config_path);
        if project_path.exists() {
            debug!("Loading project config from: {}", project_path.display());
            figment = figment.merge(Toml::file(&project_path));
        } else if project_override.is_some() {
            return Err(PaperError::Config(format!(
                "Config file not found: {}",
                project_path.display()
            )));
        }

        // Merge environment variables (e.g., PAPERTRAIL_CHECKPOINT__MAX_FILES -> checkpoint.max_files)
        figment = figment.merge(Env::prefixed("PAPERTRAIL_").split("__").lowercase(true));

        let config: Config = figment
            .extract()
            .map_err(|e| PaperError::Config(format!("Configuration error: {}", e)))?;

        // Validate configuration after loading
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a specific file only
    pub fn load_from_file(path: &Path) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .extract()
            .map_err(|e| PaperError::Config(format!("Configuration error: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    // =========================================================================
    // Path Management
    // =========================================================================

    /// Get path to global config directory (~/.config/papertrail/)
    pub fn global_dir() -> Option<PathBuf> {
        env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                env::var("HOME")
                    .ok()
                    .map(|home| PathBuf::from(home).join(".config"))
            })
            .map(|p| p.join("papertrail"))
            .or_else(|| {
                ProjectDirs::from("", "", "papertrail").map(|dirs| dirs.config_dir().to_path_buf())
            })
    }

    /// Get path to global config file
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_dir().map(|dir| dir.join(CONFIG_FILE))
    }

    /// Get path to project config file
    pub fn project_config_path() -> PathBuf {
        Self::project_dir().join(CONFIG_FILE)
    }

    /// Get project data directory
    pub fn project_dir() -> PathBuf {
        PathBuf::from(PROJECT_DIR)
    }

    // =========================================================================
    // Config Commands
    // =========================================================================

    /// Show config file paths
    pub fn show_path(config: &Config) {
        println!("Configuration paths:");
        println!();

        // Global config
        if let Some(global) = Self::global_config_path() {
            let exists = if global.exists() { "✓" } else { "✗" };
            println!("  Global:      {} {}", exists, global.display());
        } else {
            println!("  Global:      (not available)");
        }

        // Project config
        let project = Self::project_config_path();
        let exists = if project.exists() { "✓" } else { "✗" };
        println!("  Project:     {} {}", exists, project.display());

        // Snapshot store
        let store = &config.checkpoint.dir;
        let exists = if store.exists() { "✓" } else { "✗" };
        println!("  Checkpoints: {} {}", exists, store.display());
    }

    /// Render a configuration as text (TOML), JSON or YAML
    pub fn render(config: &Config, format: &str) -> Result<String> {
        match format {
            "json" => Ok(serde_json::to_string_pretty(config)?),
            "yaml" => Ok(serde_yaml::to_string(config)?),
            _ => toml::to_string_pretty(config).map_err(|e| PaperError::Config(e.to_string())),
        }
    }

    // =========================================================================
    // Initialization
    // =========================================================================

    /// Initialize global configuration
    pub fn init_global(force: bool) -> Result<PathBuf> {
        let global_dir = Self::global_dir().ok_or_else(|| {
            PaperError::Config("Cannot determine global config directory".to_string())
        })?;

        fs::create_dir_all(&global_dir)?;

        let config_path = global_dir.join(CONFIG_FILE);
        if !config_path.exists() || force {
            fs::write(&config_path, Self::default_global_config())?;
            info!("Created global config: {}", config_path.display());
        } else {
            info!("Global config exists: {}", config_path.display());
        }

        Ok(global_dir)
    }

    /// Initialize project configuration in the working directory
    pub fn init_project(force: bool) -> Result<PathBuf> {
        Self::init_project_at(&Self::project_dir(), force)
    }

    /// Initialize project configuration in `project_dir`
    pub fn init_project_at(project_dir: &Path, force: bool) -> Result<PathBuf> {
        fs::create_dir_all(project_dir)?;
        fs::create_dir_all(project_dir.join("checkpoints"))?;

        let config_path = project_dir.join(CONFIG_FILE);
        if !config_path.exists() || force {
            fs::write(&config_path, Self::default_project_config())?;
            info!("Created project config: {}", config_path.display());
        }

        Ok(project_dir.to_path_buf())
    }

    /// Check if project is initialized
    pub fn is_project_initialized() -> bool {
        Self::project_dir().exists()
    }

    // =========================================================================
    // Internal
    // =========================================================================

    /// Generate default global config content (TOML)
    fn default_global_config() -> String {
        r#"# papertrail Global Configuration
# User-wide defaults. Project settings in .papertrail/config.toml override these.

version = "1.0"

# Model endpoints (recorded in snapshots for consistency checks)
[llm]
base_url = "https://api.openai.com/v1"
analyzer_model = "gpt-4"
reviewer_model = "gpt-3.5-turbo"
# Upper bound on each agent call
timeout_secs = 120

[logging]
level = "info"
"#
        .to_string()
    }

    /// Generate default project config content (TOML)
    fn default_project_config() -> String {
        r#"# papertrail Project Configuration
# Project-specific settings that override global defaults.

version = "1.0"

[workflow]
num_questions = 3
max_followups_per_question = 2
enable_follow_up = true

# Snapshot store and retention
[checkpoint]
enabled = true
dir = ".papertrail/checkpoints"
readable = true
auto_cleanup = false
keep_completed = true
# keep_per_subject = 5
# max_age_days = 30
# max_files = 200
# max_size_mb = 500.0

[output]
dir = "output"
"#
        .to_string()
    }
}
