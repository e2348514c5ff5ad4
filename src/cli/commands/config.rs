//! Config Command
//!
//! Usage:
//!   papertrail config show [-g] [-f json|yaml|toml]
//!   papertrail config path
//!   papertrail config init [-g] [--force]

use crate::cli::ui::Output;
use crate::cli::util::CommandContext;
use crate::config::ConfigLoader;
use crate::types::Result;

/// Print the effective configuration, or only the global file with `-g`
pub fn show(ctx: &CommandContext, global: bool, format: &str) -> Result<()> {
    if !global {
        println!("{}", ConfigLoader::render(&ctx.config, format)?);
        return Ok(());
    }

    let out = Output::new();
    match ConfigLoader::global_config_path() {
        Some(path) if path.exists() => {
            let config = ConfigLoader::load_from_file(&path)?;
            out.info(&format!("Global config: {}", path.display()));
            println!("{}", ConfigLoader::render(&config, format)?);
        }
        Some(_) => {
            out.warning("No global config found");
            out.info("Run 'papertrail config init --global' to create one");
        }
        None => out.error("Cannot determine global config directory"),
    }
    Ok(())
}

pub fn path(ctx: &CommandContext) -> Result<()> {
    ConfigLoader::show_path(&ctx.config);
    Ok(())
}

pub fn init_global(force: bool) -> Result<()> {
    let dir = ConfigLoader::init_global(force)?;
    let out = Output::new();
    out.success("Global configuration ready");
    out.field("Directory", dir.display());
    if let Some(path) = ConfigLoader::global_config_path() {
        out.field("Config", path.display());
    }
    Ok(())
}

pub fn init_project(force: bool) -> Result<()> {
    let dir = ConfigLoader::init_project(force)?;
    let out = Output::new();
    out.success("Project configuration ready");
    out.field("Directory", dir.display());
    out.field("Config", ConfigLoader::project_config_path().display());
    out.field("Checkpoints", dir.join("checkpoints").display());
    Ok(())
}
