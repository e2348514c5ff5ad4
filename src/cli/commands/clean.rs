//! Clean Command
//!
//! Removes every stored checkpoint.

use crate::cli::ui::Output;
use crate::cli::util::{CommandContext, format_bytes};
use crate::types::Result;

pub async fn run(ctx: &CommandContext, yes: bool) -> Result<()> {
    let out = Output::new();
    let root = ctx.store.root();

    if !tokio::fs::try_exists(root).await.unwrap_or(false) {
        out.info("No checkpoints to remove");
        return Ok(());
    }

    // Show what will be deleted
    let stats = ctx.store.stats()?;
    if stats.total_files > 0 {
        println!(
            "  Checkpoints: {} files across {} subjects, {}",
            stats.total_files,
            stats.subjects.len(),
            format_bytes(stats.total_bytes)
        );
    }

    if !yes {
        out.warning(&format!(
            "This removes {}. Re-run with --yes to confirm.",
            root.display()
        ));
        return Ok(());
    }

    tokio::fs::remove_dir_all(root).await?;
    tokio::fs::create_dir_all(root).await?;
    out.success(&format!("Cleared {}", root.display()));
    Ok(())
}
