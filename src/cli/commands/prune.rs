//! Prune Command
//!
//! Apply the configured retention policy to the checkpoint store.

use crate::checkpoint::{RetentionPolicy, RetentionPruner};
use crate::cli::ui::Output;
use crate::cli::util::{CommandContext, format_bytes};
use crate::types::{Result, SubjectKey};

pub fn run(ctx: &CommandContext, subject: Option<String>, dry_run: bool) -> Result<()> {
    let policy = RetentionPolicy::from_config(&ctx.config.checkpoint);
    let out = Output::new();

    if !policy.is_active() {
        out.info("No retention limits configured (see [checkpoint] in config.toml)");
        return Ok(());
    }

    let scope = subject.map(SubjectKey::from);
    let pruner = RetentionPruner::new(&ctx.store, policy);

    if dry_run {
        let plan = pruner.plan(scope.as_ref())?;
        if plan.is_empty() {
            out.success("Nothing to prune");
            return Ok(());
        }
        out.header(&format!("Would delete {} checkpoints", plan.len()));
        for candidate in &plan {
            println!(
                "  {}  {}  ({})",
                candidate.subject,
                candidate.location.display(),
                candidate.reason
            );
        }
        let bytes: u64 = plan.iter().map(|c| c.size_bytes).sum();
        out.info(&format!("{} would be freed", format_bytes(bytes)));
        return Ok(());
    }

    let report = pruner.prune(scope.as_ref())?;
    if report.deleted == 0 {
        out.success("Nothing to prune");
    } else {
        out.success(&format!(
            "Deleted {} checkpoints, freed {}",
            report.deleted,
            format_bytes(report.freed_bytes)
        ));
    }
    if report.failed > 0 {
        out.warning(&format!("{} checkpoints could not be deleted", report.failed));
    }
    Ok(())
}
