//! Checkpoints Command
//!
//! Inspect and select stored snapshots.
//!
//! Usage:
//!   papertrail checkpoints list <paper> [-f json]
//!   papertrail checkpoints show <file> [--markdown]
//!   papertrail checkpoints stats
//!   papertrail checkpoints verify <file> <paper>
//!   papertrail checkpoints select <paper> [--latest | --checkpoint FILE]

use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::checkpoint::{Selection, readable, verify_consistency};
use crate::cli::ui::Output;
use crate::cli::util::{CommandContext, format_bytes, require_source};
use crate::types::{PaperError, Result};

/// List resumable snapshots for a source document
pub fn list(ctx: &CommandContext, paper: &Path, format: &str) -> Result<()> {
    let (subject, _) = ctx.subject_for(paper)?;
    let listing = ctx.catalog().list_candidates(&subject)?;

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&listing)?);
        return Ok(());
    }

    let out = Output::new();
    out.header(&format!("Checkpoints for {}", subject));
    if listing.is_empty() {
        out.info("No checkpoints found");
    }
    for (i, entry) in listing.entries.iter().enumerate() {
        out.catalog_entry(i + 1, entry, ctx.config.workflow.num_questions);
    }
    for skipped in &listing.skipped {
        out.warning(&format!(
            "Skipped {}: {}",
            skipped.location.display(),
            skipped.reason
        ));
    }
    Ok(())
}

/// Print one snapshot
pub fn show(ctx: &CommandContext, file: &Path, markdown: bool) -> Result<()> {
    let snapshot = ctx.store.read(file)?;
    if markdown {
        println!("{}", readable::render(&snapshot)?);
        return Ok(());
    }

    let state = snapshot.restore()?;
    let out = Output::new();
    out.header(&format!("Checkpoint {}", file.display()));
    out.field("Subject", &snapshot.subject);
    out.field("Stage", snapshot.stage.describe(state.question_count()));
    out.field("Saved", snapshot.saved_at.format("%Y-%m-%d %H:%M:%S UTC"));
    out.field("Format", snapshot.format_version);
    out.field("Completed", snapshot.completed);
    out.field("Source", &state.paper_path);
    out.field("Messages", snapshot.counts.messages);
    out.field("Answers", snapshot.counts.qa_pairs);
    out.field("Verifications", snapshot.counts.verification_results);
    if !state.selected_questions.is_empty() {
        out.section("Questions");
        for (i, q) in state.selected_questions.iter().enumerate() {
            println!("  {}. {}", i + 1, q);
        }
    }
    Ok(())
}

/// Store-wide statistics
pub fn stats(ctx: &CommandContext) -> Result<()> {
    let stats = ctx.store.stats()?;
    let out = Output::new();

    out.header("Checkpoint Store");
    out.field("Location", ctx.store.root().display());
    out.field("Files", stats.total_files);
    out.field("Size", format_bytes(stats.total_bytes));
    if let (Some(oldest), Some(newest)) = (stats.oldest, stats.newest) {
        out.field("Oldest", oldest.format("%Y-%m-%d %H:%M"));
        out.field("Newest", newest.format("%Y-%m-%d %H:%M"));
    }

    if !stats.subjects.is_empty() {
        out.section("Subjects");
        for (subject, s) in &stats.subjects {
            let latest = s
                .latest
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_default();
            println!(
                "  {:<20} {:>3} files  {:>9}  {} completed  latest {}",
                subject.as_str(),
                s.count,
                format_bytes(s.size_bytes),
                s.completed,
                latest
            );
        }
    }
    Ok(())
}

/// Compare a snapshot with the current source and configuration
pub fn verify(ctx: &CommandContext, file: &Path, paper: &Path) -> Result<()> {
    let snapshot = ctx.store.read(file)?;
    let report = verify_consistency(&snapshot, paper, &ctx.config);
    let out = Output::new();

    if report.is_consistent() {
        out.success("Checkpoint matches the current source and configuration");
    } else {
        out.warning("Checkpoint differs from the current environment:");
        for difference in &report.differences {
            println!("    - {}", difference);
        }
    }
    Ok(())
}

/// Choose the snapshot a session would resume from
///
/// Prints the chosen file, or nothing when starting fresh.
pub fn select(
    ctx: &CommandContext,
    paper: &Path,
    latest: bool,
    checkpoint: Option<PathBuf>,
) -> Result<()> {
    let paper = require_source(paper)?;
    let (subject, _) = ctx.subject_for(&paper)?;
    let catalog = ctx.catalog();
    let out = Output::new();

    let selection = if let Some(path) = checkpoint {
        Selection::Path(path)
    } else if latest {
        Selection::Latest
    } else {
        let listing = catalog.list_candidates(&subject)?;
        if listing.is_empty() {
            out.info("No checkpoints found, starting fresh");
            return Ok(());
        }
        out.header(&format!("{} checkpoints for {}", listing.entries.len(), subject));
        println!("   0. Start fresh");
        for (i, entry) in listing.entries.iter().enumerate() {
            out.catalog_entry(i + 1, entry, ctx.config.workflow.num_questions);
        }
        prompt_choice(listing.entries.len())?
    };

    let Some((location, snapshot)) = catalog.select_with_location(&subject, &selection)? else {
        out.info("Starting fresh");
        return Ok(());
    };

    let report = verify_consistency(&snapshot, &paper, &ctx.config);
    for difference in &report.differences {
        out.warning(&difference.to_string());
    }
    out.success(&format!(
        "Resume from {} ({})",
        location.display(),
        snapshot.stage.describe(ctx.config.workflow.num_questions)
    ));
    Ok(())
}

fn prompt_choice(count: usize) -> Result<Selection> {
    loop {
        print!("Select a checkpoint [0-{}]: ", count);
        std::io::stdout().flush()?;

        let mut input = String::new();
        if let Err(e) = std::io::stdin().read_line(&mut input) {
            warn!("Failed to read user input: {}", e);
            return Ok(Selection::Fresh);
        }
        if input.is_empty() {
            return Ok(Selection::Fresh);
        }
        match parse_choice(&input, count) {
            Ok(selection) => return Ok(selection),
            Err(e) => Output::new().error(&e.to_string()),
        }
    }
}

/// Interpret a typed menu choice; `0` starts fresh
fn parse_choice(input: &str, count: usize) -> Result<Selection> {
    let n: usize = input
        .trim()
        .parse()
        .map_err(|_| PaperError::Session(format!("Enter a number between 0 and {}", count)))?;
    match n {
        0 => Ok(Selection::Fresh),
        n if n <= count => Ok(Selection::Index(n)),
        _ => Err(PaperError::Session(format!(
            "Enter a number between 0 and {}",
            count
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_choice() {
        assert_eq!(parse_choice("0\n", 3).unwrap(), Selection::Fresh);
        assert_eq!(parse_choice(" 2 ", 3).unwrap(), Selection::Index(2));
        assert!(parse_choice("4", 3).is_err());
        assert!(parse_choice("latest", 3).is_err());
    }
}
