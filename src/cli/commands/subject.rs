//! Subject Command
//!
//! Show which subject key a source document resolves to.

use std::path::Path;

use crate::checkpoint::{arxiv_id_from_content, arxiv_id_from_filename};
use crate::cli::ui::Output;
use crate::cli::util::{CommandContext, require_source};
use crate::pipeline::{SourceLoader, TextLoader};
use crate::types::Result;

pub fn run(ctx: &CommandContext, paper: &Path) -> Result<()> {
    let paper = require_source(paper)?;
    let (subject, known) = ctx.subject_for(&paper)?;
    let out = Output::new();

    let origin = if arxiv_id_from_filename(&paper).is_some() {
        "arXiv identifier in file name"
    } else if TextLoader
        .load(&paper)
        .ok()
        .and_then(|text| arxiv_id_from_content(&text))
        .is_some()
    {
        "arXiv identifier in document text"
    } else if known {
        "local sequential key"
    } else {
        "next free local key (assigned on first run)"
    };

    out.field("Subject", &subject);
    out.field("Origin", origin);
    out.field("Directory", ctx.store.subject_dir(&subject).display());
    Ok(())
}
