use console::style;

use crate::checkpoint::{CatalogEntry, ResumeKind};

pub struct Output;

impl Output {
    pub fn new() -> Self {
        Self
    }

    pub fn success(&self, message: &str) {
        println!("{} {}", style("✓").green(), message);
    }

    pub fn error(&self, message: &str) {
        eprintln!("{} {}", style("✗").red(), message);
    }

    pub fn warning(&self, message: &str) {
        println!("{} {}", style("⚠").yellow(), message);
    }

    pub fn info(&self, message: &str) {
        println!("{} {}", style("ℹ").blue(), message);
    }

    pub fn header(&self, message: &str) {
        println!("\n{}", style(message).bold().underlined());
    }

    pub fn section(&self, message: &str) {
        println!("\n{}", style(message).bold());
        println!("{}", "─".repeat(40));
    }

    /// Aligned `label: value` line
    pub fn field(&self, label: &str, value: impl std::fmt::Display) {
        println!("  {:<14} {}", style(format!("{}:", label)).dim(), value);
    }

    /// One numbered catalog line, completed sessions marked distinctly
    pub fn catalog_entry(&self, index: usize, entry: &CatalogEntry, total_questions: u32) {
        let marker = match entry.resume_kind() {
            ResumeKind::FollowUp => style("●").green(),
            ResumeKind::Continue => style("○").yellow(),
        };
        println!(
            "  {} {:>2}. {}  {}",
            marker,
            index,
            style(entry.saved_at.format("%Y-%m-%d %H:%M:%S")).dim(),
            entry.stage.describe(total_questions)
        );
        println!(
            "        {} messages, {} answers  {}",
            entry.counts.messages,
            entry.counts.qa_pairs,
            style(entry.file_name()).dim()
        );
    }
}

impl Default for Output {
    fn default() -> Self {
        Self::new()
    }
}
