//! Stage Collaborators
//!
//! The driver never talks to a model. Each stage is delegated to a
//! [`PaperAgent`] that returns a partial update naming only registered
//! fields; source text comes from a [`SourceLoader`].

use std::fs;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::state::{RunningState, StateUpdate};
use crate::types::{PaperError, Result};

/// One answer turn in the question loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    /// 1-based question number
    pub question_id: u32,
    /// 0 for the initial answer, then one per reviewer follow-up
    pub attempt: u32,
    pub round: u32,
    pub question: String,
    /// Reviewer follow-up being answered, when `attempt > 0`
    pub followup: Option<String>,
}

/// Executes pipeline stages
///
/// Implementations read the running state and return what the stage
/// contributed. Appending to history is expressed by including the new
/// elements only; the merger extends the running sequences.
#[async_trait]
pub trait PaperAgent: Send + Sync {
    /// Outline of the document
    async fn analyze_structure(&self, state: &RunningState) -> Result<StateUpdate>;

    /// Questions to work through (`selected_questions`)
    async fn select_questions(&self, state: &RunningState) -> Result<StateUpdate>;

    async fn answer_question(&self, state: &RunningState, turn: &Turn) -> Result<StateUpdate>;

    /// Reviewer verdict on `answer`, including whether a follow-up is needed
    async fn verify_answer(
        &self,
        state: &RunningState,
        turn: &Turn,
        answer: &str,
    ) -> Result<StateUpdate>;

    /// Final report from the accumulated dialogue
    async fn integrate_report(&self, state: &RunningState) -> Result<StateUpdate>;

    /// Free-form answer after completion; never mutates the session
    async fn answer_follow_up(&self, state: &RunningState, question: &str) -> Result<String>;
}

pub type SharedAgent = Arc<dyn PaperAgent>;

/// Extracts text from a source document
pub trait SourceLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<String>;
}

/// Reads the source as UTF-8 text, replacing invalid sequences
#[derive(Debug, Clone, Copy, Default)]
pub struct TextLoader;

impl SourceLoader for TextLoader {
    fn load(&self, path: &Path) -> Result<String> {
        let bytes = fs::read(path)
            .map_err(|e| PaperError::Session(format!("Cannot read {}: {}", path.display(), e)))?;
        let text = String::from_utf8_lossy(&bytes).into_owned();
        if text.trim().is_empty() {
            return Err(PaperError::Session(format!(
                "{} contains no text",
                path.display()
            )));
        }
        Ok(text)
    }
}
