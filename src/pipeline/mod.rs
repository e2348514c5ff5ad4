//! Analysis Pipeline
//!
//! Drives one session stage by stage, merging each stage's partial update
//! into the running state and checkpointing after every boundary.

pub mod agent;
pub mod driver;

pub use agent::{PaperAgent, SharedAgent, SourceLoader, TextLoader, Turn};
pub use driver::{FollowUpExchange, PipelineDriver, Session};
