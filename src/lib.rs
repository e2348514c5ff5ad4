//! papertrail - Resumable State for Multi-Stage Paper Analysis
//!
//! Accumulates the dialogue of an analyzer/reviewer pipeline across stages
//! and checkpoints it so an interrupted analysis resumes where it stopped.
//!
//! ## Core Features
//!
//! - **Field Policy Registry**: every state field either accumulates or replaces
//! - **State Merger**: one pure merge used by every driver loop
//! - **Versioned Snapshots**: checksummed, upgraded on read, rejected when too new
//! - **Catalog**: newest-first listing that skips damaged records
//! - **Retention**: per-subject, age and store-wide limits with protection rules
//!
//! ## Quick Start
//!
//! ```ignore
//! use papertrail::config::ConfigLoader;
//! use papertrail::pipeline::{PipelineDriver, TextLoader};
//!
//! let config = ConfigLoader::load()?;
//! let driver = PipelineDriver::new(config, Arc::new(my_agent));
//! let mut session = driver.start_fresh(Path::new("2401.00001.pdf"), &TextLoader)?;
//! driver.run(&mut session).await?;
//! ```
//!
//! ## Modules
//!
//! - [`state`]: running state, partial updates, merge policies
//! - [`checkpoint`]: snapshots, store, catalog, retention
//! - [`pipeline`]: stage driver and collaborator traits
//! - [`config`]: layered configuration

pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod constants;
pub mod pipeline;
pub mod state;
pub mod types;

pub use checkpoint::{Catalog, CheckpointStore, Selection, Snapshot, StageMarker};
pub use config::{Config, ConfigLoader};
pub use pipeline::{PaperAgent, PipelineDriver, Session};
pub use state::{MergePolicy, RunningState, StateUpdate, merge, policy_for};
pub use types::{PaperError, Result, SubjectKey};
