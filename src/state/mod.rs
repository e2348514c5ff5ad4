//! Pipeline State
//!
//! Running state, partial updates and the rules that fold one into the
//! other.
//!
//! ## Components
//!
//! - [`policy`]: Field Policy Registry (accumulate vs replace, defaults)
//! - [`running`]: the typed running state and its snapshot body form
//! - [`update`]: partial updates emitted by pipeline stages
//! - [`merge`]: the State Merger

pub mod merge;
pub mod policy;
pub mod running;
pub mod update;

pub use merge::{merge, merge_all};
pub use policy::{MergePolicy, StateField, default_value, policy_for};
pub use running::{HistoryCounts, RunningState};
pub use update::StateUpdate;
