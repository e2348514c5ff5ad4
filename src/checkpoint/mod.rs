//! Checkpoint and Resume
//!
//! Durable snapshots of the running state taken at every stage boundary.
//!
//! ```text
//! RunningState ─capture→ Snapshot ─write→ CheckpointStore
//!                                              │
//!                       Catalog ←──── headers ─┘
//!                          │
//!                    select → Snapshot ─restore→ RunningState
//! ```
//!
//! The store only ever adds files; the retention pruner is the single
//! place snapshots are removed.

pub mod catalog;
pub mod consistency;
pub mod legacy;
pub mod readable;
pub mod retention;
pub mod snapshot;
pub mod stage;
pub mod store;
pub mod subject;

// ============================================================================
// Snapshot Exports
// ============================================================================

pub use snapshot::{Snapshot, SnapshotHeader};
pub use stage::StageMarker;

// ============================================================================
// Store / Catalog Exports
// ============================================================================

pub use catalog::{Catalog, CatalogEntry, CatalogListing, ResumeKind, Selection, SkippedEntry};
pub use store::{CheckpointStore, SnapshotName, StoreStats, StoredFile, SubjectStats, companion_path};

// ============================================================================
// Maintenance Exports
// ============================================================================

pub use consistency::{
    ConfigFingerprint, ConsistencyReport, Difference, SourceFingerprint, verify_consistency,
};
pub use retention::{PruneCandidate, PruneReason, PruneReport, RetentionPolicy, RetentionPruner};
pub use subject::{
    arxiv_id_from_content, arxiv_id_from_filename, find_subject, next_custom_subject,
    resolve_subject,
};
