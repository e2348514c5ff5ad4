//! Retention Pruner
//!
//! Best-effort maintenance of the checkpoint store. Rules apply in this
//! order:
//!
//! 1. the newest snapshot of every subject is kept
//! 2. completed snapshots are kept when `keep_completed` is set
//! 3. `keep_per_subject` drops the oldest unprotected snapshots
//! 4. `max_age_days` drops unprotected snapshots past the age limit
//! 5. `max_files` / `max_size_mb` drop the oldest unprotected snapshots
//!    in scope until the whole store is under both ceilings
//!
//! Failures on individual files are logged and skipped.

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::store::CheckpointStore;
use crate::config::CheckpointConfig;
use crate::constants::retention::{BYTES_PER_MB, SECS_PER_DAY};
use crate::types::{Result, SubjectKey};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetentionPolicy {
    pub max_size_bytes: Option<u64>,
    pub max_files: Option<usize>,
    pub max_age_days: Option<u32>,
    pub keep_per_subject: Option<usize>,
    pub keep_completed: bool,
}

impl RetentionPolicy {
    pub fn from_config(config: &CheckpointConfig) -> Self {
        Self {
            max_size_bytes: config
                .max_size_mb
                .map(|mb| (mb * BYTES_PER_MB as f64) as u64),
            max_files: config.max_files,
            max_age_days: config.max_age_days,
            keep_per_subject: config.keep_per_subject,
            keep_completed: config.keep_completed,
        }
    }

    /// Whether any rule can delete anything
    pub fn is_active(&self) -> bool {
        self.max_size_bytes.is_some()
            || self.max_files.is_some()
            || self.max_age_days.is_some()
            || self.keep_per_subject.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PruneReason {
    PerSubjectLimit,
    Expired,
    StoreCeiling,
}

impl fmt::Display for PruneReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::PerSubjectLimit => "per-subject limit",
            Self::Expired => "expired",
            Self::StoreCeiling => "store ceiling",
        })
    }
}

/// A snapshot scheduled for deletion
#[derive(Debug, Clone, Serialize)]
pub struct PruneCandidate {
    pub location: PathBuf,
    pub subject: SubjectKey,
    pub saved_at: DateTime<Utc>,
    pub size_bytes: u64,
    pub reason: PruneReason,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PruneReport {
    pub deleted: usize,
    pub freed_bytes: u64,
    pub failed: usize,
    pub details: Vec<PruneCandidate>,
}

struct Tracked {
    location: PathBuf,
    subject: SubjectKey,
    saved_at: DateTime<Utc>,
    size_bytes: u64,
    protected: bool,
    in_scope: bool,
}

impl Tracked {
    fn into_candidate(self, reason: PruneReason) -> PruneCandidate {
        PruneCandidate {
            location: self.location,
            subject: self.subject,
            saved_at: self.saved_at,
            size_bytes: self.size_bytes,
            reason,
        }
    }
}

pub struct RetentionPruner<'a> {
    store: &'a CheckpointStore,
    policy: RetentionPolicy,
}

impl<'a> RetentionPruner<'a> {
    pub fn new(store: &'a CheckpointStore, policy: RetentionPolicy) -> Self {
        Self { store, policy }
    }

    /// Snapshots `prune` would delete, without deleting anything
    pub fn plan(&self, scope: Option<&SubjectKey>) -> Result<Vec<PruneCandidate>> {
        self.plan_at(scope, Utc::now())
    }

    /// Delete what the policy allows in `scope` (every subject when `None`)
    pub fn prune(&self, scope: Option<&SubjectKey>) -> Result<PruneReport> {
        let mut report = PruneReport::default();

        for candidate in self.plan(scope)? {
            match self.store.remove(&candidate.location) {
                Ok(freed) => {
                    debug!(
                        path = %candidate.location.display(),
                        reason = %candidate.reason,
                        "Pruned checkpoint"
                    );
                    report.deleted += 1;
                    report.freed_bytes += freed;
                    report.details.push(candidate);
                }
                Err(e) => {
                    warn!(path = %candidate.location.display(), error = %e, "Failed to prune checkpoint");
                    report.failed += 1;
                }
            }
        }

        if report.deleted > 0 {
            info!(
                deleted = report.deleted,
                freed_bytes = report.freed_bytes,
                "Checkpoint retention applied"
            );
        }
        Ok(report)
    }

    fn plan_at(&self, scope: Option<&SubjectKey>, now: DateTime<Utc>) -> Result<Vec<PruneCandidate>> {
        let mut doomed = Vec::new();
        let mut survivors = Vec::new();

        // Every subject counts toward the store ceilings; only those in
        // scope lose snapshots.
        for subject in self.store.subjects()? {
            let mut tracked = self.track(&subject)?;
            if scope.is_some_and(|s| s != &subject) {
                tracked.iter_mut().for_each(|t| t.in_scope = false);
                survivors.extend(tracked);
                continue;
            }

            // Rule 3: protected snapshots count toward the quota first
            if let Some(limit) = self.policy.keep_per_subject {
                let mut kept = tracked.iter().filter(|t| t.protected).count();
                let mut keep = BTreeSet::new();
                for (i, t) in tracked.iter().enumerate().rev() {
                    if !t.protected && kept < limit {
                        keep.insert(i);
                        kept += 1;
                    }
                }
                let (stay, go): (Vec<_>, Vec<_>) = tracked
                    .into_iter()
                    .enumerate()
                    .partition(|(i, t)| t.protected || keep.contains(i));
                doomed.extend(go.into_iter().map(|(_, t)| t.into_candidate(PruneReason::PerSubjectLimit)));
                tracked = stay.into_iter().map(|(_, t)| t).collect();
            }

            // Rule 4
            if let Some(days) = self.policy.max_age_days {
                let cutoff = now - TimeDelta::seconds(i64::from(days) * SECS_PER_DAY);
                let (stay, go): (Vec<_>, Vec<_>) = tracked
                    .into_iter()
                    .partition(|t| t.protected || t.saved_at >= cutoff);
                doomed.extend(go.into_iter().map(|t| t.into_candidate(PruneReason::Expired)));
                tracked = stay;
            }

            survivors.extend(tracked);
        }

        // Rule 5
        if self.policy.max_files.is_some() || self.policy.max_size_bytes.is_some() {
            let mut count = survivors.len();
            let mut bytes: u64 = survivors.iter().map(|t| t.size_bytes).sum();
            survivors.sort_by_key(|t| t.saved_at);

            for t in survivors.into_iter().filter(|t| t.in_scope && !t.protected) {
                let over_count = self.policy.max_files.is_some_and(|max| count > max);
                let over_size = self.policy.max_size_bytes.is_some_and(|max| bytes > max);
                if !over_count && !over_size {
                    break;
                }
                count -= 1;
                bytes = bytes.saturating_sub(t.size_bytes);
                doomed.push(t.into_candidate(PruneReason::StoreCeiling));
            }
        }

        Ok(doomed)
    }

    /// Files of one subject, oldest first, with protection resolved
    fn track(&self, subject: &SubjectKey) -> Result<Vec<Tracked>> {
        let files = self.store.files(subject)?;
        let newest = files.len().saturating_sub(1);

        Ok(files
            .into_iter()
            .enumerate()
            .map(|(i, file)| {
                let completed = self.policy.keep_completed
                    && self
                        .store
                        .read_header(&file.path)
                        .map(|h| h.completed)
                        .unwrap_or(false);
                Tracked {
                    location: file.path,
                    subject: subject.clone(),
                    saved_at: file.name.timestamp,
                    size_bytes: file.size_bytes,
                    protected: i == newest || completed,
                    in_scope: true,
                }
            })
            .collect())
    }
}
