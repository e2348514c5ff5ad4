//! Checkpoint Catalog
//!
//! Discovers resumable snapshots for a subject from headers only and
//! selects one for resumption. Records that fail header validation are
//! reported and skipped, never deleted.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use super::snapshot::Snapshot;
use super::stage::StageMarker;
use super::store::CheckpointStore;
use crate::state::HistoryCounts;
use crate::types::{PaperError, Result, SubjectKey};

/// How a session continues from a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumeKind {
    /// Pick up the question loop after the recorded stage
    Continue,
    /// The analysis finished; only follow-up questions remain
    FollowUp,
}

/// Lightweight descriptor of one stored snapshot
#[derive(Debug, Clone, Serialize)]
pub struct CatalogEntry {
    pub location: PathBuf,
    pub subject: SubjectKey,
    pub stage: StageMarker,
    pub saved_at: DateTime<Utc>,
    pub counts: HistoryCounts,
    pub completed: bool,
    pub size_bytes: u64,
    #[serde(skip)]
    sort_key: DateTime<Utc>,
}

impl CatalogEntry {
    pub fn resume_kind(&self) -> ResumeKind {
        if self.completed || self.stage.is_terminal() {
            ResumeKind::FollowUp
        } else {
            ResumeKind::Continue
        }
    }

    pub fn file_name(&self) -> String {
        self.location
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// A record the catalog refused to list
#[derive(Debug, Clone, Serialize)]
pub struct SkippedEntry {
    pub location: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CatalogListing {
    /// Newest first
    pub entries: Vec<CatalogEntry>,
    pub skipped: Vec<SkippedEntry>,
}

impl CatalogListing {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn latest(&self) -> Option<&CatalogEntry> {
        self.entries.first()
    }
}

/// What the caller wants to resume from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Newest snapshot that fully validates
    Latest,
    /// A specific snapshot file
    Path(PathBuf),
    /// 1-based position in the listing; `0` means start fresh
    Index(usize),
    Fresh,
}

pub struct Catalog<'a> {
    store: &'a CheckpointStore,
}

impl<'a> Catalog<'a> {
    pub fn new(store: &'a CheckpointStore) -> Self {
        Self { store }
    }

    /// Candidates for `subject`, newest first
    ///
    /// Equal timestamps order the more advanced stage first. A subject
    /// with no directory yields an empty listing.
    pub fn list_candidates(&self, subject: &SubjectKey) -> Result<CatalogListing> {
        let mut listing = CatalogListing::default();

        for file in self.store.files(subject)? {
            match self.store.read_header(&file.path) {
                Ok(header) => listing.entries.push(CatalogEntry {
                    location: file.path,
                    subject: header.subject,
                    stage: header.stage,
                    saved_at: header.saved_at,
                    counts: header.counts,
                    completed: header.completed,
                    size_bytes: file.size_bytes,
                    sort_key: file.name.timestamp,
                }),
                Err(e) => {
                    warn!(path = %file.path.display(), error = %e, "Skipping unreadable checkpoint");
                    listing.skipped.push(SkippedEntry {
                        location: file.path,
                        reason: e.to_string(),
                    });
                }
            }
        }

        listing.entries.sort_by(|a, b| {
            b.sort_key
                .cmp(&a.sort_key)
                .then_with(|| b.stage.cmp(&a.stage))
        });
        debug!(
            subject = %subject,
            entries = listing.entries.len(),
            skipped = listing.skipped.len(),
            "Listed checkpoints"
        );
        Ok(listing)
    }

    /// Load the snapshot named by `selection`
    ///
    /// `Ok(None)` means start fresh, either by request or because no
    /// usable snapshot exists.
    pub fn select(&self, subject: &SubjectKey, selection: &Selection) -> Result<Option<Snapshot>> {
        Ok(self.select_with_location(subject, selection)?.map(|(_, snapshot)| snapshot))
    }

    /// Like [`Catalog::select`], also returning where the snapshot lives
    pub fn select_with_location(
        &self,
        subject: &SubjectKey,
        selection: &Selection,
    ) -> Result<Option<(PathBuf, Snapshot)>> {
        match selection {
            Selection::Fresh | Selection::Index(0) => Ok(None),
            Selection::Path(path) => Ok(Some((path.clone(), self.store.read(path)?))),
            Selection::Index(n) => {
                let listing = self.list_candidates(subject)?;
                let entry = listing.entries.get(n - 1).ok_or_else(|| {
                    PaperError::Session(format!(
                        "Checkpoint index {} out of range (1-{})",
                        n,
                        listing.entries.len()
                    ))
                })?;
                let snapshot = self.store.read(&entry.location)?;
                Ok(Some((entry.location.clone(), snapshot)))
            }
            Selection::Latest => self.select_latest(subject),
        }
    }

    fn select_latest(&self, subject: &SubjectKey) -> Result<Option<(PathBuf, Snapshot)>> {
        let listing = self.list_candidates(subject)?;
        for entry in listing.entries {
            match self.store.read(&entry.location) {
                Ok(snapshot) => return Ok(Some((entry.location, snapshot))),
                Err(e) if e.is_corrupt_checkpoint() => {
                    warn!(path = %entry.location.display(), error = %e, "Falling back past corrupt checkpoint");
                }
                Err(e) => return Err(e),
            }
        }
        debug!(subject = %subject, "No usable checkpoint found");
        Ok(None)
    }
}
