//! Checkpoint Store
//!
//! Snapshot files on the local filesystem, one directory per subject:
//!
//! ```text
//! <root>/<subject>/checkpoint_20240501_102030_123456_q1a0.json
//! <root>/<subject>/readable_20240501_102030_123456_q1a0.md
//! ```
//!
//! Filenames embed the capture timestamp and the stage token so listings
//! can be ordered without reading bodies. Files are written to a hidden
//! temporary name, synced and renamed into place; an existing snapshot is
//! never rewritten.

use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::readable;
use super::snapshot::{Snapshot, SnapshotHeader};
use super::stage::StageMarker;
use crate::config::CheckpointConfig;
use crate::constants::checkpoint::{FILE_PREFIX, READABLE_PREFIX, SOURCE_MARKER, TIMESTAMP_FORMAT};
use crate::types::{CheckpointError, Result, ResultExt, SubjectKey};

/// Parsed snapshot filename
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotName {
    pub timestamp: DateTime<Utc>,
    pub stage: StageMarker,
}

impl SnapshotName {
    pub fn new(timestamp: DateTime<Utc>, stage: StageMarker) -> Self {
        Self { timestamp, stage }
    }

    fn suffix(&self) -> String {
        format!("{}_{}", self.timestamp.format(TIMESTAMP_FORMAT), self.stage.token())
    }

    pub fn file_name(&self) -> String {
        format!("{}{}.json", FILE_PREFIX, self.suffix())
    }

    pub fn readable_name(&self) -> String {
        format!("{}{}.md", READABLE_PREFIX, self.suffix())
    }

    /// Parse `checkpoint_<ts>_<token>.json`
    ///
    /// Also accepts the older `checkpoint_<token>_<YYYYmmdd>_<HHMMSS>.json`.
    pub fn parse(file_name: &str) -> Option<Self> {
        let stem = file_name.strip_prefix(FILE_PREFIX)?.strip_suffix(".json")?;

        // <YYYYmmdd>_<HHMMSS>_<ffffff>_<token>
        if let Some((ts, token)) = split_at_checked(stem, 22)
            && let Some(token) = token.strip_prefix('_')
            && let Ok(naive) = NaiveDateTime::parse_from_str(ts, TIMESTAMP_FORMAT)
        {
            return Some(Self::new(naive.and_utc(), StageMarker::parse(token).ok()?));
        }

        // <token>_<YYYYmmdd>_<HHMMSS>
        let (token, ts) = stem.split_once('_')?;
        let naive = NaiveDateTime::parse_from_str(ts, "%Y%m%d_%H%M%S").ok()?;
        Some(Self::new(naive.and_utc(), StageMarker::parse(token).ok()?))
    }
}

fn split_at_checked(s: &str, mid: usize) -> Option<(&str, &str)> {
    s.is_char_boundary(mid).then(|| s.split_at(mid))
}

/// A snapshot file found in the store
#[derive(Debug, Clone)]
pub struct StoredFile {
    pub path: PathBuf,
    pub name: SnapshotName,
    pub size_bytes: u64,
}

/// Per-subject store statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct SubjectStats {
    pub count: usize,
    pub size_bytes: u64,
    pub completed: usize,
    pub latest: Option<DateTime<Utc>>,
}

/// Store-wide statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreStats {
    pub total_files: usize,
    pub total_bytes: u64,
    pub subjects: BTreeMap<SubjectKey, SubjectStats>,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

impl StoreStats {
    pub fn total_mb(&self) -> f64 {
        self.total_bytes as f64 / crate::constants::retention::BYTES_PER_MB as f64
    }
}

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    root: PathBuf,
    readable: bool,
}

impl CheckpointStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            readable: false,
        }
    }

    pub fn from_config(config: &CheckpointConfig) -> Self {
        Self::new(&config.dir).with_readable(config.readable)
    }

    /// Also write a markdown companion for every snapshot
    pub fn with_readable(mut self, readable: bool) -> Self {
        self.readable = readable;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn subject_dir(&self, subject: &SubjectKey) -> PathBuf {
        self.root.join(subject.as_str())
    }

    /// Create a subject directory and record the source document it belongs to
    pub fn claim_subject(&self, subject: &SubjectKey, source: &str) -> Result<()> {
        let dir = self.subject_dir(subject);
        fs::create_dir_all(&dir)
            .with_context_fn(|| format!("Failed to create {}", dir.display()))?;
        atomic_write(&dir.join(SOURCE_MARKER), source.as_bytes())
            .with_context_fn(|| format!("Failed to record source for {}", subject))?;
        Ok(())
    }

    /// Source document recorded by [`claim_subject`](Self::claim_subject)
    pub fn claimed_source(&self, subject: &SubjectKey) -> Option<String> {
        let recorded = fs::read_to_string(self.subject_dir(subject).join(SOURCE_MARKER)).ok()?;
        let recorded = recorded.trim();
        (!recorded.is_empty()).then(|| recorded.to_string())
    }

    // =========================================================================
    // Write / Read
    // =========================================================================

    /// Persist a snapshot under a fresh name and return its location
    ///
    /// Failure is returned to the caller; a session must not continue
    /// believing it is durable when it is not.
    pub fn write(&self, snapshot: &Snapshot) -> Result<PathBuf> {
        let dir = self.subject_dir(&snapshot.subject);
        fs::create_dir_all(&dir)
            .with_context_fn(|| format!("Failed to create {}", dir.display()))?;

        let mut name = SnapshotName::new(snapshot.saved_at, snapshot.stage);
        while dir.join(name.file_name()).exists() {
            name.timestamp += TimeDelta::microseconds(1);
        }

        let path = dir.join(name.file_name());
        let json = snapshot.to_json()?;
        atomic_write(&path, json.as_bytes())
            .with_context_fn(|| format!("Failed to write checkpoint {}", path.display()))?;
        info!(
            subject = %snapshot.subject,
            stage = %snapshot.stage,
            path = %path.display(),
            "Checkpoint saved"
        );

        if self.readable {
            let companion = dir.join(name.readable_name());
            let written = readable::render(snapshot)
                .and_then(|md| atomic_write(&companion, md.as_bytes()).map_err(Into::into));
            match written {
                Ok(()) => debug!(path = %companion.display(), "Readable checkpoint saved"),
                Err(e) => warn!(path = %companion.display(), error = %e, "Readable checkpoint not saved"),
            }
        }

        Ok(path)
    }

    /// Read and validate a snapshot
    pub fn read(&self, location: &Path) -> Result<Snapshot> {
        let json = read_record(location)?;
        Snapshot::from_json(&json)
    }

    /// Read only the header of a snapshot
    pub fn read_header(&self, location: &Path) -> Result<SnapshotHeader> {
        let json = read_record(location)?;
        SnapshotHeader::from_json(&json)
    }

    // =========================================================================
    // Listing
    // =========================================================================

    /// Snapshot locations for a subject, oldest first
    pub fn list(&self, subject: &SubjectKey) -> Result<Vec<PathBuf>> {
        Ok(self.files(subject)?.into_iter().map(|f| f.path).collect())
    }

    /// Snapshot files for a subject with parsed names, oldest first
    ///
    /// Files whose names do not parse are ignored. A missing subject
    /// directory yields an empty list.
    pub fn files(&self, subject: &SubjectKey) -> Result<Vec<StoredFile>> {
        let dir = self.subject_dir(subject);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let pattern = format!(
            "{}/{}*.json",
            glob::Pattern::escape(&dir.to_string_lossy()),
            FILE_PREFIX
        );
        let paths = glob::glob(&pattern).map_err(|e| CheckpointError::Malformed(e.to_string()))?;

        let mut files = Vec::new();
        for entry in paths {
            let path = match entry {
                Ok(path) => path,
                Err(e) => {
                    warn!(error = %e, "Unreadable checkpoint entry skipped");
                    continue;
                }
            };
            let Some(name) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(SnapshotName::parse)
            else {
                debug!(path = %path.display(), "Ignoring file with unrecognized name");
                continue;
            };
            let size_bytes = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            files.push(StoredFile {
                path,
                name,
                size_bytes,
            });
        }

        files.sort_by(|a, b| {
            a.name
                .timestamp
                .cmp(&b.name.timestamp)
                .then_with(|| a.name.stage.cmp(&b.name.stage))
        });
        Ok(files)
    }

    /// Subjects that have a directory in the store
    pub fn subjects(&self) -> Result<Vec<SubjectKey>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut subjects = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_dir()
                && let Some(name) = entry.file_name().to_str()
                && !name.starts_with('.')
            {
                subjects.push(SubjectKey::from(name));
            }
        }
        subjects.sort();
        Ok(subjects)
    }

    // =========================================================================
    // Removal
    // =========================================================================

    /// Delete a snapshot and its markdown companion, returning bytes freed
    pub fn remove(&self, location: &Path) -> Result<u64> {
        let mut freed = fs::metadata(location)?.len();
        fs::remove_file(location)?;

        if let Some(companion) = companion_path(location) {
            match fs::metadata(&companion) {
                Ok(meta) => {
                    fs::remove_file(&companion)?;
                    freed += meta.len();
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(freed)
    }

    /// Delete every subject directory, returning snapshots removed
    pub fn clear(&self) -> Result<usize> {
        let mut removed = 0;
        for subject in self.subjects()? {
            removed += self.files(&subject)?.len();
            fs::remove_dir_all(self.subject_dir(&subject))?;
        }
        Ok(removed)
    }

    // =========================================================================
    // Statistics
    // =========================================================================

    pub fn stats(&self) -> Result<StoreStats> {
        let mut stats = StoreStats::default();

        for subject in self.subjects()? {
            let files = self.files(&subject)?;
            if files.is_empty() {
                continue;
            }
            let mut subject_stats = SubjectStats::default();
            for file in &files {
                subject_stats.count += 1;
                subject_stats.size_bytes += file.size_bytes;
                if self
                    .read_header(&file.path)
                    .map(|h| h.completed)
                    .unwrap_or(false)
                {
                    subject_stats.completed += 1;
                }
                let ts = file.name.timestamp;
                subject_stats.latest = subject_stats.latest.max(Some(ts));
                stats.oldest = Some(stats.oldest.map_or(ts, |o| o.min(ts)));
                stats.newest = Some(stats.newest.map_or(ts, |n| n.max(ts)));
            }
            stats.total_files += subject_stats.count;
            stats.total_bytes += subject_stats.size_bytes;
            stats.subjects.insert(subject, subject_stats);
        }

        Ok(stats)
    }
}

/// Markdown companion of a snapshot file
pub fn companion_path(location: &Path) -> Option<PathBuf> {
    let name = location.file_name()?.to_str()?;
    let suffix = name.strip_prefix(FILE_PREFIX)?.strip_suffix(".json")?;
    Some(location.with_file_name(format!("{}{}.md", READABLE_PREFIX, suffix)))
}

fn read_record(location: &Path) -> Result<String> {
    match fs::read_to_string(location) {
        Ok(json) => Ok(json),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            Err(CheckpointError::NotFound(location.to_path_buf()).into())
        }
        Err(e) => Err(e.into()),
    }
}

/// Write via temp file + fsync + rename
fn atomic_write(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let temp_name = format!(
        ".{}.{}.tmp",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("file"),
        Uuid::new_v4()
    );
    let temp_path = path.with_file_name(&temp_name);

    let result = (|| {
        let mut file = fs::File::create(&temp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
        fs::rename(&temp_path, path)
    })();
    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result?;

    #[cfg(unix)]
    {
        if let Some(parent) = path.parent()
            && let Ok(dir) = fs::File::open(parent)
        {
            // Best effort
            let _ = dir.sync_all();
        }
    }

    Ok(())
}
