//! Snapshot Serializer
//!
//! A snapshot is an immutable, self-contained record of the running state
//! at a stage boundary plus the pipeline position.
//!
//! ## Format Version 3 (Current)
//!
//! - `format_version`: rejected on read when newer than [`FORMAT_VERSION`]
//! - `subject`, `stage`, `saved_at`, `completed`: pipeline position
//! - `counts`: accumulating-field lengths, cross-checked against the body
//! - `checksum`: CRC32 of the serialized body
//! - `source`, `config`: fingerprints for consistency checks
//! - `state`: every running-state field by name
//!
//! Flat version-2 records are upgraded on read (see [`super::legacy`]).

use chrono::{DateTime, Utc};
use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::consistency::{ConfigFingerprint, SourceFingerprint};
use super::legacy;
use super::stage::StageMarker;
use crate::constants::checkpoint::FORMAT_VERSION;
use crate::state::{HistoryCounts, RunningState};
use crate::types::{CheckpointError, Result, SubjectKey};

/// Header fields every current-format record must carry
const REQUIRED_HEADER: [&str; 5] = ["format_version", "subject", "stage", "saved_at", "state"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub format_version: u32,
    pub subject: SubjectKey,
    pub stage: StageMarker,
    pub saved_at: DateTime<Utc>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub counts: HistoryCounts,
    /// CRC32 of the body; 0 means "not recorded"
    #[serde(default)]
    pub checksum: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceFingerprint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<ConfigFingerprint>,
    pub state: Map<String, Value>,
}

/// Snapshot header without the state body
#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotHeader {
    pub format_version: u32,
    pub subject: SubjectKey,
    pub stage: StageMarker,
    pub saved_at: DateTime<Utc>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub counts: HistoryCounts,
    #[serde(default)]
    pub source: Option<SourceFingerprint>,
    #[allow(dead_code)]
    state: IgnoredAny,
}

impl Snapshot {
    /// Capture `state` at a stage boundary
    ///
    /// The body is an owned copy; later mutation of `state` never alters it.
    pub fn capture(
        state: &RunningState,
        stage: StageMarker,
        subject: SubjectKey,
        completed: bool,
    ) -> Result<Self> {
        let body = state.to_body()?;
        let checksum = body_checksum(&body)?;
        Ok(Self {
            format_version: FORMAT_VERSION,
            subject,
            stage,
            saved_at: Utc::now(),
            completed,
            counts: state.counts(),
            checksum,
            source: None,
            config: None,
            state: body,
        })
    }

    pub fn with_source(mut self, source: Option<SourceFingerprint>) -> Self {
        self.source = source;
        self
    }

    pub fn with_config(mut self, config: ConfigFingerprint) -> Self {
        self.config = Some(config);
        self
    }

    /// Rebuild the running state this snapshot was captured from
    pub fn restore(&self) -> Result<RunningState> {
        self.validate()?;
        RunningState::from_body(self.state.clone())
    }

    /// Like [`Snapshot::restore`] without cloning the body
    pub fn into_state(self) -> Result<RunningState> {
        self.validate()?;
        RunningState::from_body(self.state)
    }

    /// Validate integrity and version compatibility
    pub fn validate(&self) -> std::result::Result<(), CheckpointError> {
        if self.format_version > FORMAT_VERSION {
            return Err(CheckpointError::VersionUnsupported {
                found: self.format_version,
                supported: FORMAT_VERSION,
            });
        }

        if self.checksum != 0 {
            let computed = body_checksum(&self.state)
                .map_err(|e| CheckpointError::Malformed(e.to_string()))?;
            if self.checksum != computed {
                return Err(CheckpointError::ChecksumMismatch {
                    expected: self.checksum,
                    computed,
                });
            }
        }

        let body_len = |key: &str| {
            self.state
                .get(key)
                .and_then(Value::as_array)
                .map(Vec::len)
                .unwrap_or(0)
        };
        let body_counts = HistoryCounts {
            messages: body_len("messages"),
            qa_pairs: body_len("qa_pairs"),
            verification_results: body_len("verification_results"),
        };
        if self.counts != body_counts {
            return Err(CheckpointError::Malformed(format!(
                "header counts {:?} disagree with body {:?}",
                self.counts, body_counts
            )));
        }

        Ok(())
    }

    /// Pretty JSON for storage
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse, upgrade if needed, and validate a stored record
    pub fn from_json(json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json)
            .map_err(|e| CheckpointError::Malformed(format!("not valid JSON: {}", e)))?;
        let Value::Object(map) = value else {
            return Err(CheckpointError::Malformed("record is not an object".into()).into());
        };

        if legacy::is_legacy(&map) {
            let snapshot = legacy::upgrade(map)?;
            snapshot.validate()?;
            return Ok(snapshot);
        }

        check_header(&map)?;
        let snapshot: Self = serde_json::from_value(Value::Object(map))
            .map_err(|e| CheckpointError::Malformed(e.to_string()))?;
        snapshot.validate()?;
        Ok(snapshot)
    }

    /// Header view of this snapshot
    pub fn header(&self) -> SnapshotHeader {
        SnapshotHeader {
            format_version: self.format_version,
            subject: self.subject.clone(),
            stage: self.stage,
            saved_at: self.saved_at,
            completed: self.completed,
            counts: self.counts,
            source: self.source.clone(),
            state: IgnoredAny,
        }
    }
}

impl SnapshotHeader {
    /// Parse only the header of a stored record
    ///
    /// Presence of the body is checked, its content is not.
    pub fn from_json(json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json)
            .map_err(|e| CheckpointError::Malformed(format!("not valid JSON: {}", e)))?;
        let Value::Object(map) = value else {
            return Err(CheckpointError::Malformed("record is not an object".into()).into());
        };

        if legacy::is_legacy(&map) {
            return Ok(legacy::upgrade(map)?.header());
        }

        check_header(&map)?;
        Ok(serde_json::from_value(Value::Object(map))
            .map_err(|e| CheckpointError::Malformed(e.to_string()))?)
    }
}

fn check_header(map: &Map<String, Value>) -> std::result::Result<(), CheckpointError> {
    if let Some(field) = REQUIRED_HEADER.into_iter().find(|f| !map.contains_key(*f)) {
        return Err(CheckpointError::MissingHeader(field));
    }
    let found = map
        .get("format_version")
        .and_then(Value::as_u64)
        .ok_or_else(|| CheckpointError::Malformed("format_version is not a number".into()))?;
    if found > FORMAT_VERSION as u64 {
        return Err(CheckpointError::VersionUnsupported {
            found: u32::try_from(found).unwrap_or(u32::MAX),
            supported: FORMAT_VERSION,
        });
    }
    Ok(())
}

/// CRC32 over the canonical (key-sorted) body encoding
pub(crate) fn body_checksum(body: &Map<String, Value>) -> Result<u32> {
    let bytes = serde_json::to_vec(body)?;
    Ok(crc32fast::hash(&bytes))
}
