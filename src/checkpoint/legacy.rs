//! Legacy Record Upgrade
//!
//! Version-2 records stored the state fields at the top level next to a
//! string `checkpoint_version`, a naive local timestamp, `pdf_metadata`
//! and `config_snapshot`. They carry no stage marker, no completion flag
//! and epoch-float session times. This module lifts them into the current
//! layout; the state body is defaulted through the registry like any other
//! older record.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{Map, Value, json};
use tracing::debug;

use super::consistency::{ConfigFingerprint, SourceFingerprint};
use super::snapshot::{Snapshot, body_checksum};
use super::stage::StageMarker;
use crate::constants::checkpoint::FORMAT_VERSION;
use crate::state::RunningState;
use crate::types::{CheckpointError, Result, SubjectKey};

const METADATA_KEYS: [&str; 5] = [
    "checkpoint_version",
    "saved_at",
    "paper_identifier",
    "pdf_metadata",
    "config_snapshot",
];

/// Record uses the flat version-2 layout
pub fn is_legacy(map: &Map<String, Value>) -> bool {
    map.contains_key("checkpoint_version") && !map.contains_key("format_version")
}

/// Lift a flat record into a current snapshot
pub fn upgrade(mut map: Map<String, Value>) -> Result<Snapshot> {
    let version = legacy_major(map.get("checkpoint_version"))?;
    if version > FORMAT_VERSION {
        return Err(CheckpointError::VersionUnsupported {
            found: version,
            supported: FORMAT_VERSION,
        }
        .into());
    }

    let saved_at = map
        .get("saved_at")
        .and_then(Value::as_str)
        .and_then(parse_timestamp)
        .ok_or(CheckpointError::MissingHeader("saved_at"))?;
    let subject = map
        .get("paper_identifier")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(SubjectKey::from)
        .ok_or(CheckpointError::MissingHeader("paper_identifier"))?;
    let source = map.get("pdf_metadata").and_then(source_fingerprint);
    let config = map.get("config_snapshot").map(config_fingerprint);

    for key in METADATA_KEYS {
        map.remove(key);
    }
    normalize_times(&mut map);
    number_qa_pairs(&mut map);

    let state = RunningState::from_body(map)?;
    let stage = StageMarker::infer(&state).ok_or_else(|| {
        CheckpointError::Malformed("legacy record has no completed stage".to_string())
    })?;
    debug!(subject = %subject, stage = %stage, "upgraded legacy checkpoint");

    let body = state.to_body()?;
    Ok(Snapshot {
        format_version: FORMAT_VERSION,
        subject,
        stage,
        saved_at,
        completed: state.is_completed(),
        counts: state.counts(),
        checksum: body_checksum(&body)?,
        source,
        config,
        state: body,
    })
}

fn legacy_major(value: Option<&Value>) -> std::result::Result<u32, CheckpointError> {
    let raw = match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => return Err(CheckpointError::MissingHeader("checkpoint_version")),
    };
    raw.split('.')
        .next()
        .and_then(|major| major.trim().parse().ok())
        .ok_or_else(|| CheckpointError::Malformed(format!("checkpoint_version '{}'", raw)))
}

/// Accepts RFC 3339 or a naive ISO timestamp (read as UTC)
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Epoch-float session times become RFC 3339; zero means unset
fn normalize_times(map: &mut Map<String, Value>) {
    for key in ["start_time", "end_time"] {
        let Some(Value::Number(n)) = map.get(key) else {
            continue;
        };
        let converted = n
            .as_f64()
            .filter(|secs| *secs > 0.0)
            .and_then(|secs| {
                DateTime::from_timestamp(secs.trunc() as i64, (secs.fract() * 1e9) as u32)
            })
            .map(|dt| json!(dt))
            .unwrap_or(Value::Null);
        map.insert(key.to_string(), converted);
    }
}

/// Question/answer pairs were positional
fn number_qa_pairs(map: &mut Map<String, Value>) {
    let Some(Value::Array(pairs)) = map.get_mut("qa_pairs") else {
        return;
    };
    for (idx, pair) in pairs.iter_mut().enumerate() {
        if let Value::Object(obj) = pair {
            obj.entry("question_id").or_insert_with(|| json!(idx + 1));
        }
    }
}

fn source_fingerprint(meta: &Value) -> Option<SourceFingerprint> {
    let path = meta.get("path")?.as_str()?.to_string();
    Some(SourceFingerprint {
        path,
        size_bytes: meta.get("size").and_then(Value::as_u64).unwrap_or(0),
        sha256: None,
    })
}

fn config_fingerprint(snapshot: &Value) -> ConfigFingerprint {
    let text = |section: &str, key: &str| {
        snapshot
            .get(section)
            .and_then(|s| s.get(key))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    let number = |section: &str, key: &str| {
        snapshot
            .get(section)
            .and_then(|s| s.get(key))
            .and_then(Value::as_u64)
            .and_then(|n| u32::try_from(n).ok())
    };
    ConfigFingerprint {
        analyzer_model: text("models", "analyzer"),
        reviewer_model: text("models", "reviewer"),
        base_url: text("api", "base_url"),
        num_questions: number("workflow", "num_questions"),
        max_followups: number("workflow", "max_followup_per_question"),
    }
}
