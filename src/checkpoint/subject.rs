//! Subject Key Resolution
//!
//! Sessions are grouped by a stable subject key so unrelated papers never
//! share a catalog. Resolution order:
//!
//! 1. arXiv identifier in the file name
//! 2. arXiv identifier near the start of the extracted text
//! 3. an existing `custom_N` directory claimed for, or whose snapshots
//!    name, the same file
//! 4. the next free `custom_N`, claimed for the file

use std::path::Path;
use std::sync::OnceLock;

use regex::{Regex, RegexBuilder};
use serde_json::Value;
use tracing::{debug, info};

use super::consistency::absolute_display;
use super::store::CheckpointStore;
use crate::constants::subject::{CONTENT_SCAN_CHARS, DEFAULT_ARXIV_VERSION};
use crate::types::{Result, SubjectKey};

fn filename_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(\d{4}\.\d{4,5})(v\d+)?\b").expect("valid arXiv filename regex")
    })
}

fn content_regexes() -> &'static [Regex; 2] {
    static RE: OnceLock<[Regex; 2]> = OnceLock::new();
    RE.get_or_init(|| {
        let build = |pattern: &str| {
            RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .expect("valid arXiv content regex")
        };
        [
            build(r"arXiv:(\d{4}\.\d{4,5}(?:v\d+)?)"),
            build(r"arxiv\.org/abs/(\d{4}\.\d{4,5}(?:v\d+)?)"),
        ]
    })
}

/// arXiv identifier embedded in a file name, with `v1` assumed
pub fn arxiv_id_from_filename(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    let caps = filename_regex().captures(name)?;
    let version = caps
        .get(2)
        .map(|m| m.as_str())
        .unwrap_or(DEFAULT_ARXIV_VERSION);
    Some(format!("{}{}", &caps[1], version))
}

/// arXiv identifier in the first few thousand characters of `content`
pub fn arxiv_id_from_content(content: &str) -> Option<String> {
    let head = match content.char_indices().nth(CONTENT_SCAN_CHARS) {
        Some((idx, _)) => &content[..idx],
        None => content,
    };
    content_regexes().iter().find_map(|re| {
        let id = re.captures(head)?.get(1)?.as_str().to_string();
        Some(if id.contains('v') {
            id
        } else {
            format!("{}{}", id, DEFAULT_ARXIV_VERSION)
        })
    })
}

/// Subject key already associated with a source document
///
/// Never touches the store; `None` means the document has no local key yet.
pub fn find_subject(
    store: &CheckpointStore,
    source: &Path,
    content: &str,
) -> Result<Option<SubjectKey>> {
    if let Some(id) = arxiv_id_from_filename(source) {
        debug!(id = %id, "arXiv ID from filename");
        return Ok(Some(SubjectKey::from(id)));
    }
    if let Some(id) = arxiv_id_from_content(content) {
        debug!(id = %id, "arXiv ID from content");
        return Ok(Some(SubjectKey::from(id)));
    }

    let wanted = absolute_display(source);
    for subject in custom_subjects(store)? {
        let recorded = store
            .claimed_source(&subject)
            .or_else(|| recorded_source(store, &subject));
        if recorded.as_deref() == Some(wanted.as_str()) {
            debug!(subject = %subject, "Found existing custom subject");
            return Ok(Some(subject));
        }
    }
    Ok(None)
}

/// The `custom_N` key the next unknown document would receive
pub fn next_custom_subject(store: &CheckpointStore) -> Result<SubjectKey> {
    let next = custom_subjects(store)?
        .iter()
        .filter_map(SubjectKey::custom_index)
        .max()
        .map_or(1, |n| n + 1);
    Ok(SubjectKey::custom(next))
}

/// Resolve the subject key for a source document, claiming a new one if needed
///
/// A newly assigned `custom_N` directory records the document's absolute
/// path, so later resolutions return the same key before any snapshot
/// exists and a different document never receives it.
pub fn resolve_subject(store: &CheckpointStore, source: &Path, content: &str) -> Result<SubjectKey> {
    if let Some(subject) = find_subject(store, source, content)? {
        return Ok(subject);
    }

    let subject = next_custom_subject(store)?;
    store.claim_subject(&subject, &absolute_display(source))?;
    info!(subject = %subject, "Assigned custom subject");
    Ok(subject)
}

fn custom_subjects(store: &CheckpointStore) -> Result<Vec<SubjectKey>> {
    Ok(store
        .subjects()?
        .into_iter()
        .filter(|s| s.custom_index().is_some())
        .collect())
}

/// Absolute source path recorded by the first readable snapshot of a subject
fn recorded_source(store: &CheckpointStore, subject: &SubjectKey) -> Option<String> {
    let files = store.files(subject).ok()?;
    files.iter().find_map(|file| {
        let snapshot = store.read(&file.path).ok()?;
        let path = match &snapshot.source {
            Some(source) => source.path.clone(),
            None => snapshot.state.get("paper_path").and_then(Value::as_str)?.to_string(),
        };
        Some(absolute_display(Path::new(&path)))
    })
}
