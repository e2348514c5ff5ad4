//! Resume Consistency Checks
//!
//! Snapshots record a fingerprint of the source document and of the
//! configuration that produced them. Before resuming, the current source
//! and configuration are compared against those fingerprints so the caller
//! can decide whether continuing is meaningful.

use std::fmt;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::snapshot::Snapshot;
use crate::config::Config;
use crate::types::{Result, ResultExt};

/// Identity of the analyzed source file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFingerprint {
    /// Absolute path at capture time
    pub path: String,
    pub size_bytes: u64,
    /// Hex SHA-256 of the file content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

impl SourceFingerprint {
    /// Fingerprint a file on disk
    pub fn of(path: &Path) -> Result<Self> {
        let mut file = fs::File::open(path)
            .with_context_fn(|| format!("Failed to open source {}", path.display()))?;
        let size_bytes = file.metadata()?.len();

        let mut hasher = Sha256::new();
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }

        Ok(Self {
            path: absolute_display(path),
            size_bytes,
            sha256: Some(hex(&hasher.finalize())),
        })
    }
}

/// Configuration values that change what a resumed session would produce
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigFingerprint {
    pub analyzer_model: String,
    pub reviewer_model: String,
    pub base_url: String,
    #[serde(default)]
    pub num_questions: Option<u32>,
    #[serde(default)]
    pub max_followups: Option<u32>,
}

impl ConfigFingerprint {
    pub fn from_config(config: &Config) -> Self {
        Self {
            analyzer_model: config.llm.analyzer_model.clone(),
            reviewer_model: config.llm.reviewer_model.clone(),
            base_url: config.llm.base_url.clone(),
            num_questions: Some(config.workflow.num_questions),
            max_followups: Some(config.workflow.max_followups_per_question),
        }
    }
}

/// One way the current environment differs from a snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Difference {
    SourcePath { saved: String, current: String },
    SourceSize { saved: u64, current: u64 },
    SourceContent,
    SourceMissing { path: PathBuf },
    Models,
    QuestionCount { saved: u32, current: u32 },
    BaseUrl,
}

impl fmt::Display for Difference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SourcePath { saved, current } => {
                write!(f, "Source path differs: checkpoint={}, current={}", saved, current)
            }
            Self::SourceSize { saved, current } => {
                write!(f, "Source size differs: checkpoint={} bytes, current={} bytes", saved, current)
            }
            Self::SourceContent => write!(f, "Source content changed (hash differs)"),
            Self::SourceMissing { path } => write!(f, "Source file not readable: {}", path.display()),
            Self::Models => write!(f, "Model configuration changed"),
            Self::QuestionCount { saved, current } => {
                write!(f, "Question count changed: {} -> {}", saved, current)
            }
            Self::BaseUrl => write!(f, "API base_url changed"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConsistencyReport {
    pub differences: Vec<Difference>,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.differences.is_empty()
    }
}

/// Compare a snapshot against the current source file and configuration
pub fn verify_consistency(snapshot: &Snapshot, source: &Path, config: &Config) -> ConsistencyReport {
    let mut differences = Vec::new();

    let saved_path = snapshot
        .source
        .as_ref()
        .map(|s| s.path.clone())
        .or_else(|| {
            snapshot
                .state
                .get("paper_path")
                .and_then(|v| v.as_str())
                .map(str::to_string)
        })
        .unwrap_or_default();
    let current_path = absolute_display(source);
    if absolute_display(Path::new(&saved_path)) != current_path {
        differences.push(Difference::SourcePath {
            saved: saved_path,
            current: current_path,
        });
    }

    if let Some(saved) = &snapshot.source {
        match SourceFingerprint::of(source) {
            Ok(current) => {
                if saved.size_bytes != current.size_bytes {
                    differences.push(Difference::SourceSize {
                        saved: saved.size_bytes,
                        current: current.size_bytes,
                    });
                }
                if let (Some(a), Some(b)) = (&saved.sha256, &current.sha256)
                    && a != b
                {
                    differences.push(Difference::SourceContent);
                }
            }
            Err(_) => differences.push(Difference::SourceMissing {
                path: source.to_path_buf(),
            }),
        }
    }

    if let Some(saved) = &snapshot.config {
        let current = ConfigFingerprint::from_config(config);
        if saved.analyzer_model != current.analyzer_model
            || saved.reviewer_model != current.reviewer_model
        {
            differences.push(Difference::Models);
        }
        if let (Some(saved_n), Some(current_n)) = (saved.num_questions, current.num_questions)
            && saved_n != current_n
        {
            differences.push(Difference::QuestionCount {
                saved: saved_n,
                current: current_n,
            });
        }
        if saved.base_url != current.base_url {
            differences.push(Difference::BaseUrl);
        }
    }

    ConsistencyReport { differences }
}

/// Absolute, lossy-UTF-8 form of a path without touching the filesystem
pub(crate) fn absolute_display(path: &Path) -> String {
    std::path::absolute(path)
        .unwrap_or_else(|_| path.to_path_buf())
        .to_string_lossy()
        .into_owned()
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::StageMarker;
    use crate::state::RunningState;
    use tempfile::TempDir;

    fn snapshot_for(path: &Path, config: &Config) -> Snapshot {
        let state = RunningState::for_paper(absolute_display(path), "text", 3, 2);
        Snapshot::capture(&state, StageMarker::Structure, "custom_1".into(), false)
            .unwrap()
            .with_source(Some(SourceFingerprint::of(path).unwrap()))
            .with_config(ConfigFingerprint::from_config(config))
    }

    #[test]
    fn test_fingerprint_hashes_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("paper.pdf");
        fs::write(&path, b"abc").unwrap();
        let fp = SourceFingerprint::of(&path).unwrap();
        assert_eq!(fp.size_bytes, 3);
        assert_eq!(
            fp.sha256.as_deref(),
            Some("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
        );
    }

    #[test]
    fn test_unchanged_is_consistent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("paper.pdf");
        fs::write(&path, b"content").unwrap();
        let config = Config::default();

        let report = verify_consistency(&snapshot_for(&path, &config), &path, &config);
        assert!(report.is_consistent(), "{:?}", report.differences);
    }

    #[test]
    fn test_detects_changes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("paper.pdf");
        fs::write(&path, b"content").unwrap();
        let config = Config::default();
        let snapshot = snapshot_for(&path, &config);

        fs::write(&path, b"content, revised").unwrap();
        let mut changed = Config::default();
        changed.llm.analyzer_model = "other".into();
        changed.llm.base_url = "http://localhost:8080".into();
        changed.workflow.num_questions = 5;

        let report = verify_consistency(&snapshot, &path, &changed);
        assert!(!report.is_consistent());
        assert!(report.differences.contains(&Difference::SourceContent));
        assert!(report.differences.contains(&Difference::Models));
        assert!(report.differences.contains(&Difference::BaseUrl));
        assert!(report.differences.contains(&Difference::QuestionCount {
            saved: 3,
            current: 5
        }));
        assert!(matches!(
            report.differences.iter().find(|d| matches!(d, Difference::SourceSize { .. })),
            Some(Difference::SourceSize {
                saved: 7,
                current: 16
            })
        ));
    }

    #[test]
    fn test_detects_moved_source() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("paper.pdf");
        fs::write(&path, b"content").unwrap();
        let config = Config::default();
        let snapshot = snapshot_for(&path, &config);

        let moved = dir.path().join("renamed.pdf");
        fs::rename(&path, &moved).unwrap();
        let report = verify_consistency(&snapshot, &moved, &config);
        assert!(
            report
                .differences
                .iter()
                .any(|d| matches!(d, Difference::SourcePath { .. }))
        );
    }
}
