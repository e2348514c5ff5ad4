pub mod dialogue;
pub mod error;

pub use dialogue::{Message, QaPair, Role, Topic, VerificationOutcome};
pub use error::{CheckpointError, PaperError, Result, ResultExt};

// =============================================================================
// Domain Newtypes
// =============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable key grouping every snapshot that belongs to one analyzed paper
///
/// Either a recognized arXiv identifier (`2401.12345v2`) or a locally
/// assigned sequential key (`custom_3`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectKey(String);

impl SubjectKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Locally assigned key for sources without a recognized identifier
    pub fn custom(n: u32) -> Self {
        Self(format!("custom_{}", n))
    }

    /// Sequence number of a `custom_N` key
    pub fn custom_index(&self) -> Option<u32> {
        self.0.strip_prefix("custom_")?.parse().ok()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for SubjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SubjectKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SubjectKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for SubjectKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod newtype_tests {
    use super::*;

    #[test]
    fn test_subject_key_custom() {
        let key = SubjectKey::custom(4);
        assert_eq!(key.as_str(), "custom_4");
        assert_eq!(key.custom_index(), Some(4));
        assert_eq!(SubjectKey::new("2401.00001v1").custom_index(), None);
        assert_eq!(SubjectKey::new("custom_x").custom_index(), None);
    }

    #[test]
    fn test_subject_key_serializes_as_string() {
        let key = SubjectKey::new("2401.00001v1");
        assert_eq!(serde_json::to_string(&key).unwrap(), "\"2401.00001v1\"");
        assert_eq!(format!("{}", key), "2401.00001v1");
    }
}
