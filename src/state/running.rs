//! Running State
//!
//! The single mutable accumulator for one analysis session. Registered
//! fields are typed; keys outside the registry are kept opaquely in
//! `extra` so they survive a snapshot round trip.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::policy::StateField;
use crate::constants::workflow;
use crate::types::{CheckpointError, Message, QaPair, Result, Role, Topic, VerificationOutcome};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunningState {
    // Accumulating
    pub messages: Vec<Message>,
    pub qa_pairs: Vec<QaPair>,
    pub verification_results: Vec<VerificationOutcome>,

    // Replacing
    pub paper_path: String,
    pub paper_content: String,
    pub paper_structure: String,
    pub selected_questions: Vec<String>,
    pub current_question_id: u32,
    pub current_round: u32,
    pub total_questions: u32,
    pub max_followups: u32,
    pub final_report: String,
    pub intermediate_outputs: BTreeMap<String, Value>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub completed: bool,
    pub follow_up_rounds: u32,
    /// Sequence number of the last sequenced update merged
    pub update_sequence: u64,

    /// Unregistered keys, replaced wholesale on update
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Default for RunningState {
    fn default() -> Self {
        Self {
            messages: Vec::new(),
            qa_pairs: Vec::new(),
            verification_results: Vec::new(),
            paper_path: String::new(),
            paper_content: String::new(),
            paper_structure: String::new(),
            selected_questions: Vec::new(),
            current_question_id: 0,
            current_round: 0,
            total_questions: workflow::DEFAULT_NUM_QUESTIONS,
            max_followups: workflow::DEFAULT_MAX_FOLLOWUPS,
            final_report: String::new(),
            intermediate_outputs: BTreeMap::new(),
            start_time: None,
            end_time: None,
            completed: false,
            follow_up_rounds: 0,
            update_sequence: 0,
            extra: BTreeMap::new(),
        }
    }
}

/// Element counts of the accumulating fields
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryCounts {
    pub messages: usize,
    pub qa_pairs: usize,
    pub verification_results: usize,
}

impl RunningState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh session for one source document
    pub fn for_paper(
        path: impl Into<String>,
        content: impl Into<String>,
        total_questions: u32,
        max_followups: u32,
    ) -> Self {
        Self {
            paper_path: path.into(),
            paper_content: content.into(),
            total_questions,
            max_followups,
            start_time: Some(Utc::now()),
            ..Self::default()
        }
    }

    pub fn counts(&self) -> HistoryCounts {
        HistoryCounts {
            messages: self.messages.len(),
            qa_pairs: self.qa_pairs.len(),
            verification_results: self.verification_results.len(),
        }
    }

    /// A final report exists (or the session was explicitly closed)
    pub fn is_completed(&self) -> bool {
        self.completed || !self.final_report.trim().is_empty()
    }

    /// Analyzer answers recorded so far for question `q`
    pub fn answer_attempts(&self, q: u32) -> u32 {
        self.messages
            .iter()
            .filter(|m| m.role == Role::Analyzer && m.topic == Topic::Question(q))
            .count() as u32
    }

    /// Most recent reviewer outcome for question `q`
    pub fn latest_outcome(&self, q: u32) -> Option<&VerificationOutcome> {
        self.verification_results
            .iter()
            .rev()
            .find(|v| v.question_id == q)
    }

    /// Text of selected question `q` (1-based)
    pub fn question(&self, q: u32) -> Option<&str> {
        let idx = (q as usize).checked_sub(1)?;
        self.selected_questions.get(idx).map(String::as_str)
    }

    /// Number of questions this session will work through
    pub fn question_count(&self) -> u32 {
        if self.selected_questions.is_empty() {
            self.total_questions
        } else {
            (self.selected_questions.len() as u32).min(self.total_questions.max(1))
        }
    }

    // =========================================================================
    // Body conversion
    // =========================================================================

    /// Field map written into a snapshot body
    ///
    /// The map owns its data; later mutation of `self` never reaches it.
    pub fn to_body(&self) -> Result<Map<String, Value>> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            other => Err(CheckpointError::Malformed(format!(
                "state serialized to non-object {}",
                other
            ))
            .into()),
        }
    }

    /// Rebuild state from a snapshot body
    ///
    /// Registered fields missing from the body take the registry default.
    /// Unregistered keys land in `extra`.
    pub fn from_body(mut body: Map<String, Value>) -> Result<Self> {
        for field in StateField::ALL {
            body.entry(field.name())
                .or_insert_with(|| field.default_value());
        }
        serde_json::from_value(Value::Object(body))
            .map_err(|e| CheckpointError::Malformed(format!("state body: {}", e)).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_matches_registry() {
        let from_empty = RunningState::from_body(Map::new()).unwrap();
        assert_eq!(from_empty, RunningState::default());
    }

    #[test]
    fn test_body_round_trip_keeps_extra() {
        let mut state = RunningState::for_paper("paper.pdf", "text", 3, 2);
        state.messages.push(Message::analyzer("outline", 0, Topic::Structure));
        state.extra.insert("scratch".into(), json!({"k": 1}));

        let body = state.to_body().unwrap();
        assert_eq!(body["scratch"], json!({"k": 1}));
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);

        let restored = RunningState::from_body(body).unwrap();
        assert_eq!(restored, state);
    }

    #[test]
    fn test_missing_field_defaults() {
        let body = json!({
            "messages": [{"role": "analyzer", "content": "a", "round": 0, "question_id": 1}],
            "paper_structure": "outline"
        });
        let Value::Object(map) = body else {
            unreachable!()
        };
        let state = RunningState::from_body(map).unwrap();
        assert_eq!(state.messages.len(), 1);
        assert_eq!(state.paper_structure, "outline");
        assert!(state.qa_pairs.is_empty());
        assert_eq!(state.total_questions, 3);
        assert_eq!(state.max_followups, 2);
        assert!(state.intermediate_outputs.is_empty());
        assert!(state.extra.is_empty());
    }

    #[test]
    fn test_wrong_shape_is_malformed() {
        let Value::Object(map) = json!({"messages": "not a list"}) else {
            unreachable!()
        };
        let err = RunningState::from_body(map).unwrap_err();
        assert!(err.is_corrupt_checkpoint());
    }

    #[test]
    fn test_answer_attempts_and_latest_outcome() {
        let mut state = RunningState::new();
        state.messages.push(Message::analyzer("a0", 0, Topic::Question(1)));
        state.messages.push(Message::reviewer("r0", 0, Topic::Question(1)));
        state.messages.push(Message::analyzer("a1", 1, Topic::Question(1)));
        state.messages.push(Message::analyzer("b0", 0, Topic::Question(2)));
        assert_eq!(state.answer_attempts(1), 2);
        assert_eq!(state.answer_attempts(2), 1);
        assert_eq!(state.answer_attempts(3), 0);

        for attempt in 0..2 {
            state.verification_results.push(VerificationOutcome {
                question_id: 1,
                attempt,
                verdict: format!("v{}", attempt),
                is_verified: attempt == 1,
                followup_needed: false,
                followup_question: None,
            });
        }
        assert_eq!(state.latest_outcome(1).unwrap().verdict, "v1");
        assert!(state.latest_outcome(2).is_none());
    }

    #[test]
    fn test_question_lookup() {
        let mut state = RunningState::new();
        state.selected_questions = vec!["first?".into(), "second?".into()];
        assert_eq!(state.question(1), Some("first?"));
        assert_eq!(state.question(2), Some("second?"));
        assert_eq!(state.question(0), None);
        assert_eq!(state.question(3), None);
        assert_eq!(state.question_count(), 2);
    }
}
