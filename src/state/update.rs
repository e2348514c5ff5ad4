//! Partial State Updates
//!
//! What a pipeline stage hands back: a mapping from field name to the new
//! value (replacing fields) or the appended value (accumulating fields).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::{Value, json};

use super::policy::{MergePolicy, StateField, policy_for};
use crate::types::{Message, PaperError, QaPair, Result, VerificationOutcome};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateUpdate {
    entries: BTreeMap<String, Value>,
    sequence: Option<u64>,
}

impl StateUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a JSON object produced by an external stage
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self {
                entries: map.into_iter().collect(),
                sequence: None,
            }),
            other => Err(PaperError::invalid_update(
                "<update>",
                format!("expected an object, got {}", other),
            )),
        }
    }

    /// Tag the update with a caller-assigned sequence number
    ///
    /// Sequenced updates are merged at most once per state.
    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = Some(sequence);
        self
    }

    pub fn sequence(&self) -> Option<u64> {
        self.sequence
    }

    /// Set a key to a raw value, overwriting any earlier value for that key
    pub fn set(mut self, key: impl Into<String>, value: Value) -> Self {
        self.entries.insert(key.into(), value);
        self
    }

    /// Add one element to an accumulating key within this update
    fn push(mut self, field: StateField, element: Value) -> Self {
        let slot = self
            .entries
            .entry(field.name().to_string())
            .or_insert_with(|| json!([]));
        match slot {
            Value::Array(items) => items.push(element),
            other => *other = json!([other.take(), element]),
        }
        self
    }

    // =========================================================================
    // Accumulating fields
    // =========================================================================

    pub fn message(self, message: Message) -> Self {
        self.push(StateField::Messages, json!(message))
    }

    pub fn messages(self, messages: impl IntoIterator<Item = Message>) -> Self {
        messages.into_iter().fold(self, |u, m| u.message(m))
    }

    pub fn qa_pair(self, pair: QaPair) -> Self {
        self.push(StateField::QaPairs, json!(pair))
    }

    pub fn verification(self, outcome: VerificationOutcome) -> Self {
        self.push(StateField::VerificationResults, json!(outcome))
    }

    // =========================================================================
    // Replacing fields
    // =========================================================================

    pub fn paper_structure(self, structure: impl Into<String>) -> Self {
        self.set(StateField::PaperStructure.name(), json!(structure.into()))
    }

    pub fn selected_questions(self, questions: Vec<String>) -> Self {
        self.set(StateField::SelectedQuestions.name(), json!(questions))
    }

    pub fn current_question(self, q: u32) -> Self {
        self.set(StateField::CurrentQuestionId.name(), json!(q))
    }

    pub fn current_round(self, round: u32) -> Self {
        self.set(StateField::CurrentRound.name(), json!(round))
    }

    pub fn final_report(self, report: impl Into<String>) -> Self {
        self.set(StateField::FinalReport.name(), json!(report.into()))
    }

    pub fn completed(self, completed: bool) -> Self {
        self.set(StateField::Completed.name(), json!(completed))
    }

    pub fn follow_up_rounds(self, rounds: u32) -> Self {
        self.set(StateField::FollowUpRounds.name(), json!(rounds))
    }

    pub fn end_time(self, at: DateTime<Utc>) -> Self {
        self.set(StateField::EndTime.name(), json!(at))
    }

    /// Record a scratch output; the whole scratch map replaces the previous one
    pub fn intermediate(mut self, key: impl Into<String>, value: Value) -> Self {
        let slot = self
            .entries
            .entry(StateField::IntermediateOutputs.name().to_string())
            .or_insert_with(|| json!({}));
        if !slot.is_object() {
            *slot = json!({});
        }
        if let Value::Object(map) = slot {
            map.insert(key.into(), value);
        }
        self
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Elements this update contributes to an accumulating field
    pub fn contributed(&self, field: StateField) -> usize {
        if policy_for(field.name()) != MergePolicy::Accumulate {
            return 0;
        }
        match self.entries.get(field.name()) {
            None | Some(Value::Null) => 0,
            Some(Value::Array(items)) => items.len(),
            Some(_) => 1,
        }
    }

    /// Combine two updates bound for the same merge; `other` wins on replacing keys
    pub fn absorb(mut self, other: StateUpdate) -> Self {
        for (key, value) in other.entries {
            match StateField::from_name(&key) {
                Some(field) if field.is_accumulating() => {
                    let elements = match value {
                        Value::Null => Vec::new(),
                        Value::Array(items) => items,
                        single => vec![single],
                    };
                    for element in elements {
                        self = self.push(field, element);
                    }
                }
                _ => {
                    self.entries.insert(key, value);
                }
            }
        }
        if other.sequence.is_some() {
            self.sequence = other.sequence;
        }
        self
    }

    pub(crate) fn into_parts(self) -> (BTreeMap<String, Value>, Option<u64>) {
        (self.entries, self.sequence)
    }
}

impl FromIterator<(String, Value)> for StateUpdate {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
            sequence: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Topic;

    #[test]
    fn test_message_builder_appends_within_update() {
        let update = StateUpdate::new()
            .message(Message::analyzer("a", 0, Topic::Question(1)))
            .message(Message::reviewer("b", 0, Topic::Question(1)));
        assert_eq!(update.get("messages").unwrap().as_array().unwrap().len(), 2);
        assert_eq!(update.contributed(StateField::Messages), 2);
    }

    #[test]
    fn test_from_value_requires_object() {
        assert!(StateUpdate::from_value(json!([1, 2])).is_err());
        let update = StateUpdate::from_value(json!({"paper_structure": "x"})).unwrap();
        assert!(update.contains("paper_structure"));
        assert_eq!(update.sequence(), None);
    }

    #[test]
    fn test_contributed_counts() {
        let update = StateUpdate::new()
            .set("qa_pairs", Value::Null)
            .set("verification_results", json!({"question_id": 1, "verdict": "ok"}))
            .paper_structure("outline");
        assert_eq!(update.contributed(StateField::QaPairs), 0);
        assert_eq!(update.contributed(StateField::VerificationResults), 1);
        assert_eq!(update.contributed(StateField::PaperStructure), 0);
        assert_eq!(update.contributed(StateField::Messages), 0);
    }

    #[test]
    fn test_absorb_concatenates_history_and_overrides_scalars() {
        let first = StateUpdate::new()
            .message(Message::analyzer("a", 0, Topic::Question(1)))
            .current_round(0);
        let second = StateUpdate::new()
            .message(Message::reviewer("b", 0, Topic::Question(1)))
            .current_round(1)
            .with_sequence(7);
        let combined = first.absorb(second);
        assert_eq!(combined.contributed(StateField::Messages), 2);
        assert_eq!(combined.get("current_round"), Some(&json!(1)));
        assert_eq!(combined.sequence(), Some(7));
    }

    #[test]
    fn test_intermediate_builds_map() {
        let update = StateUpdate::new()
            .intermediate("structure_raw", json!("..."))
            .intermediate("tokens", json!(120));
        let map = update.get("intermediate_outputs").unwrap().as_object().unwrap();
        assert_eq!(map.len(), 2);
    }
}
