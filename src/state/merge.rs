//! State Merger
//!
//! Folds a stage's partial update into the running state using the
//! Field Policy Registry. The update is validated in full before any field
//! changes, so a rejected update leaves the state untouched.
//!
//! Merge is not idempotent: applying the same unsequenced update twice
//! appends its history twice. Updates tagged with
//! [`StateUpdate::with_sequence`] are rejected on replay.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::trace;

use super::policy::{MergePolicy, StateField};
use super::running::RunningState;
use super::update::StateUpdate;
use crate::types::{Message, PaperError, QaPair, Result, VerificationOutcome};

/// An accumulating value may be a sequence or a single element
#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> From<OneOrMany<T>> for Vec<T> {
    fn from(value: OneOrMany<T>) -> Self {
        match value {
            OneOrMany::Many(items) => items,
            OneOrMany::One(item) => vec![item],
        }
    }
}

/// A decoded, not yet applied change
enum Change {
    Messages(Vec<Message>),
    QaPairs(Vec<QaPair>),
    Verifications(Vec<VerificationOutcome>),
    Assign(StateField, Value),
    Extra(String, Value),
}

/// Merge `update` into `state` in place
pub fn merge(state: &mut RunningState, update: StateUpdate) -> Result<()> {
    let (entries, sequence) = update.into_parts();

    if let Some(seq) = sequence
        && seq <= state.update_sequence
    {
        return Err(PaperError::DuplicateUpdate {
            sequence: seq,
            last_applied: state.update_sequence,
        });
    }

    let changes = decode_all(entries)?;

    // Validate replacing values against a scratch copy of the scalar fields
    let mut next = state.clone_scalars();
    for change in &changes {
        if let Change::Assign(field, value) = change {
            assign(&mut next, *field, value.clone())?;
        }
    }

    for change in changes {
        match change {
            Change::Messages(items) => state.messages.extend(items),
            Change::QaPairs(items) => state.qa_pairs.extend(items),
            Change::Verifications(items) => state.verification_results.extend(items),
            Change::Assign(..) => {}
            Change::Extra(key, value) => {
                state.extra.insert(key, value);
            }
        }
    }
    state.adopt_scalars(next);

    if let Some(seq) = sequence {
        state.update_sequence = seq;
    }
    Ok(())
}

/// Merge a sequence of updates in order
pub fn merge_all(
    state: &mut RunningState,
    updates: impl IntoIterator<Item = StateUpdate>,
) -> Result<()> {
    for update in updates {
        merge(state, update)?;
    }
    Ok(())
}

fn decode_all(entries: BTreeMap<String, Value>) -> Result<Vec<Change>> {
    let mut changes = Vec::with_capacity(entries.len());
    for (key, value) in entries {
        let Some(field) = StateField::from_name(&key) else {
            trace!(key = %key, "merging unregistered key as replace");
            changes.push(Change::Extra(key, value));
            continue;
        };
        match field.policy() {
            MergePolicy::Accumulate => {
                // null contributes nothing, it never resets history
                if value.is_null() {
                    continue;
                }
                let change = match field {
                    StateField::Messages => Change::Messages(decode_many(field, value)?),
                    StateField::QaPairs => Change::QaPairs(decode_many(field, value)?),
                    StateField::VerificationResults => {
                        Change::Verifications(decode_many(field, value)?)
                    }
                    other => {
                        return Err(PaperError::invalid_update(
                            other.name(),
                            "no accumulator registered",
                        ));
                    }
                };
                changes.push(change);
            }
            MergePolicy::Replace => {
                let value = if value.is_null() {
                    field.default_value()
                } else {
                    value
                };
                changes.push(Change::Assign(field, value));
            }
        }
    }
    Ok(changes)
}

fn decode_many<T: DeserializeOwned>(field: StateField, value: Value) -> Result<Vec<T>> {
    serde_json::from_value::<OneOrMany<T>>(value)
        .map(Vec::from)
        .map_err(|e| PaperError::invalid_update(field.name(), e.to_string()))
}

fn decode<T: DeserializeOwned>(field: StateField, value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| PaperError::invalid_update(field.name(), e.to_string()))
}

fn assign(scalars: &mut Scalars, field: StateField, value: Value) -> Result<()> {
    match field {
        StateField::PaperPath => scalars.paper_path = decode(field, value)?,
        StateField::PaperContent => scalars.paper_content = decode(field, value)?,
        StateField::PaperStructure => scalars.paper_structure = decode(field, value)?,
        StateField::SelectedQuestions => scalars.selected_questions = decode(field, value)?,
        StateField::CurrentQuestionId => scalars.current_question_id = decode(field, value)?,
        StateField::CurrentRound => scalars.current_round = decode(field, value)?,
        StateField::TotalQuestions => scalars.total_questions = decode(field, value)?,
        StateField::MaxFollowups => scalars.max_followups = decode(field, value)?,
        StateField::FinalReport => scalars.final_report = decode(field, value)?,
        StateField::IntermediateOutputs => scalars.intermediate_outputs = decode(field, value)?,
        StateField::StartTime => scalars.start_time = decode(field, value)?,
        StateField::EndTime => scalars.end_time = decode(field, value)?,
        StateField::Completed => scalars.completed = decode(field, value)?,
        StateField::FollowUpRounds => scalars.follow_up_rounds = decode(field, value)?,
        StateField::UpdateSequence => scalars.update_sequence = decode(field, value)?,
        StateField::Messages | StateField::QaPairs | StateField::VerificationResults => {
            return Err(PaperError::invalid_update(
                field.name(),
                "accumulating field cannot be assigned",
            ));
        }
    }
    Ok(())
}

/// Replacing fields of [`RunningState`], staged before commit
struct Scalars {
    paper_path: String,
    paper_content: String,
    paper_structure: String,
    selected_questions: Vec<String>,
    current_question_id: u32,
    current_round: u32,
    total_questions: u32,
    max_followups: u32,
    final_report: String,
    intermediate_outputs: BTreeMap<String, Value>,
    start_time: Option<chrono::DateTime<chrono::Utc>>,
    end_time: Option<chrono::DateTime<chrono::Utc>>,
    completed: bool,
    follow_up_rounds: u32,
    update_sequence: u64,
}

impl RunningState {
    fn clone_scalars(&self) -> Scalars {
        Scalars {
            paper_path: self.paper_path.clone(),
            paper_content: self.paper_content.clone(),
            paper_structure: self.paper_structure.clone(),
            selected_questions: self.selected_questions.clone(),
            current_question_id: self.current_question_id,
            current_round: self.current_round,
            total_questions: self.total_questions,
            max_followups: self.max_followups,
            final_report: self.final_report.clone(),
            intermediate_outputs: self.intermediate_outputs.clone(),
            start_time: self.start_time,
            end_time: self.end_time,
            completed: self.completed,
            follow_up_rounds: self.follow_up_rounds,
            update_sequence: self.update_sequence,
        }
    }

    fn adopt_scalars(&mut self, s: Scalars) {
        self.paper_path = s.paper_path;
        self.paper_content = s.paper_content;
        self.paper_structure = s.paper_structure;
        self.selected_questions = s.selected_questions;
        self.current_question_id = s.current_question_id;
        self.current_round = s.current_round;
        self.total_questions = s.total_questions;
        self.max_followups = s.max_followups;
        self.final_report = s.final_report;
        self.intermediate_outputs = s.intermediate_outputs;
        self.start_time = s.start_time;
        self.end_time = s.end_time;
        self.completed = s.completed;
        self.follow_up_rounds = s.follow_up_rounds;
        self.update_sequence = s.update_sequence;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Topic;
    use proptest::prelude::*;
    use serde_json::json;

    fn msg(content: &str) -> Message {
        Message::analyzer(content, 0, Topic::Question(1))
    }

    #[test]
    fn test_three_updates_accumulate_in_order() {
        let mut state = RunningState::new();
        for content in ["m1", "m2", "m3"] {
            let update = StateUpdate::from_value(json!({ "messages": [msg(content)] })).unwrap();
            merge(&mut state, update).unwrap();
        }
        let contents: Vec<_> = state.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["m1", "m2", "m3"]);
    }

    #[test]
    fn test_single_element_is_appended() {
        let mut state = RunningState::new();
        merge(&mut state, StateUpdate::new().set("messages", json!(msg("solo")))).unwrap();
        assert_eq!(state.messages, vec![msg("solo")]);
    }

    #[test]
    fn test_null_accumulating_value_is_noop() {
        let mut state = RunningState::new();
        state.messages.push(msg("kept"));
        merge(&mut state, StateUpdate::new().set("messages", Value::Null)).unwrap();
        assert_eq!(state.messages.len(), 1);
    }

    #[test]
    fn test_absent_keys_untouched() {
        let mut state = RunningState::new();
        state.paper_structure = "outline".into();
        state.current_round = 4;
        merge(&mut state, StateUpdate::new().final_report("done")).unwrap();
        assert_eq!(state.paper_structure, "outline");
        assert_eq!(state.current_round, 4);
        assert_eq!(state.final_report, "done");
    }

    #[test]
    fn test_null_replacing_value_resets_to_default() {
        let mut state = RunningState::new();
        state.total_questions = 7;
        merge(&mut state, StateUpdate::new().set("total_questions", Value::Null)).unwrap();
        assert_eq!(state.total_questions, 3);
    }

    #[test]
    fn test_invalid_update_leaves_state_unchanged() {
        let mut state = RunningState::new();
        state.messages.push(msg("before"));
        let update = StateUpdate::new()
            .message(msg("would-append"))
            .paper_structure("new outline")
            .set("current_round", json!("three"));

        let err = merge(&mut state, update).unwrap_err();
        assert!(matches!(err, PaperError::InvalidUpdate { ref field, .. } if field == "current_round"));
        assert_eq!(state.messages.len(), 1);
        assert_eq!(state.paper_structure, "");
    }

    #[test]
    fn test_unregistered_key_replaces() {
        let mut state = RunningState::new();
        merge(&mut state, StateUpdate::new().set("notes", json!(["a"]))).unwrap();
        merge(&mut state, StateUpdate::new().set("notes", json!(["b"]))).unwrap();
        assert_eq!(state.extra["notes"], json!(["b"]));
    }

    #[test]
    fn test_unsequenced_replay_duplicates() {
        let mut state = RunningState::new();
        let update = StateUpdate::new().message(msg("same"));
        merge(&mut state, update.clone()).unwrap();
        merge(&mut state, update).unwrap();
        assert_eq!(state.messages.len(), 2);
    }

    #[test]
    fn test_sequenced_replay_rejected() {
        let mut state = RunningState::new();
        let update = StateUpdate::new().message(msg("once")).with_sequence(1);
        merge(&mut state, update.clone()).unwrap();

        let err = merge(&mut state, update).unwrap_err();
        assert!(matches!(
            err,
            PaperError::DuplicateUpdate {
                sequence: 1,
                last_applied: 1
            }
        ));
        assert_eq!(state.messages.len(), 1);
        assert_eq!(state.update_sequence, 1);

        merge(&mut state, StateUpdate::new().message(msg("twice")).with_sequence(2)).unwrap();
        assert_eq!(state.messages.len(), 2);
    }

    fn arb_batches() -> impl Strategy<Value = Vec<Vec<String>>> {
        prop::collection::vec(prop::collection::vec("[a-z]{1,6}", 0..5), 1..8)
    }

    proptest! {
        #[test]
        fn prop_accumulation_preserves_length_and_order(batches in arb_batches()) {
            let mut state = RunningState::new();
            for batch in &batches {
                let update = StateUpdate::new().messages(batch.iter().map(|c| msg(c)));
                merge(&mut state, update).unwrap();
            }
            let expected: Vec<String> = batches.concat();
            let actual: Vec<String> = state.messages.iter().map(|m| m.content.clone()).collect();
            prop_assert_eq!(actual, expected);
        }

        #[test]
        fn prop_replacement_keeps_only_latest(values in prop::collection::vec(".{0,12}", 1..6)) {
            let mut state = RunningState::new();
            for v in &values {
                merge(&mut state, StateUpdate::new().paper_structure(v.clone())).unwrap();
            }
            prop_assert_eq!(&state.paper_structure, values.last().unwrap());
        }

        #[test]
        fn prop_history_never_shrinks(rounds in prop::collection::vec(0usize..4, 1..10)) {
            let mut state = RunningState::new();
            let mut previous = 0;
            for (i, n) in rounds.iter().enumerate() {
                let update = StateUpdate::new()
                    .messages((0..*n).map(|k| msg(&format!("{}-{}", i, k))))
                    .current_round(i as u32);
                merge(&mut state, update).unwrap();
                prop_assert!(state.messages.len() >= previous);
                previous = state.messages.len();
            }
        }
    }
}
