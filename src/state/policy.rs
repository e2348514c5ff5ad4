//! Field Policy Registry
//!
//! Static declaration of how every state field merges. Accumulating fields
//! are append-only histories; replacing fields hold the latest value.
//! The table is fixed at build time and is the only place merge policy is
//! decided.

use std::fmt;

use serde_json::{Value, json};

use crate::constants::workflow;

/// How an update to a field is folded into the running state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePolicy {
    /// Extend the existing sequence, preserving update order
    Accumulate,
    /// Overwrite the existing value
    Replace,
}

/// Every field the running state knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StateField {
    Messages,
    QaPairs,
    VerificationResults,
    PaperPath,
    PaperContent,
    PaperStructure,
    SelectedQuestions,
    CurrentQuestionId,
    CurrentRound,
    TotalQuestions,
    MaxFollowups,
    FinalReport,
    IntermediateOutputs,
    StartTime,
    EndTime,
    Completed,
    FollowUpRounds,
    UpdateSequence,
}

impl StateField {
    /// Registry order, accumulating fields first
    pub const ALL: [StateField; 18] = [
        Self::Messages,
        Self::QaPairs,
        Self::VerificationResults,
        Self::PaperPath,
        Self::PaperContent,
        Self::PaperStructure,
        Self::SelectedQuestions,
        Self::CurrentQuestionId,
        Self::CurrentRound,
        Self::TotalQuestions,
        Self::MaxFollowups,
        Self::FinalReport,
        Self::IntermediateOutputs,
        Self::StartTime,
        Self::EndTime,
        Self::Completed,
        Self::FollowUpRounds,
        Self::UpdateSequence,
    ];

    /// Wire name of the field
    pub fn name(&self) -> &'static str {
        match self {
            Self::Messages => "messages",
            Self::QaPairs => "qa_pairs",
            Self::VerificationResults => "verification_results",
            Self::PaperPath => "paper_path",
            Self::PaperContent => "paper_content",
            Self::PaperStructure => "paper_structure",
            Self::SelectedQuestions => "selected_questions",
            Self::CurrentQuestionId => "current_question_id",
            Self::CurrentRound => "current_round",
            Self::TotalQuestions => "total_questions",
            Self::MaxFollowups => "max_followups",
            Self::FinalReport => "final_report",
            Self::IntermediateOutputs => "intermediate_outputs",
            Self::StartTime => "start_time",
            Self::EndTime => "end_time",
            Self::Completed => "completed",
            Self::FollowUpRounds => "follow_up_rounds",
            Self::UpdateSequence => "update_sequence",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|f| f.name() == name)
    }

    pub fn policy(&self) -> MergePolicy {
        match self {
            Self::Messages | Self::QaPairs | Self::VerificationResults => MergePolicy::Accumulate,
            _ => MergePolicy::Replace,
        }
    }

    pub fn is_accumulating(&self) -> bool {
        self.policy() == MergePolicy::Accumulate
    }

    /// Value a field takes when a snapshot predates it or an update resets it
    pub fn default_value(&self) -> Value {
        match self {
            Self::Messages | Self::QaPairs | Self::VerificationResults => json!([]),
            Self::PaperPath | Self::PaperContent | Self::PaperStructure | Self::FinalReport => {
                json!("")
            }
            Self::SelectedQuestions => json!([]),
            Self::CurrentQuestionId | Self::CurrentRound | Self::FollowUpRounds => json!(0),
            Self::UpdateSequence => json!(0),
            Self::TotalQuestions => json!(workflow::DEFAULT_NUM_QUESTIONS),
            Self::MaxFollowups => json!(workflow::DEFAULT_MAX_FOLLOWUPS),
            Self::IntermediateOutputs => json!({}),
            Self::StartTime | Self::EndTime => Value::Null,
            Self::Completed => json!(false),
        }
    }
}

impl fmt::Display for StateField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Merge policy for any field name; unregistered names replace
pub fn policy_for(name: &str) -> MergePolicy {
    StateField::from_name(name)
        .map(|f| f.policy())
        .unwrap_or(MergePolicy::Replace)
}

/// Registered default for a field name, `None` if the name is unregistered
pub fn default_value(name: &str) -> Option<Value> {
    StateField::from_name(name).map(|f| f.default_value())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accumulating_fields() {
        assert_eq!(policy_for("messages"), MergePolicy::Accumulate);
        assert_eq!(policy_for("qa_pairs"), MergePolicy::Accumulate);
        assert_eq!(policy_for("verification_results"), MergePolicy::Accumulate);
    }

    #[test]
    fn test_replacing_fields() {
        assert_eq!(policy_for("paper_structure"), MergePolicy::Replace);
        assert_eq!(policy_for("final_report"), MergePolicy::Replace);
        assert_eq!(policy_for("selected_questions"), MergePolicy::Replace);
    }

    #[test]
    fn test_unknown_field_replaces() {
        assert_eq!(policy_for("scratch_notes"), MergePolicy::Replace);
        assert_eq!(default_value("scratch_notes"), None);
    }

    #[test]
    fn test_defaults() {
        assert_eq!(default_value("messages"), Some(json!([])));
        assert_eq!(default_value("paper_content"), Some(json!("")));
        assert_eq!(default_value("current_round"), Some(json!(0)));
        assert_eq!(default_value("total_questions"), Some(json!(3)));
        assert_eq!(default_value("max_followups"), Some(json!(2)));
        assert_eq!(default_value("intermediate_outputs"), Some(json!({})));
        assert_eq!(default_value("start_time"), Some(Value::Null));
    }

    #[test]
    fn test_names_round_trip() {
        for field in StateField::ALL {
            assert_eq!(StateField::from_name(field.name()), Some(field));
        }
    }

    #[test]
    fn test_every_accumulating_default_is_empty_sequence() {
        for field in StateField::ALL.iter().filter(|f| f.is_accumulating()) {
            assert_eq!(field.default_value(), json!([]));
        }
    }
}
