//! Stage Markers
//!
//! Identifies the pipeline step a snapshot was taken after. Markers have a
//! compact token form used in filenames and a total progress order:
//!
//! ```text
//! q0a0 < q0a1 < q1a0 < q1v0 < q1a1 < q1v1 < q2a0 < ... < final < fu1 < fu2
//! ```

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::state::RunningState;
use crate::types::CheckpointError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum StageMarker {
    /// Structure analysis finished (`q0a0`)
    Structure,
    /// Question selection finished (`q0a1`)
    Questions,
    /// Answer attempt `attempt` for question `question` (`q{N}a{K}`)
    Answer { question: u32, attempt: u32 },
    /// Reviewer verification of that attempt (`q{N}v{K}`)
    Verification { question: u32, attempt: u32 },
    /// Report integrated, session complete (`final`)
    Final,
    /// Post-completion follow-up round (`fu{K}`)
    FollowUp { round: u32 },
}

fn question_token_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^q(\d+)([av])(\d+)$").expect("valid stage token regex"))
}

impl StageMarker {
    /// Filename token
    pub fn token(&self) -> String {
        match self {
            Self::Structure => "q0a0".to_string(),
            Self::Questions => "q0a1".to_string(),
            Self::Answer { question, attempt } => format!("q{}a{}", question, attempt),
            Self::Verification { question, attempt } => format!("q{}v{}", question, attempt),
            Self::Final => "final".to_string(),
            Self::FollowUp { round } => format!("fu{}", round),
        }
    }

    pub fn parse(token: &str) -> Result<Self, CheckpointError> {
        let invalid = || CheckpointError::InvalidStage(token.to_string());

        match token {
            "q0a0" => return Ok(Self::Structure),
            "q0a1" => return Ok(Self::Questions),
            "final" => return Ok(Self::Final),
            _ => {}
        }

        if let Some(round) = token.strip_prefix("fu") {
            let round: u32 = round.parse().map_err(|_| invalid())?;
            return if round == 0 {
                Err(invalid())
            } else {
                Ok(Self::FollowUp { round })
            };
        }

        let caps = question_token_regex().captures(token).ok_or_else(invalid)?;
        let question: u32 = caps[1].parse().map_err(|_| invalid())?;
        let attempt: u32 = caps[3].parse().map_err(|_| invalid())?;
        if question == 0 {
            return Err(invalid());
        }
        Ok(match &caps[2] {
            "a" => Self::Answer { question, attempt },
            _ => Self::Verification { question, attempt },
        })
    }

    /// Sort key reflecting pipeline progress
    fn progress_key(&self) -> (u8, u32, u32, u8) {
        match *self {
            Self::Structure => (0, 0, 0, 0),
            Self::Questions => (1, 0, 0, 0),
            Self::Answer { question, attempt } => (2, question, attempt, 0),
            Self::Verification { question, attempt } => (2, question, attempt, 1),
            Self::Final => (3, 0, 0, 0),
            Self::FollowUp { round } => (4, round, 0, 0),
        }
    }

    /// Session reached report integration
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Final | Self::FollowUp { .. })
    }

    /// Question this marker belongs to, if any
    pub fn question(&self) -> Option<u32> {
        match *self {
            Self::Answer { question, .. } | Self::Verification { question, .. } => Some(question),
            _ => None,
        }
    }

    /// Human-readable progress description
    pub fn describe(&self, total_questions: u32) -> String {
        match *self {
            Self::Structure => "Structure analysis done".to_string(),
            Self::Questions => "Questions selected".to_string(),
            Self::Answer { question, attempt: 0 } => {
                format!("Question {}/{} answered", question, total_questions)
            }
            Self::Answer { question, attempt } => format!(
                "Question {}/{} follow-up {} answered",
                question, total_questions, attempt
            ),
            Self::Verification { question, attempt } => format!(
                "Question {}/{} attempt {} verified",
                question, total_questions, attempt
            ),
            Self::Final => "Completed".to_string(),
            Self::FollowUp { round } => format!("Completed, follow-up round {}", round),
        }
    }

    /// Reconstruct the last completed stage from state content
    ///
    /// Used for records written without a marker. Returns `None` when no
    /// stage has completed yet.
    pub fn infer(state: &RunningState) -> Option<Self> {
        if state.is_completed() {
            return Some(if state.follow_up_rounds > 0 {
                Self::FollowUp {
                    round: state.follow_up_rounds,
                }
            } else {
                Self::Final
            });
        }
        if state.paper_structure.trim().is_empty() {
            return None;
        }
        if state.selected_questions.is_empty() {
            return Some(Self::Structure);
        }

        let answered = (1..=state.question_count())
            .rev()
            .find(|q| state.answer_attempts(*q) > 0);
        let Some(question) = answered else {
            return Some(Self::Questions);
        };

        let attempt = state.answer_attempts(question) - 1;
        let verified = state
            .verification_results
            .iter()
            .filter(|v| v.question_id == question)
            .count() as u32;
        Some(if verified > attempt {
            Self::Verification { question, attempt }
        } else {
            Self::Answer { question, attempt }
        })
    }
}

impl Ord for StageMarker {
    fn cmp(&self, other: &Self) -> Ordering {
        self.progress_key().cmp(&other.progress_key())
    }
}

impl PartialOrd for StageMarker {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for StageMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.token())
    }
}

impl FromStr for StageMarker {
    type Err = CheckpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<StageMarker> for String {
    fn from(marker: StageMarker) -> String {
        marker.token()
    }
}

impl TryFrom<String> for StageMarker {
    type Error = CheckpointError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Message, Topic, VerificationOutcome};

    #[test]
    fn test_tokens() {
        assert_eq!(StageMarker::Structure.token(), "q0a0");
        assert_eq!(StageMarker::Questions.token(), "q0a1");
        assert_eq!(
            StageMarker::Answer {
                question: 2,
                attempt: 1
            }
            .token(),
            "q2a1"
        );
        assert_eq!(
            StageMarker::Verification {
                question: 3,
                attempt: 0
            }
            .token(),
            "q3v0"
        );
        assert_eq!(StageMarker::Final.token(), "final");
        assert_eq!(StageMarker::FollowUp { round: 2 }.token(), "fu2");
    }

    #[test]
    fn test_parse_round_trip() {
        for token in ["q0a0", "q0a1", "q1a0", "q12v3", "final", "fu4"] {
            assert_eq!(StageMarker::parse(token).unwrap().token(), token);
        }
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for token in ["", "q0a2", "q1x0", "qa1", "fu0", "fux", "FINAL", "q1a"] {
            assert!(StageMarker::parse(token).is_err(), "accepted {}", token);
        }
    }

    #[test]
    fn test_progress_order() {
        let ordered: Vec<StageMarker> = [
            "q0a0", "q0a1", "q1a0", "q1v0", "q1a1", "q1v1", "q2a0", "final", "fu1", "fu2",
        ]
        .iter()
        .map(|t| StageMarker::parse(t).unwrap())
        .collect();
        let mut shuffled = ordered.clone();
        shuffled.reverse();
        shuffled.sort();
        assert_eq!(shuffled, ordered);
    }

    #[test]
    fn test_multi_digit_questions_order_numerically() {
        let q2 = StageMarker::parse("q2a0").unwrap();
        let q10 = StageMarker::parse("q10a0").unwrap();
        assert!(q2 < q10);
    }

    #[test]
    fn test_serde_as_token() {
        let json = serde_json::to_string(&StageMarker::Answer {
            question: 1,
            attempt: 0,
        })
        .unwrap();
        assert_eq!(json, "\"q1a0\"");
        let back: StageMarker = serde_json::from_str("\"final\"").unwrap();
        assert_eq!(back, StageMarker::Final);
        assert!(serde_json::from_str::<StageMarker>("\"bogus\"").is_err());
    }

    #[test]
    fn test_infer_from_state() {
        let mut state = RunningState::new();
        assert_eq!(StageMarker::infer(&state), None);

        state.paper_structure = "outline".into();
        assert_eq!(StageMarker::infer(&state), Some(StageMarker::Structure));

        state.selected_questions = vec!["a?".into(), "b?".into(), "c?".into()];
        assert_eq!(StageMarker::infer(&state), Some(StageMarker::Questions));

        state.messages.push(Message::analyzer("ans", 0, Topic::Question(1)));
        assert_eq!(
            StageMarker::infer(&state),
            Some(StageMarker::Answer {
                question: 1,
                attempt: 0
            })
        );

        state.verification_results.push(VerificationOutcome {
            question_id: 1,
            attempt: 0,
            verdict: "ok".into(),
            is_verified: true,
            followup_needed: false,
            followup_question: None,
        });
        assert_eq!(
            StageMarker::infer(&state),
            Some(StageMarker::Verification {
                question: 1,
                attempt: 0
            })
        );

        state.final_report = "report".into();
        assert_eq!(StageMarker::infer(&state), Some(StageMarker::Final));

        state.follow_up_rounds = 2;
        assert_eq!(
            StageMarker::infer(&state),
            Some(StageMarker::FollowUp { round: 2 })
        );
    }
}
