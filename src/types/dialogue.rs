//! Dialogue Records
//!
//! Element types stored in the accumulating state fields: dialogue turns,
//! question/answer pairs and reviewer verification outcomes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Who produced a dialogue turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Analyzer,
    Reviewer,
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Analyzer => "analyzer",
            Role::Reviewer => "reviewer",
            Role::User => "user",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a dialogue turn is about
///
/// Serialized as an integer: `0` structure analysis, `N >= 1` question N,
/// `-1` post-completion follow-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i64", try_from = "i64")]
pub enum Topic {
    Structure,
    Question(u32),
    FollowUp,
}

impl From<Topic> for i64 {
    fn from(topic: Topic) -> i64 {
        match topic {
            Topic::Structure => 0,
            Topic::Question(n) => i64::from(n),
            Topic::FollowUp => -1,
        }
    }
}

impl TryFrom<i64> for Topic {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Topic::Structure),
            -1 => Ok(Topic::FollowUp),
            n if n > 0 => u32::try_from(n)
                .map(Topic::Question)
                .map_err(|_| format!("topic id {} out of range", n)),
            n => Err(format!("invalid topic id {}", n)),
        }
    }
}

/// One dialogue turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Follow-up round within the topic (0 = initial exchange)
    #[serde(default)]
    pub round: u32,
    #[serde(rename = "question_id")]
    pub topic: Topic,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>, round: u32, topic: Topic) -> Self {
        Self {
            role,
            content: content.into(),
            round,
            topic,
        }
    }

    pub fn analyzer(content: impl Into<String>, round: u32, topic: Topic) -> Self {
        Self::new(Role::Analyzer, content, round, topic)
    }

    pub fn reviewer(content: impl Into<String>, round: u32, topic: Topic) -> Self {
        Self::new(Role::Reviewer, content, round, topic)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content, 0, Topic::FollowUp)
    }
}

/// Final answer recorded for a selected question
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QaPair {
    #[serde(default)]
    pub question_id: u32,
    pub question: String,
    #[serde(rename = "analyzer_answer")]
    pub answer: String,
    #[serde(default, rename = "verification_result")]
    pub verification: String,
    #[serde(default)]
    pub is_verified: bool,
    #[serde(default)]
    pub followup_needed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub followup_question: Option<String>,
}

/// Reviewer verdict on one answer attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationOutcome {
    #[serde(default)]
    pub question_id: u32,
    #[serde(default)]
    pub attempt: u32,
    #[serde(default, alias = "verification_result")]
    pub verdict: String,
    #[serde(default)]
    pub is_verified: bool,
    #[serde(default)]
    pub followup_needed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub followup_question: Option<String>,
}

impl VerificationOutcome {
    /// Follow-up question to ask next, if the reviewer requested one
    pub fn next_followup(&self) -> Option<&str> {
        if self.followup_needed {
            self.followup_question.as_deref().filter(|q| !q.trim().is_empty())
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_integer_encoding() {
        let msg = Message::analyzer("outline", 0, Topic::Structure);
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["question_id"], 0);
        assert_eq!(json["role"], "analyzer");

        let follow = serde_json::to_value(Message::user("why?")).unwrap();
        assert_eq!(follow["question_id"], -1);

        let q: Message = serde_json::from_value(serde_json::json!({
            "role": "reviewer", "content": "ok", "round": 1, "question_id": 2
        }))
        .unwrap();
        assert_eq!(q.topic, Topic::Question(2));
        assert_eq!(q.role, Role::Reviewer);
    }

    #[test]
    fn test_topic_rejects_unknown_negative() {
        let res: Result<Message, _> = serde_json::from_value(serde_json::json!({
            "role": "user", "content": "x", "question_id": -7
        }));
        assert!(res.is_err());
    }

    #[test]
    fn test_topic_ids_keep_full_range() {
        let msg = Message::analyzer("a", 0, Topic::Question(u32::MAX));
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["question_id"], i64::from(u32::MAX));
        let back: Message = serde_json::from_value(json).unwrap();
        assert_eq!(back.topic, Topic::Question(u32::MAX));

        let res: Result<Message, _> = serde_json::from_value(serde_json::json!({
            "role": "user", "content": "x", "question_id": i64::from(u32::MAX) + 1
        }));
        assert!(res.is_err());
    }

    #[test]
    fn test_next_followup() {
        let mut outcome = VerificationOutcome {
            question_id: 1,
            attempt: 0,
            verdict: "partially supported".into(),
            is_verified: false,
            followup_needed: true,
            followup_question: Some("Which dataset?".into()),
        };
        assert_eq!(outcome.next_followup(), Some("Which dataset?"));

        outcome.followup_question = Some("  ".into());
        assert_eq!(outcome.next_followup(), None);

        outcome.followup_needed = false;
        outcome.followup_question = Some("Which dataset?".into());
        assert_eq!(outcome.next_followup(), None);
    }
}
