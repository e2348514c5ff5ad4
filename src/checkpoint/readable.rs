//! Markdown rendering of a snapshot for human inspection.

use std::fmt::Write;

use super::snapshot::Snapshot;
use crate::types::{Result, Role, Topic};

pub fn render(snapshot: &Snapshot) -> Result<String> {
    let state = snapshot.restore()?;
    let mut out = String::new();

    // Writing into a String cannot fail
    let _ = writeln!(out, "# Analysis Checkpoint\n");
    let _ = writeln!(out, "- **Paper**: {}", or_na(&state.paper_path));
    let _ = writeln!(out, "- **Subject**: {}", snapshot.subject);
    let _ = writeln!(
        out,
        "- **Stage**: {} ({})",
        snapshot.stage,
        snapshot.stage.describe(state.total_questions)
    );
    let _ = writeln!(out, "- **Saved**: {}", snapshot.saved_at.format("%Y-%m-%d %H:%M:%S UTC"));
    let _ = writeln!(
        out,
        "- **Question**: {}/{} (round {})",
        state.current_question_id, state.total_questions, state.current_round
    );
    let _ = writeln!(out, "\n---\n");

    if !state.paper_structure.trim().is_empty() {
        let _ = writeln!(out, "## Structure\n\n{}\n\n---\n", state.paper_structure.trim());
    }

    if !state.selected_questions.is_empty() {
        let _ = writeln!(out, "## Selected Questions\n");
        for (i, q) in state.selected_questions.iter().enumerate() {
            let _ = writeln!(out, "{}. {}", i + 1, q);
        }
        let _ = writeln!(out, "\n---\n");
    }

    if !state.messages.is_empty() {
        let _ = writeln!(out, "## Dialogue\n");
        for msg in &state.messages {
            let topic = match msg.topic {
                Topic::Structure => "Structure".to_string(),
                Topic::Question(n) => format!("Q{}", n),
                Topic::FollowUp => "Follow-up".to_string(),
            };
            let marker = match msg.role {
                Role::Analyzer => "A",
                Role::Reviewer => "R",
                Role::User => "U",
            };
            let _ = writeln!(
                out,
                "### [{}] {} - Round {}, {}\n\n{}\n\n---\n",
                marker,
                msg.role.as_str().to_uppercase(),
                msg.round,
                topic,
                msg.content.trim()
            );
        }
    }

    if !state.final_report.trim().is_empty() {
        let _ = writeln!(out, "## Final Report\n\n{}", state.final_report.trim());
    }

    Ok(out)
}

fn or_na(s: &str) -> &str {
    if s.is_empty() { "N/A" } else { s }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::StageMarker;
    use crate::state::RunningState;
    use crate::types::Message;

    #[test]
    fn test_render_sections() {
        let mut state = RunningState::for_paper("paper.pdf", "text", 2, 1);
        state.paper_structure = "1. Intro".into();
        state.selected_questions = vec!["Why?".into()];
        state.messages.push(Message::analyzer("Because.", 0, Topic::Question(1)));
        state.messages.push(Message::user("And then?"));
        let snapshot = Snapshot::capture(
            &state,
            StageMarker::Answer {
                question: 1,
                attempt: 0,
            },
            "custom_1".into(),
            false,
        )
        .unwrap();

        let md = render(&snapshot).unwrap();
        assert!(md.starts_with("# Analysis Checkpoint"));
        assert!(md.contains("**Paper**: paper.pdf"));
        assert!(md.contains("## Structure\n\n1. Intro"));
        assert!(md.contains("1. Why?"));
        assert!(md.contains("ANALYZER - Round 0, Q1"));
        assert!(md.contains("USER - Round 0, Follow-up"));
        assert!(!md.contains("## Final Report"));
    }
}
