//! Pipeline Driver
//!
//! Owns the live [`RunningState`] of one session and walks the stage
//! sequence:
//!
//! ```text
//! Structure → Questions → (Answer → Verification)* per question → Final
//!                              ↑          │
//!                              └ follow-up┘   (while budget remains)
//! ```
//!
//! Every stage's update is merged exactly once, stamped with the next
//! sequence number, and followed by a snapshot. A failed stage merges and
//! writes nothing, so the previous snapshot stays the resume point.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use super::agent::{SharedAgent, SourceLoader, Turn};
use crate::checkpoint::consistency::absolute_display;
use crate::checkpoint::{
    CheckpointStore, ConfigFingerprint, ResumeKind, RetentionPolicy, RetentionPruner, Snapshot,
    SourceFingerprint, StageMarker, resolve_subject,
};
use crate::config::Config;
use crate::constants::output::REPORT_PREFIX;
use crate::state::{RunningState, StateUpdate, merge};
use crate::types::{Message, PaperError, Result, Role, SubjectKey, Topic};

// =============================================================================
// Session
// =============================================================================

/// One analysis of one source document
#[derive(Debug, Clone)]
pub struct Session {
    pub subject: SubjectKey,
    pub state: RunningState,
    /// Last stage whose update has been merged
    pub stage: Option<StageMarker>,
    pub source: Option<SourceFingerprint>,
    pub last_checkpoint: Option<PathBuf>,
}

impl Session {
    pub fn is_completed(&self) -> bool {
        self.state.is_completed()
    }

    pub fn resume_kind(&self) -> ResumeKind {
        if self.is_completed() || self.stage.is_some_and(|s| s.is_terminal()) {
            ResumeKind::FollowUp
        } else {
            ResumeKind::Continue
        }
    }
}

/// A free-form question asked after completion, with its answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FollowUpExchange {
    pub question: String,
    pub answer: String,
}

// =============================================================================
// Step Selection
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Structure,
    Questions,
    Answer { question: u32, attempt: u32 },
    Verify { question: u32, attempt: u32 },
    Integrate,
}

impl Step {
    fn marker(self) -> StageMarker {
        match self {
            Self::Structure => StageMarker::Structure,
            Self::Questions => StageMarker::Questions,
            Self::Answer { question, attempt } => StageMarker::Answer { question, attempt },
            Self::Verify { question, attempt } => StageMarker::Verification { question, attempt },
            Self::Integrate => StageMarker::Final,
        }
    }
}

/// Step after `last`; `None` once the report has been integrated
fn next_step(last: Option<StageMarker>, state: &RunningState) -> Option<Step> {
    let first_question = || {
        if state.question_count() == 0 {
            Step::Integrate
        } else {
            Step::Answer {
                question: 1,
                attempt: 0,
            }
        }
    };

    let step = match last {
        None => Step::Structure,
        Some(StageMarker::Structure) => Step::Questions,
        Some(StageMarker::Questions) => first_question(),
        Some(StageMarker::Answer { question, attempt }) => Step::Verify { question, attempt },
        Some(StageMarker::Verification { question, attempt }) => {
            let wants_followup = state
                .latest_outcome(question)
                .is_some_and(|o| o.followup_needed);
            if wants_followup && attempt < state.max_followups {
                Step::Answer {
                    question,
                    attempt: attempt + 1,
                }
            } else if question < state.question_count() {
                Step::Answer {
                    question: question + 1,
                    attempt: 0,
                }
            } else {
                Step::Integrate
            }
        }
        Some(StageMarker::Final | StageMarker::FollowUp { .. }) => return None,
    };
    Some(step)
}

// =============================================================================
// Driver
// =============================================================================

pub struct PipelineDriver {
    config: Config,
    agent: SharedAgent,
    store: CheckpointStore,
}

impl PipelineDriver {
    pub fn new(config: Config, agent: SharedAgent) -> Self {
        let store = CheckpointStore::from_config(&config.checkpoint);
        Self {
            config,
            agent,
            store,
        }
    }

    pub fn with_store(mut self, store: CheckpointStore) -> Self {
        self.store = store;
        self
    }

    pub fn store(&self) -> &CheckpointStore {
        &self.store
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// New session for `paper` with an empty history
    #[instrument(skip(self, loader), fields(paper = %paper.display()))]
    pub fn start_fresh(&self, paper: &Path, loader: &dyn SourceLoader) -> Result<Session> {
        self.prune_opportunistically();

        let content = loader.load(paper)?;
        let subject = resolve_subject(&self.store, paper, &content)?;
        let state = RunningState::for_paper(
            absolute_display(paper),
            content,
            self.config.workflow.num_questions,
            self.config.workflow.max_followups_per_question,
        );
        info!(subject = %subject, "Starting fresh analysis");

        Ok(Session {
            subject,
            state,
            stage: None,
            source: fingerprint(paper),
            last_checkpoint: None,
        })
    }

    /// Session continuing from `snapshot`
    ///
    /// The follow-up budget comes from the current configuration. Source
    /// text is reloaded when the snapshot carries none.
    #[instrument(skip(self, snapshot, loader), fields(stage = %snapshot.stage))]
    pub fn resume(
        &self,
        snapshot: Snapshot,
        paper: &Path,
        loader: &dyn SourceLoader,
    ) -> Result<Session> {
        self.prune_opportunistically();

        let subject = snapshot.subject.clone();
        let stage = snapshot.stage;
        let source = fingerprint(paper).or_else(|| snapshot.source.clone());
        let mut state = snapshot.into_state()?;

        let mut update = StateUpdate::new().set(
            "max_followups",
            json!(self.config.workflow.max_followups_per_question),
        );
        if state.paper_content.trim().is_empty() {
            update = update.set("paper_content", json!(loader.load(paper)?));
        }
        let sequence = state.update_sequence + 1;
        merge(&mut state, update.with_sequence(sequence))?;

        info!(
            subject = %subject,
            messages = state.messages.len(),
            "Resuming: {}",
            stage.describe(state.question_count())
        );

        Ok(Session {
            subject,
            state,
            stage: Some(stage),
            source,
            last_checkpoint: None,
        })
    }

    /// Run stages until the report is integrated
    #[instrument(skip(self, session), fields(subject = %session.subject))]
    pub async fn run(&self, session: &mut Session) -> Result<()> {
        while let Some(step) = next_step(session.stage, &session.state) {
            self.execute(session, step).await?;
        }
        info!(
            messages = session.state.messages.len(),
            qa_pairs = session.state.qa_pairs.len(),
            "Analysis complete"
        );
        Ok(())
    }

    async fn execute(&self, session: &mut Session, step: Step) -> Result<()> {
        let marker = step.marker();
        let state = &session.state;
        debug!(stage = %marker, "Running stage");

        let update = match step {
            Step::Structure => self.call(marker, self.agent.analyze_structure(state)).await?,
            Step::Questions => self.call(marker, self.agent.select_questions(state)).await?,
            Step::Answer { question, attempt } => {
                let turn = answer_turn(state, question, attempt, marker)?;
                self.call(marker, self.agent.answer_question(state, &turn))
                    .await?
                    .absorb(
                        StateUpdate::new()
                            .current_question(question)
                            .current_round(turn.round),
                    )
            }
            Step::Verify { question, attempt } => {
                let mut turn = answer_turn(state, question, attempt, marker)?;
                turn.round = state.current_round;
                let answer = latest_answer(state, question).unwrap_or_default();
                self.call(marker, self.agent.verify_answer(state, &turn, &answer))
                    .await?
            }
            Step::Integrate => self
                .call(marker, self.agent.integrate_report(state))
                .await?
                .absorb(StateUpdate::new().completed(true).end_time(Utc::now())),
        };

        self.commit(session, update, marker)
    }

    /// Await one agent call within `llm.timeout_secs`, tagging failures with the stage
    async fn call<T>(
        &self,
        stage: impl ToString,
        future: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let limit = Duration::from_secs(self.config.llm.timeout_secs);
        match tokio::time::timeout(limit, future).await {
            Ok(result) => result.map_err(|e| PaperError::stage(stage, e.to_string())),
            Err(_) => Err(PaperError::stage(
                stage,
                format!("agent call timed out after {}s", limit.as_secs()),
            )),
        }
    }

    /// Merge once, then snapshot
    ///
    /// The session only advances once the snapshot is durable; a failed
    /// write leaves it exactly as it was.
    fn commit(&self, session: &mut Session, update: StateUpdate, marker: StageMarker) -> Result<()> {
        let mut state = session.state.clone();
        let sequence = state.update_sequence + 1;
        merge(&mut state, update.with_sequence(sequence))
            .map_err(|e| PaperError::stage(marker, e.to_string()))?;

        let mut location = session.last_checkpoint.clone();
        if self.config.checkpoint.enabled {
            let snapshot = Snapshot::capture(
                &state,
                marker,
                session.subject.clone(),
                state.is_completed(),
            )?
            .with_source(session.source.clone())
            .with_config(ConfigFingerprint::from_config(&self.config));
            location = Some(self.store.write(&snapshot)?);
        }

        session.state = state;
        session.stage = Some(marker);
        session.last_checkpoint = location;
        Ok(())
    }

    // =========================================================================
    // Follow-up phase
    // =========================================================================

    /// Answer a free-form question against a completed session
    pub async fn ask(&self, session: &Session, question: &str) -> Result<String> {
        self.require_follow_up()?;
        let question = question.trim();
        if question.is_empty() {
            return Err(PaperError::Session("Follow-up question is empty".to_string()));
        }
        if !session.is_completed() {
            return Err(PaperError::Session(
                "Follow-up questions require a completed analysis".to_string(),
            ));
        }
        self.call("follow-up", self.agent.answer_follow_up(&session.state, question))
            .await
    }

    /// Fold follow-up exchanges into the history and rebuild the report
    #[instrument(skip(self, session, exchanges), fields(exchanges = exchanges.len()))]
    pub async fn reintegrate(
        &self,
        session: &mut Session,
        exchanges: &[FollowUpExchange],
    ) -> Result<()> {
        self.require_follow_up()?;
        if exchanges.is_empty() {
            return Ok(());
        }
        let round = session.state.follow_up_rounds + 1;
        let marker = StageMarker::FollowUp { round };

        let dialogue = StateUpdate::new().messages(exchanges.iter().flat_map(|ex| {
            [
                Message::user(&ex.question),
                Message::analyzer(&ex.answer, 0, Topic::FollowUp),
            ]
        }));

        let mut preview = session.state.clone();
        merge(&mut preview, dialogue.clone())?;
        let report = self
            .call(marker, self.agent.integrate_report(&preview))
            .await?;

        let update = dialogue.absorb(report).absorb(
            StateUpdate::new()
                .follow_up_rounds(round)
                .completed(true)
                .end_time(Utc::now()),
        );
        self.commit(session, update, marker)?;
        info!(round, "Report reintegrated with follow-up dialogue");
        Ok(())
    }

    fn require_follow_up(&self) -> Result<()> {
        if !self.config.workflow.enable_follow_up {
            return Err(PaperError::Session(
                "Follow-up questions are disabled (workflow.enable_follow_up)".to_string(),
            ));
        }
        Ok(())
    }

    // =========================================================================
    // Output
    // =========================================================================

    /// Write the final report into the output directory
    pub fn write_report(&self, session: &Session) -> Result<PathBuf> {
        let dir = &self.config.output.dir;
        fs::create_dir_all(dir)?;
        let name = format!(
            "{}{}_{}.md",
            REPORT_PREFIX,
            session.subject,
            Utc::now().format("%Y%m%d_%H%M%S")
        );
        let path = dir.join(name);
        fs::write(&path, &session.state.final_report)?;
        info!(path = %path.display(), "Report saved");
        Ok(path)
    }

    fn prune_opportunistically(&self) {
        if !self.config.checkpoint.auto_cleanup {
            return;
        }
        let policy = RetentionPolicy::from_config(&self.config.checkpoint);
        match RetentionPruner::new(&self.store, policy).prune(None) {
            Ok(report) if report.deleted > 0 => {
                debug!(deleted = report.deleted, "Opportunistic prune finished")
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Checkpoint pruning failed"),
        }
    }
}

fn fingerprint(paper: &Path) -> Option<SourceFingerprint> {
    match SourceFingerprint::of(paper) {
        Ok(fp) => Some(fp),
        Err(e) => {
            warn!(path = %paper.display(), error = %e, "Source fingerprint unavailable");
            None
        }
    }
}

fn answer_turn(state: &RunningState, question: u32, attempt: u32, marker: StageMarker) -> Result<Turn> {
    let text = state
        .question(question)
        .ok_or_else(|| PaperError::stage(marker, format!("question {} was never selected", question)))?;
    let followup = if attempt > 0 {
        state
            .latest_outcome(question)
            .and_then(|o| o.next_followup())
            .map(str::to_string)
    } else {
        None
    };
    Ok(Turn {
        question_id: question,
        attempt,
        round: state.current_round + 1,
        question: text.to_string(),
        followup,
    })
}

fn latest_answer(state: &RunningState, question: u32) -> Option<String> {
    state
        .messages
        .iter()
        .rev()
        .find(|m| m.role == Role::Analyzer && m.topic == Topic::Question(question))
        .map(|m| m.content.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::{Catalog, Selection};
    use crate::pipeline::{PaperAgent, TextLoader};
    use crate::types::{QaPair, VerificationOutcome};
    use async_trait::async_trait;
    use std::sync::Arc;
    use tempfile::TempDir;

    struct ScriptedAgent {
        fail_at: Option<StageMarker>,
        followup_on: Option<u32>,
        stall_structure: bool,
    }

    impl ScriptedAgent {
        fn reliable() -> Self {
            Self {
                fail_at: None,
                followup_on: Some(1),
                stall_structure: false,
            }
        }

        fn check(&self, marker: StageMarker) -> Result<()> {
            if self.fail_at == Some(marker) {
                return Err(PaperError::Agent("scripted failure".to_string()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl PaperAgent for ScriptedAgent {
        async fn analyze_structure(&self, _state: &RunningState) -> Result<StateUpdate> {
            self.check(StageMarker::Structure)?;
            if self.stall_structure {
                std::future::pending::<()>().await;
            }
            Ok(StateUpdate::new()
                .paper_structure("1. Intro 2. Method")
                .message(Message::analyzer("1. Intro 2. Method", 0, Topic::Structure)))
        }

        async fn select_questions(&self, state: &RunningState) -> Result<StateUpdate> {
            self.check(StageMarker::Questions)?;
            let questions: Vec<String> = (1..=state.total_questions)
                .map(|i| format!("Question {}?", i))
                .collect();
            Ok(StateUpdate::new()
                .message(Message::reviewer(questions.join("\n"), 0, Topic::Structure))
                .selected_questions(questions))
        }

        async fn answer_question(&self, _state: &RunningState, turn: &Turn) -> Result<StateUpdate> {
            self.check(StageMarker::Answer {
                question: turn.question_id,
                attempt: turn.attempt,
            })?;
            let content = format!("answer {}.{}", turn.question_id, turn.attempt);
            Ok(StateUpdate::new().message(Message::analyzer(
                content,
                turn.round,
                Topic::Question(turn.question_id),
            )))
        }

        async fn verify_answer(
            &self,
            _state: &RunningState,
            turn: &Turn,
            answer: &str,
        ) -> Result<StateUpdate> {
            self.check(StageMarker::Verification {
                question: turn.question_id,
                attempt: turn.attempt,
            })?;
            let followup = self.followup_on == Some(turn.question_id) && turn.attempt == 0;
            let followup_question = followup.then(|| "Which dataset?".to_string());
            Ok(StateUpdate::new()
                .message(Message::reviewer(
                    format!("checked {}", answer),
                    turn.round,
                    Topic::Question(turn.question_id),
                ))
                .qa_pair(QaPair {
                    question_id: turn.question_id,
                    question: turn.question.clone(),
                    answer: answer.to_string(),
                    verification: "supported".to_string(),
                    is_verified: !followup,
                    followup_needed: followup,
                    followup_question: followup_question.clone(),
                })
                .verification(VerificationOutcome {
                    question_id: turn.question_id,
                    attempt: turn.attempt,
                    verdict: "supported".to_string(),
                    is_verified: !followup,
                    followup_needed: followup,
                    followup_question,
                }))
        }

        async fn integrate_report(&self, state: &RunningState) -> Result<StateUpdate> {
            self.check(StageMarker::Final)?;
            Ok(StateUpdate::new()
                .final_report(format!("report over {} messages", state.messages.len()))
                .message(Message::reviewer("report", 0, Topic::Structure)))
        }

        async fn answer_follow_up(&self, _state: &RunningState, question: &str) -> Result<String> {
            Ok(format!("re: {}", question))
        }
    }

    fn setup(dir: &TempDir) -> (Config, PathBuf) {
        let mut config = Config::default();
        config.checkpoint.dir = dir.path().join("checkpoints");
        config.checkpoint.readable = false;
        config.output.dir = dir.path().join("output");
        config.workflow.num_questions = 2;
        let paper = dir.path().join("2401.00001.txt");
        fs::write(&paper, "Some paper text").unwrap();
        (config, paper)
    }

    fn build_driver(config: &Config, agent: ScriptedAgent) -> PipelineDriver {
        PipelineDriver::new(config.clone(), Arc::new(agent))
    }

    fn stored_stages(driver: &PipelineDriver, subject: &SubjectKey) -> Vec<StageMarker> {
        driver
            .store()
            .files(subject)
            .unwrap()
            .into_iter()
            .map(|f| f.name.stage)
            .collect()
    }

    #[tokio::test]
    async fn test_full_run_snapshots_every_stage() {
        let dir = TempDir::new().unwrap();
        let (config, paper) = setup(&dir);
        let driver = build_driver(&config, ScriptedAgent::reliable());

        let mut session = driver.start_fresh(&paper, &TextLoader).unwrap();
        assert_eq!(session.subject.as_str(), "2401.00001v1");
        driver.run(&mut session).await.unwrap();

        assert_eq!(session.stage, Some(StageMarker::Final));
        assert!(session.state.completed);
        assert!(session.state.end_time.is_some());
        assert_eq!(session.state.messages.len(), 9);
        assert_eq!(session.state.qa_pairs.len(), 3);
        assert_eq!(session.state.verification_results.len(), 3);
        assert_eq!(session.state.update_sequence, 9);
        assert_eq!(session.state.current_question_id, 2);

        assert_eq!(
            stored_stages(&driver, &session.subject),
            vec![
                StageMarker::Structure,
                StageMarker::Questions,
                StageMarker::Answer { question: 1, attempt: 0 },
                StageMarker::Verification { question: 1, attempt: 0 },
                StageMarker::Answer { question: 1, attempt: 1 },
                StageMarker::Verification { question: 1, attempt: 1 },
                StageMarker::Answer { question: 2, attempt: 0 },
                StageMarker::Verification { question: 2, attempt: 0 },
                StageMarker::Final,
            ]
        );

        let latest = driver.store().read(session.last_checkpoint.as_ref().unwrap()).unwrap();
        assert!(latest.completed);
        assert_eq!(latest.restore().unwrap(), session.state);
    }

    #[tokio::test]
    async fn test_followup_budget_is_respected() {
        let dir = TempDir::new().unwrap();
        let (mut config, paper) = setup(&dir);
        config.workflow.max_followups_per_question = 0;
        let driver = build_driver(&config, ScriptedAgent::reliable());

        let mut session = driver.start_fresh(&paper, &TextLoader).unwrap();
        driver.run(&mut session).await.unwrap();

        assert!(!stored_stages(&driver, &session.subject)
            .contains(&StageMarker::Answer { question: 1, attempt: 1 }));
        assert_eq!(session.state.messages.len(), 7);
    }

    #[tokio::test]
    async fn test_failed_stage_writes_nothing_and_resume_appends() {
        let dir = TempDir::new().unwrap();
        let (config, paper) = setup(&dir);
        let failing = build_driver(
            &config,
            ScriptedAgent {
                fail_at: Some(StageMarker::Verification { question: 2, attempt: 0 }),
                ..ScriptedAgent::reliable()
            },
        );

        let mut session = failing.start_fresh(&paper, &TextLoader).unwrap();
        let err = failing.run(&mut session).await.unwrap_err();
        assert!(matches!(err, PaperError::Stage { ref stage, .. } if stage == "q2v0"));
        assert_eq!(session.stage, Some(StageMarker::Answer { question: 2, attempt: 0 }));
        assert_eq!(session.state.update_sequence, 7);
        assert_eq!(stored_stages(&failing, &session.subject).len(), 7);

        let driver = build_driver(&config, ScriptedAgent::reliable());
        let snapshot = Catalog::new(driver.store())
            .select(&session.subject, &Selection::Latest)
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.stage, StageMarker::Answer { question: 2, attempt: 0 });
        let before = snapshot.restore().unwrap().messages;

        let mut resumed = driver.resume(snapshot, &paper, &TextLoader).unwrap();
        assert_eq!(resumed.resume_kind(), ResumeKind::Continue);
        driver.run(&mut resumed).await.unwrap();

        let after = &resumed.state.messages;
        assert_eq!(after.len(), before.len() + 2);
        assert_eq!(&after[..before.len()], &before[..]);
        assert_eq!(after.last().unwrap().content, "report");
        assert_eq!(stored_stages(&driver, &resumed.subject).len(), 9);
    }

    #[tokio::test]
    async fn test_completed_resume_goes_to_follow_up() {
        let dir = TempDir::new().unwrap();
        let (config, paper) = setup(&dir);
        let driver = build_driver(&config, ScriptedAgent::reliable());
        let mut session = driver.start_fresh(&paper, &TextLoader).unwrap();
        driver.run(&mut session).await.unwrap();

        let snapshot = Catalog::new(driver.store())
            .select(&session.subject, &Selection::Latest)
            .unwrap()
            .unwrap();
        let mut resumed = driver.resume(snapshot, &paper, &TextLoader).unwrap();
        assert_eq!(resumed.resume_kind(), ResumeKind::FollowUp);
        driver.run(&mut resumed).await.unwrap();
        assert_eq!(stored_stages(&driver, &resumed.subject).len(), 9);

        let answer = driver.ask(&resumed, "What about ablations?").await.unwrap();
        assert_eq!(answer, "re: What about ablations?");
        assert!(driver.ask(&resumed, "   ").await.is_err());

        let exchange = FollowUpExchange {
            question: "What about ablations?".to_string(),
            answer,
        };
        driver.reintegrate(&mut resumed, &[exchange]).await.unwrap();

        assert_eq!(resumed.stage, Some(StageMarker::FollowUp { round: 1 }));
        assert_eq!(resumed.state.follow_up_rounds, 1);
        assert_eq!(resumed.state.messages.len(), 12);
        assert_eq!(resumed.state.messages[9].role, Role::User);
        assert_eq!(resumed.state.messages[10].topic, Topic::FollowUp);
        assert_eq!(resumed.state.final_report, "report over 11 messages");
        assert_eq!(
            stored_stages(&driver, &resumed.subject).last(),
            Some(&StageMarker::FollowUp { round: 1 })
        );
    }

    #[tokio::test]
    async fn test_stalled_agent_times_out_without_snapshot() {
        let dir = TempDir::new().unwrap();
        let (mut config, paper) = setup(&dir);
        config.llm.timeout_secs = 1;
        let driver = build_driver(
            &config,
            ScriptedAgent {
                stall_structure: true,
                ..ScriptedAgent::reliable()
            },
        );

        let mut session = driver.start_fresh(&paper, &TextLoader).unwrap();
        let err = driver.run(&mut session).await.unwrap_err();
        assert!(matches!(err, PaperError::Stage { ref stage, ref message }
            if stage == "q0a0" && message.contains("timed out")));
        assert_eq!(session.stage, None);
        assert!(stored_stages(&driver, &session.subject).is_empty());
    }

    #[tokio::test]
    async fn test_disabled_follow_up_is_refused() {
        let dir = TempDir::new().unwrap();
        let (mut config, paper) = setup(&dir);
        config.workflow.enable_follow_up = false;
        let driver = build_driver(&config, ScriptedAgent::reliable());
        let mut session = driver.start_fresh(&paper, &TextLoader).unwrap();
        driver.run(&mut session).await.unwrap();

        let err = driver.ask(&session, "What about ablations?").await.unwrap_err();
        assert!(matches!(err, PaperError::Session(_)));

        let exchange = FollowUpExchange {
            question: "q".to_string(),
            answer: "a".to_string(),
        };
        let err = driver.reintegrate(&mut session, &[exchange]).await.unwrap_err();
        assert!(matches!(err, PaperError::Session(_)));
        assert_eq!(session.state.follow_up_rounds, 0);
        assert_eq!(stored_stages(&driver, &session.subject).len(), 9);
    }

    #[tokio::test]
    async fn test_write_failure_propagates_and_session_stays() {
        let dir = TempDir::new().unwrap();
        let (mut config, paper) = setup(&dir);
        let blocker = dir.path().join("not_a_directory");
        fs::write(&blocker, b"").unwrap();

        config.checkpoint.dir = blocker.clone();
        let blocked = build_driver(&config, ScriptedAgent::reliable());
        let mut session = blocked.start_fresh(&paper, &TextLoader).unwrap();
        let err = blocked.run(&mut session).await.unwrap_err();
        assert!(matches!(err, PaperError::Storage(_)));
        assert_eq!(session.stage, None);
        assert!(session.last_checkpoint.is_none());
        assert_eq!(session.state.update_sequence, 0);
        assert!(session.state.messages.is_empty());

        config.checkpoint.dir = dir.path().join("checkpoints");
        let driver = build_driver(&config, ScriptedAgent::reliable());
        let mut session = driver.start_fresh(&paper, &TextLoader).unwrap();
        driver.run(&mut session).await.unwrap();
        let durable = session.last_checkpoint.clone();
        assert!(durable.is_some());

        let blocked = driver.with_store(CheckpointStore::new(&blocker));
        let exchange = FollowUpExchange {
            question: "q".to_string(),
            answer: "a".to_string(),
        };
        assert!(blocked.reintegrate(&mut session, &[exchange]).await.is_err());
        assert_eq!(session.last_checkpoint, durable);
        assert_eq!(session.stage, Some(StageMarker::Final));
        assert_eq!(session.state.follow_up_rounds, 0);
        assert_eq!(session.state.messages.len(), 9);
    }

    #[tokio::test]
    async fn test_disabled_checkpoints_write_nothing() {
        let dir = TempDir::new().unwrap();
        let (mut config, paper) = setup(&dir);
        config.checkpoint.enabled = false;
        let driver = build_driver(&config, ScriptedAgent::reliable());

        let mut session = driver.start_fresh(&paper, &TextLoader).unwrap();
        driver.run(&mut session).await.unwrap();
        assert!(session.last_checkpoint.is_none());
        assert!(stored_stages(&driver, &session.subject).is_empty());

        let report = driver.write_report(&session).unwrap();
        assert_eq!(fs::read_to_string(report).unwrap(), session.state.final_report);
    }

    #[tokio::test]
    async fn test_auto_cleanup_prunes_at_start() {
        let dir = TempDir::new().unwrap();
        let (mut config, paper) = setup(&dir);
        let driver = build_driver(&config, ScriptedAgent::reliable());
        let mut session = driver.start_fresh(&paper, &TextLoader).unwrap();
        driver.run(&mut session).await.unwrap();

        config.checkpoint.auto_cleanup = true;
        config.checkpoint.keep_per_subject = Some(2);
        config.checkpoint.keep_completed = false;
        let pruning = build_driver(&config, ScriptedAgent::reliable());
        pruning.start_fresh(&paper, &TextLoader).unwrap();

        assert_eq!(
            stored_stages(&pruning, &session.subject),
            vec![
                StageMarker::Verification { question: 2, attempt: 0 },
                StageMarker::Final,
            ]
        );
    }
}
