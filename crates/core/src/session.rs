//! The interview session orchestrator.
//!
//! `InterviewSession` is a single-threaded, event-driven state machine. It
//! never performs I/O itself: entering a phase emits a [`Command`] on the
//! runtime channel, and the runtime feeds the outcome back through one of the
//! `*_finished` / event methods. Every cross-boundary outcome carries the
//! generation counter it was issued under; events from a superseded question
//! (after advance, skip, expiry, or restart) are discarded on arrival.
//!
//! Phase map, with the commands emitted on entry:
//!
//! ```text
//! AwaitingTopics --submit_topics--> (FetchQuestions)
//!   --questions_ready(Ok)--> Narrating (Narrate)
//! Narrating --narration_finished(Ok|Err)--> Capturing (StartCapture)
//! Capturing --submit_answer--> Evaluating (StopCapture, Evaluate)
//! Evaluating --evaluation_finished(Ok)--> ShowingFeedback
//!           --evaluation_finished(Err)--> Capturing (transcript kept)
//! ShowingFeedback --advance--> Narrating | Complete (SessionComplete)
//! any active phase --tick to zero / skip past last--> Complete
//! Complete --restart--> AwaitingTopics
//! ```

use crate::Command;
use crate::error::{
    AnalysisFailed, CaptureError, PlaybackError, QuestionGenerationFailed,
};
use crate::evaluator::{AnswerAnalysis, Sentiment};
use crate::narrator::Voice;
use anyhow::{Context, Result};
use std::time::Duration;
use tokio::sync::mpsc::Sender;

pub const DEFAULT_TIME_BUDGET_SECS: u64 = 15 * 60;
pub const DEFAULT_QUESTION_COUNT: usize = 3;

/// Rating sentinel for answers that were skipped or cut off by expiry.
pub const UNSCORED: f32 = 0.0;

const SKIPPED_JUSTIFICATION: &str = "This question was skipped.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    AwaitingTopics,
    Narrating,
    Capturing,
    Evaluating,
    ShowingFeedback,
    Complete,
}

impl Phase {
    /// Phases during which the session clock runs.
    fn is_timed(&self) -> bool {
        matches!(
            self,
            Phase::Narrating | Phase::Capturing | Phase::Evaluating | Phase::ShowingFeedback
        )
    }
}

/// One evaluated (or skipped) answer. Immutable once appended.
#[derive(Debug, Clone, PartialEq)]
pub struct AnswerRecord {
    pub question_index: usize,
    pub answer: String,
    pub sentiment: Sentiment,
    /// 1..=5, or [`UNSCORED`] for a skipped answer.
    pub quality_rating: f32,
    pub talking_points: Vec<String>,
    pub justification: String,
}

impl AnswerRecord {
    pub fn is_scored(&self) -> bool {
        self.quality_rating > 0.0
    }
}

/// Transient, user-facing notices. Each is recoverable by retry, fallback, or
/// skip; the session never terminates because of one.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    CaptureIssue(CaptureError),
    NarrationIssue(PlaybackError),
    AnalysisFailed(AnalysisFailed),
    QuestionGenerationFailed(QuestionGenerationFailed),
    EmptyAnswer,
}

impl std::fmt::Display for Notice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Notice::CaptureIssue(e) => write!(f, "{e} (you can type your answer instead)"),
            Notice::NarrationIssue(e) => write!(f, "{e} (continuing without narration)"),
            Notice::AnalysisFailed(e) => write!(f, "{e} (your answer is preserved, submit again)"),
            Notice::QuestionGenerationFailed(e) => write!(f, "{e} (try different topics)"),
            Notice::EmptyAnswer => write!(f, "answer is empty, record or type something first"),
        }
    }
}

/// Tunable session behavior. The defaults mirror the product defaults; the
/// narration retry count and time budget are policy, not contract.
#[derive(Debug, Clone)]
pub struct SessionPolicy {
    pub time_budget: Duration,
    pub question_count: usize,
    pub narration_retries: u32,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            time_budget: Duration::from_secs(DEFAULT_TIME_BUDGET_SECS),
            question_count: DEFAULT_QUESTION_COUNT,
            narration_retries: 0,
        }
    }
}

pub struct InterviewSession {
    policy: SessionPolicy,
    phase: Phase,
    topics: Vec<String>,
    voice: Voice,
    questions: Vec<String>,
    current_index: usize,
    results: Vec<AnswerRecord>,
    transcript: String,
    interim: String,
    next_fragment_seq: u64,
    ticks_remaining: u64,
    generation: u64,
    narration_attempts: u32,
    notice: Option<Notice>,
}

impl InterviewSession {
    pub fn new(policy: SessionPolicy) -> Self {
        Self {
            policy,
            phase: Phase::AwaitingTopics,
            topics: Vec::new(),
            voice: Voice::Male,
            questions: Vec::new(),
            current_index: 0,
            results: Vec::new(),
            transcript: String::new(),
            interim: String::new(),
            next_fragment_seq: 0,
            ticks_remaining: 0,
            generation: 0,
            narration_attempts: 0,
            notice: None,
        }
    }

    // --- Read-side accessors -------------------------------------------------

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn questions(&self) -> &[String] {
        &self.questions
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn current_question(&self) -> Option<&str> {
        self.questions.get(self.current_index).map(String::as_str)
    }

    pub fn results(&self) -> &[AnswerRecord] {
        &self.results
    }

    /// The accumulated answer text: finalized capture fragments plus any
    /// manual edits, never interim fragments.
    pub fn transcript(&self) -> &str {
        &self.transcript
    }

    /// Latest provisional fragment, for display only.
    pub fn interim(&self) -> &str {
        &self.interim
    }

    pub fn time_remaining(&self) -> Duration {
        Duration::from_secs(self.ticks_remaining)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Takes the pending transient notice, if any.
    pub fn take_notice(&mut self) -> Option<Notice> {
        self.notice.take()
    }

    /// Average rating across scored results; skipped entries are excluded.
    pub fn average_rating(&self) -> f32 {
        let scored: Vec<f32> = self
            .results
            .iter()
            .filter(|r| r.is_scored())
            .map(|r| r.quality_rating)
            .collect();
        if scored.is_empty() {
            0.0
        } else {
            scored.iter().sum::<f32>() / scored.len() as f32
        }
    }

    // --- Lifecycle -----------------------------------------------------------

    /// Submits the chosen topics and voice and requests questions.
    /// Valid only while awaiting topics; topics must be non-empty.
    pub async fn submit_topics(
        &mut self,
        topics: Vec<String>,
        voice: Voice,
        commands: &Sender<Command>,
    ) -> Result<()> {
        if self.phase != Phase::AwaitingTopics {
            tracing::debug!(?self.phase, "ignoring topic submission outside AwaitingTopics");
            return Ok(());
        }
        let topics: Vec<String> = topics
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        anyhow::ensure!(!topics.is_empty(), "at least one topic is required");

        self.topics = topics.clone();
        self.voice = voice;
        commands
            .send(Command::FetchQuestions {
                topics,
                count: self.policy.question_count,
            })
            .await
            .context("failed to send FetchQuestions command")?;
        Ok(())
    }

    /// Outcome of the question fetch. A shorter-than-requested list is
    /// accepted as long as it is non-empty.
    pub async fn questions_ready(
        &mut self,
        outcome: Result<Vec<String>, QuestionGenerationFailed>,
        commands: &Sender<Command>,
    ) -> Result<()> {
        if self.phase != Phase::AwaitingTopics {
            return Ok(());
        }
        match outcome {
            Ok(questions) if !questions.is_empty() => {
                if questions.len() < self.policy.question_count {
                    tracing::warn!(
                        got = questions.len(),
                        wanted = self.policy.question_count,
                        "question source returned a short list"
                    );
                }
                self.questions = questions;
                self.ticks_remaining = self.policy.time_budget.as_secs();
                self.begin_narration(commands).await
            }
            Ok(_) => {
                self.notice = Some(Notice::QuestionGenerationFailed(
                    QuestionGenerationFailed::new("question source returned no questions"),
                ));
                Ok(())
            }
            Err(e) => {
                tracing::warn!("question generation failed: {e}");
                self.notice = Some(Notice::QuestionGenerationFailed(e));
                Ok(())
            }
        }
    }

    async fn begin_narration(&mut self, commands: &Sender<Command>) -> Result<()> {
        self.phase = Phase::Narrating;
        self.generation += 1;
        self.narration_attempts = 0;
        let text = self
            .current_question()
            .expect("begin_narration requires a current question")
            .to_string();
        commands
            .send(Command::Narrate {
                generation: self.generation,
                voice: self.voice,
                text,
            })
            .await
            .context("failed to send Narrate command")
    }

    /// Outcome of a narration request. Failure is non-fatal: after exhausting
    /// the configured retries the session proceeds to capturing anyway.
    pub async fn narration_finished(
        &mut self,
        generation: u64,
        outcome: Result<(), PlaybackError>,
        commands: &Sender<Command>,
    ) -> Result<()> {
        if generation != self.generation || self.phase != Phase::Narrating {
            tracing::debug!(generation, "ignoring stale narration outcome");
            return Ok(());
        }
        match outcome {
            Ok(()) => self.begin_capture(commands).await,
            Err(PlaybackError::Interrupted) => Ok(()),
            Err(e) => {
                if self.narration_attempts < self.policy.narration_retries {
                    self.narration_attempts += 1;
                    tracing::info!(attempt = self.narration_attempts, "retrying narration: {e}");
                    let text = self
                        .current_question()
                        .expect("narrating requires a current question")
                        .to_string();
                    commands
                        .send(Command::Narrate {
                            generation: self.generation,
                            voice: self.voice,
                            text,
                        })
                        .await
                        .context("failed to send Narrate retry command")
                } else {
                    tracing::warn!("narration failed, continuing to capture: {e}");
                    self.notice = Some(Notice::NarrationIssue(e));
                    self.begin_capture(commands).await
                }
            }
        }
    }

    async fn begin_capture(&mut self, commands: &Sender<Command>) -> Result<()> {
        self.phase = Phase::Capturing;
        self.transcript.clear();
        self.interim.clear();
        self.next_fragment_seq = 0;
        commands
            .send(Command::StartCapture {
                generation: self.generation,
            })
            .await
            .context("failed to send StartCapture command")
    }

    /// Applies a finalized capture fragment. Fragments are concatenated in
    /// arrival order; a replayed or out-of-order sequence number is dropped.
    pub fn final_fragment(&mut self, generation: u64, seq: u64, text: &str) {
        if generation != self.generation || self.phase != Phase::Capturing {
            tracing::debug!(generation, seq, "ignoring stale capture fragment");
            return;
        }
        if seq != self.next_fragment_seq {
            tracing::debug!(
                seq,
                expected = self.next_fragment_seq,
                "dropping duplicate or out-of-order fragment"
            );
            return;
        }
        self.next_fragment_seq = seq + 1;
        self.transcript.push_str(text);
        self.interim.clear();
    }

    /// Applies an interim fragment. Display-only; never part of the answer.
    pub fn interim_fragment(&mut self, generation: u64, text: &str) {
        if generation != self.generation || self.phase != Phase::Capturing {
            return;
        }
        self.interim = text.to_string();
    }

    /// Manual text entry: replaces the transcript wholesale, the same way an
    /// editable text box would. Valid while capturing.
    pub fn set_transcript(&mut self, text: &str) {
        if self.phase != Phase::Capturing {
            return;
        }
        self.transcript = text.to_string();
    }

    /// Manual text entry: appends a typed line to the transcript.
    pub fn append_manual(&mut self, text: &str) {
        if self.phase != Phase::Capturing {
            return;
        }
        if !self.transcript.is_empty() && !self.transcript.ends_with(char::is_whitespace) {
            self.transcript.push(' ');
        }
        self.transcript.push_str(text);
    }

    /// A classified capture failure. `Aborted` is the expected result of an
    /// explicit stop and is swallowed; everything else becomes a notice while
    /// the session stays in `Capturing` for the manual fallback.
    ///
    /// An error ends the backend capture session; a restarted one numbers its
    /// fragments from zero again, so the expected sequence resets here.
    pub fn capture_error(&mut self, generation: u64, error: CaptureError) {
        if generation != self.generation || self.phase != Phase::Capturing {
            return;
        }
        self.next_fragment_seq = 0;
        if error == CaptureError::Aborted {
            return;
        }
        tracing::warn!("capture error: {error}");
        self.notice = Some(Notice::CaptureIssue(error));
    }

    /// The backend ended the capture session (silence timeout, explicit stop,
    /// device teardown). The transcript is kept; fragment numbering resets so
    /// a restarted session within the same question is accepted from seq 0.
    pub fn capture_ended(&mut self, generation: u64) {
        if generation != self.generation || self.phase != Phase::Capturing {
            return;
        }
        self.next_fragment_seq = 0;
        self.interim.clear();
    }

    /// Submits the current transcript for evaluation. Requires a non-empty
    /// trimmed transcript regardless of whether it was spoken or typed.
    pub async fn submit_answer(&mut self, commands: &Sender<Command>) -> Result<()> {
        if self.phase != Phase::Capturing {
            return Ok(());
        }
        let answer = self.transcript.trim().to_string();
        if answer.is_empty() {
            self.notice = Some(Notice::EmptyAnswer);
            return Ok(());
        }
        self.phase = Phase::Evaluating;
        commands
            .send(Command::StopCapture)
            .await
            .context("failed to send StopCapture command")?;
        let question = self
            .current_question()
            .expect("evaluating requires a current question")
            .to_string();
        commands
            .send(Command::Evaluate {
                generation: self.generation,
                question,
                answer,
            })
            .await
            .context("failed to send Evaluate command")
    }

    /// Outcome of an evaluation. On success the result is appended and the
    /// index advanced in the same step, keeping `results.len() ==
    /// current_index` at every quiescent point. On failure the transcript is
    /// preserved and the session returns to `Capturing` for a resubmit.
    pub async fn evaluation_finished(
        &mut self,
        generation: u64,
        outcome: Result<AnswerAnalysis, AnalysisFailed>,
        _commands: &Sender<Command>,
    ) -> Result<()> {
        if generation != self.generation || self.phase != Phase::Evaluating {
            tracing::debug!(generation, "ignoring stale evaluation outcome");
            return Ok(());
        }
        match outcome {
            Ok(analysis) => {
                self.results.push(AnswerRecord {
                    question_index: self.current_index,
                    answer: self.transcript.trim().to_string(),
                    sentiment: analysis.sentiment,
                    quality_rating: analysis.quality_rating.clamp(1.0, 5.0),
                    talking_points: analysis.talking_points,
                    justification: analysis.justification,
                });
                self.current_index += 1;
                self.phase = Phase::ShowingFeedback;
                Ok(())
            }
            Err(e) => {
                tracing::warn!("analysis failed: {e}");
                self.notice = Some(Notice::AnalysisFailed(e));
                // Back to capturing with the transcript intact. Capture is
                // not restarted; the user may resubmit or re-record.
                self.phase = Phase::Capturing;
                Ok(())
            }
        }
    }

    /// The feedback for the most recently answered question.
    pub fn latest_feedback(&self) -> Option<&AnswerRecord> {
        if self.phase == Phase::ShowingFeedback {
            self.results.last()
        } else {
            None
        }
    }

    /// Leaves the feedback view: narrates the next question, or completes the
    /// session when no questions or no time remain.
    pub async fn advance(&mut self, commands: &Sender<Command>) -> Result<()> {
        if self.phase != Phase::ShowingFeedback {
            return Ok(());
        }
        if self.current_index < self.questions.len() && self.ticks_remaining > 0 {
            self.begin_narration(commands).await
        } else {
            self.complete(commands).await
        }
    }

    /// Skips the current question: records an unscored result, cancels any
    /// in-flight narration or capture, and advances. The evaluator is never
    /// invoked for a skipped question.
    pub async fn skip(&mut self, commands: &Sender<Command>) -> Result<()> {
        if !matches!(
            self.phase,
            Phase::Narrating | Phase::Capturing | Phase::Evaluating
        ) {
            return Ok(());
        }
        // Invalidate in-flight adapter work for this question.
        self.generation += 1;
        commands
            .send(Command::CancelNarration)
            .await
            .context("failed to send CancelNarration command")?;
        commands
            .send(Command::StopCapture)
            .await
            .context("failed to send StopCapture command")?;

        self.results.push(AnswerRecord {
            question_index: self.current_index,
            answer: String::new(),
            sentiment: Sentiment::Neutral,
            quality_rating: UNSCORED,
            talking_points: Vec::new(),
            justification: SKIPPED_JUSTIFICATION.to_string(),
        });
        self.current_index += 1;
        self.transcript.clear();
        self.interim.clear();

        if self.current_index < self.questions.len() && self.ticks_remaining > 0 {
            self.begin_narration(commands).await
        } else {
            self.complete(commands).await
        }
    }

    /// One second of session time. Inert outside the timed phases; reaching
    /// zero forces completion from any state, leaving the in-progress
    /// question out of the results.
    pub async fn tick(&mut self, commands: &Sender<Command>) -> Result<()> {
        if !self.phase.is_timed() || self.ticks_remaining == 0 {
            return Ok(());
        }
        self.ticks_remaining -= 1;
        if self.ticks_remaining == 0 {
            tracing::info!("session time budget expired");
            self.generation += 1;
            commands
                .send(Command::CancelNarration)
                .await
                .context("failed to send CancelNarration command")?;
            commands
                .send(Command::StopCapture)
                .await
                .context("failed to send StopCapture command")?;
            self.complete(commands).await?;
        }
        Ok(())
    }

    async fn complete(&mut self, commands: &Sender<Command>) -> Result<()> {
        self.phase = Phase::Complete;
        self.interim.clear();
        commands
            .send(Command::SessionComplete {
                average_rating: self.average_rating(),
            })
            .await
            .context("failed to send SessionComplete command")
    }

    /// Resets to a fresh session awaiting topics. Adapter events from the
    /// previous run are invalidated by the generation bump.
    pub fn restart(&mut self) {
        self.generation += 1;
        self.phase = Phase::AwaitingTopics;
        self.topics.clear();
        self.questions.clear();
        self.current_index = 0;
        self.results.clear();
        self.transcript.clear();
        self.interim.clear();
        self.next_fragment_seq = 0;
        self.ticks_remaining = 0;
        self.narration_attempts = 0;
        self.notice = None;
    }
}
