//! Core of the mock-interview engine: the session orchestrator and the
//! contracts it drives its collaborators through.
//!
//! The orchestrator ([`session::InterviewSession`]) owns no I/O. It issues
//! [`Command`]s over a channel; a runtime executes them against the speech
//! capture adapter, the narrator, the question source, and the answer
//! evaluator, and feeds outcomes back into the session. The commands that
//! target a specific question carry the session's generation counter so the
//! runtime can tag its replies and the session can discard anything that
//! arrives after that question was left behind.

pub mod capture;
pub mod error;
pub mod evaluator;
pub mod narrator;
pub mod session;

pub use capture::{CaptureBackend, CaptureEvent, SpeechCapture};
pub use error::{AnalysisFailed, CaptureError, PlaybackError, QuestionGenerationFailed};
pub use evaluator::{AnswerAnalysis, Evaluator, QuestionSource, Sentiment};
pub use narrator::{AudioClip, AudioSink, Narrator, SpeechSynthesizer, Voice, VoiceInfo};
pub use session::{AnswerRecord, InterviewSession, Notice, Phase, SessionPolicy};

/// Side effects the session requests from the runtime.
#[derive(Debug, Clone)]
pub enum Command {
    /// Fetch an ordered question list for the chosen topics.
    FetchQuestions { topics: Vec<String>, count: usize },
    /// Narrate the given question text; report back with
    /// [`session::InterviewSession::narration_finished`] under `generation`.
    Narrate {
        generation: u64,
        voice: narrator::Voice,
        text: String,
    },
    /// Cancel any narration still in flight (question switch or expiry).
    CancelNarration,
    /// Begin a capture session; fragment events are tagged with `generation`.
    StartCapture { generation: u64 },
    /// End the capture session, if one is active.
    StopCapture,
    /// Score the answer; report back with
    /// [`session::InterviewSession::evaluation_finished`] under `generation`.
    Evaluate {
        generation: u64,
        question: String,
        answer: String,
    },
    /// The session reached its terminal state.
    SessionComplete { average_rating: f32 },
}
