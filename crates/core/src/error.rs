//! Error taxonomy for the interview session engine.
//!
//! Every failure an adapter or client can produce is converted into one of
//! these categories at the orchestrator boundary; nothing here is fatal to the
//! session. Raw transport errors never cross into session state.

use thiserror::Error;

/// Failures reported by a speech capture backend.
///
/// `Aborted` is raised when a capture session is torn down by an explicit
/// `stop()` and is never surfaced to the user.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    #[error("speech capture is not supported on this platform")]
    NotSupported,
    #[error("microphone permission was denied")]
    PermissionDenied,
    #[error("no speech was detected")]
    NoSpeech,
    #[error("audio capture device is unavailable")]
    DeviceUnavailable,
    #[error("network error during speech recognition: {0}")]
    Network(String),
    #[error("capture was aborted")]
    Aborted,
}

/// Failures reported by the narration path (synthesis or playback).
///
/// `Interrupted` marks a narration cancelled by a superseding `speak()` or a
/// question switch; like `CaptureError::Aborted` it is expected during normal
/// operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlaybackError {
    #[error("speech playback is not supported on this platform")]
    Unsupported,
    #[error("speech playback failed: {0}")]
    Failed(String),
    #[error("narration was interrupted")]
    Interrupted,
}

/// The single user-facing failure category of the answer evaluator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to analyze the answer: {reason}")]
pub struct AnalysisFailed {
    pub reason: String,
}

impl AnalysisFailed {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// The single user-facing failure category of the question source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to generate interview questions: {reason}")]
pub struct QuestionGenerationFailed {
    pub reason: String,
}

impl QuestionGenerationFailed {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}
