//! Contracts for the two remote collaborators of the orchestrator: the
//! question source and the answer evaluator.
//!
//! These traits are the only seams through which the session logic reaches an
//! LLM. They exist so the state machine can be unit-tested against `mockall`
//! mocks without any network access, and so the service crate can swap
//! providers without touching session code.

use crate::error::{AnalysisFailed, QuestionGenerationFailed};
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};

/// Overall sentiment of an answer as judged by the evaluator.
///
/// The model emits free-form text ("Positive", "negative", ...); parsing is
/// case-insensitive and anything unrecognized collapses to `Neutral`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Negative,
    #[default]
    Neutral,
}

impl Sentiment {
    pub fn parse(text: &str) -> Self {
        match text.trim().to_lowercase().as_str() {
            "positive" => Sentiment::Positive,
            "negative" => Sentiment::Negative,
            _ => Sentiment::Neutral,
        }
    }
}

/// Structured feedback for one (question, answer) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerAnalysis {
    pub sentiment: Sentiment,
    /// 1..=5, where 5 is the highest quality. The sentinel 0 is reserved for
    /// skipped or unscored answers and is never produced by an evaluator.
    #[serde(rename = "qualityRating")]
    pub quality_rating: f32,
    #[serde(rename = "talkingPoints")]
    pub talking_points: Vec<String>,
    pub justification: String,
}

/// Scores a candidate answer against the question it was given for.
///
/// Implementations must be safe to call repeatedly for the same question; the
/// orchestrator retries on failure without discarding the transcript.
#[async_trait]
#[cfg_attr(test, automock)]
pub trait Evaluator: Send + Sync {
    async fn evaluate_answer(
        &self,
        question: &str,
        answer: &str,
    ) -> Result<AnswerAnalysis, AnalysisFailed>;
}

/// Supplies an ordered list of distinct questions for a set of topics.
///
/// A source that cannot meet the requested count returns as many questions as
/// it has rather than failing; the session handles a short list gracefully.
#[async_trait]
#[cfg_attr(test, automock)]
pub trait QuestionSource: Send + Sync {
    async fn generate_questions(
        &self,
        topics: &[String],
        count: usize,
    ) -> Result<Vec<String>, QuestionGenerationFailed>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentiment_parsing_is_case_insensitive_and_defaults_to_neutral() {
        assert_eq!(Sentiment::parse("Positive"), Sentiment::Positive);
        assert_eq!(Sentiment::parse("NEGATIVE"), Sentiment::Negative);
        assert_eq!(Sentiment::parse(" neutral "), Sentiment::Neutral);
        assert_eq!(Sentiment::parse("mixed"), Sentiment::Neutral);
        assert_eq!(Sentiment::parse(""), Sentiment::Neutral);
    }

    #[test]
    fn analysis_deserializes_from_model_field_names() {
        let json = r#"{
            "sentiment": "positive",
            "qualityRating": 4,
            "talkingPoints": ["isolation"],
            "justification": "Solid answer."
        }"#;
        let analysis: AnswerAnalysis = serde_json::from_str(json).unwrap();
        assert_eq!(analysis.sentiment, Sentiment::Positive);
        assert_eq!(analysis.quality_rating, 4.0);
        assert_eq!(analysis.talking_points, vec!["isolation".to_string()]);
    }
}
