//! OpenAI-backed implementations of the question source and answer evaluator
//! contracts.
//!
//! Separating these behind the `mockview-core` traits keeps the session logic
//! free of provider detail; swapping in a different chat-completion provider
//! only touches this module.

use anyhow::{Context, Result};
use async_trait::async_trait;
use mockview_core::error::{AnalysisFailed, QuestionGenerationFailed};
use mockview_core::evaluator::{AnswerAnalysis, Evaluator, QuestionSource, Sentiment};
use reqwest::Client;
use serde::Deserialize;

const CHAT_COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Canned questions used when the model produces an empty list. Generation is
/// best-effort; an empty result should not strand the candidate at the topic
/// screen.
const FALLBACK_QUESTIONS: &[&str] = &[
    "Tell me about a challenging technical problem you solved recently.",
    "Describe your experience with version control systems like Git.",
    "How do you approach learning a new technology?",
];

#[derive(Debug, Deserialize)]
struct LlmResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct Message {
    content: String,
}

pub struct LlmClient {
    client: Client,
    api_key: String,
    model: String,
}

impl LlmClient {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model,
        }
    }

    async fn chat(&self, body: serde_json::Value) -> Result<String> {
        let resp = self
            .client
            .post(CHAT_COMPLETIONS_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json::<LlmResponse>()
            .await?;

        let answer = resp
            .choices
            .first()
            .context("no response from LLM")?
            .message
            .content
            .clone();
        Ok(answer)
    }
}

#[async_trait]
impl QuestionSource for LlmClient {
    async fn generate_questions(
        &self,
        topics: &[String],
        count: usize,
    ) -> Result<Vec<String>, QuestionGenerationFailed> {
        let topic_list = topics.join(", ");
        let prompt = format!(
            r#"You are an expert technical interviewer.
Generate {count} challenging and relevant interview questions based on the following topics: {topic_list}.
The questions should be suitable for a mid-level software engineer.
Do not repeat questions.

Respond STRICTLY as JSON:
{{"questions": ["<question>", ...]}}

Do NOT add any explanation, just the JSON."#
        );

        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "user", "content": prompt }
            ],
            "response_format": { "type": "json_object" },
            "temperature": 0.7
        });

        let content = self
            .chat(body)
            .await
            .map_err(|e| QuestionGenerationFailed::new(format!("{e:#}")))?;

        let questions = parse_questions(&content, count)
            .map_err(|e| QuestionGenerationFailed::new(format!("{e:#}")))?;

        if questions.is_empty() {
            tracing::warn!("model returned no questions, using the fallback set");
            return Ok(FALLBACK_QUESTIONS
                .iter()
                .take(count.max(1))
                .map(|q| q.to_string())
                .collect());
        }
        Ok(questions)
    }
}

#[async_trait]
impl Evaluator for LlmClient {
    async fn evaluate_answer(
        &self,
        question: &str,
        answer: &str,
    ) -> Result<AnswerAnalysis, AnalysisFailed> {
        let prompt = format!(
            r#"You are an expert interview analyst. Analyze the candidate's answer to the following question.

Question: "{question}"

Answer: "{answer}"

Determine the sentiment of the answer, rate the quality of the answer on a scale of 1 to 5 (where 5 is excellent), and extract the key talking points.
Then, provide a detailed, conversational justification for this analysis. Explain why you gave the rating you did, referencing the talking points and the candidate's answer. Speak directly to the candidate.

Respond STRICTLY as JSON:
{{"sentiment": "<positive|negative|neutral>", "qualityRating": <1-5>, "talkingPoints": ["<point>", ...], "justification": "<text>"}}

Do NOT add any explanation, just the JSON."#
        );

        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "user", "content": prompt }
            ],
            "response_format": { "type": "json_object" },
            "temperature": 0.2
        });

        let content = self
            .chat(body)
            .await
            .map_err(|e| AnalysisFailed::new(format!("{e:#}")))?;

        parse_analysis(&content).map_err(|e| AnalysisFailed::new(format!("{e:#}")))
    }
}

/// Parses the question-generation JSON, de-duplicating while preserving order
/// and trimming to the requested count.
fn parse_questions(content: &str, count: usize) -> Result<Vec<String>> {
    let value: serde_json::Value =
        serde_json::from_str(content).context("LLM question output is not valid JSON")?;
    let raw = value
        .get("questions")
        .and_then(|q| q.as_array())
        .context("LLM question output is missing a 'questions' array")?;

    let mut seen = std::collections::HashSet::new();
    let mut questions = Vec::new();
    for entry in raw {
        let Some(text) = entry.as_str() else { continue };
        let text = text.trim();
        if text.is_empty() {
            continue;
        }
        if seen.insert(text.to_lowercase()) {
            questions.push(text.to_string());
        }
        if questions.len() == count {
            break;
        }
    }
    Ok(questions)
}

/// Parses the analysis JSON, tolerating a free-form sentiment string and an
/// out-of-range rating.
fn parse_analysis(content: &str) -> Result<AnswerAnalysis> {
    let value: serde_json::Value =
        serde_json::from_str(content).context("LLM analysis output is not valid JSON")?;

    let sentiment = Sentiment::parse(value.get("sentiment").and_then(|s| s.as_str()).unwrap_or(""));
    let quality_rating = value
        .get("qualityRating")
        .and_then(|r| r.as_f64())
        .context("LLM analysis output is missing 'qualityRating'")?
        .clamp(1.0, 5.0) as f32;
    let talking_points = value
        .get("talkingPoints")
        .and_then(|t| t.as_array())
        .map(|points| {
            points
                .iter()
                .filter_map(|p| p.as_str())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    let justification = value
        .get("justification")
        .and_then(|j| j.as_str())
        .context("LLM analysis output is missing 'justification'")?
        .to_string();

    Ok(AnswerAnalysis {
        sentiment,
        quality_rating,
        talking_points,
        justification,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn questions_are_deduplicated_and_trimmed_to_count() {
        let content = r#"{"questions": [
            "What is Docker?",
            "what is docker?",
            "  ",
            "Explain image layering.",
            "Describe networking between containers."
        ]}"#;
        let questions = parse_questions(content, 2).unwrap();
        assert_eq!(
            questions,
            vec!["What is Docker?".to_string(), "Explain image layering.".to_string()]
        );
    }

    #[test]
    fn missing_questions_array_is_an_error() {
        assert!(parse_questions(r#"{"items": []}"#, 3).is_err());
        assert!(parse_questions("not json", 3).is_err());
    }

    #[test]
    fn analysis_parsing_clamps_rating_and_normalizes_sentiment() {
        let content = r#"{
            "sentiment": "Very Positive",
            "qualityRating": 9,
            "talkingPoints": ["isolation", "images"],
            "justification": "Great depth."
        }"#;
        let analysis = parse_analysis(content).unwrap();
        // Unrecognized sentiment wording collapses to neutral.
        assert_eq!(analysis.sentiment, Sentiment::Neutral);
        assert_eq!(analysis.quality_rating, 5.0);
        assert_eq!(analysis.talking_points.len(), 2);
    }

    #[test]
    fn analysis_without_a_rating_is_an_error() {
        let content = r#"{"sentiment": "positive", "justification": "ok"}"#;
        assert!(parse_analysis(content).is_err());
    }

    // This is an integration test that makes a live call to the OpenAI API.
    // It is ignored by default to allow `cargo test` to run without requiring
    // a live API key. To run it, use `cargo test -- --ignored`.
    #[tokio::test]
    #[ignore]
    async fn live_generate_questions_for_docker() {
        dotenvy::dotenv_override().ok();
        let api_key = env::var("OPENAI_API_KEY").expect("OPENAI_API_KEY not set");
        let client = LlmClient::new(api_key, "gpt-4o".to_string());

        let questions = client
            .generate_questions(&["docker".to_string()], 3)
            .await
            .expect("generate_questions failed");
        assert!(!questions.is_empty());
        assert!(questions.len() <= 3);
    }

    // This is an integration test. See the note on
    // `live_generate_questions_for_docker`.
    #[tokio::test]
    #[ignore]
    async fn live_evaluate_answer() {
        dotenvy::dotenv_override().ok();
        let api_key = env::var("OPENAI_API_KEY").expect("OPENAI_API_KEY not set");
        let client = LlmClient::new(api_key, "gpt-4o".to_string());

        let analysis = client
            .evaluate_answer(
                "What is a container?",
                "A container is an isolated process sharing the host kernel, \
                 packaged with its filesystem and dependencies.",
            )
            .await
            .expect("evaluate_answer failed");
        assert!((1.0..=5.0).contains(&analysis.quality_rating));
        assert!(!analysis.justification.is_empty());
    }
}
