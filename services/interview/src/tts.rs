//! Speech synthesis via the OpenAI audio API.

use async_trait::async_trait;
use mockview_core::error::PlaybackError;
use mockview_core::narrator::{AudioClip, SpeechSynthesizer, VoiceInfo};
use reqwest::Client;
use std::sync::Arc;

const SPEECH_URL: &str = "https://api.openai.com/v1/audio/speech";

/// Voices the speech endpoint accepts. The narrator maps the session's
/// logical voice onto one of these by name, so the set only needs to cover
/// the names it prefers plus a default.
const PLATFORM_VOICES: &[(&str, bool)] = &[
    ("alloy", true),
    ("echo", false),
    ("fable", false),
    ("nova", false),
    ("onyx", false),
    ("shimmer", false),
];

pub struct OpenAiSpeech {
    client: Client,
    api_key: String,
    model: String,
}

impl OpenAiSpeech {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model,
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for OpenAiSpeech {
    async fn voices(&self) -> Result<Vec<VoiceInfo>, PlaybackError> {
        // The endpoint's voice set is fixed, so the list is available
        // immediately; the narrator still polls it in case a future backend
        // populates asynchronously.
        Ok(PLATFORM_VOICES
            .iter()
            .map(|(name, default)| VoiceInfo {
                name: name.to_string(),
                language: "en-US".to_string(),
                default: *default,
            })
            .collect())
    }

    async fn synthesize(
        &self,
        text: &str,
        voice: &VoiceInfo,
    ) -> Result<AudioClip, PlaybackError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
            "voice": voice.name,
            "response_format": "pcm"
        });

        let response = self
            .client
            .post(SPEECH_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| PlaybackError::Failed(format!("speech request failed: {e}")))?;
        let response = response
            .error_for_status()
            .map_err(|e| PlaybackError::Failed(format!("speech request rejected: {e}")))?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| PlaybackError::Failed(format!("speech body unreadable: {e}")))?;

        if bytes.is_empty() {
            return Err(PlaybackError::Failed(
                "speech endpoint returned no audio".into(),
            ));
        }

        // The pcm response format is 24 kHz mono PCM16.
        let samples = mockview_audio::pcm::pcm16_bytes_to_f32(&bytes);
        Ok(AudioClip {
            sample_rate: mockview_audio::pcm::TTS_PCM_SAMPLE_RATE,
            samples: Arc::new(samples),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn voice_list_contains_both_preferred_names() {
        let synth = OpenAiSpeech::new("test-key".into(), "tts-1".into());
        let voices = synth.voices().await.unwrap();
        assert!(voices.iter().any(|v| v.name == "onyx"));
        assert!(voices.iter().any(|v| v.name == "nova"));
        assert_eq!(voices.iter().filter(|v| v.default).count(), 1);
    }
}
