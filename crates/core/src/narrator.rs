//! Speech playback adapter: narrates question text to completion.
//!
//! `Narrator` sits between the session and two platform seams: a
//! [`SpeechSynthesizer`] that turns text into PCM and an [`AudioSink`] that
//! plays it. It guarantees at most one narration in flight (a new `speak`
//! cancels the previous one), maps the logical interviewer voice onto
//! whatever the platform actually offers, tolerates a voice list that
//! populates asynchronously, and memoizes synthesized clips per
//! `(voice, text)` for the lifetime of the adapter instance.

use crate::error::PlaybackError;
use fuzzy_matcher::FuzzyMatcher;
use fuzzy_matcher::skim::SkimMatcherV2;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};

/// Logical interviewer voice chosen once per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Voice {
    Male,
    Female,
}

impl Voice {
    /// Platform voice name this logical voice maps to when available.
    pub fn preferred_name(&self) -> &'static str {
        match self {
            Voice::Male => "onyx",
            Voice::Female => "nova",
        }
    }

    /// Language tag used for the fallback match.
    pub fn language(&self) -> &'static str {
        "en"
    }
}

/// One entry of the platform voice list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceInfo {
    pub name: String,
    pub language: String,
    pub default: bool,
}

/// A synthesized clip of mono PCM samples.
#[derive(Debug, Clone)]
pub struct AudioClip {
    pub sample_rate: u32,
    pub samples: Arc<Vec<f32>>,
}

impl AudioClip {
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }
}

/// Turns text into audio using a named platform voice.
///
/// `voices` may legitimately return an empty list for a while after startup;
/// the narrator polls until it is non-empty rather than synthesizing with no
/// voice assigned.
#[async_trait]
#[cfg_attr(test, automock)]
pub trait SpeechSynthesizer: Send + Sync {
    async fn voices(&self) -> Result<Vec<VoiceInfo>, PlaybackError>;
    async fn synthesize(&self, text: &str, voice: &VoiceInfo)
    -> Result<AudioClip, PlaybackError>;
}

/// Plays a clip to completion.
#[async_trait]
#[cfg_attr(test, automock)]
pub trait AudioSink: Send {
    async fn play(&mut self, clip: AudioClip) -> Result<(), PlaybackError>;

    /// Drops audio already queued but not yet played. No-op for sinks that
    /// do not buffer.
    async fn discard(&mut self) {}
}

/// How long and how often to poll an empty platform voice list.
#[derive(Debug, Clone)]
pub struct VoiceListPolicy {
    pub attempts: u32,
    pub retry_delay: Duration,
}

impl Default for VoiceListPolicy {
    fn default() -> Self {
        Self {
            attempts: 10,
            retry_delay: Duration::from_millis(200),
        }
    }
}

pub struct Narrator {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    sink: Mutex<Box<dyn AudioSink>>,
    cache: Mutex<HashMap<(Voice, String), AudioClip>>,
    current: Mutex<Option<Arc<Notify>>>,
    voice_list_policy: VoiceListPolicy,
    matcher: SkimMatcherV2,
}

impl Narrator {
    pub fn new(synthesizer: Arc<dyn SpeechSynthesizer>, sink: Box<dyn AudioSink>) -> Self {
        Self {
            synthesizer,
            sink: Mutex::new(sink),
            cache: Mutex::new(HashMap::new()),
            current: Mutex::new(None),
            voice_list_policy: VoiceListPolicy::default(),
            matcher: SkimMatcherV2::default(),
        }
    }

    pub fn with_voice_list_policy(mut self, policy: VoiceListPolicy) -> Self {
        self.voice_list_policy = policy;
        self
    }

    /// Narrates `text`, resolving when the audio has finished playing.
    ///
    /// Any narration still in flight is cancelled first and resolves with
    /// `PlaybackError::Interrupted`.
    pub async fn speak(&self, voice: Voice, text: &str) -> Result<(), PlaybackError> {
        let cancel = Arc::new(Notify::new());
        {
            let mut current = self.current.lock().await;
            if let Some(prev) = current.replace(cancel.clone()) {
                prev.notify_one();
            }
        }

        let narration = async {
            let clip = self.clip_for(voice, text).await?;
            let mut sink = self.sink.lock().await;
            sink.play(clip).await
        };

        tokio::select! {
            res = narration => res,
            _ = cancel.notified() => Err(PlaybackError::Interrupted),
        }
    }

    /// Cancels any in-flight narration without starting a new one. Audio the
    /// sink has already queued is discarded rather than left to play out.
    pub async fn cancel(&self) {
        if let Some(active) = self.current.lock().await.take() {
            active.notify_one();
        }
        // The cancelled speak drops the play future and releases the sink.
        self.sink.lock().await.discard().await;
    }

    async fn clip_for(&self, voice: Voice, text: &str) -> Result<AudioClip, PlaybackError> {
        let key = (voice, text.to_owned());
        if let Some(clip) = self.cache.lock().await.get(&key) {
            return Ok(clip.clone());
        }

        let platform_voice = self.resolve_voice(voice).await?;
        let clip = self.synthesizer.synthesize(text, &platform_voice).await?;
        self.cache.lock().await.insert(key, clip.clone());
        Ok(clip)
    }

    /// Best-effort mapping from the logical voice to a platform voice:
    /// name match first, then any voice in the requested language, then the
    /// platform default, then whatever is listed first.
    async fn resolve_voice(&self, voice: Voice) -> Result<VoiceInfo, PlaybackError> {
        let available = self.wait_for_voices().await?;

        let preferred = voice.preferred_name().to_lowercase();
        let by_name = available
            .iter()
            .filter_map(|v| {
                self.matcher
                    .fuzzy_match(&v.name.to_lowercase(), &preferred)
                    .map(|score| (score, v))
            })
            .max_by_key(|(score, _)| *score)
            .map(|(_, v)| v);
        if let Some(v) = by_name {
            return Ok(v.clone());
        }

        if let Some(v) = available
            .iter()
            .find(|v| v.language.to_lowercase().starts_with(voice.language()))
        {
            return Ok(v.clone());
        }

        if let Some(v) = available.iter().find(|v| v.default) {
            return Ok(v.clone());
        }

        // `wait_for_voices` guarantees the list is non-empty here.
        Ok(available[0].clone())
    }

    async fn wait_for_voices(&self) -> Result<Vec<VoiceInfo>, PlaybackError> {
        let policy = &self.voice_list_policy;
        for attempt in 0..policy.attempts {
            let voices = self.synthesizer.voices().await?;
            if !voices.is_empty() {
                return Ok(voices);
            }
            tracing::debug!(attempt, "platform voice list still empty, retrying");
            tokio::time::sleep(policy.retry_delay).await;
        }
        Err(PlaybackError::Failed(
            "platform voice list never populated".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn voice_info(name: &str, language: &str, default: bool) -> VoiceInfo {
        VoiceInfo {
            name: name.to_string(),
            language: language.to_string(),
            default,
        }
    }

    fn clip() -> AudioClip {
        AudioClip {
            sample_rate: 24_000,
            samples: Arc::new(vec![0.0; 240]),
        }
    }

    /// Synthesizer with a scriptable voice list and a synthesis counter.
    struct FakeSynth {
        voice_lists: std::sync::Mutex<Vec<Vec<VoiceInfo>>>,
        synth_calls: AtomicUsize,
        last_voice: std::sync::Mutex<Option<String>>,
    }

    impl FakeSynth {
        fn with_voices(voices: Vec<VoiceInfo>) -> Self {
            Self::with_voice_lists(vec![voices])
        }

        /// Successive `voices()` calls pop from the front; the last list
        /// repeats forever.
        fn with_voice_lists(lists: Vec<Vec<VoiceInfo>>) -> Self {
            Self {
                voice_lists: std::sync::Mutex::new(lists),
                synth_calls: AtomicUsize::new(0),
                last_voice: std::sync::Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl SpeechSynthesizer for FakeSynth {
        async fn voices(&self) -> Result<Vec<VoiceInfo>, PlaybackError> {
            let mut lists = self.voice_lists.lock().unwrap();
            if lists.len() > 1 {
                Ok(lists.remove(0))
            } else {
                Ok(lists[0].clone())
            }
        }

        async fn synthesize(
            &self,
            _text: &str,
            voice: &VoiceInfo,
        ) -> Result<AudioClip, PlaybackError> {
            self.synth_calls.fetch_add(1, Ordering::SeqCst);
            *self.last_voice.lock().unwrap() = Some(voice.name.clone());
            Ok(clip())
        }
    }

    struct InstantSink;

    #[async_trait]
    impl AudioSink for InstantSink {
        async fn play(&mut self, _clip: AudioClip) -> Result<(), PlaybackError> {
            Ok(())
        }
    }

    /// Sink that blocks until cancelled, to exercise interruption.
    struct BlockingSink {
        started: Arc<Notify>,
    }

    #[async_trait]
    impl AudioSink for BlockingSink {
        async fn play(&mut self, _clip: AudioClip) -> Result<(), PlaybackError> {
            self.started.notify_one();
            // Parks until the future is dropped by the narrator's select.
            std::future::pending::<()>().await;
            unreachable!()
        }
    }

    fn fast_policy() -> VoiceListPolicy {
        VoiceListPolicy {
            attempts: 3,
            retry_delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn resolves_preferred_voice_by_name() {
        let synth = Arc::new(FakeSynth::with_voices(vec![
            voice_info("alloy", "en-US", true),
            voice_info("Onyx (en-US)", "en-US", false),
        ]));
        let narrator = Narrator::new(synth.clone(), Box::new(InstantSink));

        narrator.speak(Voice::Male, "What is a container?").await.unwrap();
        assert_eq!(
            synth.last_voice.lock().unwrap().as_deref(),
            Some("Onyx (en-US)")
        );
    }

    #[tokio::test]
    async fn falls_back_to_language_then_default() {
        // No name match: falls back to the first voice in the right language.
        let synth = Arc::new(FakeSynth::with_voices(vec![
            voice_info("stimme-eins", "de-DE", false),
            voice_info("british", "en-GB", false),
        ]));
        let narrator = Narrator::new(synth.clone(), Box::new(InstantSink));
        narrator.speak(Voice::Female, "hello").await.unwrap();
        assert_eq!(synth.last_voice.lock().unwrap().as_deref(), Some("british"));

        // No name or language match: falls back to the platform default.
        let synth = Arc::new(FakeSynth::with_voices(vec![
            voice_info("stimme-eins", "de-DE", false),
            voice_info("stimme-zwei", "de-DE", true),
        ]));
        let narrator = Narrator::new(synth.clone(), Box::new(InstantSink));
        narrator.speak(Voice::Female, "hello").await.unwrap();
        assert_eq!(
            synth.last_voice.lock().unwrap().as_deref(),
            Some("stimme-zwei")
        );
    }

    #[tokio::test]
    async fn defers_until_voice_list_populates() {
        let synth = Arc::new(FakeSynth::with_voice_lists(vec![
            vec![],
            vec![],
            vec![voice_info("nova", "en-US", true)],
        ]));
        let narrator =
            Narrator::new(synth.clone(), Box::new(InstantSink)).with_voice_list_policy(fast_policy());

        narrator.speak(Voice::Female, "hello").await.unwrap();
        assert_eq!(synth.synth_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn voice_list_that_never_populates_fails() {
        let synth = Arc::new(FakeSynth::with_voice_lists(vec![vec![]]));
        let narrator =
            Narrator::new(synth, Box::new(InstantSink)).with_voice_list_policy(fast_policy());

        let err = narrator.speak(Voice::Male, "hello").await.unwrap_err();
        assert!(matches!(err, PlaybackError::Failed(_)));
    }

    #[tokio::test]
    async fn repeated_text_is_synthesized_once() {
        let synth = Arc::new(FakeSynth::with_voices(vec![voice_info(
            "nova", "en-US", true,
        )]));
        let narrator = Narrator::new(synth.clone(), Box::new(InstantSink));

        narrator.speak(Voice::Female, "same question").await.unwrap();
        narrator.speak(Voice::Female, "same question").await.unwrap();
        assert_eq!(synth.synth_calls.load(Ordering::SeqCst), 1);

        // A different voice is a different cache key.
        narrator.speak(Voice::Male, "same question").await.unwrap();
        assert_eq!(synth.synth_calls.load(Ordering::SeqCst), 2);
    }

    /// Sink that plays instantly but counts how often its queue is discarded.
    struct DiscardCountingSink {
        discards: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl AudioSink for DiscardCountingSink {
        async fn play(&mut self, _clip: AudioClip) -> Result<(), PlaybackError> {
            Ok(())
        }

        async fn discard(&mut self) {
            self.discards.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn cancel_discards_audio_queued_in_the_sink() {
        let synth = Arc::new(FakeSynth::with_voices(vec![voice_info(
            "nova", "en-US", true,
        )]));
        let discards = Arc::new(AtomicUsize::new(0));
        let narrator = Narrator::new(
            synth,
            Box::new(DiscardCountingSink {
                discards: discards.clone(),
            }),
        );

        narrator.speak(Voice::Female, "last question").await.unwrap();
        // A cancel with no follow-up narration (skip past the last question,
        // expiry) must still drop whatever the sink has buffered.
        narrator.cancel().await;
        assert_eq!(discards.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn synthesizer_failure_surfaces_as_playback_error() {
        let mut synth = MockSpeechSynthesizer::new();
        synth
            .expect_voices()
            .returning(|| Box::pin(async { Ok(vec![voice_info("nova", "en-US", true)]) }));
        synth.expect_synthesize().returning(|_, _| {
            Box::pin(async { Err(PlaybackError::Failed("synthesis backend down".into())) })
        });

        let narrator = Narrator::new(Arc::new(synth), Box::new(InstantSink));
        let err = narrator.speak(Voice::Female, "hello").await.unwrap_err();
        assert_eq!(err, PlaybackError::Failed("synthesis backend down".into()));
    }

    #[tokio::test]
    async fn new_speak_interrupts_the_one_in_flight() {
        let synth = Arc::new(FakeSynth::with_voices(vec![voice_info(
            "nova", "en-US", true,
        )]));
        let started = Arc::new(Notify::new());
        let narrator = Arc::new(Narrator::new(
            synth,
            Box::new(BlockingSink {
                started: started.clone(),
            }),
        ));

        let first = {
            let narrator = narrator.clone();
            tokio::spawn(async move { narrator.speak(Voice::Female, "first").await })
        };
        // Wait until the first narration actually holds the sink.
        started.notified().await;

        narrator.cancel().await;
        assert_eq!(first.await.unwrap(), Err(PlaybackError::Interrupted));
    }
}
