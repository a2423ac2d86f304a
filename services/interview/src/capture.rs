//! Microphone capture backend: cpal input stream feeding windowed
//! transcription requests.
//!
//! The cpal input stream is not `Send`, so `main` builds and holds it; the
//! callback only forwards mono sample chunks over a channel. A long-lived
//! worker task owns the receiving end and, while a capture session is active,
//! batches samples into fixed windows, encodes each window as WAV, and sends
//! it to the transcription endpoint. Each non-empty transcript becomes a
//! `CaptureEvent::Final` with a per-session sequence number.

use crate::config::INPUT_CHUNK_SIZE;
use anyhow::{Context, Result};
use async_trait::async_trait;
use cpal::traits::DeviceTrait;
use cpal::{FrameCount, StreamConfig};
use mockview_core::capture::{CaptureBackend, CaptureEvent};
use mockview_core::error::CaptureError;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::mpsc;

const TRANSCRIPTIONS_URL: &str = "https://api.openai.com/v1/audio/transcriptions";

/// Seconds of audio per transcription window.
const WINDOW_SECS: usize = 4;
/// Windows shorter than this on flush are dropped rather than transcribed.
const MIN_FLUSH_SECS_X10: usize = 5;
/// RMS below which a window is treated as silence and skipped.
const SILENCE_RMS: f32 = 0.004;

/// Builds the microphone input stream. The stream must stay alive on the
/// caller's thread; mono sample chunks arrive on the returned channel for as
/// long as it does.
pub fn build_input(
    device_name: Option<String>,
) -> Result<(mpsc::UnboundedReceiver<Vec<f32>>, u32, cpal::Stream)> {
    let input = mockview_audio::device::get_or_default_input(device_name)
        .context("failed to get audio input device")?;
    tracing::info!("Using input device: {:?}", input.name()?);

    let input_config = input
        .default_input_config()
        .context("failed to get default input config")?;
    let input_config = StreamConfig {
        channels: input_config.channels(),
        sample_rate: input_config.sample_rate(),
        buffer_size: cpal::BufferSize::Fixed(FrameCount::from(INPUT_CHUNK_SIZE as u32)),
    };
    let channel_count = input_config.channels as usize;
    let sample_rate = input_config.sample_rate.0;
    tracing::debug!("Input stream config: {:?}", &input_config);

    let (tx, rx) = mpsc::unbounded_channel::<Vec<f32>>();
    let input_data_fn = move |data: &[f32], _: &cpal::InputCallbackInfo| {
        // Downmix to mono by averaging the channels of each frame.
        let mono: Vec<f32> = data
            .chunks(channel_count)
            .map(|frame| frame.iter().sum::<f32>() / channel_count as f32)
            .collect();
        let _ = tx.send(mono);
    };

    let stream = input.build_input_stream(
        &input_config,
        input_data_fn,
        move |err| tracing::error!("An error occurred on input stream: {}", err),
        None,
    )?;

    Ok((rx, sample_rate, stream))
}

/// Converts one WAV-encoded window of speech into text.
#[async_trait]
pub trait Transcribe: Send + Sync {
    async fn transcribe(&self, wav: Vec<u8>) -> Result<String, CaptureError>;
}

pub struct OpenAiTranscriber {
    client: Client,
    api_key: String,
    model: String,
}

impl OpenAiTranscriber {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

#[async_trait]
impl Transcribe for OpenAiTranscriber {
    async fn transcribe(&self, wav: Vec<u8>) -> Result<String, CaptureError> {
        let part = reqwest::multipart::Part::bytes(wav)
            .file_name("window.wav")
            .mime_str("audio/wav")
            .map_err(|e| CaptureError::Network(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone());

        let response = self
            .client
            .post(TRANSCRIPTIONS_URL)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| CaptureError::Network(e.to_string()))?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED
            || response.status() == reqwest::StatusCode::FORBIDDEN
        {
            return Err(CaptureError::PermissionDenied);
        }
        let response = response
            .error_for_status()
            .map_err(|e| CaptureError::Network(e.to_string()))?;
        let parsed: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| CaptureError::Network(e.to_string()))?;
        Ok(parsed.text)
    }
}

enum Ctl {
    Start(mpsc::Sender<CaptureEvent>),
    Stop,
}

/// Capture backend over the microphone channel and a transcriber.
pub struct MicCapture {
    ctl_tx: mpsc::UnboundedSender<Ctl>,
}

impl MicCapture {
    pub fn new(
        mic_rx: mpsc::UnboundedReceiver<Vec<f32>>,
        sample_rate: u32,
        transcriber: Box<dyn Transcribe>,
    ) -> Self {
        let (ctl_tx, ctl_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_worker(mic_rx, sample_rate, transcriber, ctl_rx));
        Self { ctl_tx }
    }
}

#[async_trait]
impl CaptureBackend for MicCapture {
    async fn start(&mut self, events: mpsc::Sender<CaptureEvent>) -> Result<(), CaptureError> {
        self.ctl_tx
            .send(Ctl::Start(events))
            .map_err(|_| CaptureError::DeviceUnavailable)
    }

    async fn stop(&mut self) {
        let _ = self.ctl_tx.send(Ctl::Stop);
    }
}

struct ActiveSession {
    events: mpsc::Sender<CaptureEvent>,
    seq: u64,
    window: Vec<f32>,
}

async fn run_worker(
    mut mic_rx: mpsc::UnboundedReceiver<Vec<f32>>,
    sample_rate: u32,
    transcriber: Box<dyn Transcribe>,
    mut ctl_rx: mpsc::UnboundedReceiver<Ctl>,
) {
    let window_samples = sample_rate as usize * WINDOW_SECS;
    let min_flush_samples = sample_rate as usize * MIN_FLUSH_SECS_X10 / 10;
    let mut active: Option<ActiveSession> = None;

    loop {
        tokio::select! {
            ctl = ctl_rx.recv() => {
                match ctl {
                    Some(Ctl::Start(events)) => {
                        active = Some(ActiveSession { events, seq: 0, window: Vec::new() });
                    }
                    Some(Ctl::Stop) => {
                        if let Some(mut session) = active.take() {
                            let window = std::mem::take(&mut session.window);
                            if window.len() >= min_flush_samples {
                                transcribe_window(
                                    &*transcriber, sample_rate, window, &mut session,
                                ).await;
                            }
                            let _ = session.events.send(CaptureEvent::Ended).await;
                        }
                    }
                    None => break,
                }
            }
            chunk = mic_rx.recv() => {
                let Some(chunk) = chunk else { break };
                let Some(session) = active.as_mut() else { continue };
                session.window.extend_from_slice(&chunk);
                if session.window.len() >= window_samples {
                    let window = std::mem::take(&mut session.window);
                    let mut session_ref = active.take().expect("session present");
                    let ok = transcribe_window(
                        &*transcriber, sample_rate, window, &mut session_ref,
                    ).await;
                    // An error event ends the session; otherwise keep going.
                    if ok {
                        active = Some(session_ref);
                    }
                }
            }
        }
    }
}

/// Transcribes one window and emits the resulting fragment. Returns false if
/// the session should end (transcription error or a closed consumer).
async fn transcribe_window(
    transcriber: &dyn Transcribe,
    sample_rate: u32,
    window: Vec<f32>,
    session: &mut ActiveSession,
) -> bool {
    if mockview_audio::pcm::rms(&window) < SILENCE_RMS {
        tracing::debug!("skipping silent capture window");
        return true;
    }
    let wav = match mockview_audio::pcm::wav_encode(&window, sample_rate) {
        Ok(wav) => wav,
        Err(e) => {
            tracing::error!("failed to encode capture window: {e:#}");
            let _ = session
                .events
                .send(CaptureEvent::Error(CaptureError::DeviceUnavailable))
                .await;
            return false;
        }
    };

    match transcriber.transcribe(wav).await {
        Ok(text) => {
            let text = text.trim().to_string();
            if text.is_empty() {
                return true;
            }
            let seq = session.seq;
            session.seq += 1;
            session
                .events
                .send(CaptureEvent::Final { seq, text })
                .await
                .is_ok()
        }
        Err(e) => {
            tracing::warn!("transcription failed: {e}");
            let _ = session.events.send(CaptureEvent::Error(e)).await;
            false
        }
    }
}

/// Backend used when no microphone can be driven. Starting it fails
/// immediately, which surfaces as a capture notice and leaves the candidate
/// on the typed-answer path.
pub struct NullCapture {
    error: CaptureError,
}

impl NullCapture {
    /// Audio was disabled on purpose (`--no-audio`).
    pub fn disabled() -> Self {
        Self {
            error: CaptureError::NotSupported,
        }
    }

    /// No usable input device was found.
    pub fn unavailable() -> Self {
        Self {
            error: CaptureError::DeviceUnavailable,
        }
    }
}

#[async_trait]
impl CaptureBackend for NullCapture {
    async fn start(&mut self, _events: mpsc::Sender<CaptureEvent>) -> Result<(), CaptureError> {
        Err(self.error.clone())
    }

    async fn stop(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const RATE: u32 = 16_000;

    struct FakeTranscriber {
        replies: Vec<String>,
        calls: Arc<AtomicUsize>,
        fail_with: Option<CaptureError>,
    }

    #[async_trait]
    impl Transcribe for FakeTranscriber {
        async fn transcribe(&self, _wav: Vec<u8>) -> Result<String, CaptureError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(e) = self.fail_with.clone() {
                return Err(e);
            }
            Ok(self.replies[call.min(self.replies.len() - 1)].clone())
        }
    }

    fn loud_samples(secs: usize) -> Vec<f32> {
        // A constant tone well above the silence threshold.
        vec![0.5; RATE as usize * secs]
    }

    async fn recv_event(rx: &mut mpsc::Receiver<CaptureEvent>) -> CaptureEvent {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for capture event")
            .expect("capture channel closed")
    }

    #[tokio::test]
    async fn full_windows_become_sequenced_fragments() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (mic_tx, mic_rx) = mpsc::unbounded_channel();
        let mut backend = MicCapture::new(
            mic_rx,
            RATE,
            Box::new(FakeTranscriber {
                replies: vec!["first part".into(), "second part".into()],
                calls: calls.clone(),
                fail_with: None,
            }),
        );

        let (events_tx, mut events_rx) = mpsc::channel(16);
        backend.start(events_tx).await.unwrap();
        mic_tx.send(loud_samples(WINDOW_SECS)).unwrap();
        mic_tx.send(loud_samples(WINDOW_SECS)).unwrap();

        assert_eq!(
            recv_event(&mut events_rx).await,
            CaptureEvent::Final { seq: 0, text: "first part".into() }
        );
        assert_eq!(
            recv_event(&mut events_rx).await,
            CaptureEvent::Final { seq: 1, text: "second part".into() }
        );

        backend.stop().await;
        assert_eq!(recv_event(&mut events_rx).await, CaptureEvent::Ended);
    }

    #[tokio::test]
    async fn stop_flushes_a_partial_window() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (mic_tx, mic_rx) = mpsc::unbounded_channel();
        let mut backend = MicCapture::new(
            mic_rx,
            RATE,
            Box::new(FakeTranscriber {
                replies: vec!["tail".into()],
                calls: calls.clone(),
                fail_with: None,
            }),
        );

        let (events_tx, mut events_rx) = mpsc::channel(16);
        backend.start(events_tx).await.unwrap();
        mic_tx.send(loud_samples(2)).unwrap();
        // Give the worker a chance to buffer the chunk before stopping.
        tokio::time::sleep(Duration::from_millis(50)).await;
        backend.stop().await;

        assert_eq!(
            recv_event(&mut events_rx).await,
            CaptureEvent::Final { seq: 0, text: "tail".into() }
        );
        assert_eq!(recv_event(&mut events_rx).await, CaptureEvent::Ended);
    }

    #[tokio::test]
    async fn silent_windows_produce_no_fragments() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (mic_tx, mic_rx) = mpsc::unbounded_channel();
        let mut backend = MicCapture::new(
            mic_rx,
            RATE,
            Box::new(FakeTranscriber {
                replies: vec!["should not appear".into()],
                calls: calls.clone(),
                fail_with: None,
            }),
        );

        let (events_tx, mut events_rx) = mpsc::channel(16);
        backend.start(events_tx).await.unwrap();
        mic_tx.send(vec![0.0; RATE as usize * WINDOW_SECS]).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        backend.stop().await;

        assert_eq!(recv_event(&mut events_rx).await, CaptureEvent::Ended);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn transcription_failure_ends_the_session_with_an_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (mic_tx, mic_rx) = mpsc::unbounded_channel();
        let mut backend = MicCapture::new(
            mic_rx,
            RATE,
            Box::new(FakeTranscriber {
                replies: vec![],
                calls,
                fail_with: Some(CaptureError::Network("connection reset".into())),
            }),
        );

        let (events_tx, mut events_rx) = mpsc::channel(16);
        backend.start(events_tx).await.unwrap();
        mic_tx.send(loud_samples(WINDOW_SECS)).unwrap();

        assert_eq!(
            recv_event(&mut events_rx).await,
            CaptureEvent::Error(CaptureError::Network("connection reset".into()))
        );
    }

    #[tokio::test]
    async fn null_capture_reports_its_failure_category() {
        let (events_tx, _events_rx) = mpsc::channel(4);
        assert_eq!(
            NullCapture::disabled().start(events_tx.clone()).await,
            Err(CaptureError::NotSupported)
        );
        assert_eq!(
            NullCapture::unavailable().start(events_tx).await,
            Err(CaptureError::DeviceUnavailable)
        );
    }
}
