//! Audio playback sink backed by a cpal output stream.
//!
//! The cpal stream itself is not `Send`, so it is built here but owned by
//! `main` for the lifetime of the process; the [`CpalSink`] half that the
//! narrator drives only holds the ring-buffer producer and the shared
//! counters, and can live inside the narrator's sink slot.

use crate::config::{OUTPUT_CHUNK_SIZE, OUTPUT_LATENCY_MS};
use anyhow::{Context, Result};
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FrameCount, StreamConfig};
use mockview_core::error::PlaybackError;
use mockview_core::narrator::{AudioClip, AudioSink};
use ringbuf::traits::{Consumer, Producer, Split};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

pub struct CpalSink {
    producer: ringbuf::HeapProd<f32>,
    pending: Arc<AtomicUsize>,
    discard: Arc<AtomicBool>,
    device_rate: u32,
}

/// Builds the output stream and the sink that feeds it. The returned stream
/// must be kept alive (and stays on the caller's thread); dropping it stops
/// playback.
pub fn build_output(device_name: Option<String>) -> Result<(CpalSink, cpal::Stream)> {
    let output = mockview_audio::device::get_or_default_output(device_name)
        .context("failed to get audio output device")?;
    tracing::info!("Using output device: {:?}", output.name()?);

    let output_config = output
        .default_output_config()
        .context("failed to get default output config")?;
    let output_config = StreamConfig {
        channels: output_config.channels(),
        sample_rate: output_config.sample_rate(),
        buffer_size: cpal::BufferSize::Fixed(FrameCount::from(OUTPUT_CHUNK_SIZE as u32)),
    };
    let channel_count = output_config.channels as usize;
    let device_rate = output_config.sample_rate.0;
    tracing::debug!("Output stream config: {:?}", &output_config);

    let buffer =
        mockview_audio::pcm::shared_buffer(device_rate as usize * OUTPUT_LATENCY_MS / 1000);
    let (producer, mut consumer) = buffer.split();

    let pending = Arc::new(AtomicUsize::new(0));
    let discard = Arc::new(AtomicBool::new(false));
    let cb_pending = pending.clone();
    let cb_discard = discard.clone();

    let output_data_fn = move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
        // A cancelled narration asks for its queued tail to be dropped.
        if cb_discard.load(Ordering::SeqCst) {
            while consumer.try_pop().is_some() {}
            cb_pending.store(0, Ordering::SeqCst);
            cb_discard.store(false, Ordering::SeqCst);
        }

        let mut played = 0usize;
        for frame in data.chunks_mut(channel_count) {
            let sample = match consumer.try_pop() {
                Some(s) => {
                    played += 1;
                    s
                }
                None => 0.0,
            };
            // Duplicate mono onto every channel of the frame.
            for slot in frame.iter_mut() {
                *slot = sample;
            }
        }
        if played > 0 {
            cb_pending.fetch_sub(played.min(cb_pending.load(Ordering::SeqCst)), Ordering::SeqCst);
        }
    };

    let stream = output.build_output_stream(
        &output_config,
        output_data_fn,
        move |err| tracing::error!("An error occurred on output stream: {}", err),
        None,
    )?;
    stream.play()?;

    Ok((
        CpalSink {
            producer,
            pending,
            discard,
            device_rate,
        },
        stream,
    ))
}

impl CpalSink {
    /// Asks the device callback to drop everything still queued, with a
    /// bounded window for it to acknowledge.
    async fn flush(&mut self) {
        self.discard.store(true, Ordering::SeqCst);
        let deadline = tokio::time::Instant::now() + Duration::from_millis(500);
        while self.discard.load(Ordering::SeqCst) {
            if tokio::time::Instant::now() > deadline {
                tracing::warn!("output stream did not acknowledge flush, continuing anyway");
                self.discard.store(false, Ordering::SeqCst);
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl AudioSink for CpalSink {
    async fn play(&mut self, clip: AudioClip) -> Result<(), PlaybackError> {
        let samples =
            mockview_audio::pcm::resample(&clip.samples, clip.sample_rate, self.device_rate)
                .map_err(|e| PlaybackError::Failed(format!("resampling failed: {e:#}")))?;
        if samples.is_empty() {
            return Ok(());
        }

        // Flush whatever a cancelled narration may have left queued.
        self.flush().await;

        self.pending.store(samples.len(), Ordering::SeqCst);
        for &sample in &samples {
            while self.producer.try_push(sample).is_err() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }

        // Resolve once the queued samples have actually been played. The
        // deadline guards against a stalled device; a stall is reported as a
        // failure rather than a hang.
        let max_wait = clip.duration() * 2 + Duration::from_secs(2);
        let deadline = tokio::time::Instant::now() + max_wait;
        while self.pending.load(Ordering::SeqCst) > 0 {
            if tokio::time::Instant::now() > deadline {
                return Err(PlaybackError::Failed(
                    "output stream stalled during narration".into(),
                ));
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        Ok(())
    }

    async fn discard(&mut self) {
        self.flush().await;
    }
}

/// Sink used when audio output is disabled or unavailable; every narration
/// fails as unsupported and the session falls through to capture.
pub struct NullSink;

#[async_trait]
impl AudioSink for NullSink {
    async fn play(&mut self, _clip: AudioClip) -> Result<(), PlaybackError> {
        Err(PlaybackError::Unsupported)
    }
}
