//! Speech capture adapter: continuous, incremental speech-to-text.
//!
//! `SpeechCapture` wraps a platform backend and owns the single authoritative
//! "running" flag. Consumers must derive any recording indicator from
//! [`SpeechCapture::is_running`] instead of mirroring their own boolean; the
//! flag is flipped before `start` returns and whenever the backend ends on its
//! own, which closes the race window where two overlapping starts could leave
//! two recognition sessions alive.

use crate::error::CaptureError;
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

/// Incremental output of a capture session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEvent {
    /// A finalized transcript fragment. `seq` increases by one per fragment
    /// within a single capture session; consumers use it to reject replayed
    /// or out-of-order deliveries.
    Final { seq: u64, text: String },
    /// A provisional fragment, for display only. Never persisted.
    Interim { text: String },
    /// The platform ended the session on its own (silence timeout, device
    /// teardown). Not an error.
    Ended,
    Error(CaptureError),
}

/// A platform speech-to-text backend.
///
/// `start` begins streaming recognition; events flow into the provided sender
/// until `stop` is called or the backend ends on its own (signalled with
/// `CaptureEvent::Ended` or an error event). Both calls are made at most once
/// per session by [`SpeechCapture`], which handles idempotency.
#[async_trait]
pub trait CaptureBackend: Send {
    async fn start(&mut self, events: mpsc::Sender<CaptureEvent>) -> Result<(), CaptureError>;
    async fn stop(&mut self);
}

/// Controller enforcing the at-most-one-active-session contract.
pub struct SpeechCapture {
    backend: Box<dyn CaptureBackend>,
    running: Arc<AtomicBool>,
    inner_tx: mpsc::Sender<CaptureEvent>,
}

impl SpeechCapture {
    /// Wraps a backend and returns the controller together with the stream of
    /// capture events, already filtered through the running-flag relay.
    pub fn new(backend: Box<dyn CaptureBackend>) -> (Self, mpsc::Receiver<CaptureEvent>) {
        let (inner_tx, mut inner_rx) = mpsc::channel::<CaptureEvent>(64);
        let (out_tx, out_rx) = mpsc::channel::<CaptureEvent>(64);
        let running = Arc::new(AtomicBool::new(false));

        let relay_flag = running.clone();
        tokio::spawn(async move {
            while let Some(event) = inner_rx.recv().await {
                // Terminal events clear the flag before the consumer sees
                // them, so `is_running` is already accurate when the session
                // reacts to the event.
                if matches!(event, CaptureEvent::Ended | CaptureEvent::Error(_)) {
                    relay_flag.store(false, Ordering::SeqCst);
                }
                if out_tx.send(event).await.is_err() {
                    break;
                }
            }
        });

        (
            Self {
                backend,
                running,
                inner_tx,
            },
            out_rx,
        )
    }

    /// Begins a capture session. A no-op while a session is already active.
    pub async fn start(&mut self) {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::debug!("capture already running, ignoring start");
            return;
        }
        if let Err(e) = self.backend.start(self.inner_tx.clone()).await {
            self.running.store(false, Ordering::SeqCst);
            tracing::warn!("capture backend failed to start: {e}");
            let _ = self.inner_tx.send(CaptureEvent::Error(e)).await;
        }
    }

    /// Ends the active capture session. Idempotent.
    pub async fn stop(&mut self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.backend.stop().await;
    }

    /// Authoritative recording state, readable synchronously.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    /// Backend that records how many times it was started and stopped and
    /// keeps the event sender around so tests can emit fragments.
    struct CountingBackend {
        starts: Arc<AtomicUsize>,
        stops: Arc<AtomicUsize>,
        events: Arc<tokio::sync::Mutex<Option<mpsc::Sender<CaptureEvent>>>>,
        fail_with: Option<CaptureError>,
    }

    impl CountingBackend {
        fn new() -> (Self, Arc<AtomicUsize>, Arc<AtomicUsize>) {
            let starts = Arc::new(AtomicUsize::new(0));
            let stops = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    starts: starts.clone(),
                    stops: stops.clone(),
                    events: Arc::new(tokio::sync::Mutex::new(None)),
                    fail_with: None,
                },
                starts,
                stops,
            )
        }
    }

    #[async_trait]
    impl CaptureBackend for CountingBackend {
        async fn start(
            &mut self,
            events: mpsc::Sender<CaptureEvent>,
        ) -> Result<(), CaptureError> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            if let Some(e) = self.fail_with.clone() {
                return Err(e);
            }
            *self.events.lock().await = Some(events);
            Ok(())
        }

        async fn stop(&mut self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
            if let Some(tx) = self.events.lock().await.take() {
                let _ = tx.send(CaptureEvent::Ended).await;
            }
        }
    }

    #[tokio::test]
    async fn double_start_runs_exactly_one_session() {
        let (backend, starts, _stops) = CountingBackend::new();
        let (mut capture, _events) = SpeechCapture::new(Box::new(backend));

        capture.start().await;
        capture.start().await;

        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert!(capture.is_running());

        // One stop is enough to end it.
        capture.stop().await;
        assert!(!capture.is_running());
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let (backend, _starts, stops) = CountingBackend::new();
        let (mut capture, _events) = SpeechCapture::new(Box::new(backend));

        capture.stop().await;
        assert_eq!(stops.load(Ordering::SeqCst), 0);

        capture.start().await;
        capture.stop().await;
        capture.stop().await;
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn start_failure_clears_running_and_surfaces_error() {
        let (mut backend, _starts, _stops) = CountingBackend::new();
        backend.fail_with = Some(CaptureError::PermissionDenied);
        let (mut capture, mut events) = SpeechCapture::new(Box::new(backend));

        capture.start().await;
        assert!(!capture.is_running());
        assert_eq!(
            events.recv().await,
            Some(CaptureEvent::Error(CaptureError::PermissionDenied))
        );
    }

    #[tokio::test]
    async fn platform_end_clears_running_before_event_is_delivered() {
        let (backend, _starts, _stops) = CountingBackend::new();
        let events_slot = backend.events.clone();
        let (mut capture, mut events) = SpeechCapture::new(Box::new(backend));

        capture.start().await;
        assert!(capture.is_running());

        // Simulate the platform ending the session on its own.
        let tx = events_slot.lock().await.clone().unwrap();
        tx.send(CaptureEvent::Ended).await.unwrap();

        assert_eq!(events.recv().await, Some(CaptureEvent::Ended));
        assert!(!capture.is_running());

        // A fresh session can start afterwards.
        capture.start().await;
        assert!(capture.is_running());
    }
}
