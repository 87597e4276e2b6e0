//! # Audio Module
//!
//! Microphone capture and speaker playback for the voice session.
//!
//! ## Key Components:
//! - **Capture** (`capture`): device blocks sliced into fixed-size mono frames
//! - **Playback** (`playback`): sequential queue feeding the output device
//! - **Payload** (`payload`): normalization of the inbound audio shapes
//!
//! ## Backends:
//! Real devices come from `cpal` (the default `backend-cpal` feature). A build with
//! `--no-default-features` still runs the control surface, transport and probe, but
//! starting a session fails with a device error that names the missing feature.
//!
//! ## Device work:
//! Opening a device can block for seconds. Backends do it on their own threads and
//! report the outcome through an [`EventSink`], never by blocking the caller.

pub mod capture;
pub mod payload;
pub mod playback;

use crate::error::SessionError;
use capture::{AudioCapture, CaptureSettings, CaptureSink};
use playback::{AudioPlayback, PlaybackSettings, PlaybackSink};
use tokio::sync::mpsc;

/// Delivery handle given to a device backend for one active period.
///
/// Every event is tagged with the generation of the session that opened the device,
/// so the session can tell late events from a released device apart from live ones.
#[derive(Debug, Clone)]
pub struct EventSink<E> {
    generation: u64,
    tx: mpsc::UnboundedSender<(u64, E)>,
}

impl<E> EventSink<E> {
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<(u64, E)>) -> Self {
        Self { generation, tx }
    }

    /// Returns `false` when nobody is listening anymore.
    pub fn emit(&self, event: E) -> bool {
        self.tx.send((self.generation, event)).is_ok()
    }
}

/// Factory for per-session audio resources.
///
/// The session asks for a fresh capture and playback on every start and drops them
/// on teardown, so device handles never outlive the session that opened them.
pub trait AudioBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn capture(&self) -> Box<dyn AudioCapture>;

    /// Begin opening the output device and return at once. Readiness or failure of the
    /// device arrives later through `sink`; segments rendered before that are held.
    fn playback(&self, settings: &PlaybackSettings, sink: PlaybackSink) -> Result<Box<dyn AudioPlayback>, SessionError>;
}

/// Pick the backend compiled into this binary.
pub fn default_backend() -> std::sync::Arc<dyn AudioBackend> {
    #[cfg(feature = "backend-cpal")]
    {
        std::sync::Arc::new(CpalBackend)
    }
    #[cfg(not(feature = "backend-cpal"))]
    {
        std::sync::Arc::new(unavailable::UnavailableBackend)
    }
}

#[cfg(feature = "backend-cpal")]
pub struct CpalBackend;

#[cfg(feature = "backend-cpal")]
impl AudioBackend for CpalBackend {
    fn name(&self) -> &'static str {
        "cpal"
    }

    fn capture(&self) -> Box<dyn AudioCapture> {
        Box::new(capture::CpalCapture::new())
    }

    fn playback(&self, settings: &PlaybackSettings, sink: PlaybackSink) -> Result<Box<dyn AudioPlayback>, SessionError> {
        Ok(Box::new(playback::CpalPlayback::start(settings.clone(), sink)?))
    }
}

#[cfg(any(test, not(feature = "backend-cpal")))]
mod unavailable {
    use super::*;

    const MISSING_BACKEND: &str = "Audio devices are not available: rebuild with the `backend-cpal` feature";

    /// Stand-in used when no device backend is compiled in.
    pub struct UnavailableBackend;

    struct UnavailableCapture;

    impl AudioCapture for UnavailableCapture {
        fn start(&mut self, _settings: &CaptureSettings, _sink: CaptureSink) -> Result<(), SessionError> {
            Err(SessionError::device(MISSING_BACKEND))
        }

        fn stop(&mut self) {}

        fn is_active(&self) -> bool {
            false
        }
    }

    impl AudioBackend for UnavailableBackend {
        fn name(&self) -> &'static str {
            "unavailable"
        }

        fn capture(&self) -> Box<dyn AudioCapture> {
            Box::new(UnavailableCapture)
        }

        fn playback(&self, _settings: &PlaybackSettings, _sink: PlaybackSink) -> Result<Box<dyn AudioPlayback>, SessionError> {
            Err(SessionError::device(MISSING_BACKEND))
        }
    }
}
