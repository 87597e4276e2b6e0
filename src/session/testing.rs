//! In-memory connector and audio backend for driving the session in tests.

use super::controller::SessionController;
use super::{SessionHandle, SessionMetrics};
use crate::audio::capture::{AudioCapture, AudioFrame, CaptureEvent, CaptureSettings, CaptureSink};
use crate::audio::payload::{self, DecodedAudio, InboundAudioPayload};
use crate::audio::playback::{AudioPlayback, PlaybackEvent, PlaybackSettings, PlaybackSink};
use crate::audio::AudioBackend;
use crate::config::AppConfig;
use crate::error::SessionError;
use crate::transport::protocol::{ClientEvent, ServerEvent};
use crate::transport::{Connector, Link, LinkEvent};
use futures_util::future::BoxFuture;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;

/// Outcome of one dial attempt, consumed in order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DialPlan {
    Fail,
    /// Never completes; the channel's connect timeout fires
    Hang,
    Accept,
}

/// The remote end of an accepted link.
pub struct ServerSide {
    from_client: mpsc::UnboundedReceiver<ClientEvent>,
    to_client: mpsc::UnboundedSender<LinkEvent>,
}

impl ServerSide {
    /// Next client message, or `None` once the client released the link.
    pub async fn recv(&mut self) -> Option<ClientEvent> {
        self.from_client.recv().await
    }

    pub fn send(&self, event: ServerEvent) {
        let _ = self.to_client.send(LinkEvent::Message(event));
    }

    pub fn drop_link(&self, reason: &str) {
        let _ = self.to_client.send(LinkEvent::Closed(reason.to_string()));
    }

    pub fn raw(&self, event: LinkEvent) {
        let _ = self.to_client.send(event);
    }
}

pub struct MemoryConnector {
    plans: Mutex<VecDeque<DialPlan>>,
    dials: AtomicUsize,
    servers_tx: mpsc::UnboundedSender<ServerSide>,
    servers_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<ServerSide>>,
}

impl MemoryConnector {
    pub fn new(plans: Vec<DialPlan>) -> Arc<Self> {
        let (servers_tx, servers_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            plans: Mutex::new(plans.into()),
            dials: AtomicUsize::new(0),
            servers_tx,
            servers_rx: tokio::sync::Mutex::new(servers_rx),
        })
    }

    pub fn dial_count(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }

    /// Server side of the next accepted link, in accept order.
    pub async fn take_server(&self) -> ServerSide {
        self.servers_rx.lock().await.recv().await.expect("connector dropped")
    }
}

impl Connector for MemoryConnector {
    fn dial(&self, _endpoint: &str) -> BoxFuture<'static, Result<Link, String>> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        let plan = self.plans.lock().unwrap().pop_front();

        match plan {
            Some(DialPlan::Accept) => {
                let (out_tx, out_rx) = mpsc::unbounded_channel();
                let (in_tx, in_rx) = mpsc::unbounded_channel();
                let _ = self.servers_tx.send(ServerSide { from_client: out_rx, to_client: in_tx });
                Box::pin(async move { Ok(Link { outbound: out_tx, inbound: in_rx }) })
            }
            Some(DialPlan::Hang) => Box::pin(std::future::pending()),
            Some(DialPlan::Fail) | None => Box::pin(async { Err("connection refused".to_string()) }),
        }
    }
}

#[derive(Default)]
struct MockState {
    capture_starts: AtomicUsize,
    live_captures: AtomicUsize,
    playbacks_created: AtomicUsize,
    live_playbacks: AtomicUsize,
    rendered: Mutex<Vec<DecodedAudio>>,
    sink: Mutex<Option<CaptureSink>>,
}

/// Audio backend that records what the session does with it.
#[derive(Default)]
pub struct MockAudio {
    state: Arc<MockState>,
    /// Capture start succeeds, then reports a failure through the sink
    pub fail_capture: Arc<AtomicBool>,
    /// Playback start succeeds, then the device reports a failure through the sink
    pub fail_playback: Arc<AtomicBool>,
}

impl MockAudio {
    pub fn capture_starts(&self) -> usize {
        self.state.capture_starts.load(Ordering::SeqCst)
    }

    pub fn live_captures(&self) -> usize {
        self.state.live_captures.load(Ordering::SeqCst)
    }

    pub fn playbacks_created(&self) -> usize {
        self.state.playbacks_created.load(Ordering::SeqCst)
    }

    pub fn live_playbacks(&self) -> usize {
        self.state.live_playbacks.load(Ordering::SeqCst)
    }

    pub fn rendered(&self) -> Vec<DecodedAudio> {
        self.state.rendered.lock().unwrap().clone()
    }

    /// Sink of the capture currently running, if any.
    pub fn sink(&self) -> Option<CaptureSink> {
        self.state.sink.lock().unwrap().clone()
    }

    /// Pretend the microphone produced a frame. `false` when no capture is running.
    pub fn emit_frame(&self, samples: Vec<f32>) -> bool {
        match self.sink() {
            Some(sink) => sink.emit(CaptureEvent::Frame(AudioFrame { sequence: 0, sample_rate: 16000, samples })),
            None => false,
        }
    }
}

struct MockCapture {
    state: Arc<MockState>,
    fail: bool,
    active: bool,
}

impl AudioCapture for MockCapture {
    fn start(&mut self, _settings: &CaptureSettings, sink: CaptureSink) -> Result<(), SessionError> {
        self.state.capture_starts.fetch_add(1, Ordering::SeqCst);
        self.state.live_captures.fetch_add(1, Ordering::SeqCst);
        self.active = true;
        if self.fail {
            sink.emit(CaptureEvent::Failed(SessionError::device("Microphone permission denied")));
        } else {
            *self.state.sink.lock().unwrap() = Some(sink);
        }
        Ok(())
    }

    fn stop(&mut self) {
        if self.active {
            self.active = false;
            self.state.live_captures.fetch_sub(1, Ordering::SeqCst);
            self.state.sink.lock().unwrap().take();
        }
    }

    fn is_active(&self) -> bool {
        self.active
    }
}

struct MockPlayback {
    state: Arc<MockState>,
    fallback_rate: u32,
    released: bool,
}

impl AudioPlayback for MockPlayback {
    fn render(&mut self, payload: &InboundAudioPayload) -> Result<(), SessionError> {
        let decoded = payload::decode(payload, self.fallback_rate)?;
        self.state.rendered.lock().unwrap().push(decoded);
        Ok(())
    }

    fn reset(&mut self) {
        if !self.released {
            self.released = true;
            self.state.live_playbacks.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl AudioBackend for MockAudio {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn capture(&self) -> Box<dyn AudioCapture> {
        Box::new(MockCapture {
            state: self.state.clone(),
            fail: self.fail_capture.load(Ordering::SeqCst),
            active: false,
        })
    }

    fn playback(&self, settings: &PlaybackSettings, sink: PlaybackSink) -> Result<Box<dyn AudioPlayback>, SessionError> {
        self.state.playbacks_created.fetch_add(1, Ordering::SeqCst);
        self.state.live_playbacks.fetch_add(1, Ordering::SeqCst);
        if self.fail_playback.load(Ordering::SeqCst) {
            sink.emit(PlaybackEvent::Failed(SessionError::device("Output device unplugged")));
        } else {
            sink.emit(PlaybackEvent::Ready { sample_rate: 48000 });
        }
        Ok(Box::new(MockPlayback {
            state: self.state.clone(),
            fallback_rate: settings.fallback_sample_rate,
            released: false,
        }))
    }
}

/// A running controller wired to the in-memory connector and mock audio.
pub struct Harness {
    pub config: Arc<RwLock<AppConfig>>,
    pub handle: SessionHandle,
    pub connector: Arc<MemoryConnector>,
    pub audio: Arc<MockAudio>,
    pub metrics: Arc<SessionMetrics>,
}

impl Harness {
    pub fn spawn(plans: Vec<DialPlan>, max_attempts: u32) -> Self {
        let mut config = AppConfig::default();
        config.remote.reconnection_attempts = max_attempts;

        let connector = MemoryConnector::new(plans);
        let audio = Arc::new(MockAudio::default());
        let metrics = Arc::new(SessionMetrics::default());
        let config = Arc::new(RwLock::new(config));
        let (handle, controller) = SessionController::new(
            config.clone(),
            connector.clone(),
            audio.clone(),
            metrics.clone(),
        );
        tokio::spawn(controller.run());

        Self { config, handle, connector, audio, metrics }
    }
}

/// Poll `condition` until it holds, letting other tasks run in between.
pub async fn eventually(condition: impl Fn() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition was not met in time");
}
