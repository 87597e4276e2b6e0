//! The session state machine.
//!
//! A single task drains four queues: user commands, transport events, capture events
//! and playback events. Each message is applied completely before the next one is
//! looked at. Device work never runs here: backends open devices on their own threads
//! and report back. Every event carries the generation of the session that produced
//! it; anything from an older generation is discarded.

use super::{SessionCommand, SessionHandle, SessionMetrics, SessionStatus, StatusSnapshot};
use crate::audio::capture::{AudioCapture, CaptureEvent, CaptureSettings, CaptureSink};
use crate::audio::payload::InboundAudioPayload;
use crate::audio::playback::{AudioPlayback, PlaybackEvent, PlaybackSettings, PlaybackSink};
use crate::audio::AudioBackend;
use crate::config::AppConfig;
use crate::device::DeviceSelection;
use crate::error::{ErrorKind, SessionError};
use crate::transport::protocol::{ClientEvent, ServerEvent};
use crate::transport::{Connector, TransportChannel, TransportEvent, TransportOptions};
use chrono::Utc;
use std::sync::{Arc, RwLock};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const COMMAND_QUEUE: usize = 16;
const ACK_SUCCESS: &str = "success";

/// Resources of the conversation in progress.
struct ActiveSession {
    id: Uuid,
    generation: u64,
    config: AppConfig,
    transport: TransportChannel,
    capture: Option<Box<dyn AudioCapture>>,
    playback: Option<Box<dyn AudioPlayback>>,
}

pub struct SessionController {
    config: Arc<RwLock<AppConfig>>,
    connector: Arc<dyn Connector>,
    backend: Arc<dyn AudioBackend>,
    metrics: Arc<SessionMetrics>,
    commands: mpsc::Receiver<SessionCommand>,
    status_tx: watch::Sender<StatusSnapshot>,
    transport_tx: mpsc::UnboundedSender<(u64, TransportEvent)>,
    transport_rx: mpsc::UnboundedReceiver<(u64, TransportEvent)>,
    capture_tx: mpsc::UnboundedSender<(u64, CaptureEvent)>,
    capture_rx: mpsc::UnboundedReceiver<(u64, CaptureEvent)>,
    playback_tx: mpsc::UnboundedSender<(u64, PlaybackEvent)>,
    playback_rx: mpsc::UnboundedReceiver<(u64, PlaybackEvent)>,
    generation: u64,
    snapshot: StatusSnapshot,
    session: Option<ActiveSession>,
}

impl SessionController {
    /// Build a controller and the handle that drives it. Call [`run`](Self::run) on a
    /// task to start processing.
    pub fn new(
        config: Arc<RwLock<AppConfig>>,
        connector: Arc<dyn Connector>,
        backend: Arc<dyn AudioBackend>,
        metrics: Arc<SessionMetrics>,
    ) -> (SessionHandle, Self) {
        let (command_tx, commands) = mpsc::channel(COMMAND_QUEUE);
        let (status_tx, status_rx) = watch::channel(StatusSnapshot::idle());
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let (capture_tx, capture_rx) = mpsc::unbounded_channel();
        let (playback_tx, playback_rx) = mpsc::unbounded_channel();

        let controller = Self {
            config,
            connector,
            backend,
            metrics,
            commands,
            status_tx,
            transport_tx,
            transport_rx,
            capture_tx,
            capture_rx,
            playback_tx,
            playback_rx,
            generation: 0,
            snapshot: StatusSnapshot::idle(),
            session: None,
        };
        (SessionHandle::new(command_tx, status_rx), controller)
    }

    pub async fn run(mut self) {
        info!(backend = self.backend.name(), "Session controller started");

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(SessionCommand::Start { reply }) => {
                        self.handle_start();
                        let _ = reply.send(self.snapshot.clone());
                    }
                    Some(SessionCommand::Stop { reply }) => {
                        self.handle_stop();
                        let _ = reply.send(self.snapshot.clone());
                    }
                    Some(SessionCommand::Shutdown { reply }) => {
                        self.handle_stop();
                        let _ = reply.send(self.snapshot.clone());
                        break;
                    }
                    None => {
                        self.handle_stop();
                        break;
                    }
                },
                Some((generation, event)) = self.transport_rx.recv() => {
                    self.on_transport(generation, event);
                }
                Some((generation, event)) = self.capture_rx.recv() => {
                    self.on_capture(generation, event);
                }
                Some((generation, event)) = self.playback_rx.recv() => {
                    self.on_playback(generation, event);
                }
            }
        }

        info!("Session controller stopped");
    }

    fn publish(&mut self) {
        self.snapshot.updated_at = Utc::now();
        self.status_tx.send_replace(self.snapshot.clone());
    }

    fn set_status(&mut self, status: SessionStatus) {
        if self.snapshot.status != status {
            debug!(from = self.snapshot.status.as_str(), to = status.as_str(), "Session status changed");
        }
        self.snapshot.status = status;
        self.publish();
    }

    /// Record an error without leaving the current session. Most recent wins.
    fn record_error(&mut self, err: SessionError) {
        warn!(kind = err.kind.as_str(), recoverable = err.recoverable, "{}", err.message);
        self.snapshot.last_error = Some(err);
    }

    fn is_current(&self, generation: u64) -> bool {
        self.session
            .as_ref()
            .map(|s| s.generation == generation)
            .unwrap_or(false)
    }

    fn handle_start(&mut self) {
        if self.snapshot.status != SessionStatus::Idle {
            debug!(status = self.snapshot.status.as_str(), "Start ignored, session already in progress");
            return;
        }

        let config = self.config.read().unwrap_or_else(|e| e.into_inner()).clone();
        self.generation += 1;
        let generation = self.generation;
        let id = Uuid::new_v4();
        let endpoint = config.remote.socket_url();

        let mut transport = TransportChannel::new(
            self.connector.clone(),
            endpoint.clone(),
            TransportOptions::from(&config.remote),
            generation,
            self.transport_tx.clone(),
        );
        transport.open();
        SessionMetrics::bump(&self.metrics.sessions_started);

        info!(session_id = %id, generation, endpoint = %endpoint, "Starting voice session");
        self.session = Some(ActiveSession {
            id,
            generation,
            config,
            transport,
            capture: None,
            playback: None,
        });

        self.snapshot.last_error = None;
        self.snapshot.session_id = Some(id);
        self.snapshot.generation = generation;
        self.snapshot.remote_sid = None;
        self.snapshot.started_at = Some(Utc::now());
        self.set_status(SessionStatus::Connecting);
    }

    fn handle_stop(&mut self) {
        if self.session.is_none() {
            debug!("Stop ignored, no session in progress");
            return;
        }
        self.teardown(true, None);
    }

    /// Release everything: capture, playback, then transport.
    ///
    /// `notify_remote` sends `end_conversation` first when the link is up.
    fn teardown(&mut self, notify_remote: bool, error: Option<SessionError>) {
        if let Some(err) = error {
            self.record_error(err);
        }
        let Some(mut session) = self.session.take() else {
            self.publish();
            return;
        };

        self.set_status(SessionStatus::Stopping);

        if notify_remote && session.transport.send(ClientEvent::EndConversation) {
            debug!(session_id = %session.id, "Sent end_conversation");
        }
        if let Some(mut capture) = session.capture.take() {
            capture.stop();
        }
        if let Some(mut playback) = session.playback.take() {
            playback.reset();
        }
        session.transport.close();

        info!(session_id = %session.id, generation = session.generation, "Voice session released");

        self.snapshot.session_id = None;
        self.snapshot.remote_sid = None;
        self.snapshot.started_at = None;
        self.set_status(SessionStatus::Idle);
    }

    fn stop_capture(&mut self) {
        if let Some(session) = self.session.as_mut() {
            if let Some(mut capture) = session.capture.take() {
                capture.stop();
                debug!(session_id = %session.id, "Capture released");
            }
        }
    }

    fn on_transport(&mut self, generation: u64, event: TransportEvent) {
        if !self.is_current(generation) {
            debug!(generation, current = self.generation, "Discarding stale transport event");
            return;
        }

        match event {
            TransportEvent::Connected => {
                if let Some(session) = self.session.as_ref() {
                    if !session.transport.send(ClientEvent::StartConversation) {
                        warn!("Link closed before start_conversation could be sent");
                    }
                }
                self.set_status(SessionStatus::Connecting);
            }
            TransportEvent::ConnectError { attempt, message } => {
                SessionMetrics::bump(&self.metrics.connect_failures);
                self.record_error(SessionError::connect(format!(
                    "Connection attempt {} failed: {}",
                    attempt, message
                )));
                self.set_status(SessionStatus::Error);
            }
            TransportEvent::ConnectTimeout { attempt } => {
                SessionMetrics::bump(&self.metrics.connect_failures);
                self.record_error(SessionError::timeout(format!("Connection attempt {} timed out", attempt)));
                self.set_status(SessionStatus::Error);
            }
            TransportEvent::Disconnected { reason } => {
                self.stop_capture();
                self.record_error(SessionError::connect(format!("Connection lost: {}", reason)));
                self.set_status(SessionStatus::Error);
            }
            TransportEvent::Reconnecting { attempt } => {
                SessionMetrics::bump(&self.metrics.reconnect_attempts);
                info!(attempt, "Reconnecting to voice agent");
            }
            TransportEvent::Exhausted { attempts } => {
                self.teardown(
                    false,
                    Some(SessionError::connect_exhausted(format!(
                        "Could not reach the voice agent after {} attempts",
                        attempts
                    ))),
                );
            }
            TransportEvent::Message(message) => self.on_server_event(message),
        }
    }

    fn on_server_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::ConnectionEstablished { status, sid } => {
                info!(status = %status, sid = ?sid, "Remote acknowledged connection");
                self.snapshot.remote_sid = sid;
                self.publish();
            }
            ServerEvent::ConversationStarted { status } => {
                if status != ACK_SUCCESS {
                    self.teardown(
                        false,
                        Some(SessionError::remote(format!("Conversation could not start: {}", status))),
                    );
                } else if self.snapshot.status == SessionStatus::Connecting {
                    self.activate();
                } else {
                    debug!(status = self.snapshot.status.as_str(), "Ignoring conversation_started");
                }
            }
            ServerEvent::Error { message } => {
                error!(message = %message, "Remote agent reported an error");
                self.teardown(false, Some(SessionError::remote(message)));
            }
            ServerEvent::AudioResponse(payload) => self.render(payload),
            ServerEvent::ConversationEnded { status } => {
                info!(status = %status, "Remote ended the conversation");
            }
            ServerEvent::Unknown { event } => {
                debug!(event = %event, "Ignoring unknown remote event");
            }
        }
    }

    /// Acknowledged: open playback (kept across reconnects) and start capture.
    fn activate(&mut self) {
        let backend = self.backend.clone();
        let capture_tx = self.capture_tx.clone();
        let playback_tx = self.playback_tx.clone();

        let result = match self.session.as_mut() {
            None => return,
            Some(session) => {
                let audio = &session.config.audio;
                let mut outcome = Ok(());

                if session.playback.is_none() {
                    let settings = PlaybackSettings {
                        fallback_sample_rate: audio.fallback_sample_rate,
                        output_device: DeviceSelection::resolve(&audio.output_device),
                    };
                    match backend.playback(&settings, PlaybackSink::new(session.generation, playback_tx)) {
                        Ok(playback) => session.playback = Some(playback),
                        Err(e) => outcome = Err(e),
                    }
                }

                if outcome.is_ok() {
                    let settings = CaptureSettings {
                        frame_size: audio.frame_size,
                        input_device: DeviceSelection::resolve(&audio.input_device),
                    };
                    let mut capture = backend.capture();
                    match capture.start(&settings, CaptureSink::new(session.generation, capture_tx)) {
                        Ok(()) => session.capture = Some(capture),
                        Err(e) => outcome = Err(e),
                    }
                }
                outcome
            }
        };

        match result {
            Ok(()) => {
                info!(session_id = ?self.snapshot.session_id, "Conversation active");
                self.set_status(SessionStatus::Active);
            }
            Err(e) => self.teardown(false, Some(e)),
        }
    }

    fn render(&mut self, payload: InboundAudioPayload) {
        let outcome = match self.session.as_mut().and_then(|s| s.playback.as_mut()) {
            Some(playback) => playback.render(&payload),
            None => {
                debug!(shape = payload.shape(), "No playback context, dropping audio");
                return;
            }
        };

        match outcome {
            Ok(()) => SessionMetrics::bump(&self.metrics.payloads_rendered),
            Err(e) if e.kind == ErrorKind::Decode => {
                SessionMetrics::bump(&self.metrics.decode_errors);
                warn!(shape = payload.shape(), error = %e.message, "Dropping undecodable audio payload");
            }
            Err(e) => self.teardown(false, Some(e)),
        }
    }

    fn on_capture(&mut self, generation: u64, event: CaptureEvent) {
        if !self.is_current(generation) {
            debug!(generation, current = self.generation, "Discarding stale capture event");
            return;
        }

        match event {
            CaptureEvent::Started { sample_rate } => {
                info!(sample_rate, "Microphone capture running");
            }
            CaptureEvent::Frame(frame) => {
                let sent = self.snapshot.status == SessionStatus::Active
                    && self
                        .session
                        .as_ref()
                        .map(|s| s.transport.send(ClientEvent::AudioData(frame.samples)))
                        .unwrap_or(false);
                if sent {
                    SessionMetrics::bump(&self.metrics.frames_sent);
                } else {
                    SessionMetrics::bump(&self.metrics.frames_dropped);
                }
            }
            CaptureEvent::Failed(err) => {
                let holds_capture = self.session.as_ref().map(|s| s.capture.is_some()).unwrap_or(false);
                if holds_capture {
                    self.teardown(false, Some(err));
                } else {
                    debug!(error = %err, "Ignoring failure from released capture");
                }
            }
        }
    }

    fn on_playback(&mut self, generation: u64, event: PlaybackEvent) {
        if !self.is_current(generation) {
            debug!(generation, current = self.generation, "Discarding stale playback event");
            return;
        }

        match event {
            PlaybackEvent::Ready { sample_rate } => {
                info!(sample_rate, "Speaker playback running");
            }
            PlaybackEvent::Failed(err) => {
                let holds_playback = self.session.as_ref().map(|s| s.playback.is_some()).unwrap_or(false);
                if holds_playback {
                    self.teardown(false, Some(err));
                } else {
                    debug!(error = %err, "Ignoring failure from released playback");
                }
            }
        }
    }
}
