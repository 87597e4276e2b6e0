//! # Transport Channel
//!
//! A reconnectable, message-oriented duplex channel to the remote voice agent.
//!
//! ## How it fits together:
//! - A [`Connector`] performs one dial attempt and hands back a [`Link`]: an outbound
//!   sender and an inbound receiver. The production connector speaks WebSocket.
//! - A [`TransportChannel`] owns a supervisor task that dials, pumps inbound events
//!   and redials after drops, always within a fixed attempt budget.
//! - Everything the channel observes is reported as a [`TransportEvent`] tagged
//!   with the session generation that opened it.
//!
//! ## Retry policy:
//! - Initial open: attempt 1 right away, each further attempt after `recovery_delay`
//! - After a drop: each attempt after `reconnection_delay`
//! - Each phase allows `max_attempts` attempts in total; no exponential backoff
//! - Every attempt is bounded by `connect_timeout`; a timeout counts as a failure
//! - An exhausted budget leaves the channel closed for good

pub mod probe;
pub mod protocol;
pub mod websocket;

use crate::config::RemoteConfig;
use futures_util::future::BoxFuture;
use protocol::{ClientEvent, ServerEvent};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// What a live link reports upward.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    Message(ServerEvent),
    /// The link is gone; carries the reason
    Closed(String),
}

/// One established connection.
///
/// Dropping `outbound` asks the link to flush what is queued and close.
pub struct Link {
    pub outbound: mpsc::UnboundedSender<ClientEvent>,
    pub inbound: mpsc::UnboundedReceiver<LinkEvent>,
}

/// Performs a single connection attempt.
pub trait Connector: Send + Sync {
    fn dial(&self, endpoint: &str) -> BoxFuture<'static, Result<Link, String>>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransportOptions {
    pub connect_timeout: Duration,
    pub max_attempts: u32,
    pub reconnection_delay: Duration,
    pub recovery_delay: Duration,
}

impl From<&RemoteConfig> for TransportOptions {
    fn from(remote: &RemoteConfig) -> Self {
        Self {
            connect_timeout: remote.connect_timeout(),
            max_attempts: remote.reconnection_attempts.max(1),
            reconnection_delay: remote.reconnection_delay(),
            recovery_delay: remote.recovery_delay(),
        }
    }
}

/// Lifecycle and message events emitted by the channel.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connected,
    ConnectError { attempt: u32, message: String },
    ConnectTimeout { attempt: u32 },
    Disconnected { reason: String },
    Reconnecting { attempt: u32 },
    /// The attempt budget ran out; the channel will not try again
    Exhausted { attempts: u32 },
    Message(ServerEvent),
}

pub type TransportEvents = mpsc::UnboundedSender<(u64, TransportEvent)>;

type OutboundSlot = Arc<Mutex<Option<mpsc::UnboundedSender<ClientEvent>>>>;

/// Handle to one session's connection.
pub struct TransportChannel {
    connector: Arc<dyn Connector>,
    endpoint: String,
    options: TransportOptions,
    generation: u64,
    events: TransportEvents,
    outbound: OutboundSlot,
    supervisor: Option<JoinHandle<()>>,
    closed: bool,
}

impl TransportChannel {
    pub fn new(
        connector: Arc<dyn Connector>,
        endpoint: impl Into<String>,
        options: TransportOptions,
        generation: u64,
        events: TransportEvents,
    ) -> Self {
        Self {
            connector,
            endpoint: endpoint.into(),
            options,
            generation,
            events,
            outbound: Arc::new(Mutex::new(None)),
            supervisor: None,
            closed: false,
        }
    }

    /// Start connecting in the background. Opening twice, or after `close`, does nothing.
    pub fn open(&mut self) {
        if self.closed || self.supervisor.is_some() {
            return;
        }

        let supervisor = Supervisor {
            connector: self.connector.clone(),
            endpoint: self.endpoint.clone(),
            options: self.options.clone(),
            generation: self.generation,
            events: self.events.clone(),
            outbound: self.outbound.clone(),
        };
        info!(endpoint = %self.endpoint, generation = self.generation, "Opening transport channel");
        self.supervisor = Some(tokio::spawn(supervisor.run()));
    }

    /// Queue one message. Returns `false` when there is no live link; the message is dropped.
    pub fn send(&self, event: ClientEvent) -> bool {
        let slot = self.outbound.lock().unwrap_or_else(|e| e.into_inner());
        match slot.as_ref() {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.outbound
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|tx| !tx.is_closed())
            .unwrap_or(false)
    }

    /// Cancel any pending attempt or recovery and release the link. Idempotent.
    ///
    /// Messages already queued with `send` are still flushed by the link before it closes.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if let Some(supervisor) = self.supervisor.take() {
            supervisor.abort();
        }
        self.outbound.lock().unwrap_or_else(|e| e.into_inner()).take();
        debug!(generation = self.generation, "Transport channel closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for TransportChannel {
    fn drop(&mut self) {
        self.close();
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Phase {
    Initial,
    Reconnect,
}

struct Supervisor {
    connector: Arc<dyn Connector>,
    endpoint: String,
    options: TransportOptions,
    generation: u64,
    events: TransportEvents,
    outbound: OutboundSlot,
}

impl Supervisor {
    fn emit(&self, event: TransportEvent) {
        let _ = self.events.send((self.generation, event));
    }

    async fn run(self) {
        let mut link = match self.connect(Phase::Initial).await {
            Some(link) => link,
            None => return,
        };

        loop {
            *self.outbound.lock().unwrap_or_else(|e| e.into_inner()) = Some(link.outbound);
            self.emit(TransportEvent::Connected);

            let reason = self.pump(&mut link.inbound).await;
            self.outbound.lock().unwrap_or_else(|e| e.into_inner()).take();
            warn!(reason = %reason, "Transport disconnected");
            self.emit(TransportEvent::Disconnected { reason });

            link = match self.connect(Phase::Reconnect).await {
                Some(link) => link,
                None => return,
            };
        }
    }

    async fn connect(&self, phase: Phase) -> Option<Link> {
        let max = self.options.max_attempts;

        for attempt in 1..=max {
            match phase {
                Phase::Initial if attempt > 1 => tokio::time::sleep(self.options.recovery_delay).await,
                Phase::Initial => {}
                Phase::Reconnect => {
                    tokio::time::sleep(self.options.reconnection_delay).await;
                    self.emit(TransportEvent::Reconnecting { attempt });
                }
            }

            debug!(attempt, max, endpoint = %self.endpoint, "Dialing remote");
            match tokio::time::timeout(self.options.connect_timeout, self.connector.dial(&self.endpoint)).await {
                Ok(Ok(link)) => {
                    info!(attempt, "Transport connected");
                    return Some(link);
                }
                Ok(Err(message)) => {
                    warn!(attempt, max, error = %message, "Connection attempt failed");
                    self.emit(TransportEvent::ConnectError { attempt, message });
                }
                Err(_) => {
                    warn!(attempt, max, timeout_ms = self.options.connect_timeout.as_millis() as u64, "Connection attempt timed out");
                    self.emit(TransportEvent::ConnectTimeout { attempt });
                }
            }
        }

        warn!(attempts = max, "Connection attempts exhausted");
        self.emit(TransportEvent::Exhausted { attempts: max });
        None
    }

    async fn pump(&self, inbound: &mut mpsc::UnboundedReceiver<LinkEvent>) -> String {
        while let Some(event) = inbound.recv().await {
            match event {
                LinkEvent::Message(message) => self.emit(TransportEvent::Message(message)),
                LinkEvent::Closed(reason) => return reason,
            }
        }
        "link ended".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::testing::{DialPlan, MemoryConnector};

    fn options(max_attempts: u32) -> TransportOptions {
        TransportOptions {
            connect_timeout: Duration::from_millis(500),
            max_attempts,
            reconnection_delay: Duration::from_millis(100),
            recovery_delay: Duration::from_millis(200),
        }
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<(u64, TransportEvent)>) -> TransportEvent {
        rx.recv().await.unwrap().1
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_open_retries_until_success() {
        let connector = MemoryConnector::new(vec![DialPlan::Fail, DialPlan::Hang, DialPlan::Accept]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut channel = TransportChannel::new(connector.clone(), "ws://remote/ws", options(3), 4, tx);
        channel.open();

        assert!(matches!(next(&mut rx).await, TransportEvent::ConnectError { attempt: 1, .. }));
        assert_eq!(next(&mut rx).await, TransportEvent::ConnectTimeout { attempt: 2 });
        assert_eq!(next(&mut rx).await, TransportEvent::Connected);
        assert_eq!(connector.dial_count(), 3);
        assert!(channel.send(ClientEvent::StartConversation));

        let mut server = connector.take_server().await;
        assert_eq!(server.recv().await, Some(ClientEvent::StartConversation));
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_exhaustion_is_terminal() {
        let connector = MemoryConnector::new(vec![DialPlan::Fail, DialPlan::Fail]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut channel = TransportChannel::new(connector.clone(), "ws://remote/ws", options(2), 1, tx);
        channel.open();

        assert!(matches!(next(&mut rx).await, TransportEvent::ConnectError { attempt: 1, .. }));
        assert!(matches!(next(&mut rx).await, TransportEvent::ConnectError { attempt: 2, .. }));
        assert_eq!(next(&mut rx).await, TransportEvent::Exhausted { attempts: 2 });
        assert!(!channel.send(ClientEvent::StartConversation));
        assert_eq!(connector.dial_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_after_drop_and_tags_generation() {
        let connector = MemoryConnector::new(vec![DialPlan::Accept, DialPlan::Accept]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut channel = TransportChannel::new(connector.clone(), "ws://remote/ws", options(3), 9, tx);
        channel.open();

        let (generation, event) = rx.recv().await.unwrap();
        assert_eq!((generation, event), (9, TransportEvent::Connected));

        let server = connector.take_server().await;
        server.drop_link("server restart");
        assert_eq!(next(&mut rx).await, TransportEvent::Disconnected { reason: "server restart".to_string() });
        assert!(!channel.send(ClientEvent::EndConversation));
        assert_eq!(next(&mut rx).await, TransportEvent::Reconnecting { attempt: 1 });
        assert_eq!(next(&mut rx).await, TransportEvent::Connected);
        assert!(channel.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_is_idempotent_and_flushes_queued_messages() {
        let connector = MemoryConnector::new(vec![DialPlan::Accept]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut channel = TransportChannel::new(connector.clone(), "ws://remote/ws", options(3), 1, tx);
        channel.open();
        assert_eq!(next(&mut rx).await, TransportEvent::Connected);

        assert!(channel.send(ClientEvent::EndConversation));
        channel.close();
        channel.close();
        assert!(channel.is_closed());
        assert!(!channel.send(ClientEvent::StartConversation));

        let mut server = connector.take_server().await;
        assert_eq!(server.recv().await, Some(ClientEvent::EndConversation));
        assert_eq!(server.recv().await, None);

        // A closed channel cannot be reopened
        channel.open();
        assert_eq!(connector.dial_count(), 1);
    }
}
