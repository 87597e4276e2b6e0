//! # Voice Session
//!
//! The session state machine and the handle used to drive it.
//!
//! ## Architecture:
//! - One [`controller::SessionController`] task owns every resource of the current
//!   conversation (transport, capture, playback) and applies one transition at a time.
//! - Any number of cloned [`SessionHandle`]s send it commands and read its status.
//! - Status is published through a `tokio::sync::watch` channel, so readers always see
//!   the latest snapshot without ever blocking the controller.
//!
//! ## Lifecycle:
//! ```text
//! Idle ──start──▶ Connecting ──ack──▶ Active
//!                   │   ▲               │
//!            error  ▼   │ reconnected   │ drop
//!                  Error ◀──────────────┘
//! any non-Idle ──stop / fatal──▶ Stopping ──▶ Idle
//! ```

pub mod controller;
#[cfg(test)]
pub mod testing;

use crate::error::SessionError;
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, oneshot, watch};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Connecting,
    Active,
    Error,
    Stopping,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Connecting => "connecting",
            SessionStatus::Active => "active",
            SessionStatus::Error => "error",
            SessionStatus::Stopping => "stopping",
        }
    }
}

/// Everything an observer may know about the session at one instant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub status: SessionStatus,
    pub last_error: Option<SessionError>,
    pub session_id: Option<Uuid>,
    pub generation: u64,
    /// Id the remote announced in `connection_established`
    pub remote_sid: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl StatusSnapshot {
    pub fn idle() -> Self {
        Self {
            status: SessionStatus::Idle,
            last_error: None,
            session_id: None,
            generation: 0,
            remote_sid: None,
            started_at: None,
            updated_at: Utc::now(),
        }
    }
}

/// Session counters. Updated by the controller, read by the metrics endpoint.
#[derive(Debug, Default)]
pub struct SessionMetrics {
    pub sessions_started: AtomicU64,
    pub frames_sent: AtomicU64,
    pub frames_dropped: AtomicU64,
    pub payloads_rendered: AtomicU64,
    pub decode_errors: AtomicU64,
    pub connect_failures: AtomicU64,
    pub reconnect_attempts: AtomicU64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionMetricsSnapshot {
    pub sessions_started: u64,
    pub frames_sent: u64,
    pub frames_dropped: u64,
    pub payloads_rendered: u64,
    pub decode_errors: u64,
    pub connect_failures: u64,
    pub reconnect_attempts: u64,
}

impl SessionMetrics {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SessionMetricsSnapshot {
        SessionMetricsSnapshot {
            sessions_started: self.sessions_started.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            payloads_rendered: self.payloads_rendered.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            connect_failures: self.connect_failures.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
        }
    }
}

/// User actions and process lifecycle, each answered with the snapshot that
/// resulted from applying it.
#[derive(Debug)]
pub enum SessionCommand {
    Start { reply: oneshot::Sender<StatusSnapshot> },
    Stop { reply: oneshot::Sender<StatusSnapshot> },
    /// Implicit stop, then the controller exits
    Shutdown { reply: oneshot::Sender<StatusSnapshot> },
}

/// Cloneable front door to the session controller.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    status: watch::Receiver<StatusSnapshot>,
}

impl SessionHandle {
    pub(crate) fn new(commands: mpsc::Sender<SessionCommand>, status: watch::Receiver<StatusSnapshot>) -> Self {
        Self { commands, status }
    }

    async fn request(
        &self,
        make: impl FnOnce(oneshot::Sender<StatusSnapshot>) -> SessionCommand,
    ) -> Result<StatusSnapshot> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(make(reply))
            .await
            .map_err(|_| anyhow!("Session controller is not running"))?;
        response
            .await
            .map_err(|_| anyhow!("Session controller stopped before replying"))
    }

    /// User start. A no-op unless the session is idle.
    pub async fn start(&self) -> Result<StatusSnapshot> {
        self.request(|reply| SessionCommand::Start { reply }).await
    }

    /// User stop. A no-op when idle.
    pub async fn stop(&self) -> Result<StatusSnapshot> {
        self.request(|reply| SessionCommand::Stop { reply }).await
    }

    pub async fn shutdown(&self) -> Result<StatusSnapshot> {
        self.request(|reply| SessionCommand::Shutdown { reply }).await
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.status.clone()
    }
}
