//! # Application State Management
//!
//! Shared state handed to every HTTP handler of the local control surface.
//!
//! ## Key Rust Concepts:
//!
//! ### Arc (Atomically Reference Counted)
//! - **Purpose**: Lets the HTTP workers and the session controller share the same data
//! - **Memory safety**: The data is freed when the last reference is dropped
//!
//! ### RwLock (Reader-Writer Lock)
//! - **Purpose**: Many readers OR one writer at a time
//! - **Why needed**: Every request reads the config, only `PUT /config` writes it
//!
//! ### Poisoned locks
//! A lock is "poisoned" when a thread panicked while holding it. The data inside is
//! still consistent for our simple counters and config, so we recover it with
//! `into_inner()` instead of panicking the request that happens to come next.
//!
//! ## What is NOT in here:
//! The voice session itself lives in its own task. Handlers reach it through the
//! cloneable [`SessionHandle`], never through a lock.

use crate::config::AppConfig;
use crate::session::{SessionHandle, SessionMetrics};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// The state shared across all HTTP request handlers.
///
/// ## Fields:
/// - `config`: shared with the session controller, which snapshots it at each start
/// - `metrics`: per-endpoint request counters, updated by middleware
/// - `session`: command/status handle of the voice session
/// - `session_metrics`: counters maintained by the session controller
/// - `start_time`: process start, for uptime
#[derive(Debug, Clone)]
pub struct AppState {
    pub config: Arc<RwLock<AppConfig>>,
    pub metrics: Arc<RwLock<AppMetrics>>,
    pub session: SessionHandle,
    pub session_metrics: Arc<SessionMetrics>,
    pub audio_backend: &'static str,
    pub start_time: Instant,
}

/// Request metrics collected across the control surface.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed since start
    pub request_count: u64,

    /// Requests that ended with a 4xx/5xx or an error
    pub error_count: u64,

    /// Key: "METHOD /path", e.g. "POST /api/v1/session/start"
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Metrics for one endpoint.
///
/// ## Derived values:
/// - **Average response time**: total_duration_ms / request_count
/// - **Error rate**: error_count / request_count
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    /// Wrap the already-shared config and the session handle into handler state.
    pub fn new(
        config: Arc<RwLock<AppConfig>>,
        session: SessionHandle,
        session_metrics: Arc<SessionMetrics>,
        audio_backend: &'static str,
    ) -> Self {
        Self {
            config,
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            session,
            session_metrics,
            audio_backend,
            start_time: Instant::now(),
        }
    }

    /// Get a copy of the current configuration.
    ///
    /// ## Why clone:
    /// Cloning releases the read lock immediately, so a concurrent update is never
    /// blocked behind a slow response.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Replace the configuration after validating it.
    ///
    /// A session already running keeps the snapshot it started with; the new values
    /// apply from the next start.
    pub fn update_config(&self, new_config: AppConfig) -> Result<(), String> {
        match new_config.validate() {
            Ok(_) => {
                *self.config.write().unwrap_or_else(|e| e.into_inner()) = new_config;
                Ok(())
            }
            Err(e) => Err(e.to_string()),
        }
    }

    /// Record one finished request (called by the request logging middleware).
    ///
    /// ## HashMap operations:
    /// `.entry().or_default()` creates the endpoint's metrics the first time it is seen.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write().unwrap_or_else(|e| e.into_inner());
        metrics.request_count += 1;
        if is_error {
            metrics.error_count += 1;
        }

        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();
        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Consistent copy of the request metrics, taken under one read lock.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl AppMetrics {
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}
