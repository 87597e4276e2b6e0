//! # Configuration Management
//!
//! Loads client configuration from multiple sources:
//! - Built-in defaults (the `Default` impl below)
//! - An optional `config.toml` next to the binary
//! - Environment variables with the `APP_` prefix
//!
//! ## Key Rust Concepts Used:
//! - **Serde**: derive macros convert between these structs and TOML/env/JSON
//! - **Result<T, E>**: every loading step can fail and must be handled
//! - **impl blocks**: helper methods that derive URLs and durations from raw values
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `HOST` / `PORT` (control surface only, for deployment platforms)
//! 2. Environment variables (`APP_REMOTE__BASE_URL`, `APP_AUDIO__FRAME_SIZE`, ...)
//! 3. Configuration file (config.toml)
//! 4. Default values
//!
//! Nested keys are separated by a double underscore because several field names
//! contain single underscores themselves.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Smallest and largest capture block accepted, in samples.
pub const MIN_FRAME_SIZE: usize = 64;
pub const MAX_FRAME_SIZE: usize = 16384;

/// Main configuration, grouped by concern.
///
/// ## Why separate config structs:
/// The local control surface, the remote voice agent and the audio devices change
/// for different reasons; keeping them apart keeps each section small.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub remote: RemoteConfig,
    pub audio: AudioConfig,
}

/// Where the local control surface listens.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: only this machine can start/stop the session (default)
/// - `host = "0.0.0.0"`: reachable from the LAN, e.g. a phone on the same network
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// How to reach the remote voice agent.
///
/// ## Fields:
/// - `base_url`: HTTP(S) origin of the agent; the socket URL is derived from it
/// - `socket_path`: path of the duplex endpoint on that origin
/// - `health_path`: path used by the reachability probe
/// - `transport`: low-level transport, selected explicitly (no fallback negotiation)
/// - `connect_timeout_ms`: one connection attempt is abandoned after this long
/// - `reconnection_attempts`: total attempts allowed per connection phase
/// - `reconnection_delay_ms`: fixed pause between reconnects after a drop
/// - `recovery_delay_ms`: fixed pause before retrying a failed initial open
/// - `probe_timeout_ms`: budget for the HTTP reachability probe
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteConfig {
    pub base_url: String,
    pub socket_path: String,
    pub health_path: String,
    pub transport: String,
    pub connect_timeout_ms: u64,
    pub reconnection_attempts: u32,
    pub reconnection_delay_ms: u64,
    pub recovery_delay_ms: u64,
    pub probe_timeout_ms: u64,
}

/// Audio device and framing settings.
///
/// ## Fields:
/// - `frame_size`: samples per captured frame, fixed for a whole session
/// - `fallback_sample_rate`: rate assumed for inbound payloads that carry none
/// - `input_device` / `output_device`: device names; empty means system default
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AudioConfig {
    pub frame_size: usize,
    pub fallback_sample_rate: u32,
    pub input_device: String,
    pub output_device: String,
}

/// Transports the client knows how to open. Only one today; naming it in config
/// keeps the selection explicit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    WebSocket,
}

impl std::str::FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "websocket" | "ws" => Ok(TransportKind::WebSocket),
            other => Err(format!("Unsupported transport '{}': only 'websocket' is available", other)),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            remote: RemoteConfig {
                base_url: "http://localhost:8000".to_string(),
                socket_path: "/ws".to_string(),
                health_path: "/api/health".to_string(),
                transport: "websocket".to_string(),
                connect_timeout_ms: 10_000,
                reconnection_attempts: 5,
                reconnection_delay_ms: 1_000,
                recovery_delay_ms: 2_000,
                probe_timeout_ms: 3_000,
            },
            audio: AudioConfig {
                frame_size: 4096,
                fallback_sample_rate: 24_000,
                input_device: String::new(),
                output_device: String::new(),
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, `config.toml` and the environment.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_REMOTE__BASE_URL=https://agent.example.com`
    /// - `APP_REMOTE__RECONNECTION_ATTEMPTS=3`
    /// - `APP_AUDIO__FRAME_SIZE=2048`
    /// - `HOST=0.0.0.0`, `PORT=3000`: control surface overrides
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - Control surface port is not 0
    /// - Remote base URL is http(s) and the transport is one we can open
    /// - Timeouts and retry budgets are non-zero
    /// - Frame size and fallback sample rate are usable
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        let base = self.remote.base_url.trim();
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(anyhow::anyhow!(
                "Remote base URL must start with http:// or https://, got '{}'",
                self.remote.base_url
            ));
        }

        if !self.remote.socket_path.starts_with('/') || !self.remote.health_path.starts_with('/') {
            return Err(anyhow::anyhow!("Remote socket and health paths must start with '/'"));
        }

        self.remote
            .transport_kind()
            .map_err(|e| anyhow::anyhow!(e))?;

        if self.remote.connect_timeout_ms == 0 {
            return Err(anyhow::anyhow!("Connect timeout must be greater than 0"));
        }

        if self.remote.reconnection_attempts == 0 {
            return Err(anyhow::anyhow!("Reconnection attempts must be greater than 0"));
        }

        if self.audio.frame_size < MIN_FRAME_SIZE || self.audio.frame_size > MAX_FRAME_SIZE {
            return Err(anyhow::anyhow!(
                "Frame size must be between {} and {} samples",
                MIN_FRAME_SIZE,
                MAX_FRAME_SIZE
            ));
        }

        if self.audio.fallback_sample_rate == 0 {
            return Err(anyhow::anyhow!("Fallback sample rate must be greater than 0"));
        }

        Ok(())
    }

    /// Apply a partial JSON update (used by `PUT /api/v1/config`).
    ///
    /// Only the fields present in the JSON change; the result is validated before
    /// returning. A running session keeps the snapshot it started with, so updates
    /// take effect on the next start.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(server) = partial.get("server") {
            if let Some(host) = server.get("host").and_then(|v| v.as_str()) {
                self.server.host = host.to_string();
            }
            if let Some(port) = server.get("port").and_then(|v| v.as_u64()) {
                self.server.port = u16::try_from(port)
                    .map_err(|_| anyhow::anyhow!("Server port {} is out of range", port))?;
            }
        }

        if let Some(remote) = partial.get("remote") {
            let text = |key: &str| remote.get(key).and_then(|v| v.as_str()).map(str::to_string);
            let number = |key: &str| remote.get(key).and_then(|v| v.as_u64());

            if let Some(v) = text("base_url") {
                self.remote.base_url = v;
            }
            if let Some(v) = text("socket_path") {
                self.remote.socket_path = v;
            }
            if let Some(v) = text("health_path") {
                self.remote.health_path = v;
            }
            if let Some(v) = text("transport") {
                self.remote.transport = v;
            }
            if let Some(v) = number("connect_timeout_ms") {
                self.remote.connect_timeout_ms = v;
            }
            if let Some(v) = number("reconnection_attempts") {
                self.remote.reconnection_attempts = u32::try_from(v)
                    .map_err(|_| anyhow::anyhow!("Reconnection attempts {} is out of range", v))?;
            }
            if let Some(v) = number("reconnection_delay_ms") {
                self.remote.reconnection_delay_ms = v;
            }
            if let Some(v) = number("recovery_delay_ms") {
                self.remote.recovery_delay_ms = v;
            }
            if let Some(v) = number("probe_timeout_ms") {
                self.remote.probe_timeout_ms = v;
            }
        }

        if let Some(audio) = partial.get("audio") {
            if let Some(v) = audio.get("frame_size").and_then(|v| v.as_u64()) {
                self.audio.frame_size = v as usize;
            }
            if let Some(v) = audio.get("fallback_sample_rate").and_then(|v| v.as_u64()) {
                self.audio.fallback_sample_rate = u32::try_from(v)
                    .map_err(|_| anyhow::anyhow!("Sample rate {} is out of range", v))?;
            }
            if let Some(v) = audio.get("input_device").and_then(|v| v.as_str()) {
                self.audio.input_device = v.to_string();
            }
            if let Some(v) = audio.get("output_device").and_then(|v| v.as_str()) {
                self.audio.output_device = v.to_string();
            }
        }

        self.validate()?;
        Ok(())
    }
}

impl RemoteConfig {
    pub fn transport_kind(&self) -> Result<TransportKind, String> {
        self.transport.parse()
    }

    /// Duplex endpoint URL: the base URL with its scheme switched to ws/wss.
    ///
    /// ## Example:
    /// `https://agent.example.com/` + `/ws` → `wss://agent.example.com/ws`
    pub fn socket_url(&self) -> String {
        let base = self.base_url.trim().trim_end_matches('/');
        let switched = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            base.to_string()
        };
        format!("{}{}", switched, self.socket_path)
    }

    /// URL of the reachability probe.
    pub fn health_url(&self) -> String {
        format!("{}{}", self.base_url.trim().trim_end_matches('/'), self.health_path)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn reconnection_delay(&self) -> Duration {
        Duration::from_millis(self.reconnection_delay_ms)
    }

    pub fn recovery_delay(&self) -> Duration {
        Duration::from_millis(self.recovery_delay_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}
