//! # Wire Protocol
//!
//! Text frames carry JSON envelopes `{"event": <name>, "data": <payload>}`.
//! Binary frames carry raw audio bytes and always mean `audio_response`.
//!
//! ## Client → Remote:
//! - `start_conversation` (no data)
//! - `audio_data` with an array of f32 samples
//! - `end_conversation` (no data)
//!
//! ## Remote → Client:
//! - `connection_established {status, sid}`
//! - `conversation_started {status}`
//! - `audio_response` with binary, base64 string, numeric array or `{samples, sample_rate}`
//! - `error {message}`
//! - `conversation_ended {status}`

use crate::audio::payload::InboundAudioPayload;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Messages this client sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    StartConversation,
    AudioData(Vec<f32>),
    EndConversation,
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::StartConversation => "start_conversation",
            ClientEvent::AudioData(_) => "audio_data",
            ClientEvent::EndConversation => "end_conversation",
        }
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Messages the remote agent sends.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    ConnectionEstablished { status: String, sid: Option<String> },
    ConversationStarted { status: String },
    AudioResponse(InboundAudioPayload),
    Error { message: String },
    ConversationEnded { status: String },
    /// Events this client has no use for; logged and ignored
    Unknown { event: String },
}

#[derive(Debug, Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

impl ServerEvent {
    pub fn name(&self) -> &str {
        match self {
            ServerEvent::ConnectionEstablished { .. } => "connection_established",
            ServerEvent::ConversationStarted { .. } => "conversation_started",
            ServerEvent::AudioResponse(_) => "audio_response",
            ServerEvent::Error { .. } => "error",
            ServerEvent::ConversationEnded { .. } => "conversation_ended",
            ServerEvent::Unknown { event } => event,
        }
    }

    /// Parse a text frame. Only a broken envelope is an error; odd payloads inside a
    /// valid `audio_response` become [`InboundAudioPayload::Unrecognized`] so the
    /// playback side can reject them.
    pub fn from_text(text: &str) -> Result<Self, String> {
        let envelope: Envelope =
            serde_json::from_str(text).map_err(|e| format!("Invalid event envelope: {}", e))?;
        let data = envelope.data;

        let event = match envelope.event.as_str() {
            "connection_established" => ServerEvent::ConnectionEstablished {
                status: string_field(&data, "status"),
                sid: data.get("sid").and_then(|v| v.as_str()).map(str::to_string),
            },
            "conversation_started" => ServerEvent::ConversationStarted {
                status: string_field(&data, "status"),
            },
            "audio_response" => ServerEvent::AudioResponse(audio_payload(data)),
            "error" => ServerEvent::Error {
                message: data
                    .get("message")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
                    .or_else(|| data.as_str().map(str::to_string))
                    .unwrap_or_else(|| "Unknown remote error".to_string()),
            },
            "conversation_ended" => ServerEvent::ConversationEnded {
                status: string_field(&data, "status"),
            },
            other => ServerEvent::Unknown { event: other.to_string() },
        };
        Ok(event)
    }

    pub fn from_binary(bytes: Vec<u8>) -> Self {
        ServerEvent::AudioResponse(InboundAudioPayload::Bytes(bytes))
    }
}

fn string_field(data: &serde_json::Value, key: &str) -> String {
    data.get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

/// Map the `data` of an `audio_response` onto one of the payload shapes.
fn audio_payload(data: serde_json::Value) -> InboundAudioPayload {
    match data {
        serde_json::Value::String(encoded) => {
            match base64::engine::general_purpose::STANDARD.decode(encoded.trim()) {
                Ok(bytes) => InboundAudioPayload::Bytes(bytes),
                Err(e) => InboundAudioPayload::Unrecognized(format!("string that is not base64 ({})", e)),
            }
        }
        serde_json::Value::Array(values) => InboundAudioPayload::Numeric(values),
        serde_json::Value::Object(map) => {
            let samples = map.get("samples").and_then(|v| v.as_array()).map(|values| {
                values
                    .iter()
                    .map(|v| v.as_f64().map(|f| f as f32))
                    .collect::<Option<Vec<f32>>>()
            });
            match samples {
                Some(Some(samples)) => InboundAudioPayload::Samples {
                    samples,
                    sample_rate: map
                        .get("sample_rate")
                        .and_then(|v| v.as_u64())
                        .and_then(|v| u32::try_from(v).ok()),
                },
                Some(None) => InboundAudioPayload::Unrecognized("sample buffer with non-numeric entries".to_string()),
                None => InboundAudioPayload::Unrecognized("object without a samples array".to_string()),
            }
        }
        serde_json::Value::Null => InboundAudioPayload::Unrecognized("missing data".to_string()),
        serde_json::Value::Bool(_) => InboundAudioPayload::Unrecognized("boolean".to_string()),
        serde_json::Value::Number(_) => InboundAudioPayload::Unrecognized("single number".to_string()),
    }
}
