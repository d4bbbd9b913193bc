//! JSON messages exchanged with a companion relay peer over WebSocket.
//!
//! Every message is an object whose `type` field selects the variant.
//! Audio travels as a `data:<mime>;base64,<payload>` URI in `data`.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const KNOWN_TYPES: &[&str] = &[
    "ping",
    "pong",
    "info",
    "error",
    "audio",
    "audio_response",
    "ack",
];

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayMessage {
    Ping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<String>,
    },
    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<String>,
    },
    Info {
        data: String,
    },
    Error {
        data: String,
    },
    /// A captured recording awaiting processing (device -> peer).
    Audio {
        data: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    /// Synthesized reply audio (peer -> device).
    AudioResponse {
        data: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    Ack {
        data: String,
    },
}

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid JSON message: {0}")]
    InvalidJson(#[source] serde_json::Error),

    #[error("Message missing type field")]
    MissingType,

    #[error("Unknown message type: {0}")]
    UnknownType(String),

    #[error("Malformed {kind} message: {reason}")]
    MalformedPayload { kind: String, reason: String },

    #[error("Invalid audio data format: {0}")]
    InvalidDataUri(String),

    #[error("Invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
}

impl RelayMessage {
    /// Parses one text frame, telling apart broken JSON, a missing or
    /// unknown `type`, and a known type with the wrong fields.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: serde_json::Value =
            serde_json::from_str(text).map_err(ProtocolError::InvalidJson)?;

        let kind = match value.get("type") {
            Some(serde_json::Value::String(kind)) => kind.clone(),
            _ => return Err(ProtocolError::MissingType),
        };

        if !KNOWN_TYPES.contains(&kind.as_str()) {
            return Err(ProtocolError::UnknownType(kind));
        }

        serde_json::from_value(value).map_err(|e| ProtocolError::MalformedPayload {
            kind,
            reason: e.to_string(),
        })
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RelayMessage::Ping { .. } => "ping",
            RelayMessage::Pong { .. } => "pong",
            RelayMessage::Info { .. } => "info",
            RelayMessage::Error { .. } => "error",
            RelayMessage::Audio { .. } => "audio",
            RelayMessage::AudioResponse { .. } => "audio_response",
            RelayMessage::Ack { .. } => "ack",
        }
    }
}

pub fn encode_data_uri(mime: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime, STANDARD.encode(bytes))
}

/// Splits an audio data URI into its mime type and decoded bytes.
pub fn decode_data_uri(uri: &str) -> Result<(String, Vec<u8>), ProtocolError> {
    let rest = uri
        .strip_prefix("data:")
        .ok_or_else(|| ProtocolError::InvalidDataUri("missing data: prefix".to_string()))?;

    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| ProtocolError::InvalidDataUri("missing payload separator".to_string()))?;

    let mime = header
        .strip_suffix(";base64")
        .ok_or_else(|| ProtocolError::InvalidDataUri("payload is not base64".to_string()))?;

    if !mime.starts_with("audio/") {
        return Err(ProtocolError::InvalidDataUri(format!(
            "unexpected mime type '{}'",
            mime
        )));
    }

    let bytes = STANDARD.decode(payload.trim())?;
    Ok((mime.to_string(), bytes))
}
