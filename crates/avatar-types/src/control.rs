use crate::mode::Mode;
use serde::{Deserialize, Deserializer};

/// Inbound message on the room's data channel.
///
/// The channel is best-effort: fields missing from an otherwise valid message
/// decode to their defaults instead of rejecting the message.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    ModeSwitch {
        #[serde(default, deserialize_with = "lenient_mode")]
        mode: Mode,
    },
    TextInput {
        #[serde(default)]
        text: String,
    },
    #[serde(rename = "vision")]
    VisionUpdate {
        #[serde(default)]
        description: String,
    },
}

fn lenient_mode<'de, D>(deserializer: D) -> Result<Mode, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(mode)) => Mode::from_wire(&mode),
        _ => Mode::Ai,
    })
}

impl ControlMessage {
    pub fn decode(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }
}

/// Outbound message published by the agent on the same data channel.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentMessage {
    ModeChanged { mode: Mode },
    Error { message: String },
}

impl AgentMessage {
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}
