//! Wire format of the room gateway. Every message is a JSON object tagged by `type`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackSnapshot {
    pub track_sid: String,
    pub kind: TrackKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantSnapshot {
    pub identity: String,
    #[serde(default)]
    pub tracks: Vec<TrackSnapshot>,
}

/// Events pushed by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayEvent {
    /// Sent once right after the handshake.
    RoomSnapshot {
        #[serde(default)]
        participants: Vec<ParticipantSnapshot>,
    },
    ParticipantConnected {
        identity: String,
    },
    ParticipantDisconnected {
        identity: String,
    },
    TrackSubscribed {
        identity: String,
        track_sid: String,
        kind: TrackKind,
    },
    /// Little-endian 16-bit PCM from a subscribed audio track.
    AudioFrame {
        track_sid: String,
        sample_rate: u32,
        channels: u16,
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
    DataReceived {
        #[serde(default)]
        identity: Option<String>,
        #[serde(with = "base64_bytes")]
        payload: Vec<u8>,
    },
    ConnectionState {
        state: ConnectionState,
    },
    /// Reply to `avatar_start` once the avatar is publishing into the room.
    AvatarStarted,
    AvatarError {
        message: String,
    },
    Disconnected {
        #[serde(default)]
        reason: Option<String>,
    },
}

/// Commands accepted by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayCommand {
    PublishData {
        #[serde(with = "base64_bytes")]
        payload: Vec<u8>,
        reliable: bool,
    },
    AvatarStart {
        avatar_id: String,
        voice: String,
    },
    Say {
        text: String,
        allow_interruptions: bool,
    },
    AvatarStop,
    Leave,
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
