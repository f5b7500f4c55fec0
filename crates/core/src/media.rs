//! Seams between the orchestrator and the outside world: the media room,
//! the streaming speech recognizer and the avatar's speech output.

use anyhow::Result;
use async_trait::async_trait;
use avatar_types::{AudioFrame, TranscriptEvent};
use futures::future::BoxFuture;
use futures::stream::BoxStream;
#[cfg(test)]
use mockall::automock;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParticipantId(pub String);

impl ParticipantId {
    pub fn new(identity: impl Into<String>) -> Self {
        Self(identity.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrack {
    pub sid: String,
    pub kind: TrackKind,
    pub participant: ParticipantId,
}

impl RemoteTrack {
    pub fn is_audio(&self) -> bool {
        self.kind == TrackKind::Audio
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomEvent {
    ParticipantConnected(ParticipantId),
    ParticipantDisconnected(ParticipantId),
    TrackSubscribed(RemoteTrack),
    DataReceived {
        participant: Option<ParticipantId>,
        payload: Vec<u8>,
    },
    ConnectionStateChanged(ConnectionState),
    Disconnected {
        reason: Option<String>,
    },
}

pub type AudioStream = BoxStream<'static, AudioFrame>;

/// A joined media room.
#[async_trait]
pub trait MediaRoom: Send + Sync {
    fn connection_state(&self) -> ConnectionState;

    fn remote_participants(&self) -> Vec<ParticipantId>;

    /// Tracks the participant has already published and we are subscribed to.
    fn published_tracks(&self, participant: &ParticipantId) -> Vec<RemoteTrack>;

    async fn open_audio_stream(&self, track: &RemoteTrack) -> Result<AudioStream>;

    /// Sends a reliable data message to every participant.
    async fn publish_data(&self, payload: Vec<u8>) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;
}

/// A room handle together with the room's event channel.
pub struct RoomConnection {
    pub room: Arc<dyn MediaRoom>,
    pub events: mpsc::Receiver<RoomEvent>,
}

#[async_trait]
pub trait MediaConnector: Send + Sync {
    async fn connect(&self) -> Result<RoomConnection>;
}

/// Releases the resources behind a [`SpeechStream`].
pub trait StreamCloser: Send {
    fn close(self: Box<Self>) -> BoxFuture<'static, ()>;
}

/// One open recognition stream: frames go in, transcripts come out.
pub struct SpeechStream {
    pub input: mpsc::Sender<AudioFrame>,
    pub transcripts: mpsc::Receiver<TranscriptEvent>,
    pub closer: Box<dyn StreamCloser>,
}

#[async_trait]
pub trait SpeechEngine: Send + Sync {
    async fn open_stream(&self) -> Result<SpeechStream>;
}

/// The avatar's voice.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SpeechOutput: Send + Sync {
    async fn start(&self) -> Result<()>;

    async fn say(&self, text: &str, allow_interruptions: bool) -> Result<()>;

    async fn stop(&self) -> Result<()>;
}
