pub mod config;
pub mod control;
pub mod dialogue;
pub mod error;
pub mod media;
pub mod mode;
pub mod orchestrator;
pub mod pipeline;
pub mod reply;
pub mod session_state;

#[cfg(test)]
pub(crate) mod fakes;

pub use config::SessionConfig;
pub use dialogue::{Dialogue, DialogueClient, DialogueConfig};
pub use error::SessionError;
pub use media::{
    AudioStream, ConnectionState, MediaConnector, MediaRoom, ParticipantId, RemoteTrack,
    RoomConnection, RoomEvent, SpeechEngine, SpeechOutput, SpeechStream, StreamCloser, TrackKind,
};
pub use mode::ModeController;
pub use orchestrator::SessionOrchestrator;
pub use session_state::{Session, SessionState};

pub use avatar_types as types;
