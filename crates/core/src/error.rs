use std::time::Duration;

/// Errors that end a session.
///
/// Degraded conditions (a missing dialogue session, a failed generation call,
/// a failed speak) never surface here; they are absorbed where they happen.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionError {
    #[error("Media connection failed: {0}")]
    Connection(String),
    #[error("No participant joined within {0:?}")]
    ParticipantTimeout(Duration),
    #[error("Speech output failed to start: {0}")]
    SpeechOutput(String),
    #[error("Speech engine init failed: {0}")]
    SpeechEngineInit(String),
    #[error("No audio track found within {0:?}")]
    AudioTrackTimeout(Duration),
    #[error("Audio stream unavailable: {0}")]
    AudioStream(String),
    #[error("STT loop error: {0}")]
    Pipeline(String),
}
