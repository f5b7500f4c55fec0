use avatar_types::Mode;
use std::time::Duration;

pub const DEFAULT_GREETING: &str = "Hello! I am ready to chat.";

/// Tunables for a single orchestrated session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Identifier used in logs.
    pub session_id: String,
    /// Mode the session starts in.
    pub initial_mode: Mode,
    /// Spoken once after startup when the session starts in AI mode.
    pub greeting: Option<String>,
    /// Record relayed (HUMAN mode) turns in the dialogue history.
    pub record_relayed_turns: bool,
    pub participant_timeout: Duration,
    pub audio_track_timeout: Duration,
    /// Upper bound for best-effort calls made during teardown.
    pub teardown_timeout: Duration,
    /// How often the supervisory loop checks connection liveness.
    pub liveness_interval: Duration,
    /// Pending text inputs waiting for a reply before new ones are dropped.
    pub reply_queue_capacity: usize,
    /// Undecoded control payloads buffered between the room and the listener.
    pub control_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_id: "session".to_string(),
            initial_mode: Mode::Ai,
            greeting: Some(DEFAULT_GREETING.to_string()),
            record_relayed_turns: true,
            participant_timeout: Duration::from_secs(120),
            audio_track_timeout: Duration::from_secs(30),
            teardown_timeout: Duration::from_secs(2),
            liveness_interval: Duration::from_secs(1),
            reply_queue_capacity: 16,
            control_buffer: 64,
        }
    }
}
