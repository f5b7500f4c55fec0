//types shared by the orchestrator, the service clients and the agent binary
pub mod audio;
pub mod control;
pub mod dialogue;
pub mod mode;
pub mod transcript;

//re-export types for easier access
pub use audio::AudioFrame;
pub use control::{AgentMessage, ControlMessage};
pub use dialogue::TurnRole;
pub use mode::Mode;
pub use transcript::TranscriptEvent;
