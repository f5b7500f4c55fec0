use crate::mode::ModeController;
use avatar_types::{AgentMessage, Mode};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{OnceLock, RwLock};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    Init,
    Connected,
    Active,
    Ending,
    Closed,
}

impl SessionState {
    /// States only move forward. Besides the regular successor, any state
    /// before `Ending` may abort straight to `Ending`.
    pub fn can_advance_to(self, next: SessionState) -> bool {
        match (self, next) {
            (SessionState::Init, SessionState::Connected)
            | (SessionState::Connected, SessionState::Active)
            | (SessionState::Ending, SessionState::Closed) => true,
            (current, SessionState::Ending) => current < SessionState::Ending,
            _ => false,
        }
    }
}

/// Shared state of one conversation.
pub struct Session {
    id: String,
    mode: ModeController,
    vision_context: RwLock<String>,
    dialogue_session_id: OnceLock<String>,
    running: CancellationToken,
    state: watch::Sender<SessionState>,
    outbox: mpsc::Sender<AgentMessage>,
    ending: AtomicBool,
    dialogue_ended: AtomicBool,
}

impl Session {
    pub fn new(id: impl Into<String>, initial_mode: Mode, outbox: mpsc::Sender<AgentMessage>) -> Self {
        let (state, _) = watch::channel(SessionState::Init);
        Self {
            id: id.into(),
            mode: ModeController::new(initial_mode, outbox.clone()),
            vision_context: RwLock::new(String::new()),
            dialogue_session_id: OnceLock::new(),
            running: CancellationToken::new(),
            state,
            outbox,
            ending: AtomicBool::new(false),
            dialogue_ended: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn mode(&self) -> &ModeController {
        &self.mode
    }

    pub fn vision_context(&self) -> String {
        self.vision_context
            .read()
            .map(|guard| guard.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn set_vision_context(&self, description: String) {
        let mut guard = self
            .vision_context
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = description;
    }

    /// Records the dialogue session identifier. Only the first call has an effect.
    pub fn set_dialogue_session_id(&self, id: String) {
        if self.dialogue_session_id.set(id).is_err() {
            tracing::warn!("Dialogue session id already set, ignoring new value");
        }
    }

    pub fn dialogue_session_id(&self) -> Option<&str> {
        self.dialogue_session_id.get().map(String::as_str)
    }

    /// Returns true exactly once, and only if a dialogue session was started.
    pub fn claim_dialogue_end(&self) -> bool {
        self.dialogue_session_id.get().is_some() && !self.dialogue_ended.swap(true, Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        !self.running.is_cancelled()
    }

    /// Token cancelled when the session stops; workers derive child tokens from it.
    pub fn running(&self) -> &CancellationToken {
        &self.running
    }

    pub fn stop(&self) {
        self.running.cancel();
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Moves the lifecycle forward, returning false for an illegal transition.
    pub fn advance(&self, next: SessionState) -> bool {
        let advanced = self.state.send_if_modified(|state| {
            if state.can_advance_to(next) {
                *state = next;
                true
            } else {
                false
            }
        });
        if advanced {
            tracing::debug!(session = %self.id, "Session state -> {:?}", next);
        } else {
            tracing::warn!(session = %self.id, "Ignoring transition {:?} -> {:?}", self.state(), next);
        }
        advanced
    }

    /// Returns true for the first caller only; later callers must not tear down again.
    pub fn begin_ending(&self) -> bool {
        if self.ending.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.advance(SessionState::Ending);
        true
    }

    /// Queues a message for the control channel, dropping it if the outbox is full.
    pub fn notify(&self, message: AgentMessage) {
        if let Err(e) = self.outbox.try_send(message) {
            tracing::debug!("Dropped control-channel message: {}", e);
        }
    }
}
