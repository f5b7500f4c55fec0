use avatar_types::{AgentMessage, Mode};
use tokio::sync::{mpsc, watch};

/// Single-writer, multi-reader cell holding the live conversational mode.
///
/// Readers never block. Every switch, including a no-op one, is acknowledged
/// with a `mode_changed` message on the control-channel outbox.
pub struct ModeController {
    mode: watch::Sender<Mode>,
    outbox: mpsc::Sender<AgentMessage>,
}

impl ModeController {
    pub fn new(initial: Mode, outbox: mpsc::Sender<AgentMessage>) -> Self {
        let (mode, _) = watch::channel(initial);
        Self { mode, outbox }
    }

    pub fn current_mode(&self) -> Mode {
        *self.mode.borrow()
    }

    pub fn switch_mode(&self, requested: Mode) -> Mode {
        let changed = self.mode.send_if_modified(|mode| {
            if *mode == requested {
                false
            } else {
                *mode = requested;
                true
            }
        });
        if changed {
            tracing::info!("Mode switched to: {}", requested);
        } else {
            tracing::debug!("Mode already {}", requested);
        }

        // Best-effort: a full or closed outbox only loses the acknowledgement.
        if let Err(e) = self
            .outbox
            .try_send(AgentMessage::ModeChanged { mode: requested })
        {
            tracing::debug!("Dropped mode_changed notification: {}", e);
        }
        requested
    }

    pub fn subscribe(&self) -> watch::Receiver<Mode> {
        self.mode.subscribe()
    }
}
