//! Control-plane traffic on the room's data channel.

use crate::media::MediaRoom;
use crate::reply::ReplyJob;
use crate::session_state::Session;
use avatar_types::{AgentMessage, ControlMessage, Mode};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

/// Decodes inbound control payloads and applies them to the session.
pub struct ControlChannelListener {
    session: Arc<Session>,
    reply_queue: mpsc::Sender<ReplyJob>,
}

impl ControlChannelListener {
    pub fn new(session: Arc<Session>, reply_queue: mpsc::Sender<ReplyJob>) -> Self {
        Self {
            session,
            reply_queue,
        }
    }

    /// Handles one payload without waiting on any reply work.
    pub fn dispatch(&self, payload: &[u8]) {
        let message = match ControlMessage::decode(payload) {
            Ok(message) => message,
            Err(e) => {
                tracing::trace!("Ignoring control payload: {}", e);
                return;
            }
        };

        match message {
            ControlMessage::ModeSwitch { mode } => {
                self.session.mode().switch_mode(mode);
            }
            ControlMessage::TextInput { text } => {
                let mode = self.session.mode().current_mode();
                if mode != Mode::Ai {
                    tracing::debug!("Ignoring text input in human mode");
                    return;
                }
                let text = text.trim();
                if text.is_empty() {
                    return;
                }
                tracing::info!("Text input: {}", text);
                let job = ReplyJob {
                    text: text.to_string(),
                    mode,
                };
                match self.reply_queue.try_send(job) {
                    Ok(()) => {}
                    Err(TrySendError::Full(job)) => {
                        tracing::warn!("Reply queue full, dropping text input: {}", job.text);
                    }
                    Err(TrySendError::Closed(_)) => {
                        tracing::debug!("Reply queue closed");
                    }
                }
            }
            ControlMessage::VisionUpdate { description } => {
                tracing::debug!("Vision context updated ({} chars)", description.len());
                self.session.set_vision_context(description);
            }
        }
    }

    pub async fn run(self, mut inbound: mpsc::Receiver<Vec<u8>>, stop: CancellationToken) {
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                next = inbound.recv() => match next {
                    Some(payload) => self.dispatch(&payload),
                    None => break,
                },
            }
        }
        tracing::debug!("Control listener stopped");
    }
}

/// Publishes queued agent messages until stopped, then flushes what is left.
pub async fn run_outbox(
    mut outbox: mpsc::Receiver<AgentMessage>,
    room: Arc<dyn MediaRoom>,
    stop: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            biased;
            next = outbox.recv() => match next {
                Some(message) => message,
                None => return,
            },
            _ = stop.cancelled() => break,
        };
        publish(room.as_ref(), &message).await;
    }

    while let Ok(message) = outbox.try_recv() {
        publish(room.as_ref(), &message).await;
    }
}

async fn publish(room: &dyn MediaRoom, message: &AgentMessage) {
    let payload = match message.encode() {
        Ok(payload) => payload,
        Err(e) => {
            tracing::error!("Failed to encode {:?}: {}", message, e);
            return;
        }
    };
    if let Err(e) = room.publish_data(payload).await {
        tracing::debug!("Failed to publish {:?}: {:#}", message, e);
    }
}
