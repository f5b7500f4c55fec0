//! Media room and avatar speech backed by the room gateway.

use anyhow::{Context, Result};
use async_trait::async_trait;
use avatar_core::types::AudioFrame;
use avatar_core::{
    AudioStream, ConnectionState, MediaConnector, MediaRoom, ParticipantId, RemoteTrack,
    RoomConnection, RoomEvent, SpeechOutput, TrackKind,
};
use futures::StreamExt;
use room_gateway::types::{self as wire, GatewayEvent};
use room_gateway::{EventRx, GatewayClient};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

const EVENT_BUFFER: usize = 256;
const AUDIO_BUFFER: usize = 64;
const AVATAR_START_TIMEOUT: Duration = Duration::from_secs(10);

type AvatarReply = std::result::Result<(), String>;

/// Room state mirrored from gateway events.
#[derive(Default)]
struct RoomState {
    connection: Option<ConnectionState>,
    participants: Vec<ParticipantId>,
    tracks: Vec<RemoteTrack>,
    audio: HashMap<String, mpsc::Sender<AudioFrame>>,
    avatar_reply: Option<oneshot::Sender<AvatarReply>>,
}

#[derive(Clone, Default)]
struct SharedState(Arc<Mutex<RoomState>>);

impl SharedState {
    fn lock(&self) -> MutexGuard<'_, RoomState> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn add_participant(&self, participant: &ParticipantId) {
        let mut state = self.lock();
        if !state.participants.contains(participant) {
            state.participants.push(participant.clone());
        }
    }

    fn add_track(&self, track: &RemoteTrack) {
        let mut state = self.lock();
        if !state.tracks.iter().any(|t| t.sid == track.sid) {
            state.tracks.push(track.clone());
        }
    }

    fn remove_participant(&self, participant: &ParticipantId) {
        let mut state = self.lock();
        state.participants.retain(|p| p != participant);
        let gone: Vec<String> = state
            .tracks
            .iter()
            .filter(|t| &t.participant == participant)
            .map(|t| t.sid.clone())
            .collect();
        state.tracks.retain(|t| &t.participant != participant);
        for sid in gone {
            state.audio.remove(&sid);
        }
    }

    fn open_audio(&self, sid: &str) -> AudioStream {
        let (tx, rx) = mpsc::channel(AUDIO_BUFFER);
        self.lock().audio.insert(sid.to_string(), tx);
        futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|frame| (frame, rx))
        })
        .boxed()
    }

    fn route_audio(&self, sid: &str, frame: AudioFrame) {
        let mut state = self.lock();
        let Some(tx) = state.audio.get(sid) else {
            return;
        };
        match tx.try_send(frame) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::debug!("Audio consumer lagging, dropping frame for {}", sid);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                state.audio.remove(sid);
            }
        }
    }

    fn mark_disconnected(&self) {
        let mut state = self.lock();
        state.connection = Some(ConnectionState::Disconnected);
        state.audio.clear();
        state.avatar_reply = None;
    }

    /// Registers interest in the gateway's answer to the next `avatar_start`.
    fn expect_avatar_reply(&self) -> oneshot::Receiver<AvatarReply> {
        let (tx, rx) = oneshot::channel();
        self.lock().avatar_reply = Some(tx);
        rx
    }

    fn resolve_avatar(&self, reply: AvatarReply) {
        match self.lock().avatar_reply.take() {
            Some(tx) => {
                let _ = tx.send(reply);
            }
            None => tracing::debug!("Unsolicited avatar reply: {:?}", reply),
        }
    }
}

async fn wait_for_avatar(reply: oneshot::Receiver<AvatarReply>, timeout: Duration) -> Result<()> {
    match tokio::time::timeout(timeout, reply).await {
        Ok(Ok(Ok(()))) => Ok(()),
        Ok(Ok(Err(message))) => Err(anyhow::anyhow!("avatar rejected: {}", message)),
        Ok(Err(_)) => Err(anyhow::anyhow!("gateway closed before the avatar started")),
        Err(_) => Err(anyhow::anyhow!("avatar did not start within {:?}", timeout)),
    }
}

fn track_kind(kind: wire::TrackKind) -> TrackKind {
    match kind {
        wire::TrackKind::Audio => TrackKind::Audio,
        wire::TrackKind::Video => TrackKind::Video,
    }
}

fn connection_state(state: wire::ConnectionState) -> ConnectionState {
    match state {
        wire::ConnectionState::Disconnected => ConnectionState::Disconnected,
        wire::ConnectionState::Connecting => ConnectionState::Connecting,
        wire::ConnectionState::Connected => ConnectionState::Connected,
        wire::ConnectionState::Reconnecting => ConnectionState::Reconnecting,
    }
}

/// Applies gateway events to `state`, forwarding the ones the orchestrator cares about.
async fn route_events(mut events: EventRx, state: SharedState, out: mpsc::Sender<RoomEvent>) {
    while let Some(event) = events.recv().await {
        let forward = match event {
            GatewayEvent::RoomSnapshot { participants } => {
                let mut forward = Vec::new();
                for snapshot in participants {
                    let participant = ParticipantId::new(snapshot.identity);
                    state.add_participant(&participant);
                    forward.push(RoomEvent::ParticipantConnected(participant.clone()));
                    for track in snapshot.tracks {
                        let track = RemoteTrack {
                            sid: track.track_sid,
                            kind: track_kind(track.kind),
                            participant: participant.clone(),
                        };
                        state.add_track(&track);
                        forward.push(RoomEvent::TrackSubscribed(track));
                    }
                }
                forward
            }
            GatewayEvent::ParticipantConnected { identity } => {
                let participant = ParticipantId::new(identity);
                state.add_participant(&participant);
                vec![RoomEvent::ParticipantConnected(participant)]
            }
            GatewayEvent::ParticipantDisconnected { identity } => {
                let participant = ParticipantId::new(identity);
                state.remove_participant(&participant);
                vec![RoomEvent::ParticipantDisconnected(participant)]
            }
            GatewayEvent::TrackSubscribed {
                identity,
                track_sid,
                kind,
            } => {
                let track = RemoteTrack {
                    sid: track_sid,
                    kind: track_kind(kind),
                    participant: ParticipantId::new(identity),
                };
                state.add_track(&track);
                vec![RoomEvent::TrackSubscribed(track)]
            }
            GatewayEvent::AudioFrame {
                track_sid,
                sample_rate,
                channels,
                data,
            } => {
                state.route_audio(
                    &track_sid,
                    AudioFrame::from_pcm16_le(&data, sample_rate, channels),
                );
                Vec::new()
            }
            GatewayEvent::DataReceived { identity, payload } => vec![RoomEvent::DataReceived {
                participant: identity.map(ParticipantId::new),
                payload,
            }],
            GatewayEvent::ConnectionState { state: wire_state } => {
                let connection = connection_state(wire_state);
                if connection == ConnectionState::Disconnected {
                    state.mark_disconnected();
                } else {
                    state.lock().connection = Some(connection);
                }
                vec![RoomEvent::ConnectionStateChanged(connection)]
            }
            GatewayEvent::AvatarStarted => {
                state.resolve_avatar(Ok(()));
                Vec::new()
            }
            GatewayEvent::AvatarError { message } => {
                state.resolve_avatar(Err(message));
                Vec::new()
            }
            GatewayEvent::Disconnected { reason } => {
                state.mark_disconnected();
                let _ = out.send(RoomEvent::Disconnected { reason }).await;
                return;
            }
        };
        for event in forward {
            if out.send(event).await.is_err() {
                tracing::debug!("Room event receiver dropped");
            }
        }
    }
    state.mark_disconnected();
    let _ = out
        .send(RoomEvent::Disconnected {
            reason: Some("gateway event stream ended".to_string()),
        })
        .await;
}

/// The joined room: connection handle plus mirrored state.
#[derive(Default)]
struct GatewayRoom {
    client: OnceLock<GatewayClient>,
    state: SharedState,
}

impl GatewayRoom {
    fn client(&self) -> Result<&GatewayClient> {
        self.client
            .get()
            .ok_or_else(|| anyhow::anyhow!("room gateway not connected"))
    }
}

#[async_trait]
impl MediaRoom for GatewayRoom {
    fn connection_state(&self) -> ConnectionState {
        self.state
            .lock()
            .connection
            .unwrap_or(ConnectionState::Disconnected)
    }

    fn remote_participants(&self) -> Vec<ParticipantId> {
        self.state.lock().participants.clone()
    }

    fn published_tracks(&self, participant: &ParticipantId) -> Vec<RemoteTrack> {
        self.state
            .lock()
            .tracks
            .iter()
            .filter(|t| &t.participant == participant)
            .cloned()
            .collect()
    }

    async fn open_audio_stream(&self, track: &RemoteTrack) -> Result<AudioStream> {
        if track.kind != TrackKind::Audio {
            anyhow::bail!("track {} is not an audio track", track.sid);
        }
        Ok(self.state.open_audio(&track.sid))
    }

    async fn publish_data(&self, payload: Vec<u8>) -> Result<()> {
        self.client()?.publish_data(payload).await
    }

    async fn disconnect(&self) -> Result<()> {
        self.state.mark_disconnected();
        self.client()?.leave().await
    }
}

/// One gateway connection serving as both the media room and the avatar's voice.
pub struct Gateway {
    config: room_gateway::Config,
    avatar_id: String,
    voice: String,
    room: Arc<GatewayRoom>,
}

impl Gateway {
    pub fn new(config: room_gateway::Config, avatar_id: &str, voice: &str) -> Self {
        Self {
            config,
            avatar_id: avatar_id.to_string(),
            voice: voice.to_string(),
            room: Arc::new(GatewayRoom::default()),
        }
    }
}

#[async_trait]
impl MediaConnector for Gateway {
    async fn connect(&self) -> Result<RoomConnection> {
        let (client, events) = room_gateway::connect(&self.config)
            .await
            .context("Failed to join room")?;
        if self.room.client.set(client).is_err() {
            anyhow::bail!("room gateway already connected");
        }
        self.room.state.lock().connection = Some(ConnectionState::Connected);

        let (out, events_rx) = mpsc::channel(EVENT_BUFFER);
        tokio::spawn(route_events(events, self.room.state.clone(), out));
        let room: Arc<dyn MediaRoom> = self.room.clone();
        Ok(RoomConnection {
            room,
            events: events_rx,
        })
    }
}

#[async_trait]
impl SpeechOutput for Gateway {
    async fn start(&self) -> Result<()> {
        let client = self.room.client()?;
        let reply = self.room.state.expect_avatar_reply();
        client
            .avatar_start(&self.avatar_id, &self.voice)
            .await
            .context("Failed to start avatar")?;
        wait_for_avatar(reply, AVATAR_START_TIMEOUT)
            .await
            .context("Failed to start avatar")
    }

    async fn say(&self, text: &str, allow_interruptions: bool) -> Result<()> {
        self.room.client()?.say(text, allow_interruptions).await
    }

    async fn stop(&self) -> Result<()> {
        self.room.client()?.avatar_stop().await
    }
}
