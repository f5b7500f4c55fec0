//! Channel-backed stand-ins for the room, connector and speech engine.

use crate::media::{
    AudioStream, ConnectionState, MediaConnector, MediaRoom, ParticipantId, RemoteTrack,
    RoomConnection, RoomEvent, SpeechEngine, SpeechStream, StreamCloser, TrackKind,
};
use anyhow::Result;
use async_trait::async_trait;
use avatar_types::{AudioFrame, TranscriptEvent};
use futures::StreamExt;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};

#[derive(Default)]
pub struct FakeRoom {
    state: Mutex<Option<ConnectionState>>,
    participants: Mutex<Vec<ParticipantId>>,
    tracks: Mutex<Vec<RemoteTrack>>,
    audio: Mutex<HashMap<String, mpsc::Receiver<AudioFrame>>>,
    pub published: Mutex<Vec<Vec<u8>>>,
    pub disconnects: AtomicUsize,
}

impl FakeRoom {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_state(&self, state: ConnectionState) {
        *self.state.lock().unwrap() = Some(state);
    }

    pub fn add_participant(&self, participant: &ParticipantId) {
        self.participants.lock().unwrap().push(participant.clone());
    }

    pub fn publish_track(&self, track: RemoteTrack) {
        self.tracks.lock().unwrap().push(track);
    }

    /// Registers an audio source for `sid` without publishing the track.
    pub fn prepare_audio(&self, sid: &str) -> mpsc::Sender<AudioFrame> {
        let (tx, rx) = mpsc::channel(16);
        self.audio.lock().unwrap().insert(sid.to_string(), rx);
        tx
    }

    pub fn publish_audio(&self, participant: &ParticipantId, sid: &str) -> mpsc::Sender<AudioFrame> {
        self.publish_track(RemoteTrack {
            sid: sid.to_string(),
            kind: TrackKind::Audio,
            participant: participant.clone(),
        });
        self.prepare_audio(sid)
    }

    pub fn published_messages(&self) -> Vec<serde_json::Value> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .map(|payload| serde_json::from_slice(payload).unwrap())
            .collect()
    }

    /// Builds a connection whose events are fed through the returned sender.
    pub fn connection(self: &Arc<Self>) -> (RoomConnection, mpsc::Sender<RoomEvent>) {
        let (events_tx, events) = mpsc::channel(32);
        let room: Arc<dyn MediaRoom> = self.clone();
        (RoomConnection { room, events }, events_tx)
    }
}

#[async_trait]
impl MediaRoom for FakeRoom {
    fn connection_state(&self) -> ConnectionState {
        self.state
            .lock()
            .unwrap()
            .unwrap_or(ConnectionState::Connected)
    }

    fn remote_participants(&self) -> Vec<ParticipantId> {
        self.participants.lock().unwrap().clone()
    }

    fn published_tracks(&self, participant: &ParticipantId) -> Vec<RemoteTrack> {
        self.tracks
            .lock()
            .unwrap()
            .iter()
            .filter(|track| &track.participant == participant)
            .cloned()
            .collect()
    }

    async fn open_audio_stream(&self, track: &RemoteTrack) -> Result<AudioStream> {
        let rx = self
            .audio
            .lock()
            .unwrap()
            .remove(&track.sid)
            .ok_or_else(|| anyhow::anyhow!("no audio for {}", track.sid))?;
        Ok(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|frame| (frame, rx))
        })
        .boxed())
    }

    async fn publish_data(&self, payload: Vec<u8>) -> Result<()> {
        self.published.lock().unwrap().push(payload);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct FakeConnector {
    connection: Mutex<Option<RoomConnection>>,
}

impl FakeConnector {
    pub fn new(connection: RoomConnection) -> Self {
        Self {
            connection: Mutex::new(Some(connection)),
        }
    }

    pub fn failing() -> Self {
        Self {
            connection: Mutex::new(None),
        }
    }
}

#[async_trait]
impl MediaConnector for FakeConnector {
    async fn connect(&self) -> Result<RoomConnection> {
        self.connection
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| anyhow::anyhow!("room unreachable"))
    }
}

struct CountingCloser {
    releases: Arc<AtomicUsize>,
}

impl StreamCloser for CountingCloser {
    fn close(self: Box<Self>) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            self.releases.fetch_add(1, Ordering::SeqCst);
        })
    }
}

struct EngineSide {
    input: mpsc::Sender<AudioFrame>,
    transcripts: mpsc::Receiver<TranscriptEvent>,
    opened: oneshot::Sender<()>,
}

pub struct FakeEngine {
    side: Mutex<Option<EngineSide>>,
    releases: Arc<AtomicUsize>,
    opened: AtomicUsize,
    fail: bool,
}

/// The test's end of a [`FakeEngine`].
pub struct EngineHarness {
    pub frames: mpsc::Receiver<AudioFrame>,
    pub releases: Arc<AtomicUsize>,
    transcripts: Option<mpsc::Sender<TranscriptEvent>>,
    opened: Option<oneshot::Receiver<()>>,
}

impl EngineHarness {
    /// Waits for the stream to be opened and hands out the transcript sender.
    pub async fn transcripts(&mut self) -> mpsc::Sender<TranscriptEvent> {
        if let Some(opened) = self.opened.take() {
            opened.await.unwrap();
        }
        self.transcripts.take().unwrap()
    }
}

impl FakeEngine {
    pub fn new() -> (Arc<Self>, EngineHarness) {
        let (input, frames) = mpsc::channel(16);
        let (transcripts_tx, transcripts) = mpsc::channel(16);
        let (opened_tx, opened_rx) = oneshot::channel();
        let releases = Arc::new(AtomicUsize::new(0));
        let engine = Arc::new(Self {
            side: Mutex::new(Some(EngineSide {
                input,
                transcripts,
                opened: opened_tx,
            })),
            releases: releases.clone(),
            opened: AtomicUsize::new(0),
            fail: false,
        });
        let harness = EngineHarness {
            frames,
            releases,
            transcripts: Some(transcripts_tx),
            opened: Some(opened_rx),
        };
        (engine, harness)
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            side: Mutex::new(None),
            releases: Arc::new(AtomicUsize::new(0)),
            opened: AtomicUsize::new(0),
            fail: true,
        })
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechEngine for FakeEngine {
    async fn open_stream(&self) -> Result<SpeechStream> {
        if self.fail {
            anyhow::bail!("engine refused connection");
        }
        let side = self
            .side
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| anyhow::anyhow!("stream already opened"))?;
        self.opened.fetch_add(1, Ordering::SeqCst);
        let _ = side.opened.send(());
        Ok(SpeechStream {
            input: side.input,
            transcripts: side.transcripts,
            closer: Box::new(CountingCloser {
                releases: self.releases.clone(),
            }),
        })
    }
}
