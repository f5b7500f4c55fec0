//! Audio ingestion and transcript consumption for one participant.

use crate::error::SessionError;
use crate::media::{
    AudioStream, MediaRoom, ParticipantId, RemoteTrack, SpeechEngine, SpeechStream, StreamCloser,
};
use crate::reply::ReplyDriver;
use crate::session_state::Session;
use avatar_types::{AudioFrame, TranscriptEvent};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

/// Why a pipeline stopped without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineExit {
    AudioEnded,
    TranscriptsEnded,
    Cancelled,
}

/// Owns the speech-engine stream's closer and releases it exactly once.
struct StreamGuard {
    closer: Option<Box<dyn StreamCloser>>,
}

impl StreamGuard {
    fn new(closer: Box<dyn StreamCloser>) -> Self {
        Self {
            closer: Some(closer),
        }
    }

    async fn release(mut self) {
        if let Some(closer) = self.closer.take() {
            closer.close().await;
            tracing::debug!("Speech stream released");
        }
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        let Some(closer) = self.closer.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(closer.close());
            }
            Err(_) => tracing::warn!("Speech stream dropped outside a runtime, not released"),
        }
    }
}

enum Finished {
    Ingest(Result<PipelineExit, JoinError>),
    Consume(Result<PipelineExit, JoinError>),
}

pub struct Pipeline {
    session: Arc<Session>,
    room: Arc<dyn MediaRoom>,
    engine: Arc<dyn SpeechEngine>,
    replies: ReplyDriver,
    participant: ParticipantId,
    track_timeout: Duration,
}

impl Pipeline {
    pub fn new(
        session: Arc<Session>,
        room: Arc<dyn MediaRoom>,
        engine: Arc<dyn SpeechEngine>,
        replies: ReplyDriver,
        participant: ParticipantId,
        track_timeout: Duration,
    ) -> Self {
        Self {
            session,
            room,
            engine,
            replies,
            participant,
            track_timeout,
        }
    }

    /// Runs until the audio or transcript side ends or the session stops.
    ///
    /// `tracks` carries tracks subscribed after startup; tracks the participant
    /// had already published are picked up from the room directly.
    pub async fn run(
        self,
        mut tracks: mpsc::Receiver<RemoteTrack>,
    ) -> Result<PipelineExit, SessionError> {
        let Some(track) = self.wait_for_audio_track(&mut tracks).await? else {
            return Ok(PipelineExit::Cancelled);
        };
        tracing::info!(
            "Found audio track {} from {}",
            track.sid,
            track.participant
        );

        let SpeechStream {
            input,
            transcripts,
            closer,
        } = self
            .engine
            .open_stream()
            .await
            .map_err(|e| SessionError::SpeechEngineInit(format!("{e:#}")))?;
        let guard = StreamGuard::new(closer);

        let audio = match self.room.open_audio_stream(&track).await {
            Ok(audio) => audio,
            Err(e) => {
                guard.release().await;
                return Err(SessionError::AudioStream(format!("{e:#}")));
            }
        };

        let stop = self.session.running().child_token();
        let _stop_on_drop = stop.clone().drop_guard();
        let mut ingest: JoinHandle<PipelineExit> =
            tokio::spawn(ingest_audio(audio, input, stop.clone()));
        let mut consume: JoinHandle<PipelineExit> = tokio::spawn(consume_transcripts(
            transcripts,
            self.replies.clone(),
            stop.clone(),
        ));

        let finished = tokio::select! {
            res = &mut ingest => Finished::Ingest(res),
            res = &mut consume => Finished::Consume(res),
        };
        stop.cancel();
        let (first, other) = match finished {
            Finished::Ingest(res) => (res, consume.await),
            Finished::Consume(res) => (res, ingest.await),
        };
        guard.release().await;

        if let Err(e) = other {
            tracing::warn!("Pipeline task did not finish cleanly: {}", e);
        }
        let exit = first.map_err(|e| SessionError::Pipeline(e.to_string()))?;
        tracing::info!("Pipeline stopped: {:?}", exit);
        Ok(exit)
    }

    async fn wait_for_audio_track(
        &self,
        tracks: &mut mpsc::Receiver<RemoteTrack>,
    ) -> Result<Option<RemoteTrack>, SessionError> {
        if let Some(track) = self
            .room
            .published_tracks(&self.participant)
            .into_iter()
            .find(RemoteTrack::is_audio)
        {
            return Ok(Some(track));
        }

        tracing::info!("Waiting for audio track from {}", self.participant);
        let participant = &self.participant;
        let subscribed = async {
            while let Some(track) = tracks.recv().await {
                if track.is_audio() && &track.participant == participant {
                    return Some(track);
                }
                tracing::debug!("Ignoring track {} ({:?})", track.sid, track.kind);
            }
            None
        };

        tokio::select! {
            _ = self.session.running().cancelled() => Ok(None),
            found = tokio::time::timeout(self.track_timeout, subscribed) => match found {
                Ok(track) => Ok(track),
                Err(_) => Err(SessionError::AudioTrackTimeout(self.track_timeout)),
            },
        }
    }
}

async fn ingest_audio(
    mut audio: AudioStream,
    input: mpsc::Sender<AudioFrame>,
    stop: CancellationToken,
) -> PipelineExit {
    let mut frames = 0u64;
    let exit = loop {
        let frame = tokio::select! {
            _ = stop.cancelled() => break PipelineExit::Cancelled,
            next = audio.next() => match next {
                Some(frame) => frame,
                None => break PipelineExit::AudioEnded,
            },
        };
        tokio::select! {
            _ = stop.cancelled() => break PipelineExit::Cancelled,
            sent = input.send(frame) => {
                if sent.is_err() {
                    tracing::debug!("Speech engine input closed");
                    break PipelineExit::AudioEnded;
                }
            }
        }
        frames += 1;
    };
    tracing::debug!("Audio ingestion stopped after {} frames", frames);
    exit
}

async fn consume_transcripts(
    mut transcripts: mpsc::Receiver<TranscriptEvent>,
    replies: ReplyDriver,
    stop: CancellationToken,
) -> PipelineExit {
    loop {
        let event = tokio::select! {
            _ = stop.cancelled() => return PipelineExit::Cancelled,
            next = transcripts.recv() => match next {
                Some(event) => event,
                None => return PipelineExit::TranscriptsEnded,
            },
        };
        let Some(text) = event.actionable_text() else {
            continue;
        };
        tracing::info!("User said: {}", text);
        tokio::select! {
            _ = stop.cancelled() => return PipelineExit::Cancelled,
            _ = replies.respond(text) => {}
        }
    }
}
