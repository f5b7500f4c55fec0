//! Speech engine backed by Deepgram live transcription.

use anyhow::{Context, Result};
use async_trait::async_trait;
use avatar_core::types::{AudioFrame, TranscriptEvent};
use avatar_core::{SpeechEngine, SpeechStream, StreamCloser};
use deepgram_realtime::types::{ServerMessage, TranscriptResult};
use deepgram_realtime::{LiveReceiver, LiveSender};
use futures::future::BoxFuture;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

const FRAME_BUFFER: usize = 64;
const TRANSCRIPT_BUFFER: usize = 64;
// The server drops streams that stay silent for about ten seconds.
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(5);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

pub struct DeepgramEngine {
    config: deepgram_realtime::Config,
}

impl DeepgramEngine {
    pub fn new(config: deepgram_realtime::Config) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SpeechEngine for DeepgramEngine {
    async fn open_stream(&self) -> Result<SpeechStream> {
        let (sender, receiver) = deepgram_realtime::connect(&self.config)
            .await
            .context("Failed to open transcription stream")?
            .split();

        let (input, frames) = mpsc::channel(FRAME_BUFFER);
        let (transcripts_tx, transcripts) = mpsc::channel(TRANSCRIPT_BUFFER);
        let stop = CancellationToken::new();

        let writer = tokio::spawn(write_audio(
            sender,
            frames,
            (self.config.sample_rate(), self.config.channels()),
            stop.clone(),
        ));
        let reader = tokio::spawn(read_transcripts(receiver, transcripts_tx));

        Ok(SpeechStream {
            input,
            transcripts,
            closer: Box::new(DeepgramCloser {
                stop,
                writer,
                reader,
            }),
        })
    }
}

async fn write_audio(
    mut sender: LiveSender,
    mut frames: mpsc::Receiver<AudioFrame>,
    expected: (u32, u16),
    stop: CancellationToken,
) {
    let mut keep_alive = tokio::time::interval(KEEP_ALIVE_INTERVAL);
    keep_alive.set_missed_tick_behavior(MissedTickBehavior::Delay);
    keep_alive.reset();
    let mut warned_format = false;

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            frame = frames.recv() => {
                let Some(frame) = frame else { break };
                if (frame.sample_rate, frame.channels) != expected && !warned_format {
                    tracing::warn!(
                        "Audio arrives at {} Hz x{} but the stream expects {} Hz x{}, set AUDIO_SAMPLE_RATE and AUDIO_CHANNELS",
                        frame.sample_rate,
                        frame.channels,
                        expected.0,
                        expected.1
                    );
                    warned_format = true;
                }
                if let Err(e) = sender.send_audio(frame.to_pcm16_le()).await {
                    tracing::error!("Failed to forward audio: {:#}", e);
                    return;
                }
                keep_alive.reset();
            }
            _ = keep_alive.tick() => {
                if let Err(e) = sender.keep_alive().await {
                    tracing::error!("Keep-alive failed: {:#}", e);
                    return;
                }
            }
        }
    }

    if let Err(e) = sender.close_stream().await {
        tracing::debug!("CloseStream not sent: {:#}", e);
    }
}

fn transcript_event(result: &TranscriptResult) -> TranscriptEvent {
    TranscriptEvent::new(result.transcript(), result.is_final)
}

async fn read_transcripts(mut receiver: LiveReceiver, transcripts: mpsc::Sender<TranscriptEvent>) {
    loop {
        match receiver.next_message().await {
            Ok(Some(ServerMessage::Results(result))) => {
                if transcripts.send(transcript_event(&result)).await.is_err() {
                    break;
                }
            }
            Ok(Some(ServerMessage::Metadata(metadata))) => {
                tracing::debug!("Deepgram metadata: {:?}", metadata.request_id);
            }
            Ok(Some(_)) => {}
            Ok(None) => break,
            Err(e) => {
                tracing::error!("Transcription stream failed: {:#}", e);
                break;
            }
        }
    }
    tracing::debug!("Transcript reader stopped");
}

struct DeepgramCloser {
    stop: CancellationToken,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
}

impl StreamCloser for DeepgramCloser {
    fn close(self: Box<Self>) -> BoxFuture<'static, ()> {
        let DeepgramCloser {
            stop,
            writer,
            reader,
        } = *self;
        Box::pin(async move {
            stop.cancel();
            if tokio::time::timeout(CLOSE_TIMEOUT, writer).await.is_err() {
                tracing::warn!("Audio writer did not stop in time");
            }
            let reader_abort = reader.abort_handle();
            if tokio::time::timeout(CLOSE_TIMEOUT, reader).await.is_err() {
                reader_abort.abort();
            }
        })
    }
}
