use crate::types::{ClientMessage, ServerMessage};
use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use secrecy::ExposeSecret;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

pub(crate) mod config;
mod consts;

type WsWriter = futures_util::stream::SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsReader = futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

fn build_request(config: &config::Config) -> Result<Request> {
    let mut request = config
        .listen_url()
        .into_client_request()
        .context("Invalid listen url")?;
    let auth = HeaderValue::from_str(&format!("Token {}", config.api_key().expose_secret()))
        .context("Invalid API key")?;
    request
        .headers_mut()
        .insert(consts::AUTHORIZATION_HEADER, auth);
    Ok(request)
}

/// An open live transcription stream.
pub struct LiveSession {
    sender: LiveSender,
    receiver: LiveReceiver,
}

/// Opens a live transcription stream.
pub async fn connect(config: &config::Config) -> Result<LiveSession> {
    let request = build_request(config)?;
    let (ws_stream, _) = connect_async(request)
        .await
        .context("Failed to connect to Deepgram WebSocket")?;
    tracing::info!("Connected to Deepgram (model {})", config.model());

    let (write, read) = ws_stream.split();
    Ok(LiveSession {
        sender: LiveSender { write },
        receiver: LiveReceiver { read },
    })
}

impl LiveSession {
    /// Splits the stream so audio can be sent while results are read.
    pub fn split(self) -> (LiveSender, LiveReceiver) {
        (self.sender, self.receiver)
    }
}

pub struct LiveSender {
    write: WsWriter,
}

impl LiveSender {
    /// Sends raw little-endian 16-bit PCM.
    pub async fn send_audio(&mut self, pcm: Vec<u8>) -> Result<()> {
        self.write
            .send(Message::Binary(pcm))
            .await
            .context("Failed to send audio chunk")
    }

    /// Keeps an idle stream from being closed by the server.
    pub async fn keep_alive(&mut self) -> Result<()> {
        self.send_control(ClientMessage::KeepAlive).await
    }

    /// Tells the server no more audio follows. Remaining results are still delivered.
    pub async fn close_stream(&mut self) -> Result<()> {
        self.send_control(ClientMessage::CloseStream).await
    }

    async fn send_control(&mut self, message: ClientMessage) -> Result<()> {
        let json = serde_json::to_string(&message)?;
        self.write
            .send(Message::Text(json))
            .await
            .with_context(|| format!("Failed to send {:?}", message))
    }
}

pub struct LiveReceiver {
    read: WsReader,
}

impl LiveReceiver {
    /// Reads the next server message; `None` once the stream is closed.
    pub async fn next_message(&mut self) -> Result<Option<ServerMessage>> {
        while let Some(msg) = self.read.next().await {
            match msg {
                Ok(Message::Text(text)) => match serde_json::from_str::<ServerMessage>(&text) {
                    Ok(message) => return Ok(Some(message)),
                    Err(e) => {
                        tracing::warn!("Failed to deserialize Deepgram message: {}, text=> {:?}", e, text);
                    }
                },
                Ok(Message::Binary(_)) => {
                    tracing::warn!("Received unexpected binary message from Deepgram.");
                }
                Ok(Message::Close(reason)) => {
                    tracing::info!("Deepgram connection closed: {:?}", reason);
                    return Ok(None);
                }
                Err(e) => {
                    tracing::error!("Error reading from Deepgram WebSocket: {}", e);
                    return Err(e.into());
                }
                _ => {}
            }
        }
        Ok(None)
    }
}
