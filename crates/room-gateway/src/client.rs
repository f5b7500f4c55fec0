use crate::types::{GatewayCommand, GatewayEvent};
use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use secrecy::ExposeSecret;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;

pub(crate) mod config;
mod consts;

type CommandTx = mpsc::Sender<GatewayCommand>;
pub type EventRx = mpsc::Receiver<GatewayEvent>;

fn build_request(config: &config::Config) -> Result<Request> {
    let mut request = config
        .url()
        .into_client_request()
        .context("Invalid gateway url")?;
    let headers = request.headers_mut();
    headers.insert(
        consts::AUTHORIZATION_HEADER,
        HeaderValue::from_str(&format!("Bearer {}", config.token().expose_secret()))
            .context("Invalid gateway token")?,
    );
    headers.insert(
        consts::ROOM_HEADER,
        HeaderValue::from_str(config.room()).context("Invalid room name")?,
    );
    headers.insert(
        consts::IDENTITY_HEADER,
        HeaderValue::from_str(config.identity()).context("Invalid identity")?,
    );
    Ok(request)
}

/// Sending half of a gateway connection. Cheap to clone.
#[derive(Clone)]
pub struct GatewayClient {
    c_tx: CommandTx,
}

/// Joins the configured room through the gateway.
///
/// Events arrive on the returned receiver until the connection closes; the
/// last event is always a [`GatewayEvent::Disconnected`].
pub async fn connect(config: &config::Config) -> Result<(GatewayClient, EventRx)> {
    let request = build_request(config)?;
    let (ws_stream, _) = tokio_tungstenite::connect_async(request)
        .await
        .context("Failed to connect to room gateway")?;
    tracing::info!("Joined room {} as {}", config.room(), config.identity());

    let (mut write, mut read) = ws_stream.split();
    let (c_tx, mut c_rx) = mpsc::channel::<GatewayCommand>(config.capacity());
    let (s_tx, s_rx) = mpsc::channel(config.capacity());

    tokio::spawn(async move {
        while let Some(command) = c_rx.recv().await {
            let leaving = command == GatewayCommand::Leave;
            match serde_json::to_string(&command) {
                Ok(text) => {
                    if let Err(e) = write.send(Message::Text(text)).await {
                        tracing::error!("failed to send command: {}", e);
                        break;
                    }
                }
                Err(e) => tracing::error!("failed to serialize command: {}", e),
            }
            if leaving {
                if let Err(e) = write.send(Message::Close(None)).await {
                    tracing::debug!("failed to close gateway socket: {}", e);
                }
                break;
            }
        }
    });

    tokio::spawn(async move {
        let mut reason = None;
        while let Some(message) = read.next().await {
            let message = match message {
                Ok(message) => message,
                Err(e) => {
                    tracing::error!("failed to read message: {}", e);
                    reason = Some(e.to_string());
                    break;
                }
            };
            match message {
                Message::Text(text) => match serde_json::from_str::<GatewayEvent>(&text) {
                    Ok(event) => {
                        let closing = matches!(event, GatewayEvent::Disconnected { .. });
                        if s_tx.send(event).await.is_err() {
                            tracing::debug!("event receiver dropped");
                            return;
                        }
                        if closing {
                            return;
                        }
                    }
                    Err(e) => tracing::warn!("failed to deserialize event: {}, text=> {:?}", e, text),
                },
                Message::Binary(bin) => {
                    tracing::warn!("unexpected binary message ({} bytes)", bin.len());
                }
                Message::Close(frame) => {
                    tracing::info!("gateway connection closed: {:?}", frame);
                    reason = frame.map(|f| f.reason.to_string());
                    break;
                }
                _ => {}
            }
        }
        let _ = s_tx.send(GatewayEvent::Disconnected { reason }).await;
    });

    Ok((GatewayClient { c_tx }, s_rx))
}

impl GatewayClient {
    async fn send_command(&self, command: GatewayCommand) -> Result<()> {
        self.c_tx
            .send(command)
            .await
            .map_err(|_| anyhow::anyhow!("gateway connection closed"))
    }

    pub async fn publish_data(&self, payload: Vec<u8>) -> Result<()> {
        self.send_command(GatewayCommand::PublishData {
            payload,
            reliable: true,
        })
        .await
    }

    pub async fn avatar_start(&self, avatar_id: &str, voice: &str) -> Result<()> {
        self.send_command(GatewayCommand::AvatarStart {
            avatar_id: avatar_id.to_string(),
            voice: voice.to_string(),
        })
        .await
    }

    pub async fn say(&self, text: &str, allow_interruptions: bool) -> Result<()> {
        self.send_command(GatewayCommand::Say {
            text: text.to_string(),
            allow_interruptions,
        })
        .await
    }

    pub async fn avatar_stop(&self) -> Result<()> {
        self.send_command(GatewayCommand::AvatarStop).await
    }

    pub async fn leave(&self) -> Result<()> {
        self.send_command(GatewayCommand::Leave).await
    }
}
