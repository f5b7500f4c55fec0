use anyhow::{Context, Result};
use async_trait::async_trait;
use avatar_types::TurnRole;
use avatar_types::dialogue::{
    EndSessionRequest, GenerateRequest, GenerateResponse, HistoryRequest, StartSessionRequest,
    StartSessionResponse,
};
#[cfg(test)]
use mockall::automock;
use reqwest::Client;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://avatarinput.onrender.com/api/chat";

/// Canned replies used whenever the dialogue service cannot produce one.
pub mod fallback {
    pub const NO_SESSION: &str = "I am having trouble connecting to my brain.";
    pub const NOT_UNDERSTOOD: &str = "I didn't quite understand that.";
    pub const NETWORK_ERROR: &str = "I am experiencing a network error.";
    pub const INTERNAL_ERROR: &str = "Something went wrong processing your request.";

    pub const ALL: [&str; 4] = [NO_SESSION, NOT_UNDERSTOOD, NETWORK_ERROR, INTERNAL_ERROR];
}

// The conversational loop depends on this trait rather than on the HTTP
// client so it can be driven by `MockDialogue` in tests. None of the methods
// can stall the caller past the configured timeouts, and only the
// best-effort calls report failure; the caller decides to discard it.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Dialogue: Send + Sync {
    /// Starts a dialogue session, returning `None` when the service is unavailable.
    async fn start_session(&self) -> Option<String>;

    /// Always returns speakable text; failures map to one of the [`fallback`] replies.
    async fn generate_reply(
        &self,
        session_id: Option<String>,
        text: &str,
        vision_context: &str,
    ) -> String;

    async fn end_session(&self) -> Result<()>;

    async fn record_turn(&self, session_id: &str, role: TurnRole, content: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct DialogueConfig {
    base_url: String,
    avatar_id: String,
    request_timeout: Duration,
    best_effort_timeout: Duration,
}

pub struct DialogueConfigBuilder {
    config: DialogueConfig,
}

impl DialogueConfigBuilder {
    pub fn new(avatar_id: &str) -> Self {
        Self {
            config: DialogueConfig::new(avatar_id),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.config.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn with_best_effort_timeout(mut self, timeout: Duration) -> Self {
        self.config.best_effort_timeout = timeout;
        self
    }

    pub fn build(self) -> DialogueConfig {
        self.config
    }
}

impl DialogueConfig {
    pub fn new(avatar_id: &str) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            avatar_id: avatar_id.to_string(),
            request_timeout: Duration::from_secs(5),
            best_effort_timeout: Duration::from_secs(2),
        }
    }

    pub fn builder(avatar_id: &str) -> DialogueConfigBuilder {
        DialogueConfigBuilder::new(avatar_id)
    }
}

/// HTTP client for the dialogue service.
pub struct DialogueClient {
    client: Client,
    config: DialogueConfig,
}

impl DialogueClient {
    pub fn new(config: DialogueConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url, path)
    }

    async fn try_start_session(&self) -> Result<String> {
        let body = StartSessionRequest {
            avatar_id: self.config.avatar_id.clone(),
        };
        let response = self
            .client
            .post(self.url("session/start"))
            .timeout(self.config.request_timeout)
            .json(&body)
            .send()
            .await
            .context("Failed to reach dialogue service")?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("dialogue service returned {status}: {text}");
        }

        let data = response
            .json::<StartSessionResponse>()
            .await
            .context("Failed to decode session start response")?;
        match data {
            StartSessionResponse {
                success: true,
                session_id: Some(id),
            } => Ok(id),
            other => Err(anyhow::anyhow!("session start rejected: {:?}", other)),
        }
    }
}

#[async_trait]
impl Dialogue for DialogueClient {
    async fn start_session(&self) -> Option<String> {
        match self.try_start_session().await {
            Ok(id) => {
                tracing::info!("Dialogue session started: {}", id);
                Some(id)
            }
            Err(e) => {
                tracing::error!("Failed to start dialogue session: {:#}", e);
                None
            }
        }
    }

    async fn generate_reply(
        &self,
        session_id: Option<String>,
        text: &str,
        vision_context: &str,
    ) -> String {
        let Some(session_id) = session_id else {
            tracing::warn!("No dialogue session id, skipping generation");
            return fallback::NO_SESSION.to_string();
        };

        let body = GenerateRequest {
            avatar_id: self.config.avatar_id.clone(),
            session_id,
            text: text.to_string(),
            visual_context: vision_context.to_string(),
        };
        tracing::info!(
            "Sending to dialogue service: {} (vision: {} chars)",
            text,
            vision_context.len()
        );

        let response = match self
            .client
            .post(self.url("generate"))
            .timeout(self.config.request_timeout)
            .json(&body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::error!("Generation request failed: {}", e);
                return fallback::INTERNAL_ERROR.to_string();
            }
        };

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            tracing::error!("Generation request failed: {} - {}", status, text);
            return fallback::NETWORK_ERROR.to_string();
        }

        match response.json::<GenerateResponse>().await {
            Ok(GenerateResponse {
                success: true,
                response,
            }) => {
                let reply = response.unwrap_or_default();
                tracing::info!("Dialogue reply: {}", reply);
                reply
            }
            Ok(data) => {
                tracing::error!("Dialogue service could not answer: {:?}", data);
                fallback::NOT_UNDERSTOOD.to_string()
            }
            Err(e) => {
                tracing::error!("Failed to decode generation response: {}", e);
                fallback::INTERNAL_ERROR.to_string()
            }
        }
    }

    async fn end_session(&self) -> Result<()> {
        let body = EndSessionRequest {
            avatar_id: self.config.avatar_id.clone(),
        };
        self.client
            .post(self.url("session/end"))
            .timeout(self.config.best_effort_timeout)
            .json(&body)
            .send()
            .await
            .context("Failed to end dialogue session")?;
        Ok(())
    }

    async fn record_turn(&self, session_id: &str, role: TurnRole, content: &str) -> Result<()> {
        let body = HistoryRequest {
            avatar_id: self.config.avatar_id.clone(),
            session_id: session_id.to_string(),
            role,
            content: content.to_string(),
        };
        self.client
            .post(self.url("history"))
            .timeout(self.config.best_effort_timeout)
            .json(&body)
            .send()
            .await
            .context("Failed to record dialogue turn")?
            .error_for_status()
            .context("Dialogue service rejected history entry")?;
        Ok(())
    }
}
