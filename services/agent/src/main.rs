use anyhow::{Context, Result};
use avatar_agent::config::Config;
use avatar_agent::deepgram_adapter::DeepgramEngine;
use avatar_agent::room_adapter::Gateway;
use avatar_core::types::Mode;
use avatar_core::{DialogueClient, DialogueConfig, SessionConfig, SessionOrchestrator};
use clap::Parser;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing_subscriber::fmt::time::ChronoLocal;

#[derive(Parser)]
#[command(version, about = "Runs an avatar agent for one room session")]
struct Cli {
    /// Room to join, overrides ROOM_NAME
    #[arg(long)]
    room: Option<String>,
    /// Mode to start in (ai or human), overrides INITIAL_MODE
    #[arg(long)]
    mode: Option<Mode>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // --- 1. Load Configuration ---
    let mut config = Config::from_env().context("Failed to load application configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(ChronoLocal::rfc_3339())
        .init();

    // --- 3. Parse Command-Line Arguments ---
    let args = Cli::parse();
    if let Some(room) = args.room {
        config.room_name = room;
    }
    if let Some(mode) = args.mode {
        config.initial_mode = mode;
    }
    tracing::info!(
        "Configuration loaded. Joining room {} in {} mode",
        config.room_name,
        config.initial_mode
    );

    // --- 4. Build Adapters ---
    let gateway_config = room_gateway::Config::builder(&config.gateway_url)
        .with_token(config.gateway_token.clone())
        .with_room(&config.room_name)
        .with_identity(&config.agent_identity)
        .build();
    let gateway = Arc::new(Gateway::new(
        gateway_config,
        &config.avatar_id,
        &config.avatar_voice,
    ));

    let engine = DeepgramEngine::new(
        deepgram_realtime::Config::builder()
            .with_api_key(config.deepgram_api_key.clone())
            .with_model(&config.deepgram_model)
            .with_sample_rate(config.audio_sample_rate)
            .with_channels(config.audio_channels)
            .build(),
    );

    let dialogue = DialogueClient::new(
        DialogueConfig::builder(&config.avatar_id)
            .with_base_url(&config.dialogue_api_url)
            .build(),
    );

    // --- 5. Run the Session ---
    let started = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    let session_config = SessionConfig {
        session_id: format!("{}-{}", config.room_name, started),
        initial_mode: config.initial_mode,
        greeting: config.greeting.clone(),
        record_relayed_turns: config.record_relayed_turns,
        ..SessionConfig::default()
    };
    let orchestrator = SessionOrchestrator::new(
        session_config,
        gateway.clone(),
        Arc::new(engine),
        gateway,
        Arc::new(dialogue),
    );

    let session = orchestrator.session();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received Ctrl-C, ending session");
            session.stop();
        }
    });

    match orchestrator.run().await {
        Ok(()) => {
            tracing::info!("Session finished");
            Ok(())
        }
        Err(e) => {
            tracing::error!("Session ended with error: {}", e);
            Err(e.into())
        }
    }
}
