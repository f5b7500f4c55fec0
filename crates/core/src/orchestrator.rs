use crate::config::SessionConfig;
use crate::control::{self, ControlChannelListener};
use crate::dialogue::Dialogue;
use crate::error::SessionError;
use crate::media::{
    ConnectionState, MediaConnector, MediaRoom, ParticipantId, RoomConnection, RoomEvent,
    SpeechEngine, SpeechOutput,
};
use crate::pipeline::{Pipeline, PipelineExit};
use crate::reply::{self, ReplyDriver};
use crate::session_state::{Session, SessionState};
use avatar_types::{AgentMessage, Mode};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

type PipelineHandle = JoinHandle<Result<PipelineExit, SessionError>>;

/// Runs one avatar session from room connection to teardown.
pub struct SessionOrchestrator {
    config: SessionConfig,
    connector: Arc<dyn MediaConnector>,
    engine: Arc<dyn SpeechEngine>,
    output: Arc<dyn SpeechOutput>,
    dialogue: Arc<dyn Dialogue>,
    session: Arc<Session>,
    outbox: Option<mpsc::Receiver<AgentMessage>>,
}

impl SessionOrchestrator {
    pub fn new(
        config: SessionConfig,
        connector: Arc<dyn MediaConnector>,
        engine: Arc<dyn SpeechEngine>,
        output: Arc<dyn SpeechOutput>,
        dialogue: Arc<dyn Dialogue>,
    ) -> Self {
        let (outbox_tx, outbox) = mpsc::channel(config.control_buffer.max(1));
        let session = Arc::new(Session::new(
            config.session_id.clone(),
            config.initial_mode,
            outbox_tx,
        ));
        Self {
            config,
            connector,
            engine,
            output,
            dialogue,
            session,
            outbox: Some(outbox),
        }
    }

    /// Handle to the live session, e.g. to watch its state or stop it.
    pub fn session(&self) -> Arc<Session> {
        self.session.clone()
    }

    /// Drives the session to `Closed`. Only fatal conditions are returned.
    pub async fn run(mut self) -> Result<(), SessionError> {
        let started = Instant::now();
        let session = self.session.clone();
        tracing::info!("Starting session {}", session.id());

        let RoomConnection { room, events } = match self.connector.connect().await {
            Ok(connection) => connection,
            Err(e) => {
                let err = SessionError::Connection(format!("{e:#}"));
                tracing::error!("Session {} failed: {}", session.id(), err);
                session.begin_ending();
                session.stop();
                session.advance(SessionState::Closed);
                return Err(err);
            }
        };
        tracing::info!("Connected to room in {:?}", started.elapsed());

        let teardown = Teardown::new(
            session.clone(),
            room.clone(),
            self.output.clone(),
            self.dialogue.clone(),
            self.config.teardown_timeout,
        );
        if let Some(outbox) = self.outbox.take() {
            let handle = tokio::spawn(control::run_outbox(
                outbox,
                room.clone(),
                teardown.outbox_stop.clone(),
            ));
            teardown.set_outbox_task(handle);
        }

        let result = self.activate(room, events, started, &teardown).await;
        if let Err(e) = &result {
            tracing::error!("Session {} failed: {}", session.id(), e);
            session.notify(AgentMessage::Error {
                message: e.to_string(),
            });
        }
        teardown.run().await;
        result
    }

    async fn activate(
        &self,
        room: Arc<dyn MediaRoom>,
        mut events: mpsc::Receiver<RoomEvent>,
        started: Instant,
        teardown: &Teardown,
    ) -> Result<(), SessionError> {
        let session = &self.session;
        let Some(participant) = self.wait_for_participant(room.as_ref(), &mut events).await?
        else {
            return Ok(());
        };
        tracing::info!("Participant joined: {}", participant);
        session.advance(SessionState::Connected);

        match self.dialogue.start_session().await {
            Some(id) => session.set_dialogue_session_id(id),
            None => tracing::warn!("Continuing without a dialogue session"),
        }

        let avatar_started = Instant::now();
        self.output
            .start()
            .await
            .map_err(|e| SessionError::SpeechOutput(format!("{e:#}")))?;
        tracing::info!("Avatar started in {:?}", avatar_started.elapsed());

        if session.mode().current_mode() == Mode::Ai {
            if let Some(greeting) = self.config.greeting.as_deref().filter(|g| !g.is_empty()) {
                if let Err(e) = self.output.say(greeting, true).await {
                    tracing::error!("Greeting failed: {:#}", e);
                }
            }
        }

        let replies = ReplyDriver::new(
            session.clone(),
            self.dialogue.clone(),
            self.output.clone(),
            self.config.record_relayed_turns,
        );

        let (queue_tx, queue_rx) = mpsc::channel(self.config.reply_queue_capacity.max(1));
        teardown.track(
            "reply queue",
            tokio::spawn(reply::run_reply_queue(
                queue_rx,
                replies.clone(),
                session.running().clone(),
            )),
        );

        let (control_tx, control_rx) = mpsc::channel(self.config.control_buffer.max(1));
        let listener = ControlChannelListener::new(session.clone(), queue_tx);
        teardown.track(
            "control listener",
            tokio::spawn(listener.run(control_rx, session.running().clone())),
        );

        let (track_tx, track_rx) = mpsc::channel(8);
        let pipeline = Pipeline::new(
            session.clone(),
            room.clone(),
            self.engine.clone(),
            replies,
            participant.clone(),
            self.config.audio_track_timeout,
        );
        let mut pipeline = tokio::spawn(pipeline.run(track_rx));

        session.advance(SessionState::Active);
        tracing::info!("Session active, init took {:?}", started.elapsed());

        let mut liveness = tokio::time::interval(self.config.liveness_interval);
        liveness.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut pipeline_running = true;

        let result = loop {
            tokio::select! {
                _ = session.running().cancelled() => {
                    tracing::info!("Session stopped");
                    break Ok(());
                }
                _ = liveness.tick() => {
                    if room.connection_state() == ConnectionState::Disconnected {
                        tracing::info!("Room connection lost");
                        break Ok(());
                    }
                }
                finished = &mut pipeline, if pipeline_running => {
                    pipeline_running = false;
                    match finished {
                        Ok(Ok(exit)) => tracing::info!("Pipeline finished: {:?}", exit),
                        Ok(Err(e)) => break Err(e),
                        Err(e) => break Err(SessionError::Pipeline(e.to_string())),
                    }
                }
                event = events.recv() => match event {
                    None => {
                        tracing::info!("Room event stream closed");
                        break Ok(());
                    }
                    Some(RoomEvent::ParticipantDisconnected(who)) if who == participant => {
                        tracing::info!("Participant left: {}", who);
                        break Ok(());
                    }
                    Some(RoomEvent::Disconnected { reason }) => {
                        tracing::info!("Room disconnected: {}", reason.as_deref().unwrap_or("unknown"));
                        break Ok(());
                    }
                    Some(RoomEvent::ConnectionStateChanged(ConnectionState::Disconnected)) => {
                        tracing::info!("Room connection lost");
                        break Ok(());
                    }
                    Some(RoomEvent::TrackSubscribed(track)) => {
                        if let Err(e) = track_tx.try_send(track) {
                            tracing::debug!("Track not routed: {}", e);
                        }
                    }
                    Some(RoomEvent::DataReceived { payload, .. }) => {
                        if control_tx.try_send(payload).is_err() {
                            tracing::warn!("Control channel backlog full, dropping message");
                        }
                    }
                    Some(other) => tracing::debug!("Room event: {:?}", other),
                },
            }
        };

        if pipeline_running {
            teardown.set_pipeline(pipeline);
        }
        result
    }

    /// Returns `None` if the session was stopped before anyone joined.
    async fn wait_for_participant(
        &self,
        room: &dyn MediaRoom,
        events: &mut mpsc::Receiver<RoomEvent>,
    ) -> Result<Option<ParticipantId>, SessionError> {
        if let Some(participant) = room.remote_participants().into_iter().next() {
            return Ok(Some(participant));
        }

        tracing::info!("Waiting for participant...");
        let joined = async {
            while let Some(event) = events.recv().await {
                match event {
                    RoomEvent::ParticipantConnected(participant) => return Ok(participant),
                    RoomEvent::Disconnected { .. }
                    | RoomEvent::ConnectionStateChanged(ConnectionState::Disconnected) => break,
                    other => tracing::debug!("Room event before participant: {:?}", other),
                }
            }
            Err(SessionError::Connection(
                "room closed before a participant joined".to_string(),
            ))
        };

        let limit = self.config.participant_timeout;
        tokio::select! {
            _ = self.session.running().cancelled() => Ok(None),
            joined = tokio::time::timeout(limit, joined) => match joined {
                Ok(participant) => participant.map(Some),
                Err(_) => Err(SessionError::ParticipantTimeout(limit)),
            },
        }
    }
}

/// Releases everything a session holds. Runs once no matter how many
/// paths trigger it.
struct Teardown {
    session: Arc<Session>,
    room: Arc<dyn MediaRoom>,
    output: Arc<dyn SpeechOutput>,
    dialogue: Arc<dyn Dialogue>,
    timeout: Duration,
    tasks: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
    pipeline: Mutex<Option<PipelineHandle>>,
    outbox_stop: CancellationToken,
    outbox_task: Mutex<Option<JoinHandle<()>>>,
}

impl Teardown {
    fn new(
        session: Arc<Session>,
        room: Arc<dyn MediaRoom>,
        output: Arc<dyn SpeechOutput>,
        dialogue: Arc<dyn Dialogue>,
        timeout: Duration,
    ) -> Self {
        Self {
            session,
            room,
            output,
            dialogue,
            timeout,
            tasks: Mutex::new(Vec::new()),
            pipeline: Mutex::new(None),
            outbox_stop: CancellationToken::new(),
            outbox_task: Mutex::new(None),
        }
    }

    fn track(&self, name: &'static str, handle: JoinHandle<()>) {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((name, handle));
    }

    fn set_pipeline(&self, handle: PipelineHandle) {
        *self.pipeline.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    fn set_outbox_task(&self, handle: JoinHandle<()>) {
        *self.outbox_task.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    async fn run(&self) {
        if !self.session.begin_ending() {
            tracing::debug!("Teardown already in progress");
            return;
        }
        let started = Instant::now();
        self.session.stop();

        let pipeline = self
            .pipeline
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = pipeline {
            join_within("pipeline", handle, self.timeout).await;
        }
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for (name, handle) in tasks {
            join_within(name, handle, self.timeout).await;
        }

        if self.session.claim_dialogue_end() {
            match tokio::time::timeout(self.timeout, self.dialogue.end_session()).await {
                Ok(Ok(())) => tracing::info!("Dialogue session ended"),
                Ok(Err(e)) => tracing::debug!("Ending dialogue session failed: {:#}", e),
                Err(_) => tracing::debug!("Ending dialogue session timed out"),
            }
        }

        match tokio::time::timeout(self.timeout, self.output.stop()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!("Stopping speech output failed: {:#}", e),
            Err(_) => tracing::debug!("Stopping speech output timed out"),
        }

        self.outbox_stop.cancel();
        let outbox = self
            .outbox_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = outbox {
            join_within("outbox", handle, self.timeout).await;
        }

        match tokio::time::timeout(self.timeout, self.room.disconnect()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!("Room disconnect failed: {:#}", e),
            Err(_) => tracing::debug!("Room disconnect timed out"),
        }

        self.session.advance(SessionState::Closed);
        tracing::info!(
            "Session {} closed, teardown took {:?}",
            self.session.id(),
            started.elapsed()
        );
    }
}

async fn join_within<T>(name: &str, handle: JoinHandle<T>, limit: Duration) {
    let abort = handle.abort_handle();
    match tokio::time::timeout(limit, handle).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => tracing::warn!("{} task failed: {}", name, e),
        Err(_) => {
            tracing::warn!("{} task did not stop within {:?}, aborting", name, limit);
            abort.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialogue::MockDialogue;
    use crate::fakes::{FakeConnector, FakeEngine, FakeRoom};
    use crate::media::MockSpeechOutput;
    use avatar_types::{TranscriptEvent, TurnRole};
    use mockall::predicate::eq;
    use serde_json::json;
    use std::sync::atomic::Ordering;

    fn user() -> ParticipantId {
        ParticipantId::new("user-1")
    }

    fn orchestrator(
        config: SessionConfig,
        connector: FakeConnector,
        engine: Arc<FakeEngine>,
        output: MockSpeechOutput,
        dialogue: MockDialogue,
    ) -> SessionOrchestrator {
        SessionOrchestrator::new(
            config,
            Arc::new(connector),
            engine,
            Arc::new(output),
            Arc::new(dialogue),
        )
    }

    /// Speech output that reports every spoken line on a channel.
    fn recording_output() -> (MockSpeechOutput, mpsc::UnboundedReceiver<String>) {
        let (spoken_tx, spoken) = mpsc::unbounded_channel();
        let mut output = MockSpeechOutput::new();
        output.expect_start().times(1).returning(|| Ok(()));
        output.expect_say().returning(move |text, _| {
            let _ = spoken_tx.send(text.to_string());
            Ok(())
        });
        output.expect_stop().times(1).returning(|| Ok(()));
        (output, spoken)
    }

    #[tokio::test]
    async fn test_session_lifecycle_with_mode_switch() {
        let room = FakeRoom::new();
        room.add_participant(&user());
        let _audio = room.publish_audio(&user(), "TR_mic");
        let (connection, events) = room.connection();
        let (engine, mut harness) = FakeEngine::new();
        let (output, mut spoken) = recording_output();

        let (recorded_tx, mut recorded) = mpsc::unbounded_channel();
        let mut dialogue = MockDialogue::new();
        dialogue
            .expect_start_session()
            .times(1)
            .returning(|| Some("s-1".to_string()));
        dialogue
            .expect_record_turn()
            .with(eq("s-1"), eq(TurnRole::Assistant), eq("The weather is really nice today"))
            .times(1)
            .returning(move |_, _, _| {
                let _ = recorded_tx.send(());
                Ok(())
            });
        dialogue.expect_end_session().times(1).returning(|| Ok(()));

        let orchestrator = orchestrator(
            SessionConfig::default(),
            FakeConnector::new(connection),
            engine,
            output,
            dialogue,
        );
        let session = orchestrator.session();
        let mut state = session.watch_state();
        let mut mode = session.mode().subscribe();
        let task = tokio::spawn(orchestrator.run());

        assert_eq!(spoken.recv().await.unwrap(), "Hello! I am ready to chat.");
        state.wait_for(|s| *s == SessionState::Active).await.unwrap();

        events
            .send(RoomEvent::DataReceived {
                participant: Some(user()),
                payload: br#"{"type":"mode_switch","mode":"human"}"#.to_vec(),
            })
            .await
            .unwrap();
        mode.wait_for(|m| *m == Mode::Human).await.unwrap();

        let transcripts = harness.transcripts().await;
        transcripts
            .send(TranscriptEvent::final_("The weather is really nice today"))
            .await
            .unwrap();
        assert_eq!(spoken.recv().await.unwrap(), "The weather is really nice today");
        recorded.recv().await.unwrap();

        events
            .send(RoomEvent::ParticipantDisconnected(user()))
            .await
            .unwrap();
        task.await.unwrap().unwrap();

        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(harness.releases.load(Ordering::SeqCst), 1);
        assert_eq!(room.disconnects.load(Ordering::SeqCst), 1);
        assert_eq!(
            room.published_messages(),
            vec![json!({"type": "mode_changed", "mode": "human"})]
        );
    }

    #[tokio::test]
    async fn test_text_input_is_answered_in_ai_mode() {
        let room = FakeRoom::new();
        room.add_participant(&user());
        let _audio = room.publish_audio(&user(), "TR_mic");
        let (connection, events) = room.connection();
        let (engine, _harness) = FakeEngine::new();
        let (output, mut spoken) = recording_output();

        let mut dialogue = MockDialogue::new();
        dialogue
            .expect_start_session()
            .returning(|| Some("s-1".to_string()));
        dialogue
            .expect_generate_reply()
            .withf(|id, text, _| id.as_deref() == Some("s-1") && text == "tell me a joke")
            .times(1)
            .returning(|_, _, _| "Why did the robot cross the road?".to_string());
        dialogue.expect_end_session().times(1).returning(|| Ok(()));

        let config = SessionConfig {
            greeting: None,
            ..SessionConfig::default()
        };
        let orchestrator = orchestrator(
            config,
            FakeConnector::new(connection),
            engine,
            output,
            dialogue,
        );
        let mut state = orchestrator.session().watch_state();
        let task = tokio::spawn(orchestrator.run());
        state.wait_for(|s| *s == SessionState::Active).await.unwrap();

        events
            .send(RoomEvent::DataReceived {
                participant: None,
                payload: br#"{"type":"text_input","text":"tell me a joke"}"#.to_vec(),
            })
            .await
            .unwrap();
        assert_eq!(
            spoken.recv().await.unwrap(),
            "Why did the robot cross the road?"
        );

        events
            .send(RoomEvent::Disconnected { reason: None })
            .await
            .unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_connection_failure_closes_session() {
        let (engine, _harness) = FakeEngine::new();
        let orchestrator = orchestrator(
            SessionConfig::default(),
            FakeConnector::failing(),
            engine,
            MockSpeechOutput::new(),
            MockDialogue::new(),
        );
        let session = orchestrator.session();

        let result = orchestrator.run().await;
        assert!(matches!(result, Err(SessionError::Connection(_))));
        assert_eq!(session.state(), SessionState::Closed);
        assert!(!session.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_participant_timeout_is_reported() {
        let room = FakeRoom::new();
        let (connection, _events) = room.connection();
        let (engine, _harness) = FakeEngine::new();
        let mut output = MockSpeechOutput::new();
        output.expect_start().never();
        output.expect_stop().returning(|| Ok(()));
        let mut dialogue = MockDialogue::new();
        dialogue.expect_start_session().never();
        dialogue.expect_end_session().never();

        let config = SessionConfig {
            participant_timeout: Duration::from_secs(5),
            ..SessionConfig::default()
        };
        let orchestrator = orchestrator(
            config,
            FakeConnector::new(connection),
            engine,
            output,
            dialogue,
        );
        let session = orchestrator.session();

        let result = orchestrator.run().await;
        assert!(matches!(result, Err(SessionError::ParticipantTimeout(_))));
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(
            room.published_messages(),
            vec![json!({"type": "error", "message": "No participant joined within 5s"})]
        );
        assert_eq!(room.disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_speech_output_failure_is_fatal() {
        let room = FakeRoom::new();
        room.add_participant(&user());
        let (connection, _events) = room.connection();
        let (engine, _harness) = FakeEngine::new();
        let mut output = MockSpeechOutput::new();
        output
            .expect_start()
            .returning(|| Err(anyhow::anyhow!("avatar service unavailable")));
        output.expect_say().never();
        output.expect_stop().returning(|| Ok(()));
        let mut dialogue = MockDialogue::new();
        dialogue
            .expect_start_session()
            .returning(|| Some("s-1".to_string()));
        dialogue.expect_end_session().times(1).returning(|| Ok(()));

        let orchestrator = orchestrator(
            SessionConfig::default(),
            FakeConnector::new(connection),
            engine.clone(),
            output,
            dialogue,
        );

        let result = orchestrator.run().await;
        assert!(matches!(result, Err(SessionError::SpeechOutput(_))));
        assert_eq!(engine.opened(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_audio_track_timeout_ends_session() {
        let room = FakeRoom::new();
        room.add_participant(&user());
        let (connection, _events) = room.connection();
        let (engine, harness) = FakeEngine::new();
        let (output, _spoken) = recording_output();
        let mut dialogue = MockDialogue::new();
        dialogue.expect_start_session().returning(|| None);
        dialogue.expect_end_session().never();

        let orchestrator = orchestrator(
            SessionConfig::default(),
            FakeConnector::new(connection),
            engine,
            output,
            dialogue,
        );
        let session = orchestrator.session();

        let result = orchestrator.run().await;
        assert!(matches!(result, Err(SessionError::AudioTrackTimeout(_))));
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(harness.releases.load(Ordering::SeqCst), 0);
        assert_eq!(
            room.published_messages(),
            vec![json!({"type": "error", "message": "No audio track found within 30s"})]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_drop_detected_by_liveness_poll() {
        let room = FakeRoom::new();
        room.add_participant(&user());
        let _audio = room.publish_audio(&user(), "TR_mic");
        let (connection, _events) = room.connection();
        let (engine, _harness) = FakeEngine::new();
        let (output, _spoken) = recording_output();
        let mut dialogue = MockDialogue::new();
        dialogue.expect_start_session().returning(|| None);

        let config = SessionConfig {
            greeting: None,
            ..SessionConfig::default()
        };
        let orchestrator = orchestrator(
            config,
            FakeConnector::new(connection),
            engine,
            output,
            dialogue,
        );
        let mut state = orchestrator.session().watch_state();
        let task = tokio::spawn(orchestrator.run());
        state.wait_for(|s| *s == SessionState::Active).await.unwrap();

        room.set_state(ConnectionState::Disconnected);
        task.await.unwrap().unwrap();
        assert_eq!(*state.borrow(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_racing_teardowns_end_dialogue_once() {
        let room = FakeRoom::new();
        let (outbox, _outbox_rx) = mpsc::channel(8);
        let session = Arc::new(Session::new("test", Mode::Ai, outbox));
        session.set_dialogue_session_id("s-1".to_string());
        let mut output = MockSpeechOutput::new();
        output.expect_stop().times(1).returning(|| Ok(()));
        let mut dialogue = MockDialogue::new();
        dialogue.expect_end_session().times(1).returning(|| Ok(()));

        let teardown = Teardown::new(
            session.clone(),
            room.clone(),
            Arc::new(output),
            Arc::new(dialogue),
            Duration::from_secs(2),
        );
        tokio::join!(teardown.run(), teardown.run(), teardown.run());

        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(room.disconnects.load(Ordering::SeqCst), 1);
    }
}
