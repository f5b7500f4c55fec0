use crate::dialogue::Dialogue;
use crate::media::SpeechOutput;
use crate::session_state::Session;
use avatar_types::{Mode, TurnRole};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// A queued text input together with the mode it was accepted under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyJob {
    pub text: String,
    pub mode: Mode,
}

/// Turns one piece of user text into avatar speech according to the current mode.
#[derive(Clone)]
pub struct ReplyDriver {
    session: Arc<Session>,
    dialogue: Arc<dyn Dialogue>,
    output: Arc<dyn SpeechOutput>,
    record_relayed_turns: bool,
}

impl ReplyDriver {
    pub fn new(
        session: Arc<Session>,
        dialogue: Arc<dyn Dialogue>,
        output: Arc<dyn SpeechOutput>,
        record_relayed_turns: bool,
    ) -> Self {
        Self {
            session,
            dialogue,
            output,
            record_relayed_turns,
        }
    }

    pub async fn respond(&self, text: &str) {
        // Read once so a switch mid-reply only affects later input.
        let mode = self.session.mode().current_mode();
        self.respond_as(mode, text).await;
    }

    /// Answers `text` under `mode` regardless of the session's current mode.
    pub async fn respond_as(&self, mode: Mode, text: &str) {
        match mode {
            Mode::Ai => {
                let vision_context = self.session.vision_context();
                let session_id = self.session.dialogue_session_id().map(str::to_string);
                let reply = self
                    .dialogue
                    .generate_reply(session_id, text, &vision_context)
                    .await;
                if reply.trim().is_empty() {
                    tracing::debug!("Empty reply, nothing to say");
                    return;
                }
                self.speak(&reply).await;
            }
            Mode::Human => {
                tracing::info!("Relaying: {}", text);
                self.speak(text).await;
                self.record_relayed(text).await;
            }
        }
    }

    async fn speak(&self, text: &str) {
        if let Err(e) = self.output.say(text, true).await {
            tracing::error!("Speech output failed: {:#}", e);
        }
    }

    async fn record_relayed(&self, text: &str) {
        if !self.record_relayed_turns {
            return;
        }
        let Some(session_id) = self.session.dialogue_session_id() else {
            return;
        };
        if let Err(e) = self
            .dialogue
            .record_turn(session_id, TurnRole::Assistant, text)
            .await
        {
            tracing::debug!("Relayed turn not recorded: {:#}", e);
        }
    }
}

/// Drains the session's reply queue one item at a time until stopped.
pub async fn run_reply_queue(
    mut queue: mpsc::Receiver<ReplyJob>,
    replies: ReplyDriver,
    stop: CancellationToken,
) {
    loop {
        let job = tokio::select! {
            _ = stop.cancelled() => break,
            next = queue.recv() => match next {
                Some(job) => job,
                None => break,
            },
        };
        replies.respond_as(job.mode, &job.text).await;
    }
    tracing::debug!("Reply queue stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialogue::MockDialogue;
    use crate::media::MockSpeechOutput;
    use mockall::Sequence;
    use mockall::predicate::{always, eq};

    fn session(mode: Mode) -> Arc<Session> {
        let (outbox, _) = mpsc::channel(8);
        Arc::new(Session::new("test", mode, outbox))
    }

    fn driver(
        session: &Arc<Session>,
        dialogue: MockDialogue,
        output: MockSpeechOutput,
    ) -> ReplyDriver {
        ReplyDriver::new(session.clone(), Arc::new(dialogue), Arc::new(output), true)
    }

    #[tokio::test]
    async fn test_ai_mode_generates_with_vision_context() {
        let session = session(Mode::Ai);
        session.set_dialogue_session_id("s-1".to_string());
        session.set_vision_context("a red mug on the desk".to_string());

        let mut dialogue = MockDialogue::new();
        dialogue
            .expect_generate_reply()
            .withf(|id, text, vision| {
                id.as_deref() == Some("s-1") && text == "what is this" && vision == "a red mug on the desk"
            })
            .times(1)
            .returning(|_, _, _| "It looks like a mug.".to_string());
        let mut output = MockSpeechOutput::new();
        output
            .expect_say()
            .with(eq("It looks like a mug."), eq(true))
            .times(1)
            .returning(|_, _| Ok(()));

        driver(&session, dialogue, output).respond("what is this").await;
    }

    #[tokio::test]
    async fn test_human_mode_relays_verbatim() {
        let session = session(Mode::Human);
        session.set_dialogue_session_id("s-1".to_string());

        let mut dialogue = MockDialogue::new();
        dialogue.expect_generate_reply().never();
        dialogue
            .expect_record_turn()
            .with(
                eq("s-1"),
                eq(TurnRole::Assistant),
                eq("The weather is really nice today"),
            )
            .times(1)
            .returning(|_, _, _| Ok(()));
        let mut output = MockSpeechOutput::new();
        output
            .expect_say()
            .with(eq("The weather is really nice today"), eq(true))
            .times(1)
            .returning(|_, _| Ok(()));

        driver(&session, dialogue, output)
            .respond("The weather is really nice today")
            .await;
    }

    #[tokio::test]
    async fn test_human_mode_skips_recording_without_session() {
        let session = session(Mode::Human);
        let mut dialogue = MockDialogue::new();
        dialogue.expect_record_turn().never();
        let mut output = MockSpeechOutput::new();
        output.expect_say().times(1).returning(|_, _| Ok(()));

        driver(&session, dialogue, output).respond("hi").await;
    }

    #[tokio::test]
    async fn test_failures_are_contained() {
        let session = session(Mode::Human);
        session.set_dialogue_session_id("s-1".to_string());

        let mut dialogue = MockDialogue::new();
        dialogue
            .expect_record_turn()
            .returning(|_, _, _| Err(anyhow::anyhow!("history unavailable")));
        let mut output = MockSpeechOutput::new();
        output
            .expect_say()
            .times(2)
            .returning(|_, _| Err(anyhow::anyhow!("avatar offline")));

        let replies = driver(&session, dialogue, output);
        replies.respond("first").await;
        replies.respond("second").await;
    }

    #[tokio::test]
    async fn test_empty_reply_is_not_spoken() {
        let session = session(Mode::Ai);
        let mut dialogue = MockDialogue::new();
        dialogue
            .expect_generate_reply()
            .returning(|_, _, _| "  ".to_string());
        let mut output = MockSpeechOutput::new();
        output.expect_say().never();

        driver(&session, dialogue, output).respond("hello").await;
    }

    #[tokio::test]
    async fn test_queue_replies_in_order() {
        let session = session(Mode::Ai);
        let mut dialogue = MockDialogue::new();
        dialogue
            .expect_generate_reply()
            .returning(|_, text, _| format!("echo {text}"));
        let mut seq = Sequence::new();
        let mut output = MockSpeechOutput::new();
        for expected in ["echo one", "echo two", "echo three"] {
            output
                .expect_say()
                .with(eq(expected), always())
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_, _| Ok(()));
        }

        let (tx, rx) = mpsc::channel(4);
        for text in ["one", "two", "three"] {
            tx.send(ReplyJob {
                text: text.to_string(),
                mode: Mode::Ai,
            })
            .await
            .unwrap();
        }
        drop(tx);

        run_reply_queue(rx, driver(&session, dialogue, output), CancellationToken::new()).await;
    }

    #[tokio::test]
    async fn test_queued_input_keeps_mode_it_was_accepted_in() {
        let session = session(Mode::Ai);
        session.set_dialogue_session_id("s-1".to_string());

        let mut dialogue = MockDialogue::new();
        dialogue
            .expect_generate_reply()
            .withf(|_, text, _| text == "what is the capital of France?")
            .times(1)
            .returning(|_, _, _| "Paris.".to_string());
        dialogue.expect_record_turn().never();
        let mut output = MockSpeechOutput::new();
        output
            .expect_say()
            .with(eq("Paris."), eq(true))
            .times(1)
            .returning(|_, _| Ok(()));

        let (tx, rx) = mpsc::channel(4);
        tx.send(ReplyJob {
            text: "what is the capital of France?".to_string(),
            mode: Mode::Ai,
        })
        .await
        .unwrap();
        session.mode().switch_mode(Mode::Human);
        drop(tx);

        run_reply_queue(rx, driver(&session, dialogue, output), CancellationToken::new()).await;
    }

    struct GatedDialogue {
        release: tokio::sync::Notify,
        entered: tokio::sync::Notify,
    }

    #[async_trait::async_trait]
    impl Dialogue for GatedDialogue {
        async fn start_session(&self) -> Option<String> {
            None
        }

        async fn generate_reply(
            &self,
            _session_id: Option<String>,
            _text: &str,
            _vision_context: &str,
        ) -> String {
            self.entered.notify_one();
            self.release.notified().await;
            "Generated before the switch.".to_string()
        }

        async fn end_session(&self) -> anyhow::Result<()> {
            Ok(())
        }

        async fn record_turn(
            &self,
            _session_id: &str,
            _role: TurnRole,
            _content: &str,
        ) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_switch_during_generation_finishes_under_old_mode() {
        let session = session(Mode::Ai);
        let dialogue = Arc::new(GatedDialogue {
            release: tokio::sync::Notify::new(),
            entered: tokio::sync::Notify::new(),
        });
        let mut output = MockSpeechOutput::new();
        output
            .expect_say()
            .with(eq("Generated before the switch."), eq(true))
            .times(1)
            .returning(|_, _| Ok(()));
        output
            .expect_say()
            .with(eq("tell me a joke"), always())
            .never();

        let replies = ReplyDriver::new(session.clone(), dialogue.clone(), Arc::new(output), true);
        let reply = tokio::spawn(async move { replies.respond("tell me a joke").await });

        dialogue.entered.notified().await;
        session.mode().switch_mode(Mode::Human);
        dialogue.release.notify_one();
        reply.await.unwrap();
    }
}
