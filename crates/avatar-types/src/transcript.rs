/// A single hypothesis emitted by the speech engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptEvent {
    pub text: String,
    pub is_final: bool,
}

impl TranscriptEvent {
    pub fn new(text: impl Into<String>, is_final: bool) -> Self {
        Self {
            text: text.into(),
            is_final,
        }
    }

    pub fn partial(text: impl Into<String>) -> Self {
        Self::new(text, false)
    }

    pub fn final_(text: impl Into<String>) -> Self {
        Self::new(text, true)
    }

    /// The trimmed text of a final transcript, or `None` for partial
    /// hypotheses and blank finals. Only `Some` values warrant a reply.
    pub fn actionable_text(&self) -> Option<&str> {
        if !self.is_final {
            return None;
        }
        let text = self.text.trim();
        if text.is_empty() { None } else { Some(text) }
    }
}
