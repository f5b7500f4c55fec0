use std::fmt;
use std::str::FromStr;

/// Conversational behaviour of the avatar.
///
/// `Ai` replies are produced by the dialogue service, `Human` replies are the
/// participant's own transcribed words relayed verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Ai,
    Human,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Ai => "ai",
            Mode::Human => "human",
        }
    }

    /// Lenient decoding used for control messages: only the exact value
    /// `human` selects relay mode, anything else falls back to `Ai`.
    pub fn from_wire(value: &str) -> Self {
        if value == "human" {
            Mode::Human
        } else {
            Mode::Ai
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseModeError(String);

impl fmt::Display for ParseModeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown mode '{}', expected 'ai' or 'human'", self.0)
    }
}

impl std::error::Error for ParseModeError {}

/// Strict parsing, used for configuration and command-line input.
impl FromStr for Mode {
    type Err = ParseModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ai" => Ok(Mode::Ai),
            "human" => Ok(Mode::Human),
            other => Err(ParseModeError(other.to_string())),
        }
    }
}
