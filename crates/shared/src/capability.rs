//! The fixed set of on-device AI capabilities and their fault taxonomy.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One of the six on-device AI functions the popup exposes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Debug)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Rewriter,
    Translator,
    Prompt,
    Writer,
    Summarizer,
    Proofreader,
}

impl Capability {
    pub fn all() -> &'static [Capability] {
        &[
            Capability::Rewriter,
            Capability::Translator,
            Capability::Prompt,
            Capability::Writer,
            Capability::Summarizer,
            Capability::Proofreader,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Rewriter => "rewriter",
            Capability::Translator => "translator",
            Capability::Prompt => "prompt",
            Capability::Writer => "writer",
            Capability::Summarizer => "summarizer",
            Capability::Proofreader => "proofreader",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Capability::Rewriter => "Rewriter",
            Capability::Translator => "Translator",
            Capability::Prompt => "Prompt",
            Capability::Writer => "Writer",
            Capability::Summarizer => "Summarizer",
            Capability::Proofreader => "Proofreader",
        }
    }

    /// Hint shown in an empty chat.
    pub fn first_prompt(&self) -> &'static str {
        match self {
            Capability::Rewriter => "What can I rewrite for you today?",
            Capability::Translator => "What can I translate for you today?",
            Capability::Prompt => "What can I help you with today?",
            Capability::Writer => "What can I write for you today?",
            Capability::Summarizer => "What can I summarize for you today?",
            Capability::Proofreader => "What can I proofread for you today?",
        }
    }

    /// Only the general prompt capability takes image/audio input, and it
    /// is the only one that may be sent media without any text.
    pub fn accepts_media(&self) -> bool {
        matches!(self, Capability::Prompt)
    }

    pub fn requires_text(&self) -> bool {
        !self.accepts_media()
    }

    /// Whether replies arrive as a stream of chunks. The translator answers
    /// atomically.
    pub fn streams(&self) -> bool {
        !matches!(self, Capability::Translator)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Capability::all()
            .iter()
            .copied()
            .find(|c| c.as_str() == wanted || c.display_name().to_lowercase() == wanted)
            .ok_or_else(|| format!("Unknown capability: {}", s))
    }
}

/// Result of probing whether a capability's engine can serve requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Availability {
    Ready,
    Unavailable { reason: String },
    PendingDownload,
}

/// Faults raised by capability providers and their sessions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("{capability} is not available: {reason}")]
    Unavailable {
        capability: Capability,
        reason: String,
    },

    #[error("The {capability} model is still downloading")]
    ModelPending { capability: Capability },

    #[error("Failed to create {capability} session: {reason}")]
    SessionCreation {
        capability: Capability,
        reason: String,
    },

    #[error("{0}")]
    Generation(String),

    #[error("Multimodal input rejected: {0}")]
    MultimodalUnsupported(String),
}

impl ProviderError {
    /// Faults raised while obtaining a session rather than while generating.
    pub fn is_session_level(&self) -> bool {
        matches!(
            self,
            ProviderError::Unavailable { .. }
                | ProviderError::ModelPending { .. }
                | ProviderError::SessionCreation { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_capability() {
        assert_eq!("writer".parse::<Capability>(), Ok(Capability::Writer));
        assert_eq!(" Proofreader ".parse::<Capability>(), Ok(Capability::Proofreader));
        assert!("painter".parse::<Capability>().is_err());
    }

    #[test]
    fn test_media_rules() {
        assert!(Capability::Prompt.accepts_media());
        assert!(!Capability::Prompt.requires_text());
        for cap in Capability::all().iter().filter(|c| **c != Capability::Prompt) {
            assert!(cap.requires_text(), "{} should require text", cap);
        }
        assert!(!Capability::Translator.streams());
        assert!(Capability::Writer.streams());
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&Capability::Summarizer).unwrap();
        assert_eq!(json, "\"summarizer\"");
    }
}
