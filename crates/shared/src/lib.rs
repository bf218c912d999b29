pub mod capability;
pub mod chat;
pub mod media;

pub use capability::{Availability, Capability, ProviderError};
pub use chat::{Chat, ChatsTable, MediaKind, MediaRef, Role, Turn};
pub use media::{MediaAttachment, MediaError, MediaLimits, PendingMedia};

pub mod settings {
    use crate::capability::Capability;
    use crate::media::MediaLimits;
    use serde::{Deserialize, Serialize};
    use std::collections::HashMap;
    use std::path::PathBuf;

    fn default_debounce_ms() -> u64 {
        500
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct TranslatorSettings {
        pub source_language: String,
        pub target_language: String,
    }

    impl Default for TranslatorSettings {
        fn default() -> Self {
            Self {
                source_language: "en".into(),
                target_language: "es".into(),
            }
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct PromptSettings {
        pub expected_languages: Vec<String>,
    }

    impl Default for PromptSettings {
        fn default() -> Self {
            Self {
                expected_languages: vec!["en".into()],
            }
        }
    }

    /// Options handed to a provider when it builds a session.
    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct SessionOptions {
        pub source_language: Option<String>,
        pub target_language: Option<String>,
        pub expected_languages: Vec<String>,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct PopupSettings {
        /// Base URL of the local model server.
        pub model_server: String,
        /// Model used by every capability unless overridden below.
        pub model: String,
        #[serde(default)]
        pub model_overrides: HashMap<Capability, String>,
        #[serde(default)]
        pub translator: TranslatorSettings,
        #[serde(default)]
        pub prompt: PromptSettings,
        #[serde(default = "default_debounce_ms")]
        pub save_debounce_ms: u64,
        #[serde(default)]
        pub media: MediaLimits,
        /// Where chats are stored; platform data dir when unset.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub data_dir: Option<PathBuf>,
    }

    impl PopupSettings {
        pub fn model_for(&self, capability: Capability) -> &str {
            self.model_overrides
                .get(&capability)
                .map(|m| m.as_str())
                .unwrap_or(&self.model)
        }

        pub fn session_options(&self, capability: Capability) -> SessionOptions {
            match capability {
                Capability::Translator => SessionOptions {
                    source_language: Some(self.translator.source_language.clone()),
                    target_language: Some(self.translator.target_language.clone()),
                    expected_languages: Vec::new(),
                },
                Capability::Prompt | Capability::Proofreader => SessionOptions {
                    expected_languages: self.prompt.expected_languages.clone(),
                    ..SessionOptions::default()
                },
                _ => SessionOptions::default(),
            }
        }
    }

    impl Default for PopupSettings {
        fn default() -> Self {
            Self {
                model_server: "http://127.0.0.1:11434".into(),
                model: "gemma3:1b".into(),
                model_overrides: HashMap::new(),
                translator: TranslatorSettings::default(),
                prompt: PromptSettings::default(),
                save_debounce_ms: default_debounce_ms(),
                media: MediaLimits::default(),
                data_dir: None,
            }
        }
    }

}

pub mod stream {
    /// One event from a streaming generation.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum StreamChunk {
        /// Next fragment of text, in order.
        Text(String),
        Done,
        /// The stream broke after it had started.
        Error(String),
    }
}
