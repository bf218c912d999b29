//! Capability providers backed by a locally running model server.
//!
//! One provider type covers all six capabilities. Each capability frames
//! the user's text the way its engine expects: instruction-framed single
//! turns for rewrite/write/summarize/translate/proofread, and a retained
//! conversation for the general prompt.

use async_trait::async_trait;
use parking_lot::Mutex;
use shared::settings::{PopupSettings, SessionOptions};
use shared::stream::StreamChunk;
use shared::{Availability, Capability, ProviderError};
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tracing::{debug, warn};

use crate::capability::{CapabilityProvider, CapabilitySession, ContentPart, ProviderInput};
use crate::ollama::{OllamaClient, OllamaMessage, RejectedRequest};

const PROOFREAD_INSTRUCTION: &str = "Please proofread and correct this text for grammar, spelling, punctuation errors, return the corrected response, and explain the errors in the least amount of sentences possible: ";

pub struct OnDeviceProvider {
    capability: Capability,
    client: OllamaClient,
}

impl OnDeviceProvider {
    pub fn new(capability: Capability, client: OllamaClient) -> Self {
        Self { capability, client }
    }

    /// One provider per capability, each on the model configured for it.
    pub fn all_from_settings(settings: &PopupSettings) -> Vec<Arc<dyn CapabilityProvider>> {
        Capability::all()
            .iter()
            .map(|&cap| {
                let client = OllamaClient::new(&settings.model_server, settings.model_for(cap));
                Arc::new(OnDeviceProvider::new(cap, client)) as Arc<dyn CapabilityProvider>
            })
            .collect()
    }
}

#[async_trait]
impl CapabilityProvider for OnDeviceProvider {
    fn capability(&self) -> Capability {
        self.capability
    }

    async fn probe_availability(&self) -> Option<Availability> {
        let status = match self.client.list_models().await {
            Err(e) => Availability::Unavailable {
                reason: format!("the local model server could not be reached ({})", e),
            },
            Ok(models) if OllamaClient::has_model(&models, self.client.model()) => {
                Availability::Ready
            }
            Ok(_) => Availability::PendingDownload,
        };
        debug!(capability = %self.capability, ?status, "probed availability");
        Some(status)
    }

    async fn create(
        &self,
        options: &SessionOptions,
    ) -> Result<Arc<dyn CapabilitySession>, ProviderError> {
        let system = match self.capability {
            Capability::Rewriter => Some(
                "Rewrite the user's text. Keep its meaning, improve clarity and flow. \
                 Reply with the rewritten text only."
                    .to_string(),
            ),
            Capability::Writer => Some(
                "Write the piece the user asks for. Reply with the written text only."
                    .to_string(),
            ),
            Capability::Summarizer => Some(
                "Summarize the user's text in a few concise sentences. \
                 Reply with the summary only."
                    .to_string(),
            ),
            Capability::Translator => {
                let (Some(src), Some(tgt)) = (&options.source_language, &options.target_language)
                else {
                    return Err(ProviderError::SessionCreation {
                        capability: self.capability,
                        reason: "source and target languages are required".into(),
                    });
                };
                Some(format!(
                    "Translate the user's text from {} to {}. Reply with the translation only.",
                    src, tgt
                ))
            }
            Capability::Prompt | Capability::Proofreader => {
                if options.expected_languages.is_empty() {
                    None
                } else {
                    Some(format!(
                        "Respond in one of these languages: {}.",
                        options.expected_languages.join(", ")
                    ))
                }
            }
        };

        Ok(Arc::new(OnDeviceSession {
            capability: self.capability,
            client: self.client.clone(),
            system,
            history: Mutex::new(Vec::new()),
        }))
    }
}

pub struct OnDeviceSession {
    capability: Capability,
    client: OllamaClient,
    system: Option<String>,
    /// Prior exchanges, kept only by the general prompt capability.
    history: Mutex<Vec<OllamaMessage>>,
}

impl OnDeviceSession {
    fn keeps_history(&self) -> bool {
        self.capability == Capability::Prompt
    }

    fn user_message(&self, input: &ProviderInput) -> Result<OllamaMessage, ProviderError> {
        match input {
            ProviderInput::Text(text) => Ok(match self.capability {
                Capability::Proofreader => {
                    OllamaMessage::new("user", format!("{}{}", PROOFREAD_INSTRUCTION, text))
                }
                _ => OllamaMessage::new("user", text.clone()),
            }),
            ProviderInput::Multimodal(parts) => {
                if !self.capability.accepts_media() {
                    return Err(ProviderError::MultimodalUnsupported(format!(
                        "{} only accepts text",
                        self.capability.display_name()
                    )));
                }
                let mut msg = OllamaMessage::new("user", input.text());
                for part in parts {
                    match part {
                        ContentPart::Text(_) => {}
                        ContentPart::Image { data, .. } => msg.images.push(data.clone()),
                        ContentPart::Audio { .. } => {
                            return Err(ProviderError::MultimodalUnsupported(
                                "audio input is not supported by the local model".into(),
                            ))
                        }
                    }
                }
                Ok(msg)
            }
        }
    }

    fn conversation(&self, user: OllamaMessage) -> Vec<OllamaMessage> {
        let mut messages = Vec::new();
        if let Some(system) = &self.system {
            messages.push(OllamaMessage::new("system", system.clone()));
        }
        if self.keeps_history() {
            messages.extend(self.history.lock().iter().cloned());
        }
        messages.push(user);
        messages
    }

    fn remember(&self, mut user: OllamaMessage, reply: &str) {
        if !self.keeps_history() {
            return;
        }
        // Images are not replayed on later turns.
        user.images.clear();
        let mut history = self.history.lock();
        history.push(user);
        history.push(OllamaMessage::new("assistant", reply));
    }

    fn classify_failure(&self, input: &ProviderInput, err: anyhow::Error) -> ProviderError {
        let rejected = err.downcast_ref::<RejectedRequest>().is_some();
        if rejected && input.has_media() {
            ProviderError::MultimodalUnsupported(err.to_string())
        } else {
            ProviderError::Generation(err.to_string())
        }
    }
}

#[async_trait]
impl CapabilitySession for OnDeviceSession {
    async fn generate(&self, input: &ProviderInput) -> Result<String, ProviderError> {
        let user = self.user_message(input)?;
        let messages = self.conversation(user.clone());
        let reply = self
            .client
            .generate(&messages)
            .await
            .map_err(|e| self.classify_failure(input, e))?;
        self.remember(user, &reply);
        Ok(reply)
    }

    async fn generate_stream(
        &self,
        input: &ProviderInput,
        tx: UnboundedSender<StreamChunk>,
    ) -> Result<(), ProviderError> {
        let user = self.user_message(input)?;
        let messages = self.conversation(user.clone());

        // Relay chunks so the full reply can be remembered afterwards.
        let (inner_tx, mut inner_rx) = unbounded_channel();
        let request = async {
            let result = self.client.generate_stream(&messages, &inner_tx).await;
            drop(inner_tx);
            result
        };
        let relay = async {
            let mut full = String::new();
            let mut completed = true;
            while let Some(chunk) = inner_rx.recv().await {
                match &chunk {
                    StreamChunk::Text(t) => full.push_str(t),
                    StreamChunk::Error(_) => completed = false,
                    StreamChunk::Done => {}
                }
                let _ = tx.send(chunk);
            }
            (full, completed)
        };
        let (result, (full, completed)) = tokio::join!(request, relay);
        result.map_err(|e| self.classify_failure(input, e))?;

        if completed {
            self.remember(user, &full);
        } else {
            warn!(capability = %self.capability, "stream ended with an error");
        }
        Ok(())
    }

    fn supports_destroy(&self) -> bool {
        true
    }

    async fn destroy(&self) -> Result<(), ProviderError> {
        self.history.lock().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(capability: Capability) -> OnDeviceSession {
        OnDeviceSession {
            capability,
            client: OllamaClient::new("http://127.0.0.1:1", "gemma3:1b"),
            system: None,
            history: Mutex::new(Vec::new()),
        }
    }

    #[tokio::test]
    async fn test_translator_requires_languages() {
        let provider = OnDeviceProvider::new(
            Capability::Translator,
            OllamaClient::new("http://127.0.0.1:1", "gemma3:1b"),
        );
        let err = provider.create(&SessionOptions::default()).await.err();
        assert!(matches!(err, Some(ProviderError::SessionCreation { .. })));
    }

    #[test]
    fn test_proofreader_wraps_text() {
        let s = session(Capability::Proofreader);
        let msg = s.user_message(&ProviderInput::Text("teh cat".into())).unwrap();
        assert!(msg.content.starts_with("Please proofread"));
        assert!(msg.content.ends_with("teh cat"));
    }

    #[test]
    fn test_audio_is_rejected_as_multimodal() {
        let s = session(Capability::Prompt);
        let input = ProviderInput::Multimodal(vec![
            ContentPart::Text("listen".into()),
            ContentPart::Audio {
                mime_type: "audio/wav".into(),
                data: "AAAA".into(),
            },
        ]);
        assert!(matches!(
            s.user_message(&input),
            Err(ProviderError::MultimodalUnsupported(_))
        ));
    }

    #[test]
    fn test_only_prompt_keeps_history() {
        let prompt = session(Capability::Prompt);
        prompt.remember(OllamaMessage::new("user", "hi"), "hello");
        assert_eq!(prompt.conversation(OllamaMessage::new("user", "again")).len(), 3);

        let writer = session(Capability::Writer);
        writer.remember(OllamaMessage::new("user", "hi"), "hello");
        assert_eq!(writer.conversation(OllamaMessage::new("user", "again")).len(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_server_is_unavailable() {
        let provider = OnDeviceProvider::new(
            Capability::Summarizer,
            OllamaClient::new("http://127.0.0.1:1", "gemma3:1b"),
        );
        assert!(matches!(
            provider.probe_availability().await,
            Some(Availability::Unavailable { .. })
        ));
    }
}
