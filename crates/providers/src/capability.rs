//! Uniform contract over the six on-device capabilities.
//!
//! Every capability is reached the same way: an optional availability
//! probe, `create` for a reusable session, then `generate` (atomic) or
//! `generate_stream` (chunked) on that session. Implementations adapt this
//! to whatever call shape their engine actually has.

use async_trait::async_trait;
use shared::settings::SessionOptions;
use shared::stream::StreamChunk;
use shared::{Availability, Capability, MediaAttachment, MediaKind, ProviderError};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

/// Instruction sent with media when the user typed nothing.
pub const DEFAULT_MEDIA_INSTRUCTION: &str =
    "Please analyze this media and describe what you see/hear.";

/// One part of a structured multimodal request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentPart {
    Text(String),
    Image { mime_type: String, data: String },
    Audio { mime_type: String, data: String },
}

/// What a session is asked to work on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderInput {
    Text(String),
    Multimodal(Vec<ContentPart>),
}

impl ProviderInput {
    /// Builds a multimodal request. With no text, the default instruction
    /// leads the content list.
    pub fn multimodal(text: &str, media: &[MediaAttachment]) -> Self {
        let mut parts = Vec::with_capacity(media.len() + 1);
        if text.is_empty() {
            parts.push(ContentPart::Text(DEFAULT_MEDIA_INSTRUCTION.to_string()));
        } else {
            parts.push(ContentPart::Text(text.to_string()));
        }
        for m in media {
            let data = m.base64_data().to_string();
            parts.push(match m.kind {
                MediaKind::Image => ContentPart::Image {
                    mime_type: m.mime_type.clone(),
                    data,
                },
                MediaKind::Audio => ContentPart::Audio {
                    mime_type: m.mime_type.clone(),
                    data,
                },
            });
        }
        ProviderInput::Multimodal(parts)
    }

    /// All text parts joined, ignoring media.
    pub fn text(&self) -> String {
        match self {
            ProviderInput::Text(t) => t.clone(),
            ProviderInput::Multimodal(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text(t) => Some(t.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    pub fn has_media(&self) -> bool {
        match self {
            ProviderInput::Text(_) => false,
            ProviderInput::Multimodal(parts) => {
                parts.iter().any(|p| !matches!(p, ContentPart::Text(_)))
            }
        }
    }
}

/// Factory for sessions of one capability.
#[async_trait]
pub trait CapabilityProvider: Send + Sync {
    fn capability(&self) -> Capability;

    /// `None` when the engine exposes no probe.
    async fn probe_availability(&self) -> Option<Availability> {
        None
    }

    async fn create(
        &self,
        options: &SessionOptions,
    ) -> Result<Arc<dyn CapabilitySession>, ProviderError>;
}

/// A live, reusable handle onto a capability's engine.
#[async_trait]
pub trait CapabilitySession: Send + Sync {
    async fn generate(&self, input: &ProviderInput) -> Result<String, ProviderError>;

    /// Streams the reply into `tx` as ordered text fragments.
    ///
    /// Contract: if the request fails *before* any chunk is sent, returns
    /// `Err(...)`. Once streaming starts, failures go through
    /// `StreamChunk::Error` and the method returns `Ok(())`.
    async fn generate_stream(
        &self,
        input: &ProviderInput,
        tx: UnboundedSender<StreamChunk>,
    ) -> Result<(), ProviderError>;

    fn supports_destroy(&self) -> bool {
        false
    }

    /// Best-effort release of engine resources.
    async fn destroy(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}
