//! Drives one send from validation through to a committed assistant turn.
//!
//! Every accepted send records exactly one user turn and exactly one
//! assistant turn. Provider faults never escape: they become an assistant
//! turn describing the failure, and the capability's session is dropped so
//! the next send starts fresh.

use providers::{CapabilitySession, ProviderInput, SessionManager};
use shared::stream::StreamChunk;
use shared::{
    Capability, MediaAttachment, MediaError, MediaLimits, PendingMedia, ProviderError, Turn,
};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::registry::ChatRegistry;

/// Subject used for the text-only fallback when the user typed nothing.
const FALLBACK_SUBJECT: &str = "User uploaded media files";
const FALLBACK_NOTE: &str =
    "Note: Full media analysis is not supported by the current model, so only the text was sent.";

/// Progress of a send, for incremental display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseEvent {
    UserTurnRecorded {
        capability: Capability,
        chat_id: String,
    },
    /// Next streamed chunk, in order. Never persisted.
    Partial { chat_id: String, delta: String },
    AssistantTurnCommitted {
        capability: Capability,
        chat_id: String,
        text: String,
    },
}

/// Why a send was ignored. Nothing is recorded for a rejected send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    NoActiveCapability,
    EmptyInput,
    TextRequired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    Unavailable,
    ModelPending,
    SessionCreation,
    Generation,
}

impl From<&ProviderError> for FaultKind {
    fn from(err: &ProviderError) -> Self {
        match err {
            ProviderError::Unavailable { .. } => FaultKind::Unavailable,
            ProviderError::ModelPending { .. } => FaultKind::ModelPending,
            ProviderError::SessionCreation { .. } => FaultKind::SessionCreation,
            ProviderError::Generation(_) | ProviderError::MultimodalUnsupported(_) => {
                FaultKind::Generation
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Rejected(Rejection),
    /// The assistant turn was committed; `fault` is set when it describes a
    /// provider failure rather than a generated reply.
    Replied {
        chat_id: String,
        reply: String,
        fault: Option<FaultKind>,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("No capability is open")]
    NoActiveCapability,

    #[error("{0} does not accept media")]
    NotAccepted(Capability),

    #[error(transparent)]
    Media(#[from] MediaError),
}

/// How a reply reached the transcript.
enum ReplyOutcome {
    /// Still needs committing.
    Final(String),
    /// Streamed and already committed as it completed.
    StreamedAndCommitted(String),
}

pub struct ResponseOrchestrator {
    registry: ChatRegistry,
    sessions: SessionManager,
    pending_media: PendingMedia,
    media_limits: MediaLimits,
    event_sender: Option<mpsc::UnboundedSender<ResponseEvent>>,
}

impl ResponseOrchestrator {
    pub fn new(registry: ChatRegistry, sessions: SessionManager, media_limits: MediaLimits) -> Self {
        Self {
            registry,
            sessions,
            pending_media: PendingMedia::new(),
            media_limits,
            event_sender: None,
        }
    }

    /// Publishes [`ResponseEvent`]s on `event_sender` while sending.
    pub fn with_events(mut self, event_sender: mpsc::UnboundedSender<ResponseEvent>) -> Self {
        self.event_sender = Some(event_sender);
        self
    }

    pub fn registry(&self) -> &ChatRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ChatRegistry {
        &mut self.registry
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn pending_media(&self) -> &PendingMedia {
        &self.pending_media
    }

    pub fn media_limits(&self) -> &MediaLimits {
        &self.media_limits
    }

    /// Enters a capability's section. Leaving another capability for this
    /// one tears its session down first.
    pub async fn open_capability(&mut self, capability: Capability) {
        if let Some(previous) = self.registry.active_capability() {
            if previous != capability {
                self.sessions.teardown(previous).await;
            }
        }
        self.pending_media.clear();
        self.registry.switch_capability(capability);
        info!(%capability, chats = self.registry.list_chats(capability).len(), "capability opened");
    }

    /// Back to the capability menu.
    pub async fn leave_capability(&mut self) {
        if let Some(capability) = self.registry.active_capability() {
            self.sessions.teardown(capability).await;
        }
        self.pending_media.clear();
        self.registry.leave();
    }

    /// Stages an attachment for the next send. Returns the number staged.
    pub fn stage_media(&mut self, attachment: MediaAttachment) -> Result<usize, StageError> {
        let capability = self
            .registry
            .active_capability()
            .ok_or(StageError::NoActiveCapability)?;
        if !capability.accepts_media() {
            return Err(StageError::NotAccepted(capability));
        }
        debug!(name = %attachment.name, kind = %attachment.kind, "media staged");
        self.pending_media.push(attachment);
        Ok(self.pending_media.len())
    }

    /// Reads a file and stages it. Oversized or unknown files never reach
    /// the pending list.
    pub fn attach_path(&mut self, path: &Path) -> Result<usize, StageError> {
        let attachment = MediaAttachment::from_path(path, &self.media_limits)?;
        self.stage_media(attachment)
    }

    pub fn remove_media(&mut self, index: usize) -> Option<MediaAttachment> {
        self.pending_media.remove(index)
    }

    /// Sends `text` plus any staged media to the active capability.
    pub async fn send(&mut self, text: &str) -> SendOutcome {
        let Some(capability) = self.registry.active_capability() else {
            return SendOutcome::Rejected(Rejection::NoActiveCapability);
        };
        let text = text.trim();
        if let Some(rejection) = validate(capability, text, &self.pending_media) {
            debug!(%capability, ?rejection, "send rejected");
            return SendOutcome::Rejected(rejection);
        }

        let media = self.pending_media.take();
        let chat_id = match self.registry.current_chat_id() {
            Some(id) => id.to_string(),
            None => self.registry.create_chat(capability),
        };

        let refs = media.iter().map(MediaAttachment::to_ref).collect();
        if self
            .registry
            .append_turn(capability, &chat_id, Turn::user(text, refs))
            .is_ok()
        {
            self.emit(ResponseEvent::UserTurnRecorded {
                capability,
                chat_id: chat_id.clone(),
            });
        }

        let session = match self.sessions.get_session(capability).await {
            Ok(session) => session,
            Err(e) => return self.fault(capability, &chat_id, e),
        };

        let reply = if capability.accepts_media() && !media.is_empty() {
            self.multimodal_reply(session, capability, &chat_id, text, &media)
                .await
        } else if capability.streams() {
            self.stream_reply(&session, capability, &chat_id, ProviderInput::Text(text.to_string()))
                .await
        } else {
            session
                .generate(&ProviderInput::Text(text.to_string()))
                .await
                .map(ReplyOutcome::Final)
        };

        match reply {
            Ok(ReplyOutcome::Final(reply)) => {
                self.sessions.record_success(capability);
                self.commit(capability, &chat_id, reply.clone());
                SendOutcome::Replied {
                    chat_id,
                    reply,
                    fault: None,
                }
            }
            Ok(ReplyOutcome::StreamedAndCommitted(reply)) => {
                self.sessions.record_success(capability);
                SendOutcome::Replied {
                    chat_id,
                    reply,
                    fault: None,
                }
            }
            Err(e) => self.fault(capability, &chat_id, e),
        }
    }

    /// Flushes pending saves and destroys every live session.
    pub async fn shutdown(&mut self) {
        self.sessions.teardown_all().await;
        self.registry.flush().await;
    }

    /// Tries structured input once; if that fails, streams the text alone
    /// with a note that the media was not analysed.
    async fn multimodal_reply(
        &mut self,
        session: Arc<dyn CapabilitySession>,
        capability: Capability,
        chat_id: &str,
        text: &str,
        media: &[MediaAttachment],
    ) -> Result<ReplyOutcome, ProviderError> {
        let input = ProviderInput::multimodal(text, media);
        match session.generate(&input).await {
            Ok(reply) => Ok(ReplyOutcome::Final(reply)),
            Err(e) => {
                warn!(%capability, error = %e, "multimodal input failed, retrying as text");
                let subject = if text.is_empty() { FALLBACK_SUBJECT } else { text };
                let fallback = format!("{}\n\n{}", subject, FALLBACK_NOTE);
                self.stream_reply(&session, capability, chat_id, ProviderInput::Text(fallback))
                    .await
            }
        }
    }

    /// Streams a reply, publishing each chunk, and commits the full text
    /// once the stream completes cleanly.
    async fn stream_reply(
        &mut self,
        session: &Arc<dyn CapabilitySession>,
        capability: Capability,
        chat_id: &str,
        input: ProviderInput,
    ) -> Result<ReplyOutcome, ProviderError> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let events = self.event_sender.clone();

        let producer = session.generate_stream(&input, tx);
        let consumer = async {
            let mut text = String::new();
            while let Some(chunk) = rx.recv().await {
                match chunk {
                    StreamChunk::Text(delta) => {
                        text.push_str(&delta);
                        if let Some(sender) = &events {
                            let _ = sender.send(ResponseEvent::Partial {
                                chat_id: chat_id.to_string(),
                                delta,
                            });
                        }
                    }
                    StreamChunk::Done => return Ok(text),
                    StreamChunk::Error(msg) => return Err(ProviderError::Generation(msg)),
                }
            }
            Ok(text)
        };

        let (started, streamed) = tokio::join!(producer, consumer);
        started?;
        let text = streamed?;

        self.commit(capability, chat_id, text.clone());
        Ok(ReplyOutcome::StreamedAndCommitted(text))
    }

    fn fault(&mut self, capability: Capability, chat_id: &str, err: ProviderError) -> SendOutcome {
        warn!(%capability, chat_id, error = %err, "generation failed");
        self.sessions.invalidate(capability);

        let message = fault_message(capability, &err);
        self.commit(capability, chat_id, message.clone());
        SendOutcome::Replied {
            chat_id: chat_id.to_string(),
            reply: message,
            fault: Some(FaultKind::from(&err)),
        }
    }

    fn commit(&mut self, capability: Capability, chat_id: &str, text: String) {
        if self
            .registry
            .append_turn(capability, chat_id, Turn::assistant(text.clone()))
            .is_ok()
        {
            self.emit(ResponseEvent::AssistantTurnCommitted {
                capability,
                chat_id: chat_id.to_string(),
                text,
            });
        }
    }

    fn emit(&self, event: ResponseEvent) {
        if let Some(ref sender) = self.event_sender {
            // Receiver may be dropped, ignore errors
            let _ = sender.send(event);
        }
    }
}

fn validate(capability: Capability, text: &str, pending: &PendingMedia) -> Option<Rejection> {
    if !text.is_empty() {
        return None;
    }
    if pending.is_empty() {
        return Some(Rejection::EmptyInput);
    }
    if capability.requires_text() {
        return Some(Rejection::TextRequired);
    }
    None
}

/// The assistant turn shown in place of a reply.
pub fn fault_message(capability: Capability, err: &ProviderError) -> String {
    let name = capability.display_name();
    match err {
        ProviderError::Unavailable { reason, .. } => format!(
            "{} is not available: {}. Make sure the local model server is running and try again.",
            name, reason
        ),
        ProviderError::ModelPending { .. } => format!(
            "The {} model is still downloading. Please wait a few minutes and send again.",
            name
        ),
        ProviderError::SessionCreation { reason, .. } => {
            format!("Could not start a {} session: {}", name, reason)
        }
        ProviderError::Generation(reason) | ProviderError::MultimodalUnsupported(reason) => {
            format!("Error during generation: {}", reason)
        }
    }
}
