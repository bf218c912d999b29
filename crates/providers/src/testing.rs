//! Scripted providers for tests: replay configured outcomes and record
//! every call.

use async_trait::async_trait;
use parking_lot::Mutex;
use shared::settings::SessionOptions;
use shared::stream::StreamChunk;
use shared::{Availability, Capability, ProviderError};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

use crate::capability::{CapabilityProvider, CapabilitySession, ProviderInput};

/// Outcome of the next generation call.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// Streamed as these chunks; atomically as their concatenation.
    Chunks(Vec<String>),
    /// Fails before any output.
    Fail(ProviderError),
    /// Streams these chunks, then breaks with the message.
    BreakAfter(Vec<String>, String),
}

impl ScriptedReply {
    pub fn text(s: &str) -> Self {
        ScriptedReply::Chunks(vec![s.to_string()])
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScriptLog {
    pub creates: usize,
    pub destroys: usize,
    pub create_options: Vec<SessionOptions>,
    pub generate_inputs: Vec<ProviderInput>,
    pub stream_inputs: Vec<ProviderInput>,
}

impl ScriptLog {
    pub fn generation_calls(&self) -> usize {
        self.generate_inputs.len() + self.stream_inputs.len()
    }
}

#[derive(Default)]
struct ScriptState {
    availability: Option<Availability>,
    create_failures: VecDeque<ProviderError>,
    replies: VecDeque<ScriptedReply>,
    fail_destroy: bool,
    log: ScriptLog,
}

impl ScriptState {
    fn next_reply(&mut self, input: &ProviderInput) -> ScriptedReply {
        self.replies
            .pop_front()
            .unwrap_or_else(|| ScriptedReply::text(&format!("echo: {}", input.text())))
    }
}

/// Handle onto a scripted provider. Clones share the same script and log.
#[derive(Clone)]
pub struct ScriptedProvider {
    capability: Capability,
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedProvider {
    pub fn new(capability: Capability) -> Self {
        Self {
            capability,
            state: Arc::new(Mutex::new(ScriptState::default())),
        }
    }

    pub fn set_availability(&self, availability: Option<Availability>) {
        self.state.lock().availability = availability;
    }

    pub fn fail_next_create(&self, err: ProviderError) {
        self.state.lock().create_failures.push_back(err);
    }

    pub fn fail_destroy(&self, fail: bool) {
        self.state.lock().fail_destroy = fail;
    }

    pub fn push_reply(&self, reply: ScriptedReply) {
        self.state.lock().replies.push_back(reply);
    }

    pub fn log(&self) -> ScriptLog {
        self.state.lock().log.clone()
    }
}

#[async_trait]
impl CapabilityProvider for ScriptedProvider {
    fn capability(&self) -> Capability {
        self.capability
    }

    async fn probe_availability(&self) -> Option<Availability> {
        self.state.lock().availability.clone()
    }

    async fn create(
        &self,
        options: &SessionOptions,
    ) -> Result<Arc<dyn CapabilitySession>, ProviderError> {
        let mut state = self.state.lock();
        state.log.creates += 1;
        state.log.create_options.push(options.clone());
        if let Some(err) = state.create_failures.pop_front() {
            return Err(err);
        }
        Ok(Arc::new(ScriptedSession {
            state: self.state.clone(),
        }))
    }
}

struct ScriptedSession {
    state: Arc<Mutex<ScriptState>>,
}

#[async_trait]
impl CapabilitySession for ScriptedSession {
    async fn generate(&self, input: &ProviderInput) -> Result<String, ProviderError> {
        let reply = {
            let mut state = self.state.lock();
            state.log.generate_inputs.push(input.clone());
            state.next_reply(input)
        };
        match reply {
            ScriptedReply::Chunks(chunks) => Ok(chunks.concat()),
            ScriptedReply::Fail(err) => Err(err),
            ScriptedReply::BreakAfter(_, msg) => Err(ProviderError::Generation(msg)),
        }
    }

    async fn generate_stream(
        &self,
        input: &ProviderInput,
        tx: UnboundedSender<StreamChunk>,
    ) -> Result<(), ProviderError> {
        let reply = {
            let mut state = self.state.lock();
            state.log.stream_inputs.push(input.clone());
            state.next_reply(input)
        };
        match reply {
            ScriptedReply::Chunks(chunks) => {
                for chunk in chunks {
                    let _ = tx.send(StreamChunk::Text(chunk));
                    tokio::task::yield_now().await;
                }
                let _ = tx.send(StreamChunk::Done);
                Ok(())
            }
            ScriptedReply::Fail(err) => Err(err),
            ScriptedReply::BreakAfter(chunks, msg) => {
                for chunk in chunks {
                    let _ = tx.send(StreamChunk::Text(chunk));
                }
                let _ = tx.send(StreamChunk::Error(msg));
                Ok(())
            }
        }
    }

    fn supports_destroy(&self) -> bool {
        true
    }

    async fn destroy(&self) -> Result<(), ProviderError> {
        let mut state = self.state.lock();
        state.log.destroys += 1;
        if state.fail_destroy {
            return Err(ProviderError::Generation("destroy failed".into()));
        }
        Ok(())
    }
}
