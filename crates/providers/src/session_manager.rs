//! Owns at most one live session per capability.
//!
//! Sessions are created lazily on first use, reused afterwards, dropped on
//! any generation fault so the next use builds a fresh one, and destroyed
//! when the UI leaves the capability.

use shared::settings::SessionOptions;
use shared::{Availability, Capability, ProviderError};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::capability::{CapabilityProvider, CapabilitySession};

pub struct SessionManager {
    providers: HashMap<Capability, Arc<dyn CapabilityProvider>>,
    options: HashMap<Capability, SessionOptions>,
    sessions: HashMap<Capability, Arc<dyn CapabilitySession>>,
    consecutive_faults: HashMap<Capability, u32>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
            options: HashMap::new(),
            sessions: HashMap::new(),
            consecutive_faults: HashMap::new(),
        }
    }

    /// Registers (or replaces) the provider for its capability. A session
    /// from the replaced provider is torn down first.
    pub async fn register(&mut self, provider: Arc<dyn CapabilityProvider>) {
        let capability = provider.capability();
        self.teardown(capability).await;
        self.providers.insert(capability, provider);
    }

    pub fn set_options(&mut self, capability: Capability, options: SessionOptions) {
        self.options.insert(capability, options);
    }

    pub fn has_session(&self, capability: Capability) -> bool {
        self.sessions.contains_key(&capability)
    }

    pub fn consecutive_faults(&self, capability: Capability) -> u32 {
        self.consecutive_faults
            .get(&capability)
            .copied()
            .unwrap_or(0)
    }

    /// Returns the cached session, or probes and creates one.
    ///
    /// A failed probe or creation leaves the slot empty, so the next call
    /// tries again from scratch.
    pub async fn get_session(
        &mut self,
        capability: Capability,
    ) -> Result<Arc<dyn CapabilitySession>, ProviderError> {
        if let Some(session) = self.sessions.get(&capability) {
            debug!(%capability, "reusing session");
            return Ok(session.clone());
        }

        let provider = self
            .providers
            .get(&capability)
            .cloned()
            .ok_or_else(|| ProviderError::Unavailable {
                capability,
                reason: "no provider is registered".into(),
            })?;

        match provider.probe_availability().await {
            None | Some(Availability::Ready) => {}
            Some(Availability::Unavailable { reason }) => {
                info!(%capability, %reason, "capability unavailable");
                return Err(ProviderError::Unavailable { capability, reason });
            }
            Some(Availability::PendingDownload) => {
                info!(%capability, "model still downloading");
                return Err(ProviderError::ModelPending { capability });
            }
        }

        let options = self.options.get(&capability).cloned().unwrap_or_default();
        let session = provider.create(&options).await.map_err(|e| {
            warn!(%capability, error = %e, "session creation failed");
            if e.is_session_level() {
                e
            } else {
                ProviderError::SessionCreation {
                    capability,
                    reason: e.to_string(),
                }
            }
        })?;

        info!(%capability, "session created");
        self.sessions.insert(capability, session.clone());
        Ok(session)
    }

    /// Drops the cached session after a provider fault.
    pub fn invalidate(&mut self, capability: Capability) {
        let faults = self.consecutive_faults.entry(capability).or_insert(0);
        *faults += 1;
        if self.sessions.remove(&capability).is_some() {
            warn!(%capability, consecutive_faults = *faults, "session invalidated");
        }
    }

    pub fn record_success(&mut self, capability: Capability) {
        self.consecutive_faults.remove(&capability);
    }

    /// Destroys the session (if the engine supports it) and always empties
    /// the slot.
    pub async fn teardown(&mut self, capability: Capability) {
        let Some(session) = self.sessions.remove(&capability) else {
            return;
        };
        if session.supports_destroy() {
            if let Err(e) = session.destroy().await {
                warn!(%capability, error = %e, "destroy failed");
            }
        }
        info!(%capability, "session torn down");
    }

    pub async fn teardown_all(&mut self) {
        let capabilities: Vec<Capability> = self.sessions.keys().copied().collect();
        for capability in capabilities {
            self.teardown(capability).await;
        }
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}
