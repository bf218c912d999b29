//! Chat popup core: persistent chats per capability, session handling and
//! the send pipeline.

pub mod config;
pub mod orchestrator;
pub mod persist;
pub mod registry;
pub mod store;

pub use orchestrator::{FaultKind, Rejection, ResponseEvent, ResponseOrchestrator, SendOutcome};
pub use registry::{ChatRegistry, ChatSummary, RegistryError};
pub use store::{ChatStore, JsonFileStore, KeyValueStore, MemoryStore};

use providers::{CapabilityProvider, OnDeviceProvider, SessionManager};
use shared::settings::PopupSettings;
use shared::Capability;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Loads saved chats and wires the registry, save worker and providers.
/// Must run inside a tokio runtime.
pub async fn start(
    settings: &PopupSettings,
    kv: Arc<dyn KeyValueStore>,
    providers: Vec<Arc<dyn CapabilityProvider>>,
) -> ResponseOrchestrator {
    let store = ChatStore::new(kv);
    let table = store.load().await;
    info!(capabilities = table.capability_count(), "chats loaded");

    let saver = persist::SaveHandle::spawn(store, Duration::from_millis(settings.save_debounce_ms));
    let registry = ChatRegistry::new(table, saver);

    let mut sessions = SessionManager::new();
    for provider in providers {
        sessions.register(provider).await;
    }
    for &capability in Capability::all() {
        sessions.set_options(capability, settings.session_options(capability));
    }

    ResponseOrchestrator::new(registry, sessions, settings.media)
}

/// [`start`] with the JSON file store and the local model server.
pub async fn start_default(settings: &PopupSettings) -> ResponseOrchestrator {
    let dir = config::chats_dir(settings);
    info!(dir = %dir.display(), server = %settings.model_server, "starting popup");
    start(
        settings,
        Arc::new(JsonFileStore::new(dir)),
        OnDeviceProvider::all_from_settings(settings),
    )
    .await
}
