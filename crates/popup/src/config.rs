//! Settings file location and loading.

use shared::settings::PopupSettings;
use std::path::PathBuf;
use tracing::{info, warn};

/// Environment variable that overrides the model server URL.
pub const MODEL_SERVER_ENV: &str = "OLLAMA_BASE_URL";

/// Get the config file path
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|mut p| {
        p.push("ondevice_popup");
        p.push("settings.json");
        p
    })
}

/// Load settings from disk or return defaults. The flag tells whether a
/// settings file was actually read.
pub fn load_settings_or_default() -> (PopupSettings, bool) {
    let (mut settings, loaded) = match config_path() {
        Some(path) => match std::fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<PopupSettings>(&contents) {
                Ok(settings) => {
                    info!(path = %path.display(), "settings loaded");
                    (settings, true)
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "settings unreadable, using defaults");
                    (PopupSettings::default(), false)
                }
            },
            Err(_) => (PopupSettings::default(), false),
        },
        None => (PopupSettings::default(), false),
    };

    apply_env_overrides(&mut settings, std::env::var(MODEL_SERVER_ENV).ok());
    (settings, loaded)
}

fn apply_env_overrides(settings: &mut PopupSettings, model_server: Option<String>) {
    if let Some(url) = model_server.filter(|u| !u.trim().is_empty()) {
        settings.model_server = url.trim().trim_end_matches('/').to_string();
    }
}

/// Directory holding the chat store.
pub fn chats_dir(settings: &PopupSettings) -> PathBuf {
    if let Some(dir) = &settings.data_dir {
        return dir.clone();
    }
    directories::ProjectDirs::from("com.local", "OnDevice Popup", "ondevice_popup")
        .map(|p| p.data_dir().to_path_buf())
        .or_else(|| dirs::data_dir().map(|d| d.join("ondevice_popup")))
        .unwrap_or_else(|| PathBuf::from("./ondevice_popup"))
}
