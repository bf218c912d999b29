//! Chats, turns and the per-capability table that gets persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::capability::Capability;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Audio,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Audio => "audio",
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload-free reference to an attachment, as kept in chat history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    #[serde(rename = "type")]
    pub kind: MediaKind,
    pub name: String,
    #[serde(rename = "mimeType")]
    pub mime_type: String,
}

/// One message within a chat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<MediaRef>,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    pub fn user(content: impl Into<String>, media: Vec<MediaRef>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            media,
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            media: Vec::new(),
            timestamp: Utc::now(),
        }
    }
}

/// A named conversation thread belonging to exactly one capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chat {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub turns: Vec<Turn>,
}

impl Chat {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            turns: Vec::new(),
        }
    }
}

/// All chats, grouped by capability. Within a capability chats keep
/// creation order and ids are unique.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatsTable {
    chats: HashMap<Capability, Vec<Chat>>,
}

impl ChatsTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Guarantees a (possibly empty) entry exists for `capability`.
    pub fn ensure(&mut self, capability: Capability) {
        self.chats.entry(capability).or_default();
    }

    pub fn contains_capability(&self, capability: Capability) -> bool {
        self.chats.contains_key(&capability)
    }

    pub fn chats(&self, capability: Capability) -> &[Chat] {
        self.chats
            .get(&capability)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn get(&self, capability: Capability, id: &str) -> Option<&Chat> {
        self.chats.get(&capability)?.iter().find(|c| c.id == id)
    }

    pub fn get_mut(&mut self, capability: Capability, id: &str) -> Option<&mut Chat> {
        self.chats
            .get_mut(&capability)?
            .iter_mut()
            .find(|c| c.id == id)
    }

    pub fn contains(&self, capability: Capability, id: &str) -> bool {
        self.get(capability, id).is_some()
    }

    /// Appends `chat`, returning false (and leaving the table untouched) if
    /// the id is already taken within that capability.
    pub fn insert(&mut self, capability: Capability, chat: Chat) -> bool {
        let chats = self.chats.entry(capability).or_default();
        if chats.iter().any(|c| c.id == chat.id) {
            return false;
        }
        chats.push(chat);
        true
    }

    pub fn remove(&mut self, capability: Capability, id: &str) -> Option<Chat> {
        let chats = self.chats.get_mut(&capability)?;
        let pos = chats.iter().position(|c| c.id == id)?;
        Some(chats.remove(pos))
    }

    /// Number of capabilities with an entry (empty or not).
    pub fn capability_count(&self) -> usize {
        self.chats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chats.values().all(|v| v.is_empty())
    }
}
