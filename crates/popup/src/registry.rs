//! In-memory index of chats per capability plus the active-capability and
//! current-chat pointers.
//!
//! The registry is the only writer of the chats table. Every mutation
//! schedules a debounced save of the whole table.

use shared::{Capability, Chat, ChatsTable, Turn};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::persist::SaveHandle;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Chat {chat_id} not found in {capability}")]
    ChatNotFound {
        capability: Capability,
        chat_id: String,
    },

    #[error("No capability is open")]
    NoActiveCapability,
}

/// A chat as listed in the sidebar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatSummary {
    pub id: String,
    pub title: String,
}

pub struct ChatRegistry {
    table: ChatsTable,
    active: Option<Capability>,
    current_chat: Option<String>,
    saver: SaveHandle,
}

impl ChatRegistry {
    pub fn new(table: ChatsTable, saver: SaveHandle) -> Self {
        Self {
            table,
            active: None,
            current_chat: None,
            saver,
        }
    }

    pub fn table(&self) -> &ChatsTable {
        &self.table
    }

    pub fn active_capability(&self) -> Option<Capability> {
        self.active
    }

    pub fn current_chat_id(&self) -> Option<&str> {
        self.current_chat.as_deref()
    }

    pub fn chat(&self, capability: Capability, chat_id: &str) -> Option<&Chat> {
        self.table.get(capability, chat_id)
    }

    pub fn current_chat(&self) -> Option<&Chat> {
        let capability = self.active?;
        self.table.get(capability, self.current_chat.as_deref()?)
    }

    pub fn ensure_capability_initialized(&mut self, capability: Capability) {
        self.table.ensure(capability);
    }

    pub fn list_chats(&self, capability: Capability) -> Vec<ChatSummary> {
        self.table
            .chats(capability)
            .iter()
            .map(|c| ChatSummary {
                id: c.id.clone(),
                title: c.title.clone(),
            })
            .collect()
    }

    /// Creates an empty chat titled by ordinal. It becomes the current chat
    /// when `capability` is the active one.
    pub fn create_chat(&mut self, capability: Capability) -> String {
        self.ensure_capability_initialized(capability);
        let title = format!("Chat #{}", self.table.chats(capability).len() + 1);

        let mut id = new_chat_id();
        while self.table.contains(capability, &id) {
            id = new_chat_id();
        }
        self.table.insert(capability, Chat::new(id.clone(), title.clone()));
        info!(%capability, chat_id = %id, %title, "chat created");

        if self.active == Some(capability) {
            self.current_chat = Some(id.clone());
        }
        self.schedule_save();
        id
    }

    /// Renames a chat. A blank title keeps the previous one; returns whether
    /// the title changed.
    pub fn rename_chat(
        &mut self,
        capability: Capability,
        chat_id: &str,
        new_title: &str,
    ) -> Result<bool, RegistryError> {
        let chat = self
            .table
            .get_mut(capability, chat_id)
            .ok_or_else(|| not_found(capability, chat_id))?;

        let title = new_title.trim();
        if title.is_empty() {
            debug!(%capability, chat_id, "blank title ignored");
            return Ok(false);
        }
        chat.title = title.to_string();
        self.schedule_save();
        Ok(true)
    }

    /// Removes a chat. Confirmation happens at the UI boundary.
    pub fn delete_chat(&mut self, capability: Capability, chat_id: &str) -> Result<(), RegistryError> {
        self.table
            .remove(capability, chat_id)
            .ok_or_else(|| not_found(capability, chat_id))?;
        info!(%capability, chat_id, "chat deleted");

        if self.active == Some(capability) && self.current_chat.as_deref() == Some(chat_id) {
            self.current_chat = self.table.chats(capability).first().map(|c| c.id.clone());
        }
        self.schedule_save();
        Ok(())
    }

    /// Appends a turn. If the chat has vanished, nothing changes and the
    /// fault is reported.
    pub fn append_turn(
        &mut self,
        capability: Capability,
        chat_id: &str,
        turn: Turn,
    ) -> Result<(), RegistryError> {
        let Some(chat) = self.table.get_mut(capability, chat_id) else {
            warn!(%capability, chat_id, "turn dropped: chat no longer exists");
            return Err(not_found(capability, chat_id));
        };
        chat.turns.push(turn);
        self.schedule_save();
        Ok(())
    }

    /// Makes `capability` active and points at its first chat, if any.
    pub fn switch_capability(&mut self, capability: Capability) {
        self.ensure_capability_initialized(capability);
        self.active = Some(capability);
        self.current_chat = self.table.chats(capability).first().map(|c| c.id.clone());
    }

    pub fn switch_chat(&mut self, chat_id: &str) -> Result<(), RegistryError> {
        let capability = self.active.ok_or(RegistryError::NoActiveCapability)?;
        if !self.table.contains(capability, chat_id) {
            return Err(not_found(capability, chat_id));
        }
        self.current_chat = Some(chat_id.to_string());
        Ok(())
    }

    /// Clears the active capability and current chat.
    pub fn leave(&mut self) {
        self.active = None;
        self.current_chat = None;
    }

    /// Writes any pending change now.
    pub async fn flush(&self) {
        self.saver.flush().await;
    }

    fn schedule_save(&self) {
        self.saver.schedule(self.table.clone());
    }
}

fn new_chat_id() -> String {
    format!("chat_{}", Uuid::new_v4().simple())
}

fn not_found(capability: Capability, chat_id: &str) -> RegistryError {
    RegistryError::ChatNotFound {
        capability,
        chat_id: chat_id.to_string(),
    }
}
