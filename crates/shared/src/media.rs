//! Image/audio attachments staged before a send.

use base64::Engine;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::chat::{MediaKind, MediaRef};

pub const DEFAULT_MAX_IMAGE_BYTES: u64 = 2 * 1024 * 1024;
pub const DEFAULT_MAX_AUDIO_BYTES: u64 = 5 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaLimits {
    pub max_image_bytes: u64,
    pub max_audio_bytes: u64,
}

impl MediaLimits {
    pub fn limit_for(&self, kind: MediaKind) -> u64 {
        match kind {
            MediaKind::Image => self.max_image_bytes,
            MediaKind::Audio => self.max_audio_bytes,
        }
    }
}

impl Default for MediaLimits {
    fn default() -> Self {
        Self {
            max_image_bytes: DEFAULT_MAX_IMAGE_BYTES,
            max_audio_bytes: DEFAULT_MAX_AUDIO_BYTES,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("{kind} too large: {size} bytes (limit {limit} bytes)")]
    TooLarge {
        kind: MediaKind,
        size: u64,
        limit: u64,
    },

    #[error("Unsupported file type: {name}")]
    UnsupportedType { name: String },

    #[error("Could not read {name}: {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// An attachment with its payload, used only for the outgoing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaAttachment {
    pub kind: MediaKind,
    pub name: String,
    pub mime_type: String,
    /// `data:<mime>;base64,<bytes>`
    pub payload: String,
}

impl MediaAttachment {
    /// Reads a user-selected file, rejecting unknown types and files over
    /// the per-kind limit before any bytes are encoded.
    pub fn from_path(path: &Path, limits: &MediaLimits) -> Result<Self, MediaError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        let (kind, mime_type) = classify(&name).ok_or_else(|| MediaError::UnsupportedType {
            name: name.clone(),
        })?;

        let size = std::fs::metadata(path)
            .map_err(|source| MediaError::Io {
                name: name.clone(),
                source,
            })?
            .len();
        check_size(kind, size, limits)?;

        let bytes = std::fs::read(path).map_err(|source| MediaError::Io {
            name: name.clone(),
            source,
        })?;
        Self::from_bytes(kind, name, mime_type, &bytes, limits)
    }

    pub fn from_bytes(
        kind: MediaKind,
        name: impl Into<String>,
        mime_type: impl Into<String>,
        bytes: &[u8],
        limits: &MediaLimits,
    ) -> Result<Self, MediaError> {
        check_size(kind, bytes.len() as u64, limits)?;
        let mime_type = mime_type.into();
        let payload = format!(
            "data:{};base64,{}",
            mime_type,
            base64::engine::general_purpose::STANDARD.encode(bytes)
        );
        Ok(Self {
            kind,
            name: name.into(),
            mime_type,
            payload,
        })
    }

    /// The base64 part of the payload, without the `data:` prefix.
    pub fn base64_data(&self) -> &str {
        self.payload
            .split_once(";base64,")
            .map(|(_, data)| data)
            .unwrap_or(&self.payload)
    }

    pub fn to_ref(&self) -> MediaRef {
        MediaRef {
            kind: self.kind,
            name: self.name.clone(),
            mime_type: self.mime_type.clone(),
        }
    }
}

fn check_size(kind: MediaKind, size: u64, limits: &MediaLimits) -> Result<(), MediaError> {
    let limit = limits.limit_for(kind);
    if size > limit {
        return Err(MediaError::TooLarge { kind, size, limit });
    }
    Ok(())
}

/// Maps a file name to its media kind and MIME type by extension.
pub fn classify(name: &str) -> Option<(MediaKind, String)> {
    let ext = Path::new(name)
        .extension()?
        .to_string_lossy()
        .to_lowercase();
    let (kind, mime) = match ext.as_str() {
        "png" => (MediaKind::Image, "image/png"),
        "jpg" | "jpeg" => (MediaKind::Image, "image/jpeg"),
        "gif" => (MediaKind::Image, "image/gif"),
        "webp" => (MediaKind::Image, "image/webp"),
        "bmp" => (MediaKind::Image, "image/bmp"),
        "mp3" => (MediaKind::Audio, "audio/mpeg"),
        "wav" => (MediaKind::Audio, "audio/wav"),
        "ogg" | "oga" => (MediaKind::Audio, "audio/ogg"),
        "m4a" => (MediaKind::Audio, "audio/mp4"),
        "flac" => (MediaKind::Audio, "audio/flac"),
        "webm" => (MediaKind::Audio, "audio/webm"),
        _ => return None,
    };
    Some((kind, mime.to_string()))
}

/// Attachments staged for the message being composed.
#[derive(Debug, Clone, Default)]
pub struct PendingMedia {
    items: Vec<MediaAttachment>,
}

impl PendingMedia {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, attachment: MediaAttachment) {
        self.items.push(attachment);
    }

    pub fn remove(&mut self, index: usize) -> Option<MediaAttachment> {
        if index < self.items.len() {
            Some(self.items.remove(index))
        } else {
            None
        }
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn take(&mut self) -> Vec<MediaAttachment> {
        std::mem::take(&mut self.items)
    }

    pub fn items(&self) -> &[MediaAttachment] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
