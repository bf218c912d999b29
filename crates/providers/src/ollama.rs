//! Thin client for the local model server's chat API.

use anyhow::{anyhow, Result};
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use shared::stream::StreamChunk;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

static SHARED_HTTP: LazyLock<Client> = LazyLock::new(|| {
    Client::builder()
        .timeout(Duration::from_secs(120))
        .pool_max_idle_per_host(2)
        .build()
        .expect("failed to build HTTP client")
});

#[derive(Debug, Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: &'a [OllamaMessage],
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: OllamaMessage,
}

/// Streaming response: each line is one of these JSON objects.
#[derive(Debug, Deserialize)]
struct OllamaStreamChunk {
    message: Option<OllamaMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OllamaTags {
    #[serde(default)]
    models: Vec<OllamaModelTag>,
}

#[derive(Debug, Deserialize)]
struct OllamaModelTag {
    name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OllamaMessage {
    pub role: String,
    pub content: String,
    /// Base64 images attached to this message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
}

impl OllamaMessage {
    pub fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
            images: Vec::new(),
        }
    }
}

/// A request the server refused outright, before producing output.
#[derive(Debug, thiserror::Error)]
#[error("ollama error: {status}: {detail}")]
pub struct RejectedRequest {
    pub status: StatusCode,
    pub detail: String,
}

#[derive(Clone)]
pub struct OllamaClient {
    http: Client,
    base: String,
    model: String,
}

impl OllamaClient {
    pub fn new(base: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: SHARED_HTTP.clone(),
            base: base.into().trim_end_matches('/').to_string(),
            model: model.into(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Names of the models already pulled onto this machine.
    pub async fn list_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/api/tags", self.base);
        let resp = self.http.get(url).send().await?;
        if !resp.status().is_success() {
            return Err(anyhow!("ollama error: {}", resp.status()));
        }
        let tags: OllamaTags = resp.json().await?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    /// Whether `model` is present, treating a bare name as `:latest`.
    pub fn has_model(models: &[String], model: &str) -> bool {
        let wanted = normalize_tag(model);
        models.iter().any(|m| normalize_tag(m) == wanted)
    }

    pub async fn generate(&self, messages: &[OllamaMessage]) -> Result<String> {
        let resp = self.post_chat(messages, false).await?;
        let body: OllamaChatResponse = resp.json().await?;
        Ok(body.message.content)
    }

    /// Streams the reply into `tx`. Returns `Err` only if the request fails
    /// before the first chunk; later failures arrive as `StreamChunk::Error`.
    pub async fn generate_stream(
        &self,
        messages: &[OllamaMessage],
        tx: &UnboundedSender<StreamChunk>,
    ) -> Result<()> {
        let resp = self.post_chat(messages, true).await?;

        // Ollama streams line-delimited JSON. Network chunks can split a
        // UTF-8 sequence, so only complete lines are decoded.
        let mut stream = resp.bytes_stream();
        let mut buf: Vec<u8> = Vec::new();

        while let Some(chunk) = stream.next().await {
            let bytes = match chunk {
                Ok(b) => b,
                Err(e) => {
                    let _ = tx.send(StreamChunk::Error(format!("stream read error: {}", e)));
                    return Ok(());
                }
            };
            buf.extend_from_slice(&bytes);

            while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
                let raw: Vec<u8> = buf.drain(..=pos).collect();
                let line = match std::str::from_utf8(&raw) {
                    Ok(line) => line.trim(),
                    Err(e) => {
                        let _ = tx.send(StreamChunk::Error(format!(
                            "Ollama stream is not valid UTF-8: {}",
                            e
                        )));
                        return Ok(());
                    }
                };

                if line.is_empty() {
                    continue;
                }

                match serde_json::from_str::<OllamaStreamChunk>(line) {
                    Ok(chunk_data) => {
                        if let Some(err) = chunk_data.error {
                            let _ = tx.send(StreamChunk::Error(err));
                            return Ok(());
                        }
                        if let Some(msg) = &chunk_data.message {
                            if !msg.content.is_empty() {
                                let _ = tx.send(StreamChunk::Text(msg.content.clone()));
                            }
                        }
                        if chunk_data.done {
                            let _ = tx.send(StreamChunk::Done);
                            return Ok(());
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(StreamChunk::Error(format!(
                            "Failed to parse Ollama stream: {}",
                            e
                        )));
                        return Ok(());
                    }
                }
            }
        }

        let _ = tx.send(StreamChunk::Done);
        Ok(())
    }

    async fn post_chat(&self, messages: &[OllamaMessage], stream: bool) -> Result<reqwest::Response> {
        let url = format!("{}/api/chat", self.base);
        let req = OllamaChatRequest {
            model: &self.model,
            messages,
            stream,
        };
        let resp = self.http.post(url).json(&req).send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            let detail: String = body.chars().take(400).collect();
            return Err(RejectedRequest { status, detail }.into());
        }
        Ok(resp)
    }
}

fn normalize_tag(name: &str) -> String {
    if name.contains(':') {
        name.to_string()
    } else {
        format!("{}:latest", name)
    }
}
