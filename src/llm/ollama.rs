//! Ollama backend.
//!
//! Uses `/api/chat` for completions (structured output through the `format`
//! field, images as base64, NDJSON when streaming) and `/api/generate` with
//! an image model for previews.

use super::message::{ChatMessage, Content, DataContent, Role};
use super::provider::{CompletionOptions, ModelKind, ModelProvider};
use crate::error::{Error, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Connection and model settings.
#[derive(Debug, Clone)]
pub struct OllamaConfig {
    pub url: String,
    pub chat_model: String,
    pub vision_model: String,
    pub image_model: String,
    pub temperature: f32,
    pub timeout_seconds: u64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:11434".to_string(),
            chat_model: "llama3.2:latest".to_string(),
            vision_model: "llama3.2-vision:latest".to_string(),
            image_model: "x/flux2-klein:latest".to_string(),
            temperature: 0.4,
            timeout_seconds: 600,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaMessage {
    role: String,
    content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    images: Vec<String>,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
}

/// Ollama chat API request.
#[derive(Debug, Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: Vec<OllamaMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'a Value>,
    options: OllamaOptions,
}

/// One chat response, or one NDJSON line of a streamed response.
#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    #[serde(default)]
    message: Option<OllamaMessage>,
    #[serde(default)]
    done: bool,
}

/// Splits a byte stream into NDJSON lines. Bytes are decoded only once
/// their line is complete, so a character may straddle two chunks.
#[derive(Debug, Default)]
struct NdjsonLines {
    pending: Vec<u8>,
}

impl NdjsonLines {
    fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(end) = self.pending.iter().position(|b| *b == b'\n') {
            lines.push(self.pending.drain(..=end).collect());
        }
        lines
    }

    /// The unterminated last line, if any.
    fn finish(&mut self) -> Option<Vec<u8>> {
        let rest = std::mem::take(&mut self.pending);
        if rest.iter().all(u8::is_ascii_whitespace) {
            None
        } else {
            Some(rest)
        }
    }
}

/// Apply one streamed line. Returns true once Ollama reports `done`.
fn stream_part(
    line: &[u8],
    accumulated: &mut String,
    chunks: &mpsc::UnboundedSender<String>,
) -> Result<bool> {
    if line.iter().all(u8::is_ascii_whitespace) {
        return Ok(false);
    }
    let part: OllamaChatResponse = serde_json::from_slice(line)?;
    if let Some(message) = part.message {
        if !message.content.is_empty() {
            accumulated.push_str(&message.content);
            let _ = chunks.send(message.content);
        }
    }
    Ok(part.done)
}

#[derive(Debug, Serialize)]
struct OllamaGenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    images: Vec<String>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct OllamaGenerateResponse {
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    images: Vec<String>,
}

pub struct OllamaProvider {
    config: OllamaConfig,
    http_client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(config: OllamaConfig) -> Self {
        info!(
            "Using Ollama at {} (chat: {}, vision: {}, image: {})",
            config.url, config.chat_model, config.vision_model, config.image_model
        );

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            config,
            http_client,
        }
    }

    fn model_for(&self, kind: ModelKind) -> &str {
        match kind {
            ModelKind::Conversational => &self.config.chat_model,
            ModelKind::Vision => &self.config.vision_model,
        }
    }

    fn map_request_error(&self, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::Provider(format!(
                "Request timed out after {}s",
                self.config.timeout_seconds
            ))
        } else if e.is_connect() {
            Error::Provider(format!("Cannot connect to Ollama at {}", self.config.url))
        } else {
            Error::Http(e)
        }
    }

    async fn post<T: Serialize>(&self, path: &str, body: &T) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.config.url, path);
        let response = self
            .http_client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| self.map_request_error(e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Provider(format!("Ollama API error {}: {}", status, body)));
        }
        Ok(response)
    }

    fn chat_request<'a>(
        &'a self,
        history: &[ChatMessage],
        options: &'a CompletionOptions,
        stream: bool,
    ) -> OllamaChatRequest<'a> {
        let mut messages = Vec::with_capacity(history.len() + 1);
        if let Some(instructions) = &options.instructions {
            messages.push(OllamaMessage {
                role: "system".to_string(),
                content: instructions.clone(),
                images: Vec::new(),
            });
        }
        messages.extend(history.iter().map(to_ollama));

        OllamaChatRequest {
            model: self.model_for(options.model),
            messages,
            stream,
            format: options.response_format.as_ref().map(|f| &f.schema),
            options: OllamaOptions {
                temperature: options.temperature.unwrap_or(self.config.temperature),
            },
        }
    }
}

/// Flatten a message into Ollama's shape. Images go to `images`; textual
/// attachments are inlined below the text.
fn to_ollama(message: &ChatMessage) -> OllamaMessage {
    let mut content = String::new();
    let mut images = Vec::new();
    for part in &message.contents {
        match part {
            Content::Text(text) => {
                if !content.is_empty() {
                    content.push('\n');
                }
                content.push_str(text);
            }
            Content::Data(data) if data.is_image() => images.push(BASE64.encode(&data.bytes)),
            Content::Data(data) if data.is_text() => {
                let label = data.name.as_deref().unwrap_or(&data.media_type);
                content.push_str(&format!(
                    "\n--- {} ---\n{}\n",
                    label,
                    String::from_utf8_lossy(&data.bytes)
                ));
            }
            Content::Data(data) => {
                debug!("Skipping {} attachment ({} bytes)", data.media_type, data.len());
            }
        }
    }
    OllamaMessage {
        role: message.role.as_str().to_string(),
        content,
        images,
    }
}

/// Media type of an encoded image, from its magic bytes.
pub fn sniff_image_type(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
        "image/png"
    } else if bytes.starts_with(&[0xFF, 0xD8]) {
        "image/jpeg"
    } else if bytes.starts_with(b"RIFF") && bytes.get(8..12) == Some(&b"WEBP"[..]) {
        "image/webp"
    } else {
        "application/octet-stream"
    }
}

#[async_trait]
impl ModelProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn complete(
        &self,
        history: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<ChatMessage> {
        let request = self.chat_request(history, options, false);
        debug!("Sending chat request to {}", request.model);
        let response: OllamaChatResponse = self.post("/api/chat", &request).await?.json().await?;
        let content = response.message.map(|m| m.content).unwrap_or_default();
        Ok(ChatMessage::new(
            Role::Assistant,
            vec![Content::Text(content)],
        ))
    }

    async fn complete_streaming(
        &self,
        history: &[ChatMessage],
        options: &CompletionOptions,
        chunks: mpsc::UnboundedSender<String>,
    ) -> Result<ChatMessage> {
        let request = self.chat_request(history, options, true);
        let response = self.post("/api/chat", &request).await?;
        let mut stream = response.bytes_stream();
        let mut lines = NdjsonLines::default();
        let mut accumulated = String::new();
        let mut done = false;

        'read: while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| self.map_request_error(e))?;
            for line in lines.push(&chunk) {
                if stream_part(&line, &mut accumulated, &chunks)? {
                    done = true;
                    break 'read;
                }
            }
        }
        if !done {
            if let Some(rest) = lines.finish() {
                stream_part(&rest, &mut accumulated, &chunks)?;
            }
        }

        Ok(ChatMessage::new(
            Role::Assistant,
            vec![Content::Text(accumulated)],
        ))
    }

    async fn generate_image(&self, prompt: &str, references: &[DataContent]) -> Result<DataContent> {
        let request = OllamaGenerateRequest {
            model: &self.config.image_model,
            prompt,
            images: references
                .iter()
                .filter(|r| r.is_image())
                .map(|r| BASE64.encode(&r.bytes))
                .collect(),
            stream: false,
        };
        debug!("Requesting image from {}", request.model);
        let response: OllamaGenerateResponse =
            self.post("/api/generate", &request).await?.json().await?;

        let encoded = response
            .image
            .or_else(|| response.images.into_iter().next())
            .ok_or_else(|| Error::Provider("image model returned no image".to_string()))?;
        let bytes = BASE64
            .decode(encoded.trim())
            .map_err(|e| Error::malformed("image", e))?;
        if bytes.is_empty() {
            return Err(Error::Provider("image model returned an empty image".to_string()));
        }
        let media_type = sniff_image_type(&bytes);
        Ok(DataContent::new(bytes, media_type))
    }
}
