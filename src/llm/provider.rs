//! The interface the core needs from a language-model backend.

use super::message::{ChatMessage, Content, DataContent, Role};
use crate::error::{Error, Result};
use async_trait::async_trait;
use schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Which model family a request is meant for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModelKind {
    /// Text chat; used for research, copy and HTML generation.
    #[default]
    Conversational,
    /// Chat with image understanding; used for the critique.
    Vision,
}

/// JSON schema the reply must conform to.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseFormat {
    pub name: String,
    pub schema: Value,
}

impl ResponseFormat {
    pub fn for_type<T: JsonSchema>() -> Self {
        Self {
            name: T::schema_name().into_owned(),
            schema: schema_for!(T).to_value(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CompletionOptions {
    pub model: ModelKind,
    /// System instructions sent ahead of the history.
    pub instructions: Option<String>,
    pub response_format: Option<ResponseFormat>,
    /// Overrides the provider's default temperature.
    pub temperature: Option<f32>,
}

impl CompletionOptions {
    pub fn new(model: ModelKind) -> Self {
        Self {
            model,
            ..Self::default()
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn with_format(mut self, format: ResponseFormat) -> Self {
        self.response_format = Some(format);
        self
    }
}

/// A chat and image-generation backend.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Provider name for logs.
    fn name(&self) -> &str;

    /// Send `history` and return the assistant's reply.
    async fn complete(
        &self,
        history: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<ChatMessage>;

    /// Like [`complete`](Self::complete), but forwards text to `chunks` as it
    /// arrives. Providers without streaming send the whole reply as one chunk.
    async fn complete_streaming(
        &self,
        history: &[ChatMessage],
        options: &CompletionOptions,
        chunks: mpsc::UnboundedSender<String>,
    ) -> Result<ChatMessage> {
        let reply = self.complete(history, options).await?;
        let _ = chunks.send(reply.text());
        Ok(reply)
    }

    /// Render an image from `prompt`, using `references` as source images.
    async fn generate_image(&self, prompt: &str, references: &[DataContent]) -> Result<DataContent>;
}

/// Strip a Markdown code fence around a JSON reply, if there is one.
fn unfence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Parse a structured reply into `T`.
///
/// Accepts bare JSON, fenced JSON, or JSON surrounded by chatter.
pub fn parse_structured<T: DeserializeOwned>(text: &str, expected: &str) -> Result<T> {
    let body = unfence(text);
    match serde_json::from_str(body) {
        Ok(value) => Ok(value),
        Err(first) => {
            let start = body.find('{');
            let end = body.rfind('}');
            match (start, end) {
                (Some(s), Some(e)) if s < e => serde_json::from_str(&body[s..=e])
                    .map_err(|e| Error::malformed(expected, e)),
                _ => Err(Error::malformed(expected, first)),
            }
        }
    }
}

/// Request a reply shaped like `T` and parse it.
pub async fn complete_typed<T>(
    provider: &dyn ModelProvider,
    history: &[ChatMessage],
    options: CompletionOptions,
) -> Result<T>
where
    T: DeserializeOwned + JsonSchema,
{
    let format = ResponseFormat::for_type::<T>();
    let expected = format.name.clone();
    let options = options.with_format(format);
    let reply = provider.complete(history, &options).await?;
    debug!("{} returned {} chars for {}", provider.name(), reply.text().len(), expected);
    parse_structured(&reply.text(), &expected)
}

/// Like [`complete_typed`], but a malformed reply yields `T::default()`.
///
/// Transport and provider errors still propagate.
pub async fn complete_typed_or_default<T>(
    provider: &dyn ModelProvider,
    history: &[ChatMessage],
    options: CompletionOptions,
) -> Result<T>
where
    T: DeserializeOwned + JsonSchema + Default,
{
    match complete_typed(provider, history, options).await {
        Err(Error::MalformedResponse { expected, reason }) => {
            warn!("Falling back to empty {}: {}", expected, reason);
            Ok(T::default())
        }
        other => other,
    }
}

/// A named role played by a model: fixed instructions plus a model family.
#[derive(Clone)]
pub struct Agent {
    name: String,
    instructions: String,
    model: ModelKind,
    provider: Arc<dyn ModelProvider>,
}

impl Agent {
    pub fn new(
        provider: Arc<dyn ModelProvider>,
        name: impl Into<String>,
        instructions: impl Into<String>,
        model: ModelKind,
    ) -> Self {
        Self {
            name: name.into(),
            instructions: instructions.into(),
            model,
            provider,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn provider(&self) -> &Arc<dyn ModelProvider> {
        &self.provider
    }

    fn options(&self) -> CompletionOptions {
        CompletionOptions::new(self.model).with_instructions(self.instructions.clone())
    }

    /// Send a user prompt with attachments and parse the reply as `T`.
    pub async fn run<T>(&self, prompt: &str, attachments: Vec<DataContent>) -> Result<T>
    where
        T: DeserializeOwned + JsonSchema,
    {
        debug!("Agent '{}' running", self.name);
        let message = user_message(prompt, attachments);
        complete_typed(self.provider.as_ref(), &[message], self.options()).await
    }

    /// Like [`run`](Self::run) with a default fallback on malformed replies.
    pub async fn run_or_default<T>(&self, prompt: &str, attachments: Vec<DataContent>) -> Result<T>
    where
        T: DeserializeOwned + JsonSchema + Default,
    {
        let message = user_message(prompt, attachments);
        complete_typed_or_default(self.provider.as_ref(), &[message], self.options()).await
    }

    /// Free-form reply, streamed to `chunks`.
    pub async fn run_streaming(
        &self,
        prompt: &str,
        chunks: mpsc::UnboundedSender<String>,
    ) -> Result<String> {
        let message = ChatMessage::user(prompt);
        let reply = self
            .provider
            .complete_streaming(&[message], &self.options(), chunks)
            .await?;
        Ok(reply.text())
    }
}

fn user_message(prompt: &str, attachments: Vec<DataContent>) -> ChatMessage {
    let mut contents = vec![Content::Text(prompt.to_string())];
    contents.extend(attachments.into_iter().map(Content::Data));
    ChatMessage::new(Role::User, contents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChannelListingResponse, HtmlSnippet};
    use crate::testing::ScriptedProvider;

    #[test]
    fn test_parse_plain_and_fenced() {
        let plain = r#"{"html": "<p>hi</p>", "new_css": "p{}"}"#;
        let snippet: HtmlSnippet = parse_structured(plain, "HtmlSnippet").unwrap();
        assert_eq!(snippet.html, "<p>hi</p>");

        let fenced = "```json\n{\"html\": \"<p>x</p>\"}\n```";
        let snippet: HtmlSnippet = parse_structured(fenced, "HtmlSnippet").unwrap();
        assert_eq!(snippet.html, "<p>x</p>");

        let chatty = "Here you go: {\"html\": \"<b>y</b>\"} hope it helps";
        let snippet: HtmlSnippet = parse_structured(chatty, "HtmlSnippet").unwrap();
        assert_eq!(snippet.html, "<b>y</b>");
    }

    #[test]
    fn test_parse_malformed() {
        let err = parse_structured::<HtmlSnippet>("not json", "HtmlSnippet").unwrap_err();
        assert!(matches!(err, Error::MalformedResponse { .. }));
    }

    #[test]
    fn test_response_format_name() {
        let format = ResponseFormat::for_type::<HtmlSnippet>();
        assert_eq!(format.name, "HtmlSnippet");
        assert!(format.schema.to_string().contains("new_css"));
    }

    #[tokio::test]
    async fn test_typed_completion_uses_format() {
        let provider = ScriptedProvider::new()
            .respond("HtmlSnippet", r#"{"html": "<h1>T</h1>", "new_css": "", "commentary": ""}"#);
        let snippet: HtmlSnippet = complete_typed(
            &provider,
            &[ChatMessage::user("go")],
            CompletionOptions::default(),
        )
        .await
        .unwrap();
        assert_eq!(snippet.html, "<h1>T</h1>");
        assert_eq!(provider.requests_for("HtmlSnippet"), 1);
    }

    #[tokio::test]
    async fn test_default_fallback_only_for_malformed() {
        let provider = ScriptedProvider::new().respond("ChannelListingResponse", "garbage");
        let listing: ChannelListingResponse = complete_typed_or_default(
            &provider,
            &[ChatMessage::user("channels?")],
            CompletionOptions::default(),
        )
        .await
        .unwrap();
        assert!(listing.channels.is_empty());

        let empty = ScriptedProvider::new();
        let result: Result<ChannelListingResponse> = complete_typed_or_default(
            &empty,
            &[ChatMessage::user("channels?")],
            CompletionOptions::default(),
        )
        .await;
        assert!(matches!(result, Err(Error::Provider(_))));
    }

    #[tokio::test]
    async fn test_default_streaming_sends_whole_reply() {
        let provider = ScriptedProvider::new().respond_text("hello world");
        let agent = Agent::new(Arc::new(provider), "writer", "be brief", ModelKind::Conversational);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let text = agent.run_streaming("hi", tx).await.unwrap();
        assert_eq!(text, "hello world");
        assert_eq!(rx.recv().await.as_deref(), Some("hello world"));
    }
}
