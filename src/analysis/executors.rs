//! Executors of the marketing graph.
//!
//! Every executor receives the accumulated [`ChatMessage`] of its branch and
//! returns it with its own result attached, so downstream nodes and the final
//! aggregate can see everything produced upstream.

use super::prompts;
use super::{MediumSpec, PHOTO_ATTACHMENT, PHOTO_META_TYPE, PREVIEW_PREFIX};
use crate::error::{Error, Result};
use crate::graph::{Executor, NodeContext};
use crate::llm::{Agent, ChatMessage, Content, DataContent, ModelKind, ModelProvider, Role};
use crate::models::{
    AnalysisOutput, ChannelListingResponse, CritiqueResponse, MediumPreview, MediumScoped,
    Photograph, SocialMediaChannelResponse,
};
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, info};

/// Attach `value` as a typed JSON part.
fn json_part<T: Serialize + JsonSchema>(value: &T) -> Result<Content> {
    Ok(Content::Data(DataContent::json(value, &T::schema_name())?))
}

fn photo_image(input: &ChatMessage) -> Result<&DataContent> {
    input
        .find_named(PHOTO_ATTACHMENT)
        .ok_or_else(|| Error::missing("photograph image"))
}

/// Photo metadata plus the check that this branch's preview exists.
fn branch_photo(input: &ChatMessage, medium: &str) -> Result<Photograph> {
    if input.find_name_prefix(PREVIEW_PREFIX).is_none() {
        return Err(Error::missing(format!("medium preview for {medium}")));
    }
    input.json_attachment(PHOTO_META_TYPE)
}

fn details(photo: &Photograph, medium: &str) -> String {
    prompts::photo_details(medium, &photo.title, &photo.description, &photo.tag_line())
}

/// Rates the photo with the vision model.
pub struct CritiqueExecutor {
    id: String,
    agent: Agent,
}

impl CritiqueExecutor {
    pub fn new(id: impl Into<String>, provider: Arc<dyn ModelProvider>) -> Self {
        Self {
            id: id.into(),
            agent: Agent::new(
                provider,
                prompts::CRITIC_NAME,
                prompts::CRITIC_INSTRUCTIONS,
                ModelKind::Vision,
            ),
        }
    }
}

#[async_trait]
impl Executor<ChatMessage, AnalysisOutput> for CritiqueExecutor {
    fn id(&self) -> &str {
        &self.id
    }

    async fn handle(
        &self,
        input: ChatMessage,
        ctx: &NodeContext<AnalysisOutput>,
    ) -> Result<ChatMessage> {
        let photo = photo_image(&input)?.clone();
        let critique: CritiqueResponse = self.agent.run(prompts::CRITIQUE_PROMPT, vec![photo]).await?;
        info!("Critique received ({} areas)", critique.critiques.len());
        let part = json_part(&critique)?;
        ctx.yield_output(AnalysisOutput::Critique(critique));
        Ok(input.prepended(Role::Assistant, part))
    }
}

/// Renders the photo on one print medium with the image model.
pub struct MediumPreviewExecutor {
    id: String,
    medium: MediumSpec,
    provider: Arc<dyn ModelProvider>,
}

impl MediumPreviewExecutor {
    pub fn new(id: impl Into<String>, medium: MediumSpec, provider: Arc<dyn ModelProvider>) -> Self {
        Self {
            id: id.into(),
            medium,
            provider,
        }
    }
}

#[async_trait]
impl Executor<ChatMessage, AnalysisOutput> for MediumPreviewExecutor {
    fn id(&self) -> &str {
        &self.id
    }

    async fn handle(
        &self,
        input: ChatMessage,
        ctx: &NodeContext<AnalysisOutput>,
    ) -> Result<ChatMessage> {
        let photo = photo_image(&input)?;
        debug!("Generating {} preview", self.medium.name);
        let image = self
            .provider
            .generate_image(&self.medium.prompt, std::slice::from_ref(photo))
            .await?;
        if image.is_empty() {
            return Err(Error::Provider(format!(
                "no preview generated for {}",
                self.medium.name
            )));
        }

        let image = image.named(format!("{}{}", PREVIEW_PREFIX, self.medium.name));
        ctx.yield_output(AnalysisOutput::MediumPreview(MediumPreview {
            medium: self.medium.name.clone(),
            preview: image.clone(),
        }));
        Ok(input.prepended(Role::System, Content::Data(image)))
    }
}

/// One structured research call for a medium branch.
///
/// `T` is the response type requested from the model; `wrap` turns it into
/// the streamed output.
pub struct ResearchExecutor<T> {
    id: String,
    medium: String,
    agent: Agent,
    prompt: &'static str,
    wrap: fn(T) -> AnalysisOutput,
    _response: PhantomData<fn() -> T>,
}

impl<T> ResearchExecutor<T> {
    pub fn new(
        id: impl Into<String>,
        medium: impl Into<String>,
        agent: Agent,
        prompt: &'static str,
        wrap: fn(T) -> AnalysisOutput,
    ) -> Self {
        Self {
            id: id.into(),
            medium: medium.into(),
            agent,
            prompt,
            wrap,
            _response: PhantomData,
        }
    }
}

#[async_trait]
impl<T> Executor<ChatMessage, AnalysisOutput> for ResearchExecutor<T>
where
    T: MediumScoped + DeserializeOwned + Serialize + JsonSchema + Send + 'static,
{
    fn id(&self) -> &str {
        &self.id
    }

    async fn handle(
        &self,
        input: ChatMessage,
        ctx: &NodeContext<AnalysisOutput>,
    ) -> Result<ChatMessage> {
        let photo = branch_photo(&input, &self.medium)?;
        let prompt = format!("{}{}", self.prompt, details(&photo, &self.medium));
        debug!("{} asking {}", self.id, self.agent.name());

        let mut response: T = self.agent.run(&prompt, Vec::new()).await?;
        response.set_medium(&self.medium);
        let part = json_part(&response)?;
        ctx.yield_output((self.wrap)(response));
        Ok(input.prepended(Role::Assistant, part))
    }
}

/// Lists the best social channels for a medium, then writes a strategy for
/// each of them.
pub struct SocialMediaExecutor {
    id: String,
    medium: String,
    agent: Agent,
}

impl SocialMediaExecutor {
    pub fn new(id: impl Into<String>, medium: impl Into<String>, provider: Arc<dyn ModelProvider>) -> Self {
        Self {
            id: id.into(),
            medium: medium.into(),
            agent: Agent::new(
                provider,
                prompts::SOCIAL_NAME,
                prompts::SOCIAL_INSTRUCTIONS,
                ModelKind::Conversational,
            ),
        }
    }
}

#[async_trait]
impl Executor<ChatMessage, AnalysisOutput> for SocialMediaExecutor {
    fn id(&self) -> &str {
        &self.id
    }

    async fn handle(
        &self,
        input: ChatMessage,
        ctx: &NodeContext<AnalysisOutput>,
    ) -> Result<ChatMessage> {
        let photo = branch_photo(&input, &self.medium)?;
        let extra = details(&photo, &self.medium);

        let listing: ChannelListingResponse = self
            .agent
            .run_or_default(&format!("{}{}", prompts::CHANNELS_PROMPT, extra), Vec::new())
            .await?;
        debug!(
            "Channels for {}: {}",
            self.medium,
            listing
                .channels
                .iter()
                .map(|c| c.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );

        let mut contents = input.contents;
        for channel in listing.channels {
            if ctx.is_cancelled() {
                break;
            }
            let prompt = format!("{}{}", prompts::channel_prompt(&channel.name), extra);
            let mut strategy: SocialMediaChannelResponse = self.agent.run(&prompt, Vec::new()).await?;
            strategy.set_medium(&self.medium);
            if strategy.channel_name.trim().is_empty() {
                strategy.channel_name = channel.name.clone();
            }
            contents.push(json_part(&strategy)?);
            ctx.yield_output(AnalysisOutput::SocialChannel(strategy));
        }
        Ok(ChatMessage::new(Role::Assistant, contents))
    }
}
