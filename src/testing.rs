//! Test doubles shared by the unit tests.

use crate::error::{Error, Result};
use crate::llm::{ChatMessage, CompletionOptions, Content, DataContent, ModelProvider, Role};
use crate::models::{
    CritiqueEntry, CritiqueResponse, HtmlSnippet, MarketingCampaignResponse, PriceResponse,
    ProductResearchResponse, ResearchResponse, SocialMediaChannelResponse,
};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Responder = Arc<dyn Fn(&[ChatMessage]) -> String + Send + Sync>;

/// A [`ModelProvider`] that answers from a script keyed by the requested
/// response format name (`""` for free-form replies).
#[derive(Default)]
pub struct ScriptedProvider {
    responses: HashMap<String, Responder>,
    image: Option<Vec<u8>>,
    delay: Option<Duration>,
    requests: Mutex<Vec<(String, String)>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, format: &str, reply: &str) -> Self {
        let reply = reply.to_string();
        self.respond_with(format, move |_| reply.clone())
    }

    pub fn respond_text(self, reply: &str) -> Self {
        self.respond("", reply)
    }

    pub fn respond_with<F>(mut self, format: &str, f: F) -> Self
    where
        F: Fn(&[ChatMessage]) -> String + Send + Sync + 'static,
    {
        self.responses.insert(format.to_string(), Arc::new(f));
        self
    }

    pub fn with_image(mut self, bytes: &[u8]) -> Self {
        self.image = Some(bytes.to_vec());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn requests_for(&self, format: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(f, _)| f == format)
            .count()
    }

    /// Prompts sent for `format`, in call order.
    pub fn prompts_for(&self, format: &str) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(f, _)| f == format)
            .map(|(_, prompt)| prompt.clone())
            .collect()
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(
        &self,
        history: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<ChatMessage> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let format = options
            .response_format
            .as_ref()
            .map(|f| f.name.clone())
            .unwrap_or_default();
        let prompt = history.iter().map(ChatMessage::text).collect::<Vec<_>>().join("\n");
        self.requests.lock().unwrap().push((format.clone(), prompt));

        let responder = self
            .responses
            .get(&format)
            .ok_or_else(|| Error::Provider(format!("no scripted reply for '{format}'")))?;
        Ok(ChatMessage::new(
            Role::Assistant,
            vec![Content::Text(responder(history))],
        ))
    }

    async fn generate_image(&self, prompt: &str, _references: &[DataContent]) -> Result<DataContent> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.requests
            .lock()
            .unwrap()
            .push(("image".to_string(), prompt.to_string()));
        let bytes = self
            .image
            .clone()
            .ok_or_else(|| Error::Provider("no scripted image".to_string()))?;
        Ok(DataContent::new(bytes, "image/jpeg"))
    }
}

fn reply<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap()
}

/// Answers every request made by the analysis graph and the report
/// assembler. Each medium gets two channels: Instagram (rank 9) and
/// Pinterest (rank 4).
pub fn marketing_script() -> ScriptedProvider {
    ScriptedProvider::new()
        .with_image(&[0xFF, 0xD8, 0xFF, 0xE0])
        .respond(
            "CritiqueResponse",
            &reply(&CritiqueResponse {
                critiques: vec![CritiqueEntry {
                    area: "Composition".to_string(),
                    rating: 8,
                    praise: "Strong lines".to_string(),
                    improvement_suggestion: "Crop tighter".to_string(),
                }],
                summary: "Striking".to_string(),
            }),
        )
        .respond(
            "ResearchResponse",
            &reply(&ResearchResponse {
                summary: "A good fit".to_string(),
                ..Default::default()
            }),
        )
        .respond(
            "PriceResponse",
            &reply(&PriceResponse {
                medium_size_recommended_price: 450.0,
                executive_summary: "Premium band".to_string(),
                ..Default::default()
            }),
        )
        .respond(
            "ProductResearchResponse",
            &reply(&ProductResearchResponse {
                product_title: "Dunes at Dusk".to_string(),
                ..Default::default()
            }),
        )
        .respond(
            "MarketingCampaignResponse",
            &reply(&MarketingCampaignResponse {
                primary_segment: "Collectors".to_string(),
                ..Default::default()
            }),
        )
        .respond(
            "ChannelListingResponse",
            r#"{"channels": [{"name": "Pinterest"}, {"name": "Instagram"}]}"#,
        )
        .respond_with("SocialMediaChannelResponse", |history| {
            let prompt = history.iter().map(ChatMessage::text).collect::<String>();
            let (name, rank) = if prompt.contains("'Instagram'") {
                ("Instagram", 9)
            } else {
                ("Pinterest", 4)
            };
            reply(&SocialMediaChannelResponse {
                channel_name: name.to_string(),
                rank,
                ..Default::default()
            })
        })
        .respond(
            "HtmlSnippet",
            &reply(&HtmlSnippet {
                html: "<section><p>Generated</p></section>".to_string(),
                new_css: ".generated { color: navy; }".to_string(),
                commentary: String::new(),
            }),
        )
}
