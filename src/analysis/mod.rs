//! The marketing analysis graph.
//!
//! The start node fans the photo out to a critique and to one preview per
//! print medium. Each preview fans out to research, product copy and social
//! media; research feeds pricing and product copy feeds the campaign. A
//! per-medium aggregator joins pricing, campaign and social media, and a final
//! aggregator joins the critique with every medium.

mod executors;
mod prompts;
mod workflow;

pub use executors::{CritiqueExecutor, MediumPreviewExecutor, ResearchExecutor, SocialMediaExecutor};
pub use workflow::{build_marketing_graph, node_id, MarketingGraph, ANALYSIS_NODE, CRITIQUE_NODE, START_NODE};

use crate::error::Result;
use crate::llm::{ChatMessage, Content, DataContent, Role};
use crate::models::Photograph;
use serde::{Deserialize, Serialize};

/// Name of the photo image attachment.
pub const PHOTO_ATTACHMENT: &str = "Photograph";
/// Type name of the photo metadata attachment.
pub const PHOTO_META_TYPE: &str = "Photograph";
/// Name prefix of medium preview attachments.
pub const PREVIEW_PREFIX: &str = "Medium preview: ";
pub const PHOTO_ID_PREFIX: &str = "PhotoId: ";

/// A print medium and the prompt that renders a preview on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediumSpec {
    pub name: String,
    pub prompt: String,
}

impl MediumSpec {
    pub fn new(name: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prompt: prompt.into(),
        }
    }
}

pub fn default_mediums() -> Vec<MediumSpec> {
    vec![
        MediumSpec::new(
            "Metal",
            "Show how the image would look like on a glossy metal ChromaLux dye sublimated \
             print with a float mount.",
        ),
        MediumSpec::new(
            "Canvas",
            "Show how the image would look like on a stretched canvas print, wrapped around \
             the edges. Render it on a white wall with the camera positioned to view at about \
             a 45-degree angle to show the thickness of the edges and highlight the wrapped sides.",
        ),
        MediumSpec::new(
            "Acrylic",
            "Render the image mounted on a wall in an acrylic mount. This is a glasslike cover \
             so it should be reflective.",
        ),
        MediumSpec::new(
            "Framed photo",
            "Show the photo on matte traditional photo paper with a sleek, dark wood frame.",
        ),
    ]
}

/// The message the graph starts from: the photo id, the image and the
/// photo metadata as JSON.
pub fn initial_message(photo: &Photograph, image: Vec<u8>) -> Result<ChatMessage> {
    let meta = DataContent::json(photo, PHOTO_META_TYPE)?.named(format!("{} meta", PHOTO_ATTACHMENT));
    Ok(ChatMessage::new(
        Role::User,
        vec![
            Content::Text(format!("{}{}", PHOTO_ID_PREFIX, photo.id)),
            Content::Data(DataContent::new(image, photo.content_type.clone()).named(PHOTO_ATTACHMENT)),
            Content::Data(meta),
        ],
    ))
}
