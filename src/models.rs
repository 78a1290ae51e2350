//! Data models for the marketing report.
//!
//! The `*Response` types are the structured results the language model is
//! asked to produce. Their field docs end up in the JSON schema sent with the
//! request, so they are written for the model as much as for the reader.

use crate::llm::DataContent;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// A photograph submitted for analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Photograph {
    /// Stable catalog id; also the job id.
    pub id: String,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Location of the image file.
    pub path: PathBuf,
    /// Media type of the image file, e.g. `image/jpeg`.
    pub content_type: String,
}

impl Photograph {
    /// Tags joined the way prompts expect them.
    pub fn tag_line(&self) -> String {
        self.tags.join("|")
    }
}

impl fmt::Display for Photograph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' ({})", self.title, self.id)
    }
}

/// Results that belong to exactly one medium branch.
pub trait MediumScoped {
    fn medium(&self) -> &str;
    fn set_medium(&mut self, medium: &str);
}

macro_rules! medium_scoped {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl MediumScoped for $ty {
                fn medium(&self) -> &str {
                    &self.medium
                }

                fn set_medium(&mut self, medium: &str) {
                    self.medium = medium.to_string();
                }
            }
        )+
    };
}

/// One rated aspect of a photo critique.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CritiqueEntry {
    /// The aspect being rated, such as composition or technique.
    pub area: String,
    /// Rating between 1 and 10.
    pub rating: u8,
    /// What works well in this area.
    pub praise: String,
    /// An actionable suggestion for improvement.
    pub improvement_suggestion: String,
}

/// A critique of the photograph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CritiqueResponse {
    /// One entry per critiqued aspect.
    pub critiques: Vec<CritiqueEntry>,
    /// Overall summary of the critique.
    #[serde(default)]
    pub summary: String,
}

/// Research about how well a medium suits the photograph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ResearchResponse {
    /// The medium being researched, such as canvas or metal.
    #[serde(default)]
    pub medium: String,
    /// A short summary of the findings.
    pub summary: String,
    /// The detailed answer, including pros, cons and a recommendation.
    pub detailed_answer: String,
}

/// Pricing analysis for prints on one medium.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PriceResponse {
    /// The medium being evaluated for pricing, such as canvas or metal.
    #[serde(default)]
    pub medium: String,
    /// Estimated cost to produce a print with this medium in a smaller size of 8 inches x 10 inches.
    pub small_size_estimated_cost: f64,
    /// Recommended price to sell a print with this medium in a smaller size of 8 inches x 10 inches. Set to 0 if not recommended.
    pub small_size_recommended_price: f64,
    /// Estimated cost to produce a print with this medium in a medium size of 16 inches x 24 inches.
    pub medium_size_estimated_cost: f64,
    /// Recommended price to sell a print with this medium in a medium size of 16 inches x 24 inches. Set to 0 if not recommended.
    pub medium_size_recommended_price: f64,
    /// Estimated cost to produce a print with this medium in a large size of 30 inches x 40 inches.
    pub large_size_estimated_cost: f64,
    /// Recommended price to sell a print with this medium in a large size of 30 inches x 40 inches. Set to 0 if not recommended.
    pub large_size_recommended_price: f64,
    /// A brief executive summary of the pricing analysis.
    pub executive_summary: String,
    /// Market comparables used to determine pricing recommendations.
    pub market_comps: String,
    /// Detailed rationale behind the pricing recommendations.
    #[serde(default)]
    pub detailed_report: String,
}

/// Product copy for a print on one medium.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProductResearchResponse {
    /// The medium being evaluated for the product, such as canvas or metal.
    #[serde(default)]
    pub medium: String,
    /// The title of the specific product, including photograph title, size, and medium.
    pub product_title: String,
    /// A compelling one sentence product description that highlights the unique features and benefits of the print.
    pub sizzle: String,
    /// A detailed ad copy that provides an engaging narrative about the photograph and medium, ending with a powerful call to action to incite potential buyers.
    pub detailed_ad_copy: String,
    /// A list of recommended keywords to use for search engine optimization (SEO) to improve product visibility online.
    #[serde(default)]
    pub search_engine_keywords: Vec<String>,
}

/// A marketing campaign plan for a specific medium.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MarketingCampaignResponse {
    /// The medium being evaluated for the marketing campaign, such as canvas or metal.
    #[serde(default)]
    pub medium: String,
    /// The primary segment you recommend this is marketed to.
    pub primary_segment: String,
    /// The secondary segment you recommend this is marketed to.
    pub secondary_segment: String,
    /// A concise one-line statement that captures the essence of the marketing campaign's positioning.
    pub position_statement: String,
    /// A list of key message pillars that support the marketing campaign.
    #[serde(default)]
    pub message_pillars: Vec<String>,
    /// A list of recommended channels for the marketing campaign. Start with the channel name, include if it's owned, earned, or paid, and describe the pros and cons of the channel.
    #[serde(default)]
    pub channels: Vec<String>,
    /// A list of materials to prepare such as product brochures and fliers.
    #[serde(default)]
    pub materials: Vec<String>,
    /// A timeline outlining the key phases and milestones of the marketing campaign. Start with a sequence followed by the time period in days or weeks (such as: 1. days 1 - 5 or 1. weeks 1 - 4)
    #[serde(default)]
    pub campaign: Vec<String>,
}

/// Content strategy for one social media channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SocialMediaChannelResponse {
    /// The medium being evaluated for the social media channel, such as canvas or metal.
    #[serde(default)]
    pub medium: String,
    /// The name of the social media channel being evaluated, such as Instagram or Facebook.
    pub channel_name: String,
    /// The type of campaign for the social media channel, such as owned, earned, or paid.
    pub channel_type: String,
    /// Rank is between 0 and 100 with 0 being completely ineffective channel and 100 being the best possible fit.
    pub rank: i32,
    /// Summary of the benefits of going with this channel.
    pub pros: String,
    /// Summary of the drawbacks of going with this channel.
    pub cons: String,
    /// A list of example posts that would be effective on this channel.
    #[serde(default)]
    pub posts: Vec<String>,
    /// Best practices including size, attachments, and timing for posting to this channel.
    #[serde(default)]
    pub best_practices: String,
    /// A list of relevant hashtags to include in posts on this channel to increase visibility and engagement.
    #[serde(default)]
    pub hash_tags: Vec<String>,
}

medium_scoped!(
    ResearchResponse,
    PriceResponse,
    ProductResearchResponse,
    MarketingCampaignResponse,
    SocialMediaChannelResponse,
);

/// A social media channel for marketing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ChannelDetail {
    /// The name of the social media channel/platform.
    pub name: String,
    /// Why this channel is being considered for marketing the piece.
    #[serde(default)]
    pub fit: String,
    /// What content/format should be broadcast here?
    #[serde(default)]
    pub format: String,
    /// Popular relevant hashtags and/or keywords or tags for the channel.
    #[serde(default)]
    pub hash_tags: Vec<String>,
}

/// Channels worth a detailed strategy, as listed by the model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ChannelListingResponse {
    /// The medium this channel list is for.
    #[serde(default)]
    pub medium: String,
    /// This list of social media channels recommended.
    #[serde(default)]
    pub channels: Vec<ChannelDetail>,
}

/// A rendered piece of the HTML report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct HtmlSnippet {
    /// The HTML to embed in the web page.
    pub html: String,
    /// New CSS introduced as the result of this snippet, not including existing CSS that was already passed in.
    #[serde(default)]
    pub new_css: String,
    /// Optional commentary.
    #[serde(default)]
    pub commentary: String,
}

/// A rendering of the photograph on a print medium.
#[derive(Debug, Clone, PartialEq)]
pub struct MediumPreview {
    pub medium: String,
    pub preview: DataContent,
}

/// Everything a node of the marketing graph can stream while it runs.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisOutput {
    Critique(CritiqueResponse),
    MediumPreview(MediumPreview),
    Research(ResearchResponse),
    Price(PriceResponse),
    ProductResearch(ProductResearchResponse),
    Campaign(MarketingCampaignResponse),
    SocialChannel(SocialMediaChannelResponse),
}

impl AnalysisOutput {
    /// Medium branch this output belongs to; `None` for the critique.
    pub fn medium(&self) -> Option<&str> {
        match self {
            AnalysisOutput::Critique(_) => None,
            AnalysisOutput::MediumPreview(p) => Some(&p.medium),
            AnalysisOutput::Research(r) => Some(r.medium()),
            AnalysisOutput::Price(r) => Some(r.medium()),
            AnalysisOutput::ProductResearch(r) => Some(r.medium()),
            AnalysisOutput::Campaign(r) => Some(r.medium()),
            AnalysisOutput::SocialChannel(r) => Some(r.medium()),
        }
    }

    /// Short label used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            AnalysisOutput::Critique(_) => "critique",
            AnalysisOutput::MediumPreview(_) => "medium preview",
            AnalysisOutput::Research(_) => "research",
            AnalysisOutput::Price(_) => "price",
            AnalysisOutput::ProductResearch(_) => "product research",
            AnalysisOutput::Campaign(_) => "campaign",
            AnalysisOutput::SocialChannel(_) => "social channel",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemars::schema_for;

    #[test]
    fn test_medium_scoped() {
        let mut price = PriceResponse::default();
        price.set_medium("Metal");
        assert_eq!(price.medium(), "Metal");

        let output = AnalysisOutput::Price(price);
        assert_eq!(output.medium(), Some("Metal"));
        assert_eq!(output.kind(), "price");

        let critique = AnalysisOutput::Critique(CritiqueResponse::default());
        assert_eq!(critique.medium(), None);
    }

    #[test]
    fn test_response_without_medium_parses() {
        let json = r#"{"summary": "Good fit", "detailed_answer": "Metal suits the contrast."}"#;
        let research: ResearchResponse = serde_json::from_str(json).unwrap();
        assert!(research.medium.is_empty());
        assert_eq!(research.summary, "Good fit");
    }

    #[test]
    fn test_schema_carries_field_docs() {
        let schema = serde_json::to_string(&schema_for!(SocialMediaChannelResponse)).unwrap();
        assert!(schema.contains("channel_name"));
        assert!(schema.contains("Rank is between 0 and 100"));
    }

    #[test]
    fn test_photograph_display() {
        let photo = Photograph {
            id: "p1".to_string(),
            title: "Dunes".to_string(),
            description: "Sand at dusk".to_string(),
            categories: vec![],
            tags: vec!["desert".to_string(), "dusk".to_string()],
            path: PathBuf::from("dunes.jpg"),
            content_type: "image/jpeg".to_string(),
        };
        assert_eq!(photo.to_string(), "'Dunes' (p1)");
        assert_eq!(photo.tag_line(), "desert|dusk");
    }
}
