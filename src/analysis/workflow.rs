//! Wiring of the marketing graph.

use super::executors::{CritiqueExecutor, MediumPreviewExecutor, ResearchExecutor, SocialMediaExecutor};
use super::{prompts, MediumSpec};
use crate::error::Result;
use crate::graph::{passthrough, Aggregator, GraphBuilder, Workflow};
use crate::llm::{Agent, ChatMessage, ModelKind, ModelProvider};
use crate::models::{
    AnalysisOutput, MarketingCampaignResponse, PriceResponse, ProductResearchResponse,
    ResearchResponse,
};
use std::sync::Arc;
use tracing::debug;

pub type MarketingGraph = Workflow<ChatMessage, AnalysisOutput>;

pub const START_NODE: &str = "start";
pub const CRITIQUE_NODE: &str = "critique";
/// Final aggregator joining the critique and every medium.
pub const ANALYSIS_NODE: &str = "analysis";

/// Id of the `kind` node of a medium branch, e.g. `price_framed_photo`.
pub fn node_id(kind: &str, medium: &str) -> String {
    let slug: String = medium
        .trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("{}_{}", kind, slug)
}

/// Build the analysis graph for `mediums`.
pub fn build_marketing_graph(
    provider: Arc<dyn ModelProvider>,
    mediums: &[MediumSpec],
) -> Result<MarketingGraph> {
    let researcher = Agent::new(
        provider.clone(),
        prompts::RESEARCHER_NAME,
        prompts::RESEARCHER_INSTRUCTIONS,
        ModelKind::Conversational,
    );
    let marketer = Agent::new(
        provider.clone(),
        prompts::MARKETER_NAME,
        prompts::MARKETER_INSTRUCTIONS,
        ModelKind::Conversational,
    );

    let mut builder = GraphBuilder::new(passthrough(START_NODE));
    builder.add_executor(CritiqueExecutor::new(CRITIQUE_NODE, provider.clone()));

    let mut first_wave = vec![CRITIQUE_NODE.to_string()];
    let mut joined = vec![CRITIQUE_NODE.to_string()];

    for medium in mediums {
        let name = medium.name.as_str();
        let preview = node_id("preview", name);
        let research = node_id("research", name);
        let price = node_id("price", name);
        let product = node_id("product", name);
        let campaign = node_id("campaign", name);
        let social = node_id("social", name);
        let branch = node_id("branch", name);
        debug!("Adding branch {} for {}", branch, name);

        builder
            .add_executor(MediumPreviewExecutor::new(&preview, medium.clone(), provider.clone()))
            .add_executor(ResearchExecutor::<ResearchResponse>::new(
                &research,
                name,
                researcher.clone(),
                prompts::MEDIUM_RESEARCH_PROMPT,
                AnalysisOutput::Research,
            ))
            .add_executor(ResearchExecutor::<PriceResponse>::new(
                &price,
                name,
                researcher.clone(),
                prompts::PRICE_RESEARCH_PROMPT,
                AnalysisOutput::Price,
            ))
            .add_executor(ResearchExecutor::<ProductResearchResponse>::new(
                &product,
                name,
                marketer.clone(),
                prompts::PRODUCT_PAGE_PROMPT,
                AnalysisOutput::ProductResearch,
            ))
            .add_executor(ResearchExecutor::<MarketingCampaignResponse>::new(
                &campaign,
                name,
                marketer.clone(),
                prompts::CAMPAIGN_PROMPT,
                AnalysisOutput::Campaign,
            ))
            .add_executor(SocialMediaExecutor::new(&social, name, provider.clone()))
            .add_fan_out_edge(&preview, &[&research, &product, &social])
            .add_edge(&research, &price)
            .add_edge(&product, &campaign)
            .add_aggregator(
                Aggregator::new(&branch, ChatMessage::merged),
                &[&price, &campaign, &social],
            );

        first_wave.push(preview);
        joined.push(branch);
    }

    let first_wave: Vec<&str> = first_wave.iter().map(String::as_str).collect();
    let joined: Vec<&str> = joined.iter().map(String::as_str).collect();
    builder
        .add_fan_out_edge(START_NODE, &first_wave)
        .add_aggregator(Aggregator::new(ANALYSIS_NODE, ChatMessage::merged), &joined);

    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{default_mediums, initial_message};
    use crate::graph::{EdgeKind, NodeKind, RunEvent};
    use crate::models::Photograph;
    use crate::testing::{marketing_script, ScriptedProvider};
    use futures::StreamExt;
    use std::path::PathBuf;

    #[test]
    fn test_node_id() {
        assert_eq!(node_id("price", "Framed photo"), "price_framed_photo");
        assert_eq!(node_id("branch", "Metal"), "branch_metal");
    }

    #[test]
    fn test_graph_shape() {
        let provider: Arc<dyn ModelProvider> = Arc::new(ScriptedProvider::new());
        let graph = build_marketing_graph(provider, &default_mediums()).unwrap();
        let description = graph.describe();

        assert_eq!(description.start, START_NODE);
        assert_eq!(description.nodes.len(), 2 + 7 * 4 + 1);
        let aggregators = description
            .nodes
            .iter()
            .filter(|n| n.kind == NodeKind::Aggregator)
            .count();
        assert_eq!(aggregators, 5);

        let into_analysis = description
            .edges
            .iter()
            .filter(|e| e.to == ANALYSIS_NODE && e.kind == EdgeKind::FanIn)
            .count();
        assert_eq!(into_analysis, 5);
        assert!(description.to_mermaid().starts_with("flowchart TD"));
    }

    #[test]
    fn test_duplicate_medium_rejected() {
        let provider: Arc<dyn ModelProvider> = Arc::new(ScriptedProvider::new());
        let mediums = vec![MediumSpec::new("Metal", "a"), MediumSpec::new("metal", "b")];
        assert!(build_marketing_graph(provider, &mediums).is_err());
    }

    #[tokio::test]
    async fn test_full_run_streams_every_result() {
        let provider: Arc<dyn ModelProvider> = Arc::new(marketing_script());
        let mediums = vec![MediumSpec::new("Metal", "on metal"), MediumSpec::new("Canvas", "on canvas")];
        let graph = build_marketing_graph(provider, &mediums).unwrap();
        let photo = Photograph {
            id: "dunes".to_string(),
            title: "Dunes".to_string(),
            description: "Sand".to_string(),
            categories: Vec::new(),
            tags: vec!["desert".to_string()],
            path: PathBuf::from("dunes.jpg"),
            content_type: "image/jpeg".to_string(),
        };

        let mut run = graph.run(initial_message(&photo, vec![0xFF, 0xD8]).unwrap());
        let mut kinds = Vec::new();
        while let Some(event) = run.next().await {
            match event {
                RunEvent::Output { value, .. } => kinds.push(value.kind()),
                RunEvent::NodeFailed(failure) => panic!("node failed: {failure}"),
            }
        }
        let summary = run.finish().await.unwrap();

        assert!(summary.is_success());
        // critique + per medium: preview, research, price, product, campaign, two channels
        assert_eq!(kinds.len(), 1 + 2 * 7);
        assert_eq!(kinds.iter().filter(|k| **k == "social channel").count(), 4);
        assert_eq!(summary.outputs.len(), 1);
        assert!(summary.output_of(ANALYSIS_NODE).is_some());
    }
}
