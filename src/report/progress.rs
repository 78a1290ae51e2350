//! Progress model for one marketing report.
//!
//! A [`MarketReport`] collects everything the analysis graph streams: the
//! critique plus one [`BranchReport`] per print medium. Completion is the
//! mean of the branch fractions and the critique indicator. All mutable state
//! sits behind a single mutex, so concurrent outputs for the same medium
//! always land in the same branch.

use crate::llm::DataContent;
use crate::models::{
    AnalysisOutput, CritiqueResponse, MarketingCampaignResponse, Photograph, PriceResponse,
    ProductResearchResponse, ResearchResponse, SocialMediaChannelResponse,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Everything gathered for one medium.
#[derive(Debug, Clone)]
pub struct BranchReport {
    pub medium: String,
    pub started_at: DateTime<Utc>,
    pub preview: Option<DataContent>,
    pub research: Vec<ResearchResponse>,
    pub price: Option<PriceResponse>,
    pub socials: Vec<SocialMediaChannelResponse>,
    pub product: Option<ProductResearchResponse>,
    pub campaign: Option<MarketingCampaignResponse>,
}

impl BranchReport {
    pub fn new(medium: impl Into<String>) -> Self {
        Self {
            medium: medium.into(),
            started_at: Utc::now(),
            preview: None,
            research: Vec::new(),
            price: None,
            socials: Vec::new(),
            product: None,
            campaign: None,
        }
    }

    /// Share of the six expected results that arrived.
    pub fn fraction(&self) -> f64 {
        let indicators = [
            self.preview.is_some(),
            !self.research.is_empty(),
            self.price.is_some(),
            !self.socials.is_empty(),
            self.product.is_some(),
            self.campaign.is_some(),
        ];
        indicators.iter().filter(|&&done| done).count() as f64 / indicators.len() as f64
    }
}

#[derive(Debug)]
struct ReportState {
    status: String,
    workflow: String,
    critique: Option<CritiqueResponse>,
    branches: Vec<BranchReport>,
    analysis_done: bool,
    writing_percent: u8,
    done: bool,
    output_path: Option<PathBuf>,
    high_water: f64,
}

impl ReportState {
    fn branch_mut(&mut self, medium: &str) -> &mut BranchReport {
        let index = match self.branches.iter().position(|b| b.medium == medium) {
            Some(index) => index,
            None => {
                debug!("Creating branch for medium {}", medium);
                self.branches.push(BranchReport::new(medium));
                self.branches.len() - 1
            }
        };
        &mut self.branches[index]
    }

    fn fraction(&mut self, expected_branches: usize) -> f64 {
        let critique = if self.critique.is_some() { 1.0 } else { 0.0 };
        let branches: f64 = self.branches.iter().map(BranchReport::fraction).sum();
        let slots = expected_branches.max(self.branches.len()) + 1;
        let raw = ((branches + critique) / slots as f64).clamp(0.0, 1.0);
        self.high_water = self.high_water.max(raw);
        self.high_water
    }
}

/// Serializable view of a report at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportSnapshot {
    pub job_id: String,
    pub run_number: u32,
    pub title: String,
    pub status: String,
    pub percent: u8,
    pub writing_percent: u8,
    pub analysis_done: bool,
    pub done: bool,
    pub started_at: DateTime<Utc>,
    pub has_critique: bool,
    pub branches: Vec<BranchSnapshot>,
    pub output_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BranchSnapshot {
    pub medium: String,
    pub percent: u8,
    pub has_preview: bool,
    pub research: usize,
    pub has_price: bool,
    pub socials: usize,
    pub has_product: bool,
    pub has_campaign: bool,
}

impl From<&BranchReport> for BranchSnapshot {
    fn from(branch: &BranchReport) -> Self {
        Self {
            medium: branch.medium.clone(),
            percent: to_percent(branch.fraction()),
            has_preview: branch.preview.is_some(),
            research: branch.research.len(),
            has_price: branch.price.is_some(),
            socials: branch.socials.len(),
            has_product: branch.product.is_some(),
            has_campaign: branch.campaign.is_some(),
        }
    }
}

fn to_percent(fraction: f64) -> u8 {
    (fraction * 100.0).floor().clamp(0.0, 100.0) as u8
}

/// The shared, mutable report for one analysis run.
#[derive(Debug)]
pub struct MarketReport {
    job_id: String,
    run_number: u32,
    photo: Photograph,
    started_at: DateTime<Utc>,
    expected_branches: usize,
    state: Mutex<ReportState>,
    assembly_started: AtomicBool,
}

impl MarketReport {
    /// `expected_branches` is the number of mediums the graph will analyse;
    /// it keeps the completion denominator stable while branches appear.
    pub fn new(photo: Photograph, run_number: u32, expected_branches: usize) -> Self {
        Self {
            job_id: photo.id.clone(),
            run_number,
            photo,
            started_at: Utc::now(),
            expected_branches,
            state: Mutex::new(ReportState {
                status: "Initializing".to_string(),
                workflow: String::new(),
                critique: None,
                branches: Vec::new(),
                analysis_done: false,
                writing_percent: 0,
                done: false,
                output_path: None,
                high_water: 0.0,
            }),
            assembly_started: AtomicBool::new(false),
        }
    }

    fn state(&self) -> MutexGuard<'_, ReportState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn run_number(&self) -> u32 {
        self.run_number
    }

    pub fn photo(&self) -> &Photograph {
        &self.photo
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Record one streamed output and update the status line.
    ///
    /// Critique and previews keep the first value received; price, product
    /// and campaign keep the latest; research and social channels
    /// accumulate. Returns `true` if anything was stored.
    pub fn apply(&self, output: AnalysisOutput) -> bool {
        let mut state = self.state();
        let (stored, status) = match output {
            AnalysisOutput::Critique(critique) => {
                let stored = state.critique.is_none();
                if stored {
                    state.critique = Some(critique);
                }
                (stored, "Received image critique.".to_string())
            }
            AnalysisOutput::MediumPreview(preview) => {
                let branch = state.branch_mut(&preview.medium);
                let stored = branch.preview.is_none();
                if stored {
                    branch.preview = Some(preview.preview);
                }
                (stored, format!("Generated preview for {}", preview.medium))
            }
            AnalysisOutput::Research(research) => {
                let status = format!("Completed research for {}", research.medium);
                state.branch_mut(&research.medium.clone()).research.push(research);
                (true, status)
            }
            AnalysisOutput::Price(price) => {
                let status = format!("Completed price analysis for {}", price.medium);
                let medium = price.medium.clone();
                state.branch_mut(&medium).price = Some(price);
                (true, status)
            }
            AnalysisOutput::ProductResearch(product) => {
                let status = format!("Finished product research for {}", product.medium);
                let medium = product.medium.clone();
                state.branch_mut(&medium).product = Some(product);
                (true, status)
            }
            AnalysisOutput::Campaign(campaign) => {
                let status = format!("Created marketing campaign for {}", campaign.medium);
                let medium = campaign.medium.clone();
                state.branch_mut(&medium).campaign = Some(campaign);
                (true, status)
            }
            AnalysisOutput::SocialChannel(social) => {
                let status = format!(
                    "Created {} content strategy for {}",
                    social.channel_name, social.medium
                );
                state.branch_mut(&social.medium.clone()).socials.push(social);
                (true, status)
            }
        };
        state.status = status;
        let expected = self.expected_branches;
        state.fraction(expected);
        stored
    }

    /// Analysis completion in `[0, 1]`. Never decreases.
    pub fn fraction(&self) -> f64 {
        self.state().fraction(self.expected_branches)
    }

    pub fn percent(&self) -> u8 {
        to_percent(self.fraction())
    }

    pub fn status(&self) -> String {
        self.state().status.clone()
    }

    pub fn set_status(&self, status: impl Into<String>) {
        self.state().status = status.into();
    }

    /// Store the Mermaid rendering of the analysis graph.
    pub fn set_workflow_diagram(&self, diagram: impl Into<String>) {
        self.state().workflow = diagram.into();
    }

    pub fn workflow_diagram(&self) -> String {
        self.state().workflow.clone()
    }

    pub fn mark_analysis_done(&self) {
        let mut state = self.state();
        state.analysis_done = true;
        state.status = "Workflow execution completed.".to_string();
    }

    pub fn is_analysis_done(&self) -> bool {
        self.state().analysis_done
    }

    /// Claim the right to assemble this report.
    ///
    /// Succeeds exactly once, and only after analysis is done.
    pub fn try_begin_assembly(&self) -> bool {
        if !self.is_analysis_done() {
            return false;
        }
        self.assembly_started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn assembly_started(&self) -> bool {
        self.assembly_started.load(Ordering::Acquire)
    }

    pub fn set_writing_progress(&self, percent: u8, status: impl Into<String>) {
        let mut state = self.state();
        state.writing_percent = state.writing_percent.max(percent.min(100));
        state.status = status.into();
    }

    pub fn writing_percent(&self) -> u8 {
        self.state().writing_percent
    }

    pub fn mark_done(&self, output_path: PathBuf) {
        let mut state = self.state();
        state.done = true;
        state.writing_percent = 100;
        state.output_path = Some(output_path);
        state.status = "Report published.".to_string();
    }

    pub fn is_done(&self) -> bool {
        self.state().done
    }

    pub fn output_path(&self) -> Option<PathBuf> {
        self.state().output_path.clone()
    }

    pub fn critique(&self) -> Option<CritiqueResponse> {
        self.state().critique.clone()
    }

    /// Copies of all branches, ordered by medium name.
    pub fn branches(&self) -> Vec<BranchReport> {
        let mut branches = self.state().branches.clone();
        branches.sort_by(|a, b| a.medium.cmp(&b.medium));
        branches
    }

    pub fn snapshot(&self) -> ReportSnapshot {
        let mut state = self.state();
        let percent = to_percent(state.fraction(self.expected_branches));
        let mut branches: Vec<BranchSnapshot> = state.branches.iter().map(Into::into).collect();
        branches.sort_by(|a, b| a.medium.cmp(&b.medium));
        ReportSnapshot {
            job_id: self.job_id.clone(),
            run_number: self.run_number,
            title: self.photo.title.clone(),
            status: state.status.clone(),
            percent,
            writing_percent: state.writing_percent,
            analysis_done: state.analysis_done,
            done: state.done,
            started_at: self.started_at,
            has_critique: state.critique.is_some(),
            branches,
            output_path: state.output_path.clone(),
        }
    }
}
