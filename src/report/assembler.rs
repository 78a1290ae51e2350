//! Turns a finished analysis into an HTML report.
//!
//! The introduction and critique are written first; then every medium branch
//! is written concurrently, and within a branch every social channel too.
//! All fragments share one stylesheet: each request carries the compressed
//! stylesheet so far, and each reply's new CSS is appended to it.

use super::progress::{BranchReport, MarketReport};
use super::prompts;
use super::section::{compose, SectionNode};
use super::stylesheet::SharedStyleSheet;
use crate::bus::EventBus;
use crate::error::{Error, Result};
use crate::events::{ProgressUpdated, ReportFinished};
use crate::llm::{Agent, ModelKind, ModelProvider};
use crate::models::{HtmlSnippet, SocialMediaChannelResponse};
use crate::storage::{preview_filename, ReportStore};
use futures::future::join_all;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Fragments an assembly will request: introduction, critique, four per
/// branch and one per social channel.
pub fn planned_fragments(branches: &[BranchReport]) -> usize {
    let channels: usize = branches.iter().map(|b| b.socials.len()).sum();
    2 + 4 * branches.len() + channels
}

/// Channels in report order: highest rank first, then by name.
fn ranked(socials: &[SocialMediaChannelResponse]) -> Vec<&SocialMediaChannelResponse> {
    let mut ranked: Vec<&SocialMediaChannelResponse> = socials.iter().collect();
    ranked.sort_by(|a, b| {
        b.rank
            .cmp(&a.rank)
            .then_with(|| a.channel_name.cmp(&b.channel_name))
    });
    ranked
}

#[derive(Clone)]
pub struct ReportAssembler {
    provider: Arc<dyn ModelProvider>,
    store: Arc<dyn ReportStore>,
    bus: EventBus,
}

impl ReportAssembler {
    pub fn new(provider: Arc<dyn ModelProvider>, store: Arc<dyn ReportStore>, bus: EventBus) -> Self {
        Self {
            provider,
            store,
            bus,
        }
    }

    /// Write the report once.
    ///
    /// Returns `Ok(None)` without doing anything if analysis is not done or
    /// another call already claimed this report.
    pub async fn assemble(&self, report: Arc<MarketReport>) -> Result<Option<PathBuf>> {
        if !report.try_begin_assembly() {
            debug!(
                "Skipping assembly of {} run {}: not ready or already started",
                report.job_id(),
                report.run_number()
            );
            return Ok(None);
        }

        info!("Assembling report for {}", report.photo());
        let critique = report.critique().ok_or_else(|| Error::missing("photo critique"))?;
        let branches = report.branches();
        let writer = Writer {
            agent: Agent::new(
                self.provider.clone(),
                prompts::WRITER_NAME,
                prompts::WRITER_INSTRUCTIONS,
                ModelKind::Conversational,
            ),
            stylesheet: SharedStyleSheet::new(),
            report: &report,
            store: self.store.as_ref(),
            bus: &self.bus,
            planned: planned_fragments(&branches),
            completed: AtomicUsize::new(0),
        };
        writer.publish("Starting report writing...");

        let photo = report.photo();
        let introduction = writer
            .fragment(prompts::introduction(photo)?, "Wrote the introduction.")
            .await?;
        let root = SectionNode::with_fragment(1, photo.title.clone(), introduction);

        let snippet = writer
            .fragment(prompts::critique(&critique)?, "Wrote the critique.")
            .await?;
        root.add_child(SectionNode::with_fragment(2, "Critique", snippet));

        let results = join_all(branches.iter().map(|branch| writer.branch(&root, branch))).await;
        for (branch, result) in branches.iter().zip(&results) {
            if let Err(e) = result {
                error!("Writing the {} section failed: {}", branch.medium, e);
            }
        }
        results.into_iter().collect::<Result<Vec<()>>>()?;

        let document = compose(&root);
        let output_path = self
            .store
            .write_report(
                report.job_id(),
                report.run_number(),
                &document.to_html(),
                &document.css,
            )
            .await?;

        report.mark_done(output_path.clone());
        let snapshot = report.snapshot();
        self.bus.publish(ProgressUpdated {
            job_id: report.job_id().to_string(),
            report: snapshot.clone(),
        });
        self.bus.publish(ReportFinished {
            job_id: report.job_id().to_string(),
            report: snapshot,
            output_path: output_path.clone(),
        });
        info!("Report written to {}", output_path.display());
        Ok(Some(output_path))
    }
}

/// State of one assembly run.
struct Writer<'a> {
    agent: Agent,
    stylesheet: SharedStyleSheet,
    report: &'a MarketReport,
    store: &'a dyn ReportStore,
    bus: &'a EventBus,
    planned: usize,
    completed: AtomicUsize,
}

impl Writer<'_> {
    fn publish(&self, status: &str) {
        let done = self.completed.load(Ordering::Acquire);
        let percent = (done * 100 / self.planned.max(1)).clamp(1, 100) as u8;
        self.report.set_writing_progress(percent, status);
        self.bus.publish(ProgressUpdated {
            job_id: self.report.job_id().to_string(),
            report: self.report.snapshot(),
        });
    }

    /// Request one fragment with the stylesheet so far attached.
    async fn fragment(&self, prompt: String, status: &str) -> Result<HtmlSnippet> {
        let attachments = self.stylesheet.as_attachment().into_iter().collect();
        let snippet: HtmlSnippet = self.agent.run(&prompt, attachments).await?;
        if !snippet.commentary.trim().is_empty() {
            debug!("Writer commentary: {}", snippet.commentary);
        }
        self.stylesheet.append(&snippet.new_css);
        self.completed.fetch_add(1, Ordering::AcqRel);
        self.publish(status);
        Ok(snippet)
    }

    async fn branch(&self, root: &SectionNode, branch: &BranchReport) -> Result<()> {
        let medium = branch.medium.as_str();
        let section = root.child(2, format!("Medium: {medium}"));

        let missing = |what: &str| Error::missing(format!("{what} for {medium}"));
        let preview = branch.preview.as_ref().ok_or_else(|| missing("preview"))?;
        let research = branch.research.first().ok_or_else(|| missing("research"))?;
        let price = branch.price.as_ref().ok_or_else(|| missing("price analysis"))?;
        let product = branch.product.as_ref().ok_or_else(|| missing("product research"))?;
        let campaign = branch.campaign.as_ref().ok_or_else(|| missing("marketing campaign"))?;

        let preview_file = preview_filename(Some(medium));
        self.store
            .write_asset(
                self.report.job_id(),
                self.report.run_number(),
                &preview_file,
                &preview.bytes,
            )
            .await?;

        let snippet = self
            .fragment(
                prompts::medium_introduction(medium, &preview_file, research)?,
                &format!("Wrote the {medium} introduction."),
            )
            .await?;
        section.set_fragment(snippet);

        let snippet = self
            .fragment(
                prompts::pricing(medium, product, price)?,
                &format!("Wrote pricing for {medium}."),
            )
            .await?;
        section
            .child(3, format!("Pricing for {medium}"))
            .set_fragment(snippet);

        let snippet = self
            .fragment(
                prompts::campaign(medium, campaign)?,
                &format!("Wrote the marketing campaign for {medium}."),
            )
            .await?;
        section
            .child(3, format!("Marketing campaign for {medium}"))
            .set_fragment(snippet);

        let channels = ranked(&branch.socials);
        let names: Vec<&str> = channels.iter().map(|c| c.channel_name.as_str()).collect();
        let snippet = self
            .fragment(
                prompts::social_introduction(medium, &names),
                &format!("Wrote the social media overview for {medium}."),
            )
            .await?;
        let social = section.child(3, format!("Social media content strategy for {medium}"));
        social.set_fragment(snippet);

        let writes = channels.into_iter().map(|strategy| {
            let node = social.child(
                4,
                format!("{} content strategy for medium {}", strategy.channel_name, medium),
            );
            async move {
                let snippet = self
                    .fragment(
                        prompts::channel(medium, strategy)?,
                        &format!("Wrote the {} strategy for {medium}.", strategy.channel_name),
                    )
                    .await?;
                node.set_fragment(snippet);
                Ok::<(), Error>(())
            }
        });
        join_all(writes).await.into_iter().collect::<Result<Vec<()>>>()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ProgressUpdated;
    use crate::llm::{DataContent, RetryPolicy};
    use crate::models::{
        AnalysisOutput, CritiqueResponse, MarketingCampaignResponse, MediumPreview, Photograph,
        PriceResponse, ProductResearchResponse, ResearchResponse,
    };
    use crate::storage::FsReportStore;
    use crate::testing::marketing_script;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    fn photo() -> Photograph {
        Photograph {
            id: "dunes".to_string(),
            title: "Dunes".to_string(),
            description: "Sand at dusk".to_string(),
            categories: Vec::new(),
            tags: vec!["desert".to_string()],
            path: PathBuf::from("dunes.jpg"),
            content_type: "image/jpeg".to_string(),
        }
    }

    fn channel(medium: &str, name: &str, rank: i32) -> AnalysisOutput {
        AnalysisOutput::SocialChannel(SocialMediaChannelResponse {
            medium: medium.to_string(),
            channel_name: name.to_string(),
            rank,
            ..Default::default()
        })
    }

    fn analysed_report(mediums: &[&str], skip_price_for: Option<&str>) -> Arc<MarketReport> {
        let report = Arc::new(MarketReport::new(photo(), 1, mediums.len()));
        report.apply(AnalysisOutput::Critique(CritiqueResponse::default()));
        for &medium in mediums {
            let m = medium.to_string();
            report.apply(AnalysisOutput::MediumPreview(MediumPreview {
                medium: m.clone(),
                preview: DataContent::new(vec![0xFF, 0xD8, 1], "image/jpeg"),
            }));
            report.apply(AnalysisOutput::Research(ResearchResponse {
                medium: m.clone(),
                ..Default::default()
            }));
            if skip_price_for != Some(medium) {
                report.apply(AnalysisOutput::Price(PriceResponse {
                    medium: m.clone(),
                    ..Default::default()
                }));
            }
            report.apply(AnalysisOutput::ProductResearch(ProductResearchResponse {
                medium: m.clone(),
                ..Default::default()
            }));
            report.apply(AnalysisOutput::Campaign(MarketingCampaignResponse {
                medium: m.clone(),
                ..Default::default()
            }));
            report.apply(channel(medium, "Pinterest", 4));
            report.apply(channel(medium, "Instagram", 9));
        }
        report.mark_analysis_done();
        report
    }

    fn store(dir: &TempDir) -> Arc<FsReportStore> {
        Arc::new(FsReportStore::new(
            dir.path(),
            RetryPolicy::new(2, Duration::from_millis(1)),
        ))
    }

    #[test]
    fn test_planned_fragments() {
        let report = analysed_report(&["Metal", "Canvas"], None);
        assert_eq!(planned_fragments(&report.branches()), 2 + 4 * 2 + 4);
    }

    #[tokio::test]
    async fn test_assembles_report() {
        let dir = TempDir::new().unwrap();
        let provider = Arc::new(marketing_script());
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        bus.subscribe(move |update: ProgressUpdated| {
            let sink = sink.clone();
            async move {
                sink.lock().unwrap().push(update.report.writing_percent);
                Ok(())
            }
        });
        let finished = Arc::new(Mutex::new(None));
        let finished_sink = finished.clone();
        bus.subscribe(move |done: ReportFinished| {
            let finished_sink = finished_sink.clone();
            async move {
                *finished_sink.lock().unwrap() = Some(done.output_path);
                Ok(())
            }
        });

        let assembler = ReportAssembler::new(provider.clone(), store(&dir), bus);
        let report = analysed_report(&["Metal", "Canvas"], None);
        let path = assembler.assemble(report.clone()).await.unwrap().unwrap();

        assert!(path.ends_with("Projects/dunes/Reports/00001/index.html"));
        assert!(report.is_done());
        assert_eq!(provider.requests_for("HtmlSnippet"), 2 + 4 * 2 + 4);

        let html = std::fs::read_to_string(&path).unwrap();
        assert!(html.ends_with("</body></html>"));
        let canvas = html.find(">Medium: Canvas</a>").unwrap();
        let metal = html.find(">Medium: Metal</a>").unwrap();
        assert!(canvas < metal);
        let instagram = html.find(">Instagram content strategy for medium Metal</a>").unwrap();
        let pinterest = html.find(">Pinterest content strategy for medium Metal</a>").unwrap();
        assert!(instagram < pinterest);

        let run_dir = path.parent().unwrap();
        assert!(run_dir.join("photo_Metal.jpg").is_file());
        assert!(run_dir.join("photo_Canvas.jpg").is_file());
        let css = std::fs::read_to_string(run_dir.join("index.css")).unwrap();
        assert!(css.contains(".generated"));

        // Let the subscribers drain.
        for _ in 0..100 {
            if finished.lock().unwrap().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(finished.lock().unwrap().as_deref(), Some(path.as_path()));
        let percents = seen.lock().unwrap().clone();
        assert!(percents.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(percents.last(), Some(&100));
    }

    #[tokio::test]
    async fn test_stylesheet_attached_after_first_fragment() {
        let dir = TempDir::new().unwrap();
        let with_css = Arc::new(AtomicUsize::new(0));
        let counter = with_css.clone();
        let provider = Arc::new(marketing_script().respond_with("HtmlSnippet", move |history| {
            if history[0].find_named("index.css").is_some() {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            r#"{"html": "<p>x</p>", "new_css": "p { margin: 0; }", "commentary": ""}"#.to_string()
        }));
        let assembler = ReportAssembler::new(provider, store(&dir), EventBus::new());
        assembler
            .assemble(analysed_report(&["Metal"], None))
            .await
            .unwrap();
        // Every request but the introduction carries the stylesheet.
        assert_eq!(with_css.load(Ordering::SeqCst), 2 + 4 + 2 - 1);
    }

    #[tokio::test]
    async fn test_runs_once() {
        let dir = TempDir::new().unwrap();
        let provider = Arc::new(marketing_script());
        let assembler = ReportAssembler::new(provider.clone(), store(&dir), EventBus::new());

        let pending = Arc::new(MarketReport::new(photo(), 1, 1));
        assert_eq!(assembler.assemble(pending).await.unwrap(), None);

        let report = analysed_report(&["Metal"], None);
        let (a, b) = tokio::join!(
            assembler.assemble(report.clone()),
            assembler.assemble(report.clone())
        );
        let written = [a.unwrap(), b.unwrap()].into_iter().flatten().count();
        assert_eq!(written, 1);
        assert_eq!(provider.requests_for("HtmlSnippet"), 2 + 4 + 2);
    }

    #[tokio::test]
    async fn test_missing_branch_data_fails_after_other_branches() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let assembler = ReportAssembler::new(Arc::new(marketing_script()), store.clone(), EventBus::new());
        let report = analysed_report(&["Metal", "Canvas"], Some("Metal"));

        let err = assembler.assemble(report.clone()).await.unwrap_err();
        assert!(matches!(err, Error::MissingData(_)));
        assert!(!report.is_done());

        let run_dir = dir.path().join("Projects/dunes/Reports/00001");
        assert!(run_dir.join("photo_Canvas.jpg").is_file());
        assert!(!run_dir.join("index.html").exists());
    }
}
