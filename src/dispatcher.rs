//! Reacts to workflow requests on the bus.
//!
//! A `WorkflowRequested<String>` named [`MARKETING_WORKFLOW`] starts the
//! analysis of that photo id. When analysis succeeds the dispatcher publishes
//! a `WorkflowRequested<Arc<MarketReport>>` named [`REPORT_ASSEMBLY`], which
//! it also handles by running the [`ReportAssembler`].

use crate::analysis::{build_marketing_graph, initial_message, MediumSpec};
use crate::bus::{EventBus, Subscription};
use crate::catalog::PhotoCatalog;
use crate::error::{Error, Result};
use crate::events::{
    JobEnded, JobStarted, ProgressUpdated, WorkflowOutcome, WorkflowRequested, MARKETING_WORKFLOW,
    REPORT_ASSEMBLY,
};
use crate::graph::RunEvent;
use crate::llm::{retry_transient, ModelProvider, RetryPolicy};
use crate::report::{MarketReport, ReportAssembler};
use crate::storage::{ReportStore, PHOTO_FILE};
use futures::StreamExt;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, info, warn};

/// Ids of the jobs currently being analysed.
#[derive(Debug, Clone, Default)]
pub struct RunningJobs {
    ids: Arc<Mutex<HashSet<String>>>,
}

impl RunningJobs {
    pub fn new() -> Self {
        Self::default()
    }

    fn ids(&self) -> MutexGuard<'_, HashSet<String>> {
        self.ids.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark `id` as running unless it already is. The job ends when the
    /// returned guard is dropped.
    pub fn try_start(&self, id: &str) -> Option<JobGuard> {
        if self.ids().insert(id.to_string()) {
            Some(JobGuard {
                jobs: self.clone(),
                id: id.to_string(),
            })
        } else {
            None
        }
    }

    /// Returns whether `id` was running.
    pub fn end(&self, id: &str) -> bool {
        self.ids().remove(id)
    }

    pub fn is_running(&self, id: &str) -> bool {
        self.ids().contains(id)
    }
}

/// Holds a job in [`RunningJobs`] until dropped.
#[derive(Debug)]
pub struct JobGuard {
    jobs: RunningJobs,
    id: String,
}

impl JobGuard {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        self.jobs.end(&self.id);
        debug!("Job {} released", self.id);
    }
}

struct DispatcherInner {
    bus: EventBus,
    provider: Arc<dyn ModelProvider>,
    store: Arc<dyn ReportStore>,
    catalog: Arc<dyn PhotoCatalog>,
    mediums: Vec<MediumSpec>,
    retry: RetryPolicy,
    running: RunningJobs,
    assembler: ReportAssembler,
}

#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

/// Subscriptions of a started dispatcher.
pub struct DispatcherHandle {
    workflows: Subscription<WorkflowRequested<String>>,
    assemblies: Subscription<WorkflowRequested<Arc<MarketReport>>>,
}

impl DispatcherHandle {
    /// Stop reacting to new requests. Runs already spawned continue.
    pub fn shutdown(&self) {
        self.workflows.unsubscribe();
        self.assemblies.unsubscribe();
    }
}

impl Dispatcher {
    pub fn new(
        bus: EventBus,
        provider: Arc<dyn ModelProvider>,
        store: Arc<dyn ReportStore>,
        catalog: Arc<dyn PhotoCatalog>,
        mediums: Vec<MediumSpec>,
        retry: RetryPolicy,
    ) -> Self {
        let assembler = ReportAssembler::new(provider.clone(), store.clone(), bus.clone());
        Self {
            inner: Arc::new(DispatcherInner {
                bus,
                provider,
                store,
                catalog,
                mediums,
                retry,
                running: RunningJobs::new(),
                assembler,
            }),
        }
    }

    pub fn running(&self) -> &RunningJobs {
        &self.inner.running
    }

    /// Subscribe to workflow requests.
    pub fn start(&self) -> DispatcherHandle {
        let dispatcher = self.clone();
        let workflows = self.inner.bus.subscribe(move |request: WorkflowRequested<String>| {
            let dispatcher = dispatcher.clone();
            async move {
                dispatcher.on_analysis_requested(request);
                Ok(())
            }
        });

        let dispatcher = self.clone();
        let assemblies =
            self.inner
                .bus
                .subscribe(move |request: WorkflowRequested<Arc<MarketReport>>| {
                    let dispatcher = dispatcher.clone();
                    async move {
                        dispatcher.on_assembly_requested(request);
                        Ok(())
                    }
                });

        info!("Dispatcher listening for workflow requests");
        DispatcherHandle {
            workflows,
            assemblies,
        }
    }

    fn on_analysis_requested(&self, request: WorkflowRequested<String>) {
        if request.name != MARKETING_WORKFLOW {
            debug!("Ignoring workflow request {}", request.name);
            return;
        }
        let job_id = request.payload;
        let Some(guard) = self.inner.running.try_start(&job_id) else {
            warn!("Analysis of {} is already running, request skipped", job_id);
            return;
        };
        let dispatcher = self.clone();
        tokio::spawn(async move {
            // Errors are logged and published by `guarded_analysis`.
            let _ = dispatcher.guarded_analysis(guard).await;
        });
    }

    fn on_assembly_requested(&self, request: WorkflowRequested<Arc<MarketReport>>) {
        if request.name != REPORT_ASSEMBLY {
            debug!("Ignoring report request {}", request.name);
            return;
        }
        let report = request.payload;
        if !report.is_analysis_done() || report.assembly_started() {
            debug!("Report for {} is not ready for assembly", report.job_id());
            return;
        }
        let assembler = self.inner.assembler.clone();
        let bus = self.inner.bus.clone();
        tokio::spawn(async move {
            if let Err(e) = assembler.assemble(report.clone()).await {
                error!("Report assembly for {} failed: {}", report.job_id(), e);
                report.set_status(format!("Report writing failed: {e}"));
                bus.publish(JobEnded {
                    job_id: report.job_id().to_string(),
                    result: WorkflowOutcome::Failed {
                        reason: format!("report writing failed: {e}"),
                    },
                });
            }
        });
    }

    /// Analyse `job_id` unless it is already running.
    ///
    /// Returns `Ok(None)` for a duplicate request.
    pub async fn run_analysis(&self, job_id: &str) -> Result<Option<Arc<MarketReport>>> {
        match self.inner.running.try_start(job_id) {
            Some(guard) => self.guarded_analysis(guard).await.map(Some),
            None => {
                warn!("Analysis of {} is already running, request skipped", job_id);
                Ok(None)
            }
        }
    }

    /// Write the report for an analysed job.
    pub async fn assemble(&self, report: Arc<MarketReport>) -> Result<Option<PathBuf>> {
        self.inner.assembler.assemble(report).await
    }

    async fn guarded_analysis(&self, guard: JobGuard) -> Result<Arc<MarketReport>> {
        let job_id = guard.id().to_string();
        let bus = &self.inner.bus;
        match self.analyse(&job_id).await {
            Ok(report) => {
                bus.publish(JobEnded {
                    job_id: job_id.clone(),
                    result: WorkflowOutcome::Completed,
                });
                bus.publish(WorkflowRequested::new(REPORT_ASSEMBLY, report.clone()));
                Ok(report)
            }
            Err(e) => {
                error!("Analysis of {} failed: {}", job_id, e);
                bus.publish(JobEnded {
                    job_id,
                    result: WorkflowOutcome::Failed {
                        reason: e.to_string(),
                    },
                });
                Err(e)
            }
        }
    }

    fn publish_progress(&self, report: &MarketReport) {
        self.inner.bus.publish(ProgressUpdated {
            job_id: report.job_id().to_string(),
            report: report.snapshot(),
        });
    }

    async fn analyse(&self, job_id: &str) -> Result<Arc<MarketReport>> {
        let inner = &self.inner;
        let photo = inner
            .catalog
            .photo(job_id)
            .await
            .ok_or_else(|| Error::PhotoNotFound(job_id.to_string()))?;
        info!("Starting analysis of {}", photo);

        let image = retry_transient(inner.retry, &format!("read {}", photo.path.display()), || {
            tokio::fs::read(&photo.path)
        })
        .await?;
        let run_number = inner.store.next_run_number(job_id).await?;
        inner.store.write_asset(job_id, run_number, PHOTO_FILE, &image).await?;

        let report = Arc::new(MarketReport::new(photo.clone(), run_number, inner.mediums.len()));
        report.set_status("Building the analysis workflow...");
        inner.bus.publish(JobStarted::<MarketReport>::new(job_id));
        self.publish_progress(&report);

        let graph = build_marketing_graph(inner.provider.clone(), &inner.mediums)?;
        report.set_workflow_diagram(graph.describe().to_mermaid());

        let mut run = graph.run(initial_message(&photo, image)?);
        while let Some(event) = run.next().await {
            match event {
                RunEvent::Output { node, value } => {
                    debug!("{} produced {}", node, value.kind());
                    report.apply(value);
                }
                RunEvent::NodeFailed(failure) => {
                    report.set_status(format!("{} failed", failure.node));
                }
            }
            self.publish_progress(&report);
        }

        let summary = run.finish().await?;
        if !summary.is_success() {
            let mut reasons: Vec<String> = summary.failures.iter().map(ToString::to_string).collect();
            reasons.extend(
                summary
                    .incomplete_joins
                    .iter()
                    .map(|join| format!("{join} never joined")),
            );
            if summary.cancelled {
                reasons.push("run cancelled".to_string());
            }
            return Err(Error::Graph(format!(
                "analysis of {} did not complete: {}",
                job_id,
                reasons.join("; ")
            )));
        }

        report.mark_analysis_done();
        self.publish_progress(&report);
        info!(
            "Analysis of {} finished ({} node runs)",
            job_id, summary.invocations
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::InMemoryCatalog;
    use crate::events::ReportFinished;
    use crate::models::Photograph;
    use crate::storage::FsReportStore;
    use crate::testing::marketing_script;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    struct Fixture {
        _dir: TempDir,
        bus: EventBus,
        store: Arc<FsReportStore>,
        dispatcher: Dispatcher,
    }

    fn fixture(provider: Arc<dyn ModelProvider>) -> Fixture {
        let dir = TempDir::new().unwrap();
        let photo_path = dir.path().join("dunes.jpg");
        std::fs::write(&photo_path, [0xFF, 0xD8, 0xFF, 0xE0]).unwrap();

        let catalog = Arc::new(InMemoryCatalog::new());
        catalog.insert(Photograph {
            id: "dunes".to_string(),
            title: "Dunes".to_string(),
            description: "Sand at dusk".to_string(),
            categories: Vec::new(),
            tags: vec!["desert".to_string()],
            path: photo_path,
            content_type: "image/jpeg".to_string(),
        });

        let bus = EventBus::new();
        let retry = RetryPolicy::new(2, Duration::from_millis(1));
        let store = Arc::new(FsReportStore::new(dir.path().join("data"), retry));
        let dispatcher = Dispatcher::new(
            bus.clone(),
            provider,
            store.clone(),
            catalog,
            vec![MediumSpec::new("Metal", "on metal")],
            retry,
        );
        Fixture {
            _dir: dir,
            bus,
            store,
            dispatcher,
        }
    }

    fn collect<T: Clone + Send + Sync + 'static>(bus: &EventBus) -> mpsc::UnboundedReceiver<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        bus.subscribe(move |message: T| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(message);
                Ok(())
            }
        });
        rx
    }

    #[test]
    fn test_running_jobs_guard() {
        let jobs = RunningJobs::new();
        let guard = jobs.try_start("dunes").unwrap();
        assert!(jobs.try_start("dunes").is_none());
        assert!(jobs.try_start("lake").is_some());
        assert!(jobs.is_running("dunes"));

        drop(guard);
        assert!(!jobs.is_running("dunes"));
        let _again = jobs.try_start("dunes").unwrap();
        assert!(jobs.end("dunes"));
        assert!(!jobs.end("dunes"));
    }

    #[tokio::test]
    async fn test_concurrent_starts_run_once() {
        let provider = Arc::new(marketing_script().with_delay(Duration::from_millis(5)));
        let fx = fixture(provider);
        let (a, b) = tokio::join!(
            fx.dispatcher.run_analysis("dunes"),
            fx.dispatcher.run_analysis("dunes")
        );
        let runs = [a.unwrap(), b.unwrap()].into_iter().flatten().count();
        assert_eq!(runs, 1);
        assert_eq!(fx.store.list_run_numbers("dunes").await.unwrap().len(), 1);
        assert!(!fx.dispatcher.running().is_running("dunes"));
    }

    #[tokio::test]
    async fn test_analysis_fills_report() {
        let fx = fixture(Arc::new(marketing_script()));
        let mut ended = collect::<JobEnded<WorkflowOutcome>>(&fx.bus);
        let mut assembly = collect::<WorkflowRequested<Arc<MarketReport>>>(&fx.bus);

        let report = fx.dispatcher.run_analysis("dunes").await.unwrap().unwrap();
        assert!(report.is_analysis_done());
        assert_eq!(report.percent(), 100);
        assert!(report.workflow_diagram().starts_with("flowchart TD"));
        assert_eq!(report.branches()[0].socials.len(), 2);

        let (photo, media_type) = fx.store.read_asset("dunes", 1, "photo.jpg").await.unwrap();
        assert_eq!(photo, [0xFF, 0xD8, 0xFF, 0xE0]);
        assert_eq!(media_type, "image/jpeg");

        let ended = timeout(Duration::from_secs(5), ended.recv()).await.unwrap().unwrap();
        assert_eq!(ended.result, WorkflowOutcome::Completed);
        let request = timeout(Duration::from_secs(5), assembly.recv()).await.unwrap().unwrap();
        assert_eq!(request.name, REPORT_ASSEMBLY);
    }

    #[tokio::test]
    async fn test_unknown_photo_fails_job() {
        let fx = fixture(Arc::new(marketing_script()));
        let mut ended = collect::<JobEnded<WorkflowOutcome>>(&fx.bus);

        let err = fx.dispatcher.run_analysis("missing").await.unwrap_err();
        assert!(matches!(err, Error::PhotoNotFound(_)));
        let ended = timeout(Duration::from_secs(5), ended.recv()).await.unwrap().unwrap();
        assert!(!ended.result.is_success());
        assert!(!fx.dispatcher.running().is_running("missing"));
    }

    #[tokio::test]
    async fn test_node_failure_skips_assembly() {
        // A price reply missing required fields fails the price node.
        let provider = Arc::new(marketing_script().respond_with("PriceResponse", |_| "{}".to_string()));
        let fx = fixture(provider);
        let mut assembly = collect::<WorkflowRequested<Arc<MarketReport>>>(&fx.bus);

        let err = fx.dispatcher.run_analysis("dunes").await.unwrap_err();
        assert!(matches!(err, Error::Graph(_)));
        assert!(timeout(Duration::from_millis(100), assembly.recv()).await.is_err());
    }

    #[tokio::test]
    async fn test_bus_driven_run_writes_report() {
        let provider = Arc::new(marketing_script().with_delay(Duration::from_millis(2)));
        let fx = fixture(provider);
        let mut finished = collect::<ReportFinished>(&fx.bus);
        let mut started = collect::<JobStarted<MarketReport>>(&fx.bus);
        let handle = fx.dispatcher.start();

        fx.bus
            .publish(WorkflowRequested::new(MARKETING_WORKFLOW, "dunes".to_string()));
        fx.bus
            .publish(WorkflowRequested::new(MARKETING_WORKFLOW, "dunes".to_string()));

        let done = timeout(Duration::from_secs(10), finished.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(done.job_id, "dunes");
        assert!(done.report.done);
        assert!(done.output_path.is_file());
        let html = std::fs::read_to_string(&done.output_path).unwrap();
        assert!(html.contains("<section class='toc'>"));

        assert_eq!(started.recv().await.unwrap().job_id, "dunes");
        assert!(started.try_recv().is_err());
        assert_eq!(fx.store.list_run_numbers("dunes").await.unwrap().len(), 1);
        handle.shutdown();
    }
}
