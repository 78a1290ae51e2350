//! ArtReport - marketing reports for fine art photographs
//!
//! A CLI that registers one photograph, runs the marketing workflow against
//! an Ollama server and writes the HTML report into the data folder.
//!
//! Exit codes:
//!   0 - Report written (or --print-graph / --init-config done)
//!   1 - Runtime error or failed workflow

mod cli;
mod config;

use anyhow::{bail, Context, Result};
use artreport::analysis::build_marketing_graph;
use artreport::bus::EventBus;
use artreport::catalog::InMemoryCatalog;
use artreport::dispatcher::Dispatcher;
use artreport::events::{
    JobEnded, ProgressUpdated, ReportFinished, WorkflowOutcome, WorkflowRequested,
    MARKETING_WORKFLOW,
};
use artreport::llm::{ModelProvider, OllamaProvider};
use artreport::models::Photograph;
use artreport::report::ReportSnapshot;
use artreport::storage::{media_type_for, FsReportStore};
use cli::Args;
use config::{Config, CONFIG_FILE};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    init_logging(&args);

    info!("ArtReport v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    match run(args).await {
        Ok(exit_code) => std::process::exit(exit_code),
        Err(e) => {
            error!("Run failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .artreport.toml.
fn handle_init_config() -> Result<()> {
    let path = std::path::Path::new(CONFIG_FILE);

    if path.exists() {
        eprintln!("⚠️  {} already exists. Remove it first or edit it manually.", CONFIG_FILE);
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content).with_context(|| format!("Failed to write {}", CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", CONFIG_FILE);
    println!("   Edit it to customize models, mediums and the data folder.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
fn init_logging(args: &Args) {
    let level = args.log_level();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded default config from {}", CONFIG_FILE);
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => {
            warn!("Failed to load config: {:#}", e);
            Ok(Config::default())
        }
    }
}

/// Catalog entry for the photo given on the command line.
fn photo_from_args(args: &Args) -> Result<Photograph> {
    let path: PathBuf = args.photo.clone().context("--photo is required")?;
    let id = args.photo_id().context("Cannot derive a photo id, pass --id")?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    Ok(Photograph {
        title: args.title.clone().unwrap_or_else(|| id.clone()),
        description: args.description.clone().unwrap_or_default(),
        categories: args.categories.clone().unwrap_or_default(),
        tags: args.tags.clone().unwrap_or_default(),
        content_type: media_type_for(&file_name).to_string(),
        path,
        id,
    })
}

/// What the host waits for.
enum HostEvent {
    Progress(ReportSnapshot),
    Ended(WorkflowOutcome),
    Finished(PathBuf),
}

/// Forward the events of `job_id` into one channel.
fn follow_job(bus: &EventBus, job_id: &str) -> mpsc::UnboundedReceiver<HostEvent> {
    let (tx, rx) = mpsc::unbounded_channel();

    let (job, sender) = (job_id.to_string(), tx.clone());
    bus.subscribe(move |update: ProgressUpdated| {
        let (job, sender) = (job.clone(), sender.clone());
        async move {
            if update.job_id == job {
                let _ = sender.send(HostEvent::Progress(update.report));
            }
            Ok(())
        }
    });

    let (job, sender) = (job_id.to_string(), tx.clone());
    bus.subscribe(move |ended: JobEnded<WorkflowOutcome>| {
        let (job, sender) = (job.clone(), sender.clone());
        async move {
            if ended.job_id == job {
                let _ = sender.send(HostEvent::Ended(ended.result));
            }
            Ok(())
        }
    });

    let job = job_id.to_string();
    bus.subscribe(move |finished: ReportFinished| {
        let (job, sender) = (job.clone(), tx.clone());
        async move {
            if finished.job_id == job {
                let _ = sender.send(HostEvent::Finished(finished.output_path));
            }
            Ok(())
        }
    });

    rx
}

fn progress_bar(quiet: bool) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(100);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] {prefix:>9} [{bar:40.cyan/blue}] {pos:>3}% {wide_msg}")
    {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb
}

/// Run the workflow for one photo. Returns the exit code.
async fn run(args: Args) -> Result<i32> {
    let start_time = Instant::now();

    let mut config = load_config(&args)?;
    config.merge_with_args(&args);
    let mediums = config.workflow.select(args.mediums.as_deref())?;
    if mediums.is_empty() {
        bail!("No mediums configured");
    }

    let provider: Arc<dyn ModelProvider> = Arc::new(OllamaProvider::new(config.model.to_ollama()));

    if args.print_graph {
        let graph = build_marketing_graph(provider, &mediums)?;
        println!("{}", graph.describe().to_mermaid());
        return Ok(0);
    }

    let photo = photo_from_args(&args)?;
    let job_id = photo.id.clone();

    println!("🖼️  Photograph: {}", photo);
    println!("   Mediums: {}", mediums.iter().map(|m| m.name.as_str()).collect::<Vec<_>>().join(", "));
    println!("   Ollama: {}", config.model.ollama_url);
    println!("   Data: {}", config.general.data_dir.display());

    let catalog = Arc::new(InMemoryCatalog::new());
    catalog.insert(photo);

    let retry = config.storage.retry_policy();
    let store = Arc::new(FsReportStore::new(config.general.data_dir.clone(), retry));
    let bus = EventBus::new();
    let dispatcher = Dispatcher::new(bus.clone(), provider, store, catalog, mediums, retry);
    let handle = dispatcher.start();

    let mut events = follow_job(&bus, &job_id);
    bus.publish(WorkflowRequested::new(MARKETING_WORKFLOW, job_id.clone()));

    let pb = progress_bar(args.quiet);
    pb.set_prefix("Analysis");

    let exit_code = loop {
        let Some(event) = events.recv().await else {
            pb.abandon();
            handle.shutdown();
            bail!("Event bus closed before the report finished");
        };
        match event {
            HostEvent::Progress(snapshot) => {
                if snapshot.analysis_done {
                    pb.set_prefix("Writing");
                    pb.set_position(u64::from(snapshot.writing_percent));
                } else {
                    pb.set_position(u64::from(snapshot.percent));
                }
                pb.set_message(snapshot.status);
            }
            HostEvent::Ended(WorkflowOutcome::Completed) => {
                info!("Analysis of {} completed, writing the report", job_id);
            }
            HostEvent::Ended(WorkflowOutcome::Failed { reason }) => {
                pb.abandon_with_message("failed");
                eprintln!("\n❌ Workflow failed: {}", reason);
                break 1;
            }
            HostEvent::Finished(path) => {
                pb.finish_with_message("done");
                println!(
                    "\n✅ Report written in {:.1}s: {}",
                    start_time.elapsed().as_secs_f64(),
                    path.display()
                );
                break 0;
            }
        }
    };

    handle.shutdown();
    Ok(exit_code)
}
