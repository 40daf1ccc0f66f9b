use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pipecore::{MemoryLockStore, Params, PipelineEvent, StageEvent};
use piperuntime::{
    ConfigParser, FileConfigParser, LocalCluster, PluginRegistry, RawGraph, Scheduler,
    SchedulerConfig,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pipe")]
#[command(about = "Pipeline Engine CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run tasks from a pipeline file or directory
    Run {
        /// Pipeline definition file, or a directory of them
        #[arg(short, long)]
        config: PathBuf,

        /// Task to run; every task when omitted
        #[arg(short, long)]
        task: Option<String>,

        /// Run parameters as a JSON object
        #[arg(short, long)]
        params: Option<String>,

        /// Number of in-process workers
        #[arg(short, long, default_value_t = 1)]
        workers: u32,

        /// Scheduler settings (JSON)
        #[arg(short, long)]
        settings: Option<PathBuf>,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Validate pipeline definitions by building their task graph
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },

    /// List available plugin types
    Plugins,

    /// Create an example pipeline
    Init {
        /// Output file path
        #[arg(short, long, default_value = "pipeline.yaml")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            task,
            params,
            workers,
            settings,
            verbose,
        } => {
            init_logging(if verbose { "debug" } else { "info" });
            run_pipeline(&config, task.as_deref(), params, workers, settings).await?;
        }

        Commands::Validate { config } => {
            init_logging("warn");
            validate_pipeline(&config).await?;
        }

        Commands::Plugins => {
            list_plugins();
        }

        Commands::Init { output } => {
            create_example_pipeline(&output)?;
        }
    }

    Ok(())
}

fn init_logging(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn registry() -> Arc<PluginRegistry> {
    let mut registry = PluginRegistry::new();
    pipeplugins::register_all(&mut registry);
    Arc::new(registry)
}

fn load_definitions(path: &Path) -> Result<RawGraph> {
    let parser = FileConfigParser::new(path)?;
    let raw = parser
        .parse()
        .with_context(|| format!("reading {}", path.display()))?;
    Ok(raw)
}

fn load_settings(path: Option<PathBuf>) -> Result<SchedulerConfig> {
    match path {
        Some(path) => {
            let text = std::fs::read_to_string(&path)?;
            serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
        }
        None => Ok(SchedulerConfig::default()),
    }
}

async fn run_pipeline(
    path: &Path,
    task: Option<&str>,
    params: Option<String>,
    workers: u32,
    settings: Option<PathBuf>,
) -> Result<()> {
    println!("🚀 Loading pipeline from: {}", path.display());

    let raw = load_definitions(path)?;
    let settings = load_settings(settings)?;
    let params: Params = match params {
        Some(text) => match serde_json::from_str(&text)? {
            serde_json::Value::Object(map) => map,
            _ => return Err(anyhow::anyhow!("Params must be a JSON object")),
        },
        None => Params::new(),
    };

    let registry = registry();
    let store = Arc::new(MemoryLockStore::new());
    let shutdown = CancellationToken::new();
    let mut schedulers = Vec::new();
    let mut listeners = Vec::new();

    for (channel, inbox) in LocalCluster::create(workers) {
        let scheduler = Scheduler::builder(Arc::clone(&registry))
            .config(settings.clone())
            .channel(Arc::new(channel))
            .lock_store(store.clone())
            .build();
        scheduler.build(&raw).await?;

        listeners.push(tokio::spawn(print_events(scheduler.clone())));
        tokio::spawn(inbox.serve(scheduler.clone(), shutdown.clone()));
        schedulers.push(scheduler);
    }

    tracing::debug!("Cluster of {} workers ready", schedulers.len());
    println!("📋 Tasks: {}", raw.keys().cloned().collect::<Vec<_>>().join(", "));
    println!("   Workers: {}", schedulers.len());
    println!();

    let entry = schedulers
        .first()
        .ok_or_else(|| anyhow::anyhow!("no workers"))?;
    let handle = entry.run(task, params).await?;
    handle.join().await;

    // Give fire-and-forget sends to other workers time to land
    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    shutdown.cancel();
    for listener in listeners {
        listener.abort();
    }

    println!();
    println!("✨ Done");
    Ok(())
}

async fn print_events(scheduler: Scheduler) {
    let worker = scheduler.worker_id();
    let mut events = scheduler.subscribe_events();
    while let Ok(event) = events.recv().await {
        match event {
            PipelineEvent::TaskStarted { task, stage, correlation_id, .. } => {
                println!("▶️  [w{}] {} started at {} ({})", worker, task, stage, correlation_id);
            }
            PipelineEvent::Dispatched { task, stage, from, to, .. } => {
                println!("  ↪️  [{}] {} sent from worker {} to {}", task, stage, from, to);
            }
            PipelineEvent::StageFailed { task, stage, error, .. } => {
                println!("  ❌ [w{}] {}.{} failed: {}", worker, task, stage, error);
            }
            PipelineEvent::TaskFinished { task, .. } => {
                println!("✅ [w{}] {} finished", worker, task);
            }
            PipelineEvent::StageEvent { task, stage, event, .. } => match event {
                StageEvent::Info { message } => {
                    println!("     ℹ️  [{}.{}] {}", task, stage, message);
                }
                StageEvent::Warning { message } => {
                    println!("     ⚠️  [{}.{}] {}", task, stage, message);
                }
                StageEvent::Data { .. } => {}
            },
        }
    }
}

async fn validate_pipeline(path: &Path) -> Result<()> {
    println!("🔍 Validating pipeline: {}", path.display());

    let raw = load_definitions(path)?;
    let scheduler = Scheduler::new(registry());
    scheduler.build(&raw).await?;

    println!("✅ Pipeline is valid:");
    if let Some(graph) = scheduler.graph() {
        for name in graph.task_names() {
            if let Some(task) = graph.task(name) {
                let starts: Vec<&str> = task.start_stages().map(|s| s.key()).collect();
                println!(
                    "   {}: {} stages, start: {}",
                    name,
                    task.len(),
                    starts.join(", ")
                );
            }
        }
    }
    Ok(())
}

fn list_plugins() {
    println!("📦 Available Plugin Types:");
    println!();

    let registry = registry();
    for plugin_type in registry.list_plugin_types() {
        if let Some(metadata) = registry.get_metadata(&plugin_type) {
            println!("  • {} ({})", plugin_type, metadata.category);
            println!("    {}", metadata.description);
        } else {
            println!("  • {}", plugin_type);
        }
    }
}

const EXAMPLE_PIPELINE: &str = r#"source:
  type: source.values
  start: true
  each: true
  values:
    - { id: 1, url: "https://api.github.com/zen" }
    - { id: 1, url: "https://api.github.com/zen" }
    - { id: 2, url: "https://api.github.com/octocat" }
  output: dedupe
dedupe:
  type: lock.dedupe
  field: id
  lockEx: 60
  output: fetch
fetch:
  type: http.request
  method: GET
  errHandler: log
  output: log
log:
  type: debug.log
  label: response
"#;

fn create_example_pipeline(output: &Path) -> Result<()> {
    std::fs::write(output, EXAMPLE_PIPELINE)?;

    println!("✨ Created example pipeline: {}", output.display());
    println!();
    println!("Run it with:");
    println!("  pipe run --config {}", output.display());

    Ok(())
}
