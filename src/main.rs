use std::io::Read;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::{debug, info};

use pagelift::config::{self, Settings};
use pagelift::dom::Document;
use pagelift::early::{self, EarlyStats};
use pagelift::geometry::Viewport;
use pagelift::images::{self, ImageDescriptor, ImageVerdict};
use pagelift::pipeline::{PassContext, PassReport};
use pagelift::serialize;
use pagelift::session::Session;
use pagelift::worker::ClassifierWorker;

#[derive(Parser)]
#[command(name = "pagelift")]
#[command(about = "Heuristic page optimizer: lazy images, deferred scripts, resource hints")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Html,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Optimize an HTML file (or stdin) and print the result
    Optimize {
        /// HTML file path, or '-' for stdin
        input: String,

        /// Page URL used to resolve relative references
        #[arg(short, long)]
        url: Option<String>,

        /// Settings file (defaults to ~/.pagelift/settings.json)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Viewport size as WIDTHxHEIGHT
        #[arg(long, default_value = "1280x800")]
        viewport: String,

        /// Vertical scroll offset of the viewport
        #[arg(long, default_value_t = 0.0)]
        scroll_y: f32,

        /// Output format: the rewritten HTML or the pass reports
        #[arg(short, long, value_enum, default_value = "html")]
        format: Format,

        /// Classify images on the background worker
        #[arg(short, long)]
        worker: bool,

        /// Skip the early stylesheet and preload downgrade
        #[arg(long)]
        no_early: bool,
    },

    /// Print the image verdicts for an HTML file (or stdin) as JSON
    Classify {
        /// HTML file path, or '-' for stdin
        input: String,

        /// Page URL used to resolve relative references
        #[arg(short, long)]
        url: Option<String>,

        /// Settings file (defaults to ~/.pagelift/settings.json)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Print the effective settings as JSON
    Settings {
        /// Settings file (defaults to ~/.pagelift/settings.json)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Optimize {
            input,
            url,
            config,
            viewport,
            scroll_y,
            format,
            worker,
            no_early,
        } => {
            info!(input = %input, worker, "optimize command");
            let viewport = Viewport::parse_size(&viewport)
                .ok_or_else(|| anyhow!("invalid viewport `{viewport}`, expected WIDTHxHEIGHT"))?
                .scrolled_to(scroll_y);
            let settings = load_settings(config)?;
            let html = read_input(&input)?;
            let doc = Document::parse(&html, url.as_deref());
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(run_optimize(doc, settings, viewport, worker, !no_early, format))
        }
        Commands::Classify { input, url, config } => {
            info!(input = %input, "classify command");
            let settings = load_settings(config)?;
            let html = read_input(&input)?;
            let doc = Document::parse(&html, url.as_deref());
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(run_classify(&doc, &settings))
        }
        Commands::Settings { config } => {
            let settings = load_settings(config)?;
            println!("{}", serde_json::to_string_pretty(&settings)?);
            Ok(())
        }
    }
}

fn load_settings(path: Option<PathBuf>) -> Result<Settings> {
    let path = path.unwrap_or_else(config::settings_path);
    Settings::load(&path)
}

fn read_input(input: &str) -> Result<String> {
    if input == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        Ok(buf)
    } else {
        std::fs::read_to_string(input).with_context(|| format!("failed to read {input}"))
    }
}

#[derive(Serialize)]
struct OptimizeOutput {
    early: Option<EarlyStats>,
    passes: Vec<PassReport>,
}

async fn run_optimize(
    mut doc: Document,
    settings: Settings,
    viewport: Viewport,
    use_worker: bool,
    run_early: bool,
    format: Format,
) -> Result<()> {
    let early = if run_early {
        Some(early::apply(&mut doc, &settings.config)?)
    } else {
        None
    };

    let worker = use_worker.then(|| {
        ClassifierWorker::spawn(
            settings.heuristics.responsive_sizes.clone(),
            settings.worker_chunk_size,
        )
    });

    let mut session = Session::new(doc, settings, viewport)?;
    session.enable(0);
    let mut passes = Vec::new();
    if let Some(worker) = &worker {
        passes.extend(session.run_pass_with_worker(0, worker).await);
    }
    passes.extend(session.settle(0));
    info!(
        passes = passes.len(),
        failed = passes.iter().map(|p| p.failed_rules.len()).sum::<usize>(),
        "optimization settled"
    );
    if let Some(worker) = worker {
        worker.shutdown().await?;
    }

    let doc = session.into_document();
    let output = match format {
        Format::Html => serialize::to_html(&doc),
        Format::Json => serde_json::to_string_pretty(&OptimizeOutput { early, passes })?,
    };
    println!("{output}");
    Ok(())
}

#[derive(Serialize)]
struct Classified {
    descriptor: ImageDescriptor,
    verdict: ImageVerdict,
}

async fn run_classify(doc: &Document, settings: &Settings) -> Result<()> {
    let heuristics = settings.heuristics.compile()?;
    let ctx = PassContext::new(settings, &heuristics, Viewport::default());
    let descriptors = images::collect(doc, &ctx);
    debug!(images = descriptors.len(), "descriptors collected");

    let worker = ClassifierWorker::spawn(
        settings.heuristics.responsive_sizes.clone(),
        settings.worker_chunk_size,
    );
    let plans = worker.classify(descriptors.clone()).await?;
    worker.shutdown().await?;

    let out: Vec<Classified> = descriptors
        .into_iter()
        .zip(plans)
        .map(|(descriptor, plan)| Classified {
            descriptor,
            verdict: plan.verdict,
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}
