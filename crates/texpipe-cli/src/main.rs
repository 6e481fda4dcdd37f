use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use texpipe_build::{
    BuildRequest, BuildSession, DiagnosticSink, LogProgress, ParseErrorMessage, PreferenceStore,
    Project, Registry, Resource, Toolbox,
};
use texpipe_cache::FileCache;

/// Per-project preference overrides, read from the project root.
const PROJECT_PREFERENCES: &str = "texpipe.json";

#[derive(Parser)]
#[command(name = "texpipe")]
#[command(about = "Incremental LaTeX builds", long_about = None)]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a document, skipping stages whose inputs did not change
    Build {
        /// Path to the main .tex file
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Output format to produce
        #[arg(long, default_value = "pdf")]
        format: String,

        /// Builder id to use instead of the preferred one
        #[arg(long)]
        builder: Option<String>,

        /// Ignore the file cache and run every stage
        #[arg(long)]
        force: bool,

        /// Global preferences, a flat JSON object
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
    /// Print the chain of tools that would produce a format
    Sequence {
        format: String,

        #[arg(long)]
        builder: Option<String>,

        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
    /// List the runner and builder catalogues
    List,
    /// Delete the persisted file cache of a project
    CleanCache {
        #[arg(value_name = "DIR", default_value = ".")]
        dir: PathBuf,
    },
}

/// Prints diagnostics in the `file:line:column: severity: message` form
/// editors and terminals pick up.
struct PrintSink;

impl DiagnosticSink for PrintSink {
    fn clear(&self, _resource: &Path) {}

    fn report(&self, resource: &Path, d: ParseErrorMessage) {
        let file = d
            .file
            .clone()
            .unwrap_or_else(|| resource.display().to_string());
        eprintln!("{}:{}:{}: {}: {}", file, d.line, d.column, d.severity, d.message);
    }
}

fn load_preferences(config: Option<&Path>, project_root: &Path) -> anyhow::Result<PreferenceStore> {
    let mut prefs = PreferenceStore::new();
    if let Some(path) = config {
        prefs
            .load_global(path)
            .with_context(|| format!("reading {}", path.display()))?;
    }
    let project = project_root.join(PROJECT_PREFERENCES);
    prefs
        .load_project(&project)
        .with_context(|| format!("reading {}", project.display()))?;
    Ok(prefs)
}

fn toolbox(prefs: PreferenceStore) -> anyhow::Result<Toolbox> {
    let registry = Registry::standard().context("loading the tool catalogue")?;
    Ok(Toolbox::new(Arc::new(registry), Arc::new(prefs)).with_sink(Arc::new(PrintSink)))
}

async fn build(
    file: &Path,
    format: &str,
    builder: Option<String>,
    force: bool,
    config: Option<&Path>,
) -> anyhow::Result<()> {
    let resource =
        Resource::standalone(file).with_context(|| format!("opening {}", file.display()))?;
    let prefs = load_preferences(config, resource.project().root())?;
    let session = BuildSession::new(toolbox(prefs)?, resource.project())
        .with_progress(Arc::new(LogProgress::new()));

    let mut request = BuildRequest::new(resource, format).forced(force);
    if let Some(id) = builder {
        request = request.with_builder(id);
    }
    let job = session.spawn(request);
    let cancel = job.cancel_token();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping the build");
            cancel.cancel();
        }
    });

    let result = job.wait().await;
    interrupt.abort();
    let report = result?;

    for stage in &report.stages {
        info!("{}: {:?}", stage.runner, stage.status);
    }
    match &report.output {
        Some(output) => println!("{} ({})", output.display(), report.sequence),
        None => println!("done ({})", report.sequence),
    }
    Ok(())
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Build {
            file,
            format,
            builder,
            force,
            config,
        } => build(&file, &format, builder, force, config.as_deref()).await?,
        Commands::Sequence {
            format,
            builder,
            config,
        } => {
            let cwd = std::env::current_dir()?;
            let prefs = load_preferences(config.as_deref(), &cwd)?;
            let session = BuildSession::new(toolbox(prefs)?, &Project::new(cwd));
            println!("{}", session.sequence(&format, builder.as_deref())?);
        }
        Commands::List => {
            let registry = Registry::standard()?;
            println!("Runners:");
            for runner in registry.runners() {
                println!(
                    "  {:<18} {} -> {}  ({}, `{}`)",
                    runner.id,
                    runner.input_format,
                    runner.output_format,
                    runner.label,
                    runner.executable
                );
            }
            println!("Builders:");
            for builder in registry.builders() {
                println!(
                    "  {:<18} {} -> {}  ({}, runner `{}`)",
                    builder.id,
                    builder.input_format,
                    builder.output_format,
                    builder.label,
                    builder.runner
                );
            }
        }
        Commands::CleanCache { dir } => {
            if !dir.is_dir() {
                bail!("{} is not a directory", dir.display());
            }
            if FileCache::clear_store(&dir)? {
                println!("Removed the file cache of {}", dir.display());
            } else {
                println!("No file cache in {}", dir.display());
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("texpipe: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
