//! vdocs: versioned API documentation for Rust repositories.
//!
//! Checks out every version listed in the config, extracts the public API of
//! each revision and writes cross-linked markdown pages:
//!
//! `vdocs -c vdocs.toml -o site/`

mod analyzer;
mod writer;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use versioned_docs::{Settings, VersionedApi};

const DEFAULT_CONFIG: &str = "vdocs.toml";

#[derive(Parser)]
#[command(
    name = "vdocs",
    about = "Generate API documentation for several versions of a repository"
)]
struct Cli {
    /// Config file (TOML). Defaults to ./vdocs.toml when present.
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Output directory
    #[arg(short = 'o', long)]
    output: PathBuf,

    /// Persist analysis results across runs in this directory
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Maximum number of concurrent checkouts
    #[arg(long)]
    concurrency: Option<usize>,

    /// Fail if checkouts take longer than this many seconds
    #[arg(long)]
    deadline: Option<u64>,

    /// Debug logging (overridden by RUST_LOG)
    #[arg(short = 'v', long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let settings = load_settings(&cli)?;
    let index_file_name = settings.index_file_name.clone();
    let api = VersionedApi::new(settings, Arc::new(analyzer::RustAnalyzer))
        .context("failed to set up pipeline")?;
    // Checkout directories and VCS processes belong to the run future;
    // dropping it on interrupt removes and kills them.
    let output = tokio::select! {
        biased;
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for interrupt")?;
            warn!("interrupted, discarding checkouts");
            anyhow::bail!("interrupted");
        }
        output = api.run() => output.context("documentation build failed")?,
    };

    let pages = writer::SiteWriter::new(&cli.output, &index_file_name)
        .write(&output.documents, &output.links.snapshot())?;
    info!(pages, links = output.links.len(), output = %cli.output.display(), "done");
    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Read the config and apply command-line overrides.
fn load_settings(cli: &Cli) -> Result<Settings> {
    let mut settings = match &cli.config {
        Some(path) => Settings::load(path)
            .with_context(|| format!("failed to load config: {}", path.display()))?,
        None if Path::new(DEFAULT_CONFIG).is_file() => Settings::load(Path::new(DEFAULT_CONFIG))
            .with_context(|| format!("failed to load config: {}", DEFAULT_CONFIG))?,
        None => {
            warn!("no config file given and no {} found, using defaults", DEFAULT_CONFIG);
            Settings::default()
        }
    };

    let config_dir = cli
        .config
        .as_deref()
        .and_then(Path::parent)
        .unwrap_or(Path::new(""));
    if let Some(repo) = settings.repository_path.as_mut() {
        *repo = resolve_repository(config_dir, repo);
    }

    if let Some(dir) = &cli.cache_dir {
        settings.cache_dir = Some(dir.clone());
    }
    if let Some(n) = cli.concurrency {
        settings.checkout_concurrency = n;
    }
    if let Some(secs) = cli.deadline {
        settings.deadline_secs = Some(secs);
    }
    Ok(settings)
}

/// Local repository paths are relative to the config file; URLs and
/// `host:path` remotes are passed through.
fn resolve_repository(config_dir: &Path, repo: &str) -> String {
    let path = Path::new(repo);
    if repo.contains(':') || path.is_absolute() || config_dir.as_os_str().is_empty() {
        return repo.to_string();
    }
    config_dir.join(path).to_string_lossy().into_owned()
}
