//! FactPrice CLI: run the filing/price pipeline or any single stage.
//!
//! Commands:
//! - `run`: combine, merge, partition and enrich, in order
//! - `combine` / `merge` / `partition` / `enrich`: one stage, reading the
//!   previous stage's artifact from the work directory
//! - `auth`: obtain or refresh the API token now (interactive on first use)
//! - `init-config`: write the default configuration file

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use factprice_core::provider::{AuthError, AuthorizationCodeProvider};
use factprice_runner::{
    build_price_api, build_session, build_symbol_source, combine_stage, enrich_stage,
    merge_stage, partition_stage, run_all, ArtifactPaths, CombineStageSummary, PipelineConfig,
    RunSummary,
};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "factprice",
    about = "FactPrice: regulatory filing facts joined with post-filing close prices"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every stage: combine, merge, partition, enrich.
    Run {
        /// Path to the TOML config. Defaults apply if the file is absent.
        #[arg(long, default_value = "factprice.toml")]
        config: PathBuf,
    },
    /// Combine every num.txt and sub.txt under the data root.
    Combine {
        #[arg(long, default_value = "factprice.toml")]
        config: PathBuf,
    },
    /// Resolve symbols and merge facts with submissions.
    Merge {
        #[arg(long, default_value = "factprice.toml")]
        config: PathBuf,
    },
    /// Split the merged file into one partition per symbol.
    Partition {
        #[arg(long, default_value = "factprice.toml")]
        config: PathBuf,
    },
    /// Price every partition and write Parquet output.
    Enrich {
        #[arg(long, default_value = "factprice.toml")]
        config: PathBuf,
    },
    /// Obtain or refresh the API access token.
    Auth {
        #[arg(long, default_value = "factprice.toml")]
        config: PathBuf,
    },
    /// Write the default configuration.
    InitConfig {
        #[arg(long, default_value = "factprice.toml")]
        config: PathBuf,

        /// Overwrite an existing file.
        #[arg(long, default_value_t = false)]
        force: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => run_pipeline(&config),
        Commands::Combine { config } => run_combine(&config),
        Commands::Merge { config } => run_merge(&config),
        Commands::Partition { config } => run_partition(&config),
        Commands::Enrich { config } => run_enrich(&config),
        Commands::Auth { config } => run_auth(&config),
        Commands::InitConfig { config, force } => run_init_config(&config, force),
    }
}

fn load_config(path: &Path) -> Result<PipelineConfig> {
    let config = PipelineConfig::load_or_default(path)
        .with_context(|| format!("load config {}", path.display()))?;
    if !path.exists() {
        info!(path = %path.display(), "config file not found, using defaults");
    }
    Ok(config)
}

fn run_pipeline(path: &Path) -> Result<()> {
    let config = load_config(path)?;
    let symbols = build_symbol_source(&config)?;
    let session = build_session(&config, Box::new(ConsolePrompt))?;
    let api = build_price_api(&config, session)?;

    let summary = run_all(&config, &symbols, &api)?;
    print_summary(&summary);
    Ok(())
}

fn run_combine(path: &Path) -> Result<()> {
    let config = load_config(path)?;
    let combine: CombineStageSummary = combine_stage(&config)?;
    print_summary(&RunSummary {
        combine: Some(combine),
        ..RunSummary::for_config(&config)
    });
    Ok(())
}

fn run_merge(path: &Path) -> Result<()> {
    let config = load_config(path)?;
    let symbols = build_symbol_source(&config)?;
    let merge = merge_stage(&config, &symbols)?;
    print_summary(&RunSummary {
        merge: Some(merge),
        ..RunSummary::for_config(&config)
    });
    Ok(())
}

fn run_partition(path: &Path) -> Result<()> {
    let config = load_config(path)?;
    let partition = partition_stage(&config)?;
    print_summary(&RunSummary {
        partition: Some(partition),
        ..RunSummary::for_config(&config)
    });
    Ok(())
}

fn run_enrich(path: &Path) -> Result<()> {
    let config = load_config(path)?;
    let session = build_session(&config, Box::new(ConsolePrompt))?;
    let api = build_price_api(&config, session)?;
    let enrich = enrich_stage(&config, &api)?;
    print_summary(&RunSummary {
        enrich: Some(enrich),
        ..RunSummary::for_config(&config)
    });
    Ok(())
}

fn run_auth(path: &Path) -> Result<()> {
    let config = load_config(path)?;
    let mut session = build_session(&config, Box::new(ConsolePrompt))?;
    session.acquire().context("acquire access token")?;

    let issued = session
        .credentials()
        .last_issued_at
        .map(|ts| ts.to_string())
        .unwrap_or_else(|| "unknown".into());
    println!("Token ready ({:?}), issued at {issued}", session.phase());
    println!("Credentials: {}", config.paths.credentials.display());
    Ok(())
}

fn run_init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (pass --force to overwrite)", path.display());
    }
    let text = PipelineConfig::default().to_toml()?;
    std::fs::write(path, text).with_context(|| format!("write {}", path.display()))?;
    println!("Wrote default config to {}", path.display());
    Ok(())
}

/// Shows the authorization URL and reads the redirect URL from stdin.
struct ConsolePrompt;

impl AuthorizationCodeProvider for ConsolePrompt {
    fn authorize(&self, authorization_url: &str) -> Result<String, AuthError> {
        println!();
        println!("Open this URL in a browser and log in:");
        println!("  {authorization_url}");
        print!("Paste the URL you were redirected to: ");
        let console = |e: io::Error| AuthError::Aborted(format!("console: {e}"));
        io::stdout().flush().map_err(console)?;

        let mut line = String::new();
        io::stdin().lock().read_line(&mut line).map_err(console)?;
        let line = line.trim();
        if line.is_empty() {
            return Err(AuthError::Aborted("no redirect URL entered".into()));
        }
        Ok(line.to_string())
    }
}

fn print_summary(summary: &RunSummary) {
    println!();
    println!("=== FactPrice ===");
    for line in summary.lines() {
        println!("{line}");
    }
    let ArtifactPaths { enriched, .. } = &summary.artifacts;
    if let Some(enrich) = &summary.enrich {
        if !enrich.written.is_empty() {
            println!();
            println!("{} Parquet file(s) in {}", enrich.written.len(), enriched.display());
        }
    }
}
