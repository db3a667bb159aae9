//! Stage sequencing: combine → merge → partition → enrich.
//!
//! Each stage fully consumes its input artifact in `work_dir` and
//! materialises a complete output before the next stage starts. Stages can
//! be run one at a time (each re-reads the previous stage's artifact) or
//! all together through [`run_all`].
//!
//! External collaborators are passed in so tests can substitute them: the
//! symbol table source for the merge, the price API for enrichment.

use crate::config::PipelineConfig;
use crate::summary::{CombineStageSummary, RunSummary};
use anyhow::{Context, Result};
use factprice_core::data::{
    combine_sources, discover_files, merge_facts, partition_merged, ColumnSelection,
    HttpSymbolTable, MergeStats, PartitionStats, SubmissionTable, SymbolTableSource, TickerTable,
};
use factprice_core::enrich::{enrich_partitions, EnrichSummary};
use factprice_core::provider::{
    AuthorizationCodeProvider, CredentialStore, HttpTokenTransport, OAuthSession, PriceApi,
    PriceResolver, RateLimiter, SchwabPriceApi,
};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use tracing::info;

const FACT_FILE_NAME: &str = "num.txt";
const SUBMISSION_FILE_NAME: &str = "sub.txt";

/// Fold every `num.txt` and `sub.txt` under `data_root` into the combined files.
pub fn combine_stage(config: &PipelineConfig) -> Result<CombineStageSummary> {
    let root = &config.paths.data_root;
    info!(data_root = %root.display(), "stage: combine");

    let fact_files = discover_files(root, FACT_FILE_NAME)
        .with_context(|| format!("scan {} for {FACT_FILE_NAME}", root.display()))?;
    let submission_files = discover_files(root, SUBMISSION_FILE_NAME)
        .with_context(|| format!("scan {} for {SUBMISSION_FILE_NAME}", root.display()))?;

    let facts = combine_sources(&fact_files, &ColumnSelection::numeric_facts(), &config.facts_path())
        .context("combine numeric-fact sources")?;
    let submissions = combine_sources(
        &submission_files,
        &ColumnSelection::submissions(),
        &config.submissions_path(),
    )
    .context("combine submission sources")?;

    Ok(CombineStageSummary { facts, submissions })
}

/// Resolve symbols, then stream-merge the combined facts with submissions.
pub fn merge_stage(config: &PipelineConfig, symbols: &dyn SymbolTableSource) -> Result<MergeStats> {
    info!(batch_size = config.merge.batch_size, "stage: merge");

    let tickers = TickerTable::fetch(symbols).context("load symbol table")?;

    let submissions_path = config.submissions_path();
    let submissions = File::open(&submissions_path)
        .with_context(|| format!("open {}", submissions_path.display()))?;
    let table = SubmissionTable::load(BufReader::new(submissions), &tickers)
        .context("load submission table")?;

    let facts_path = config.facts_path();
    let facts = File::open(&facts_path).with_context(|| format!("open {}", facts_path.display()))?;

    let merged_path = config.merged_path();
    fs::create_dir_all(&config.paths.work_dir)
        .with_context(|| format!("create {}", config.paths.work_dir.display()))?;
    if merged_path.exists() {
        fs::remove_file(&merged_path)
            .with_context(|| format!("remove previous {}", merged_path.display()))?;
    }

    // Only a completed merge is published under the canonical name.
    let partial_path = merged_path.with_extension("tsv.partial");
    let sink = File::create(&partial_path)
        .with_context(|| format!("create {}", partial_path.display()))?;

    let stats = merge_facts(
        BufReader::new(facts),
        &table,
        BufWriter::new(sink),
        config.merge.batch_size,
    )
    .with_context(|| format!("merge facts with submissions into {}", partial_path.display()))?;

    fs::rename(&partial_path, &merged_path).with_context(|| {
        format!("rename {} to {}", partial_path.display(), merged_path.display())
    })?;
    Ok(stats)
}

/// Fan the merged file out into one partition per symbol.
pub fn partition_stage(config: &PipelineConfig) -> Result<PartitionStats> {
    let dir = config.partition_dir();
    info!(
        dir = %dir.display(),
        max_open_handles = config.partition.max_open_handles,
        "stage: partition"
    );

    let merged_path = config.merged_path();
    let merged = File::open(&merged_path)
        .with_context(|| format!("open {}", merged_path.display()))?;
    partition_merged(BufReader::new(merged), &dir, config.partition.max_open_handles)
        .context("partition merged records")
}

/// Price every partition and write the Parquet output.
pub fn enrich_stage<A: PriceApi>(config: &PipelineConfig, api: A) -> Result<EnrichSummary> {
    info!(output_dir = %config.paths.output_dir.display(), "stage: enrich");

    let mut resolver = PriceResolver::new(api, config.provider.probe_policy());
    enrich_partitions(&config.partition_dir(), &config.paths.output_dir, &mut resolver)
        .context("enrich partitions")
}

/// Every stage, in order.
pub fn run_all<A: PriceApi>(
    config: &PipelineConfig,
    symbols: &dyn SymbolTableSource,
    api: A,
) -> Result<RunSummary> {
    let combine = combine_stage(config)?;
    let merge = merge_stage(config, symbols)?;
    let partition = partition_stage(config)?;
    let enrich = enrich_stage(config, api)?;

    Ok(RunSummary {
        combine: Some(combine),
        merge: Some(merge),
        partition: Some(partition),
        enrich: Some(enrich),
        ..RunSummary::for_config(config)
    })
}

// ── Collaborator construction ────────────────────────────────────────

/// The SEC symbol table over HTTP.
pub fn build_symbol_source(config: &PipelineConfig) -> Result<HttpSymbolTable> {
    HttpSymbolTable::new(
        config.tickers.url.clone(),
        &config.tickers.user_agent,
        config.provider.http_timeout(),
    )
    .context("build symbol table client")
}

/// OAuth session on the configured credential file.
pub fn build_session(
    config: &PipelineConfig,
    code_provider: Box<dyn AuthorizationCodeProvider>,
) -> Result<OAuthSession> {
    let transport = HttpTokenTransport::new(config.provider.token_url.clone(), config.provider.http_timeout())
        .context("build token client")?;
    OAuthSession::open(
        CredentialStore::new(config.paths.credentials.clone()),
        Box::new(transport),
        code_provider,
        config.provider.session_settings(),
    )
    .with_context(|| format!("open credential store {}", config.paths.credentials.display()))
}

/// The rate-limited Schwab price API on top of `session`.
pub fn build_price_api(config: &PipelineConfig, session: OAuthSession) -> Result<SchwabPriceApi> {
    SchwabPriceApi::new(
        session,
        RateLimiter::per_minute(config.provider.requests_per_minute),
        config.provider.price_history_url.clone(),
        config.provider.http_timeout(),
    )
    .context("build price API client")
}
