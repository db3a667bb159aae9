//! Price enrichment: partition TSV in, typed Parquet out.
//!
//! For each partition the distinct `filed_date` values are resolved once
//! through the [`PriceResolver`], then every row is projected onto
//! [`ENRICHED_COLUMNS`] with its price. Extra columns are dropped. A
//! partition missing an expected column, or holding a row that does not
//! parse, is skipped with a warning; the rest of the run continues.
//!
//! Layout: `{output_dir}/{SYMBOL}.parquet`, written via `.parquet.tmp` + rename.

use crate::domain::{date_from_yyyymmdd, EnrichedRecord, ENRICHED_COLUMNS};
use crate::data::tsv::open_tsv;
use crate::provider::{PriceApi, PriceResolver, ProviderError};
use polars::prelude::*;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum EnrichError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parquet error: {0}")]
    Parquet(String),
}

/// One partition row, as read. Field names are the partition header names.
#[derive(Debug, Deserialize)]
struct PartitionRow {
    symbol: String,
    form_type: String,
    registrant_id: i64,
    filing_id: String,
    tag: String,
    fact_date: i64,
    quarters: i64,
    value: Option<f64>,
    dimension: Option<i64>,
    filed_date: i64,
}

/// What happened to one partition.
#[derive(Debug, Clone, PartialEq)]
pub enum PartitionOutcome {
    Written {
        symbol: String,
        path: PathBuf,
        rows: usize,
        priced: usize,
        unpriced: usize,
    },
    Skipped {
        path: PathBuf,
        reason: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnrichSummary {
    pub written: Vec<PathBuf>,
    pub skipped: Vec<(PathBuf, String)>,
    pub rows_written: usize,
    pub prices_resolved: usize,
    pub prices_null: usize,
    pub external_calls: u64,
}

impl EnrichSummary {
    fn record(&mut self, outcome: PartitionOutcome) {
        match outcome {
            PartitionOutcome::Written {
                path,
                rows,
                priced,
                unpriced,
                ..
            } => {
                self.written.push(path);
                self.rows_written += rows;
                self.prices_resolved += priced;
                self.prices_null += unpriced;
            }
            PartitionOutcome::Skipped { path, reason } => self.skipped.push((path, reason)),
        }
    }
}

/// Partition files (`*.tsv`) in `dir`, sorted by name.
pub fn list_partitions(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "tsv"))
        .collect();
    paths.sort();
    Ok(paths)
}

/// Read a partition into enriched records with no price yet.
///
/// `Err` carries the reason the partition must be skipped.
pub fn read_partition(path: &Path) -> Result<Vec<EnrichedRecord>, String> {
    let mut rdr = open_tsv(path).map_err(|e| format!("open: {e}"))?;

    let headers = rdr.headers().map_err(|e| format!("header: {e}"))?.clone();
    if let Some(missing) = ENRICHED_COLUMNS
        .iter()
        .filter(|c| **c != "price")
        .find(|c| !headers.iter().any(|h| h == **c))
    {
        return Err(format!("missing column '{missing}'"));
    }

    let mut records = Vec::new();
    for (i, row) in rdr.deserialize::<PartitionRow>().enumerate() {
        let row = row.map_err(|e| format!("row {}: {e}", i + 1))?;
        records.push(EnrichedRecord {
            symbol: row.symbol,
            form_type: row.form_type,
            registrant_id: row.registrant_id,
            filing_id: row.filing_id,
            tag: row.tag,
            fact_date: row.fact_date,
            quarters: row.quarters,
            value: row.value,
            dimension: row.dimension,
            filed_date: row.filed_date,
            price: None,
        });
    }
    Ok(records)
}

/// Enrich a single partition and write its Parquet file into `out_dir`.
pub fn enrich_partition<A: PriceApi>(
    path: &Path,
    out_dir: &Path,
    resolver: &mut PriceResolver<A>,
) -> Result<PartitionOutcome, EnrichError> {
    let mut records = match read_partition(path) {
        Ok(records) => records,
        Err(reason) => {
            warn!(path = %path.display(), %reason, "skipping partition");
            return Ok(PartitionOutcome::Skipped {
                path: path.to_path_buf(),
                reason,
            });
        }
    };

    let symbol = match records.first() {
        Some(r) => r.symbol.clone(),
        None => path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default(),
    };

    // Each distinct filed date is resolved exactly once.
    let mut prices: BTreeMap<i64, Option<f64>> = BTreeMap::new();
    for record in &records {
        prices.entry(record.filed_date).or_insert(None);
    }
    for (filed, price) in prices.iter_mut() {
        *price = match date_from_yyyymmdd(*filed) {
            Some(day) => resolver.resolve(&symbol, day)?,
            None => {
                warn!(symbol, filed_date = *filed, "unparseable filed date, price left null");
                None
            }
        };
    }

    let mut priced = 0;
    for record in &mut records {
        record.price = prices.get(&record.filed_date).copied().flatten();
        if record.price.is_some() {
            priced += 1;
        }
    }

    fs::create_dir_all(out_dir)?;
    let out_path = out_dir.join(format!("{}.parquet", path_stem(path)));
    let mut df = records_to_dataframe(&records)?;
    write_parquet(&mut df, &out_path)?;

    info!(
        symbol,
        rows = records.len(),
        dates = prices.len(),
        priced,
        path = %out_path.display(),
        "partition enriched"
    );
    Ok(PartitionOutcome::Written {
        symbol,
        path: out_path,
        rows: records.len(),
        priced,
        unpriced: records.len() - priced,
    })
}

/// Enrich every partition in `partition_dir`.
pub fn enrich_partitions<A: PriceApi>(
    partition_dir: &Path,
    out_dir: &Path,
    resolver: &mut PriceResolver<A>,
) -> Result<EnrichSummary, EnrichError> {
    let partitions = list_partitions(partition_dir)?;
    info!(count = partitions.len(), dir = %partition_dir.display(), "enriching partitions");

    let mut summary = EnrichSummary::default();
    for path in &partitions {
        let outcome = enrich_partition(path, out_dir, resolver)?;
        summary.record(outcome);
    }
    summary.external_calls = resolver.stats().external_calls;

    info!(
        written = summary.written.len(),
        skipped = summary.skipped.len(),
        rows = summary.rows_written,
        external_calls = summary.external_calls,
        "enrichment complete"
    );
    Ok(summary)
}

fn path_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "partition".into())
}

// ── Parquet I/O helpers ─────────────────────────────────────────────

fn records_to_dataframe(records: &[EnrichedRecord]) -> Result<DataFrame, EnrichError> {
    let symbols: Vec<&str> = records.iter().map(|r| r.symbol.as_str()).collect();
    let form_types: Vec<&str> = records.iter().map(|r| r.form_type.as_str()).collect();
    let registrant_ids: Vec<i64> = records.iter().map(|r| r.registrant_id).collect();
    let filing_ids: Vec<&str> = records.iter().map(|r| r.filing_id.as_str()).collect();
    let tags: Vec<&str> = records.iter().map(|r| r.tag.as_str()).collect();
    let fact_dates: Vec<i64> = records.iter().map(|r| r.fact_date).collect();
    let quarters: Vec<i64> = records.iter().map(|r| r.quarters).collect();
    let values: Vec<Option<f64>> = records.iter().map(|r| r.value).collect();
    let dimensions: Vec<Option<i64>> = records.iter().map(|r| r.dimension).collect();
    let filed_dates: Vec<i64> = records.iter().map(|r| r.filed_date).collect();
    let prices: Vec<Option<f64>> = records.iter().map(|r| r.price).collect();

    DataFrame::new(vec![
        Column::new("symbol".into(), symbols),
        Column::new("form_type".into(), form_types),
        Column::new("registrant_id".into(), registrant_ids),
        Column::new("filing_id".into(), filing_ids),
        Column::new("tag".into(), tags),
        Column::new("fact_date".into(), fact_dates),
        Column::new("quarters".into(), quarters),
        Column::new("value".into(), values),
        Column::new("dimension".into(), dimensions),
        Column::new("filed_date".into(), filed_dates),
        Column::new("price".into(), prices),
    ])
    .map_err(|e| EnrichError::Parquet(format!("dataframe creation: {e}")))
}

/// Write to `{path}.tmp` and rename into place.
fn write_parquet(df: &mut DataFrame, path: &Path) -> Result<(), EnrichError> {
    let tmp = path.with_extension("parquet.tmp");
    let file = fs::File::create(&tmp)?;
    ParquetWriter::new(file).finish(df).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        EnrichError::Parquet(format!("write parquet: {e}"))
    })?;
    fs::rename(&tmp, path)?;
    Ok(())
}
