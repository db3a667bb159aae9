//! Ticker partitioner: fans the merged stream out into one TSV per symbol.
//!
//! Output handles live in a bounded pool keyed by symbol. A handle stays open
//! for the whole pass and is flushed/closed when the pass finishes. If more
//! distinct symbols are live than the pool allows, the least recently used
//! handle is flushed and closed; should that symbol appear again its file is
//! reopened in append mode, without a second header.
//!
//! A pass owns its directory: partition files left by an earlier pass are
//! removed before the first record is routed.
//!
//! Layout: `{dir}/{SYMBOL}.tsv`

use super::error::PipelineError;
use super::tsv::{tsv_reader, tsv_writer};
use crate::domain::{MergedRecord, MERGED_COLUMNS};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const DEFAULT_MAX_OPEN_HANDLES: usize = 256;

struct OpenPartition {
    writer: csv::Writer<File>,
    last_used: u64,
}

/// Bounded pool of open partition writers.
pub struct HandlePool {
    dir: PathBuf,
    capacity: usize,
    open: HashMap<String, OpenPartition>,
    /// Symbols whose file was created (and headed) during this pass.
    created: HashSet<String>,
    /// File stem → the symbol that claimed it.
    stems: HashMap<String, String>,
    clock: u64,
    reopened: u64,
}

impl HandlePool {
    pub fn new(dir: impl Into<PathBuf>, capacity: usize) -> Self {
        Self {
            dir: dir.into(),
            capacity: capacity.max(1),
            open: HashMap::new(),
            created: HashSet::new(),
            stems: HashMap::new(),
            clock: 0,
            reopened: 0,
        }
    }

    /// File backing the partition for `symbol`.
    pub fn path_for(&self, symbol: &str) -> PathBuf {
        self.dir.join(format!("{}.tsv", file_stem(symbol)))
    }

    pub fn open_handles(&self) -> usize {
        self.open.len()
    }

    /// Times an evicted handle had to be reopened.
    pub fn reopened(&self) -> u64 {
        self.reopened
    }

    /// Append `record` to the partition for `symbol`.
    pub fn append(&mut self, symbol: &str, record: &MergedRecord) -> Result<(), PipelineError> {
        self.clock += 1;
        let now = self.clock;

        match self.open.get_mut(symbol) {
            Some(open) => {
                open.last_used = now;
                open.writer.serialize(record)?;
            }
            None => {
                if self.open.len() >= self.capacity {
                    self.evict_least_recent()?;
                }
                let mut open = self.open_handle(symbol)?;
                open.last_used = now;
                open.writer.serialize(record)?;
                self.open.insert(symbol.to_string(), open);
            }
        }
        Ok(())
    }

    /// Flush and close every open handle.
    pub fn close_all(&mut self) -> Result<(), PipelineError> {
        for (symbol, mut open) in self.open.drain() {
            open.writer
                .flush()
                .map_err(|source| PipelineError::PartitionIo { symbol, source })?;
        }
        Ok(())
    }

    fn open_handle(&mut self, symbol: &str) -> Result<OpenPartition, PipelineError> {
        let path = self.path_for(symbol);
        let io_err = |source| PipelineError::PartitionIo {
            symbol: symbol.to_string(),
            source,
        };

        let writer = if self.created.contains(symbol) {
            self.reopened += 1;
            debug!(symbol, "reopening evicted partition");
            let file = OpenOptions::new().append(true).open(&path).map_err(io_err)?;
            tsv_writer(file)
        } else {
            let stem = file_stem(symbol);
            if let Some(existing) = self.stems.get(&stem) {
                return Err(PipelineError::PartitionCollision {
                    symbol: symbol.to_string(),
                    existing: existing.clone(),
                    path,
                });
            }
            let file = File::create(&path).map_err(io_err)?;
            let mut writer = tsv_writer(file);
            writer.write_record(MERGED_COLUMNS)?;
            self.created.insert(symbol.to_string());
            self.stems.insert(stem, symbol.to_string());
            writer
        };

        Ok(OpenPartition {
            writer,
            last_used: 0,
        })
    }

    fn evict_least_recent(&mut self) -> Result<(), PipelineError> {
        let victim = self
            .open
            .iter()
            .min_by_key(|(_, open)| open.last_used)
            .map(|(symbol, _)| symbol.clone());

        if let Some(symbol) = victim {
            if let Some(mut open) = self.open.remove(&symbol) {
                open.writer
                    .flush()
                    .map_err(|source| PipelineError::PartitionIo { symbol, source })?;
            }
        }
        Ok(())
    }
}

impl Drop for HandlePool {
    fn drop(&mut self) {
        // Best effort: csv::Writer also flushes on drop, errors are ignored.
        let _ = self.close_all();
    }
}

/// Counters for one partitioning pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionStats {
    pub rows_written: u64,
    pub dropped_without_symbol: u64,
    /// Rows per symbol.
    pub partitions: BTreeMap<String, u64>,
    pub handles_reopened: u64,
}

/// Routes merged records to their symbol's partition.
pub struct TickerPartitioner {
    pool: HandlePool,
    stats: PartitionStats,
}

impl TickerPartitioner {
    /// Start a pass writing into `dir` (created if needed). Existing
    /// partition files in `dir` are removed.
    pub fn new(dir: impl Into<PathBuf>, max_open_handles: usize) -> Result<Self, PipelineError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let removed = clear_partitions(&dir)?;
        if removed > 0 {
            debug!(dir = %dir.display(), removed, "removed partitions from previous pass");
        }
        Ok(Self {
            pool: HandlePool::new(dir, max_open_handles),
            stats: PartitionStats::default(),
        })
    }

    /// Route one record. Records without a symbol are counted and dropped.
    pub fn push(&mut self, record: &MergedRecord) -> Result<(), PipelineError> {
        let Some(symbol) = record.partition_key() else {
            self.stats.dropped_without_symbol += 1;
            return Ok(());
        };
        self.pool.append(symbol, record)?;
        self.stats.rows_written += 1;
        *self.stats.partitions.entry(symbol.to_string()).or_default() += 1;
        Ok(())
    }

    /// Close every partition and return the pass counters.
    pub fn finish(mut self) -> Result<PartitionStats, PipelineError> {
        self.pool.close_all()?;
        self.stats.handles_reopened = self.pool.reopened();
        Ok(std::mem::take(&mut self.stats))
    }
}

/// Partition a merged TSV stream into `dir`.
pub fn partition_merged<R: Read>(
    merged: R,
    dir: &Path,
    max_open_handles: usize,
) -> Result<PartitionStats, PipelineError> {
    let mut rdr = tsv_reader(merged);
    let mut partitioner = TickerPartitioner::new(dir, max_open_handles)?;

    for (i, result) in rdr.deserialize::<MergedRecord>().enumerate() {
        let record = result.map_err(|source| PipelineError::MergedStream {
            record: i as u64 + 1,
            source,
        })?;
        partitioner.push(&record)?;
    }

    let stats = partitioner.finish()?;
    info!(
        partitions = stats.partitions.len(),
        rows = stats.rows_written,
        dropped = stats.dropped_without_symbol,
        reopened = stats.handles_reopened,
        "partitioning complete"
    );
    Ok(stats)
}

/// Delete every `*.tsv` directly under `dir`. Returns how many were removed.
fn clear_partitions(dir: &Path) -> Result<usize, PipelineError> {
    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "tsv") {
            fs::remove_file(&path)?;
            removed += 1;
        }
    }
    Ok(removed)
}

/// Make a symbol safe to use as a file stem.
fn file_stem(symbol: &str) -> String {
    symbol
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
