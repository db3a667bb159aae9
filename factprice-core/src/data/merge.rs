//! Filing merge engine.
//!
//! Streams numeric facts and left-joins each one against the in-memory
//! submission table. Facts are processed in fixed-size batches: each batch is
//! joined, written, and flushed before the next is read, so peak memory is
//! bounded by the batch size rather than the input size and a crash loses at
//! most the batch in flight.
//!
//! Every input fact produces exactly one output row, in input order. A fact
//! whose filing has no submission is kept with null metadata.

use super::error::PipelineError;
use super::submissions::SubmissionTable;
use super::tsv::{tsv_reader, tsv_writer};
use crate::domain::{MergedRecord, NumericFact, MERGED_COLUMNS};
use std::io::{Read, Write};
use tracing::{debug, info};

pub const DEFAULT_BATCH_SIZE: usize = 100_000;

/// Counters for one merge pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub facts_read: u64,
    pub matched: u64,
    pub unmatched: u64,
    pub batches: u64,
}

/// Merge the fact stream `facts` against `submissions`, writing TSV to `sink`.
///
/// A read error anywhere in the fact stream aborts the merge with
/// [`PipelineError::MergeStream`]; whatever was already flushed is partial
/// and must not be fed downstream.
pub fn merge_facts<R: Read, W: Write>(
    facts: R,
    submissions: &SubmissionTable,
    sink: W,
    batch_size: usize,
) -> Result<MergeStats, PipelineError> {
    let batch_size = batch_size.max(1);
    let mut rdr = tsv_reader(facts);
    let mut wtr = tsv_writer(sink);
    let mut stats = MergeStats::default();

    wtr.write_record(MERGED_COLUMNS)?;

    let mut batch: Vec<NumericFact> = Vec::with_capacity(batch_size);
    for result in rdr.deserialize::<NumericFact>() {
        let fact = result.map_err(|source| PipelineError::MergeStream {
            record: stats.facts_read + batch.len() as u64 + 1,
            source,
        })?;
        batch.push(fact);

        if batch.len() == batch_size {
            write_batch(&mut wtr, &mut batch, submissions, &mut stats)?;
        }
    }
    if !batch.is_empty() {
        write_batch(&mut wtr, &mut batch, submissions, &mut stats)?;
    }
    wtr.flush()?;

    info!(
        facts = stats.facts_read,
        matched = stats.matched,
        unmatched = stats.unmatched,
        batches = stats.batches,
        "merge complete"
    );
    Ok(stats)
}

fn write_batch<W: Write>(
    wtr: &mut csv::Writer<W>,
    batch: &mut Vec<NumericFact>,
    submissions: &SubmissionTable,
    stats: &mut MergeStats,
) -> Result<(), PipelineError> {
    for fact in batch.drain(..) {
        let submission = submissions.get(&fact.filing_id);
        match submission {
            Some(_) => stats.matched += 1,
            None => stats.unmatched += 1,
        }
        stats.facts_read += 1;
        wtr.serialize(MergedRecord::join(fact, submission))?;
    }
    wtr.flush()?;
    stats.batches += 1;
    debug!(batch = stats.batches, facts = stats.facts_read, "merged batch flushed");
    Ok(())
}
