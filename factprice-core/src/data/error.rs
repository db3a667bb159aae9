//! Structured errors for the TSV stages (combine, merge, partition).

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// A source file could not be parsed during combination. The combine
    /// stage records these in its summary and moves on.
    #[error("source {path} could not be read: {reason}")]
    SourceRead { path: PathBuf, reason: String },

    /// The numeric-fact stream broke mid-merge. Partial merged output must
    /// not be trusted.
    #[error("fact stream failed at record {record}")]
    MergeStream { record: u64, source: csv::Error },

    #[error("submission table could not be loaded: {0}")]
    SubmissionTable(String),

    #[error("symbol table unavailable: {0}")]
    SymbolTable(String),

    #[error("merged stream unreadable at record {record}")]
    MergedStream { record: u64, source: csv::Error },

    #[error("partition output for '{symbol}'")]
    PartitionIo {
        symbol: String,
        source: std::io::Error,
    },

    /// Two distinct symbols sanitise to the same partition file name.
    #[error("symbols '{symbol}' and '{existing}' both map to partition file {}", path.display())]
    PartitionCollision {
        symbol: String,
        existing: String,
        path: PathBuf,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TSV error: {0}")]
    Tsv(#[from] csv::Error),
}
