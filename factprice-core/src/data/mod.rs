//! Filing data stages: source combination, ticker resolution, the
//! fact/submission merge, and per-ticker partitioning.

pub mod combine;
pub mod error;
pub mod merge;
pub mod partition;
pub mod submissions;
pub mod tickers;
pub mod tsv;

pub use combine::{combine_sources, discover_files, ColumnSelection, CombineSummary};
pub use error::PipelineError;
pub use merge::{merge_facts, MergeStats, DEFAULT_BATCH_SIZE};
pub use partition::{
    partition_merged, HandlePool, PartitionStats, TickerPartitioner, DEFAULT_MAX_OPEN_HANDLES,
};
pub use submissions::SubmissionTable;
pub use tickers::{HttpSymbolTable, SymbolTableSource, TickerTable};
