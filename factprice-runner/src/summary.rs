//! Run summary: per-stage counters plus the location of every artifact.

use crate::config::PipelineConfig;
use factprice_core::data::{CombineSummary, MergeStats, PartitionStats};
use factprice_core::enrich::EnrichSummary;
use std::path::PathBuf;

#[derive(Debug, Clone, Default)]
pub struct CombineStageSummary {
    pub facts: CombineSummary,
    pub submissions: CombineSummary,
}

/// Where each stage writes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub facts: PathBuf,
    pub submissions: PathBuf,
    pub merged: PathBuf,
    pub partitions: PathBuf,
    pub enriched: PathBuf,
}

impl ArtifactPaths {
    pub fn for_config(config: &PipelineConfig) -> Self {
        Self {
            facts: config.facts_path(),
            submissions: config.submissions_path(),
            merged: config.merged_path(),
            partitions: config.partition_dir(),
            enriched: config.paths.output_dir.clone(),
        }
    }

    /// `(label, path)` pairs in stage order.
    pub fn listing(&self) -> [(&'static str, &PathBuf); 5] {
        [
            ("combined facts", &self.facts),
            ("combined submissions", &self.submissions),
            ("merged", &self.merged),
            ("partitions", &self.partitions),
            ("enriched", &self.enriched),
        ]
    }
}

/// Stage results for one invocation. Stages that did not run are `None`.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub combine: Option<CombineStageSummary>,
    pub merge: Option<MergeStats>,
    pub partition: Option<PartitionStats>,
    pub enrich: Option<EnrichSummary>,
    pub artifacts: ArtifactPaths,
}

impl RunSummary {
    pub fn for_config(config: &PipelineConfig) -> Self {
        Self {
            artifacts: ArtifactPaths::for_config(config),
            ..Default::default()
        }
    }

    /// Human-readable report, one line per fact.
    pub fn lines(&self) -> Vec<String> {
        let mut out = Vec::new();

        if let Some(c) = &self.combine {
            for (label, s) in [("facts", &c.facts), ("submissions", &c.submissions)] {
                out.push(format!(
                    "combine {label}: {} files, {} rows, {} skipped",
                    s.files_combined,
                    s.rows_written,
                    s.skipped.len()
                ));
                for (path, reason) in &s.skipped {
                    out.push(format!("  skipped {}: {reason}", path.display()));
                }
            }
        }
        if let Some(m) = &self.merge {
            out.push(format!(
                "merge: {} facts ({} matched, {} unmatched) in {} batches",
                m.facts_read, m.matched, m.unmatched, m.batches
            ));
        }
        if let Some(p) = &self.partition {
            out.push(format!(
                "partition: {} rows into {} symbols, {} without symbol dropped",
                p.rows_written,
                p.partitions.len(),
                p.dropped_without_symbol
            ));
        }
        if let Some(e) = &self.enrich {
            out.push(format!(
                "enrich: {} partitions written, {} skipped, {} rows ({} priced, {} null), {} API calls",
                e.written.len(),
                e.skipped.len(),
                e.rows_written,
                e.prices_resolved,
                e.prices_null,
                e.external_calls
            ));
            for (path, reason) in &e.skipped {
                out.push(format!("  skipped {}: {reason}", path.display()));
            }
        }

        out.push("artifacts:".to_string());
        for (label, path) in self.artifacts.listing() {
            out.push(format!("  {label:<22} {}", path.display()));
        }
        out
    }
}
