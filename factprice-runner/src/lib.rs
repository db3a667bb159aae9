//! FactPrice Runner: configuration and stage orchestration.
//!
//! This crate builds on `factprice-core` to provide:
//! - TOML pipeline configuration with defaults and validation
//! - Individual stages and the full combine → merge → partition → enrich run
//! - Construction of the HTTP-backed collaborators (symbol table, OAuth, price API)
//! - The run summary printed by the CLI

pub mod config;
pub mod pipeline;
pub mod summary;

pub use config::{ConfigError, PipelineConfig};
pub use pipeline::{
    build_price_api, build_session, build_symbol_source, combine_stage, enrich_stage,
    merge_stage, partition_stage, run_all,
};
pub use summary::{ArtifactPaths, CombineStageSummary, RunSummary};

#[cfg(test)]
mod send_sync_checks {
    use super::*;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn config_is_send_sync() {
        assert_send::<PipelineConfig>();
        assert_sync::<PipelineConfig>();
    }

    #[test]
    fn run_summary_is_send_sync() {
        assert_send::<RunSummary>();
        assert_sync::<RunSummary>();
    }
}
