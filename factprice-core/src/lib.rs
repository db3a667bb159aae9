//! FactPrice Core: filing data pipeline and price enrichment.
//!
//! This crate contains every stage that touches data:
//! - Domain records and their TSV column sets
//! - Source combination, ticker resolution, streaming merge, per-ticker partitioning
//! - OAuth credential lifecycle, rate limiting and bounded price probing
//! - Enrichment of partitions into typed Parquet output

pub mod data;
pub mod domain;
pub mod enrich;
pub mod provider;
