//! Record types shared by every stage of the pipeline.
//!
//! All intermediate artifacts are tab-separated files whose headers use the
//! column names defined here. Dates travel as `YYYYMMDD` integers, the same
//! encoding the regulatory datasets use, and are only turned into
//! [`NaiveDate`] where calendar arithmetic is needed (price probing).

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

/// Columns of the combined numeric-fact file.
pub const FACT_COLUMNS: [&str; 6] = [
    "filing_id",
    "tag",
    "fact_date",
    "quarters",
    "value",
    "dimension",
];

/// Columns of the combined submission file.
pub const SUBMISSION_COLUMNS: [&str; 4] = ["filing_id", "registrant_id", "form_type", "filed_date"];

/// Columns of the merged output and of every per-entity partition.
///
/// Order matches the field order of [`MergedRecord`].
pub const MERGED_COLUMNS: [&str; 10] = [
    "symbol",
    "form_type",
    "registrant_id",
    "filing_id",
    "tag",
    "fact_date",
    "quarters",
    "value",
    "dimension",
    "filed_date",
];

/// Columns of the final enriched output.
pub const ENRICHED_COLUMNS: [&str; 11] = [
    "symbol",
    "form_type",
    "registrant_id",
    "filing_id",
    "tag",
    "fact_date",
    "quarters",
    "value",
    "dimension",
    "filed_date",
    "price",
];

/// One reported numeric fact. Immutable once read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericFact {
    pub filing_id: String,
    pub tag: String,
    pub fact_date: i64,
    pub quarters: i64,
    pub value: Option<f64>,
    pub dimension: Option<i64>,
}

/// Submission metadata for one filing.
///
/// `symbol` is absent from the combined submission file and is filled in
/// once, when the submission table is loaded against the ticker table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub filing_id: String,
    #[serde(default)]
    pub symbol: Option<String>,
    pub form_type: String,
    pub registrant_id: i64,
    pub filed_date: i64,
}

/// A numeric fact left-joined with its submission.
///
/// Unmatched facts carry `None` in every submission-derived field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedRecord {
    pub symbol: Option<String>,
    pub form_type: Option<String>,
    pub registrant_id: Option<i64>,
    pub filing_id: String,
    pub tag: String,
    pub fact_date: i64,
    pub quarters: i64,
    pub value: Option<f64>,
    pub dimension: Option<i64>,
    pub filed_date: Option<i64>,
}

impl MergedRecord {
    /// Join a fact with its (possibly missing) submission.
    pub fn join(fact: NumericFact, submission: Option<&Submission>) -> Self {
        Self {
            symbol: submission.and_then(|s| s.symbol.clone()),
            form_type: submission.map(|s| s.form_type.clone()),
            registrant_id: submission.map(|s| s.registrant_id),
            filing_id: fact.filing_id,
            tag: fact.tag,
            fact_date: fact.fact_date,
            quarters: fact.quarters,
            value: fact.value,
            dimension: fact.dimension,
            filed_date: submission.map(|s| s.filed_date),
        }
    }

    /// The partition key: the trimmed symbol, or `None` when empty.
    pub fn partition_key(&self) -> Option<&str> {
        self.symbol
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// A merged record projected to the fixed output schema, with its price.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedRecord {
    pub symbol: String,
    pub form_type: String,
    pub registrant_id: i64,
    pub filing_id: String,
    pub tag: String,
    pub fact_date: i64,
    pub quarters: i64,
    pub value: Option<f64>,
    pub dimension: Option<i64>,
    pub filed_date: i64,
    pub price: Option<f64>,
}

/// Decode a `YYYYMMDD` integer. Returns `None` for impossible dates.
pub fn date_from_yyyymmdd(raw: i64) -> Option<NaiveDate> {
    if raw <= 0 {
        return None;
    }
    let year = i32::try_from(raw / 10_000).ok()?;
    let month = u32::try_from((raw / 100) % 100).ok()?;
    let day = u32::try_from(raw % 100).ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Encode a date as a `YYYYMMDD` integer.
pub fn date_to_yyyymmdd(date: NaiveDate) -> i64 {
    i64::from(date.year()) * 10_000 + i64::from(date.month()) * 100 + i64::from(date.day())
}
