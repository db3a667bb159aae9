//! The symbol-resolved submission table the merge joins against.

use super::error::PipelineError;
use super::tickers::TickerTable;
use super::tsv::tsv_reader;
use crate::domain::Submission;
use std::collections::HashMap;
use std::io::Read;
use tracing::{info, warn};

/// Submissions keyed by filing identifier, fully materialised in memory.
#[derive(Debug, Clone, Default)]
pub struct SubmissionTable {
    rows: HashMap<String, Submission>,
    without_symbol: usize,
    duplicates: usize,
}

impl SubmissionTable {
    /// Load the combined submission TSV and resolve every symbol once.
    ///
    /// Any unreadable row fails the load: the merge needs the complete table.
    pub fn load<R: Read>(source: R, tickers: &TickerTable) -> Result<Self, PipelineError> {
        let mut rdr = tsv_reader(source);
        let mut rows = Vec::new();
        for (i, result) in rdr.deserialize::<Submission>().enumerate() {
            let sub = result
                .map_err(|e| PipelineError::SubmissionTable(format!("record {}: {e}", i + 1)))?;
            rows.push(sub);
        }

        let table = Self::from_submissions(rows, tickers);
        info!(
            filings = table.len(),
            without_symbol = table.without_symbol,
            duplicates = table.duplicates,
            "loaded submission table"
        );
        Ok(table)
    }

    /// Build the table from already-parsed submissions. Any symbol already
    /// present is replaced by the ticker table's answer. The first row for
    /// a duplicated filing identifier is kept.
    pub fn from_submissions(
        submissions: impl IntoIterator<Item = Submission>,
        tickers: &TickerTable,
    ) -> Self {
        let mut table = Self::default();

        for mut sub in submissions {
            if table.rows.contains_key(&sub.filing_id) {
                warn!(filing_id = %sub.filing_id, "duplicate submission row ignored");
                table.duplicates += 1;
                continue;
            }
            sub.symbol = tickers.symbol_for(sub.registrant_id).map(str::to_string);
            if sub.symbol.is_none() {
                table.without_symbol += 1;
            }
            table.rows.insert(sub.filing_id.clone(), sub);
        }

        table
    }

    pub fn get(&self, filing_id: &str) -> Option<&Submission> {
        self.rows.get(filing_id)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Filings whose registrant has no listed symbol.
    pub fn without_symbol(&self) -> usize {
        self.without_symbol
    }
}
