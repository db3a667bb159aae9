//! Ticker resolution: registrant identifier → trading symbol.
//!
//! The symbol table is a remote two-column TSV (`symbol<TAB>registrant_id`,
//! no header) fetched once per run. A registrant may list several symbols
//! (share classes); the first listed wins so that every registrant maps to
//! exactly one symbol and the downstream join never fans out.

use super::error::PipelineError;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

/// Anything that can produce the raw symbol table text.
pub trait SymbolTableSource {
    fn fetch_table(&self) -> Result<String, PipelineError>;
}

/// In-memory registrant → symbol map.
#[derive(Debug, Clone, Default)]
pub struct TickerTable {
    by_registrant: HashMap<i64, String>,
    malformed_lines: usize,
}

impl TickerTable {
    /// Parse the two-column table. Malformed lines are counted and skipped.
    pub fn parse(text: &str) -> Self {
        let mut table = Self::default();

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let mut fields = line.split('\t');
            let (Some(symbol), Some(registrant), None) = (fields.next(), fields.next(), fields.next())
            else {
                table.malformed_lines += 1;
                continue;
            };
            let symbol = symbol.trim();
            let Ok(registrant_id) = registrant.trim().parse::<i64>() else {
                table.malformed_lines += 1;
                continue;
            };
            if symbol.is_empty() {
                table.malformed_lines += 1;
                continue;
            }
            table
                .by_registrant
                .entry(registrant_id)
                .or_insert_with(|| symbol.to_ascii_uppercase());
        }

        table
    }

    /// Fetch and parse the table from `source`.
    pub fn fetch(source: &dyn SymbolTableSource) -> Result<Self, PipelineError> {
        let text = source.fetch_table()?;
        let table = Self::parse(&text);
        info!(
            registrants = table.len(),
            malformed = table.malformed_lines,
            "loaded symbol table"
        );
        Ok(table)
    }

    pub fn symbol_for(&self, registrant_id: i64) -> Option<&str> {
        self.by_registrant.get(&registrant_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_registrant.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_registrant.is_empty()
    }

    pub fn malformed_lines(&self) -> usize {
        self.malformed_lines
    }
}

impl<S: Into<String>> FromIterator<(i64, S)> for TickerTable {
    fn from_iter<I: IntoIterator<Item = (i64, S)>>(iter: I) -> Self {
        let mut table = Self::default();
        for (registrant_id, symbol) in iter {
            table
                .by_registrant
                .entry(registrant_id)
                .or_insert_with(|| symbol.into().to_ascii_uppercase());
        }
        table
    }
}

/// Symbol table fetched over HTTP.
///
/// The SEC rejects requests without an identifying User-Agent, so one is
/// mandatory here.
pub struct HttpSymbolTable {
    client: reqwest::blocking::Client,
    url: String,
}

impl HttpSymbolTable {
    pub fn new(url: impl Into<String>, user_agent: &str, timeout: Duration) -> Result<Self, PipelineError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| PipelineError::SymbolTable(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

impl SymbolTableSource for HttpSymbolTable {
    fn fetch_table(&self) -> Result<String, PipelineError> {
        debug!(url = %self.url, "fetching symbol table");
        let resp = self
            .client
            .get(&self.url)
            .send()
            .map_err(|e| PipelineError::SymbolTable(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(PipelineError::SymbolTable(format!(
                "HTTP {status} from {}",
                self.url
            )));
        }

        resp.text()
            .map_err(|e| PipelineError::SymbolTable(format!("body: {e}")))
    }
}
