//! Source combination: a streaming fold of many quarterly extracts into one
//! combined TSV per record kind.
//!
//! Each source file is first staged (column subset selected, renamed to the
//! domain column names) into a sidecar file. Only when the whole source
//! parses is the staged content appended to the combined output, so a bad
//! file contributes nothing and the fold continues with the next one.

use super::error::PipelineError;
use super::tsv::{open_tsv, tsv_writer};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Which source columns to keep, and what to call them in the output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSelection {
    /// `(source column, output column)` pairs in output order.
    pub columns: Vec<(String, String)>,
}

impl ColumnSelection {
    pub fn new<S: Into<String>>(pairs: impl IntoIterator<Item = (S, S)>) -> Self {
        Self {
            columns: pairs
                .into_iter()
                .map(|(src, dst)| (src.into(), dst.into()))
                .collect(),
        }
    }

    /// Default selection for `num.txt` extracts.
    pub fn numeric_facts() -> Self {
        Self::new([
            ("adsh", "filing_id"),
            ("tag", "tag"),
            ("ddate", "fact_date"),
            ("qtrs", "quarters"),
            ("value", "value"),
            ("dimn", "dimension"),
        ])
    }

    /// Default selection for `sub.txt` extracts.
    pub fn submissions() -> Self {
        Self::new([
            ("adsh", "filing_id"),
            ("cik", "registrant_id"),
            ("form", "form_type"),
            ("filed", "filed_date"),
        ])
    }

    pub fn output_header(&self) -> Vec<&str> {
        self.columns.iter().map(|(_, dst)| dst.as_str()).collect()
    }
}

/// Outcome of one combine pass.
#[derive(Debug, Clone, Default)]
pub struct CombineSummary {
    pub output: PathBuf,
    pub files_combined: usize,
    pub rows_written: u64,
    pub skipped: Vec<(PathBuf, String)>,
}

/// Recursively collect every file named exactly `file_name` under `root`,
/// sorted by path.
pub fn discover_files(root: &Path, file_name: &str) -> io::Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                pending.push(path);
            } else if entry.file_name().to_str() == Some(file_name) {
                found.push(path);
            }
        }
    }

    found.sort();
    Ok(found)
}

/// Fold `files` into a single TSV at `output`, keeping `selection`.
///
/// Unparseable files are logged and skipped. Only failures writing the
/// combined output itself are returned as errors.
pub fn combine_sources(
    files: &[PathBuf],
    selection: &ColumnSelection,
    output: &Path,
) -> Result<CombineSummary, PipelineError> {
    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut wtr = tsv_writer(File::create(output)?);
    wtr.write_record(selection.output_header())?;
    wtr.flush()?;

    let staging = output.with_extension("staging");
    let mut summary = CombineSummary {
        output: output.to_path_buf(),
        ..Default::default()
    };

    for (i, path) in files.iter().enumerate() {
        match stage_file(path, selection, &staging) {
            Ok(rows) => {
                let mut staged = File::open(&staging)?;
                io::copy(&mut staged, &mut wtr.get_ref())?;
                summary.files_combined += 1;
                summary.rows_written += rows;
                debug!(file = %path.display(), rows, "combined source file");
            }
            Err(PipelineError::SourceRead { path, reason }) => {
                warn!(file = %path.display(), %reason, "skipping unreadable source file");
                summary.skipped.push((path, reason));
            }
            Err(other) => return Err(other),
        }
        info!(
            progress = format!("{}/{}", i + 1, files.len()),
            output = %output.display(),
            "combining sources"
        );
    }

    wtr.flush()?;
    let _ = fs::remove_file(&staging);
    Ok(summary)
}

/// Select the configured columns from one source file into `staging`.
///
/// Every failure is a [`PipelineError::SourceRead`]: the caller skips the
/// file and the fold continues.
fn stage_file(source: &Path, selection: &ColumnSelection, staging: &Path) -> Result<u64, PipelineError> {
    let fail = |reason: String| PipelineError::SourceRead {
        path: source.to_path_buf(),
        reason,
    };

    let mut rdr = open_tsv(source).map_err(|e| fail(format!("open: {e}")))?;
    let headers = rdr
        .headers()
        .map_err(|e| fail(format!("header: {e}")))?
        .clone();

    let mut indices = Vec::with_capacity(selection.columns.len());
    for (src, _) in &selection.columns {
        let idx = headers
            .iter()
            .position(|h| h == src)
            .ok_or_else(|| fail(format!("missing column '{src}'")))?;
        indices.push(idx);
    }

    let file = File::create(staging).map_err(|e| fail(format!("staging file: {e}")))?;
    let mut wtr = tsv_writer(file);
    let mut rows = 0u64;

    for result in rdr.records() {
        let record = result.map_err(|e| fail(format!("row {}: {e}", rows + 1)))?;
        wtr.write_record(indices.iter().map(|&i| record.get(i).unwrap_or("")))
            .map_err(|e| fail(format!("staging write: {e}")))?;
        rows += 1;
    }

    wtr.flush().map_err(|e| fail(format!("staging flush: {e}")))?;
    Ok(rows)
}
