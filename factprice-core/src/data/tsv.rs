//! Tab-separated reader/writer builders.
//!
//! The regulatory extracts are unquoted TSV with a header row. Every stage
//! reads and writes through these builders so the dialect stays identical
//! across artifacts.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

/// Reader over a headered, unquoted TSV stream.
pub fn tsv_reader<R: Read>(source: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .quoting(false)
        .has_headers(true)
        .from_reader(source)
}

/// Open a TSV file for reading.
pub fn open_tsv(path: &Path) -> std::io::Result<csv::Reader<File>> {
    Ok(tsv_reader(File::open(path)?))
}

/// Writer for an unquoted TSV stream. Headers are written explicitly by
/// each stage so that they appear exactly once, even for empty outputs.
pub fn tsv_writer<W: Write>(sink: W) -> csv::Writer<W> {
    csv::WriterBuilder::new()
        .delimiter(b'\t')
        .quote_style(csv::QuoteStyle::Never)
        .has_headers(false)
        .from_writer(sink)
}
