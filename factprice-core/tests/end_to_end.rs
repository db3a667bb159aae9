//! End-to-end: raw TSV in, enriched Parquet out, with a scripted price provider.

use chrono::NaiveDate;
use factprice_core::data::tsv::open_tsv;
use factprice_core::data::{merge_facts, partition_merged, SubmissionTable, TickerTable};
use factprice_core::domain::MergedRecord;
use factprice_core::enrich::enrich_partitions;
use factprice_core::provider::{
    CandleLookup, PriceApi, PriceResolver, ProbePolicy, ProviderError,
};
use polars::prelude::*;
use std::cell::RefCell;
use std::fs;

const FACTS: &str = "filing_id\ttag\tfact_date\tquarters\tvalue\tdimension\n\
                     A1\tAssets\t20221231\t0\t100\t0\n\
                     A2\tLiabilities\t20221231\t0\t40\t0\n";

const SUBMISSIONS: &str = "filing_id\tregistrant_id\tform_type\tfiled_date\n\
                           A1\t1001\t10-K\t20230101\n";

/// No data on the first probe day, then a close.
struct GapThenClose {
    calls: RefCell<Vec<NaiveDate>>,
}

impl PriceApi for GapThenClose {
    fn daily_candle(&self, _symbol: &str, day: NaiveDate) -> Result<CandleLookup, ProviderError> {
        self.calls.borrow_mut().push(day);
        if self.calls.borrow().len() == 1 {
            Ok(CandleLookup::NoData)
        } else {
            Ok(CandleLookup::Close(150.25))
        }
    }
}

fn merged_records(path: &std::path::Path) -> Vec<MergedRecord> {
    open_tsv(path)
        .unwrap()
        .deserialize()
        .map(|r| r.unwrap())
        .collect()
}

#[test]
fn filings_are_merged_partitioned_and_priced() {
    let dir = tempfile::tempdir().unwrap();
    let merged_path = dir.path().join("merged.tsv");
    let partitions = dir.path().join("partitions");
    let output = dir.path().join("enriched");

    let tickers = TickerTable::parse("abc\t1001\n");
    let table = SubmissionTable::load(SUBMISSIONS.as_bytes(), &tickers).unwrap();

    let sink = fs::File::create(&merged_path).unwrap();
    let merge = merge_facts(FACTS.as_bytes(), &table, sink, 100).unwrap();
    assert_eq!((merge.matched, merge.unmatched), (1, 1));

    // F2 is kept by the merge with null metadata.
    let merged = merged_records(&merged_path);
    assert_eq!(merged.len(), 2);
    assert_eq!(merged[1].filing_id, "A2");
    assert_eq!(merged[1].symbol, None);

    let stats = partition_merged(fs::File::open(&merged_path).unwrap(), &partitions, 16).unwrap();
    assert_eq!(stats.dropped_without_symbol, 1);
    let files: Vec<_> = fs::read_dir(&partitions).unwrap().collect();
    assert_eq!(files.len(), 1);

    let abc = merged_records(&partitions.join("ABC.tsv"));
    assert_eq!(abc.len(), 1);
    assert_eq!(abc[0].symbol.as_deref(), Some("ABC"));
    assert_eq!(abc[0].tag, "Assets");
    assert_eq!(abc[0].filed_date, Some(20230101));

    let api = GapThenClose {
        calls: RefCell::new(Vec::new()),
    };
    let mut resolver = PriceResolver::new(&api, ProbePolicy::default());
    let summary = enrich_partitions(&partitions, &output, &mut resolver).unwrap();

    assert_eq!(
        *api.calls.borrow(),
        vec![
            NaiveDate::from_ymd_opt(2023, 1, 2).unwrap(),
            NaiveDate::from_ymd_opt(2023, 1, 3).unwrap(),
        ]
    );
    assert_eq!(summary.external_calls, 2);
    assert_eq!(summary.prices_resolved, 1);
    assert_eq!(summary.written, vec![output.join("ABC.parquet")]);

    let df = ParquetReader::new(fs::File::open(output.join("ABC.parquet")).unwrap())
        .finish()
        .unwrap();
    assert_eq!(df.height(), 1);
    assert_eq!(df.column("symbol").unwrap().str().unwrap().get(0), Some("ABC"));
    assert_eq!(df.column("filed_date").unwrap().i64().unwrap().get(0), Some(20230101));
    assert_eq!(df.column("value").unwrap().f64().unwrap().get(0), Some(100.0));
    assert_eq!(df.column("price").unwrap().f64().unwrap().get(0), Some(150.25));
}
