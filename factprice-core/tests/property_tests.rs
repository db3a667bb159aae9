//! Property tests for merge and partition invariants.
//!
//! Uses proptest to verify:
//! 1. Merge completeness: every fact yields exactly one merged record, in order,
//!    carrying submission metadata iff its filing matched
//! 2. Partition exactness: per symbol, the partition holds exactly the merged
//!    records for that symbol, in order, whatever the handle-pool capacity

use factprice_core::data::tsv::{open_tsv, tsv_writer};
use factprice_core::data::{merge_facts, partition_merged, SubmissionTable, TickerTable};
use factprice_core::domain::{MergedRecord, NumericFact, Submission, FACT_COLUMNS};
use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

// ── Strategies (proptest) ────────────────────────────────────────────

const FILINGS: [&str; 6] = ["A0", "A1", "A2", "A3", "A4", "A5"];

fn arb_fact() -> impl Strategy<Value = NumericFact> {
    (
        0..FILINGS.len(),
        "[A-Za-z]{1,12}",
        prop::option::of(-1_000_000i64..1_000_000),
        prop::option::of(0i64..3),
        0i64..5,
    )
        .prop_map(|(filing, tag, value, dimension, quarters)| NumericFact {
            filing_id: FILINGS[filing].to_string(),
            tag,
            fact_date: 20221231,
            quarters,
            value: value.map(|v| v as f64 / 4.0),
            dimension,
        })
}

/// Submissions for a random subset of filings, spread over four registrants.
fn arb_submissions() -> impl Strategy<Value = Vec<Submission>> {
    prop::collection::vec((any::<bool>(), 0i64..4), FILINGS.len()).prop_map(|picks| {
        picks
            .into_iter()
            .enumerate()
            .filter(|(_, (present, _))| *present)
            .map(|(i, (_, registrant))| Submission {
                filing_id: FILINGS[i].to_string(),
                symbol: None,
                form_type: "10-K".into(),
                registrant_id: 1000 + registrant,
                filed_date: 20230101 + i as i64,
            })
            .collect()
    })
}

/// Symbols for a random subset of the four registrants.
fn arb_tickers() -> impl Strategy<Value = TickerTable> {
    prop::collection::vec(prop::option::of("[A-Z]{1,4}"), 4).prop_map(|symbols| {
        symbols
            .into_iter()
            .enumerate()
            .filter_map(|(i, s)| s.map(|s| (1000 + i as i64, s)))
            .collect()
    })
}

fn facts_tsv(facts: &[NumericFact]) -> Vec<u8> {
    let mut wtr = tsv_writer(vec![]);
    wtr.write_record(FACT_COLUMNS).unwrap();
    for fact in facts {
        wtr.serialize(fact).unwrap();
    }
    wtr.into_inner().unwrap()
}

fn read_merged(bytes: &[u8]) -> Vec<MergedRecord> {
    factprice_core::data::tsv::tsv_reader(bytes)
        .deserialize()
        .map(|r| r.unwrap())
        .collect()
}

fn read_partition(path: &Path) -> Vec<MergedRecord> {
    open_tsv(path)
        .unwrap()
        .deserialize()
        .map(|r| r.unwrap())
        .collect()
}

// ── 1. Merge Completeness ────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// No fact is dropped or duplicated; matched facts carry metadata, misses carry nulls.
    #[test]
    fn merge_emits_one_record_per_fact(
        facts in prop::collection::vec(arb_fact(), 0..60),
        submissions in arb_submissions(),
        tickers in arb_tickers(),
        batch_size in 1usize..16,
    ) {
        let table = SubmissionTable::from_submissions(submissions, &tickers);
        let mut out = Vec::new();
        let stats = merge_facts(facts_tsv(&facts).as_slice(), &table, &mut out, batch_size).unwrap();

        let merged = read_merged(&out);
        prop_assert_eq!(merged.len(), facts.len());
        prop_assert_eq!(stats.facts_read as usize, facts.len());
        prop_assert_eq!((stats.matched + stats.unmatched) as usize, facts.len());

        for (fact, record) in facts.iter().zip(&merged) {
            prop_assert_eq!(&record.filing_id, &fact.filing_id);
            prop_assert_eq!(&record.tag, &fact.tag);
            prop_assert_eq!(record.value, fact.value);
            match table.get(&fact.filing_id) {
                Some(sub) => {
                    prop_assert_eq!(record.form_type.as_deref(), Some(sub.form_type.as_str()));
                    prop_assert_eq!(record.registrant_id, Some(sub.registrant_id));
                    prop_assert_eq!(record.filed_date, Some(sub.filed_date));
                    prop_assert_eq!(&record.symbol, &sub.symbol);
                }
                None => {
                    prop_assert!(record.symbol.is_none());
                    prop_assert!(record.form_type.is_none());
                    prop_assert!(record.registrant_id.is_none());
                    prop_assert!(record.filed_date.is_none());
                }
            }
        }
    }
}

// ── 2. Partition Exactness ───────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Partitions are exactly the symbol-bearing merged records, grouped, in order.
    #[test]
    fn partitions_equal_symbol_bearing_merged_records(
        facts in prop::collection::vec(arb_fact(), 0..60),
        submissions in arb_submissions(),
        tickers in arb_tickers(),
        capacity in 1usize..4,
    ) {
        let table = SubmissionTable::from_submissions(submissions, &tickers);
        let mut merged_bytes = Vec::new();
        merge_facts(facts_tsv(&facts).as_slice(), &table, &mut merged_bytes, 7).unwrap();
        let merged = read_merged(&merged_bytes);

        let dir = tempfile::tempdir().unwrap();
        let stats = partition_merged(merged_bytes.as_slice(), dir.path(), capacity).unwrap();

        let mut expected: BTreeMap<String, Vec<MergedRecord>> = BTreeMap::new();
        let mut without_symbol = 0u64;
        for record in &merged {
            match record.partition_key() {
                Some(symbol) => expected.entry(symbol.to_string()).or_default().push(record.clone()),
                None => without_symbol += 1,
            }
        }

        prop_assert_eq!(stats.dropped_without_symbol, without_symbol);
        prop_assert_eq!(stats.rows_written as usize, merged.len() - without_symbol as usize);

        let files: BTreeSet<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        let expected_files: BTreeSet<String> =
            expected.keys().map(|s| format!("{s}.tsv")).collect();
        prop_assert_eq!(files, expected_files);

        for (symbol, records) in &expected {
            let actual = read_partition(&dir.path().join(format!("{symbol}.tsv")));
            prop_assert_eq!(&actual, records);
        }
    }
}
