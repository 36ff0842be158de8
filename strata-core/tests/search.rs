//! End-to-end query scenarios over small on-disk indices.

mod common;

use std::sync::Arc;

use common::{build_index, build_toy_index, text_collection, CoderNames, Posting, TermLists};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use strata_core::query::score::Bm25;
use strata_core::{
    Config, FullContiguousCache, IndexFiles, IndexReader, QueryAlgorithm, QueryProcessor,
    NO_MORE_DOCS,
};

fn open_processor(files: &IndexFiles, algorithm: QueryAlgorithm, k: usize) -> QueryProcessor {
    let config = Config {
        max_num_results: k,
        ..Config::default()
    };
    QueryProcessor::new(files, config, algorithm, None).unwrap()
}

/// Hand-computed toy scores: avg_doc_len 2.5, N = 2.
fn toy_partial(term_docs: u64, freq: u32, doc_len: u32) -> f32 {
    Bm25::new(2.5).partial(Bm25::idf(2, term_docs), freq, doc_len)
}

#[test]
fn test_single_term_or() {
    let dir = tempfile::tempdir().unwrap();
    let files = build_toy_index(&dir.path().join("toy"), false);
    let mut processor = open_processor(&files, QueryAlgorithm::DaatOr, 10);

    let response = processor.run_query("alpha").unwrap();
    assert_eq!(response.results.len(), 2);
    assert_eq!(response.total_results, 2);

    let by_doc = |doc: u32| {
        response
            .results
            .iter()
            .find(|r| r.doc_id == doc)
            .unwrap()
            .score
    };
    assert!((by_doc(1) - toy_partial(2, 1, 3)).abs() < 1e-5);
    assert!((by_doc(2) - toy_partial(2, 1, 2)).abs() < 1e-5);
}

#[test]
fn test_score_tie_keeps_lower_doc_id() {
    let dir = tempfile::tempdir().unwrap();
    let (lists, doc_lens, urls) = text_collection(&[
        (1, "http://one.example", "alpha left"),
        (2, "http://two.example", "alpha right"),
    ]);
    let url_refs: Vec<&str> = urls.iter().map(|u| u.as_str()).collect();
    let files = build_index(
        &dir.path().join("tie"),
        &lists,
        &doc_lens,
        &url_refs,
        false,
        &CoderNames::default(),
    );

    let mut processor = open_processor(&files, QueryAlgorithm::DaatOr, 1);
    let response = processor.run_query("alpha").unwrap();
    assert_eq!(response.results.len(), 1);
    assert_eq!(response.results[0].doc_id, 1);
}

#[test]
fn test_and_empty_intersection() {
    let dir = tempfile::tempdir().unwrap();
    let files = build_toy_index(&dir.path().join("toy"), false);
    let mut processor = open_processor(&files, QueryAlgorithm::DaatAnd, 10);

    let response = processor.run_query("beta gamma").unwrap();
    assert!(response.results.is_empty());
    assert_eq!(response.total_results, 0);
}

#[test]
fn test_and_intersection() {
    let dir = tempfile::tempdir().unwrap();
    let files = build_toy_index(&dir.path().join("toy"), false);
    let mut processor = open_processor(&files, QueryAlgorithm::DaatAnd, 10);

    let response = processor.run_query("alpha beta").unwrap();
    assert_eq!(response.results.len(), 1);
    assert_eq!(response.results[0].doc_id, 1);
    let expected = toy_partial(2, 1, 3) + toy_partial(1, 2, 3);
    assert!((response.results[0].score - expected).abs() < 1e-5);
}

#[test]
fn test_missing_term_and_vs_or() {
    let dir = tempfile::tempdir().unwrap();
    let files = build_toy_index(&dir.path().join("toy"), false);

    let mut and = open_processor(&files, QueryAlgorithm::DaatAnd, 10);
    assert!(and.run_query("alpha zebra").unwrap().results.is_empty());

    let mut or = open_processor(&files, QueryAlgorithm::DaatOr, 10);
    let response = or.run_query("alpha zebra").unwrap();
    assert_eq!(response.results.len(), 2);
}

#[test]
fn test_wand_matches_or_on_toy() {
    let dir = tempfile::tempdir().unwrap();
    let files = build_toy_index(&dir.path().join("toy"), false);

    let mut or = open_processor(&files, QueryAlgorithm::DaatOr, 1);
    let expected = or.run_query("alpha beta gamma").unwrap();

    let mut wand = open_processor(&files, QueryAlgorithm::Wand, 1);
    let response = wand.run_query("alpha beta gamma").unwrap();

    assert_eq!(response.results.len(), 1);
    assert_eq!(response.results[0].doc_id, expected.results[0].doc_id);
    assert_eq!(response.results[0].doc_id, 1);
    assert!((response.results[0].score - expected.results[0].score).abs() < 1e-5);
}

#[test]
fn test_top_positions() {
    let dir = tempfile::tempdir().unwrap();
    let files = build_toy_index(&dir.path().join("toy"), true);
    let mut processor = open_processor(&files, QueryAlgorithm::DaatAndTopPositions, 10);

    let response = processor.run_query("alpha beta").unwrap();
    assert_eq!(response.results.len(), 1);
    assert_eq!(response.results[0].doc_id, 1);
    // Terms resolve in sorted order: alpha then beta.
    assert_eq!(response.top_positions.len(), 1);
    assert_eq!(response.top_positions[0][0], vec![1]);
    assert_eq!(response.top_positions[0][1], vec![2, 3]);
}

fn random_collection(seed: u64, num_docs: u32) -> (TermLists, Vec<u32>, Vec<String>) {
    let vocab = [
        "alpha", "beta", "gamma", "delta", "epsilon", "zeta", "eta", "theta", "iota", "kappa",
        "lambda", "mu", "nu", "xi", "omicron",
    ];
    let mut rng = StdRng::seed_from_u64(seed);
    let mut docs: Vec<(u32, String, String)> = Vec::new();
    for doc_id in 1..=num_docs {
        let len = rng.gen_range(3..12);
        let text: Vec<&str> = (0..len)
            .map(|_| vocab[rng.gen_range(0..vocab.len())])
            .collect();
        docs.push((
            doc_id,
            format!("http://doc{doc_id}.example"),
            text.join(" "),
        ));
    }
    let refs: Vec<(u32, &str, &str)> = docs
        .iter()
        .map(|(id, url, text)| (*id, url.as_str(), text.as_str()))
        .collect();
    text_collection(&refs)
}

#[test]
fn test_wand_and_maxscore_match_or_on_random_collection() {
    let dir = tempfile::tempdir().unwrap();
    let (lists, doc_lens, urls) = random_collection(7, 300);
    let url_refs: Vec<&str> = urls.iter().map(|u| u.as_str()).collect();
    let files = build_index(
        &dir.path().join("rand"),
        &lists,
        &doc_lens,
        &url_refs,
        false,
        &CoderNames::default(),
    );

    for query in ["alpha beta", "gamma delta epsilon", "mu nu xi omicron kappa"] {
        let mut or = open_processor(&files, QueryAlgorithm::DaatOr, 10);
        let expected = or.run_query(query).unwrap();

        for algorithm in [QueryAlgorithm::Wand, QueryAlgorithm::MaxScore] {
            let mut processor = open_processor(&files, algorithm, 10);
            let response = processor.run_query(query).unwrap();
            let expected_docs: Vec<u32> = expected.results.iter().map(|r| r.doc_id).collect();
            let got_docs: Vec<u32> = response.results.iter().map(|r| r.doc_id).collect();
            assert_eq!(got_docs, expected_docs, "{query} via {:?}", algorithm);
            for (a, b) in response.results.iter().zip(expected.results.iter()) {
                assert!((a.score - b.score).abs() < 1e-4);
            }
        }
    }
}

#[test]
fn test_next_geq_monotonic_over_random_list() {
    let dir = tempfile::tempdir().unwrap();
    let mut rng = StdRng::seed_from_u64(11);
    let mut postings = Vec::new();
    let mut doc_id = 0u32;
    for _ in 0..5000 {
        doc_id += rng.gen_range(1..9);
        postings.push(Posting {
            doc_id,
            frequency: rng.gen_range(1..5),
            positions: Vec::new(),
        });
    }
    let max_doc = doc_id;
    let mut lists = TermLists::new();
    lists.insert("synth".to_string(), postings);
    let doc_lens = vec![4u32; max_doc as usize + 1];
    let urls = vec![""; max_doc as usize + 1];
    let files = build_index(
        &dir.path().join("mono"),
        &lists,
        &doc_lens,
        &urls,
        false,
        &CoderNames::default(),
    );

    let cache = Arc::new(FullContiguousCache::open(&files.index()).unwrap());
    let mut reader = IndexReader::open(
        &files,
        strata_core::reader::Purpose::RandomQuery,
        cache,
        false,
        None,
    )
    .unwrap();
    let entry = reader.lexicon_mut().get_entry(b"synth").unwrap();
    let mut list = reader.open_list(&entry, 0, false, 0).unwrap();

    let mut prev = 0u32;
    let mut target = 0u32;
    let mut rng = StdRng::seed_from_u64(12);
    loop {
        let doc = list.next_geq(target).unwrap();
        if doc == NO_MORE_DOCS {
            break;
        }
        assert!(doc >= target);
        assert!(doc >= prev);
        assert!(list.get_freq().unwrap() >= 1);
        prev = doc;
        target = doc + rng.gen_range(1..40);
    }
}

/// A list long enough to span several blocks; `next_geq` with block
/// skipping enabled must land on the target while reading only the blocks
/// around it.
#[test]
fn test_block_skipping_on_long_list() {
    let dir = tempfile::tempdir().unwrap();
    let num_docs = 10_000u32;
    let postings: Vec<Posting> = (0..num_docs)
        .map(|doc_id| Posting {
            doc_id,
            frequency: 8,
            positions: (1..=8).collect(),
        })
        .collect();
    let mut lists = TermLists::new();
    lists.insert("synth".to_string(), postings);
    let doc_lens = vec![8u32; num_docs as usize];
    let urls = vec![""; num_docs as usize];
    // Null coders keep chunks fat so the list spans multiple blocks.
    let files = build_index(
        &dir.path().join("skip"),
        &lists,
        &doc_lens,
        &urls,
        true,
        &CoderNames {
            doc_id: "null",
            frequency: "null",
            position: "null",
            block_header: "null",
        },
    );

    let cache = Arc::new(FullContiguousCache::open(&files.index()).unwrap());
    let mut reader = IndexReader::open(
        &files,
        strata_core::reader::Purpose::RandomQuery,
        cache,
        false,
        None,
    )
    .unwrap();

    let entry = reader.lexicon_mut().get_entry(b"synth").unwrap();
    assert!(
        entry.layer(0).num_blocks > 2,
        "fixture must span several blocks, got {}",
        entry.layer(0).num_blocks
    );

    // Attach the block-level index the way the query processor does.
    let ids = {
        let mut list = reader.open_list(&entry, 0, true, 0).unwrap();
        list.block_last_doc_ids().unwrap()
    };
    assert_eq!(ids.len(), entry.layer(0).num_blocks as usize);
    reader
        .lexicon_mut()
        .attach_last_doc_ids(b"synth", 0, Arc::new(ids));
    reader.set_block_skipping_enabled(true);

    let entry = reader.lexicon_mut().get_entry(b"synth").unwrap();
    let mut list = reader.open_list(&entry, 0, false, 0).unwrap();
    assert_eq!(list.next_geq(0).unwrap(), 0);
    assert_eq!(list.next_geq(5000).unwrap(), 5000);
    assert!(list.num_blocks_skipped() >= 1);
    assert_eq!(list.next_geq(NO_MORE_DOCS - 1).unwrap(), NO_MORE_DOCS);
}

#[test]
fn test_fresh_cursor_returns_doc_zero() {
    let dir = tempfile::tempdir().unwrap();
    let postings = vec![
        Posting {
            doc_id: 0,
            frequency: 1,
            positions: Vec::new(),
        },
        Posting {
            doc_id: 7,
            frequency: 2,
            positions: Vec::new(),
        },
    ];
    let mut lists = TermLists::new();
    lists.insert("zero".to_string(), postings);
    let files = build_index(
        &dir.path().join("zero"),
        &lists,
        &[3, 3, 3, 3, 3, 3, 3, 3],
        &[""; 8],
        false,
        &CoderNames::default(),
    );

    let cache = Arc::new(FullContiguousCache::open(&files.index()).unwrap());
    let mut reader = IndexReader::open(
        &files,
        strata_core::reader::Purpose::RandomQuery,
        cache,
        false,
        None,
    )
    .unwrap();
    let entry = reader.lexicon_mut().get_entry(b"zero").unwrap();
    let mut list = reader.open_list(&entry, 0, false, 0).unwrap();
    assert_eq!(list.next_geq(0).unwrap(), 0);
    assert_eq!(list.next_geq(1).unwrap(), 7);
    assert_eq!(list.next_geq(8).unwrap(), NO_MORE_DOCS);

    list.reset_list().unwrap();
    assert_eq!(list.next_geq(0).unwrap(), 0);
}
