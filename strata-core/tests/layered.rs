//! Layered index generation and the early-terminating evaluators.

mod common;

use common::{build_index, build_toy_index, text_collection, CoderNames};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use strata_core::meta::keys;
use strata_core::{
    Config, IndexFiles, IndexMeta, LayerSplitMode, LayeredIndexGenerator, QueryAlgorithm,
    QueryProcessor,
};

fn open_processor(files: &IndexFiles, algorithm: QueryAlgorithm, k: usize) -> QueryProcessor {
    let config = Config {
        max_num_results: k,
        ..Config::default()
    };
    QueryProcessor::new(files, config, algorithm, None).unwrap()
}

fn layerify(
    input: &IndexFiles,
    output_prefix: &std::path::Path,
    num_layers: usize,
    overlapping: bool,
    split_mode: LayerSplitMode,
) -> IndexFiles {
    let output = IndexFiles::new(output_prefix);
    let config = Config {
        num_layers,
        overlapping_layers: overlapping,
        ..Config::default()
    };
    let mut generator =
        LayeredIndexGenerator::new(input, output.clone(), &config, split_mode).unwrap();
    generator.create_layered_index().unwrap();
    output
}

fn random_text_index(dir: &std::path::Path, seed: u64, num_docs: u32) -> IndexFiles {
    let vocab = [
        "alpha", "beta", "gamma", "delta", "epsilon", "zeta", "eta", "theta", "iota", "kappa",
    ];
    let mut rng = StdRng::seed_from_u64(seed);
    let mut docs: Vec<(u32, String, String)> = Vec::new();
    for doc_id in 1..=num_docs {
        let len = rng.gen_range(3..12);
        let text: Vec<&str> = (0..len)
            .map(|_| vocab[rng.gen_range(0..vocab.len())])
            .collect();
        docs.push((doc_id, format!("http://doc{doc_id}.example"), text.join(" ")));
    }
    let refs: Vec<(u32, &str, &str)> = docs
        .iter()
        .map(|(id, url, text)| (*id, url.as_str(), text.as_str()))
        .collect();
    let (lists, doc_lens, urls) = text_collection(&refs);
    let url_refs: Vec<&str> = urls.iter().map(|u| u.as_str()).collect();
    build_index(
        &dir.join("flat"),
        &lists,
        &doc_lens,
        &url_refs,
        false,
        &CoderNames::default(),
    )
}

#[test]
fn test_layered_roundtrip_preserves_counters() {
    let dir = tempfile::tempdir().unwrap();
    let flat = random_text_index(dir.path(), 3, 200);
    let layered = layerify(
        &flat,
        &dir.path().join("layered"),
        2,
        true,
        LayerSplitMode::PercentageFixedBounded,
    );

    let input_meta = IndexMeta::open(&flat.meta()).unwrap();
    let output_meta = IndexMeta::open(&layered.meta()).unwrap();
    for key in [
        keys::TOTAL_NUM_DOCS,
        keys::TOTAL_DOCUMENT_LENGTHS,
        keys::FIRST_DOC_ID,
        keys::LAST_DOC_ID,
    ] {
        assert_eq!(input_meta.get(key), output_meta.get(key), "{key}");
    }
    assert!(output_meta.boolean(keys::LAYERED_INDEX).unwrap());
    assert!(output_meta.boolean(keys::OVERLAPPING_LAYERS).unwrap());
    assert_eq!(output_meta.numeric::<usize>(keys::NUM_LAYERS).unwrap(), 2);
    // Overlapping layers duplicate postings, never drop them.
    let input_postings = input_meta.numeric::<u64>(keys::INDEX_POSTING_COUNT).unwrap();
    let output_postings = output_meta
        .numeric::<u64>(keys::INDEX_POSTING_COUNT)
        .unwrap();
    assert!(output_postings >= input_postings);
}

#[test]
fn test_non_overlapping_partition_preserves_posting_count() {
    let dir = tempfile::tempdir().unwrap();
    let flat = random_text_index(dir.path(), 4, 200);
    let layered = layerify(
        &flat,
        &dir.path().join("layered"),
        3,
        false,
        LayerSplitMode::PercentageFixedBounded,
    );

    let input_meta = IndexMeta::open(&flat.meta()).unwrap();
    let output_meta = IndexMeta::open(&layered.meta()).unwrap();
    assert_eq!(
        input_meta.get(keys::INDEX_POSTING_COUNT),
        output_meta.get(keys::INDEX_POSTING_COUNT)
    );
}

#[test]
fn test_daat_and_agrees_between_flat_and_layered() {
    let dir = tempfile::tempdir().unwrap();
    let flat = random_text_index(dir.path(), 5, 250);
    let layered = layerify(
        &flat,
        &dir.path().join("layered"),
        2,
        true,
        LayerSplitMode::PercentageFixedBounded,
    );

    for query in ["alpha beta", "gamma delta", "eta theta iota"] {
        let mut on_flat = open_processor(&flat, QueryAlgorithm::DaatAnd, 10);
        let mut on_layered = open_processor(&layered, QueryAlgorithm::DaatAnd, 10);
        let a = on_flat.run_query(query).unwrap();
        let b = on_layered.run_query(query).unwrap();

        let docs_a: Vec<u32> = a.results.iter().map(|r| r.doc_id).collect();
        let docs_b: Vec<u32> = b.results.iter().map(|r| r.doc_id).collect();
        assert_eq!(docs_a, docs_b, "{query}");
        for (x, y) in a.results.iter().zip(b.results.iter()) {
            assert!((x.score - y.score).abs() < 1e-4);
        }
    }
}

#[test]
fn test_layered_overlap_is_rank_safe() {
    let dir = tempfile::tempdir().unwrap();
    let flat = random_text_index(dir.path(), 6, 250);
    let layered = layerify(
        &flat,
        &dir.path().join("layered"),
        2,
        true,
        LayerSplitMode::PercentageFixedBounded,
    );

    for query in ["alpha beta", "gamma delta", "zeta eta theta"] {
        let mut exact = open_processor(&flat, QueryAlgorithm::DaatAnd, 10);
        let expected = exact.run_query(query).unwrap();

        for algorithm in [
            QueryAlgorithm::LayeredOverlap,
            QueryAlgorithm::LayeredOverlapMerge,
        ] {
            let mut processor = open_processor(&layered, algorithm, 10);
            let response = processor.run_query(query).unwrap();
            let docs_a: Vec<u32> = expected.results.iter().map(|r| r.doc_id).collect();
            let docs_b: Vec<u32> = response.results.iter().map(|r| r.doc_id).collect();
            assert_eq!(docs_a, docs_b, "{query} via {:?}", algorithm);
        }
    }
}

#[test]
fn test_layered_early_termination_single_term() {
    let dir = tempfile::tempdir().unwrap();
    let flat = build_toy_index(&dir.path().join("toy"), false);
    let layered = layerify(
        &flat,
        &dir.path().join("layered"),
        2,
        true,
        LayerSplitMode::PercentageFixedBounded,
    );

    let mut processor = open_processor(&layered, QueryAlgorithm::LayeredOverlap, 1);
    let response = processor.run_query("alpha").unwrap();
    assert_eq!(response.results.len(), 1);
    assert!(response.early_terminated);
    assert_eq!(processor.stats().num_early_terminated_queries, 1);

    // Rank safety: the early-terminated result matches the exact answer.
    let mut exact = open_processor(&flat, QueryAlgorithm::DaatAnd, 1);
    let expected = exact.run_query("alpha").unwrap();
    assert_eq!(response.results[0].doc_id, expected.results[0].doc_id);
}

#[test]
fn test_two_tier_wand_and_maxscore_match_or() {
    let dir = tempfile::tempdir().unwrap();
    let flat = random_text_index(dir.path(), 8, 250);
    let layered = layerify(
        &flat,
        &dir.path().join("layered"),
        2,
        true,
        LayerSplitMode::PercentageFixedBounded,
    );

    for query in ["alpha beta", "gamma delta epsilon", "iota kappa"] {
        let mut or = open_processor(&flat, QueryAlgorithm::DaatOr, 10);
        let expected = or.run_query(query).unwrap();
        let docs_expected: Vec<u32> = expected.results.iter().map(|r| r.doc_id).collect();

        for algorithm in [QueryAlgorithm::Wand2, QueryAlgorithm::MaxScore2] {
            let mut processor = open_processor(&layered, algorithm, 10);
            let response = processor.run_query(query).unwrap();
            let docs: Vec<u32> = response.results.iter().map(|r| r.doc_id).collect();
            assert_eq!(docs, docs_expected, "{query} via {:?}", algorithm);
            for (a, b) in response.results.iter().zip(expected.results.iter()) {
                assert!((a.score - b.score).abs() < 1e-4);
            }
        }
    }
}

#[test]
fn test_layered_taat_is_rank_safe() {
    let dir = tempfile::tempdir().unwrap();
    let flat = random_text_index(dir.path(), 9, 250);
    let layered = layerify(
        &flat,
        &dir.path().join("layered"),
        3,
        false,
        LayerSplitMode::PercentageFixedBounded,
    );

    for query in ["alpha beta", "gamma delta epsilon", "theta iota"] {
        let mut or = open_processor(&flat, QueryAlgorithm::DaatOr, 10);
        let expected = or.run_query(query).unwrap();
        let docs_expected: Vec<u32> = expected.results.iter().map(|r| r.doc_id).collect();

        let mut taat = open_processor(&layered, QueryAlgorithm::LayeredTaat, 10);
        let response = taat.run_query(query).unwrap();
        let docs: Vec<u32> = response.results.iter().map(|r| r.doc_id).collect();
        assert_eq!(docs, docs_expected, "{query}");
    }
}

#[test]
fn test_exponential_split_mode_roundtrips() {
    let dir = tempfile::tempdir().unwrap();
    let flat = random_text_index(dir.path(), 10, 200);
    let layered = layerify(
        &flat,
        &dir.path().join("layered"),
        2,
        false,
        LayerSplitMode::ExponentiallyIncreasing,
    );

    let mut on_flat = open_processor(&flat, QueryAlgorithm::DaatOr, 10);
    let mut on_layered = open_processor(&layered, QueryAlgorithm::LayeredTaat, 10);
    let a = on_flat.run_query("alpha beta").unwrap();
    let b = on_layered.run_query("alpha beta").unwrap();
    let docs_a: Vec<u32> = a.results.iter().map(|r| r.doc_id).collect();
    let docs_b: Vec<u32> = b.results.iter().map(|r| r.doc_id).collect();
    assert_eq!(docs_a, docs_b);
}

#[test]
fn test_default_algorithm_resolution() {
    let dir = tempfile::tempdir().unwrap();
    let flat = random_text_index(dir.path(), 12, 100);
    let processor = open_processor(&flat, QueryAlgorithm::Default, 10);
    assert_eq!(processor.algorithm(), QueryAlgorithm::DaatAnd);

    let layered = layerify(
        &flat,
        &dir.path().join("layered"),
        2,
        false,
        LayerSplitMode::PercentageFixedBounded,
    );
    let processor = open_processor(&layered, QueryAlgorithm::Default, 10);
    assert_eq!(processor.algorithm(), QueryAlgorithm::LayeredTaat);

    // A non-overlapping layered index rejects plain DAAT.
    let config = Config {
        max_num_results: 10,
        ..Config::default()
    };
    assert!(QueryProcessor::new(&layered, config, QueryAlgorithm::DaatAnd, None).is_err());
}
