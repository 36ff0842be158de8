//! Query parsing, dispatch, and the top-k evaluator family.
//!
//! Frequencies (and positions, if used) are decoded only when an
//! algorithm actually scores a docID. Per-query state lives entirely in
//! the cursors; the processor itself only carries configuration and
//! statistics, so queries run back to back on one reader.

mod intersect;
mod layered;
mod maxscore;
mod merge;
pub mod score;
mod taat;
mod wand;

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, warn};
use rustc_hash::FxHashSet;

use crate::cache::{CacheManager, FullContiguousCache, LruCache, MmapCache};
use crate::config::Config;
use crate::docmap::DocumentMapReader;
use crate::error::{Error, Result};
use crate::external::ExternalIndexReader;
use crate::layout::MAX_QUERY_TERMS;
use crate::lexicon::LexiconEntry;
use crate::meta::{keys, IndexFiles};
use crate::reader::{IndexReader, ListData, Purpose};

pub use intersect::ResultPositions;
pub use score::{Bm25, SearchResult};

/// Default byte budget for the LRU block cache.
const DEFAULT_CACHE_BYTES: usize = 256 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryAlgorithm {
    /// Pick a conservative algorithm for the index type.
    Default,
    DaatAnd,
    DaatOr,
    /// Dual-layered overlapping DAAT, per-term intersections.
    LayeredOverlap,
    /// Dual-layered overlapping DAAT, merged top-layer driver.
    LayeredOverlapMerge,
    /// Layered TAAT with accumulator pruning (non-overlapping layers).
    LayeredTaat,
    Wand,
    /// Two-tier WAND: top-docs pass seeds the threshold.
    Wand2,
    MaxScore,
    /// Two-tier MaxScore.
    MaxScore2,
    DaatAndTopPositions,
}

impl QueryAlgorithm {
    pub fn name(&self) -> &'static str {
        match self {
            QueryAlgorithm::Default => "default",
            QueryAlgorithm::DaatAnd => "daat-and",
            QueryAlgorithm::DaatOr => "daat-or",
            QueryAlgorithm::LayeredOverlap => "layered-overlap",
            QueryAlgorithm::LayeredOverlapMerge => "layered-overlap-merge",
            QueryAlgorithm::LayeredTaat => "layered-taat",
            QueryAlgorithm::Wand => "wand",
            QueryAlgorithm::Wand2 => "wand2",
            QueryAlgorithm::MaxScore => "maxscore",
            QueryAlgorithm::MaxScore2 => "maxscore2",
            QueryAlgorithm::DaatAndTopPositions => "daat-and-top-positions",
        }
    }

    fn and_semantics(&self) -> bool {
        matches!(
            self,
            QueryAlgorithm::DaatAnd
                | QueryAlgorithm::DaatAndTopPositions
                | QueryAlgorithm::LayeredOverlap
                | QueryAlgorithm::LayeredOverlapMerge
        )
    }
}

impl FromStr for QueryAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "default" => Ok(QueryAlgorithm::Default),
            "daat-and" => Ok(QueryAlgorithm::DaatAnd),
            "daat-or" => Ok(QueryAlgorithm::DaatOr),
            "layered-overlap" => Ok(QueryAlgorithm::LayeredOverlap),
            "layered-overlap-merge" => Ok(QueryAlgorithm::LayeredOverlapMerge),
            "layered-taat" => Ok(QueryAlgorithm::LayeredTaat),
            "wand" => Ok(QueryAlgorithm::Wand),
            "wand2" => Ok(QueryAlgorithm::Wand2),
            "maxscore" => Ok(QueryAlgorithm::MaxScore),
            "maxscore2" => Ok(QueryAlgorithm::MaxScore2),
            "daat-and-top-positions" => Ok(QueryAlgorithm::DaatAndTopPositions),
            _ => Err(Error::Config(format!("unknown query algorithm '{s}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryMode {
    Interactive,
    InteractiveSingle,
    Batch,
    BatchAll,
}

impl FromStr for QueryMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "interactive" => Ok(QueryMode::Interactive),
            "interactive-single" => Ok(QueryMode::InteractiveSingle),
            "batch" => Ok(QueryMode::Batch),
            "batch-all" => Ok(QueryMode::BatchAll),
            _ => Err(Error::Config(format!("unknown query mode '{s}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultFormat {
    Trec,
    Normal,
    Compare,
    Discard,
}

impl FromStr for ResultFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "trec" => Ok(ResultFormat::Trec),
            "normal" => Ok(ResultFormat::Normal),
            "compare" => Ok(ResultFormat::Compare),
            "discard" => Ok(ResultFormat::Discard),
            _ => Err(Error::Config(format!("unknown result format '{s}'"))),
        }
    }
}

/// Counters aggregated across the queries a processor has run.
#[derive(Debug, Default, Clone)]
pub struct QueryStats {
    pub total_querying_time: Duration,
    pub total_num_queries: u64,
    pub num_single_term_queries: u64,
    pub num_early_terminated_queries: u64,
    pub not_enough_results_definitely: u64,
    pub not_enough_results_possibly: u64,
    pub num_queries_containing_single_layered_terms: u64,
    pub num_queries_kth_result_meeting_threshold: u64,
    pub num_queries_kth_result_not_meeting_threshold: u64,
    pub num_postings_scored: u64,
    pub num_postings_skipped: u64,
}

/// Outcome of one query.
#[derive(Debug, Default, Clone)]
pub struct QueryResponse {
    /// Top-k, descending by score.
    pub results: Vec<SearchResult>,
    /// Total matching documents seen (may exceed `results.len()`).
    pub total_results: u64,
    pub elapsed: Duration,
    pub early_terminated: bool,
    /// For the top-positions algorithm: per result, per query term, the
    /// positions of the term in that document.
    pub top_positions: Vec<ResultPositions>,
}

/// Per-evaluation scoring context handed to the evaluator functions.
pub(crate) struct ScoreContext<'r> {
    pub bm25: Bm25,
    pub docmap: &'r DocumentMapReader,
    pub total_docs: u64,
}

/// Work counters one evaluation run reports back.
#[derive(Debug, Default)]
pub(crate) struct EvalStats {
    pub postings_scored: u64,
    pub postings_skipped: u64,
}

pub struct QueryProcessor {
    reader: IndexReader,
    config: Config,
    algorithm: QueryAlgorithm,
    stop_words: FxHashSet<String>,
    bm25: Bm25,
    total_docs: u64,
    warm_up: bool,
    stats: QueryStats,
}

impl QueryProcessor {
    pub fn new(
        files: &IndexFiles,
        config: Config,
        algorithm: QueryAlgorithm,
        stop_words_file: Option<&Path>,
    ) -> Result<Self> {
        config.validate()?;

        let cache: Arc<dyn CacheManager> = if config.memory_mapped_index {
            Arc::new(MmapCache::open(&files.index())?)
        } else if config.memory_resident_index {
            Arc::new(FullContiguousCache::open(&files.index())?)
        } else {
            Arc::new(LruCache::open(&files.index(), DEFAULT_CACHE_BYTES)?)
        };

        let external = match algorithm {
            QueryAlgorithm::MaxScore | QueryAlgorithm::MaxScore2 => {
                let path = files.external_index();
                if path.exists() {
                    Some(ExternalIndexReader::open(&path)?)
                } else {
                    warn!(
                        "external index '{}' missing; MaxScore falls back to layer thresholds",
                        path.display()
                    );
                    None
                }
            }
            _ => None,
        };

        let use_positions =
            config.use_positions || algorithm == QueryAlgorithm::DaatAndTopPositions;
        let reader = IndexReader::open(files, Purpose::RandomQuery, cache, use_positions, external)?;

        let meta = reader.meta();
        let index_layered = meta.boolean_or(keys::LAYERED_INDEX, false);
        let index_overlapping = meta.boolean_or(keys::OVERLAPPING_LAYERS, false);
        let index_num_layers = meta.numeric_or(keys::NUM_LAYERS, 1usize);

        let algorithm = match algorithm {
            QueryAlgorithm::Default => {
                if !index_layered || index_overlapping {
                    QueryAlgorithm::DaatAnd
                } else {
                    QueryAlgorithm::LayeredTaat
                }
            }
            other => other,
        };
        validate_algorithm(algorithm, index_layered, index_overlapping, index_num_layers)?;

        let bm25 = Bm25::new(reader.collection_average_doc_len());
        let total_docs = reader.collection_total_num_docs();

        let mut stop_words = FxHashSet::default();
        if let Some(path) = stop_words_file {
            let text = std::fs::read_to_string(path)?;
            stop_words.extend(text.split_whitespace().map(|w| w.to_string()));
        }

        let mut processor = Self {
            reader,
            config,
            algorithm,
            stop_words,
            bm25,
            total_docs,
            warm_up: false,
            stats: QueryStats::default(),
        };

        // With the index resident in memory, random block access is cheap
        // enough that a block-level skip index pays off for everything but
        // pure OR traversal.
        if (processor.config.memory_resident_index || processor.config.memory_mapped_index)
            && processor.algorithm != QueryAlgorithm::DaatOr
        {
            processor.build_block_level_index()?;
        }

        Ok(processor)
    }

    pub fn algorithm(&self) -> QueryAlgorithm {
        self.algorithm
    }

    pub fn max_num_results(&self) -> usize {
        self.config.max_num_results
    }

    pub fn stats(&self) -> &QueryStats {
        &self.stats
    }

    pub fn reader(&self) -> &IndexReader {
        &self.reader
    }

    pub fn doc_url(&self, doc_id: u32) -> &str {
        self.reader.document_map().doc_url(doc_id)
    }

    /// Warm-up queries run normally but are excluded from the statistics.
    pub fn set_warm_up(&mut self, warm_up: bool) {
        self.warm_up = warm_up;
    }

    pub fn reset_reader_stats(&self) {
        self.reader.reset_stats();
    }

    /// Decode every list's block headers once and attach per-layer arrays
    /// of block-final docIDs to the lexicon, enabling block-level skipping
    /// in `next_geq`.
    pub fn build_block_level_index(&mut self) -> Result<()> {
        let entries = self.reader.lexicon().entries();
        for entry in &entries {
            for layer_num in 0..entry.num_layers() {
                let ids = {
                    let mut list = self.reader.open_list(entry, layer_num, true, 0)?;
                    list.block_last_doc_ids()?
                };
                self.reader
                    .lexicon_mut()
                    .attach_last_doc_ids(&entry.term, layer_num, Arc::new(ids));
            }
        }
        self.reader.set_block_skipping_enabled(true);
        self.reader.reset_stats();
        debug!("built block-level index for {} terms", entries.len());
        Ok(())
    }

    /// Normalize a query line into lookup terms: lowercase, stop-word
    /// filtered, deduplicated.
    fn parse_terms(&self, query: &str) -> Vec<String> {
        let mut terms: Vec<String> = query
            .split_whitespace()
            .map(|w| w.to_lowercase())
            .filter(|w| !self.stop_words.contains(w))
            .collect();
        terms.sort();
        terms.dedup();
        terms
    }

    /// Run one query line. Terms missing from the lexicon empty the result
    /// under AND semantics and are elided under OR semantics.
    pub fn run_query(&mut self, query: &str) -> Result<QueryResponse> {
        let start = Instant::now();
        let terms = self.parse_terms(query);
        if terms.is_empty() {
            return Ok(QueryResponse::default());
        }

        let and_semantics = self.algorithm.and_semantics();
        let mut entries: Vec<LexiconEntry> = Vec::with_capacity(terms.len());
        for term in &terms {
            match self.reader.lexicon_mut().get_entry(term.as_bytes()) {
                Some(entry) => entries.push(entry),
                None if and_semantics => return Ok(QueryResponse::default()),
                None => debug!("eliding unknown term '{term}'"),
            }
        }
        if entries.is_empty() {
            return Ok(QueryResponse::default());
        }

        if !self.warm_up && entries.len() == 1 {
            self.stats.num_single_term_queries += 1;
        }

        let k = self.config.max_num_results;
        let ctx = ScoreContext {
            bm25: self.bm25,
            docmap: self.reader.document_map(),
            total_docs: self.total_docs,
        };
        let mut eval = EvalStats::default();
        let mut response = QueryResponse::default();

        match self.algorithm {
            QueryAlgorithm::DaatAnd => {
                let mut lists =
                    layered::open_last_layers(&self.reader, &entries, entries.len() == 1)?;
                lists.sort_by_key(|l| l.num_docs());
                let (results, total) =
                    intersect::intersect_lists(&ctx, None, &mut lists, k, &mut eval)?;
                response.results = results;
                response.total_results = total;
            }
            QueryAlgorithm::DaatOr => {
                let mut lists =
                    layered::open_last_layers(&self.reader, &entries, entries.len() == 1)?;
                let (results, total) = merge::merge_lists(&ctx, &mut lists, k, &mut eval)?;
                response.results = results;
                response.total_results = total;
            }
            QueryAlgorithm::DaatAndTopPositions => {
                let mut lists =
                    layered::open_last_layers(&self.reader, &entries, entries.len() == 1)?;
                lists.sort_by_key(|l| l.num_docs());
                let (results, positions, total) =
                    intersect::intersect_lists_top_positions(&ctx, &mut lists, k, &mut eval)?;
                response.results = results;
                response.top_positions = positions;
                response.total_results = total;
            }
            QueryAlgorithm::LayeredOverlap | QueryAlgorithm::LayeredOverlapMerge => {
                let merge_variant = self.algorithm == QueryAlgorithm::LayeredOverlapMerge;
                let outcome = layered::process_layered_query(
                    &self.reader,
                    &ctx,
                    &entries,
                    k,
                    merge_variant,
                    &mut eval,
                )?;
                if !self.warm_up {
                    if outcome.single_layer_terms {
                        self.stats.num_queries_containing_single_layered_terms += 1;
                    }
                    match outcome.kth_meets_threshold {
                        Some(true) => self.stats.num_queries_kth_result_meeting_threshold += 1,
                        Some(false) => {
                            self.stats.num_queries_kth_result_not_meeting_threshold += 1
                        }
                        None => {}
                    }
                    match outcome.not_enough {
                        Some(true) => self.stats.not_enough_results_definitely += 1,
                        Some(false) => self.stats.not_enough_results_possibly += 1,
                        None => {}
                    }
                }
                response.results = outcome.results;
                response.total_results = outcome.total;
                response.early_terminated = outcome.early_terminated;
            }
            QueryAlgorithm::LayeredTaat => {
                if entries.len() > MAX_QUERY_TERMS {
                    return Err(Error::Query(format!(
                        "layered TAAT supports at most {MAX_QUERY_TERMS} query terms"
                    )));
                }
                let single = entries.len() == 1;
                let mut layers: Vec<ListData<'_>> = Vec::new();
                for (i, entry) in entries.iter().enumerate() {
                    for layer_num in 0..entry.num_layers() {
                        layers.push(self.reader.open_list(entry, layer_num, single, i)?);
                    }
                }
                layers.sort_by(|a, b| {
                    b.score_threshold()
                        .partial_cmp(&a.score_threshold())
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
                let (results, total, early) =
                    taat::layered_taat(&ctx, &mut layers, entries.len(), k, &mut eval)?;
                response.results = results;
                response.total_results = total;
                response.early_terminated = early;
            }
            QueryAlgorithm::Wand | QueryAlgorithm::Wand2 => {
                let two_tier = self.algorithm == QueryAlgorithm::Wand2;
                let (results, total) =
                    run_wand_family(&self.reader, &ctx, &entries, k, two_tier, false, &mut eval)?;
                response.results = results;
                response.total_results = total;
            }
            QueryAlgorithm::MaxScore | QueryAlgorithm::MaxScore2 => {
                let two_tier = self.algorithm == QueryAlgorithm::MaxScore2;
                let (results, total) =
                    run_wand_family(&self.reader, &ctx, &entries, k, two_tier, true, &mut eval)?;
                response.results = results;
                response.total_results = total;
            }
            QueryAlgorithm::Default => unreachable!("resolved at construction"),
        }

        response.elapsed = start.elapsed();
        if !self.warm_up {
            self.stats.total_num_queries += 1;
            self.stats.total_querying_time += response.elapsed;
            self.stats.num_postings_scored += eval.postings_scored;
            self.stats.num_postings_skipped += eval.postings_skipped;
            if response.early_terminated {
                self.stats.num_early_terminated_queries += 1;
            }
        }
        Ok(response)
    }
}

fn validate_algorithm(
    algorithm: QueryAlgorithm,
    layered: bool,
    overlapping: bool,
    num_layers: usize,
) -> Result<()> {
    let appropriate = match algorithm {
        QueryAlgorithm::DaatAnd
        | QueryAlgorithm::DaatOr
        | QueryAlgorithm::Wand
        | QueryAlgorithm::MaxScore
        | QueryAlgorithm::DaatAndTopPositions => !(layered && !overlapping),
        QueryAlgorithm::Wand2
        | QueryAlgorithm::MaxScore2
        | QueryAlgorithm::LayeredOverlap
        | QueryAlgorithm::LayeredOverlapMerge => layered && overlapping && num_layers == 2,
        QueryAlgorithm::LayeredTaat => layered && !overlapping,
        QueryAlgorithm::Default => true,
    };
    if appropriate {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "query algorithm '{}' is not appropriate for this index type",
            algorithm.name()
        )))
    }
}

/// Shared orchestration for WAND and MaxScore (and their 2-tier forms):
/// term upper bounds come from the layer-0 thresholds, candidates from the
/// last layers.
fn run_wand_family<'r>(
    reader: &'r IndexReader,
    ctx: &ScoreContext<'_>,
    entries: &[LexiconEntry],
    k: usize,
    two_tier: bool,
    use_max_score: bool,
    eval: &mut EvalStats,
) -> Result<(Vec<SearchResult>, u64)> {
    if entries.len() == 1 {
        // Pivoting cannot help a single list; run OR on the top layer and
        // fall back to the full layer only when it comes up short.
        let entry = &entries[0];
        {
            let mut lists = vec![reader.open_list(entry, 0, true, 0)?];
            let (results, total) = merge::merge_lists(ctx, &mut lists, k, eval)?;
            if total >= k as u64 || entry.num_layers() == 1 {
                return Ok((results, total));
            }
        }
        let mut lists = vec![reader.open_list(entry, entry.num_layers() - 1, true, 0)?];
        return merge::merge_lists(ctx, &mut lists, k, eval);
    }

    // Whole-list upper bound per term: the top layer's threshold covers
    // every posting in the list, single-layer or overlapping.
    let thresholds: Vec<f32> = entries
        .iter()
        .map(|e| e.layer(0).score_threshold)
        .collect();

    let mut lists = layered::open_layers(reader, entries, 0, false)?;
    let mut seed = 0.0f32;
    if two_tier {
        // Union of the top-docs layers approximates the k-th score from
        // below; unresolved docIDs may still beat it, so this only seeds
        // the threshold and never finalizes results.
        let (results, _total) = merge::merge_lists(ctx, &mut lists, k, eval)?;
        if results.len() >= k {
            seed = results[k - 1].score;
        }
    }
    for (i, entry) in entries.iter().enumerate() {
        if entry.num_layers() == 1 {
            if two_tier {
                lists[i].reset_list()?;
            }
        } else {
            lists[i] = reader.open_list(entry, entry.num_layers() - 1, false, i)?;
        }
    }

    if use_max_score {
        maxscore::max_score(ctx, &mut lists, &thresholds, k, seed, true, eval)
    } else {
        wand::wand(ctx, &mut lists, &thresholds, k, seed, eval)
    }
}
