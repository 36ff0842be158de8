//! Dual-layered overlapping DAAT evaluation.
//!
//! Every query term carries at most two overlapping layers: layer 0 is the
//! short top-scoring prefix, the last layer is the whole list. Candidates
//! are produced from the top layers, and the result is final only if the
//! k-th candidate score beats the sum of the last-layer thresholds;
//! otherwise the query falls back to a standard intersection of the last
//! layers.

use crate::error::Result;
use crate::lexicon::LexiconEntry;
use crate::query::intersect::intersect_lists;
use crate::query::score::{sort_results, SearchResult};
use crate::query::{EvalStats, ScoreContext};
use crate::reader::{IndexReader, ListData};

pub(crate) struct LayeredOutcome {
    pub results: Vec<SearchResult>,
    pub total: u64,
    pub early_terminated: bool,
    /// Some term had a single layer, so only the standard intersection ran.
    pub single_layer_terms: bool,
    /// Whether the k-th candidate beat the threshold (when checked).
    pub kth_meets_threshold: Option<bool>,
    /// Too few candidates: `Some(true)` = definitely too few results
    /// overall, `Some(false)` = possibly enough after the fallback.
    pub not_enough: Option<bool>,
}

pub(crate) fn process_layered_query(
    reader: &IndexReader,
    ctx: &ScoreContext<'_>,
    entries: &[LexiconEntry],
    k: usize,
    merge_variant: bool,
    stats: &mut EvalStats,
) -> Result<LayeredOutcome> {
    let n = entries.len();
    let single_term = n == 1;
    let single_layer_terms = entries.iter().any(|e| e.num_layers() == 1);

    let mut outcome = LayeredOutcome {
        results: Vec::new(),
        total: 0,
        early_terminated: false,
        single_layer_terms,
        kth_meets_threshold: None,
        not_enough: None,
    };
    let mut run_standard = false;

    if single_layer_terms {
        // A single-layer term already spans its whole list, so one
        // intersection over the last layers answers the query exactly.
        outcome.early_terminated = true;
        run_standard = true;
    } else {
        let (results, total) = if merge_variant && n > 2 {
            // Merge all the top layers into a virtual docID stream and use
            // it to drive lookups into all the full layers at once.
            let mut first = open_layers(reader, entries, 0, single_term)?;
            let mut last = open_last_layers(reader, entries, single_term)?;
            last.sort_by_key(|l| l.num_docs());
            intersect_lists(ctx, Some(&mut first), &mut last, k, stats)?
        } else {
            // Intersect each term's top layer with the full layers of the
            // others, then merge the result sets.
            let mut all: Vec<SearchResult> = Vec::new();
            let mut total = 0u64;
            for i in 0..n {
                let mut lists: Vec<ListData<'_>> = Vec::with_capacity(n);
                for (j, entry) in entries.iter().enumerate() {
                    let layer = if j == i { 0 } else { entry.num_layers() - 1 };
                    lists.push(reader.open_list(entry, layer, single_term, j)?);
                }
                lists.sort_by_key(|l| l.num_docs());
                let (res, tot) = intersect_lists(ctx, None, &mut lists, k, stats)?;
                total += tot;
                all.extend(res);
            }
            // The same docID appears in several intersections, possibly
            // with rounding-different scores; keep one per docID.
            all.sort_by(|a, b| {
                a.doc_id.cmp(&b.doc_id).then(
                    b.score
                        .partial_cmp(&a.score)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
            });
            all.dedup_by_key(|r| r.doc_id);
            sort_results(&mut all);
            all.truncate(k);
            (all, total)
        };
        outcome.results = results;
        outcome.total = total;

        if outcome.results.len() >= k {
            let remaining_upper: f32 = entries
                .iter()
                .map(|e| e.layer(e.num_layers() - 1).score_threshold)
                .sum();
            let kth_score = outcome.results[k - 1].score;
            if kth_score > remaining_upper {
                outcome.kth_meets_threshold = Some(true);
                outcome.early_terminated = true;
            } else {
                outcome.kth_meets_threshold = Some(false);
                run_standard = true;
            }
        } else {
            outcome.not_enough = Some(outcome.total < k as u64);
            run_standard = true;
        }
    }

    if run_standard {
        let mut last = open_last_layers(reader, entries, single_term)?;
        last.sort_by_key(|l| l.num_docs());
        let (results, total) = intersect_lists(ctx, None, &mut last, k, stats)?;
        outcome.results = results;
        outcome.total = total;
    }
    Ok(outcome)
}

pub(crate) fn open_layers<'r>(
    reader: &'r IndexReader,
    entries: &[LexiconEntry],
    layer_num: usize,
    single_term: bool,
) -> Result<Vec<ListData<'r>>> {
    entries
        .iter()
        .enumerate()
        .map(|(i, e)| reader.open_list(e, layer_num, single_term, i))
        .collect()
}

pub(crate) fn open_last_layers<'r>(
    reader: &'r IndexReader,
    entries: &[LexiconEntry],
    single_term: bool,
) -> Result<Vec<ListData<'r>>> {
    entries
        .iter()
        .enumerate()
        .map(|(i, e)| reader.open_list(e, e.num_layers() - 1, single_term, i))
        .collect()
}
