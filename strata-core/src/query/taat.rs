//! Term-at-a-time evaluation over a non-overlapping layered index, with
//! accumulator pruning and early termination.
//!
//! Layers from every term are processed in descending score-threshold
//! order. Processing starts in OR mode (new accumulators may be created)
//! and switches to AND mode once the sum of the remaining layer thresholds
//! drops below the running top-k threshold. After each layer,
//! accumulators whose upper bound cannot reach the threshold are pruned;
//! evaluation stops early once no accumulator below the threshold can
//! cross it and the ones above it can no longer reorder.
//!
//! Rank safe but not score safe: reported scores may be partial.

use crate::error::Result;
use crate::query::score::{sort_results, KthScore, SearchResult};
use crate::query::{EvalStats, ScoreContext};
use crate::reader::{ListData, NO_MORE_DOCS};

#[derive(Debug, Clone, Copy)]
struct Accumulator {
    doc_id: u32,
    curr_score: f32,
    /// Bit t is set once term t has contributed to `curr_score`.
    term_bitmap: u32,
}

/// `layers` holds every layer of every query term, sorted by descending
/// score threshold; `ListData::term_num` maps each layer back to its term.
/// Returns the top-k, the total accumulator count bound, and whether the
/// evaluation early-terminated.
pub(crate) fn layered_taat(
    ctx: &ScoreContext<'_>,
    layers: &mut [ListData<'_>],
    num_terms: usize,
    k: usize,
    stats: &mut EvalStats,
) -> Result<(Vec<SearchResult>, u64, bool)> {
    debug_assert!(num_terms <= 32);
    let idf: Vec<f32> = layers.iter().map(|l| ctx.idf(l)).collect();
    let total_num_results: u64 = layers.iter().map(|l| l.num_docs() as u64).sum();

    let mut accumulators: Vec<Accumulator> = Vec::new();
    let mut threshold = f32::NEG_INFINITY;
    let mut and_mode = false;
    let mut early_terminated = false;

    for i in 0..layers.len() {
        // Upper bound for a document not seen yet: for each term, the
        // threshold of its first unprocessed layer.
        let mut total_remainder = 0.0f32;
        for term in 0..num_terms {
            for layer in layers[i..].iter() {
                if layer.term_num() == term {
                    total_remainder += layer.score_threshold();
                    break;
                }
            }
        }
        if total_remainder < threshold {
            and_mode = true;
        }

        debug_assert!(accumulators.windows(2).all(|w| w[0].doc_id <= w[1].doc_id));
        threshold = if and_mode {
            process_layer_and(ctx, &mut layers[i], idf[i], &mut accumulators, k, stats)?
        } else {
            process_layer_or(ctx, &mut layers[i], idf[i], &mut accumulators, k, stats)?
        };

        // Per-term upper bound over the layers still to come.
        let mut term_bounds = [0.0f32; 32];
        for (term, bound) in term_bounds.iter_mut().enumerate().take(num_terms) {
            for layer in layers[i + 1..].iter() {
                if layer.term_num() == term {
                    *bound = layer.score_threshold();
                    break;
                }
            }
        }

        // Prune accumulators that cannot reach the threshold, compacting
        // in place; meanwhile test the first early-termination condition
        // (no accumulator below the threshold can cross it).
        let mut condition_one = true;
        let mut kept = 0;
        for j in 0..accumulators.len() {
            let acc = accumulators[j];
            let mut upper = acc.curr_score;
            for (term, bound) in term_bounds.iter().enumerate().take(num_terms) {
                if acc.term_bitmap & (1 << term) == 0 {
                    upper += bound;
                }
            }
            if condition_one && acc.curr_score < threshold && upper > threshold {
                condition_one = false;
            }
            if upper >= threshold {
                accumulators[kept] = acc;
                kept += 1;
            }
        }
        accumulators.truncate(kept);

        // Second condition: accumulators above the threshold can no longer
        // change their relative order.
        let mut condition_two = true;
        if condition_one {
            accumulators.sort_by(|a, b| {
                a.curr_score
                    .partial_cmp(&b.curr_score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            for pair in accumulators.windows(2) {
                let mut upper = 0.0f32;
                for (term, bound) in term_bounds.iter().enumerate().take(num_terms) {
                    if pair[0].term_bitmap & (1 << term) == 0 {
                        upper += bound;
                    }
                }
                if pair[0].curr_score == pair[1].curr_score && upper > 0.0 {
                    condition_two = false;
                    break;
                }
                if upper > pair[1].curr_score - pair[0].curr_score {
                    condition_two = false;
                    break;
                }
            }
        }

        if condition_one && condition_two {
            early_terminated = i < layers.len() - 1;
            break;
        }

        accumulators.sort_by_key(|acc| acc.doc_id);
    }

    let mut results: Vec<SearchResult> = accumulators
        .iter()
        .map(|acc| SearchResult {
            doc_id: acc.doc_id,
            score: acc.curr_score,
        })
        .collect();
    sort_results(&mut results);
    results.truncate(k);
    Ok((results, total_num_results, early_terminated))
}

/// OR-mode pass: walk the layer, updating or inserting accumulators.
/// Returns the running top-k threshold.
fn process_layer_or(
    ctx: &ScoreContext<'_>,
    layer: &mut ListData<'_>,
    idf: f32,
    accumulators: &mut Vec<Accumulator>,
    k: usize,
    stats: &mut EvalStats,
) -> Result<f32> {
    let term_bit = 1u32 << layer.term_num();
    let mut kth = KthScore::new(k);
    let mut threshold = f32::NEG_INFINITY;

    let num_sorted = accumulators.len();
    let mut pos = 0usize;
    let mut new_accumulators: Vec<Accumulator> = Vec::new();

    let mut target = 0u32;
    loop {
        let doc_id = layer.next_geq(target)?;
        if doc_id == NO_MORE_DOCS {
            break;
        }
        // Old accumulators passed over still count toward the threshold.
        while pos < num_sorted && accumulators[pos].doc_id < doc_id {
            threshold = kth.insert(accumulators[pos].curr_score);
            pos += 1;
        }

        let freq = layer.get_freq()?;
        let partial = ctx.bm25.partial(idf, freq, ctx.docmap.doc_len(doc_id));
        stats.postings_scored += 1;

        if pos < num_sorted && accumulators[pos].doc_id == doc_id {
            accumulators[pos].curr_score += partial;
            accumulators[pos].term_bitmap |= term_bit;
            threshold = kth.insert(accumulators[pos].curr_score);
            pos += 1;
        } else {
            new_accumulators.push(Accumulator {
                doc_id,
                curr_score: partial,
                term_bitmap: term_bit,
            });
            threshold = kth.insert(partial);
        }

        if doc_id >= u32::MAX - 1 {
            break;
        }
        target = doc_id + 1;
    }

    // New accumulators arrive in ascending docID order; fold them in.
    accumulators.extend(new_accumulators);
    accumulators.sort_by_key(|acc| acc.doc_id);
    Ok(threshold)
}

/// AND-mode pass: only existing accumulators are looked up and updated.
fn process_layer_and(
    ctx: &ScoreContext<'_>,
    layer: &mut ListData<'_>,
    idf: f32,
    accumulators: &mut [Accumulator],
    k: usize,
    stats: &mut EvalStats,
) -> Result<f32> {
    let term_bit = 1u32 << layer.term_num();
    let mut kth = KthScore::new(k);
    let mut threshold = f32::NEG_INFINITY;

    for acc in accumulators.iter_mut() {
        let doc_id = layer.next_geq(acc.doc_id)?;
        if doc_id == acc.doc_id {
            let freq = layer.get_freq()?;
            acc.curr_score += ctx.bm25.partial(idf, freq, ctx.docmap.doc_len(doc_id));
            acc.term_bitmap |= term_bit;
            stats.postings_scored += 1;
        } else {
            stats.postings_skipped += 1;
        }
        threshold = kth.insert(acc.curr_score);
    }
    Ok(threshold)
}
