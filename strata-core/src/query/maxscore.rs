//! MaxScore: ranked union with suffix-summed term upper bounds.
//!
//! Lists sort by descending upper bound once; each round picks the lowest
//! current docID among the "essential" prefix (lists whose suffix sum can
//! still reach the threshold) and scores it fully, cutting the per-document
//! scoring loop short as soon as the remaining bounds cannot lift it over
//! the threshold. When the external score index is loaded, the current
//! block's bound tightens that cut.

use crate::error::Result;
use crate::query::score::{SearchResult, TopKResults};
use crate::query::{EvalStats, ScoreContext};
use crate::reader::{ListData, NO_MORE_DOCS};

pub(crate) fn max_score(
    ctx: &ScoreContext<'_>,
    lists: &mut [ListData<'_>],
    list_thresholds: &[f32],
    k: usize,
    seed_threshold: f32,
    score_skipping: bool,
    stats: &mut EvalStats,
) -> Result<(Vec<SearchResult>, u64)> {
    let idf: Vec<f32> = lists.iter().map(|l| ctx.idf(l)).collect();
    let mut top = TopKResults::new(k);
    let mut threshold = seed_threshold;
    let mut total = 0u64;

    let mut postings: Vec<u32> = Vec::with_capacity(lists.len());
    for list in lists.iter_mut() {
        postings.push(list.next_geq(0)?);
    }

    // (suffix-summed upper bound, list index), descending by own bound.
    let mut bounds: Vec<(f32, usize)> = postings
        .iter()
        .enumerate()
        .filter(|&(_, &d)| d != NO_MORE_DOCS)
        .map(|(i, _)| (list_thresholds[i], i))
        .collect();
    bounds.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    for i in (0..bounds.len().saturating_sub(1)).rev() {
        bounds[i].0 += bounds[i + 1].0;
    }

    while !bounds.is_empty() {
        // Even the highest-bound list cannot produce a new top-k document.
        if threshold > bounds[0].0 {
            break;
        }

        // Lowest docID among the essential prefix.
        let mut top_pos = 0;
        for i in 1..bounds.len() {
            if threshold > bounds[i].0 {
                break;
            }
            if postings[bounds[i].1] < postings[bounds[top_pos].1] {
                top_pos = i;
            }
        }
        let curr_doc = postings[bounds[top_pos].1];
        if curr_doc == NO_MORE_DOCS {
            break;
        }

        // Score the document fully, looking it up in every list in bound
        // order; stop as soon as the remaining bounds cannot reach the
        // threshold.
        let doc_len = ctx.docmap.doc_len(curr_doc);
        let mut score = 0.0;
        let mut i = 0;
        while i < bounds.len() {
            if threshold > score + bounds[i].0 {
                stats.postings_skipped += (bounds.len() - i) as u64;
                break;
            }
            let li = bounds[i].1;
            if postings[li] < curr_doc {
                postings[li] = lists[li].next_geq(curr_doc)?;
            }
            if score_skipping {
                let rest = if i + 1 < bounds.len() { bounds[i + 1].0 } else { 0.0 };
                if threshold > score + lists[li].get_block_score_bound() + rest {
                    stats.postings_skipped += (bounds.len() - i) as u64;
                    break;
                }
            }
            if postings[li] == curr_doc {
                let freq = lists[li].get_freq()?;
                score += ctx.bm25.partial(idf[li], freq, doc_len);
                stats.postings_scored += 1;
                postings[li] = lists[li].next_geq(curr_doc.saturating_add(1))?;
            }
            if postings[li] == NO_MORE_DOCS {
                remove_list(&mut bounds, i, list_thresholds);
                continue;
            }
            i += 1;
        }

        // Make sure no essential list is still parked on the scored docID
        // (the scoring loop may have cut out early).
        let mut i = 0;
        while i < bounds.len() {
            let li = bounds[i].1;
            if postings[li] == curr_doc {
                postings[li] = lists[li].next_geq(curr_doc.saturating_add(1))?;
                stats.postings_skipped += 1;
                if postings[li] == NO_MORE_DOCS {
                    remove_list(&mut bounds, i, list_thresholds);
                    continue;
                }
            }
            i += 1;
        }

        top.push(curr_doc, score);
        total += 1;
        threshold = threshold.max(top.threshold_or_zero());
    }

    Ok((top.into_sorted(), total))
}

/// Drop list `bounds[i]` and subtract its own bound from every suffix sum
/// in front of it.
fn remove_list(bounds: &mut Vec<(f32, usize)>, i: usize, list_thresholds: &[f32]) {
    let own = list_thresholds[bounds[i].1];
    bounds.remove(i);
    for j in 0..i {
        bounds[j].0 -= own;
    }
}
