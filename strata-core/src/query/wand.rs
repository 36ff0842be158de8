//! WAND: pivot-based ranked union with term score upper bounds.
//!
//! Cursors sort by current docID each round; the pivot is the first
//! position where the cumulative upper bound reaches the top-k threshold.
//! When the pivot docID is already at the front, the document is fully
//! scored; otherwise every cursor before the pivot advances to it (the
//! mWAND variant, which trades some skipping for fewer sorts).

use crate::error::Result;
use crate::query::score::{SearchResult, TopKResults};
use crate::query::{EvalStats, ScoreContext};
use crate::reader::{ListData, NO_MORE_DOCS};

/// `upper_bounds[i]` is the score upper bound for the whole list behind
/// `lists[i]`. `seed_threshold` comes from a two-tier top-docs pass (zero
/// for plain WAND).
pub(crate) fn wand(
    ctx: &ScoreContext<'_>,
    lists: &mut [ListData<'_>],
    upper_bounds: &[f32],
    k: usize,
    seed_threshold: f32,
    stats: &mut EvalStats,
) -> Result<(Vec<SearchResult>, u64)> {
    let idf: Vec<f32> = lists.iter().map(|l| ctx.idf(l)).collect();
    let mut top = TopKResults::new(k);
    let mut threshold = seed_threshold;
    let mut total = 0u64;

    let mut postings: Vec<(u32, usize)> = Vec::with_capacity(lists.len());
    for (i, list) in lists.iter_mut().enumerate() {
        let d = list.next_geq(0)?;
        if d < NO_MORE_DOCS {
            postings.push((d, i));
        }
    }

    while !postings.is_empty() {
        postings.sort_by_key(|&(d, _)| d);

        // Pivot selection: cumulative upper bound reaches the threshold.
        let mut pivot: Option<u32> = None;
        let mut weight = 0.0f32;
        for &(d, li) in postings.iter() {
            weight += upper_bounds[li];
            if weight >= threshold {
                pivot = Some(d);
                break;
            }
        }
        // No pivot: no unseen docID can enter the top-k.
        let pivot_doc = match pivot {
            Some(d) if d < NO_MORE_DOCS => d,
            _ => break,
        };

        if pivot_doc == postings[0].0 {
            // Enough weight behind the pivot; score every cursor on it.
            let doc_len = ctx.docmap.doc_len(pivot_doc);
            let mut score = 0.0;
            let mut i = 0;
            while i < postings.len() && postings[i].0 == pivot_doc {
                let li = postings[i].1;
                let freq = lists[li].get_freq()?;
                score += ctx.bm25.partial(idf[li], freq, doc_len);
                stats.postings_scored += 1;
                let next = lists[li].next_geq(pivot_doc.saturating_add(1))?;
                if next == NO_MORE_DOCS {
                    postings.remove(i);
                    continue;
                }
                postings[i].0 = next;
                i += 1;
            }
            top.push(pivot_doc, score);
            total += 1;
            threshold = threshold.max(top.threshold_or_zero());
        } else {
            // Not enough weight yet: advance every cursor before the pivot
            // at least to the pivot docID.
            let mut i = 0;
            while i < postings.len() && postings[i].0 < pivot_doc {
                let li = postings[i].1;
                let next = lists[li].next_geq(pivot_doc)?;
                if next == NO_MORE_DOCS {
                    postings.remove(i);
                    continue;
                }
                postings[i].0 = next;
                stats.postings_skipped += 1;
                i += 1;
            }
        }
    }

    Ok((top.into_sorted(), total))
}
