//! Ranked intersection (DAAT-AND), optionally driven by a set of merge
//! lists whose docID union selects the candidates to look up.

use crate::error::Result;
use crate::query::score::{Bm25, SearchResult, TopKResults};
use crate::query::{EvalStats, ScoreContext};
use crate::reader::{ListData, NO_MORE_DOCS};

/// Intersect `lists` (sorted by ascending `num_docs` by the caller),
/// scoring every docID present in all of them. When `merge_lists` is
/// given, the union of their docIDs drives the intersection instead of the
/// shortest list ("bulk lookup" mode for overlapping layered indices).
/// Returns the top-k and the total number of documents in the
/// intersection.
pub(crate) fn intersect_lists(
    ctx: &ScoreContext<'_>,
    mut merge_lists: Option<&mut [ListData<'_>]>,
    lists: &mut [ListData<'_>],
    k: usize,
    stats: &mut EvalStats,
) -> Result<(Vec<SearchResult>, u64)> {
    let idf: Vec<f32> = lists.iter().map(|l| ctx.idf(l)).collect();
    let mut top = TopKResults::new(k);
    let mut total = 0u64;

    let mut did = 0u32;
    while did < NO_MORE_DOCS {
        let first_list;
        if let Some(merge) = merge_lists.as_deref_mut() {
            // Lowest docID across the merge lists, ignoring anything the
            // AND cursor already skipped past.
            let mut min_doc = NO_MORE_DOCS;
            for list in merge.iter_mut() {
                let d = list.next_geq(did)?;
                if d < min_doc {
                    min_doc = d;
                }
            }
            if min_doc == NO_MORE_DOCS {
                break;
            }
            did = min_doc;
            first_list = 0;
        } else {
            did = lists[0].next_geq(did)?;
            if did == NO_MORE_DOCS {
                break;
            }
            first_list = 1;
        }

        // Look for the same docID in the remaining lists.
        let mut d = did;
        let mut matched = true;
        for list in lists[first_list..].iter_mut() {
            d = list.next_geq(did)?;
            if d != did {
                matched = false;
                break;
            }
        }

        if !matched {
            debug_assert!(d > did);
            did = d;
            continue;
        }

        let doc_len = ctx.docmap.doc_len(did);
        let mut score = 0.0;
        for (i, list) in lists.iter_mut().enumerate() {
            let freq = list.get_freq()?;
            score += ctx.bm25.partial(idf[i], freq, doc_len);
            stats.postings_scored += 1;
        }
        top.push(did, score);
        total += 1;
        did += 1;
    }

    Ok((top.into_sorted(), total))
}

/// Per-result positions: one vector of positions per query list.
pub type ResultPositions = Vec<Vec<u32>>;

/// DAAT-AND that also copies the position vectors of the top-k into a
/// pool. Positions are copied only for documents that enter the top-k.
pub(crate) fn intersect_lists_top_positions(
    ctx: &ScoreContext<'_>,
    lists: &mut [ListData<'_>],
    k: usize,
    stats: &mut EvalStats,
) -> Result<(Vec<SearchResult>, Vec<ResultPositions>, u64)> {
    let idf: Vec<f32> = lists.iter().map(|l| ctx.idf(l)).collect();
    // (result, positions); kept unsorted, min replaced on overflow.
    let mut pool: Vec<(SearchResult, ResultPositions)> = Vec::with_capacity(k);
    let mut total = 0u64;

    let mut did = 0u32;
    while did < NO_MORE_DOCS {
        did = lists[0].next_geq(did)?;
        if did == NO_MORE_DOCS {
            break;
        }
        let mut d = did;
        let mut matched = true;
        for list in lists[1..].iter_mut() {
            d = list.next_geq(did)?;
            if d != did {
                matched = false;
                break;
            }
        }
        if !matched {
            did = d;
            continue;
        }

        let doc_len = ctx.docmap.doc_len(did);
        let mut score = 0.0;
        let mut positions: ResultPositions = Vec::with_capacity(lists.len());
        for (i, list) in lists.iter_mut().enumerate() {
            let freq = list.get_freq()?;
            score += ctx.bm25.partial(idf[i], freq, doc_len);
            stats.postings_scored += 1;
            positions.push(list.current_positions()?.to_vec());
        }

        if pool.len() < k {
            pool.push((SearchResult { doc_id: did, score }, positions));
        } else if let Some(min_idx) = min_pool_entry(&pool) {
            if score > pool[min_idx].0.score {
                pool[min_idx] = (SearchResult { doc_id: did, score }, positions);
            }
        }
        total += 1;
        did += 1;
    }

    pool.sort_by(|a, b| {
        b.0.score
            .partial_cmp(&a.0.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.doc_id.cmp(&b.0.doc_id))
    });
    let (results, positions): (Vec<_>, Vec<_>) = pool.into_iter().unzip();
    Ok((results, positions, total))
}

fn min_pool_entry(pool: &[(SearchResult, ResultPositions)]) -> Option<usize> {
    pool.iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| {
            a.0.score
                .partial_cmp(&b.0.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|(i, _)| i)
}

/// Helper shared by the evaluators: IDF of one list against the
/// collection.
impl ScoreContext<'_> {
    pub(crate) fn idf(&self, list: &ListData<'_>) -> f32 {
        Bm25::idf(self.total_docs, list.num_docs_complete_list() as u64)
    }
}
