//! Ranked union (DAAT-OR), score-complete-doc strategy: each iteration
//! finds the lowest current docID, scores it across every list positioned
//! on it, and advances those lists past it.

use crate::error::Result;
use crate::query::score::{SearchResult, TopKResults};
use crate::query::{EvalStats, ScoreContext};
use crate::reader::{ListData, NO_MORE_DOCS};

pub(crate) fn merge_lists(
    ctx: &ScoreContext<'_>,
    lists: &mut [ListData<'_>],
    k: usize,
    stats: &mut EvalStats,
) -> Result<(Vec<SearchResult>, u64)> {
    let idf: Vec<f32> = lists.iter().map(|l| ctx.idf(l)).collect();
    let mut top = TopKResults::new(k);
    let mut total = 0u64;

    // (current docID, list index); exhausted lists drop out.
    let mut cursors: Vec<(u32, usize)> = Vec::with_capacity(lists.len());
    for (i, list) in lists.iter_mut().enumerate() {
        let d = list.next_geq(0)?;
        if d < NO_MORE_DOCS {
            cursors.push((d, i));
        }
    }

    while !cursors.is_empty() {
        let mut curr = cursors[0].0;
        for &(d, _) in &cursors[1..] {
            if d < curr {
                curr = d;
            }
        }

        let doc_len = ctx.docmap.doc_len(curr);
        let mut score = 0.0;
        let mut i = 0;
        while i < cursors.len() {
            if cursors[i].0 == curr {
                let li = cursors[i].1;
                let freq = lists[li].get_freq()?;
                score += ctx.bm25.partial(idf[li], freq, doc_len);
                stats.postings_scored += 1;
                let next = lists[li].next_geq(curr.saturating_add(1))?;
                if next == NO_MORE_DOCS {
                    cursors.swap_remove(i);
                    continue;
                }
                cursors[i].0 = next;
            }
            i += 1;
        }

        top.push(curr, score);
        total += 1;
    }

    Ok((top.into_sorted(), total))
}
