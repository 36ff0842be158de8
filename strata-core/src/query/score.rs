//! BM25 scoring and top-k bookkeeping.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::{DocId, Score};

/// BM25 k1 parameter: term frequency saturation.
pub const BM25_K1: f32 = 2.0;

/// BM25 b parameter: document length normalization.
pub const BM25_B: f32 = 0.75;

/// Precomputed BM25 components for one collection.
#[derive(Debug, Clone, Copy)]
pub struct Bm25 {
    numerator_mul: f32,
    denominator_add: f32,
    doc_len_mul: f32,
}

impl Bm25 {
    pub fn new(collection_average_doc_len: f32) -> Self {
        Self {
            numerator_mul: BM25_K1 + 1.0,
            denominator_add: BM25_K1 * (1.0 - BM25_B),
            doc_len_mul: BM25_K1 * BM25_B / collection_average_doc_len.max(f32::EPSILON),
        }
    }

    /// IDF of a term appearing in `term_docs` of `total_docs` documents.
    /// Uses the length of the complete list, never a single layer, so
    /// layered and non-layered indices score identically.
    pub fn idf(total_docs: u64, term_docs: u64) -> f32 {
        let n = total_docs as f32;
        let n_t = term_docs as f32;
        (1.0 + (n - n_t + 0.5) / (n_t + 0.5)).log10()
    }

    /// Single-term contribution for one posting.
    #[inline]
    pub fn partial(&self, idf: f32, freq: u32, doc_len: u32) -> Score {
        let f = freq as f32;
        idf * (f * self.numerator_mul)
            / (f + self.denominator_add + self.doc_len_mul * doc_len as f32)
    }
}

/// Min-heap of the k highest scores seen so far; tracks the top-k
/// threshold for the early-terminating evaluators. Returns `-inf` until k
/// scores have been inserted.
pub struct KthScore {
    heap: BinaryHeap<MinScore>,
    k: usize,
}

impl KthScore {
    pub fn new(k: usize) -> Self {
        Self {
            heap: BinaryHeap::with_capacity(k + 1),
            k,
        }
    }

    /// Feed one score and return the updated k-th largest.
    pub fn insert(&mut self, score: Score) -> Score {
        if self.heap.len() < self.k {
            self.heap.push(MinScore(score));
        } else if let Some(min) = self.heap.peek() {
            if score > min.0 {
                self.heap.pop();
                self.heap.push(MinScore(score));
            }
        }
        self.threshold()
    }

    /// The k-th largest score seen, or `-inf` with fewer than k scores.
    pub fn threshold(&self) -> Score {
        if self.heap.len() < self.k {
            f32::NEG_INFINITY
        } else {
            self.heap.peek().map(|m| m.0).unwrap_or(f32::NEG_INFINITY)
        }
    }
}

struct MinScore(Score);

impl PartialEq for MinScore {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for MinScore {}

impl PartialOrd for MinScore {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MinScore {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap is a max-heap, we want the minimum on top.
        other.0.partial_cmp(&self.0).unwrap_or(Ordering::Equal)
    }
}

/// One ranked result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchResult {
    pub doc_id: DocId,
    pub score: Score,
}

struct ResultEntry(SearchResult);

impl PartialEq for ResultEntry {
    fn eq(&self, other: &Self) -> bool {
        self.0.score == other.0.score
    }
}

impl Eq for ResultEntry {}

impl PartialOrd for ResultEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ResultEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap on score alone; score ties keep the earlier insertion.
        other
            .0
            .score
            .partial_cmp(&self.0.score)
            .unwrap_or(Ordering::Equal)
    }
}

/// Top-k result heap: a min-heap of capacity k keyed on score. A new
/// result displaces the minimum only when strictly greater, so equal
/// scores keep the earlier docID.
pub struct TopKResults {
    heap: BinaryHeap<ResultEntry>,
    k: usize,
}

impl TopKResults {
    pub fn new(k: usize) -> Self {
        Self {
            heap: BinaryHeap::with_capacity(k + 1),
            k,
        }
    }

    pub fn push(&mut self, doc_id: DocId, score: Score) {
        if self.heap.len() < self.k {
            self.heap.push(ResultEntry(SearchResult { doc_id, score }));
        } else if let Some(min) = self.heap.peek() {
            if score > min.0.score {
                self.heap.pop();
                self.heap.push(ResultEntry(SearchResult { doc_id, score }));
            }
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Score of the k-th result, or 0 while the heap is not yet full (the
    /// WAND/MaxScore starting threshold).
    pub fn threshold_or_zero(&self) -> Score {
        if self.heap.len() < self.k {
            0.0
        } else {
            self.heap.peek().map(|e| e.0.score).unwrap_or(0.0)
        }
    }

    /// Results in descending score order; ties break toward lower docIDs.
    pub fn into_sorted(self) -> Vec<SearchResult> {
        let mut results: Vec<SearchResult> = self.heap.into_iter().map(|e| e.0).collect();
        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.doc_id.cmp(&b.doc_id))
        });
        results
    }
}

/// Sort a full result set the same way `TopKResults::into_sorted` does.
pub fn sort_results(results: &mut [SearchResult]) {
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.doc_id.cmp(&b.doc_id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kth_score_tracks_kth_largest() {
        let mut kth = KthScore::new(3);
        assert_eq!(kth.insert(5.0), f32::NEG_INFINITY);
        assert_eq!(kth.insert(1.0), f32::NEG_INFINITY);
        assert_eq!(kth.insert(3.0), 1.0);
        assert_eq!(kth.insert(4.0), 3.0);
        assert_eq!(kth.insert(0.5), 3.0);
        assert_eq!(kth.insert(10.0), 4.0);
        assert_eq!(kth.threshold(), 4.0);
    }

    #[test]
    fn test_top_k_keeps_earlier_doc_on_tie() {
        let mut top = TopKResults::new(1);
        top.push(1, 2.5);
        top.push(2, 2.5);
        let results = top.into_sorted();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].doc_id, 1);
    }

    #[test]
    fn test_top_k_orders_descending() {
        let mut top = TopKResults::new(3);
        for (doc, score) in [(4, 0.5), (1, 2.0), (2, 3.0), (3, 1.0), (5, 2.0)] {
            top.push(doc, score);
        }
        let results = top.into_sorted();
        let docs: Vec<u32> = results.iter().map(|r| r.doc_id).collect();
        assert_eq!(docs, vec![2, 1, 5]);
    }

    #[test]
    fn test_idf_matches_reference_value() {
        // log10(1 + 0.5/2.5) = log10(1.2)
        let idf = Bm25::idf(2, 2);
        assert!((idf - 1.2f32.log10()).abs() < 1e-6);
    }
}
