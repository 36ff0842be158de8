//! Shared fixtures: build small on-disk indices for the end-to-end tests.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::Path;

use strata_core::coding::CodingPolicy;
use strata_core::layout::CHUNK_SIZE;
use strata_core::meta::keys;
use strata_core::postings::ChunkEncoder;
use strata_core::query::score::Bm25;
use strata_core::{DocumentMapWriter, IndexBuilder, IndexFiles, IndexMeta};

pub struct CoderNames {
    pub doc_id: &'static str,
    pub frequency: &'static str,
    pub position: &'static str,
    pub block_header: &'static str,
}

impl Default for CoderNames {
    fn default() -> Self {
        Self {
            doc_id: "pfor",
            frequency: "s16",
            position: "vbyte",
            block_header: "s16",
        }
    }
}

pub struct Posting {
    pub doc_id: u32,
    pub frequency: u32,
    pub positions: Vec<u32>,
}

/// One term's full docID-sorted list.
pub type TermLists = BTreeMap<String, Vec<Posting>>;

/// Build a complete single-layer index at `prefix` from raw lists plus the
/// document lengths/URLs. Writes index, lexicon, document map, external
/// index and meta files.
pub fn build_index(
    prefix: &Path,
    lists: &TermLists,
    doc_lens: &[u32],
    urls: &[&str],
    with_positions: bool,
    coders: &CoderNames,
) -> IndexFiles {
    let files = IndexFiles::new(prefix);

    let doc_id_coder = CodingPolicy::from_name(coders.doc_id).unwrap();
    let frequency_coder = CodingPolicy::from_name(coders.frequency).unwrap();
    let position_coder = CodingPolicy::from_name(coders.position).unwrap();
    let header_coder = CodingPolicy::from_name(coders.block_header).unwrap();

    let total_docs: u64 = doc_lens.iter().filter(|&&l| l > 0).count() as u64;
    let total_lengths: u64 = doc_lens.iter().map(|&l| l as u64).sum();
    let avg_doc_len = total_lengths as f32 / total_docs as f32;
    let bm25 = Bm25::new(avg_doc_len);

    let mut builder =
        IndexBuilder::new(&files.index(), &files.lexicon(), header_coder).unwrap();

    let mut first_doc_id = u32::MAX;
    let mut last_doc_id = 0u32;
    let mut document_posting_count = 0u64;
    for (term, postings) in lists {
        assert!(!postings.is_empty());
        let idf = Bm25::idf(total_docs, postings.len() as u64);
        let mut list_threshold = f32::MIN;
        let mut prev_chunk_last = 0u32;
        for chunk in postings.chunks(CHUNK_SIZE) {
            let mut gaps = Vec::with_capacity(chunk.len());
            let mut frequencies = Vec::with_capacity(chunk.len());
            let mut positions = Vec::new();
            let mut max_score = f32::MIN;
            let mut prev = prev_chunk_last;
            for posting in chunk {
                first_doc_id = first_doc_id.min(posting.doc_id);
                last_doc_id = last_doc_id.max(posting.doc_id);
                document_posting_count += posting.frequency as u64;
                gaps.push(posting.doc_id - prev);
                frequencies.push(posting.frequency);
                if with_positions {
                    positions.extend_from_slice(&posting.positions);
                }
                let score = bm25.partial(idf, posting.frequency, doc_lens[posting.doc_id as usize]);
                max_score = max_score.max(score);
                prev = posting.doc_id;
            }
            let mut encoder = ChunkEncoder::new(
                &gaps,
                &frequencies,
                if with_positions { Some(&positions) } else { None },
                prev_chunk_last,
                &doc_id_coder,
                &frequency_coder,
                &position_coder,
            )
            .unwrap();
            encoder.set_max_score(max_score);
            list_threshold = list_threshold.max(max_score);
            prev_chunk_last = encoder.last_doc_id();
            builder.add(term.as_bytes(), encoder).unwrap();
        }
        builder.finalize_layer(list_threshold).unwrap();
    }
    builder.finalize().unwrap();
    builder.write_external_index(&files.external_index()).unwrap();

    DocumentMapWriter::write(
        &files.document_map_basic(),
        &files.document_map_extended(),
        doc_lens,
        urls,
    )
    .unwrap();

    let mut meta = IndexMeta::new();
    meta.set_bool(keys::LAYERED_INDEX, false);
    meta.set(keys::NUM_LAYERS, 1);
    meta.set_bool(keys::OVERLAPPING_LAYERS, false);
    meta.set_bool(keys::INCLUDES_POSITIONS, with_positions);
    meta.set_bool(keys::INCLUDES_CONTEXTS, false);
    meta.set(keys::INDEX_DOC_ID_CODING, coders.doc_id);
    meta.set(keys::INDEX_FREQUENCY_CODING, coders.frequency);
    meta.set(keys::INDEX_POSITION_CODING, coders.position);
    meta.set(keys::INDEX_BLOCK_HEADER_CODING, coders.block_header);
    meta.set(keys::TOTAL_DOCUMENT_LENGTHS, total_lengths);
    meta.set(keys::TOTAL_NUM_DOCS, total_docs);
    meta.set(keys::TOTAL_UNIQUE_NUM_DOCS, total_docs);
    meta.set(keys::FIRST_DOC_ID, first_doc_id);
    meta.set(keys::LAST_DOC_ID, last_doc_id);
    meta.set(keys::DOCUMENT_POSTING_COUNT, document_posting_count);
    builder.fill_meta(&mut meta);
    meta.write(&files.meta()).unwrap();

    files
}

/// Tokenize whitespace-separated documents into per-term lists with
/// 1-based token positions. `docs` holds `(doc_id, url, text)`.
pub fn text_collection(docs: &[(u32, &str, &str)]) -> (TermLists, Vec<u32>, Vec<String>) {
    let max_doc = docs.iter().map(|&(id, _, _)| id).max().unwrap_or(0) as usize;
    let mut doc_lens = vec![0u32; max_doc + 1];
    let mut urls = vec![String::new(); max_doc + 1];

    let mut lists: TermLists = BTreeMap::new();
    for &(doc_id, url, text) in docs {
        let tokens: Vec<&str> = text.split_whitespace().collect();
        doc_lens[doc_id as usize] = tokens.len() as u32;
        urls[doc_id as usize] = url.to_string();

        let mut per_term: BTreeMap<&str, Vec<u32>> = BTreeMap::new();
        for (pos, token) in tokens.iter().enumerate() {
            per_term.entry(token).or_default().push(pos as u32 + 1);
        }
        for (term, positions) in per_term {
            lists.entry(term.to_string()).or_default().push(Posting {
                doc_id,
                frequency: positions.len() as u32,
                positions,
            });
        }
    }
    (lists, doc_lens, urls)
}

/// Build the standard two-document toy collection:
/// doc 1 = "alpha beta beta", doc 2 = "alpha gamma".
pub fn build_toy_index(prefix: &Path, with_positions: bool) -> IndexFiles {
    let (lists, doc_lens, urls) = text_collection(&[
        (1, "http://one.example", "alpha beta beta"),
        (2, "http://two.example", "alpha gamma"),
    ]);
    let url_refs: Vec<&str> = urls.iter().map(|u| u.as_str()).collect();
    build_index(
        prefix,
        &lists,
        &doc_lens,
        &url_refs,
        with_positions,
        &CoderNames::default(),
    )
}
