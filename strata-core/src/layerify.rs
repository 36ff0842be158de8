//! Rewrites a single-layer index into a layered one.
//!
//! Each inverted list is loaded whole, sorted by descending BM25 partial
//! score, split into up to `MAX_LIST_LAYERS` layers, and re-emitted in
//! docID order with a per-layer score threshold and per-chunk max scores.
//! Successive thresholds are strictly decreasing: postings that tie the
//! boundary score migrate up into the higher layer, which is what keeps
//! the early-terminating evaluators rank-safe. The input index is never
//! mutated.

use std::cmp::Ordering;
use std::sync::Arc;

use log::{error, info, warn};

use crate::builder::IndexBuilder;
use crate::cache::MergingCache;
use crate::coding::CodingPolicy;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::layout::{CHUNK_SIZE, MAX_LIST_LAYERS};
use crate::meta::{keys, IndexFiles, IndexMeta};
use crate::query::score::Bm25;
use crate::reader::{IndexReader, Purpose, NO_MORE_DOCS};

/// How list postings are divided across layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerSplitMode {
    /// Fixed percentage of the list per layer, from the top.
    Percentage,
    /// Percentage capped by a per-layer absolute maximum.
    PercentageFixedBounded,
    /// Bucket sizes `(b-1) * b^i` with `b = n^(1/L)`, floored by per-layer
    /// minimums.
    ExponentiallyIncreasing,
}

const LAYER_PERCENTAGES: [usize; MAX_LIST_LAYERS] = [5, 5, 10, 15, 25, 40, 0, 0];
/// Per-layer posting caps for `PercentageFixedBounded`; 0 means unbounded.
const LAYER_MAX_SIZES: [usize; MAX_LIST_LAYERS] = [1024, 8192, 0, 0, 0, 0, 0, 0];
/// Per-layer floors for `ExponentiallyIncreasing`; 0 means no floor.
const LAYER_MIN_SIZES: [usize; MAX_LIST_LAYERS] =
    [1024, 2048, 4096, 8192, 16384, 32768, 65536, 131072];

struct ScoredPosting {
    doc_id: u32,
    frequency: u32,
    score: f32,
}

pub struct LayeredIndexGenerator {
    input: IndexReader,
    input_files: IndexFiles,
    output_files: IndexFiles,
    builder: IndexBuilder,
    doc_id_coder: CodingPolicy,
    frequency_coder: CodingPolicy,
    position_coder: CodingPolicy,
    overlapping: bool,
    num_layers: usize,
    split_mode: LayerSplitMode,
    bm25: Bm25,
    total_docs: u64,
}

impl LayeredIndexGenerator {
    pub fn new(
        input_files: &IndexFiles,
        output_files: IndexFiles,
        config: &Config,
        split_mode: LayerSplitMode,
    ) -> Result<Self> {
        config.validate()?;
        let cache = Arc::new(MergingCache::open(&input_files.index())?);
        let input = IndexReader::open(input_files, Purpose::Merge, cache, false, None)?;

        if input.includes_positions() {
            return Err(Error::Config(
                "layered indices with positions are not supported".to_string(),
            ));
        }

        let meta = input.meta();
        let doc_id_coder = CodingPolicy::from_name(meta.string(keys::INDEX_DOC_ID_CODING)?)?;
        let frequency_coder = CodingPolicy::from_name(meta.string(keys::INDEX_FREQUENCY_CODING)?)?;
        let position_coder = CodingPolicy::from_name(meta.string(keys::INDEX_POSITION_CODING)?)?;
        let header_coder = CodingPolicy::from_name(meta.string(keys::INDEX_BLOCK_HEADER_CODING)?)?;

        let builder = IndexBuilder::new(
            &output_files.index(),
            &output_files.lexicon(),
            header_coder,
        )?;

        let bm25 = Bm25::new(input.collection_average_doc_len());
        let total_docs = input.collection_total_num_docs();

        Ok(Self {
            input,
            input_files: input_files.clone(),
            output_files,
            builder,
            doc_id_coder,
            frequency_coder,
            position_coder,
            overlapping: config.overlapping_layers,
            num_layers: config.num_layers,
            split_mode,
            bm25,
            total_docs,
        })
    }

    pub fn create_layered_index(&mut self) -> Result<()> {
        info!("creating layered index ({} layers)", self.num_layers);
        loop {
            let entry = match self.input.lexicon_mut().next_entry()? {
                Some(entry) => entry,
                None => break,
            };
            let postings = self.load_list(&entry)?;
            self.layer_list(&entry.term, postings)?;
        }
        self.builder.finalize()?;
        self.builder
            .write_external_index(&self.output_files.external_index())?;
        self.copy_document_map()?;
        self.write_meta()?;
        info!("finished creating layered index");
        Ok(())
    }

    /// Drain one full list into memory and attach BM25 partial scores.
    fn load_list(&mut self, entry: &crate::lexicon::LexiconEntry) -> Result<Vec<ScoredPosting>> {
        let mut list = self.input.open_list(entry, 0, true, 0)?;
        let idf = Bm25::idf(self.total_docs, list.num_docs_complete_list() as u64);
        let mut postings = Vec::with_capacity(list.num_docs() as usize);
        let mut target = 0u32;
        loop {
            let doc_id = list.next_geq(target)?;
            if doc_id == NO_MORE_DOCS {
                break;
            }
            let frequency = list.get_freq()?;
            let doc_len = self.input.document_map().doc_len(doc_id);
            postings.push(ScoredPosting {
                doc_id,
                frequency,
                score: self.bm25.partial(idf, frequency, doc_len),
            });
            if doc_id == u32::MAX - 1 {
                break;
            }
            target = doc_id + 1;
        }
        Ok(postings)
    }

    fn split_size(&self, layer: usize, total: usize, base: f32) -> usize {
        match self.split_mode {
            LayerSplitMode::Percentage => LAYER_PERCENTAGES[layer] * total / 100,
            LayerSplitMode::PercentageFixedBounded => {
                let mut n = LAYER_PERCENTAGES[layer] * total / 100;
                if LAYER_MAX_SIZES[layer] != 0 {
                    n = n.min(LAYER_MAX_SIZES[layer]);
                }
                n
            }
            LayerSplitMode::ExponentiallyIncreasing => {
                let mut n = ((base - 1.0) * base.powi(layer as i32)) as usize;
                if LAYER_MIN_SIZES[layer] != 0 {
                    n = n.max(LAYER_MIN_SIZES[layer]);
                }
                n
            }
        }
    }

    /// Split one score-sorted list into layers and emit them.
    fn layer_list(&mut self, term: &[u8], mut postings: Vec<ScoredPosting>) -> Result<()> {
        postings.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.doc_id.cmp(&b.doc_id))
        });

        let total = postings.len();
        let base = (total as f32).powf(1.0 / self.num_layers as f32);
        let mut num_left = total;

        for layer in 0..self.num_layers {
            if num_left == 0 {
                break;
            }
            let mut n = self.split_size(layer, total, base).min(num_left).max(1);
            if n < CHUNK_SIZE && num_left >= CHUNK_SIZE {
                n = CHUNK_SIZE;
            }
            num_left -= n;
            if layer == self.num_layers - 1 && num_left > 0 {
                n += num_left;
                num_left = 0;
            }

            // Boundary fixup: the next layer's threshold must be strictly
            // below this layer's, so equal-scoring postings migrate up.
            while layer < self.num_layers - 1 && num_left > 0 {
                let curr_start = total - num_left - n;
                let next_start = total - num_left;
                if postings[curr_start].score <= postings[next_start].score {
                    n += 1;
                    num_left -= 1;
                } else {
                    break;
                }
            }

            let curr_start = total - num_left - n;
            let layer_start = if self.overlapping { 0 } else { curr_start };
            let threshold = postings[curr_start].score;

            let mut layer_postings: Vec<(u32, u32, f32)> = postings[layer_start..curr_start + n]
                .iter()
                .map(|p| (p.doc_id, p.frequency, p.score))
                .collect();
            layer_postings.sort_by_key(|&(doc_id, _, _)| doc_id);
            self.emit_layer(term, &layer_postings)?;
            self.builder.finalize_layer(threshold)?;
        }
        Ok(())
    }

    /// Emit one docID-sorted layer as chunks.
    fn emit_layer(&mut self, term: &[u8], postings: &[(u32, u32, f32)]) -> Result<()> {
        let mut prev_chunk_last = 0u32;
        let mut prev_doc_id: Option<u32> = None;
        for chunk in postings.chunks(CHUNK_SIZE) {
            let mut gaps = Vec::with_capacity(chunk.len());
            let mut frequencies = Vec::with_capacity(chunk.len());
            let mut max_score = f32::MIN;
            let mut prev = prev_chunk_last;
            for &(doc_id, frequency, score) in chunk {
                if prev_doc_id == Some(doc_id) {
                    return Err(Error::Format(format!(
                        "duplicate docID {doc_id} while layering list"
                    )));
                }
                prev_doc_id = Some(doc_id);
                gaps.push(doc_id - prev);
                frequencies.push(frequency);
                max_score = max_score.max(score);
                prev = doc_id;
            }
            let mut encoder = crate::postings::ChunkEncoder::new(
                &gaps,
                &frequencies,
                None,
                prev_chunk_last,
                &self.doc_id_coder,
                &self.frequency_coder,
                &self.position_coder,
            )?;
            encoder.set_max_score(max_score);
            prev_chunk_last = encoder.last_doc_id();
            self.builder.add(term, encoder)?;
        }
        Ok(())
    }

    /// The layered index shares the collection's document map; carry the
    /// files over so the output prefix is self-contained.
    fn copy_document_map(&self) -> Result<()> {
        std::fs::copy(
            self.input_files.document_map_basic(),
            self.output_files.document_map_basic(),
        )?;
        std::fs::copy(
            self.input_files.document_map_extended(),
            self.output_files.document_map_extended(),
        )?;
        let remap = self.input_files.doc_id_remapping();
        if remap.exists() {
            std::fs::copy(remap, self.output_files.doc_id_remapping())?;
        }
        Ok(())
    }

    fn write_meta(&self) -> Result<()> {
        let input_meta = self.input.meta();
        let mut meta = IndexMeta::new();
        meta.set_bool(keys::LAYERED_INDEX, true);
        meta.set(keys::NUM_LAYERS, self.num_layers);
        meta.set_bool(keys::OVERLAPPING_LAYERS, self.overlapping);
        meta.set_bool(keys::INCLUDES_POSITIONS, false);
        meta.set_bool(keys::INCLUDES_CONTEXTS, self.input.includes_contexts());
        meta.set(keys::INDEX_DOC_ID_CODING, self.doc_id_coder.name());
        meta.set(keys::INDEX_FREQUENCY_CODING, self.frequency_coder.name());
        meta.set(keys::INDEX_POSITION_CODING, self.position_coder.name());
        meta.set(
            keys::INDEX_BLOCK_HEADER_CODING,
            input_meta.string(keys::INDEX_BLOCK_HEADER_CODING)?,
        );

        // Collection-wide counters carry over from the input unchanged.
        for key in [
            keys::TOTAL_DOCUMENT_LENGTHS,
            keys::TOTAL_NUM_DOCS,
            keys::TOTAL_UNIQUE_NUM_DOCS,
            keys::FIRST_DOC_ID,
            keys::LAST_DOC_ID,
            keys::DOCUMENT_POSTING_COUNT,
        ] {
            if let Some(value) = input_meta.get(key) {
                meta.set(key, value);
            }
        }

        let input_postings = input_meta.numeric_or(keys::INDEX_POSTING_COUNT, 0u64);
        let output_postings = self.builder.posting_count();
        if !self.overlapping && input_postings != output_postings {
            error!(
                "index posting count mismatch after layering: input {input_postings}, output {output_postings}"
            );
        } else if self.overlapping && input_postings > output_postings {
            warn!(
                "overlapping layered index holds fewer postings than its input: input {input_postings}, output {output_postings}"
            );
        }

        self.builder.fill_meta(&mut meta);
        meta.write(&self.output_files.meta())
    }
}
