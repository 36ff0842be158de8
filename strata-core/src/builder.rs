//! Writes an index: packs encoded chunks into fixed-size blocks, emits the
//! streaming lexicon, feeds the external score index, and accumulates the
//! meta file counters.
//!
//! Call order per term: `add` every chunk of a layer (in docID order),
//! `finalize_layer(threshold)` after each layer, then move to the next term
//! (terms must arrive in lexicographic order for the streaming lexicon to
//! be usable in merge mode). `finalize` closes the last block and record.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use byteorder::{LittleEndian, WriteBytesExt};

use crate::coding::{padded_len, CodingPolicy};
use crate::error::{Error, Result};
use crate::external::ExternalIndexBuilder;
use crate::layout::{BLOCK_SIZE, BLOCK_WORDS};
use crate::lexicon::{write_record, LayerInfo};
use crate::meta::{keys, IndexMeta};
use crate::postings::ChunkEncoder;

struct PendingChunk {
    last_doc_id: u32,
    words: Vec<u32>,
}

struct OpenLayer {
    starting_block: u64,
    starting_chunk: u32,
    num_docs: u64,
    num_chunks: u32,
    /// (block id, chunks of this layer in that block), in order.
    blocks: Vec<(u64, u32)>,
    max_chunk_score: f32,
}

pub struct IndexBuilder {
    index_out: BufWriter<File>,
    lexicon_out: BufWriter<File>,
    header_coder: CodingPolicy,
    external: ExternalIndexBuilder,

    pending: Vec<PendingChunk>,
    pending_payload_words: usize,
    curr_block_num: u64,

    curr_term: Vec<u8>,
    finished_layers: Vec<LayerInfo>,
    layer: Option<OpenLayer>,

    total_num_chunks: u64,
    total_num_per_term_blocks: u64,
    index_posting_count: u64,
    num_unique_terms: u64,
    total_header_bytes: u64,
    total_doc_id_bytes: u64,
    total_frequency_bytes: u64,
    total_position_bytes: u64,
    total_wasted_bytes: u64,
}

impl IndexBuilder {
    pub fn new(index_path: &Path, lexicon_path: &Path, header_coder: CodingPolicy) -> Result<Self> {
        Ok(Self {
            index_out: BufWriter::new(File::create(index_path)?),
            lexicon_out: BufWriter::new(File::create(lexicon_path)?),
            header_coder,
            external: ExternalIndexBuilder::new(),
            pending: Vec::new(),
            pending_payload_words: 0,
            curr_block_num: 0,
            curr_term: Vec::new(),
            finished_layers: Vec::new(),
            layer: None,
            total_num_chunks: 0,
            total_num_per_term_blocks: 0,
            index_posting_count: 0,
            num_unique_terms: 0,
            total_header_bytes: 0,
            total_doc_id_bytes: 0,
            total_frequency_bytes: 0,
            total_position_bytes: 0,
            total_wasted_bytes: 0,
        })
    }

    /// Append one chunk of the current layer of `term`.
    pub fn add(&mut self, term: &[u8], chunk: ChunkEncoder) -> Result<()> {
        if self.curr_term != term {
            self.finish_term()?;
            self.curr_term = term.to_vec();
            self.num_unique_terms += 1;
        }

        // Fit check: prelude + coded header for every pending chunk plus
        // this one, plus payloads.
        if !self.pending.is_empty() {
            let header_words = self.measure_header(Some(&chunk));
            let total_words = 2 + header_words + self.pending_payload_words + chunk.size_words();
            if total_words > BLOCK_WORDS {
                self.flush_block()?;
            }
        }
        {
            let header_words = self.measure_header(Some(&chunk));
            if 2 + header_words + self.pending_payload_words + chunk.size_words() > BLOCK_WORDS {
                return Err(Error::Format(
                    "chunk does not fit in an empty block".to_string(),
                ));
            }
        }

        let target_block = self.curr_block_num;
        let chunk_in_block = self.pending.len() as u32;
        let layer = self.layer.get_or_insert_with(|| OpenLayer {
            starting_block: target_block,
            starting_chunk: chunk_in_block,
            num_docs: 0,
            num_chunks: 0,
            blocks: Vec::new(),
            max_chunk_score: 0.0,
        });

        let same_block = matches!(layer.blocks.last(), Some(&(block, _)) if block == target_block);
        if same_block {
            if let Some((_, count)) = layer.blocks.last_mut() {
                *count += 1;
            }
        } else {
            if !layer.blocks.is_empty() {
                self.external.finish_block();
            }
            layer.blocks.push((target_block, 1));
        }
        layer.num_docs += chunk.num_docs() as u64;
        layer.num_chunks += 1;
        layer.max_chunk_score = layer.max_chunk_score.max(chunk.max_score());
        self.external.add_chunk_score(chunk.max_score());

        self.total_num_chunks += 1;
        self.index_posting_count += chunk.num_docs() as u64;
        self.total_doc_id_bytes += chunk.doc_id_words() as u64 * 4;
        self.total_frequency_bytes += chunk.frequency_words() as u64 * 4;
        self.total_position_bytes += chunk.position_words() as u64 * 4;

        self.pending_payload_words += chunk.size_words();
        self.pending.push(PendingChunk {
            last_doc_id: chunk.last_doc_id(),
            words: chunk.words().to_vec(),
        });
        Ok(())
    }

    /// Close the current layer of the current term, recording its score
    /// threshold. Must be called between layers and before `finalize`.
    pub fn finalize_layer(&mut self, score_threshold: f32) -> Result<()> {
        let layer = self
            .layer
            .take()
            .ok_or_else(|| Error::Format("finalize_layer with no open layer".to_string()))?;
        let external_index_offset = self.external.finalize_layer();
        self.total_num_per_term_blocks += layer.blocks.len() as u64;
        self.finished_layers.push(LayerInfo {
            num_docs: layer.num_docs as u32,
            num_chunks: layer.num_chunks,
            num_chunks_last_block: layer.blocks.last().map(|&(_, n)| n).unwrap_or(0),
            num_blocks: layer.blocks.len() as u32,
            block_number: layer.starting_block as u32,
            chunk_number: layer.starting_chunk,
            score_threshold,
            external_index_offset,
            last_doc_ids: None,
        });
        Ok(())
    }

    fn finish_term(&mut self) -> Result<()> {
        let open_threshold = self.layer.as_ref().map(|l| l.max_chunk_score);
        if let Some(threshold) = open_threshold {
            self.finalize_layer(threshold)?;
        }
        if !self.finished_layers.is_empty() {
            write_record(&mut self.lexicon_out, &self.curr_term, &self.finished_layers)?;
            self.finished_layers.clear();
        }
        Ok(())
    }

    fn measure_header(&self, extra: Option<&ChunkEncoder>) -> usize {
        let mut values = Vec::with_capacity(2 * (self.pending.len() + 1));
        for chunk in &self.pending {
            values.push(chunk.last_doc_id);
            values.push(chunk.words.len() as u32);
        }
        if let Some(chunk) = extra {
            values.push(chunk.last_doc_id());
            values.push(chunk.size_words() as u32);
        }
        values.resize(padded_len(values.len(), self.header_coder.block_size()), 0);
        let mut coded = Vec::new();
        self.header_coder.encode(&values, &mut coded)
    }

    fn flush_block(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let mut values = Vec::with_capacity(2 * self.pending.len());
        for chunk in &self.pending {
            values.push(chunk.last_doc_id);
            values.push(chunk.words.len() as u32);
        }
        values.resize(padded_len(values.len(), self.header_coder.block_size()), 0);
        let mut coded = Vec::new();
        self.header_coder.encode(&values, &mut coded);

        let used = 8 + coded.len() * 4 + self.pending_payload_words * 4;
        debug_assert!(used <= BLOCK_SIZE);

        self.index_out
            .write_u32::<LittleEndian>(self.pending.len() as u32)?;
        self.index_out.write_u32::<LittleEndian>(coded.len() as u32)?;
        for word in &coded {
            self.index_out.write_u32::<LittleEndian>(*word)?;
        }
        for chunk in &self.pending {
            for &word in &chunk.words {
                self.index_out.write_u32::<LittleEndian>(word)?;
            }
        }
        for _ in 0..(BLOCK_SIZE - used) / 4 {
            self.index_out.write_u32::<LittleEndian>(0)?;
        }

        self.total_header_bytes += 8 + coded.len() as u64 * 4;
        self.total_wasted_bytes += (BLOCK_SIZE - used) as u64;
        self.pending.clear();
        self.pending_payload_words = 0;
        self.curr_block_num += 1;
        Ok(())
    }

    /// Flush the last term record and block and close the writers.
    pub fn finalize(&mut self) -> Result<()> {
        self.finish_term()?;
        self.flush_block()?;
        self.index_out.flush()?;
        self.lexicon_out.flush()?;
        Ok(())
    }

    pub fn write_external_index(&self, path: &Path) -> Result<()> {
        self.external.write(path)
    }

    pub fn posting_count(&self) -> u64 {
        self.index_posting_count
    }

    pub fn num_unique_terms(&self) -> u64 {
        self.num_unique_terms
    }

    pub fn total_num_blocks(&self) -> u64 {
        self.curr_block_num
    }

    /// Store the builder-derived counters into `meta`.
    pub fn fill_meta(&self, meta: &mut IndexMeta) {
        meta.set(keys::TOTAL_NUM_CHUNKS, self.total_num_chunks);
        meta.set(keys::TOTAL_NUM_PER_TERM_BLOCKS, self.total_num_per_term_blocks);
        meta.set(keys::NUM_UNIQUE_TERMS, self.num_unique_terms);
        meta.set(keys::INDEX_POSTING_COUNT, self.index_posting_count);
        meta.set(keys::TOTAL_HEADER_BYTES, self.total_header_bytes);
        meta.set(keys::TOTAL_DOC_ID_BYTES, self.total_doc_id_bytes);
        meta.set(keys::TOTAL_FREQUENCY_BYTES, self.total_frequency_bytes);
        meta.set(keys::TOTAL_POSITION_BYTES, self.total_position_bytes);
        meta.set(keys::TOTAL_WASTED_BYTES, self.total_wasted_bytes);
    }
}
