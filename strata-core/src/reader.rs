//! Low-level index access: opens inverted lists and drives their traversal.
//!
//! The reader owns the cache, the lexicon, the coders and the document map;
//! a `ListData` cursor borrows the reader for its lifetime and owns one
//! block decoder and one in-progress chunk decoder.

use std::cell::Cell;
use std::sync::Arc;

use crate::cache::CacheManager;
use crate::coding::CodingPolicy;
use crate::docmap::DocumentMapReader;
use crate::error::{Error, Result};
use crate::external::{BlockScores, ExternalIndexReader};
use crate::layout::{BLOCK_SIZE, CHUNK_SIZE};
use crate::lexicon::{Lexicon, LexiconEntry};
use crate::meta::{keys, IndexFiles, IndexMeta};
use crate::postings::{BlockDecoder, ChunkDecoder};

/// Sentinel docID: the list holds no docID >= the requested target.
pub const NO_MORE_DOCS: u32 = u32::MAX;

/// What the reader is being opened for. Random mode loads the lexicon into
/// a hash table; merge mode streams it in on-disk order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purpose {
    RandomQuery,
    Merge,
}

pub struct IndexReader {
    cache: Arc<dyn CacheManager>,
    lexicon: Lexicon,
    document_map: DocumentMapReader,
    meta: IndexMeta,

    doc_id_coder: CodingPolicy,
    frequency_coder: CodingPolicy,
    position_coder: CodingPolicy,
    header_coder: CodingPolicy,

    includes_positions: bool,
    includes_contexts: bool,
    use_positions: bool,
    overlapping_layers: bool,
    block_skipping_enabled: bool,

    external: Option<ExternalIndexReader>,

    total_cached_bytes_read: Cell<u64>,
    total_disk_bytes_read: Cell<u64>,
    total_num_lists_accessed: Cell<u64>,
    total_num_blocks_skipped: Cell<u64>,
}

impl IndexReader {
    pub fn open(
        files: &IndexFiles,
        purpose: Purpose,
        cache: Arc<dyn CacheManager>,
        use_positions: bool,
        external: Option<ExternalIndexReader>,
    ) -> Result<Self> {
        let meta = IndexMeta::open(&files.meta())?;
        let doc_id_coder = CodingPolicy::from_name(meta.string(keys::INDEX_DOC_ID_CODING)?)?;
        let frequency_coder = CodingPolicy::from_name(meta.string(keys::INDEX_FREQUENCY_CODING)?)?;
        let position_coder = CodingPolicy::from_name(meta.string(keys::INDEX_POSITION_CODING)?)?;
        let header_coder = CodingPolicy::from_name(meta.string(keys::INDEX_BLOCK_HEADER_CODING)?)?;

        let includes_positions = meta.boolean_or(keys::INCLUDES_POSITIONS, false);
        let includes_contexts = meta.boolean_or(keys::INCLUDES_CONTEXTS, false);
        let overlapping_layers = meta.boolean_or(keys::OVERLAPPING_LAYERS, false);

        let lexicon = match purpose {
            Purpose::RandomQuery => {
                let hint = meta.numeric_or(keys::NUM_UNIQUE_TERMS, 1024usize);
                Lexicon::open_random(&files.lexicon(), hint)?
            }
            Purpose::Merge => Lexicon::open_stream(&files.lexicon())?,
        };

        let remapping = files.doc_id_remapping();
        let document_map = DocumentMapReader::open(
            &files.document_map_basic(),
            &files.document_map_extended(),
            Some(&remapping),
        )?;

        Ok(Self {
            cache,
            lexicon,
            document_map,
            meta,
            doc_id_coder,
            frequency_coder,
            position_coder,
            header_coder,
            includes_positions,
            includes_contexts,
            use_positions: use_positions && includes_positions,
            overlapping_layers,
            block_skipping_enabled: false,
            external,
            total_cached_bytes_read: Cell::new(0),
            total_disk_bytes_read: Cell::new(0),
            total_num_lists_accessed: Cell::new(0),
            total_num_blocks_skipped: Cell::new(0),
        })
    }

    pub fn meta(&self) -> &IndexMeta {
        &self.meta
    }

    pub fn document_map(&self) -> &DocumentMapReader {
        &self.document_map
    }

    pub fn lexicon_mut(&mut self) -> &mut Lexicon {
        &mut self.lexicon
    }

    pub fn lexicon(&self) -> &Lexicon {
        &self.lexicon
    }

    pub fn includes_positions(&self) -> bool {
        self.includes_positions
    }

    pub fn includes_contexts(&self) -> bool {
        self.includes_contexts
    }

    pub fn overlapping_layers(&self) -> bool {
        self.overlapping_layers
    }

    pub fn block_skipping_enabled(&self) -> bool {
        self.block_skipping_enabled
    }

    pub fn set_block_skipping_enabled(&mut self, enabled: bool) {
        self.block_skipping_enabled = enabled;
    }

    pub fn total_index_bytes(&self) -> u64 {
        self.cache.total_index_blocks() * BLOCK_SIZE as u64
    }

    pub fn collection_total_num_docs(&self) -> u64 {
        self.meta.numeric_or(keys::TOTAL_NUM_DOCS, 0u64)
    }

    /// Average document length, in floating point (the scorer's length
    /// normalization divides by this).
    pub fn collection_average_doc_len(&self) -> f32 {
        let total_lengths = self.meta.numeric_or(keys::TOTAL_DOCUMENT_LENGTHS, 0u64);
        let total_docs = self.collection_total_num_docs();
        if total_lengths == 0 || total_docs == 0 {
            1.0
        } else {
            total_lengths as f32 / total_docs as f32
        }
    }

    pub fn total_cached_bytes_read(&self) -> u64 {
        self.total_cached_bytes_read.get()
    }

    pub fn total_disk_bytes_read(&self) -> u64 {
        self.total_disk_bytes_read.get()
    }

    pub fn total_num_lists_accessed(&self) -> u64 {
        self.total_num_lists_accessed.get()
    }

    pub fn total_num_blocks_skipped(&self) -> u64 {
        self.total_num_blocks_skipped.get()
    }

    pub fn reset_stats(&self) {
        self.total_cached_bytes_read.set(0);
        self.total_disk_bytes_read.set(0);
        self.total_num_lists_accessed.set(0);
        self.total_num_blocks_skipped.set(0);
    }

    /// Open a cursor over one layer of one term's list. Out-of-range layer
    /// numbers resolve to the last layer.
    pub fn open_list<'a>(
        &'a self,
        entry: &LexiconEntry,
        layer_num: usize,
        single_term_query: bool,
        term_num: usize,
    ) -> Result<ListData<'a>> {
        let layer_num = layer_num.min(entry.num_layers() - 1);
        let layer = entry.layer(layer_num);
        if layer.num_docs == 0 || layer.num_chunks == 0 || layer.num_blocks == 0 {
            return Err(Error::Format("empty layer in lexicon entry".to_string()));
        }
        let ext_scores = match &self.external {
            Some(ext) => Some(ext.layer_scores(
                layer.external_index_offset,
                layer.num_blocks as usize,
            )?),
            None => None,
        };
        let mut list = ListData {
            reader: self,
            layer_num,
            term_num,
            num_docs: layer.num_docs,
            num_docs_complete_list: entry.num_docs_complete_list(self.overlapping_layers),
            num_chunks: layer.num_chunks,
            num_chunks_last_block: layer.num_chunks_last_block,
            num_blocks: layer.num_blocks,
            initial_block_num: layer.block_number as u64,
            initial_chunk_num: layer.chunk_number as usize,
            score_threshold: layer.score_threshold,
            single_term: single_term_query,
            block_skipping: self.block_skipping_enabled,
            last_doc_ids: layer.last_doc_ids.clone(),
            ext_scores,
            block: BlockDecoder::new(),
            chunk: ChunkDecoder::new(),
            curr_block_idx: 0,
            chunk_entered: false,
            gap_base: 0,
            exhausted: false,
            cached_bytes_read: 0,
            disk_bytes_read: 0,
            num_blocks_skipped: 0,
        };
        list.load_block(0)?;
        Ok(list)
    }
}

/// Cursor over one layer of one inverted list.
pub struct ListData<'a> {
    reader: &'a IndexReader,
    layer_num: usize,
    term_num: usize,

    num_docs: u32,
    num_docs_complete_list: u32,
    num_chunks: u32,
    num_chunks_last_block: u32,
    num_blocks: u32,
    initial_block_num: u64,
    initial_chunk_num: usize,
    score_threshold: f32,
    single_term: bool,
    block_skipping: bool,
    last_doc_ids: Option<Arc<Vec<u32>>>,
    ext_scores: Option<Vec<BlockScores>>,

    block: BlockDecoder,
    chunk: ChunkDecoder,
    curr_block_idx: usize,
    chunk_entered: bool,
    gap_base: u32,
    exhausted: bool,

    cached_bytes_read: u64,
    disk_bytes_read: u64,
    num_blocks_skipped: u32,
}

impl<'a> ListData<'a> {
    fn is_final_block(&self) -> bool {
        self.curr_block_idx + 1 == self.num_blocks as usize
    }

    fn block_starting_chunk(&self, block_idx: usize) -> usize {
        if block_idx == 0 {
            self.initial_chunk_num
        } else {
            0
        }
    }

    /// Header index of the last chunk in the current block that belongs to
    /// this list. In non-final blocks the list runs to the end of the block.
    fn last_ours_chunk(&self) -> usize {
        if self.is_final_block() {
            self.block_starting_chunk(self.curr_block_idx) + self.num_chunks_last_block as usize
                - 1
        } else {
            self.block.num_chunks() - 1
        }
    }

    /// Documents in the chunk at `chunk_idx` of the current block; only the
    /// final chunk of the list may hold fewer than `CHUNK_SIZE`.
    fn chunk_docs(&self, chunk_idx: usize) -> usize {
        let final_chunk = self.is_final_block() && chunk_idx == self.last_ours_chunk();
        if final_chunk {
            let leftover = self.num_docs as usize - (self.num_chunks as usize - 1) * CHUNK_SIZE;
            debug_assert!(leftover >= 1 && leftover <= CHUNK_SIZE);
            leftover
        } else {
            CHUNK_SIZE
        }
    }

    fn load_block(&mut self, block_idx: usize) -> Result<()> {
        let block_num = self.initial_block_num + block_idx as u64;
        self.reader.cache.queue_block(block_num);
        let fetch = self.reader.cache.get_block(block_num)?;
        if fetch.from_disk {
            self.disk_bytes_read += BLOCK_SIZE as u64;
        } else {
            self.cached_bytes_read += BLOCK_SIZE as u64;
        }
        let result = self.block.init(
            fetch.data.bytes(),
            self.block_starting_chunk(block_idx),
            &self.reader.header_coder,
        );
        // The decoder keeps its own copy of the block, so the page can go
        // back to the cache as soon as the parse is done.
        self.reader.cache.free_block(block_num);
        result?;
        self.curr_block_idx = block_idx;
        self.chunk_entered = false;
        if let Some(scores) = &self.ext_scores {
            if let Some(s) = scores.get(block_idx) {
                self.block.set_block_max_score(s.block_max);
            }
        }
        Ok(())
    }

    fn enter_chunk(&mut self) {
        let docs = self.chunk_docs(self.block.curr_chunk());
        self.chunk.reset(docs, self.gap_base);
        if let Some(scores) = &self.ext_scores {
            let ordinal = self.block.curr_chunk() - self.block.starting_chunk();
            if let Some(max) = scores
                .get(self.curr_block_idx)
                .and_then(|b| b.chunk_maxes.get(ordinal))
            {
                self.chunk.set_chunk_max_score(*max);
            }
        }
        self.chunk_entered = true;
    }

    fn advance_chunk(&mut self) {
        self.gap_base = self.block.chunk_last_doc_id(self.block.curr_chunk());
        self.block.advance_curr_chunk();
        self.chunk_entered = false;
    }

    /// Advance to the next block, seeding the gap base from the last chunk
    /// of the block being left.
    fn advance_block(&mut self) -> Result<()> {
        debug_assert!(!self.is_final_block());
        self.gap_base = self.block.chunk_last_doc_id(self.block.num_chunks() - 1);
        let next = self.curr_block_idx + 1;
        self.load_block(next)
    }

    fn exhaust(&mut self) {
        self.exhausted = true;
    }

    /// Smallest docID in the layer >= `target`, or `NO_MORE_DOCS`.
    pub fn next_geq(&mut self, target: u32) -> Result<u32> {
        if self.exhausted {
            return Ok(NO_MORE_DOCS);
        }

        // Block-level skip through the in-memory last-docID array.
        if self.block_skipping && !self.single_term {
            if let Some(ids) = self.last_doc_ids.clone() {
                if target > ids[self.curr_block_idx] {
                    let rest = &ids[self.curr_block_idx + 1..];
                    let p = rest.partition_point(|&d| d < target);
                    if p == rest.len() {
                        self.exhaust();
                        return Ok(NO_MORE_DOCS);
                    }
                    let new_idx = self.curr_block_idx + 1 + p;
                    self.num_blocks_skipped += (new_idx - self.curr_block_idx - 1) as u32;
                    self.gap_base = ids[new_idx - 1];
                    self.load_block(new_idx)?;
                }
            }
        }

        loop {
            // Advance chunks (and blocks, linearly) until the current
            // chunk's last docID reaches the target.
            loop {
                let last_ours = self.last_ours_chunk();
                if self.block.curr_chunk() > last_ours {
                    if self.is_final_block() {
                        self.exhaust();
                        return Ok(NO_MORE_DOCS);
                    }
                    self.advance_block()?;
                    continue;
                }
                if self.block.chunk_last_doc_id(self.block.curr_chunk()) < target {
                    if self.block.curr_chunk() == last_ours && self.is_final_block() {
                        self.exhaust();
                        return Ok(NO_MORE_DOCS);
                    }
                    self.advance_chunk();
                    continue;
                }
                break;
            }

            if !self.chunk_entered {
                self.enter_chunk();
            }
            if !self.chunk.decoded_doc_ids() {
                self.chunk
                    .decode_doc_ids(self.block.curr_chunk_words(), &self.reader.doc_id_coder)?;
            }
            match self.chunk.next_geq_in_chunk(target) {
                Some(doc_id) => return Ok(doc_id),
                None => {
                    if self.block.curr_chunk() == self.last_ours_chunk() && self.is_final_block() {
                        self.exhaust();
                        return Ok(NO_MORE_DOCS);
                    }
                    self.advance_chunk();
                }
            }
        }
    }

    /// Frequency of the current posting. Decodes the frequency stream for
    /// the current chunk on first use.
    pub fn get_freq(&mut self) -> Result<u32> {
        if !self.chunk.decoded_properties() {
            self.chunk
                .decode_frequencies(self.block.curr_chunk_words(), &self.reader.frequency_coder)?;
        }
        Ok(self.chunk.current_frequency())
    }

    /// Number of per-document properties (position count) for the current
    /// posting.
    pub fn get_num_doc_properties(&mut self) -> Result<u32> {
        self.get_freq()
    }

    /// Positions of the current posting; decodes the chunk's position block
    /// lazily and at most once.
    pub fn current_positions(&mut self) -> Result<&[u32]> {
        if !self.reader.use_positions {
            return Err(Error::Query(
                "index was not opened with positions".to_string(),
            ));
        }
        self.get_freq()?;
        self.chunk
            .decode_positions(self.block.curr_chunk_words(), &self.reader.position_coder)?;
        self.chunk.update_properties_offset();
        Ok(self.chunk.current_positions())
    }

    /// Upper bound on any posting's score in the current block.
    pub fn get_block_score_bound(&self) -> f32 {
        self.ext_scores
            .as_ref()
            .and_then(|s| s.get(self.curr_block_idx))
            .map(|b| b.block_max)
            .unwrap_or(self.score_threshold)
    }

    /// Upper bound on any posting's score in the current chunk.
    pub fn get_chunk_score_bound(&self) -> f32 {
        let ordinal = self.block.curr_chunk() - self.block.starting_chunk();
        self.ext_scores
            .as_ref()
            .and_then(|s| s.get(self.curr_block_idx))
            .and_then(|b| b.chunk_maxes.get(ordinal))
            .copied()
            .unwrap_or_else(|| self.get_block_score_bound())
    }

    /// Skip forward to the first block whose score bound exceeds
    /// `min_score` and return its next docID.
    pub fn next_greater_block_score(&mut self, min_score: f32) -> Result<u32> {
        if self.exhausted {
            return Ok(NO_MORE_DOCS);
        }
        while self.get_block_score_bound() <= min_score {
            if self.is_final_block() {
                self.exhaust();
                return Ok(NO_MORE_DOCS);
            }
            self.num_blocks_skipped += 1;
            self.advance_block()?;
        }
        self.next_geq(0)
    }

    /// Skip forward to the first chunk whose score bound exceeds
    /// `min_score` and return its next docID.
    pub fn next_greater_chunk_score(&mut self, min_score: f32) -> Result<u32> {
        if self.exhausted {
            return Ok(NO_MORE_DOCS);
        }
        loop {
            if self.get_chunk_score_bound() > min_score {
                break;
            }
            let last_ours = self.last_ours_chunk();
            if self.block.curr_chunk() >= last_ours {
                if self.is_final_block() {
                    self.exhaust();
                    return Ok(NO_MORE_DOCS);
                }
                self.advance_block()?;
            } else {
                self.advance_chunk();
            }
        }
        self.next_geq(0)
    }

    /// Restore the cursor to the layer's starting block and chunk.
    pub fn reset_list(&mut self) -> Result<()> {
        self.exhausted = false;
        self.gap_base = 0;
        self.load_block(0)
    }

    /// Last docID of each block of this layer, in block order. Walks the
    /// whole layer; used to build the in-memory block-level index.
    pub fn block_last_doc_ids(&mut self) -> Result<Vec<u32>> {
        let mut ids = Vec::with_capacity(self.num_blocks as usize);
        loop {
            ids.push(self.block.chunk_last_doc_id(self.last_ours_chunk()));
            if self.is_final_block() {
                break;
            }
            self.advance_block()?;
        }
        Ok(ids)
    }

    pub fn layer_num(&self) -> usize {
        self.layer_num
    }

    pub fn num_docs(&self) -> u32 {
        self.num_docs
    }

    /// Length of the full list this layer came from; the scorer's IDF uses
    /// this so layered and non-layered indices score identically.
    pub fn num_docs_complete_list(&self) -> u32 {
        self.num_docs_complete_list
    }

    pub fn num_chunks(&self) -> u32 {
        self.num_chunks
    }

    pub fn num_blocks(&self) -> u32 {
        self.num_blocks
    }

    pub fn score_threshold(&self) -> f32 {
        self.score_threshold
    }

    pub fn term_num(&self) -> usize {
        self.term_num
    }

    pub fn set_term_num(&mut self, term_num: usize) {
        self.term_num = term_num;
    }

    pub fn cached_bytes_read(&self) -> u64 {
        self.cached_bytes_read
    }

    pub fn disk_bytes_read(&self) -> u64 {
        self.disk_bytes_read
    }

    pub fn num_blocks_skipped(&self) -> u32 {
        self.num_blocks_skipped
    }
}

impl Drop for ListData<'_> {
    fn drop(&mut self) {
        let r = self.reader;
        r.total_cached_bytes_read
            .set(r.total_cached_bytes_read.get() + self.cached_bytes_read);
        r.total_disk_bytes_read
            .set(r.total_disk_bytes_read.get() + self.disk_bytes_read);
        r.total_num_lists_accessed
            .set(r.total_num_lists_accessed.get() + 1);
        r.total_num_blocks_skipped
            .set(r.total_num_blocks_skipped.get() + self.num_blocks_skipped as u64);
    }
}
