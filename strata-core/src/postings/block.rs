//! One block: a fixed 65,536-byte unit holding a compressed header of
//! `(last_doc_id, size_in_words)` pairs followed by concatenated chunk
//! payloads and zero padding.

use byteorder::{ByteOrder, LittleEndian};

use crate::coding::{padded_len, CodingPolicy};
use crate::error::{Error, Result};
use crate::layout::{BLOCK_SIZE, BLOCK_WORDS};

/// Parses a block header and tracks the chunk cursor during traversal.
/// A block is parsed once per visit; it is never re-parsed while a cursor
/// still points into it.
pub struct BlockDecoder {
    words: Vec<u32>,
    header: Vec<u32>,
    num_chunks: usize,
    starting_chunk: usize,
    curr_chunk: usize,
    curr_chunk_word: usize,
    payload_start: usize,
    block_max_score: f32,
}

impl Default for BlockDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockDecoder {
    pub fn new() -> Self {
        Self {
            words: vec![0u32; BLOCK_WORDS],
            header: Vec::new(),
            num_chunks: 0,
            starting_chunk: 0,
            curr_chunk: 0,
            curr_chunk_word: 0,
            payload_start: 0,
            block_max_score: f32::MAX,
        }
    }

    /// Parse `block` (exactly one block of bytes), positioning the chunk
    /// cursor at `starting_chunk` (the first chunk belonging to the opened
    /// list).
    pub fn init(
        &mut self,
        block: &[u8],
        starting_chunk: usize,
        header_coder: &CodingPolicy,
    ) -> Result<()> {
        if block.len() != BLOCK_SIZE {
            return Err(Error::Format("short block read".to_string()));
        }
        LittleEndian::read_u32_into(block, &mut self.words);

        let num_chunks = self.words[0] as usize;
        let header_words = self.words[1] as usize;
        // Each chunk needs at least one payload word and two header values.
        if num_chunks == 0 || num_chunks > BLOCK_WORDS || header_words > BLOCK_WORDS - 2 {
            return Err(Error::Format(format!(
                "corrupt block header: {num_chunks} chunks, {header_words} header words"
            )));
        }
        self.num_chunks = num_chunks;

        let padded = padded_len(2 * num_chunks, header_coder.block_size());
        self.header.resize(padded.max(self.header.len()), 0);
        let consumed =
            header_coder.decode(&self.words[2..2 + header_words], &mut self.header, padded)?;
        if consumed != header_words {
            return Err(Error::Format(
                "block header size does not match its coded length".to_string(),
            ));
        }
        self.payload_start = 2 + header_words;

        if starting_chunk >= num_chunks {
            return Err(Error::Format(
                "starting chunk beyond block header".to_string(),
            ));
        }
        self.starting_chunk = starting_chunk;
        self.curr_chunk = starting_chunk;
        let mut offset = self.payload_start;
        for chunk in 0..starting_chunk {
            offset += self.chunk_size(chunk) as usize;
        }
        self.curr_chunk_word = offset;

        // The chunk payloads must fit in the block.
        let mut total = 0usize;
        for chunk in 0..num_chunks {
            total += self.chunk_size(chunk) as usize;
        }
        if self.payload_start + total > BLOCK_WORDS {
            return Err(Error::Format("chunk sizes overflow block".to_string()));
        }
        self.block_max_score = f32::MAX;
        Ok(())
    }

    /// Last fully decoded docID of the chunk at header index `chunk_idx`.
    #[inline]
    pub fn chunk_last_doc_id(&self, chunk_idx: usize) -> u32 {
        debug_assert!(chunk_idx < self.num_chunks);
        self.header[2 * chunk_idx]
    }

    /// Size in words of the chunk at header index `chunk_idx`.
    #[inline]
    pub fn chunk_size(&self, chunk_idx: usize) -> u32 {
        debug_assert!(chunk_idx < self.num_chunks);
        self.header[2 * chunk_idx + 1]
    }

    /// Total chunks in this block, including chunks of other lists.
    pub fn num_chunks(&self) -> usize {
        self.num_chunks
    }

    /// Chunks in this block that belong to the opened list.
    pub fn num_actual_chunks(&self) -> usize {
        self.num_chunks - self.starting_chunk
    }

    pub fn starting_chunk(&self) -> usize {
        self.starting_chunk
    }

    pub fn curr_chunk(&self) -> usize {
        self.curr_chunk
    }

    /// Words of the current chunk's payload.
    pub fn curr_chunk_words(&self) -> &[u32] {
        let size = self.chunk_size(self.curr_chunk) as usize;
        &self.words[self.curr_chunk_word..self.curr_chunk_word + size]
    }

    /// Move the payload pointer past the current chunk.
    pub fn advance_curr_chunk(&mut self) {
        self.curr_chunk_word += self.chunk_size(self.curr_chunk) as usize;
        self.curr_chunk += 1;
    }

    pub fn block_max_score(&self) -> f32 {
        self.block_max_score
    }

    pub fn set_block_max_score(&mut self, score: f32) {
        self.block_max_score = score;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::WriteBytesExt;

    /// Hand-assemble a block: prelude, coded header, payload words.
    fn build_block(chunks: &[(u32, Vec<u32>)], coder: &CodingPolicy) -> Vec<u8> {
        let mut header_values = Vec::new();
        for (last_doc_id, words) in chunks {
            header_values.push(*last_doc_id);
            header_values.push(words.len() as u32);
        }
        let padded = padded_len(header_values.len(), coder.block_size());
        header_values.resize(padded, 0);
        let mut coded = Vec::new();
        coder.encode(&header_values, &mut coded);

        let mut out = Vec::with_capacity(BLOCK_SIZE);
        out.write_u32::<LittleEndian>(chunks.len() as u32).unwrap();
        out.write_u32::<LittleEndian>(coded.len() as u32).unwrap();
        for word in coded {
            out.write_u32::<LittleEndian>(word).unwrap();
        }
        for (_, words) in chunks {
            for &word in words {
                out.write_u32::<LittleEndian>(word).unwrap();
            }
        }
        out.resize(BLOCK_SIZE, 0);
        out
    }

    #[test]
    fn test_block_header_and_chunk_walk() {
        let coder = CodingPolicy::S16;
        let block = build_block(
            &[
                (100, vec![1, 2, 3]),
                (200, vec![4, 5]),
                (300, vec![6, 7, 8, 9]),
            ],
            &coder,
        );

        let mut decoder = BlockDecoder::new();
        decoder.init(&block, 1, &coder).unwrap();
        assert_eq!(decoder.num_chunks(), 3);
        assert_eq!(decoder.num_actual_chunks(), 2);
        assert_eq!(decoder.chunk_last_doc_id(0), 100);
        assert_eq!(decoder.chunk_last_doc_id(2), 300);
        assert_eq!(decoder.chunk_size(1), 2);

        assert_eq!(decoder.curr_chunk(), 1);
        assert_eq!(decoder.curr_chunk_words(), &[4, 5]);
        decoder.advance_curr_chunk();
        assert_eq!(decoder.curr_chunk_words(), &[6, 7, 8, 9]);
    }

    #[test]
    fn test_block_rejects_garbage() {
        let mut decoder = BlockDecoder::new();
        let garbage = vec![0xffu8; BLOCK_SIZE];
        assert!(decoder.init(&garbage, 0, &CodingPolicy::S16).is_err());
        assert!(decoder.init(&[0u8; 16], 0, &CodingPolicy::S16).is_err());
    }
}
