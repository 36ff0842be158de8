//! External index: a sidecar of per-block and per-chunk score upper bounds.
//!
//! Each layer owns a run of records, one per block the layer touches:
//! `[block_max: f32][num_chunks: u32][chunk_max: f32; num_chunks]`, addressed
//! by the word offset stored in the lexicon's layer record. MaxScore reads
//! the block bound through the list cursor while it traverses.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Error, Result};

/// Score bounds for one block of one layer.
#[derive(Debug, Clone)]
pub struct BlockScores {
    pub block_max: f32,
    pub chunk_maxes: Vec<f32>,
}

#[derive(Default)]
pub struct ExternalIndexBuilder {
    words: Vec<u32>,
    pending_chunks: Vec<f32>,
    layer_start: usize,
}

impl ExternalIndexBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the max score of the next chunk in the current block.
    pub fn add_chunk_score(&mut self, score: f32) {
        self.pending_chunks.push(score);
    }

    /// Close out the current block's record.
    pub fn finish_block(&mut self) {
        if self.pending_chunks.is_empty() {
            return;
        }
        let block_max = self
            .pending_chunks
            .iter()
            .fold(f32::MIN, |acc, &s| acc.max(s));
        self.words.push(block_max.to_bits());
        self.words.push(self.pending_chunks.len() as u32);
        for &score in &self.pending_chunks {
            self.words.push(score.to_bits());
        }
        self.pending_chunks.clear();
    }

    /// Close the current layer, returning the word offset its records start
    /// at.
    pub fn finalize_layer(&mut self) -> u32 {
        self.finish_block();
        let offset = self.layer_start as u32;
        self.layer_start = self.words.len();
        offset
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let mut out = BufWriter::new(File::create(path)?);
        for &word in &self.words {
            out.write_u32::<LittleEndian>(word)?;
        }
        out.flush()?;
        Ok(())
    }
}

pub struct ExternalIndexReader {
    words: Vec<u32>,
}

impl ExternalIndexReader {
    pub fn open(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        if bytes.len() % 4 != 0 {
            return Err(Error::Format(
                "external index is not word aligned".to_string(),
            ));
        }
        let mut words = vec![0u32; bytes.len() / 4];
        (&bytes[..]).read_u32_into::<LittleEndian>(&mut words)?;
        Ok(Self { words })
    }

    /// Materialize the per-block score records of one layer.
    pub fn layer_scores(&self, offset_words: u32, num_blocks: usize) -> Result<Vec<BlockScores>> {
        let mut pos = offset_words as usize;
        let mut blocks = Vec::with_capacity(num_blocks);
        for _ in 0..num_blocks {
            let block_max = f32::from_bits(
                self.words
                    .get(pos)
                    .copied()
                    .ok_or_else(|| Error::Format("external index truncated".to_string()))?,
            );
            let num_chunks = self
                .words
                .get(pos + 1)
                .copied()
                .ok_or_else(|| Error::Format("external index truncated".to_string()))?
                as usize;
            pos += 2;
            let raw = self
                .words
                .get(pos..pos + num_chunks)
                .ok_or_else(|| Error::Format("external index truncated".to_string()))?;
            blocks.push(BlockScores {
                block_max,
                chunk_maxes: raw.iter().map(|&w| f32::from_bits(w)).collect(),
            });
            pos += num_chunks;
        }
        Ok(blocks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_external_index_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.ext");

        let mut builder = ExternalIndexBuilder::new();
        // Layer 0: two blocks.
        builder.add_chunk_score(1.5);
        builder.add_chunk_score(0.5);
        builder.finish_block();
        builder.add_chunk_score(2.25);
        let offset0 = builder.finalize_layer();
        // Layer 1: one block.
        builder.add_chunk_score(0.125);
        builder.add_chunk_score(0.75);
        let offset1 = builder.finalize_layer();
        builder.write(&path).unwrap();

        let reader = ExternalIndexReader::open(&path).unwrap();
        let layer0 = reader.layer_scores(offset0, 2).unwrap();
        assert_eq!(layer0.len(), 2);
        assert_eq!(layer0[0].block_max, 1.5);
        assert_eq!(layer0[0].chunk_maxes, vec![1.5, 0.5]);
        assert_eq!(layer0[1].block_max, 2.25);

        let layer1 = reader.layer_scores(offset1, 1).unwrap();
        assert_eq!(layer1[0].chunk_maxes, vec![0.125, 0.75]);
    }
}
