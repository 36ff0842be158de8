//! One chunk: up to 128 postings stored as three parallel compressed
//! streams (doc-id gaps, frequencies, positions).

use crate::coding::{padded_len, CodingPolicy};
use crate::error::{Error, Result};
use crate::layout::{CHUNK_SIZE, MAX_POSITIONS_PER_DOC};

/// Encoder for a single chunk. Gaps are relative to the previous chunk's
/// last docID (zero at the start of a list layer).
pub struct ChunkEncoder {
    num_docs: usize,
    num_positions: usize,
    last_doc_id: u32,
    max_score: f32,
    words: Vec<u32>,
    doc_id_words: usize,
    frequency_words: usize,
    position_words: usize,
}

impl ChunkEncoder {
    pub fn new(
        gaps: &[u32],
        frequencies: &[u32],
        positions: Option<&[u32]>,
        prev_chunk_last_doc_id: u32,
        doc_id_coder: &CodingPolicy,
        frequency_coder: &CodingPolicy,
        position_coder: &CodingPolicy,
    ) -> Result<Self> {
        if gaps.is_empty() || gaps.len() > CHUNK_SIZE || gaps.len() != frequencies.len() {
            return Err(Error::Format(format!(
                "chunk must hold 1..={CHUNK_SIZE} postings"
            )));
        }
        if frequencies.iter().any(|&f| f == 0) {
            return Err(Error::Format("zero frequency in chunk".to_string()));
        }
        let num_positions = positions.map(|p| p.len()).unwrap_or(0);
        if let Some(p) = positions {
            let expected: u64 = frequencies.iter().map(|&f| f as u64).sum();
            if p.len() as u64 != expected {
                return Err(Error::Format(
                    "position count does not match frequency sum".to_string(),
                ));
            }
        }

        let last_doc_id = gaps
            .iter()
            .fold(prev_chunk_last_doc_id, |acc, &g| acc.wrapping_add(g));

        let mut words = Vec::new();
        let doc_id_words = encode_padded(gaps, doc_id_coder, &mut words);
        let frequency_words = encode_padded(frequencies, frequency_coder, &mut words);
        let position_words = match positions {
            Some(p) if !p.is_empty() => encode_padded(p, position_coder, &mut words),
            _ => 0,
        };

        Ok(Self {
            num_docs: gaps.len(),
            num_positions,
            last_doc_id,
            max_score: 0.0,
            words,
            doc_id_words,
            frequency_words,
            position_words,
        })
    }

    pub fn num_docs(&self) -> usize {
        self.num_docs
    }

    pub fn num_positions(&self) -> usize {
        self.num_positions
    }

    pub fn last_doc_id(&self) -> u32 {
        self.last_doc_id
    }

    pub fn size_words(&self) -> usize {
        self.words.len()
    }

    pub fn words(&self) -> &[u32] {
        &self.words
    }

    pub fn doc_id_words(&self) -> usize {
        self.doc_id_words
    }

    pub fn frequency_words(&self) -> usize {
        self.frequency_words
    }

    pub fn position_words(&self) -> usize {
        self.position_words
    }

    pub fn max_score(&self) -> f32 {
        self.max_score
    }

    /// Maximum per-posting BM25 contribution in this chunk; computed by the
    /// caller, which knows the scoring model.
    pub fn set_max_score(&mut self, max_score: f32) {
        self.max_score = max_score;
    }
}

fn encode_padded(values: &[u32], coder: &CodingPolicy, out: &mut Vec<u32>) -> usize {
    let padded = padded_len(values.len(), coder.block_size());
    if padded == values.len() {
        coder.encode(values, out)
    } else {
        let mut buf = Vec::with_capacity(padded);
        buf.extend_from_slice(values);
        buf.resize(padded, 0);
        coder.encode(&buf, out)
    }
}

/// Decoder state for the chunk currently under a cursor.
///
/// Doc-id gaps are decoded in one shot; conversion to absolute docIDs
/// happens incrementally as the cursor walks. Frequencies and positions
/// are decoded only when the evaluator asks for them.
pub struct ChunkDecoder {
    num_docs: usize,
    num_positions: usize,
    curr_document_offset: usize,
    prev_document_offset: usize,
    curr_position_offset: usize,
    curr_doc_id: u32,
    gap_base: u32,
    decoded_doc_ids: bool,
    decoded_properties: bool,
    decoded_positions: bool,
    chunk_max_score: f32,
    doc_id_words: usize,
    frequency_words: usize,
    doc_ids: Vec<u32>,
    frequencies: Vec<u32>,
    positions: Vec<u32>,
}

impl Default for ChunkDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkDecoder {
    pub fn new() -> Self {
        Self {
            num_docs: 0,
            num_positions: 0,
            curr_document_offset: 0,
            prev_document_offset: 0,
            curr_position_offset: 0,
            curr_doc_id: 0,
            gap_base: 0,
            decoded_doc_ids: false,
            decoded_properties: false,
            decoded_positions: false,
            chunk_max_score: f32::MAX,
            doc_id_words: 0,
            frequency_words: 0,
            doc_ids: Vec::with_capacity(CHUNK_SIZE),
            frequencies: Vec::with_capacity(CHUNK_SIZE),
            positions: Vec::with_capacity(CHUNK_SIZE * MAX_POSITIONS_PER_DOC),
        }
    }

    /// Point the decoder at a fresh chunk. Decodes nothing.
    pub fn reset(&mut self, num_docs: usize, gap_base: u32) {
        debug_assert!(num_docs > 0 && num_docs <= CHUNK_SIZE);
        self.num_docs = num_docs;
        self.num_positions = 0;
        self.curr_document_offset = 0;
        self.prev_document_offset = 0;
        self.curr_position_offset = 0;
        self.curr_doc_id = 0;
        self.gap_base = gap_base;
        self.decoded_doc_ids = false;
        self.decoded_properties = false;
        self.decoded_positions = false;
        self.chunk_max_score = f32::MAX;
        self.doc_id_words = 0;
        self.frequency_words = 0;
    }

    pub fn num_docs(&self) -> usize {
        self.num_docs
    }

    pub fn decoded_doc_ids(&self) -> bool {
        self.decoded_doc_ids
    }

    pub fn decoded_properties(&self) -> bool {
        self.decoded_properties
    }

    pub fn chunk_max_score(&self) -> f32 {
        self.chunk_max_score
    }

    pub fn set_chunk_max_score(&mut self, score: f32) {
        self.chunk_max_score = score;
    }

    pub fn curr_document_offset(&self) -> usize {
        self.curr_document_offset
    }

    /// Decode the gap stream from the chunk payload `raw`.
    pub fn decode_doc_ids(&mut self, raw: &[u32], coder: &CodingPolicy) -> Result<()> {
        debug_assert!(!self.decoded_doc_ids);
        let padded = padded_len(self.num_docs, coder.block_size());
        self.doc_ids.resize(padded.max(self.doc_ids.len()), 0);
        self.doc_id_words = coder.decode(raw, &mut self.doc_ids, padded)?;
        self.curr_doc_id = self.gap_base.wrapping_add(self.doc_ids[0]);
        self.decoded_doc_ids = true;
        Ok(())
    }

    /// Decode the frequency stream; requires the gap stream to have been
    /// decoded (its word count locates the frequency stream).
    pub fn decode_frequencies(&mut self, raw: &[u32], coder: &CodingPolicy) -> Result<()> {
        debug_assert!(self.decoded_doc_ids && !self.decoded_properties);
        let padded = padded_len(self.num_docs, coder.block_size());
        self.frequencies.resize(padded.max(self.frequencies.len()), 0);
        let raw = raw
            .get(self.doc_id_words..)
            .ok_or_else(|| Error::Format("chunk truncated before frequencies".to_string()))?;
        self.frequency_words = coder.decode(raw, &mut self.frequencies, padded)?;
        self.decoded_properties = true;
        Ok(())
    }

    /// Decode every position in the chunk. Positions are decoded at most
    /// once per chunk and only when actually requested.
    pub fn decode_positions(&mut self, raw: &[u32], coder: &CodingPolicy) -> Result<()> {
        debug_assert!(self.decoded_properties);
        if self.decoded_positions {
            return Ok(());
        }
        let num_positions: usize = self.frequencies[..self.num_docs]
            .iter()
            .map(|&f| f as usize)
            .sum();
        self.num_positions = num_positions;
        let padded = padded_len(num_positions, coder.block_size());
        self.positions.resize(padded.max(self.positions.len()), 0);
        let raw = raw
            .get(self.doc_id_words + self.frequency_words..)
            .ok_or_else(|| Error::Format("chunk truncated before positions".to_string()))?;
        coder.decode(raw, &mut self.positions, padded)?;
        self.decoded_positions = true;
        Ok(())
    }

    /// Walk forward from the current posting to the first docID >= target.
    /// Returns `None` when the chunk is exhausted.
    pub fn next_geq_in_chunk(&mut self, target: u32) -> Option<u32> {
        debug_assert!(self.decoded_doc_ids);
        loop {
            if self.curr_doc_id >= target {
                return Some(self.curr_doc_id);
            }
            if self.curr_document_offset + 1 >= self.num_docs {
                return None;
            }
            self.curr_document_offset += 1;
            self.curr_doc_id = self
                .curr_doc_id
                .wrapping_add(self.doc_ids[self.curr_document_offset]);
        }
    }

    pub fn current_doc_id(&self) -> u32 {
        self.curr_doc_id
    }

    pub fn current_frequency(&self) -> u32 {
        debug_assert!(self.decoded_properties);
        self.frequencies[self.curr_document_offset]
    }

    /// Advance the position cursor to the current posting. Requires
    /// frequencies to have been decoded.
    pub fn update_properties_offset(&mut self) {
        debug_assert!(self.decoded_properties);
        for i in self.prev_document_offset..self.curr_document_offset {
            self.curr_position_offset += self.frequencies[i] as usize;
        }
        self.prev_document_offset = self.curr_document_offset;
    }

    /// Positions of the current posting; exactly `current_frequency()`
    /// entries.
    pub fn current_positions(&self) -> &[u32] {
        debug_assert!(self.decoded_positions);
        let start = self.curr_position_offset;
        let len = self.frequencies[self.curr_document_offset] as usize;
        &self.positions[start..start + len]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coders() -> (CodingPolicy, CodingPolicy, CodingPolicy) {
        (CodingPolicy::PFor, CodingPolicy::S16, CodingPolicy::VByte)
    }

    #[test]
    fn test_chunk_roundtrip_with_positions() {
        let (doc_coder, freq_coder, pos_coder) = coders();
        let gaps = [5u32, 3, 1, 10];
        let freqs = [2u32, 1, 3, 1];
        let positions = [1u32, 4, 2, 1, 5, 9, 3];

        let chunk = ChunkEncoder::new(
            &gaps,
            &freqs,
            Some(&positions),
            100,
            &doc_coder,
            &freq_coder,
            &pos_coder,
        )
        .unwrap();
        assert_eq!(chunk.num_docs(), 4);
        assert_eq!(chunk.last_doc_id(), 119);

        let mut decoder = ChunkDecoder::new();
        decoder.reset(4, 100);
        decoder.decode_doc_ids(chunk.words(), &doc_coder).unwrap();

        assert_eq!(decoder.next_geq_in_chunk(0), Some(105));
        decoder.decode_frequencies(chunk.words(), &freq_coder).unwrap();
        assert_eq!(decoder.current_frequency(), 2);
        decoder.decode_positions(chunk.words(), &pos_coder).unwrap();
        decoder.update_properties_offset();
        assert_eq!(decoder.current_positions(), &[1, 4]);

        assert_eq!(decoder.next_geq_in_chunk(106), Some(108));
        assert_eq!(decoder.next_geq_in_chunk(109), Some(109));
        decoder.update_properties_offset();
        assert_eq!(decoder.current_frequency(), 3);
        assert_eq!(decoder.current_positions(), &[1, 5, 9]);

        assert_eq!(decoder.next_geq_in_chunk(119), Some(119));
        assert_eq!(decoder.next_geq_in_chunk(120), None);
    }

    #[test]
    fn test_chunk_rejects_zero_frequency() {
        let (doc_coder, freq_coder, pos_coder) = coders();
        let err = ChunkEncoder::new(&[1], &[0], None, 0, &doc_coder, &freq_coder, &pos_coder);
        assert!(err.is_err());
    }
}
