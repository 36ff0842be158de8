//! Fixed layout parameters of the on-disk index format.

/// Maximum number of postings in a chunk.
pub const CHUNK_SIZE: usize = 128;

/// Fixed size of an index block, in bytes.
pub const BLOCK_SIZE: usize = 65536;

/// Size of an index block in 32-bit words.
pub const BLOCK_WORDS: usize = BLOCK_SIZE / 4;

/// Maximum number of layers an inverted list may be split into.
pub const MAX_LIST_LAYERS: usize = 8;

/// Upper bound on positions stored per document, used to size decode buffers.
pub const MAX_POSITIONS_PER_DOC: usize = 32;

/// Maximum query length supported by the evaluators that keep a per-term
/// bitmap (the accumulator-based layered TAAT evaluator).
pub const MAX_QUERY_TERMS: usize = 32;

/// Number of adjacent blocks the LRU cache reads ahead on a queue request.
pub const READ_AHEAD_BLOCKS: u64 = 16;
