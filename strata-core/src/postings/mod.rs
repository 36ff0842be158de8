//! Chunk and block units of the posting format.

mod block;
mod chunk;

pub use block::BlockDecoder;
pub use chunk::{ChunkDecoder, ChunkEncoder};
