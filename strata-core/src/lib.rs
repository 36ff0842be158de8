//! Strata - a block-oriented inverted index search core
//!
//! This library provides:
//! - A fixed-size block / 128-posting chunk on-disk index format with
//!   per-stream compression policies selected by name
//! - Cache managers over the posting file (memory resident, memory mapped,
//!   LRU with read-ahead)
//! - A lexicon with random (move-to-front hash) and streaming access
//! - A list cursor exposing `next_geq` / lazy frequency and position decode
//! - A layered index generator that rewrites a single-layer index into
//!   score-ordered layers with per-layer thresholds
//! - Top-k BM25 evaluators: DAAT-AND, DAAT-OR, dual-layered overlapping
//!   DAAT, layered TAAT with pruning, WAND and MaxScore (plus 2-tier forms)

pub mod builder;
pub mod cache;
pub mod coding;
pub mod config;
pub mod docmap;
pub mod error;
pub mod external;
pub mod layerify;
pub mod layout;
pub mod lexicon;
pub mod meta;
pub mod postings;
pub mod query;
pub mod reader;

pub use builder::IndexBuilder;
pub use cache::{CacheManager, FullContiguousCache, LruCache, MergingCache, MmapCache};
pub use config::Config;
pub use docmap::{DocumentMapReader, DocumentMapWriter};
pub use error::{Error, Result};
pub use external::{ExternalIndexBuilder, ExternalIndexReader};
pub use layerify::{LayerSplitMode, LayeredIndexGenerator};
pub use lexicon::{LayerInfo, Lexicon, LexiconEntry};
pub use meta::{IndexFiles, IndexMeta};
pub use query::{
    QueryAlgorithm, QueryMode, QueryProcessor, QueryResponse, ResultFormat, SearchResult,
};
pub use reader::{IndexReader, ListData, NO_MORE_DOCS};

pub type DocId = u32;
pub type TermFreq = u32;
pub type Score = f32;
