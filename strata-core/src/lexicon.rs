//! Lexicon: term to per-layer list descriptors.
//!
//! Two access modes. Random mode loads the whole lexicon into a
//! move-to-front chained hash table for query lookups (the bucket head is
//! always the most recently queried term). Streaming mode yields entries in
//! on-disk order for merging and layer generation.
//!
//! On-disk record: `u16 term_len`, `u8 num_layers`, term bytes, then per
//! layer four `u32` (num_docs, num_chunks, num_chunks_last_block,
//! num_blocks), two `u32` (block_number, chunk_number), `f32
//! score_threshold`, `u32 external_index_offset`.

use std::fs::File;
use std::hash::{Hash, Hasher};
use std::io::{BufReader, ErrorKind, Read, Write};
use std::path::Path;
use std::sync::Arc;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use rustc_hash::FxHasher;

use crate::error::{Error, Result};
use crate::layout::MAX_LIST_LAYERS;

/// Per-layer list descriptor.
#[derive(Debug, Clone)]
pub struct LayerInfo {
    pub num_docs: u32,
    pub num_chunks: u32,
    pub num_chunks_last_block: u32,
    pub num_blocks: u32,
    pub block_number: u32,
    pub chunk_number: u32,
    pub score_threshold: f32,
    pub external_index_offset: u32,
    /// Last docID of each block in this layer, attached post-hoc when the
    /// index is memory resident (enables block-level skipping).
    pub last_doc_ids: Option<Arc<Vec<u32>>>,
}

/// A term plus its ordered layers.
#[derive(Debug, Clone)]
pub struct LexiconEntry {
    pub term: Box<[u8]>,
    pub layers: Vec<LayerInfo>,
}

impl LexiconEntry {
    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// Layer accessor; out-of-range layer numbers resolve to the last layer
    /// so lists with fewer layers than the query expects still open.
    pub fn layer(&self, layer_num: usize) -> &LayerInfo {
        &self.layers[layer_num.min(self.layers.len() - 1)]
    }

    /// Number of documents in the complete list (the last layer of an
    /// overlapping index contains every docID; for non-overlapping layers
    /// the layers partition the list).
    pub fn num_docs_complete_list(&self, overlapping: bool) -> u32 {
        if overlapping || self.layers.len() == 1 {
            self.layers[self.layers.len() - 1].num_docs
        } else {
            self.layers.iter().map(|l| l.num_docs).sum()
        }
    }
}

pub(crate) fn write_record<W: Write>(out: &mut W, term: &[u8], layers: &[LayerInfo]) -> Result<()> {
    if term.len() > u16::MAX as usize {
        return Err(Error::Format("term longer than 65535 bytes".to_string()));
    }
    if layers.is_empty() || layers.len() > MAX_LIST_LAYERS {
        return Err(Error::Format(format!(
            "lexicon entry must have 1..={MAX_LIST_LAYERS} layers"
        )));
    }
    out.write_u16::<LittleEndian>(term.len() as u16)?;
    out.write_u8(layers.len() as u8)?;
    out.write_all(term)?;
    for layer in layers {
        out.write_u32::<LittleEndian>(layer.num_docs)?;
        out.write_u32::<LittleEndian>(layer.num_chunks)?;
        out.write_u32::<LittleEndian>(layer.num_chunks_last_block)?;
        out.write_u32::<LittleEndian>(layer.num_blocks)?;
        out.write_u32::<LittleEndian>(layer.block_number)?;
        out.write_u32::<LittleEndian>(layer.chunk_number)?;
        out.write_f32::<LittleEndian>(layer.score_threshold)?;
        out.write_u32::<LittleEndian>(layer.external_index_offset)?;
    }
    Ok(())
}

fn read_record<R: Read>(reader: &mut R) -> Result<Option<LexiconEntry>> {
    let term_len = match reader.read_u16::<LittleEndian>() {
        Ok(len) => len as usize,
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let num_layers = reader.read_u8()? as usize;
    if num_layers == 0 || num_layers > MAX_LIST_LAYERS {
        return Err(Error::Format(format!(
            "corrupt lexicon record: {num_layers} layers"
        )));
    }
    let mut term = vec![0u8; term_len];
    reader.read_exact(&mut term)?;
    let mut layers = Vec::with_capacity(num_layers);
    for _ in 0..num_layers {
        layers.push(LayerInfo {
            num_docs: reader.read_u32::<LittleEndian>()?,
            num_chunks: reader.read_u32::<LittleEndian>()?,
            num_chunks_last_block: reader.read_u32::<LittleEndian>()?,
            num_blocks: reader.read_u32::<LittleEndian>()?,
            block_number: reader.read_u32::<LittleEndian>()?,
            chunk_number: reader.read_u32::<LittleEndian>()?,
            score_threshold: reader.read_f32::<LittleEndian>()?,
            external_index_offset: reader.read_u32::<LittleEndian>()?,
            last_doc_ids: None,
        });
    }
    Ok(Some(LexiconEntry {
        term: term.into_boxed_slice(),
        layers,
    }))
}

struct Node {
    entry: LexiconEntry,
    next: Option<Box<Node>>,
}

/// Chained hash table that keeps the most recently queried entry at the
/// head of its bucket.
struct MoveToFrontHashTable {
    buckets: Vec<Option<Box<Node>>>,
    mask: u64,
    len: usize,
}

impl MoveToFrontHashTable {
    fn with_capacity(capacity_hint: usize) -> Self {
        let size = (capacity_hint * 2).next_power_of_two().max(16);
        let mut buckets = Vec::with_capacity(size);
        buckets.resize_with(size, || None);
        Self {
            buckets,
            mask: size as u64 - 1,
            len: 0,
        }
    }

    fn bucket(&self, term: &[u8]) -> usize {
        let mut hasher = FxHasher::default();
        term.hash(&mut hasher);
        (hasher.finish() & self.mask) as usize
    }

    fn insert(&mut self, entry: LexiconEntry) {
        let idx = self.bucket(&entry.term);
        let node = Box::new(Node {
            entry,
            next: self.buckets[idx].take(),
        });
        self.buckets[idx] = Some(node);
        self.len += 1;
    }

    /// Look up a term, moving its node to the bucket head on a hit.
    fn get_mut(&mut self, term: &[u8]) -> Option<&mut LexiconEntry> {
        let idx = self.bucket(term);
        let mut chain = Vec::new();
        let mut curr = self.buckets[idx].take();
        while let Some(mut node) = curr {
            curr = node.next.take();
            chain.push(node);
        }
        if let Some(pos) = chain.iter().position(|n| &*n.entry.term == term) {
            let node = chain.remove(pos);
            chain.insert(0, node);
        }
        let mut head: Option<Box<Node>> = None;
        for mut node in chain.into_iter().rev() {
            node.next = head;
            head = Some(node);
        }
        self.buckets[idx] = head;
        match self.buckets[idx].as_deref_mut() {
            Some(node) if &*node.entry.term == term => Some(&mut node.entry),
            _ => None,
        }
    }

    fn entries(&self) -> Vec<LexiconEntry> {
        let mut out = Vec::with_capacity(self.len);
        for bucket in &self.buckets {
            let mut node = bucket.as_deref();
            while let Some(n) = node {
                out.push(n.entry.clone());
                node = n.next.as_deref();
            }
        }
        out
    }
}

/// Lexicon in one of its two access modes.
pub enum Lexicon {
    Random(Box<RandomLexicon>),
    Stream(LexiconStream),
}

pub struct RandomLexicon {
    table: MoveToFrontHashTable,
}

pub struct LexiconStream {
    reader: BufReader<File>,
}

impl Lexicon {
    /// Load the whole lexicon into the hash table for query lookups.
    pub fn open_random(path: &Path, capacity_hint: usize) -> Result<Self> {
        let mut reader = BufReader::new(File::open(path)?);
        let mut table = MoveToFrontHashTable::with_capacity(capacity_hint);
        while let Some(entry) = read_record(&mut reader)? {
            table.insert(entry);
        }
        Ok(Lexicon::Random(Box::new(RandomLexicon { table })))
    }

    /// Open for streaming in lexicographic (on-disk) order.
    pub fn open_stream(path: &Path) -> Result<Self> {
        Ok(Lexicon::Stream(LexiconStream {
            reader: BufReader::new(File::open(path)?),
        }))
    }

    /// Random-mode lookup; returns a cheap clone of the entry (layer
    /// skip arrays are shared through `Arc`).
    pub fn get_entry(&mut self, term: &[u8]) -> Option<LexiconEntry> {
        match self {
            Lexicon::Random(lex) => lex.table.get_mut(term).map(|e| e.clone()),
            Lexicon::Stream(_) => None,
        }
    }

    /// Streaming-mode iteration; `None` at end of file.
    pub fn next_entry(&mut self) -> Result<Option<LexiconEntry>> {
        match self {
            Lexicon::Stream(stream) => read_record(&mut stream.reader),
            Lexicon::Random(_) => Err(Error::Format(
                "next_entry is only available in streaming mode".to_string(),
            )),
        }
    }

    /// Snapshot of every entry (random mode only); used to build the
    /// in-memory block-level index.
    pub fn entries(&self) -> Vec<LexiconEntry> {
        match self {
            Lexicon::Random(lex) => lex.table.entries(),
            Lexicon::Stream(_) => Vec::new(),
        }
    }

    /// Attach a block-level skip array to one layer of one term.
    pub fn attach_last_doc_ids(&mut self, term: &[u8], layer_num: usize, ids: Arc<Vec<u32>>) {
        if let Lexicon::Random(lex) = self {
            if let Some(entry) = lex.table.get_mut(term) {
                if let Some(layer) = entry.layers.get_mut(layer_num) {
                    layer.last_doc_ids = Some(ids);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer(num_docs: u32) -> LayerInfo {
        LayerInfo {
            num_docs,
            num_chunks: num_docs.div_ceil(128),
            num_chunks_last_block: 1,
            num_blocks: 1,
            block_number: 0,
            chunk_number: 0,
            score_threshold: 1.25,
            external_index_offset: 0,
            last_doc_ids: None,
        }
    }

    #[test]
    fn test_lexicon_roundtrip_and_mtf() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lexicon");

        let mut out = Vec::new();
        write_record(&mut out, b"alpha", &[layer(10)]).unwrap();
        write_record(&mut out, b"beta", &[layer(300), layer(500)]).unwrap();
        write_record(&mut out, b"gamma", &[layer(7)]).unwrap();
        std::fs::write(&path, out).unwrap();

        let mut lexicon = Lexicon::open_random(&path, 3).unwrap();
        let beta = lexicon.get_entry(b"beta").unwrap();
        assert_eq!(beta.num_layers(), 2);
        assert_eq!(beta.layer(0).num_docs, 300);
        assert_eq!(beta.layer(5).num_docs, 500); // clamps to last layer
        assert_eq!(beta.num_docs_complete_list(true), 500);
        assert_eq!(beta.num_docs_complete_list(false), 800);
        assert!(lexicon.get_entry(b"delta").is_none());

        // Repeated lookups keep working after move-to-front reshuffles.
        for _ in 0..3 {
            assert!(lexicon.get_entry(b"alpha").is_some());
            assert!(lexicon.get_entry(b"gamma").is_some());
        }

        let mut stream = Lexicon::open_stream(&path).unwrap();
        let mut terms = Vec::new();
        while let Some(entry) = stream.next_entry().unwrap() {
            terms.push(String::from_utf8_lossy(&entry.term).into_owned());
        }
        assert_eq!(terms, vec!["alpha", "beta", "gamma"]);
    }

    #[test]
    fn test_attach_last_doc_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lexicon");
        let mut out = Vec::new();
        write_record(&mut out, b"alpha", &[layer(10)]).unwrap();
        std::fs::write(&path, out).unwrap();

        let mut lexicon = Lexicon::open_random(&path, 1).unwrap();
        lexicon.attach_last_doc_ids(b"alpha", 0, Arc::new(vec![42]));
        let entry = lexicon.get_entry(b"alpha").unwrap();
        assert_eq!(entry.layer(0).last_doc_ids.as_ref().unwrap()[0], 42);
    }
}
