//! Index meta file: ASCII `key=value` pairs, one per line.
//!
//! The meta blob fixes the shape of the index (layering, positions, coder
//! names) and the collection-wide counters the scorer and the layered index
//! generator rely on. Coder names must match byte-for-byte on reopen.

use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use rustc_hash::FxHashMap;

use crate::error::{Error, Result};

/// Standard meta file keys.
pub mod keys {
    pub const LAYERED_INDEX: &str = "layered_index";
    pub const NUM_LAYERS: &str = "num_layers";
    pub const OVERLAPPING_LAYERS: &str = "overlapping_layers";
    pub const INCLUDES_POSITIONS: &str = "includes_positions";
    pub const INCLUDES_CONTEXTS: &str = "includes_contexts";
    pub const INDEX_DOC_ID_CODING: &str = "index_doc_id_coding";
    pub const INDEX_FREQUENCY_CODING: &str = "index_frequency_coding";
    pub const INDEX_POSITION_CODING: &str = "index_position_coding";
    pub const INDEX_BLOCK_HEADER_CODING: &str = "index_block_header_coding";
    pub const TOTAL_NUM_CHUNKS: &str = "total_num_chunks";
    pub const TOTAL_NUM_PER_TERM_BLOCKS: &str = "total_num_per_term_blocks";
    pub const TOTAL_DOCUMENT_LENGTHS: &str = "total_document_lengths";
    pub const TOTAL_NUM_DOCS: &str = "total_num_docs";
    pub const TOTAL_UNIQUE_NUM_DOCS: &str = "total_unique_num_docs";
    pub const FIRST_DOC_ID: &str = "first_doc_id";
    pub const LAST_DOC_ID: &str = "last_doc_id";
    pub const NUM_UNIQUE_TERMS: &str = "num_unique_terms";
    pub const DOCUMENT_POSTING_COUNT: &str = "document_posting_count";
    pub const INDEX_POSTING_COUNT: &str = "index_posting_count";
    pub const TOTAL_HEADER_BYTES: &str = "total_header_bytes";
    pub const TOTAL_DOC_ID_BYTES: &str = "total_doc_id_bytes";
    pub const TOTAL_FREQUENCY_BYTES: &str = "total_frequency_bytes";
    pub const TOTAL_POSITION_BYTES: &str = "total_position_bytes";
    pub const TOTAL_WASTED_BYTES: &str = "total_wasted_bytes";
}

/// File names that make up an index, derived from a common prefix.
#[derive(Debug, Clone)]
pub struct IndexFiles {
    prefix: PathBuf,
}

impl IndexFiles {
    pub fn new(prefix: impl Into<PathBuf>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn with_suffix(&self, suffix: &str) -> PathBuf {
        let mut name = self
            .prefix
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if !name.is_empty() {
            name.push('.');
        }
        name.push_str(suffix);
        self.prefix
            .parent()
            .map(|p| p.join(&name))
            .unwrap_or_else(|| PathBuf::from(&name))
    }

    pub fn index(&self) -> PathBuf {
        self.with_suffix("index")
    }

    pub fn lexicon(&self) -> PathBuf {
        self.with_suffix("lexicon")
    }

    pub fn document_map_basic(&self) -> PathBuf {
        self.with_suffix("document_map_basic")
    }

    pub fn document_map_extended(&self) -> PathBuf {
        self.with_suffix("document_map_extended")
    }

    pub fn meta(&self) -> PathBuf {
        self.with_suffix("meta")
    }

    pub fn external_index(&self) -> PathBuf {
        self.with_suffix("index.ext")
    }

    pub fn doc_id_remapping(&self) -> PathBuf {
        self.with_suffix("url_sorted_doc_id_mapping")
    }
}

/// Ordered key-value store behind the meta file.
#[derive(Debug, Default, Clone)]
pub struct IndexMeta {
    entries: Vec<(String, String)>,
    lookup: FxHashMap<String, usize>,
}

impl IndexMeta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let mut meta = Self::new();
        for (line_num, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| {
                Error::Config(format!(
                    "malformed meta line {} in '{}'",
                    line_num + 1,
                    path.display()
                ))
            })?;
            meta.set(key.trim(), value.trim());
        }
        Ok(meta)
    }

    pub fn set(&mut self, key: &str, value: impl Display) {
        let value = value.to_string();
        match self.lookup.get(key) {
            Some(&idx) => self.entries[idx].1 = value,
            None => {
                self.lookup.insert(key.to_string(), self.entries.len());
                self.entries.push((key.to_string(), value));
            }
        }
    }

    pub fn set_bool(&mut self, key: &str, value: bool) {
        self.set(key, if value { "1" } else { "0" });
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.lookup
            .get(key)
            .map(|&idx| self.entries[idx].1.as_str())
    }

    pub fn numeric<T: FromStr>(&self, key: &str) -> Result<T> {
        let raw = self
            .get(key)
            .ok_or_else(|| Error::Config(format!("missing meta key '{key}'")))?;
        raw.parse()
            .map_err(|_| Error::Config(format!("meta key '{key}' has non-numeric value '{raw}'")))
    }

    pub fn string(&self, key: &str) -> Result<&str> {
        self.get(key)
            .ok_or_else(|| Error::Config(format!("missing meta key '{key}'")))
    }

    pub fn boolean(&self, key: &str) -> Result<bool> {
        match self.get(key) {
            Some("1") | Some("true") => Ok(true),
            Some("0") | Some("false") => Ok(false),
            Some(other) => Err(Error::Config(format!(
                "meta key '{key}' has non-boolean value '{other}'"
            ))),
            None => Err(Error::Config(format!("missing meta key '{key}'"))),
        }
    }

    pub fn boolean_or(&self, key: &str, default: bool) -> bool {
        self.boolean(key).unwrap_or(default)
    }

    pub fn numeric_or<T: FromStr>(&self, key: &str, default: T) -> T {
        self.numeric(key).unwrap_or(default)
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let mut out = String::new();
        for (key, value) in &self.entries {
            out.push_str(key);
            out.push('=');
            out.push_str(value);
            out.push('\n');
        }
        fs::write(path, out)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meta_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta");

        let mut meta = IndexMeta::new();
        meta.set_bool(keys::LAYERED_INDEX, true);
        meta.set(keys::NUM_LAYERS, 2);
        meta.set(keys::INDEX_DOC_ID_CODING, "pfor");
        meta.set(keys::TOTAL_NUM_DOCS, 1234u64);
        meta.write(&path).unwrap();

        let loaded = IndexMeta::open(&path).unwrap();
        assert!(loaded.boolean(keys::LAYERED_INDEX).unwrap());
        assert_eq!(loaded.numeric::<usize>(keys::NUM_LAYERS).unwrap(), 2);
        assert_eq!(loaded.string(keys::INDEX_DOC_ID_CODING).unwrap(), "pfor");
        assert_eq!(loaded.numeric::<u64>(keys::TOTAL_NUM_DOCS).unwrap(), 1234);
        assert!(loaded.numeric::<u64>(keys::LAST_DOC_ID).is_err());
    }

    #[test]
    fn test_index_files_prefix() {
        let files = IndexFiles::new("/tmp/idx/collection");
        assert!(files.index().ends_with("collection.index"));
        assert!(files.meta().ends_with("collection.meta"));
        assert!(files.external_index().ends_with("collection.index.ext"));
    }
}
