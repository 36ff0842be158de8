//! Document map: docID to document length and URL, O(1) lookups.
//!
//! The basic file is a flat array of `u32` lengths; the extended file holds
//! an offset table into a URL blob. When the index was built with docID
//! remapping, the sidecar `url_sorted_doc_id_mapping` file is loaded and all
//! lookups resolve through it.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Error, Result};
use crate::DocId;

pub struct DocumentMapReader {
    lengths: Vec<u32>,
    url_offsets: Vec<(u32, u32)>,
    url_blob: Vec<u8>,
    remap: Option<Vec<u32>>,
}

impl DocumentMapReader {
    pub fn open(basic: &Path, extended: &Path, remapping: Option<&Path>) -> Result<Self> {
        let mut reader = BufReader::new(File::open(basic)?);
        let num_docs = reader.read_u32::<LittleEndian>()? as usize;
        let mut lengths = vec![0u32; num_docs];
        reader.read_u32_into::<LittleEndian>(&mut lengths)?;

        let mut reader = BufReader::new(File::open(extended)?);
        let ext_docs = reader.read_u32::<LittleEndian>()? as usize;
        if ext_docs != num_docs {
            return Err(Error::Format(format!(
                "document map mismatch: {num_docs} lengths vs {ext_docs} urls"
            )));
        }
        let mut url_offsets = Vec::with_capacity(num_docs);
        for _ in 0..num_docs {
            let offset = reader.read_u32::<LittleEndian>()?;
            let len = reader.read_u32::<LittleEndian>()?;
            url_offsets.push((offset, len));
        }
        let mut url_blob = Vec::new();
        reader.read_to_end(&mut url_blob)?;

        let remap = match remapping {
            Some(path) if path.exists() => {
                let mut reader = BufReader::new(File::open(path)?);
                let n = reader.read_u32::<LittleEndian>()? as usize;
                if n != num_docs {
                    return Err(Error::Format(
                        "docID remapping table size does not match document map".to_string(),
                    ));
                }
                let mut table = vec![0u32; n];
                reader.read_u32_into::<LittleEndian>(&mut table)?;
                Some(table)
            }
            _ => None,
        };

        Ok(Self {
            lengths,
            url_offsets,
            url_blob,
            remap,
        })
    }

    #[inline]
    fn resolve(&self, doc_id: DocId) -> usize {
        match &self.remap {
            Some(table) => table
                .get(doc_id as usize)
                .copied()
                .unwrap_or(doc_id) as usize,
            None => doc_id as usize,
        }
    }

    #[inline]
    pub fn doc_len(&self, doc_id: DocId) -> u32 {
        let idx = self.resolve(doc_id);
        self.lengths.get(idx).copied().unwrap_or(1)
    }

    pub fn doc_url(&self, doc_id: DocId) -> &str {
        let idx = self.resolve(doc_id);
        match self.url_offsets.get(idx) {
            Some(&(offset, len)) => {
                let start = offset as usize;
                let end = start + len as usize;
                std::str::from_utf8(&self.url_blob[start..end]).unwrap_or("")
            }
            None => "",
        }
    }

    pub fn num_docs(&self) -> usize {
        self.lengths.len()
    }
}

pub struct DocumentMapWriter;

impl DocumentMapWriter {
    pub fn write(basic: &Path, extended: &Path, lengths: &[u32], urls: &[&str]) -> Result<()> {
        if lengths.len() != urls.len() {
            return Err(Error::Format(
                "document map lengths and urls differ in count".to_string(),
            ));
        }
        let mut out = BufWriter::new(File::create(basic)?);
        out.write_u32::<LittleEndian>(lengths.len() as u32)?;
        for &len in lengths {
            out.write_u32::<LittleEndian>(len)?;
        }
        out.flush()?;

        let mut out = BufWriter::new(File::create(extended)?);
        out.write_u32::<LittleEndian>(urls.len() as u32)?;
        let mut offset = 0u32;
        for url in urls {
            out.write_u32::<LittleEndian>(offset)?;
            out.write_u32::<LittleEndian>(url.len() as u32)?;
            offset += url.len() as u32;
        }
        for url in urls {
            out.write_all(url.as_bytes())?;
        }
        out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_docmap_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let basic = dir.path().join("document_map_basic");
        let extended = dir.path().join("document_map_extended");

        DocumentMapWriter::write(
            &basic,
            &extended,
            &[3, 2, 7],
            &["http://a.example", "http://b.example", "http://c.example"],
        )
        .unwrap();

        let map = DocumentMapReader::open(&basic, &extended, None).unwrap();
        assert_eq!(map.num_docs(), 3);
        assert_eq!(map.doc_len(0), 3);
        assert_eq!(map.doc_len(2), 7);
        assert_eq!(map.doc_url(1), "http://b.example");
    }
}
