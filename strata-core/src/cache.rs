//! Block-level access to the posting file.
//!
//! All reader traffic goes through a `CacheManager`: the evaluator requests
//! a block, uses the returned page until it frees it, and never touches the
//! file directly. Three query-time variants are provided (fully resident,
//! memory mapped, LRU with read-ahead) plus a sequential variant for the
//! merge/layerify path.

use std::fs::File;
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::Arc;

use memmap2::Mmap;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::error::{Error, Result};
use crate::layout::{BLOCK_SIZE, READ_AHEAD_BLOCKS};

/// A pinned view of one 65,536-byte block.
#[derive(Clone)]
pub struct BlockRef {
    data: Arc<dyn AsRef<[u8]> + Send + Sync>,
    offset: usize,
}

impl BlockRef {
    fn new(data: Arc<dyn AsRef<[u8]> + Send + Sync>, offset: usize) -> Self {
        Self { data, offset }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data.as_ref().as_ref()[self.offset..self.offset + BLOCK_SIZE]
    }
}

/// Result of a block fetch; `from_disk` is true when this fetch (or the
/// read-ahead that preceded it) pulled the block off disk.
pub struct BlockFetch {
    pub data: BlockRef,
    pub from_disk: bool,
}

/// Block-level I/O over the posting file.
///
/// Single-writer: one evaluator drives the cache at a time. Pages returned
/// by `get_block` stay valid until the matching `free_block`.
pub trait CacheManager: Send + Sync {
    /// Hint that `block_num` will be needed; may read ahead.
    fn queue_block(&self, block_num: u64);

    /// Fetch a block, reading it if necessary. A read failure is fatal for
    /// the current query and surfaced here.
    fn get_block(&self, block_num: u64) -> Result<BlockFetch>;

    /// Release a reference obtained from `get_block`.
    fn free_block(&self, block_num: u64);

    /// Number of blocks in the posting file.
    fn total_index_blocks(&self) -> u64;
}

fn block_count(len: u64, path: &Path) -> Result<u64> {
    if len % BLOCK_SIZE as u64 != 0 {
        return Err(Error::Format(format!(
            "index file '{}' is not a multiple of the block size",
            path.display()
        )));
    }
    Ok(len / BLOCK_SIZE as u64)
}

fn check_block_num(block_num: u64, total: u64) -> Result<()> {
    if block_num >= total {
        return Err(Error::Format(format!(
            "block {block_num} out of range ({total} blocks)"
        )));
    }
    Ok(())
}

/// Whole posting file resident in one allocation.
pub struct FullContiguousCache {
    data: Arc<Vec<u8>>,
    num_blocks: u64,
}

impl FullContiguousCache {
    pub fn open(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)?;
        let num_blocks = block_count(data.len() as u64, path)?;
        Ok(Self {
            data: Arc::new(data),
            num_blocks,
        })
    }
}

impl CacheManager for FullContiguousCache {
    fn queue_block(&self, _block_num: u64) {}

    fn get_block(&self, block_num: u64) -> Result<BlockFetch> {
        check_block_num(block_num, self.num_blocks)?;
        Ok(BlockFetch {
            data: BlockRef::new(self.data.clone(), block_num as usize * BLOCK_SIZE),
            from_disk: false,
        })
    }

    fn free_block(&self, _block_num: u64) {}

    fn total_index_blocks(&self) -> u64 {
        self.num_blocks
    }
}

/// Memory-mapped posting file; the OS pages blocks in and out.
pub struct MmapCache {
    map: Arc<Mmap>,
    num_blocks: u64,
}

impl MmapCache {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let map = unsafe { Mmap::map(&file)? };
        let num_blocks = block_count(map.len() as u64, path)?;
        Ok(Self {
            map: Arc::new(map),
            num_blocks,
        })
    }
}

impl CacheManager for MmapCache {
    fn queue_block(&self, _block_num: u64) {}

    fn get_block(&self, block_num: u64) -> Result<BlockFetch> {
        check_block_num(block_num, self.num_blocks)?;
        Ok(BlockFetch {
            data: BlockRef::new(self.map.clone(), block_num as usize * BLOCK_SIZE),
            from_disk: false,
        })
    }

    fn free_block(&self, _block_num: u64) {}

    fn total_index_blocks(&self) -> u64 {
        self.num_blocks
    }
}

struct Page {
    data: Arc<Vec<u8>>,
    pins: u32,
    last_freed: u64,
    /// Read from disk and not yet observed through `get_block`.
    fresh: bool,
}

struct LruState {
    pages: FxHashMap<u64, Page>,
    tick: u64,
}

/// LRU page cache with a fixed byte budget and coalesced read-ahead.
///
/// `queue_block` reads the longest run of adjacent missing blocks (up to
/// `READ_AHEAD_BLOCKS`) in a single positioned read. Eviction is
/// least-recently-freed among unpinned pages.
pub struct LruCache {
    file: File,
    num_blocks: u64,
    budget_blocks: usize,
    state: Mutex<LruState>,
}

impl LruCache {
    pub fn open(path: &Path, budget_bytes: usize) -> Result<Self> {
        let file = File::open(path)?;
        let num_blocks = block_count(file.metadata()?.len(), path)?;
        let budget_blocks = (budget_bytes / BLOCK_SIZE).max(READ_AHEAD_BLOCKS as usize * 2);
        Ok(Self {
            file,
            num_blocks,
            budget_blocks,
            state: Mutex::new(LruState {
                pages: FxHashMap::default(),
                tick: 0,
            }),
        })
    }

    /// Read `count` adjacent blocks starting at `start` in one call and
    /// install them as fresh pages.
    fn read_run(&self, state: &mut LruState, start: u64, count: u64) -> Result<()> {
        let mut buf = vec![0u8; (count as usize) * BLOCK_SIZE];
        self.file
            .read_exact_at(&mut buf, start * BLOCK_SIZE as u64)?;
        for (i, chunk) in buf.chunks_exact(BLOCK_SIZE).enumerate() {
            state.tick += 1;
            let tick = state.tick;
            state.pages.insert(
                start + i as u64,
                Page {
                    data: Arc::new(chunk.to_vec()),
                    pins: 0,
                    last_freed: tick,
                    fresh: true,
                },
            );
        }
        self.evict(state);
        Ok(())
    }

    fn evict(&self, state: &mut LruState) {
        while state.pages.len() > self.budget_blocks {
            let victim = state
                .pages
                .iter()
                .filter(|(_, p)| p.pins == 0)
                .min_by_key(|(_, p)| p.last_freed)
                .map(|(&num, _)| num);
            match victim {
                Some(num) => {
                    state.pages.remove(&num);
                }
                None => break,
            }
        }
    }
}

impl CacheManager for LruCache {
    fn queue_block(&self, block_num: u64) {
        if block_num >= self.num_blocks {
            return;
        }
        let mut state = self.state.lock();
        let limit = (block_num + READ_AHEAD_BLOCKS).min(self.num_blocks);
        let mut run_start = block_num;
        while run_start < limit && state.pages.contains_key(&run_start) {
            run_start += 1;
        }
        let mut run_end = run_start;
        while run_end < limit && !state.pages.contains_key(&run_end) {
            run_end += 1;
        }
        if run_end > run_start {
            // Read failures surface on the subsequent get_block.
            let _ = self.read_run(&mut state, run_start, run_end - run_start);
        }
    }

    fn get_block(&self, block_num: u64) -> Result<BlockFetch> {
        check_block_num(block_num, self.num_blocks)?;
        let mut state = self.state.lock();
        if !state.pages.contains_key(&block_num) {
            self.read_run(&mut state, block_num, 1)?;
        }
        let page = state
            .pages
            .get_mut(&block_num)
            .ok_or_else(|| Error::Format(format!("block {block_num} evicted while queued")))?;
        page.pins += 1;
        let from_disk = page.fresh;
        page.fresh = false;
        Ok(BlockFetch {
            data: BlockRef::new(page.data.clone(), 0),
            from_disk,
        })
    }

    fn free_block(&self, block_num: u64) {
        let mut state = self.state.lock();
        state.tick += 1;
        let tick = state.tick;
        if let Some(page) = state.pages.get_mut(&block_num) {
            page.pins = page.pins.saturating_sub(1);
            page.last_freed = tick;
        }
    }

    fn total_index_blocks(&self) -> u64 {
        self.num_blocks
    }
}

/// Sequential cache for merge-style scans: keeps only the current block.
pub struct MergingCache {
    file: File,
    num_blocks: u64,
    current: Mutex<Option<(u64, Arc<Vec<u8>>)>>,
}

impl MergingCache {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let num_blocks = block_count(file.metadata()?.len(), path)?;
        Ok(Self {
            file,
            num_blocks,
            current: Mutex::new(None),
        })
    }
}

impl CacheManager for MergingCache {
    fn queue_block(&self, _block_num: u64) {}

    fn get_block(&self, block_num: u64) -> Result<BlockFetch> {
        check_block_num(block_num, self.num_blocks)?;
        let mut current = self.current.lock();
        if let Some((num, data)) = current.as_ref() {
            if *num == block_num {
                return Ok(BlockFetch {
                    data: BlockRef::new(data.clone(), 0),
                    from_disk: false,
                });
            }
        }
        let mut buf = vec![0u8; BLOCK_SIZE];
        self.file
            .read_exact_at(&mut buf, block_num * BLOCK_SIZE as u64)?;
        let data = Arc::new(buf);
        *current = Some((block_num, data.clone()));
        Ok(BlockFetch {
            data: BlockRef::new(data, 0),
            from_disk: true,
        })
    }

    fn free_block(&self, _block_num: u64) {}

    fn total_index_blocks(&self) -> u64 {
        self.num_blocks
    }
}
