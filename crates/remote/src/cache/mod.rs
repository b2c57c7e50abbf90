//! Fixed-capacity LRU cache of remote object blocks.
//!
//! The byte space of a remote object is divided into blocks of `block_size`
//! bytes; block `n` covers `[n * block_size, (n + 1) * block_size)`. The cache
//! keeps at most `capacity` blocks in memory, fetching missing ones through a
//! caller-supplied miss handler and evicting the least recently used block
//! when full. Evicted buffers are recycled through a slot arena, so memory
//! use is bounded at `capacity * block_size` bytes for the lifetime of the
//! cache.
//!
//! # Locking
//!
//! A single mutex guards lookup, the miss handler, insertion and eviction for
//! the whole of a [`read`](BlockCache::read) call. Two callers asking for the
//! same block therefore never both fetch it, but a slow fetch blocks every
//! other reader of the same cache, even ones that would hit. Per-block locking
//! with an atomic "claim this miss" step is the way out if that ever shows up
//! in profiles; dropping the at-most-one-fetch guarantee is not.

mod arena;

use self::arena::{SlotArena, SlotId};
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::ops::Range;

pub const MEGABYTE: usize = 1 << 20;
/// Size of one cached block.
pub const DEFAULT_BLOCK_SIZE: usize = 8 * MEGABYTE;
/// Number of blocks held by a cache; total memory is `8 * 8MiB = 64MiB`.
pub const DEFAULT_BLOCK_COUNT: usize = 8;

const DEFAULT_BLOCK: NonZeroUsize = NonZeroUsize::new(DEFAULT_BLOCK_SIZE).unwrap();

/// Counters describing how a cache has been used so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

struct CacheState {
    index: LruCache<u64, SlotId>,
    arena: SlotArena,
    stats: CacheStats,
}

impl CacheState {
    /// Find the slot holding block `bid`, fetching it on a miss.
    ///
    /// A failed fetch hands its slot straight back to the arena: nothing is
    /// inserted into the index, so a later read retries the fetch.
    fn slot_for<F>(&mut self, bid: u64, miss: &mut F) -> Result<SlotId>
    where
        F: FnMut(u64, &mut [u8]) -> Result<()>,
    {
        if let Some(&slot) = self.index.get(&bid) {
            self.stats.hits += 1;
            return Ok(slot);
        }
        self.stats.misses += 1;
        tracing::debug!(block = bid, "Block cache miss");
        if self.index.len() >= self.index.cap().get()
            && let Some((evicted, slot)) = self.index.pop_lru()
        {
            // Detached from the index before the buffer is handed out again.
            tracing::debug!(block = evicted, "Evicting block");
            self.stats.evictions += 1;
            self.arena.release(slot);
        }
        let slot = self.arena.acquire();
        if let Err(err) = miss(bid, self.arena.get_mut(slot)) {
            self.arena.release(slot);
            return Err(err);
        }
        self.index.put(bid, slot);
        Ok(slot)
    }
}

/// Bounded, thread-safe block cache over one remote object.
///
/// # Examples
///
/// ```
/// use std::num::NonZeroUsize;
/// use tarn_remote::BlockCache;
///
/// let cache = BlockCache::with_block_size(NonZeroUsize::MIN, NonZeroUsize::new(4).unwrap());
/// // Pretend the object is the bytes 0, 1, 2, 3, ...
/// let fill = |bid: u64, block: &mut [u8]| -> tarn_remote::error::Result<()> {
///     for (i, byte) in block.iter_mut().enumerate() {
///         *byte = (bid as usize * 4 + i) as u8;
///     }
///     Ok(())
/// };
/// assert_eq!(cache.read(2, 7, fill).unwrap(), vec![2, 3, 4, 5, 6]);
/// ```
pub struct BlockCache {
    block_size: usize,
    state: Mutex<CacheState>,
}

impl BlockCache {
    /// Create a cache holding up to `capacity` blocks of
    /// [`DEFAULT_BLOCK_SIZE`] bytes.
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self::with_block_size(capacity, DEFAULT_BLOCK)
    }

    /// Create a cache holding up to `capacity` blocks of `block_size` bytes.
    ///
    /// Buffers are allocated on first use, not up front.
    pub fn with_block_size(capacity: NonZeroUsize, block_size: NonZeroUsize) -> Self {
        Self {
            block_size: block_size.get(),
            state: Mutex::new(CacheState {
                index: LruCache::new(capacity),
                arena: SlotArena::new(capacity.get(), block_size.get()),
                stats: CacheStats::default(),
            }),
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().index.cap().get()
    }

    /// Number of blocks currently cached.
    pub fn len(&self) -> usize {
        self.state.lock().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether block `bid` is cached. Does not count as an access.
    pub fn contains(&self, bid: u64) -> bool {
        self.state.lock().index.contains(&bid)
    }

    pub fn stats(&self) -> CacheStats {
        self.state.lock().stats
    }

    /// Read the bytes `[begin, end)` of the object into a new buffer.
    ///
    /// See [`read_into`](Self::read_into).
    pub fn read<F>(&self, begin: u64, end: u64, miss: F) -> Result<Vec<u8>>
    where
        F: FnMut(u64, &mut [u8]) -> Result<()>,
    {
        let mut out = vec![0; range_len(begin, end)?];
        self.read_into(begin, end, &mut out, miss)?;
        Ok(out)
    }

    /// Read the bytes `[begin, end)` of the object into `out`, which must be
    /// exactly `end - begin` bytes long.
    ///
    /// Every block touched by the range is looked up in block order; missing
    /// blocks are fetched by calling `miss(block_id, buffer)`, which must fill
    /// the block-sized buffer with the block's bytes. The buffer may hold
    /// stale bytes from an evicted block, so the handler has to overwrite
    /// every byte a caller could go on to read.
    ///
    /// Fails with [`InvalidRange`](ErrorKind::InvalidRange) if the range is
    /// empty or doesn't match `out`, or with whatever error `miss` returns.
    pub fn read_into<F>(&self, begin: u64, end: u64, out: &mut [u8], mut miss: F) -> Result<()>
    where
        F: FnMut(u64, &mut [u8]) -> Result<()>,
    {
        if range_len(begin, end)? != out.len() {
            exn::bail!(ErrorKind::InvalidRange { begin, end });
        }
        let block_size = self.block_size as u64;
        let mut state = self.state.lock();
        let mut written = 0;
        for bid in begin / block_size..=(end - 1) / block_size {
            let range = block_range(begin, end, bid, block_size);
            let slot = state.slot_for(bid, &mut miss)?;
            let chunk = &state.arena.get(slot)[range];
            out[written..written + chunk.len()].copy_from_slice(chunk);
            written += chunk.len();
        }
        Ok(())
    }
}

fn range_len(begin: u64, end: u64) -> Result<usize> {
    if begin >= end {
        exn::bail!(ErrorKind::InvalidRange { begin, end });
    }
    usize::try_from(end - begin).or_raise(|| ErrorKind::InvalidRange { begin, end })
}

/// Offsets within block `bid` that overlap the byte range `[begin, end)`.
fn block_range(begin: u64, end: u64, bid: u64, block_size: u64) -> Range<usize> {
    let base = bid * block_size;
    let start = begin.max(base) - base;
    let stop = end.min(base.saturating_add(block_size)) - base;
    start as usize..stop as usize
}
