//! # Growth Arena
//!
//! Append-only byte store backing expand updates. Three properties matter
//! to the codec and are the whole contract:
//!
//! 1. **Stable offsets**: `append` returns a logical byte offset that
//!    resolves to the same bytes forever. Chunks are never moved, resized,
//!    or freed.
//! 2. **No reclamation**: blocks abandoned by later expands of the same
//!    slot stay allocated. Garbage accumulates and is only measured (via
//!    the update-metrics record), never compacted: compaction would trade
//!    the codec's update latency profile for memory, and the design
//!    explicitly keeps the opposite trade.
//! 3. **Hard quota**: appends past the byte quota fail with no mutation.
//!
//! ## Layout
//!
//! Storage is a directory of fixed-size chunks (`Box<[u64]>`, so every
//! chunk base is 8-aligned and the offset-0 metrics record can be viewed
//! through `AtomicU64`). A record never straddles chunks: when the current
//! chunk's tail is too short, the tail is abandoned (its bytes still count
//! toward the logical length) and a new chunk is opened. Oversized records
//! get a dedicated chunk.
//!
//! ## Thread Safety
//!
//! The chunk directory sits behind a `parking_lot::RwLock`: appends take
//! the write lock, reads the read lock. Readers resolving a block already
//! published by a header swap therefore never block each other.

use std::ptr::NonNull;

use eyre::{bail, ensure, Result};
use parking_lot::RwLock;

use crate::config::{DEFAULT_ARENA_CHUNK_SIZE, DEFAULT_ARENA_QUOTA};

struct Chunk {
    /// Logical offset of the chunk's first byte.
    start: u64,
    /// Bytes handed out from this chunk.
    used: usize,
    data: Box<[u64]>,
}

impl Chunk {
    fn new(start: u64, capacity: usize) -> Self {
        let words = (capacity + 7) / 8;
        Self { start, used: 0, data: vec![0u64; words].into_boxed_slice() }
    }

    fn capacity(&self) -> usize {
        self.data.len() * 8
    }

    fn as_ptr(&self) -> *const u8 {
        self.data.as_ptr() as *const u8
    }
}

struct ArenaInner {
    chunks: Vec<Chunk>,
    /// Next logical offset, abandoned tails included.
    len: u64,
    /// Total bytes of chunk capacity allocated so far.
    allocated: usize,
}

/// Append-only, offset-stable, quota-tracked byte store.
pub struct ExpandArena {
    chunk_size: usize,
    quota: usize,
    inner: RwLock<ArenaInner>,
}

impl Default for ExpandArena {
    fn default() -> Self {
        Self::new(DEFAULT_ARENA_CHUNK_SIZE, DEFAULT_ARENA_QUOTA)
    }
}

impl ExpandArena {
    /// Arena with explicit chunk size and byte quota.
    pub fn new(chunk_size: usize, quota: usize) -> Self {
        assert!(chunk_size >= 64, "arena chunk size too small to be useful");
        Self { chunk_size, quota, inner: RwLock::new(ArenaInner { chunks: Vec::new(), len: 0, allocated: 0 }) }
    }

    /// Arena with the default chunk size and a caller-chosen quota.
    pub fn with_quota(quota: usize) -> Self {
        Self::new(DEFAULT_ARENA_CHUNK_SIZE, quota)
    }

    /// Logical length in bytes (abandoned tails included).
    pub fn len(&self) -> u64 {
        self.inner.read().len
    }

    /// True when nothing has ever been appended.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append `bytes`, returning their stable logical offset.
    pub fn append(&self, bytes: &[u8]) -> Result<u64> {
        ensure!(!bytes.is_empty(), "cannot append an empty record to the arena");
        let mut inner = self.inner.write();

        let fits_tail = inner
            .chunks
            .last()
            .map(|c| c.capacity() - c.used >= bytes.len())
            .unwrap_or(false);

        if !fits_tail {
            // Abandon the tail of the current chunk; its bytes remain part
            // of the logical length so existing offsets stay valid.
            let next_start = inner
                .chunks
                .last_mut()
                .map(|c| {
                    c.used = c.capacity();
                    c.start + c.capacity() as u64
                })
                .unwrap_or(0);

            let capacity = self.chunk_size.max(bytes.len());
            if inner.allocated + capacity > self.quota {
                bail!(
                    "arena quota exhausted: {} bytes allocated, chunk of {} would exceed quota {}",
                    inner.allocated,
                    capacity,
                    self.quota
                );
            }
            inner.chunks.push(Chunk::new(next_start, capacity));
            inner.allocated += capacity;
            inner.len = next_start;
        }

        let len = inner.len;
        let chunk = inner.chunks.last_mut().expect("chunk exists after fit check");
        let offset = chunk.start + chunk.used as u64;
        debug_assert_eq!(offset, len);

        // SAFETY: the destination range is inside this chunk's allocation
        // (fit was just checked under the write lock) and nothing reads
        // these bytes until `append` returns the offset.
        unsafe {
            let dst = (chunk.data.as_mut_ptr() as *mut u8).add(chunk.used);
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), dst, bytes.len());
        }
        chunk.used += bytes.len();
        inner.len = offset + bytes.len() as u64;
        Ok(offset)
    }

    /// Copy `buf.len()` bytes starting at logical `offset` into `buf`.
    pub fn read(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let ptr = self.resolve(offset, buf.len())?;
        // SAFETY: `resolve` bounds-checked the range against the owning
        // chunk's handed-out bytes, and chunk storage is never moved or
        // freed for the arena's lifetime.
        unsafe {
            std::ptr::copy_nonoverlapping(ptr.as_ptr(), buf.as_mut_ptr(), buf.len());
        }
        Ok(())
    }

    /// Resolve a logical range to a stable pointer into chunk storage.
    ///
    /// The pointer stays valid for the arena's lifetime (chunks are never
    /// moved or freed). Used by the metrics record for its atomic counter
    /// views; `offset` 0 is always 8-aligned.
    pub(crate) fn resolve(&self, offset: u64, len: usize) -> Result<NonNull<u8>> {
        let inner = self.inner.read();
        let idx = match inner.chunks.binary_search_by(|c| c.start.cmp(&offset)) {
            Ok(i) => i,
            Err(0) => bail!("arena offset {offset} precedes first chunk"),
            Err(i) => i - 1,
        };
        let chunk = &inner.chunks[idx];
        let within = (offset - chunk.start) as usize;
        ensure!(
            within + len <= chunk.used,
            "arena range [{offset}, +{len}) escapes its chunk ({} bytes used)",
            chunk.used
        );
        // SAFETY: within is inside the chunk's allocation per the check above.
        let ptr = unsafe { chunk.as_ptr().add(within) as *mut u8 };
        Ok(NonNull::new(ptr).expect("chunk storage is non-null"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_returns_monotonic_stable_offsets() {
        let arena = ExpandArena::new(64, 4096);
        let a = arena.append(&[1u8; 10]).unwrap();
        let b = arena.append(&[2u8; 10]).unwrap();
        assert_eq!(a, 0);
        assert_eq!(b, 10);
        assert_eq!(arena.len(), 20);

        let mut buf = [0u8; 10];
        arena.read(a, &mut buf).unwrap();
        assert_eq!(buf, [1u8; 10]);
        arena.read(b, &mut buf).unwrap();
        assert_eq!(buf, [2u8; 10]);
    }

    #[test]
    fn records_survive_chunk_rollover() {
        let arena = ExpandArena::new(64, 4096);
        let first = arena.append(&[7u8; 40]).unwrap();
        // 24 bytes of tail left; a 40-byte record abandons it.
        let second = arena.append(&[9u8; 40]).unwrap();
        assert_eq!(second, 64, "rollover must skip the abandoned tail");

        let mut buf = [0u8; 40];
        arena.read(first, &mut buf).unwrap();
        assert_eq!(buf, [7u8; 40]);
        arena.read(second, &mut buf).unwrap();
        assert_eq!(buf, [9u8; 40]);
    }

    #[test]
    fn oversized_records_get_dedicated_chunks() {
        let arena = ExpandArena::new(64, 4096);
        let offset = arena.append(&[3u8; 200]).unwrap();
        assert_eq!(offset, 0);
        let next = arena.append(&[4u8; 8]).unwrap();
        assert_eq!(next, 200);
    }

    #[test]
    fn quota_is_a_hard_limit() {
        let arena = ExpandArena::new(64, 128);
        arena.append(&[0u8; 64]).unwrap();
        arena.append(&[0u8; 64]).unwrap();
        let len_before = arena.len();
        assert!(arena.append(&[0u8; 8]).is_err());
        assert_eq!(arena.len(), len_before, "failed append must not mutate");
    }

    #[test]
    fn reads_cannot_escape_handed_out_bytes() {
        let arena = ExpandArena::new(64, 4096);
        arena.append(&[1u8; 8]).unwrap();
        let mut buf = [0u8; 16];
        assert!(arena.read(0, &mut buf).is_err());
        assert!(arena.read(100, &mut [0u8; 1]).is_err());
    }
}
