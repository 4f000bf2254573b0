//! # Random-Access Reader
//!
//! Decodes any position of a compressed column in O(1): one header-word
//! load, then (for non-constant slots) one base read and one packed-field
//! read. Three physical backings share identical decode behavior and
//! differ only in I/O cost:
//!
//! - **Owned memory**: the serialized bytes are copied into an 8-aligned
//!   allocation. The only backing that supports updates; slot header
//!   words are read and published through `AtomicU64` views.
//! - **Mmap**: a persisted column mapped read-only via `memmap2`.
//! - **File**: any [`RandomRead`] source. Opening reads just the two
//!   prefix words and records region offsets; every `get` then issues
//!   individual positioned reads per field, nothing is preloaded.
//!
//! ## Growth arena
//!
//! A reader opened for updating carries an [`ExpandArena`]. Block offsets
//! below `compress_len` (the delta-blob length at open time) address the
//! main blob; offsets at or above it address the arena at
//! `offset - compress_len`. Expand updates append replacement blocks there
//! and repoint the slot header with a single release-ordered store, so
//! lock-free concurrent readers observe either the old or the new block,
//! never a mix.
//!
//! ## Concurrency
//!
//! Single writer per slot, any number of readers, no external locking.
//! Readers load the header word with acquire ordering on every access; the
//! writer fully populates a replacement block before the release store
//! that publishes it.

mod session;
mod update;

pub use session::SessionReader;
pub use update::UpdateOutcome;

use std::marker::PhantomData;
use std::path::Path;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use eyre::{bail, ensure, Result, WrapErr};
use zerocopy::FromBytes;

use crate::arena::ExpandArena;
use crate::codec::{PackedValue, SlotValue};
use crate::config::{BLOB_HEADER_SIZE, MAX_SLOT_BIT_NUM, MIN_SLOT_BIT_NUM, SLOT_HEADER_SIZE};
use crate::format::{bitpack, decode_header, BlobHeader, DeltaWidth, LongBlockHeader, SlotHeader};
use crate::io::RandomRead;
use crate::metrics::{MetricsHandle, UpdateMetrics};

enum RegionOwner {
    Owned(#[allow(dead_code)] Box<[u64]>),
    Mmap(#[allow(dead_code)] memmap2::Mmap),
}

/// A resident copy (or mapping) of the serialized column.
struct MemoryRegion {
    ptr: NonNull<u8>,
    len: usize,
    writable: bool,
    _owner: RegionOwner,
}

// SAFETY: the region's storage is uniquely owned by the reader and never
// moved or freed while it exists. Concurrent access follows the
// single-writer/lock-free-reader contract: header words go through
// AtomicU64 views, and block bytes are fully written before the header
// store that publishes them.
unsafe impl Send for MemoryRegion {}
unsafe impl Sync for MemoryRegion {}

impl MemoryRegion {
    fn from_bytes(bytes: &[u8]) -> Self {
        let words = (bytes.len() + 7) / 8;
        let mut data = vec![0u64; words].into_boxed_slice();
        // SAFETY: the destination allocation holds `words * 8 >= bytes.len()`
        // bytes and does not overlap the source.
        unsafe {
            std::ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                data.as_mut_ptr() as *mut u8,
                bytes.len(),
            );
        }
        let ptr = NonNull::new(data.as_ptr() as *mut u8).expect("boxed slice is non-null");
        Self { ptr, len: bytes.len(), writable: true, _owner: RegionOwner::Owned(data) }
    }

    fn from_mmap(map: memmap2::Mmap) -> Self {
        let len = map.len();
        let ptr = NonNull::new(map.as_ptr() as *mut u8).expect("mapping is non-null");
        Self { ptr, len, writable: false, _owner: RegionOwner::Mmap(map) }
    }

    /// Copy `buf.len()` bytes from `at` into `buf`.
    fn read(&self, at: usize, buf: &mut [u8]) -> Result<()> {
        ensure!(
            at.checked_add(buf.len()).is_some_and(|end| end <= self.len),
            "read of {} bytes at {} past end of {}-byte column",
            buf.len(),
            at,
            self.len
        );
        // SAFETY: bounds-checked above; raw copy instead of a slice read so
        // a concurrent in-place update of unrelated bytes is not UB-adjacent
        // through a long-lived shared slice.
        unsafe {
            std::ptr::copy_nonoverlapping(self.ptr.as_ptr().add(at), buf.as_mut_ptr(), buf.len());
        }
        Ok(())
    }

    /// Atomic view of the `u64` at byte offset `at` (must be 8-aligned
    /// relative to the region base, which itself is 8-aligned for owned
    /// regions and page-aligned for mappings).
    fn word(&self, at: usize) -> &AtomicU64 {
        debug_assert!(at % 8 == 0 && at + 8 <= self.len);
        // SAFETY: in-bounds and 8-aligned per the assertion; AtomicU64 has
        // the same layout as u64.
        unsafe { &*(self.ptr.as_ptr().add(at) as *const AtomicU64) }
    }
}

enum Backing {
    Memory(MemoryRegion),
    File(Box<dyn RandomRead>),
}

/// Random-access decoder (and single-writer mutator) for one compressed
/// column of `T`.
pub struct Reader<T: SlotValue> {
    item_count: u32,
    slot_bit_num: u32,
    slot_mask: u32,
    slot_count: usize,
    /// Byte offset of the delta blob within the serialized buffer.
    blob_off: u64,
    /// Delta-blob length at open time; block offsets at or above this
    /// address the arena. File backings never resolve arena offsets and
    /// use a sentinel.
    compress_len: u64,
    backing: Backing,
    arena: Option<Arc<ExpandArena>>,
    metrics: OnceLock<MetricsHandle>,
    _marker: PhantomData<T>,
}

fn parse_prefix(bytes: &[u8]) -> Result<(u32, u32)> {
    let (header, _) = BlobHeader::read_from_prefix(bytes)
        .map_err(|_| eyre::eyre!("buffer of {} bytes is too short for a column prefix", bytes.len()))?;
    let slot_bit_num = header.slot_bit_num.get();
    ensure!(
        (MIN_SLOT_BIT_NUM..=MAX_SLOT_BIT_NUM).contains(&slot_bit_num),
        "slot_bit_num {} out of range [{}, {}]",
        slot_bit_num,
        MIN_SLOT_BIT_NUM,
        MAX_SLOT_BIT_NUM
    );
    Ok((header.item_count.get(), slot_bit_num))
}

fn slot_count_for(item_count: u32, slot_bit_num: u32) -> usize {
    let slot_items = 1u64 << slot_bit_num;
    ((item_count as u64 + slot_items - 1) / slot_items) as usize
}

impl<T: SlotValue> Reader<T> {
    /// Open a read-only reader over serialized bytes (copied into an
    /// owned, update-capable region; attach an arena via
    /// [`with_arena`](Reader::with_arena) to enable expand updates).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let (item_count, slot_bit_num) = parse_prefix(bytes)?;
        let slot_count = slot_count_for(item_count, slot_bit_num);
        let blob_off = BLOB_HEADER_SIZE + slot_count * SLOT_HEADER_SIZE;
        ensure!(
            bytes.len() >= blob_off,
            "buffer of {} bytes too short for {} slot headers",
            bytes.len(),
            slot_count
        );
        Ok(Self {
            item_count,
            slot_bit_num,
            slot_mask: (1u32 << slot_bit_num) - 1,
            slot_count,
            blob_off: blob_off as u64,
            compress_len: (bytes.len() - blob_off) as u64,
            backing: Backing::Memory(MemoryRegion::from_bytes(bytes)),
            arena: None,
            metrics: OnceLock::new(),
            _marker: PhantomData,
        })
    }

    /// Open for updating: like [`from_bytes`](Reader::from_bytes), plus a
    /// growth arena to host expand-update blocks. The arena must be either
    /// fresh or one previously used with this same column (its first
    /// record is the update-metrics record).
    pub fn with_arena(bytes: &[u8], arena: Arc<ExpandArena>) -> Result<Self> {
        let mut reader = Self::from_bytes(bytes)?;
        reader.arena = Some(arena);
        Ok(reader)
    }

    /// Map a persisted column read-only.
    pub fn open_mmap<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .wrap_err_with(|| format!("failed to open column file '{}'", path.display()))?;
        // SAFETY: Mmap::map is unsafe because the file could be truncated
        // or rewritten externally. This is safe for our use because:
        // 1. Persisted columns are immutable once written by the writer.
        // 2. The mapping's lifetime is tied to the region owner, preventing
        //    use-after-unmap.
        // 3. All access is bounds-checked against the mapped length.
        let map = unsafe {
            memmap2::Mmap::map(&file)
                .wrap_err_with(|| format!("failed to memory-map '{}'", path.display()))?
        };
        let (item_count, slot_bit_num) = parse_prefix(&map)?;
        let slot_count = slot_count_for(item_count, slot_bit_num);
        let blob_off = BLOB_HEADER_SIZE + slot_count * SLOT_HEADER_SIZE;
        ensure!(
            map.len() >= blob_off,
            "mapped column '{}' too short for {} slot headers",
            path.display(),
            slot_count
        );
        Ok(Self {
            item_count,
            slot_bit_num,
            slot_mask: (1u32 << slot_bit_num) - 1,
            slot_count,
            blob_off: blob_off as u64,
            compress_len: (map.len() - blob_off) as u64,
            backing: Backing::Memory(MemoryRegion::from_mmap(map)),
            arena: None,
            metrics: OnceLock::new(),
            _marker: PhantomData,
        })
    }

    /// Open over a random-access source. Reads only the two prefix words
    /// here; every decode issues individual field reads.
    pub fn open_file<R: RandomRead + 'static>(source: R) -> Result<Self> {
        let mut prefix = [0u8; BLOB_HEADER_SIZE];
        source.read_at(0, &mut prefix).wrap_err("failed to read column prefix")?;
        let (item_count, slot_bit_num) = parse_prefix(&prefix)?;
        let slot_count = slot_count_for(item_count, slot_bit_num);
        Ok(Self {
            item_count,
            slot_bit_num,
            slot_mask: (1u32 << slot_bit_num) - 1,
            slot_count,
            blob_off: (BLOB_HEADER_SIZE + slot_count * SLOT_HEADER_SIZE) as u64,
            // File backings are read-only and never carry an arena, so no
            // offset can legitimately reach the sentinel.
            compress_len: u64::MAX,
            backing: Backing::File(Box::new(source)),
            arena: None,
            metrics: OnceLock::new(),
            _marker: PhantomData,
        })
    }

    /// Number of items in the column.
    pub fn item_count(&self) -> u32 {
        self.item_count
    }

    /// Log2 of the slot size.
    pub fn slot_bit_num(&self) -> u32 {
        self.slot_bit_num
    }

    /// Number of slots.
    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    fn is_file_backed(&self) -> bool {
        matches!(self.backing, Backing::File(_))
    }

    /// Decode the value at `pos`.
    pub fn get(&self, pos: u32) -> Result<T> {
        ensure!(pos < self.item_count, "position {} out of range {}", pos, self.item_count);
        let (slot, idx) = self.split_pos(pos);
        let word = self.load_header(slot)?;
        match decode_header::<T::Packed>(word) {
            SlotHeader::Equal { value } => Ok(T::decode(T::Packed::from_word(value))),
            SlotHeader::Delta { offset, width } => {
                let (base, width) = self.block_prefix(offset, width)?;
                let delta = self.read_delta(offset, idx, width)?;
                Ok(T::decode(T::Packed::from_word(base.wrapping_add(delta))))
            }
        }
    }

    /// Decode every position into a vector (test/scan convenience).
    pub fn to_vec(&self) -> Result<Vec<T>> {
        (0..self.item_count).map(|pos| self.get(pos)).collect()
    }

    /// Counter snapshot, once any update has materialized the metrics
    /// record in the arena.
    pub fn update_metrics(&self) -> Option<UpdateMetrics> {
        let arena = self.arena.as_ref()?;
        if arena.is_empty() {
            return None;
        }
        if self.metrics.get().is_none() {
            let handle = MetricsHandle::attach(arena).ok()?;
            let _ = self.metrics.set(handle);
        }
        self.metrics.get().map(MetricsHandle::snapshot)
    }

    // ── Internal geometry ───────────────────────────────────────────────

    #[inline]
    fn split_pos(&self, pos: u32) -> (u32, usize) {
        (pos >> self.slot_bit_num, (pos & self.slot_mask) as usize)
    }

    /// Live item count of `slot` (the last slot may be partial).
    fn slot_len(&self, slot: u32) -> usize {
        let slot_items = 1usize << self.slot_bit_num;
        let start = (slot as usize) << self.slot_bit_num;
        slot_items.min(self.item_count as usize - start)
    }

    fn prefix_size(&self) -> usize {
        if T::Packed::IS_LONG {
            std::mem::size_of::<LongBlockHeader>()
        } else {
            T::Packed::SIZE
        }
    }

    // ── Internal reads ──────────────────────────────────────────────────

    /// Load the header word of `slot`. Acquire-ordered on memory backings
    /// so a published expand is seen with its block fully written.
    fn load_header(&self, slot: u32) -> Result<u64> {
        let at = BLOB_HEADER_SIZE + slot as usize * SLOT_HEADER_SIZE;
        match &self.backing {
            Backing::Memory(region) => Ok(region.word(at).load(Ordering::Acquire)),
            Backing::File(source) => {
                let mut buf = [0u8; 8];
                source.read_at(at as u64, &mut buf)?;
                Ok(u64::from_le_bytes(buf))
            }
        }
    }

    /// Read `buf.len()` bytes at `rel` within the block at `offset`
    /// (blob-relative), resolving blob vs arena residence.
    fn read_in_block(&self, offset: u64, rel: u64, buf: &mut [u8]) -> Result<()> {
        if offset < self.compress_len {
            match &self.backing {
                Backing::Memory(region) => region.read((self.blob_off + offset + rel) as usize, buf),
                Backing::File(source) => source.read_at(self.blob_off + offset + rel, buf),
            }
        } else {
            let arena = self
                .arena
                .as_ref()
                .ok_or_else(|| eyre::eyre!("block offset {offset} addresses a growth arena, but none is attached"))?;
            arena.read(offset - self.compress_len + rel, buf)
        }
    }

    /// Read a block's base value and delta width. `header_width` is the
    /// short-form width tag; long-form blocks carry the width themselves.
    fn block_prefix(
        &self,
        offset: u64,
        header_width: Option<DeltaWidth>,
    ) -> Result<(u64, DeltaWidth)> {
        if T::Packed::IS_LONG {
            let mut buf = [0u8; std::mem::size_of::<LongBlockHeader>()];
            self.read_in_block(offset, 0, &mut buf)?;
            let header = LongBlockHeader::read_from_bytes(&buf)
                .expect("buffer length matches LongBlockHeader");
            Ok((header.base.get(), DeltaWidth::from_ordinal(header.width.get())))
        } else {
            let mut buf = [0u8; 8];
            let size = T::Packed::SIZE;
            self.read_in_block(offset, 0, &mut buf[..size])?;
            let base = u64::from_le_bytes(buf);
            let width = header_width.expect("short-form header always carries a width tag");
            Ok((base, width))
        }
    }

    /// Read one packed delta field.
    fn read_delta(&self, offset: u64, idx: usize, width: DeltaWidth) -> Result<u64> {
        let loc = bitpack::locate(idx, width);
        let mut buf = [0u8; 8];
        let rel = (self.prefix_size() + loc.offset) as u64;
        self.read_in_block(offset, rel, &mut buf[..loc.len])?;
        Ok(loc.extract(&buf[..loc.len]))
    }

    /// Read a block's entire packed array for `count` items.
    fn read_packed(
        &self,
        offset: u64,
        width: DeltaWidth,
        count: usize,
        out: &mut Vec<u8>,
    ) -> Result<()> {
        out.clear();
        out.resize(width.packed_size(count), 0);
        self.read_in_block(offset, self.prefix_size() as u64, out)
    }

    // ── Internal mutation plumbing (see update.rs) ──────────────────────

    fn writable_region(&self) -> Result<&MemoryRegion> {
        match &self.backing {
            Backing::Memory(region) if region.writable => Ok(region),
            Backing::Memory(_) => bail!("column is backed by a read-only mapping; updates need an owned copy"),
            Backing::File(_) => bail!("file-backed columns are read-only; updates need an owned copy"),
        }
    }

    /// Publish a new header word for `slot` with release ordering.
    fn store_header(&self, slot: u32, word: u64) -> Result<()> {
        let region = self.writable_region()?;
        let at = BLOB_HEADER_SIZE + slot as usize * SLOT_HEADER_SIZE;
        region.word(at).store(word, Ordering::Release);
        Ok(())
    }

    /// Raw pointer to `len` bytes at `rel` within the block at `offset`,
    /// for in-place packed-field rewrites.
    fn block_bytes_mut(&self, offset: u64, rel: u64, len: usize) -> Result<*mut u8> {
        if offset < self.compress_len {
            let region = self.writable_region()?;
            let at = (self.blob_off + offset + rel) as usize;
            ensure!(
                at.checked_add(len).is_some_and(|end| end <= region.len),
                "write of {} bytes at {} past end of {}-byte column",
                len,
                at,
                region.len
            );
            // SAFETY: bounds-checked; caller writes at most `len` bytes.
            Ok(unsafe { region.ptr.as_ptr().add(at) })
        } else {
            let arena = self
                .arena
                .as_ref()
                .ok_or_else(|| eyre::eyre!("block offset {offset} addresses a growth arena, but none is attached"))?;
            Ok(arena.resolve(offset - self.compress_len + rel, len)?.as_ptr())
        }
    }

    fn arena_handle(&self) -> Option<&Arc<ExpandArena>> {
        self.arena.as_ref()
    }

    /// Lazily materialize the metrics record (first arena allocation).
    fn metrics_handle(&self) -> Result<&MetricsHandle> {
        if self.metrics.get().is_none() {
            let arena = self
                .arena
                .as_ref()
                .ok_or_else(|| eyre::eyre!("update metrics live in the growth arena, but none is attached"))?;
            let handle = MetricsHandle::attach(arena)?;
            // A concurrent set can only come from this same single-writer
            // thread, so the race is benign.
            let _ = self.metrics.set(handle);
        }
        Ok(self.metrics.get().expect("metrics handle just initialized"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::compress;

    #[test]
    fn roundtrip_u32_mixed_slots() {
        // First slot constant, second slot delta-packed, third partial.
        let mut data = vec![5u32; 64];
        data.extend((0..64).map(|i| 1000 + i * 3));
        data.extend([7u32; 10]);
        let bytes = compress(&data, 6).unwrap();
        let reader = Reader::<u32>::from_bytes(&bytes).unwrap();
        assert_eq!(reader.item_count(), 138);
        assert_eq!(reader.slot_count(), 3);
        for (pos, &expect) in data.iter().enumerate() {
            assert_eq!(reader.get(pos as u32).unwrap(), expect);
        }
    }

    #[test]
    fn roundtrip_all_supported_types() {
        macro_rules! check {
            ($ty:ty, $gen:expr) => {
                let data: Vec<$ty> = (0..200u32).map($gen).collect();
                let bytes = compress(&data, 6).unwrap();
                let reader = Reader::<$ty>::from_bytes(&bytes).unwrap();
                assert_eq!(reader.to_vec().unwrap(), data);
            };
        }
        check!(u8, |i| (i % 251) as u8);
        check!(i8, |i| (i as i32 % 101 - 50) as i8);
        check!(u16, |i| (i * 37) as u16);
        check!(i16, |i| (i as i32 * 13 - 1000) as i16);
        check!(u32, |i| i.wrapping_mul(0x9e37_79b9));
        check!(i32, |i| i as i32 - 100);
        check!(u64, |i| (i as u64) << 40);
        check!(i64, |i| -(i as i64) * 1_000_000_007);
        check!(f32, |i| i as f32 * 0.25 - 10.0);
        check!(f64, |i| i as f64 * 1e-3);
    }

    #[test]
    fn get_rejects_out_of_range_positions() {
        let bytes = compress(&[1u32, 2, 3], 6).unwrap();
        let reader = Reader::<u32>::from_bytes(&bytes).unwrap();
        assert!(reader.get(2).is_ok());
        assert!(reader.get(3).is_err());
        assert!(reader.get(u32::MAX).is_err());
    }

    #[test]
    fn file_backing_decodes_identically() {
        let data: Vec<i64> = (0..300).map(|i| (i % 17) * 1_000 - 8_000).collect();
        let bytes = compress(&data, 6).unwrap();

        let memory = Reader::<i64>::from_bytes(&bytes).unwrap();
        let file = Reader::<i64>::open_file(bytes.clone()).unwrap();
        for pos in 0..data.len() as u32 {
            assert_eq!(memory.get(pos).unwrap(), file.get(pos).unwrap());
        }
    }

    #[test]
    fn top_bit_u64_constant_slot_roundtrips_through_delta_block() {
        let data = vec![1u64 << 63; 64];
        let bytes = compress(&data, 6).unwrap();
        let reader = Reader::<u64>::from_bytes(&bytes).unwrap();

        let word = reader.load_header(0).unwrap();
        match decode_header::<u64>(word) {
            SlotHeader::Delta { offset, width } => {
                assert_eq!(width, None);
                let (base, width) = reader.block_prefix(offset, None).unwrap();
                assert_eq!(base, 1u64 << 63);
                assert_eq!(width, DeltaWidth::Bit1);
            }
            SlotHeader::Equal { .. } => panic!("top-bit constant must not be an Equal slot"),
        }
        assert_eq!(reader.to_vec().unwrap(), data);
    }

    #[test]
    fn rejects_truncated_buffers() {
        let bytes = compress(&vec![9u32; 100], 6).unwrap();
        assert!(Reader::<u32>::from_bytes(&bytes[..4]).is_err());
        assert!(Reader::<u32>::from_bytes(&bytes[..12]).is_err());
    }
}
