//! # Session Reader
//!
//! Per-caller caching wrapper for file-backed readers. A plain
//! [`Reader::get`] on a file backing costs one header read plus two block
//! reads per access; scans and locality-biased lookups revisit the same
//! slot over and over. The session reader keeps the last visited slot
//! decoded (header, base, width, and the whole packed array) and serves
//! repeat visits from that cache, refetching only on a slot change.
//!
//! Purely a performance layer: on memory backings it forwards straight to
//! the reader (there is nothing to save), and its answers equal the
//! reader's. The cache can serve data staled by a concurrent update for
//! the duration of one cached slot visit; that staleness window is part of
//! the read contract, not a bug.

use eyre::Result;

use crate::codec::{PackedValue, SlotValue};
use crate::format::{bitpack, decode_header, DeltaWidth, SlotHeader};
use crate::reader::Reader;

enum CachedSlot {
    Empty,
    Equal { value: u64 },
    Delta { base: u64, width: DeltaWidth, packed: Vec<u8> },
}

/// Caching accessor for sequential / locality-biased reads.
pub struct SessionReader<'r, T: SlotValue> {
    reader: &'r Reader<T>,
    slot: Option<u32>,
    cached: CachedSlot,
}

impl<'r, T: SlotValue> SessionReader<'r, T> {
    pub fn new(reader: &'r Reader<T>) -> Self {
        Self { reader, slot: None, cached: CachedSlot::Empty }
    }

    /// Decode the value at `pos`, reusing the cached slot when possible.
    pub fn get(&mut self, pos: u32) -> Result<T> {
        if !self.reader.is_file_backed() {
            return self.reader.get(pos);
        }
        eyre::ensure!(
            pos < self.reader.item_count(),
            "position {} out of range {}",
            pos,
            self.reader.item_count()
        );
        let (slot, idx) = self.reader.split_pos(pos);
        if self.slot != Some(slot) {
            self.load_slot(slot)?;
        }
        let word = match &self.cached {
            CachedSlot::Equal { value } => *value,
            CachedSlot::Delta { base, width, packed } => {
                base.wrapping_add(bitpack::get(packed, idx, *width))
            }
            CachedSlot::Empty => unreachable!("cache filled by load_slot"),
        };
        Ok(T::decode(T::Packed::from_word(word)))
    }

    fn load_slot(&mut self, slot: u32) -> Result<()> {
        // Recycle the packed buffer across slot changes.
        let mut packed = match std::mem::replace(&mut self.cached, CachedSlot::Empty) {
            CachedSlot::Delta { packed, .. } => packed,
            _ => Vec::new(),
        };
        let word = self.reader.load_header(slot)?;
        self.cached = match decode_header::<T::Packed>(word) {
            SlotHeader::Equal { value } => CachedSlot::Equal { value },
            SlotHeader::Delta { offset, width } => {
                let (base, width) = self.reader.block_prefix(offset, width)?;
                self.reader.read_packed(offset, width, self.reader.slot_len(slot), &mut packed)?;
                CachedSlot::Delta { base, width, packed }
            }
        };
        self.slot = Some(slot);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::RandomRead;
    use crate::writer::compress;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingSource {
        data: Vec<u8>,
        reads: Arc<AtomicUsize>,
    }

    impl RandomRead for CountingSource {
        fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
            self.reads.fetch_add(1, Ordering::Relaxed);
            self.data.read_at(offset, buf)
        }
    }

    #[test]
    fn session_matches_plain_reader() {
        let data: Vec<u32> = (0..200).map(|i| i * 11 % 57).collect();
        let bytes = compress(&data, 6).unwrap();
        let reader = Reader::<u32>::open_file(bytes).unwrap();
        let mut session = SessionReader::new(&reader);
        for pos in 0..200u32 {
            assert_eq!(session.get(pos).unwrap(), reader.get(pos).unwrap());
        }
        // Backward pass exercises re-caching of earlier slots.
        for pos in (0..200u32).rev() {
            assert_eq!(session.get(pos).unwrap(), data[pos as usize]);
        }
    }

    #[test]
    fn same_slot_accesses_issue_no_new_reads() {
        let data: Vec<u16> = (0..128).map(|i| 40 + (i % 30) as u16).collect();
        let bytes = compress(&data, 6).unwrap();
        let reads = Arc::new(AtomicUsize::new(0));
        let source = CountingSource { data: bytes, reads: reads.clone() };
        let reader = Reader::<u16>::open_file(source).unwrap();

        let mut session = SessionReader::new(&reader);
        session.get(0).unwrap();
        let after_first = reads.load(Ordering::Relaxed);
        for pos in 1..64u32 {
            session.get(pos).unwrap();
        }
        assert_eq!(
            reads.load(Ordering::Relaxed),
            after_first,
            "reads within one cached slot must be free"
        );

        session.get(64).unwrap();
        assert!(reads.load(Ordering::Relaxed) > after_first, "new slot refetches once");
    }

    #[test]
    fn memory_backed_session_is_a_passthrough() {
        let data: Vec<i16> = (0..100).map(|i| i - 50).collect();
        let bytes = compress(&data, 6).unwrap();
        let reader = Reader::<i16>::from_bytes(&bytes).unwrap();
        let mut session = SessionReader::new(&reader);
        for pos in 0..100u32 {
            assert_eq!(session.get(pos).unwrap(), data[pos as usize]);
        }
    }

    #[test]
    fn session_rejects_out_of_range_positions() {
        let bytes = compress(&vec![1u32; 10], 6).unwrap();
        let reader = Reader::<u32>::open_file(bytes).unwrap();
        let mut session = SessionReader::new(&reader);
        assert!(session.get(10).is_err());
    }
}
