//! # Batch Encoder
//!
//! Accumulates encoded values into a slot-sized buffer and flushes one slot
//! at a time into a growing header array + delta blob. The flush decision
//! is a single left-to-right pass over the slot buffer:
//!
//! 1. `base = buf[0]`, `max_delta = 0`.
//! 2. For each later value `v`, in encounter order:
//!    - `v == base`: skip.
//!    - `v <= base`: `max_delta += base - v`, then rebase `base = v`.
//!    - otherwise: `max_delta = max(max_delta, v - base)`.
//! 3. `max_delta == 0` and the constant fits its header payload field →
//!    emit an `Equal` header, no block.
//! 4. Otherwise pick the smallest width holding `max_delta`; if that width
//!    already spans the full packed type, force `base = 0` (the deltas
//!    become the raw encoded values); emit the block and a header pointing
//!    at it.
//!
//! The step-2 pass is deliberately order-dependent rather than a tidy
//! min/max scan. It is part of the wire contract: readers written against
//! buffers produced this way must see identical widths and bases, so the
//! pass is preserved exactly and pinned by tests.
//!
//! 64-bit packed types additionally fall through to a delta block when a
//! would-be constant has its top bit set (it cannot fit the 63-bit header
//! payload); the block then carries the constant as `base` with all-zero
//! deltas.

use eyre::{ensure, Result};
use zerocopy::little_endian::{U32, U64};
use zerocopy::IntoBytes;

use crate::codec::{PackedValue, SlotValue};
use crate::config::{BLOB_HEADER_SIZE, MAX_SLOT_BIT_NUM, MIN_SLOT_BIT_NUM, SLOT_HEADER_SIZE};
use crate::format::{
    bitpack, block_size, delta_header, equal_header, BlobHeader, DeltaWidth, LongBlockHeader,
};

/// Flush decision for one slot buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotPlan {
    Equal { value: u64 },
    Delta { base: u64, width: DeltaWidth },
}

/// The left-to-right base/max-delta pass. Returns `(base, max_delta)` with
/// `base` the running minimum and `max_delta` guaranteed to cover
/// `v - base` for every value in the buffer.
fn scan_slot(buf: &[u64]) -> (u64, u64) {
    let mut base = buf[0];
    let mut max_delta = 0u64;
    for &v in &buf[1..] {
        if v == base {
            continue;
        }
        if v <= base {
            max_delta += base - v;
            base = v;
        } else {
            let delta = v - base;
            if delta > max_delta {
                max_delta = delta;
            }
        }
    }
    (base, max_delta)
}

fn plan_slot<P: PackedValue>(buf: &[u64]) -> SlotPlan {
    let (base, max_delta) = scan_slot(buf);
    if max_delta == 0 && equal_header::<P>(base).is_some() {
        return SlotPlan::Equal { value: base };
    }
    let width = DeltaWidth::select(max_delta);
    let base = if width.reaches_max::<P>() { 0 } else { base };
    SlotPlan::Delta { base, width }
}

/// Batch encoder for one column of `T` values.
///
/// Values are pushed in position order; [`finish`](Writer::finish) flushes
/// the trailing partial slot and returns the serialized buffer.
pub struct Writer<T: SlotValue> {
    slot_bit_num: u32,
    slot_items: usize,
    buf: Vec<u64>,
    headers: Vec<u64>,
    blob: Vec<u8>,
    item_count: u64,
    _marker: std::marker::PhantomData<T>,
}

impl<T: SlotValue> Writer<T> {
    /// Create a writer with `1 << slot_bit_num` items per slot.
    pub fn new(slot_bit_num: u32) -> Result<Self> {
        ensure!(
            (MIN_SLOT_BIT_NUM..=MAX_SLOT_BIT_NUM).contains(&slot_bit_num),
            "slot_bit_num {} out of range [{}, {}]",
            slot_bit_num,
            MIN_SLOT_BIT_NUM,
            MAX_SLOT_BIT_NUM
        );
        let slot_items = 1usize << slot_bit_num;
        Ok(Self {
            slot_bit_num,
            slot_items,
            buf: Vec::with_capacity(slot_items),
            headers: Vec::new(),
            blob: Vec::new(),
            item_count: 0,
            _marker: std::marker::PhantomData,
        })
    }

    /// Number of values pushed so far.
    pub fn item_count(&self) -> u64 {
        self.item_count
    }

    /// Append one value.
    pub fn push(&mut self, value: T) {
        assert!(self.item_count < u32::MAX as u64, "column exceeds u32 item count");
        self.buf.push(value.encode().to_word());
        self.item_count += 1;
        if self.buf.len() == self.slot_items {
            self.flush_slot();
        }
    }

    /// Append every value of an iterator.
    pub fn extend<I: IntoIterator<Item = T>>(&mut self, values: I) {
        for v in values {
            self.push(v);
        }
    }

    fn flush_slot(&mut self) {
        let plan = plan_slot::<T::Packed>(&self.buf);
        let header = match plan {
            SlotPlan::Equal { value } => {
                equal_header::<T::Packed>(value).expect("planned Equal slot must fit header")
            }
            SlotPlan::Delta { base, width } => {
                let offset = self.blob.len() as u64;
                self.emit_block(base, width);
                delta_header::<T::Packed>(offset, width)
            }
        };
        self.headers.push(header);
        self.buf.clear();
    }

    fn emit_block(&mut self, base: u64, width: DeltaWidth) {
        if T::Packed::IS_LONG {
            let prefix = LongBlockHeader { base: U64::new(base), width: U64::new(width as u64) };
            self.blob.extend_from_slice(prefix.as_bytes());
        } else {
            self.blob.extend_from_slice(&base.to_le_bytes()[..T::Packed::SIZE]);
        }
        let packed_at = self.blob.len();
        self.blob.resize(packed_at + width.packed_size(self.buf.len()), 0);
        let packed = &mut self.blob[packed_at..];
        for (i, &v) in self.buf.iter().enumerate() {
            bitpack::set(packed, i, width, v - base);
        }
    }

    /// Serialized byte length if the writer were finished now (any pending
    /// partial slot included).
    pub fn serialized_size(&self) -> usize {
        let mut slots = self.headers.len();
        let mut blob = self.blob.len();
        if !self.buf.is_empty() {
            slots += 1;
            if let SlotPlan::Delta { width, .. } = plan_slot::<T::Packed>(&self.buf) {
                blob += block_size::<T::Packed>(width, self.buf.len());
            }
        }
        BLOB_HEADER_SIZE + slots * SLOT_HEADER_SIZE + blob
    }

    fn finish_parts(mut self) -> (BlobHeader, Vec<u64>, Vec<u8>) {
        if !self.buf.is_empty() {
            self.flush_slot();
        }
        let header = BlobHeader {
            item_count: U32::new(self.item_count as u32),
            slot_bit_num: U32::new(self.slot_bit_num),
        };
        (header, self.headers, self.blob)
    }

    /// Flush and serialize into a fresh buffer.
    pub fn finish(self) -> Vec<u8> {
        let size = self.serialized_size();
        let (header, headers, blob) = self.finish_parts();
        let mut out = Vec::with_capacity(size);
        out.extend_from_slice(header.as_bytes());
        for word in &headers {
            out.extend_from_slice(&word.to_le_bytes());
        }
        out.extend_from_slice(&blob);
        debug_assert_eq!(out.len(), size);
        out
    }

    /// Flush and serialize into a caller-provided buffer. Returns the
    /// number of bytes written, or `0` when the buffer is too small;
    /// nothing is written in that case.
    pub fn finish_into(self, out: &mut [u8]) -> usize {
        let size = self.serialized_size();
        if out.len() < size {
            return 0;
        }
        let (header, headers, blob) = self.finish_parts();
        out[..BLOB_HEADER_SIZE].copy_from_slice(header.as_bytes());
        let mut at = BLOB_HEADER_SIZE;
        for word in &headers {
            out[at..at + SLOT_HEADER_SIZE].copy_from_slice(&word.to_le_bytes());
            at += SLOT_HEADER_SIZE;
        }
        out[at..at + blob.len()].copy_from_slice(&blob);
        at + blob.len()
    }
}

/// One-shot compression of a value slice.
pub fn compress<T: SlotValue>(values: &[T], slot_bit_num: u32) -> Result<Vec<u8>> {
    let mut writer = Writer::new(slot_bit_num)?;
    writer.extend(values.iter().copied());
    Ok(writer.finish())
}

/// Serialized size of `values` at `slot_bit_num`, computed by running the
/// flush decisions without emitting any bytes. Callers use this to size
/// output buffers before allocation.
pub fn compressed_size<T: SlotValue>(values: &[T], slot_bit_num: u32) -> Result<usize> {
    ensure!(
        (MIN_SLOT_BIT_NUM..=MAX_SLOT_BIT_NUM).contains(&slot_bit_num),
        "slot_bit_num {} out of range [{}, {}]",
        slot_bit_num,
        MIN_SLOT_BIT_NUM,
        MAX_SLOT_BIT_NUM
    );
    let slot_items = 1usize << slot_bit_num;
    let mut blob = 0usize;
    let mut slots = 0usize;
    let mut buf = Vec::with_capacity(slot_items.min(values.len()));
    for chunk in values.chunks(slot_items) {
        buf.clear();
        buf.extend(chunk.iter().map(|v| v.encode().to_word()));
        slots += 1;
        if let SlotPlan::Delta { width, .. } = plan_slot::<T::Packed>(&buf) {
            blob += block_size::<T::Packed>(width, buf.len());
        }
    }
    Ok(BLOB_HEADER_SIZE + slots * SLOT_HEADER_SIZE + blob)
}
