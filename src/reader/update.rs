//! # Online Update Paths
//!
//! Single-value mutation of a compressed column without rewriting it.
//! Two strategies, chosen per update:
//!
//! - **In place**: the new delta fits the slot's current packed width
//!   (same or narrower; the packed region is fixed-size, so widening is
//!   impossible), and only the one packed field is rewritten.
//! - **Expand**: the value needs a wider width, a lower base, or the slot
//!   was constant. The slot's live items are re-encoded into a fresh block
//!   appended to the growth arena, and the slot header is repointed with a
//!   single release-ordered store. The old block is abandoned where it
//!   lies; its size is added to `no_used_bytes_size` and never reclaimed.
//!
//! The publication order is the concurrency contract: the replacement
//! block is fully written (and the arena append completed) before the
//! header store, so a reader that acquire-loads the new header finds a
//! complete block, and one that loads the old header still finds the old
//! block intact.

use smallvec::SmallVec;
use zerocopy::little_endian::U64;
use zerocopy::IntoBytes;

use super::*;
use crate::format::{block_size, delta_header, fits_in_place};

/// Which path satisfied an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The slot already held the value (constant slot, equal constant).
    Unchanged,
    /// One packed field was rewritten.
    InPlace,
    /// A replacement block was appended to the arena.
    Expanded,
}

impl<T: SlotValue> Reader<T> {
    /// Set the value at `pos`.
    ///
    /// Fails without mutating when `pos` is out of range, the backing is
    /// read-only, or an expand is needed and no arena is attached.
    /// Concurrent lock-free readers may run against this; there must be at
    /// most one updating thread per slot.
    pub fn update(&self, pos: u32, value: T) -> Result<UpdateOutcome> {
        ensure!(
            pos < self.item_count,
            "update position {} out of range {}",
            pos,
            self.item_count
        );
        self.writable_region()?;

        let (slot, idx) = self.split_pos(pos);
        let encoded = value.encode().to_word();
        let word = self.load_header(slot)?;

        match decode_header::<T::Packed>(word) {
            SlotHeader::Equal { value: current } => {
                if current == encoded {
                    return Ok(UpdateOutcome::Unchanged);
                }
                // Constant slots have no packed region to rewrite.
                self.expand(slot, idx, encoded, current, None)
            }
            SlotHeader::Delta { offset, width } => {
                let (base, width) = self.block_prefix(offset, width)?;
                if encoded >= base {
                    let delta = encoded - base;
                    let required = DeltaWidth::select(delta);
                    if fits_in_place(width, required) {
                        self.write_delta(offset, idx, width, delta)?;
                        if self.arena_handle().is_some() {
                            self.metrics_handle()?.inc_inplace();
                        }
                        return Ok(UpdateOutcome::InPlace);
                    }
                }
                // Wider delta, or a value below the base: re-encode.
                self.expand(slot, idx, encoded, base, Some((offset, width)))
            }
        }
    }

    /// Rewrite the single packed field `idx` of the block at `offset`,
    /// keeping the block's current width.
    fn write_delta(&self, offset: u64, idx: usize, width: DeltaWidth, delta: u64) -> Result<()> {
        debug_assert!(delta <= width.capacity());
        let loc = bitpack::locate(idx, width);
        let rel = (self.prefix_size() + loc.offset) as u64;
        let ptr = self.block_bytes_mut(offset, rel, loc.len)?;
        if width.bits() < 8 {
            // SAFETY: `block_bytes_mut` bounds-checked one byte at `rel`;
            // a single-byte read-modify-write under the single-writer
            // contract.
            unsafe {
                let byte = ptr.read();
                ptr.write((byte & !((loc.mask as u8) << loc.shift)) | ((delta as u8) << loc.shift));
            }
        } else {
            // SAFETY: `block_bytes_mut` bounds-checked `loc.len` bytes.
            unsafe {
                std::ptr::copy_nonoverlapping(delta.to_le_bytes().as_ptr(), ptr, loc.len);
            }
        }
        Ok(())
    }

    /// Re-encode the whole slot with `items[idx] = encoded` into a fresh
    /// arena block and publish it.
    fn expand(
        &self,
        slot: u32,
        idx: usize,
        encoded: u64,
        old_base: u64,
        old_block: Option<(u64, DeltaWidth)>,
    ) -> Result<UpdateOutcome> {
        let arena = self
            .arena_handle()
            .ok_or_else(|| eyre::eyre!("expand update needs a growth arena; reader was opened without one"))?
            .clone();

        let count = self.slot_len(slot);
        let mut items: SmallVec<[u64; 64]> = SmallVec::with_capacity(count);
        match old_block {
            // Constant slot: every live item held the old constant.
            None => items.extend(std::iter::repeat(old_base).take(count)),
            Some((offset, width)) => {
                let mut packed = Vec::new();
                self.read_packed(offset, width, count, &mut packed)?;
                for i in 0..count {
                    items.push(old_base.wrapping_add(bitpack::get(&packed, i, width)));
                }
            }
        }
        items[idx] = encoded;

        let new_base = old_base.min(encoded);
        let max_item = *items.iter().max().expect("slot has at least one item");
        let width = DeltaWidth::select(max_item - new_base);
        let base = if width.reaches_max::<T::Packed>() { 0 } else { new_base };

        let mut block = vec![0u8; block_size::<T::Packed>(width, count)];
        let prefix = self.prefix_size();
        if T::Packed::IS_LONG {
            let header = LongBlockHeader { base: U64::new(base), width: U64::new(width as u64) };
            block[..prefix].copy_from_slice(header.as_bytes());
        } else {
            block[..prefix].copy_from_slice(&base.to_le_bytes()[..prefix]);
        }
        for (i, &item) in items.iter().enumerate() {
            bitpack::set(&mut block[prefix..], i, width, item - base);
        }

        // Materialize the metrics record before the block append so it
        // stays the arena's first allocation.
        let metrics = self.metrics_handle()?;
        let arena_offset = arena.append(&block)?;

        let wasted = old_block
            .map(|(_, old_width)| block_size::<T::Packed>(old_width, count) as u64)
            .unwrap_or(0);
        metrics.add_no_used_bytes(wasted);
        metrics.inc_expand();

        // Publish: the block is fully written, the release store makes it
        // visible atomically. Old block bytes are abandoned in place.
        let word = delta_header::<T::Packed>(self.compress_len + arena_offset, width);
        self.store_header(slot, word)?;
        Ok(UpdateOutcome::Expanded)
    }
}
