//! # Slot Format
//!
//! Physical layout of a compressed column and the per-slot compression
//! decisions. A serialized buffer is, little-endian and unpadded:
//!
//! ```text
//! +----------------------+
//! | item_count     (u32) |
//! | slot_bit_num   (u32) |
//! +----------------------+
//! | slot_index[0]  (u64) |   one header word per slot,
//! | ...                  |   slot_count = ceil(item_count / slot_items)
//! | slot_index[n-1](u64) |
//! +----------------------+
//! | delta blob           |   variable-width delta blocks, addressed by
//! +----------------------+   byte offset from the blob start
//! ```
//!
//! ## Header words
//!
//! Types that pack through 8/16/32-bit words use the **short form**: the
//! low 3 bits are a tag, the high 61 bits the payload. Tag 0 marks a
//! constant slot (payload = the encoded constant); tags 1..=6 mark a delta
//! block at payload byte offset, packed at 1/2/4/8/16/32 bits per item.
//!
//! 64-bit types use the **long form**: bit 63 is an `is_value` flag, the
//! low 63 bits the payload. With the flag set the payload is the encoded
//! constant, only representable when the constant's top bit is clear;
//! otherwise the slot must carry a delta block even if all items are equal.
//! With the flag clear the payload is a block offset and the block's own
//! header records the delta width (it no longer fits a header tag once
//! 64-bit deltas are possible).
//!
//! ## Delta blocks
//!
//! ```text
//! short form:  base (1/2/4 bytes LE) | packed deltas
//! long  form:  base (u64 LE) | width (u64 LE) | packed deltas
//! ```
//!
//! For every item `i` of the slot, `base + delta[i]` reproduces the encoded
//! value. Sub-byte widths pack little-endian within each byte; whole-byte
//! widths are plain LE fields. The packed array is always rounded up to
//! whole bytes.
//!
//! ## Offsets and the growth arena
//!
//! Block offsets are relative to the delta-blob start. A reader opened with
//! a growth arena treats offsets `>= compress_len` (the blob length at open
//! time) as arena-relative: `arena_offset = offset - compress_len`. Expand
//! updates only ever append; abandoned blocks stay where they are.

pub mod bitpack;

use zerocopy::little_endian::{U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::codec::PackedValue;

/// Number of low bits used by the short-form header tag.
pub const SHORT_TAG_BITS: u32 = 3;

/// Mask for the short-form 61-bit payload (after shifting the tag off).
pub const SHORT_PAYLOAD_MAX: u64 = u64::MAX >> SHORT_TAG_BITS;

/// Long-form `is_value` flag bit.
pub const LONG_VALUE_FLAG: u64 = 1 << 63;

/// Mask for the long-form 63-bit payload.
pub const LONG_PAYLOAD_MAX: u64 = u64::MAX >> 1;

/// Serialized buffer prefix.
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned, Debug, Clone, Copy)]
#[repr(C)]
pub struct BlobHeader {
    pub item_count: U32,
    pub slot_bit_num: U32,
}

/// Long-form delta block prefix: base value plus the delta width ordinal.
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned, Debug, Clone, Copy)]
#[repr(C)]
pub struct LongBlockHeader {
    pub base: U64,
    pub width: U64,
}

/// Packed delta bit widths, in increasing capacity order.
///
/// The ordinal doubles as the short-form header tag minus one and as the
/// long-form on-disk width field. The derived `Ord` *is* the capacity
/// ordering (1 < 3 < 15 < 255 < 2^16-1 < 2^32-1 < u64::MAX), which is what
/// the in-place update rule compares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum DeltaWidth {
    Bit1 = 0,
    Bit2 = 1,
    Bit4 = 2,
    U8 = 3,
    U16 = 4,
    U32 = 5,
    U64 = 6,
}

impl DeltaWidth {
    /// Bits per packed item.
    #[inline]
    pub fn bits(self) -> u32 {
        1 << (self as u32)
    }

    /// Largest delta this width can hold.
    #[inline]
    pub fn capacity(self) -> u64 {
        if self == DeltaWidth::U64 {
            u64::MAX
        } else {
            (1u64 << self.bits()) - 1
        }
    }

    /// Smallest width able to hold `max_delta`.
    pub fn select(max_delta: u64) -> DeltaWidth {
        use DeltaWidth::*;
        for width in [Bit1, Bit2, Bit4, U8, U16, U32, U64] {
            if max_delta <= width.capacity() {
                return width;
            }
        }
        unreachable!("U64 holds any delta")
    }

    /// Recover a width from its on-disk ordinal. The format is trusted, so
    /// an out-of-range ordinal is a programming/corruption error.
    pub fn from_ordinal(ordinal: u64) -> DeltaWidth {
        use DeltaWidth::*;
        match ordinal {
            0 => Bit1,
            1 => Bit2,
            2 => Bit4,
            3 => U8,
            4 => U16,
            5 => U32,
            6 => U64,
            _ => panic!("invalid delta width ordinal {ordinal} in slot data"),
        }
    }

    /// True once this width spans the full packed type: rebasing to 0 costs
    /// nothing extra, since a delta field already holds any raw value.
    #[inline]
    pub fn reaches_max<P: PackedValue>(self) -> bool {
        self.bits() == P::BITS
    }

    /// Byte length of `count` packed items at this width (sub-byte widths
    /// round up to whole bytes).
    #[inline]
    pub fn packed_size(self, count: usize) -> usize {
        (count * self.bits() as usize + 7) / 8
    }
}

/// Whether a single packed item can be rewritten in place inside a block
/// currently packed at `current`.
///
/// The packed region is fixed-size for `current`, so an update may keep or
/// narrow the required width but never widen it. The rule is exactly the
/// capacity ordering derived on [`DeltaWidth`]. Constant slots have no
/// packed region and are handled before this check.
#[inline]
pub fn fits_in_place(current: DeltaWidth, required: DeltaWidth) -> bool {
    required <= current
}

/// A decoded slot header word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotHeader {
    /// Every item of the slot equals this encoded constant.
    Equal { value: u64 },
    /// Items live in a delta block at `offset` (blob-relative). `width` is
    /// carried in the header tag for the short form; long-form blocks record
    /// it in their own prefix instead.
    Delta { offset: u64, width: Option<DeltaWidth> },
}

/// Decode a header word for packed type `P`.
pub fn decode_header<P: PackedValue>(word: u64) -> SlotHeader {
    if P::IS_LONG {
        if word & LONG_VALUE_FLAG != 0 {
            SlotHeader::Equal { value: word & LONG_PAYLOAD_MAX }
        } else {
            SlotHeader::Delta { offset: word, width: None }
        }
    } else {
        let tag = word & ((1 << SHORT_TAG_BITS) - 1);
        let payload = word >> SHORT_TAG_BITS;
        if tag == 0 {
            SlotHeader::Equal { value: payload }
        } else {
            SlotHeader::Delta {
                offset: payload,
                width: Some(DeltaWidth::from_ordinal(tag - 1)),
            }
        }
    }
}

/// Build a constant-slot header word, or `None` when the encoded constant
/// cannot fit the payload field (64-bit constants with the top bit set).
pub fn equal_header<P: PackedValue>(value: u64) -> Option<u64> {
    if P::IS_LONG {
        if value > LONG_PAYLOAD_MAX {
            return None;
        }
        Some(value | LONG_VALUE_FLAG)
    } else {
        // Short packed types are at most 32 bits wide; their encoded
        // constants always fit 61 bits.
        debug_assert!(value <= SHORT_PAYLOAD_MAX);
        Some(value << SHORT_TAG_BITS)
    }
}

/// Build a delta-slot header word pointing at `offset`.
pub fn delta_header<P: PackedValue>(offset: u64, width: DeltaWidth) -> u64 {
    if P::IS_LONG {
        debug_assert!(offset <= LONG_PAYLOAD_MAX, "blob offset exceeds 63 bits");
        offset
    } else {
        debug_assert!(offset <= SHORT_PAYLOAD_MAX, "blob offset exceeds 61 bits");
        (offset << SHORT_TAG_BITS) | (width as u64 + 1)
    }
}

/// Total byte size of a delta block holding `count` items at `width` for
/// packed type `P` (base prefix plus the packed array).
pub fn block_size<P: PackedValue>(width: DeltaWidth, count: usize) -> usize {
    let prefix = if P::IS_LONG {
        std::mem::size_of::<LongBlockHeader>()
    } else {
        P::SIZE
    };
    prefix + width.packed_size(count)
}
