//! # Packed Delta Arrays
//!
//! Get/set of fixed-width fields inside a packed byte array, implemented
//! once over [`DeltaWidth`] instead of per-width code paths. Sub-byte
//! widths (1/2/4 bits) divide a byte evenly, so a field never straddles a
//! byte boundary; whole-byte widths are plain little-endian fields.
//!
//! The locate/extract split exists for the file-backed reader, which wants
//! to read exactly the bytes containing one field rather than the whole
//! packed array.
//!
//! No heap allocations; all functions are pure and bounds-panic on misuse
//! like any slice access (packed buffers are sized by the writer, so an
//! out-of-range index is a programming error).

use crate::format::DeltaWidth;

/// Byte position of one packed field within its array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldLoc {
    /// Byte offset of the first (and for sub-byte widths, only) byte.
    pub offset: usize,
    /// Number of bytes the field occupies (always 1 for sub-byte widths).
    pub len: usize,
    /// Left-shift of the field within the first byte (0 for whole-byte
    /// widths).
    pub shift: u32,
    /// Field mask, pre-shifted to bit 0.
    pub mask: u64,
}

impl FieldLoc {
    /// Pull the field value out of `bytes`, which must be exactly the
    /// `len` bytes at `offset`.
    #[inline]
    pub fn extract(&self, bytes: &[u8]) -> u64 {
        debug_assert_eq!(bytes.len(), self.len);
        let mut word = 0u64;
        for (i, &b) in bytes.iter().enumerate() {
            word |= (b as u64) << (8 * i);
        }
        (word >> self.shift) & self.mask
    }
}

/// Locate item `idx` in an array packed at `width`.
#[inline]
pub fn locate(idx: usize, width: DeltaWidth) -> FieldLoc {
    let bits = width.bits() as usize;
    if bits < 8 {
        let bit_offset = idx * bits;
        FieldLoc {
            offset: bit_offset / 8,
            len: 1,
            shift: (bit_offset % 8) as u32,
            mask: width.capacity(),
        }
    } else {
        let size = bits / 8;
        FieldLoc { offset: idx * size, len: size, shift: 0, mask: width.capacity() }
    }
}

/// Read item `idx` from a packed array.
#[inline]
pub fn get(packed: &[u8], idx: usize, width: DeltaWidth) -> u64 {
    let loc = locate(idx, width);
    loc.extract(&packed[loc.offset..loc.offset + loc.len])
}

/// Write item `idx` into a packed array. `value` must fit `width`.
#[inline]
pub fn set(packed: &mut [u8], idx: usize, width: DeltaWidth, value: u64) {
    debug_assert!(value <= width.capacity(), "value {value} exceeds {width:?}");
    let loc = locate(idx, width);
    if loc.len == 1 && width.bits() < 8 {
        let byte = &mut packed[loc.offset];
        *byte = (*byte & !((loc.mask as u8) << loc.shift)) | ((value as u8) << loc.shift);
    } else {
        packed[loc.offset..loc.offset + loc.len].copy_from_slice(&value.to_le_bytes()[..loc.len]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::DeltaWidth::*;

    #[test]
    fn one_bit_fields_pack_eight_per_byte() {
        let mut buf = vec![0u8; 2];
        for i in 0..16 {
            set(&mut buf, i, Bit1, (i % 2) as u64);
        }
        assert_eq!(buf, vec![0b1010_1010; 2]);
        for i in 0..16 {
            assert_eq!(get(&buf, i, Bit1), (i % 2) as u64);
        }
    }

    #[test]
    fn sub_byte_fields_never_straddle_bytes() {
        for width in [Bit1, Bit2, Bit4] {
            let per_byte = 8 / width.bits() as usize;
            let loc = locate(per_byte - 1, width);
            assert_eq!(loc.offset, 0);
            assert_eq!(loc.shift + width.bits(), 8);
            assert_eq!(locate(per_byte, width).offset, 1);
        }
    }

    #[test]
    fn two_and_four_bit_roundtrip() {
        let mut buf = vec![0u8; 8];
        let vals2 = [3u64, 0, 1, 2, 2, 1, 0, 3];
        for (i, &v) in vals2.iter().enumerate() {
            set(&mut buf, i, Bit2, v);
        }
        for (i, &v) in vals2.iter().enumerate() {
            assert_eq!(get(&buf, i, Bit2), v);
        }

        let mut buf = vec![0u8; 8];
        let vals4 = [15u64, 0, 7, 8, 1, 14, 3, 12];
        for (i, &v) in vals4.iter().enumerate() {
            set(&mut buf, i, Bit4, v);
        }
        for (i, &v) in vals4.iter().enumerate() {
            assert_eq!(get(&buf, i, Bit4), v);
        }
    }

    #[test]
    fn whole_byte_widths_are_little_endian() {
        let mut buf = vec![0u8; 12];
        set(&mut buf, 1, U16, 0xbeef);
        assert_eq!(&buf[2..4], &[0xef, 0xbe]);
        assert_eq!(get(&buf, 1, U16), 0xbeef);

        set(&mut buf, 2, U32, 0xdead_beef);
        assert_eq!(get(&buf, 2, U32), 0xdead_beef);

        let mut buf = vec![0u8; 16];
        set(&mut buf, 1, U64, u64::MAX);
        assert_eq!(get(&buf, 1, U64), u64::MAX);
        assert_eq!(get(&buf, 0, U64), 0);
    }

    #[test]
    fn set_overwrites_without_disturbing_neighbors() {
        let mut buf = vec![0xffu8; 4];
        set(&mut buf, 3, Bit2, 0);
        assert_eq!(buf[0], 0b0011_1111);
        for i in 0..16 {
            let expect = if i == 3 { 0 } else { 3 };
            assert_eq!(get(&buf, i, Bit2), expect);
        }
    }
}
