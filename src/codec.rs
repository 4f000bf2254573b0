//! # Value Codec
//!
//! Maps each supported logical value type to an unsigned "packed" type of
//! equal bit width, bijectively, so that numerically close values produce
//! small deltas after encoding:
//!
//! - **Unsigned integers**: identity. Deltas are plain unsigned distances.
//! - **Signed integers**: zig-zag. `encode(v) = (v << 1) ^ (v >> (B-1))`
//!   folds the sign into the low bit, so -1 → 1, 1 → 2, -2 → 3, ... and
//!   small magnitudes of either sign stay small.
//! - **Floats**: exact bit reinterpretation (`to_bits`/`from_bits`). Floats
//!   are delta-compressed on their raw IEEE-754 bit pattern, never on their
//!   numeric value; equal bit patterns are what the slot equality and delta
//!   machinery rely on. NaN payloads round-trip untouched.
//!
//! ## Supported types
//!
//! `u8 i8 u16 i16 u32 i32 f32` pack through 8/16/32-bit words and use the
//! short (3-bit tag) slot header form; `u64 i64 f64` pack through 64-bit
//! words and use the long (1-bit flag) form. Both traits are sealed: wider
//! or multi-valued types do not exist for this codec, and attempting to use
//! one is a compile error rather than a runtime fallback.
//!
//! ## Thread Safety
//!
//! All functions are pure and stateless.

mod sealed {
    pub trait Sealed {}
}

/// An unsigned transport word for one logical value.
///
/// Internal slot arithmetic (bases, deltas) runs on `u64` words; this trait
/// carries values in and out of that domain and fixes their physical width.
pub trait PackedValue: sealed::Sealed + Copy + Eq {
    /// Bit width of the packed representation.
    const BITS: u32;

    /// Byte width of the packed representation (base values are stored at
    /// this size in short-form delta blocks).
    const SIZE: usize = (Self::BITS / 8) as usize;

    /// True for 64-bit packed types, which use the long slot header form
    /// (1-bit flag + 63-bit payload) and carry the delta width inside the
    /// block instead of the header tag.
    const IS_LONG: bool;

    /// Widen to a `u64` word (zero-extending).
    fn to_word(self) -> u64;

    /// Narrow from a `u64` word, keeping the low `BITS` bits.
    fn from_word(word: u64) -> Self;
}

macro_rules! packed_value_impl {
    ($($ty:ty => $long:expr),* $(,)?) => {
        $(
            impl sealed::Sealed for $ty {}

            impl PackedValue for $ty {
                const BITS: u32 = <$ty>::BITS;
                const IS_LONG: bool = $long;

                #[inline]
                fn to_word(self) -> u64 {
                    self as u64
                }

                #[inline]
                fn from_word(word: u64) -> Self {
                    word as $ty
                }
            }
        )*
    };
}

packed_value_impl! {
    u8 => false,
    u16 => false,
    u32 => false,
    u64 => true,
}

/// A logical value type the codec can compress.
///
/// `encode`/`decode` form a bijection with the packed type; every internal
/// comparison, delta, and equality check happens on encoded values.
pub trait SlotValue: sealed::Sealed + Copy + PartialEq + std::fmt::Debug {
    /// The equal-width unsigned encoder type.
    type Packed: PackedValue;

    /// Map to the packed domain.
    fn encode(self) -> Self::Packed;

    /// Map back from the packed domain. Exact inverse of [`encode`].
    ///
    /// [`encode`]: SlotValue::encode
    fn decode(packed: Self::Packed) -> Self;
}

macro_rules! slot_value_unsigned {
    ($($ty:ty),*) => {
        $(
            impl SlotValue for $ty {
                type Packed = $ty;

                #[inline]
                fn encode(self) -> $ty {
                    self
                }

                #[inline]
                fn decode(packed: $ty) -> $ty {
                    packed
                }
            }
        )*
    };
}

macro_rules! slot_value_zigzag {
    ($($ty:ty => $packed:ty),* $(,)?) => {
        $(
            impl sealed::Sealed for $ty {}

            impl SlotValue for $ty {
                type Packed = $packed;

                #[inline]
                fn encode(self) -> $packed {
                    ((self << 1) ^ (self >> (<$ty>::BITS - 1))) as $packed
                }

                #[inline]
                fn decode(packed: $packed) -> $ty {
                    ((packed >> 1) as $ty) ^ -((packed & 1) as $ty)
                }
            }
        )*
    };
}

slot_value_unsigned!(u8, u16, u32, u64);

slot_value_zigzag! {
    i8 => u8,
    i16 => u16,
    i32 => u32,
    i64 => u64,
}

impl sealed::Sealed for f32 {}

impl SlotValue for f32 {
    type Packed = u32;

    #[inline]
    fn encode(self) -> u32 {
        self.to_bits()
    }

    #[inline]
    fn decode(packed: u32) -> f32 {
        f32::from_bits(packed)
    }
}

impl sealed::Sealed for f64 {}

impl SlotValue for f64 {
    type Packed = u64;

    #[inline]
    fn encode(self) -> u64 {
        self.to_bits()
    }

    #[inline]
    fn decode(packed: u64) -> f64 {
        f64::from_bits(packed)
    }
}
