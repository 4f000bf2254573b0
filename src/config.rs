//! # Configuration Constants
//!
//! Centralized tuning constants for the slotpack codec. Interdependent
//! values live together so mismatches are caught here instead of at a
//! distance, and the invariants between them are enforced with
//! compile-time assertions.
//!
//! ## Slot sizing
//!
//! A slot groups `1 << slot_bit_num` consecutive items under one header
//! word. Smaller slots adapt better to local value changes (narrower delta
//! widths) but spend more header space; larger slots amortize the 8-byte
//! header over more items. The format requires a power-of-two slot size of
//! at least 64 items.
//!
//! ## Arena sizing
//!
//! Expand updates allocate replacement delta blocks from a growth arena in
//! fixed-size chunks. A chunk must comfortably hold the largest block a
//! default-sized slot can produce (`8 + 8 + 1024 * 8` bytes for a 64-bit
//! slot at full width), otherwise every expand would allocate a dedicated
//! chunk and fragment the arena.

/// Minimum `slot_bit_num`: slots hold at least 64 items.
pub const MIN_SLOT_BIT_NUM: u32 = 6;

/// Maximum `slot_bit_num`: keeps in-slot indexes and bit offsets well
/// inside `u32`/`usize` arithmetic on 32-bit hosts.
pub const MAX_SLOT_BIT_NUM: u32 = 31;

/// Default `slot_bit_num` (1024 items per slot).
pub const DEFAULT_SLOT_BIT_NUM: u32 = 10;

/// Default arena chunk size in bytes.
pub const DEFAULT_ARENA_CHUNK_SIZE: usize = 256 * 1024;

/// Default arena byte quota. Expand updates fail once the arena has handed
/// out this many bytes; callers with heavier update traffic raise it.
pub const DEFAULT_ARENA_QUOTA: usize = 64 * 1024 * 1024;

/// Size in bytes of the serialized buffer prefix (`item_count` +
/// `slot_bit_num`, both `u32`).
pub const BLOB_HEADER_SIZE: usize = 8;

/// Size in bytes of one slot header word in the slot index.
pub const SLOT_HEADER_SIZE: usize = 8;

/// Size in bytes of the update-metrics record pinned at arena offset 0.
pub const METRICS_RECORD_SIZE: usize = 24;

const _: () = assert!(MIN_SLOT_BIT_NUM >= 6, "format requires slots of >= 64 items");
const _: () = assert!(DEFAULT_SLOT_BIT_NUM >= MIN_SLOT_BIT_NUM);
const _: () = assert!(DEFAULT_SLOT_BIT_NUM <= MAX_SLOT_BIT_NUM);
const _: () = assert!(
    DEFAULT_ARENA_CHUNK_SIZE >= 16 + ((1 << DEFAULT_SLOT_BIT_NUM) * 8),
    "arena chunk must hold a full-width delta block for a default slot"
);
const _: () = assert!(METRICS_RECORD_SIZE % 8 == 0, "metrics record must stay 8-aligned");
