//! # slotpack - Slot-Based Numeric Column Compression
//!
//! slotpack packs a dense array of fixed-width scalars (`u8`-`u64`,
//! `i8`-`i64`, `f32`, `f64`) into a compact binary column that supports:
//!
//! - **O(1) random-access decode**: one header-word load plus at most two
//!   small field reads per position, on memory, mmap, or file backings
//! - **Online mutation**: single-value updates rewrite one packed field in
//!   place when the new delta fits, or append a replacement block to a
//!   growth arena and atomically repoint the slot header when it doesn't
//! - **Lock-free concurrent reads** against a single updating thread
//!
//! It is the attribute-column and offset-table codec of a columnar
//! document-store index: many columns, each written once, read constantly,
//! and patched value-by-value as documents change.
//!
//! ## How it compresses
//!
//! Items are grouped into power-of-two **slots** (>= 64 items). Each slot
//! gets one 64-bit header word. A slot whose items are all equal stores
//! the constant directly in the header; otherwise the header points at a
//! **delta block**: a base value plus per-item offsets packed at the
//! smallest width (1/2/4/8/16/32/64 bits) that holds the slot's spread.
//! Signed values are zig-zag encoded first; floats are compressed on
//! their raw bit patterns.
//!
//! ## Quick Start
//!
//! ```
//! use slotpack::{compress, ExpandArena, Reader};
//! use std::sync::Arc;
//!
//! # fn main() -> eyre::Result<()> {
//! let data: Vec<u32> = (0..1000).map(|i| 500 + i % 50).collect();
//! let bytes = compress(&data, 6)?;
//!
//! // Read-only access.
//! let reader = Reader::<u32>::from_bytes(&bytes)?;
//! assert_eq!(reader.get(123)?, data[123]);
//!
//! // Updatable access: attach a growth arena for expand updates.
//! let arena = Arc::new(ExpandArena::default());
//! let reader = Reader::<u32>::with_arena(&bytes, arena)?;
//! reader.update(123, 9_999_999)?;
//! assert_eq!(reader.get(123)?, 9_999_999);
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Overview
//!
//! - [`codec`]: zig-zag / bit-cast value encoding traits
//! - [`format`]: header words, delta widths, block layouts, bit packing
//! - [`writer`]: batch encoder and size dry-run
//! - [`reader`]: random-access decode, in-place/expand updates, session
//!   caching
//! - [`arena`]: append-only growth arena for expand updates
//! - [`metrics`]: update counters persisted at arena offset 0
//! - [`io`]: positioned-read abstraction for file backings
//!
//! ## Concurrency Contract
//!
//! Per slot: one updating thread, any number of reading threads, no
//! external locks. Updates publish replacement blocks with a single
//! release-ordered header store; readers acquire-load the header on every
//! access. [`SessionReader`] relaxes this by design: its per-slot cache
//! may serve stale data for the duration of one cached slot visit.

pub mod arena;
pub mod codec;
pub mod config;
pub mod format;
pub mod io;
pub mod metrics;
pub mod reader;
pub mod writer;

pub use arena::ExpandArena;
pub use codec::{PackedValue, SlotValue};
pub use format::DeltaWidth;
pub use io::RandomRead;
pub use metrics::UpdateMetrics;
pub use reader::{Reader, SessionReader, UpdateOutcome};
pub use writer::{compress, compressed_size, Writer};
