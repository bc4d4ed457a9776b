//! # Rancage Memory
//!
//! Special-purpose allocators for a real-time engine:
//! - [`LinearArena`] - growable bump allocator, freed all at once
//! - [`FrameArena`] - double-buffered bump allocator, recycled every cycle
//! - [`FixedPool`] - thread-safe pool of fixed-size slots
//! - [`TrackingAllocator`] - leak and scalar/array mismatch detection
//!
//! ## Architecture Rules
//!
//! 1. **Raw bytes only** - callers construct and drop typed values themselves
//! 2. **No panics on exhaustion** - allocation failure is a returned error
//! 3. **Pluggable backing memory** - every allocator draws from a [`RawAllocator`]
//!
//! ## Example
//!
//! ```rust,ignore
//! use rancage_memory::{FrameArena, MemoryConfig};
//!
//! let config = MemoryConfig::default();
//! let mut frame = FrameArena::from_config(&config).unwrap();
//!
//! // Game loop
//! for _ in 0..3 {
//!     frame.begin_cycle();
//!     let scratch = frame.allocate(256, 16).unwrap();
//!     assert_eq!(scratch.as_ptr() as usize % 16, 0);
//! }
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod config;
pub mod error;
pub mod memory;

pub use config::MemoryConfig;
pub use error::{MemoryError, MemoryResult};
pub use memory::{
    align_up, debug_heap, AllocShape, AllocationRecord, FixedPool, FrameArena, LeakReport,
    LinearArena, RawAllocator, SourceLocation, SystemAllocator, TrackingAllocator,
};
#[cfg(feature = "leak-tracking")]
pub use memory::{TrackingGlobal, GLOBAL_SITE};
