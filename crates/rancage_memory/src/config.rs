//! # Allocator Configuration
//!
//! Sizes and default alignments for the engine's allocators, loaded once at
//! startup from TOML.
//!
//! ```toml
//! arena_initial_capacity = 1048576
//! arena_alignment = 8
//! frame_buffer_size = 1048576
//! frame_alignment = 16
//! pool_slots_per_chunk = 1024
//! ```
//!
//! Every key is optional; missing keys take the [`Default`] value.

use serde::Deserialize;

use crate::error::{MemoryError, MemoryResult};

/// Default arena capacity (1 MiB).
pub const DEFAULT_ARENA_CAPACITY: usize = 1 << 20;
/// Default arena alignment in bytes.
pub const DEFAULT_ARENA_ALIGNMENT: usize = 8;
/// Default size of each frame buffer (1 MiB).
pub const DEFAULT_FRAME_BUFFER_SIZE: usize = 1 << 20;
/// Default frame arena alignment in bytes.
pub const DEFAULT_FRAME_ALIGNMENT: usize = 16;
/// Default number of slots in each pool chunk.
pub const DEFAULT_POOL_SLOTS_PER_CHUNK: usize = 1024;

/// Allocator configuration.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MemoryConfig {
    /// Initial capacity of owned linear arenas, in bytes.
    pub arena_initial_capacity: usize,
    /// Alignment used by `LinearArena::allocate_bytes`.
    pub arena_alignment: usize,
    /// Size of each of the two frame buffers, in bytes.
    pub frame_buffer_size: usize,
    /// Alignment used by `FrameArena::allocate_bytes`.
    pub frame_alignment: usize,
    /// Number of slots carved out of every pool chunk.
    pub pool_slots_per_chunk: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            arena_initial_capacity: DEFAULT_ARENA_CAPACITY,
            arena_alignment: DEFAULT_ARENA_ALIGNMENT,
            frame_buffer_size: DEFAULT_FRAME_BUFFER_SIZE,
            frame_alignment: DEFAULT_FRAME_ALIGNMENT,
            pool_slots_per_chunk: DEFAULT_POOL_SLOTS_PER_CHUNK,
        }
    }
}

impl MemoryConfig {
    /// Parses and validates a configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidConfig`] if the text is not valid TOML,
    /// contains unknown keys, or fails [`MemoryConfig::validate`].
    pub fn from_toml_str(text: &str) -> MemoryResult<Self> {
        let config: Self = toml::from_str(text)
            .map_err(|e| MemoryError::InvalidConfig(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the values the allocators rely on.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidConfig`] if an alignment is not a power
    /// of two or the pool chunk would hold no slots.
    pub fn validate(&self) -> MemoryResult<()> {
        if !self.arena_alignment.is_power_of_two() {
            return Err(MemoryError::InvalidConfig(format!(
                "arena_alignment must be a power of two, got {}",
                self.arena_alignment
            )));
        }
        if !self.frame_alignment.is_power_of_two() {
            return Err(MemoryError::InvalidConfig(format!(
                "frame_alignment must be a power of two, got {}",
                self.frame_alignment
            )));
        }
        if self.pool_slots_per_chunk == 0 {
            return Err(MemoryError::InvalidConfig(
                "pool_slots_per_chunk must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
