//! Layout constants and the tunables that drive the size-based dispatch.

use crate::{
    block::HEADER_SIZE,
    error::{AllocError, Result},
};

/// Every size stored in a block header is a multiple of this.
pub const ALIGNMENT: usize = 8;

/// Size of the first (and only preallocated) arena growth: 128 KiB.
pub const INITIAL_CHUNK: usize = 128 * 1024;

/// Requests whose aligned size plus header reach this go to the mapped path
/// when they come from [`crate::Heap::allocate`] or [`crate::Heap::resize`].
pub const LARGE_OBJECT_THRESHOLD: usize = 128 * 1024;

/// Same cutoff, but for [`crate::Heap::zero_allocate`]. It is one page instead of
/// 128 KiB, so zero-filled requests above a page always come straight from
/// `mmap`. Kept separate from [`LARGE_OBJECT_THRESHOLD`] on purpose.
pub const ZERO_ALLOC_THRESHOLD: usize = 4096;

/// A free block is only split off when its payload would be at least this big.
/// Below that the whole block is handed out.
pub const MIN_SPLIT_REMAINDER: usize = 8;

/// Tunables of a [`crate::Heap`].
///
/// [`HeapConfig::DEFAULT`] reproduces the constants above. It is a `const` so a
/// heap can be built inside a `static` (see [`crate::global`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
    /// Bytes requested from the break on the first small request.
    pub initial_chunk: usize,
    /// Mapped path cutoff for allocate and resize.
    pub large_object_threshold: usize,
    /// Mapped path cutoff for zero-filled allocations.
    pub zero_alloc_threshold: usize,
    /// Smallest payload a split remainder may have.
    pub min_split_remainder: usize,
}

impl HeapConfig {
    pub const DEFAULT: Self = Self {
        initial_chunk: INITIAL_CHUNK,
        large_object_threshold: LARGE_OBJECT_THRESHOLD,
        zero_alloc_threshold: ZERO_ALLOC_THRESHOLD,
        min_split_remainder: MIN_SPLIT_REMAINDER,
    };

    /// Checks that the arena can actually serve every request the thresholds
    /// route to it.
    pub fn validate(&self) -> Result<()> {
        if self.initial_chunk % ALIGNMENT != 0 {
            return Err(AllocError::InvalidConfig("initial chunk must be 8-byte aligned"));
        }

        if self.initial_chunk < HEADER_SIZE + ALIGNMENT {
            return Err(AllocError::InvalidConfig("initial chunk cannot hold a single block"));
        }

        // Anything below a threshold lands in the first chunk, so it must fit.
        if self.large_object_threshold > self.initial_chunk
            || self.zero_alloc_threshold > self.initial_chunk
        {
            return Err(AllocError::InvalidConfig("threshold larger than the initial chunk"));
        }

        if self.min_split_remainder % ALIGNMENT != 0 {
            return Err(AllocError::InvalidConfig("split remainder must be 8-byte aligned"));
        }

        Ok(())
    }
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(HeapConfig::default().validate().is_ok());
        assert_eq!(4096, HeapConfig::DEFAULT.zero_alloc_threshold);
        assert_eq!(131072, HeapConfig::DEFAULT.large_object_threshold);
    }

    #[test]
    fn rejects_unaligned_chunk() {
        let config = HeapConfig { initial_chunk: 4097, ..HeapConfig::DEFAULT };

        assert!(matches!(config.validate(), Err(AllocError::InvalidConfig(_))));
    }

    #[test]
    fn rejects_threshold_above_chunk() {
        let config = HeapConfig {
            initial_chunk: 4096,
            zero_alloc_threshold: 4096,
            ..HeapConfig::DEFAULT
        };

        assert!(matches!(config.validate(), Err(AllocError::InvalidConfig(_))));
    }

    #[test]
    fn rejects_tiny_chunk() {
        let config = HeapConfig {
            initial_chunk: HEADER_SIZE,
            large_object_threshold: HEADER_SIZE,
            zero_alloc_threshold: HEADER_SIZE,
            ..HeapConfig::DEFAULT
        };

        assert!(config.validate().is_err());
    }
}
