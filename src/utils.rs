//! This file contains the helper functions for the allocator. These are
//! functions that don't particularly belong to any concrete module of the program.

use crate::config::ALIGNMENT;

/// It aligns `to_be_aligned` using `aligment`, which must be a power of two.
///
/// This is used to round block sizes up to [`ALIGNMENT`] and reservations up to
/// the computer's page size.
#[inline]
pub const fn align_to(to_be_aligned: usize, aligment: usize) -> usize {
    (to_be_aligned + aligment - 1) & !(aligment - 1)
}

/// Rounds a requested size up to the allocator's [`ALIGNMENT`]. Every size stored
/// in a block header goes through here.
#[inline]
pub const fn align(size: usize) -> usize {
    align_to(size, ALIGNMENT)
}

/// Same as [`align`] but returns `None` instead of wrapping around when `size`
/// is within one alignment step of `usize::MAX`.
#[inline]
pub const fn checked_align(size: usize) -> Option<usize> {
    match size.checked_add(ALIGNMENT - 1) {
        Some(padded) => Some(padded & !(ALIGNMENT - 1)),
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_to_eight() {
        let aligments = vec![(1..9, 8), (9..17, 16), (17..25, 24), (25..33, 32)];

        for (sizes, expected) in aligments {
            for size in sizes {
                assert_eq!(expected, align(size));
            }
        }
    }

    #[test]
    fn align_page_size() {
        // For testing purposes we are assuming the page size is 4096
        let aligments = vec![(1..4097, 4096), (4097..8193, 8192)];

        for (sizes, expected) in aligments {
            for size in sizes {
                assert_eq!(expected, align_to(size, 4096))
            }
        }
    }

    #[test]
    fn zero_stays_zero() {
        assert_eq!(0, align(0));
    }

    #[test]
    fn checked_align_rejects_overflow() {
        assert_eq!(Some(104), checked_align(100));
        assert_eq!(None, checked_align(usize::MAX - 2));
    }
}
