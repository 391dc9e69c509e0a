//! Large objects get their own anonymous mapping.
//!
//! ```text
//!        arena (program break)                   one mapping per large block
//! +--------+-------+--------+-------+      +--------+---------------------------+
//! | Header |  ...  | Header |  ...  |      | Header |          Payload          |
//! +--------+-------+--------+-------+      +--------+---------------------------+
//!                                            status = Mapped, no links
//! ```
//!
//! Mapped blocks are never linked into the arena, never split and never
//! merged. Releasing one gives its whole address range back to the kernel on
//! the spot.

use std::ptr::NonNull;

use crate::{
    block::{Block, HEADER_SIZE, Status},
    error::{AllocError, Result},
    kernel,
};

/// Maps `size + HEADER_SIZE` bytes and formats them as one mapped block.
/// `size` must already be aligned. Returns the payload.
pub(crate) fn map_allocate(size: usize) -> Result<NonNull<u8>> {
    let len = size
        .checked_add(HEADER_SIZE)
        .ok_or_else(|| AllocError::out_of_memory("mmap"))?;

    unsafe {
        let addr = kernel::request_memory(len)?;

        addr.cast::<Block>()
            .as_ptr()
            .write(Block::new(size, Status::Mapped, None, None));

        log::debug!("mapped {} bytes at {:p}", len, addr);

        Ok(NonNull::new_unchecked(addr.as_ptr().add(HEADER_SIZE)))
    }
}

/// Header stored right before a mapped payload.
///
/// # Safety
///
/// `payload` must come from [`map_allocate`] and not have been
/// released yet.
#[inline]
pub(crate) unsafe fn header(payload: NonNull<u8>) -> NonNull<Block> {
    unsafe { NonNull::new_unchecked(payload.as_ptr().sub(HEADER_SIZE)).cast() }
}

/// Unmaps the block owning `payload`. Blocks that are not marked as mapped are
/// left alone.
///
/// # Safety
///
/// `payload` must come from [`map_allocate`] and not have been
/// released yet.
pub(crate) unsafe fn map_release(payload: NonNull<u8>) -> Result<()> {
    unsafe {
        let mut header = header(payload);
        let block = header.as_ref();

        if block.status != Status::Mapped {
            log::warn!("release of {:p}: not a mapped block ({:?})", payload, block.status);
            return Ok(());
        }

        let len = block.size + HEADER_SIZE;
        header.as_mut().status = Status::Free;

        kernel::return_memory(header.cast(), len)?;
        log::debug!("unmapped {} bytes at {:p}", len, header);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn mapped_block_has_header() {
        unsafe {
            let payload = map_allocate(200_000).unwrap();
            let block = header(payload).as_ref();

            assert_eq!(200_000, block.size);
            assert_eq!(Status::Mapped, block.status);
            assert!(block.prev.is_none() && block.next.is_none());

            map_release(payload).unwrap();
        }
    }

    #[test]
    fn mapped_payload_is_usable() {
        unsafe {
            let payload = map_allocate(8192).unwrap();

            // Fresh anonymous mappings come zeroed.
            assert!((0..8192).all(|i| *payload.as_ptr().add(i) == 0));

            payload.as_ptr().write_bytes(0xCD, 8192);
            assert_eq!(0xCD, *payload.as_ptr().add(8191));

            map_release(payload).unwrap();
        }
    }

    #[test]
    fn impossible_size_fails() {
        assert!(map_allocate(usize::MAX).is_err());
    }
}
