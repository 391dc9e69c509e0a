use std::{mem, num::NonZeroUsize};

/// Header size of a block. Every payload, arena or mapped, is preceded by
/// exactly this many bytes of metadata.
pub const HEADER_SIZE: usize = mem::size_of::<Block>();

/// Lifecycle state of a [`Block`].
#[repr(usize)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Arena block available for reuse.
    Free = 0,
    /// Arena block handed out to the caller.
    Allocated = 1,
    /// Standalone block backed by its own anonymous mapping.
    Mapped = 2,
}

/// Position of a block inside the arena, stored as the offset of its payload
/// from the arena base.
///
/// Links between blocks are stored as offsets rather than addresses, so a
/// header never points outside the extent it was read from. A payload offset
/// is never zero, which keeps `Option<BlockOffset>` as small as a `usize`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockOffset(NonZeroUsize);

impl BlockOffset {
    /// The arena head, whose header sits at the very start of the arena.
    pub const HEAD: Self = Self::from_header(0);

    /// Block whose header starts `header` bytes into the arena.
    #[inline]
    pub(crate) const fn from_header(header: usize) -> Self {
        match NonZeroUsize::new(header + HEADER_SIZE) {
            Some(payload) => Self(payload),
            None => unreachable!(),
        }
    }

    /// Offset of the header from the arena base.
    #[inline]
    pub fn header(self) -> usize {
        self.0.get() - HEADER_SIZE
    }

    /// Offset of the payload from the arena base.
    #[inline]
    pub fn payload(self) -> usize {
        self.0.get()
    }
}

/// Link to the previous or next block in address order.
pub(crate) type Link = Option<BlockOffset>;

/// This is the structure of a block. The fields of the block are its metadata,
/// content is placed right after this header.
///
/// ```text
/// +---------------------+ <------+
/// |        size         |        |
/// +---------------------+        |
/// |       status        |        |
/// +---------------------+        | -> Header
/// |        prev         |        |
/// +---------------------+        |
/// |        next         |        |
/// +---------------------+ <------+
/// |       Content       |        |
/// |         ...         |        | -> Addressable content (`size` bytes)
/// |                     |        |
/// +---------------------+ <------+
/// ```
///
/// Two arena blocks that are neighbours on the list are also neighbours in
/// memory: the next header starts right where this block's content ends.
/// Mapped blocks never have links.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub(crate) struct Block {
    /// Payload capacity, always a multiple of [`crate::config::ALIGNMENT`].
    pub size: usize,
    pub status: Status,
    pub prev: Link,
    pub next: Link,
}

impl Block {
    pub fn new(size: usize, status: Status, prev: Link, next: Link) -> Self {
        Self { size, status, prev, next }
    }

    #[inline]
    pub fn is_free(&self) -> bool {
        self.status == Status::Free
    }
}

/// Public snapshot of one arena block, produced by [`crate::Heap::blocks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    /// Where the header lives, relative to the arena base.
    pub offset: BlockOffset,
    /// Payload capacity in bytes.
    pub size: usize,
    pub status: Status,
}

impl BlockInfo {
    /// Offset one past the end of this block's payload.
    pub fn end(&self) -> usize {
        self.offset.payload() + self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ALIGNMENT;

    #[test]
    fn header_keeps_payload_aligned() {
        assert_eq!(0, HEADER_SIZE % ALIGNMENT);
    }

    #[test]
    fn block_info_end() {
        let info = BlockInfo { offset: BlockOffset::from_header(64), size: 104, status: Status::Free };

        assert_eq!(64 + HEADER_SIZE + 104, info.end());
    }
}
