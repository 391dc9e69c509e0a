use std::{marker::PhantomData, ptr::NonNull};

use crate::{
    block::{Block, BlockOffset, HEADER_SIZE, Link, Status},
    brk::ProgramBreak,
    config::ALIGNMENT,
    error::{AllocError, Result},
};

/// The single contiguous heap region of a [`crate::Heap`].
///
/// The arena is created by the first small request and only ever grows at its
/// high end. Its blocks form a doubly linked list in address order where every
/// header is stored in the arena memory itself, right before its payload:
///
/// ```text
///  base                                                            base + len
///   |                                                                   |
///   v                                                                   v
///   +--------+---------+--------+---------+--------+--------------------+
///   | Header | Payload | Header | Payload | Header |      Payload       |
///   +--------+---------+--------+---------+--------+--------------------+
///   ^ head              ^                  ^ tail
///   +--------next------>+--------next----->+
///   +<-------prev-------+<-------prev------+
/// ```
///
/// Links are [`BlockOffset`]s relative to `base`, so the whole list describes
/// exactly `[base, base + len)` without gaps.
pub(crate) struct Arena<B> {
    brk: B,
    /// Start of the arena. `None` until [`Arena::grow_initial`].
    base: Option<NonNull<u8>>,
    /// Bytes owned by the arena.
    len: usize,
    head: Link,
    tail: Link,
    blocks: usize,
}

pub(crate) struct Iter<'a> {
    base: Option<NonNull<u8>>,
    current: Link,
    marker: PhantomData<&'a Block>,
}

impl<B> Arena<B> {
    pub const fn new(brk: B) -> Self {
        Self {
            brk,
            base: None,
            len: 0,
            head: None,
            tail: None,
            blocks: 0,
        }
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.base.is_some()
    }

    #[inline]
    pub fn base(&self) -> Option<NonNull<u8>> {
        self.base
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn block_count(&self) -> usize {
        self.blocks
    }

    #[inline]
    pub fn first(&self) -> Link {
        self.head
    }

    #[inline]
    pub fn last(&self) -> Link {
        self.tail
    }

    #[inline]
    pub fn brk(&self) -> &B {
        &self.brk
    }

    /// Raw pointer to the header at `offset`.
    #[inline]
    fn header_ptr(&self, offset: BlockOffset) -> *mut Block {
        debug_assert!(offset.header() + HEADER_SIZE <= self.len, "offset {offset:?} outside arena");

        match self.base {
            Some(base) => unsafe { base.as_ptr().add(offset.header()).cast::<Block>() },
            None => unreachable!("block lookup on an empty arena"),
        }
    }

    /// Header of the block at `offset`. Offsets only ever come from the list
    /// itself or from [`Arena::locate`], so they always point at a header.
    #[inline]
    pub fn get(&self, offset: BlockOffset) -> &Block {
        unsafe { &*self.header_ptr(offset) }
    }

    #[inline]
    pub fn get_mut(&mut self, offset: BlockOffset) -> &mut Block {
        unsafe { &mut *self.header_ptr(offset) }
    }

    /// Address of the payload of the block at `offset`.
    #[inline]
    pub fn payload(&self, offset: BlockOffset) -> NonNull<u8> {
        unsafe { NonNull::new_unchecked(self.header_ptr(offset).cast::<u8>().add(HEADER_SIZE)) }
    }

    /// Maps a payload pointer back to its block, if it points inside this
    /// arena at a position where a payload can start. Anything else (mapped
    /// blocks, foreign pointers) yields `None`.
    ///
    /// This does not walk the list: a pointer into the middle of a payload that
    /// happens to be aligned is accepted. Handing such pointers to the heap is
    /// a caller error.
    pub fn locate(&self, payload: NonNull<u8>) -> Option<BlockOffset> {
        let base = self.base?.as_ptr() as usize;
        let addr = payload.as_ptr() as usize;

        let payload_offset = addr.checked_sub(base)?;
        if payload_offset < HEADER_SIZE || payload_offset >= self.len {
            return None;
        }

        let offset = payload_offset - HEADER_SIZE;
        if offset % ALIGNMENT != 0 {
            return None;
        }

        Some(BlockOffset::from_header(offset))
    }

    /// Writes a brand-new header at `offset`.
    pub(crate) fn write(&mut self, offset: BlockOffset, block: Block) {
        unsafe { self.header_ptr(offset).write(block) }
    }

    /// Splices `offset` out of the list. The memory it described now belongs to
    /// whichever neighbour grew over it.
    pub(crate) fn unlink(&mut self, offset: BlockOffset) {
        let Block { prev, next, .. } = *self.get(offset);

        match prev {
            Some(prev) => self.get_mut(prev).next = next,
            None => self.head = next,
        }

        match next {
            Some(next) => self.get_mut(next).prev = prev,
            None => self.tail = prev,
        }

        self.blocks -= 1;
    }

    /// Links a freshly written block at `offset` right after `after`.
    pub(crate) fn link_after(&mut self, after: BlockOffset, offset: BlockOffset) {
        let next = self.get(after).next;

        {
            let block = self.get_mut(offset);
            block.prev = Some(after);
            block.next = next;
        }

        match next {
            Some(next) => self.get_mut(next).prev = Some(offset),
            None => self.tail = Some(offset),
        }

        self.get_mut(after).next = Some(offset);
        self.blocks += 1;
    }

    /// Returns the first free block that can hold `size` bytes.
    ///
    /// This is a plain first-fit linear scan from the head, O(n) in the number
    /// of blocks. Ties go to the block closest to the start of the arena.
    pub fn find_fit(&self, size: usize) -> Option<BlockOffset> {
        let found = self
            .iter()
            .find(|(_, block)| block.is_free() && block.size >= size)
            .map(|(offset, _)| offset);

        if let Some(offset) = found {
            log::trace!("first fit for {} bytes at offset {}", size, offset.header());
        }

        found
    }

    pub fn iter(&self) -> Iter<'_> {
        Iter {
            base: self.base,
            current: self.head,
            marker: PhantomData,
        }
    }

    /// Checks the structural invariants of the list: sizes are aligned, every
    /// block starts where its predecessor ends, back links mirror forward
    /// links, the tail ends exactly at the end of the arena and the block count
    /// matches.
    pub fn is_consistent(&self) -> bool {
        let mut expected = 0;
        let mut prev: Link = None;
        let mut count = 0;

        for (offset, block) in self.iter() {
            if offset.header() != expected
                || block.prev != prev
                || block.size % ALIGNMENT != 0
                || block.status == Status::Mapped
            {
                return false;
            }

            expected = offset.payload() + block.size;
            prev = Some(offset);
            count += 1;
        }

        expected == self.len && prev == self.tail && count == self.block_count()
    }
}

impl<B: ProgramBreak> Arena<B> {
    /// Creates the arena: extends the break by `chunk` bytes and formats the
    /// whole chunk as a single allocated block.
    pub fn grow_initial(&mut self, chunk: usize) -> Result<BlockOffset> {
        debug_assert!(!self.is_initialized(), "arena initialized twice");

        let base = self.brk.extend(chunk)?;
        log::debug!("arena created at {:p} with {} bytes", base, chunk);

        self.base = Some(base);
        self.len = chunk;

        let head = BlockOffset::HEAD;
        self.write(head, Block::new(chunk - HEADER_SIZE, Status::Allocated, None, None));
        self.head = Some(head);
        self.tail = Some(head);
        self.blocks = 1;

        Ok(head)
    }

    /// Extends the arena by `extra` bytes at its high end.
    ///
    /// The new memory must start exactly where the arena ends; if someone else
    /// moved the break in between we fail with [`AllocError::Discontiguous`].
    pub fn grow_trailing(&mut self, extra: usize) -> Result<()> {
        let Some(base) = self.base else {
            unreachable!("trailing growth before the arena exists");
        };

        let expected = base.as_ptr() as usize + self.len;
        let found = self.brk.extend(extra)?.as_ptr() as usize;

        if found != expected {
            return Err(AllocError::Discontiguous { expected, found });
        }

        log::debug!("arena grew by {} bytes to {}", extra, self.len + extra);
        self.len += extra;

        Ok(())
    }

    /// Grows the last block in place so that it holds `size` bytes, and marks
    /// it allocated. `size` must already be aligned and larger than the block.
    pub fn extend_last(&mut self, size: usize) -> Result<BlockOffset> {
        let Some(last) = self.tail else {
            unreachable!("extending the last block of an empty arena");
        };

        let current = self.get(last).size;
        debug_assert!(size > current);

        self.grow_trailing(size - current)?;

        let block = self.get_mut(last);
        block.size = size;
        block.status = Status::Allocated;

        Ok(last)
    }

    /// Appends a brand-new allocated block of `size` bytes after the last one.
    ///
    /// The new block's back link always points at the previous tail.
    pub fn append(&mut self, size: usize) -> Result<BlockOffset> {
        let Some(last) = self.tail else {
            unreachable!("appending to an empty arena");
        };

        let offset = BlockOffset::from_header(self.len);
        self.grow_trailing(size + HEADER_SIZE)?;

        self.write(offset, Block::new(size, Status::Allocated, None, None));
        self.link_after(last, offset);

        Ok(offset)
    }
}

impl<'a> Iterator for Iter<'a> {
    type Item = (BlockOffset, &'a Block);

    fn next(&mut self) -> Option<Self::Item> {
        let offset = self.current?;
        let base = self.base?;

        unsafe {
            let block = &*base.as_ptr().add(offset.header()).cast::<Block>();
            self.current = block.next;

            Some((offset, block))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brk::ReservedBreak;
    use test_log::test;

    fn arena() -> Arena<ReservedBreak> {
        Arena::new(ReservedBreak::new(1 << 20))
    }

    #[test]
    fn new_arena_is_empty() {
        let arena = arena();

        assert!(!arena.is_initialized());
        assert_eq!(0, arena.block_count());
        assert!(arena.iter().next().is_none());
        assert!(arena.find_fit(8).is_none());
    }

    #[test]
    fn initial_growth_is_one_allocated_block() {
        let mut arena = arena();

        let head = arena.grow_initial(4096).unwrap();
        let block = arena.get(head);

        assert_eq!(BlockOffset::HEAD, head);
        assert_eq!(4096 - HEADER_SIZE, block.size);
        assert_eq!(Status::Allocated, block.status);
        assert_eq!(Some(head), arena.last());
        assert!(arena.is_consistent());
    }

    #[test]
    fn append_links_back_to_previous_tail() {
        let mut arena = arena();
        let head = arena.grow_initial(4096).unwrap();

        let second = arena.append(64).unwrap();
        let third = arena.append(16).unwrap();

        assert_eq!(4096, second.header());
        assert_eq!(Some(head), arena.get(second).prev);
        assert_eq!(Some(second), arena.get(third).prev);
        assert_eq!(Some(third), arena.get(second).next);
        assert_eq!(Some(third), arena.last());
        assert_eq!(3, arena.block_count());
        assert!(arena.is_consistent());
    }

    #[test]
    fn extend_last_grows_in_place() {
        let mut arena = arena();
        arena.grow_initial(4096).unwrap();
        let last = arena.append(64).unwrap();
        arena.get_mut(last).status = Status::Free;

        assert_eq!(last, arena.extend_last(200).unwrap());
        assert_eq!(200, arena.get(last).size);
        assert_eq!(Status::Allocated, arena.get(last).status);
        assert_eq!(4096 + HEADER_SIZE + 200, arena.len());
        assert!(arena.is_consistent());
    }

    #[test]
    fn find_fit_takes_first_match() {
        let mut arena = arena();
        arena.grow_initial(4096).unwrap();
        let small = arena.append(16).unwrap();
        let big = arena.append(256).unwrap();
        let bigger = arena.append(512).unwrap();

        arena.get_mut(small).status = Status::Free;
        arena.get_mut(big).status = Status::Free;
        arena.get_mut(bigger).status = Status::Free;

        assert_eq!(Some(small), arena.find_fit(8));
        assert_eq!(Some(big), arena.find_fit(100));
        assert_eq!(Some(bigger), arena.find_fit(300));
        assert_eq!(None, arena.find_fit(1024));
    }

    #[test]
    fn locate_round_trips_payloads() {
        let mut arena = arena();
        let head = arena.grow_initial(4096).unwrap();
        let second = arena.append(64).unwrap();

        assert_eq!(Some(head), arena.locate(arena.payload(head)));
        assert_eq!(Some(second), arena.locate(arena.payload(second)));

        let outside = NonNull::from(&arena).cast::<u8>();
        assert_eq!(None, arena.locate(outside));

        let misaligned = unsafe { NonNull::new_unchecked(arena.payload(head).as_ptr().add(3)) };
        assert_eq!(None, arena.locate(misaligned));
    }

    #[test]
    fn unlink_fixes_tail() {
        let mut arena = arena();
        let head = arena.grow_initial(4096).unwrap();
        let second = arena.append(64).unwrap();

        arena.unlink(second);

        assert_eq!(Some(head), arena.last());
        assert_eq!(None, arena.get(head).next);
        assert_eq!(1, arena.block_count());
    }
}
