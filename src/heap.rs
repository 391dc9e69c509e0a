use std::ptr::{self, NonNull};

use crate::{
    arena::Arena,
    block::{BlockInfo, BlockOffset, HEADER_SIZE, Status},
    brk::{ProgramBreak, ReservedBreak},
    config::HeapConfig,
    error::{AllocError, Result},
    mmap,
    utils::checked_align,
};

/// A first-fit allocator over one program-break arena, with a separate mapped
/// path for large objects.
///
/// Requests are routed by size:
///
/// ```text
///                      align(size) + HEADER_SIZE
///                                 |
///               +-----------------+-----------------+
///               |  < threshold                      |  >= threshold
///               v                                   v
///   first small request? ---yes---> grow_initial    map_allocate
///               | no
///               v
///         find_fit ---found---> split
///               | none
///               v
///   last block free? ---yes---> extend it in place
///               | no
///               v
///         append a new block
/// ```
///
/// The heap is not thread safe. Mapped blocks that are still live when the
/// heap is dropped are not unmapped.
pub struct Heap<B: ProgramBreak> {
    arena: Arena<B>,
    config: HeapConfig,
}

impl Heap<ReservedBreak> {
    /// A heap whose arena lives in a private reservation of `capacity` bytes.
    pub fn reserved(capacity: usize) -> Self {
        Self::new(ReservedBreak::new(capacity))
    }
}

impl<B: ProgramBreak> Heap<B> {
    /// Creates a heap with [`HeapConfig::DEFAULT`]. Nothing is requested from
    /// the break until the first small allocation.
    pub const fn new(brk: B) -> Self {
        Self {
            arena: Arena::new(brk),
            config: HeapConfig::DEFAULT,
        }
    }

    pub fn with_config(brk: B, config: HeapConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            arena: Arena::new(brk),
            config,
        })
    }

    #[inline]
    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    /// The break backing the arena.
    #[inline]
    pub fn program_break(&self) -> &B {
        self.arena.brk()
    }

    /// Allocates `size` bytes. Returns `Ok(None)` for a zero size.
    pub fn allocate(&mut self, size: usize) -> Result<Option<NonNull<u8>>> {
        self.dispatch(size, self.config.large_object_threshold)
    }

    /// Allocates room for `count` elements of `elem_size` bytes and zeroes it.
    ///
    /// Uses [`HeapConfig::zero_alloc_threshold`] instead of the regular large
    /// object threshold. Returns `Ok(None)` when either argument is zero or the
    /// total size overflows.
    pub fn zero_allocate(&mut self, count: usize, elem_size: usize) -> Result<Option<NonNull<u8>>> {
        if count == 0 || elem_size == 0 {
            return Ok(None);
        }

        let Some(total) = count.checked_mul(elem_size) else {
            log::warn!("zero_allocate({count}, {elem_size}) overflows");
            return Ok(None);
        };

        let payload = self.dispatch(total, self.config.zero_alloc_threshold)?;

        if let Some(payload) = payload {
            unsafe { payload.as_ptr().write_bytes(0, total) };
        }

        Ok(payload)
    }

    /// Size based routing shared by every entry point. `threshold` is the
    /// large object cutoff for this particular call.
    fn dispatch(&mut self, size: usize, threshold: usize) -> Result<Option<NonNull<u8>>> {
        if size == 0 {
            return Ok(None);
        }

        let aligned = checked_align(size)
            .filter(|aligned| aligned.checked_add(HEADER_SIZE).is_some())
            .ok_or_else(|| AllocError::out_of_memory("mmap"))?;

        if aligned + HEADER_SIZE >= threshold {
            return mmap::map_allocate(aligned).map(Some);
        }

        if !self.arena.is_initialized() {
            let head = self.arena.grow_initial(self.config.initial_chunk)?;
            // The chunk is formatted as one big block; give back what the
            // request does not need.
            self.arena.split(head, aligned, self.config.min_split_remainder);

            return Ok(Some(self.arena.payload(head)));
        }

        if let Some(offset) = self.arena.find_fit(aligned) {
            self.arena.split(offset, aligned, self.config.min_split_remainder);

            return Ok(Some(self.arena.payload(offset)));
        }

        let offset = match self.arena.last() {
            Some(last) if self.arena.get(last).is_free() => self.arena.extend_last(aligned)?,
            _ => self.arena.append(aligned)?,
        };

        Ok(Some(self.arena.payload(offset)))
    }

    /// Gives a block back. Arena blocks become free and are merged with free
    /// neighbours right away; mapped blocks are unmapped.
    ///
    /// # Safety
    ///
    /// `ptr` must be `None` or a payload returned by this heap that has not
    /// been released yet.
    pub unsafe fn release(&mut self, ptr: Option<NonNull<u8>>) -> Result<()> {
        let Some(ptr) = ptr else {
            return Ok(());
        };

        let Some(offset) = self.arena.locate(ptr) else {
            return unsafe { mmap::map_release(ptr) };
        };

        let block = self.arena.get_mut(offset);
        match block.status {
            Status::Allocated => {
                block.status = Status::Free;
                log::trace!("released {} bytes at offset {}", block.size, offset.header());

                self.arena.coalesce_all();
            }
            status => log::warn!("release of {:p}: block is already {:?}", ptr, status),
        }

        Ok(())
    }

    /// Changes the size of the block behind `ptr` to `size`, moving it if
    /// needed. Bytes up to the smaller of the old and new capacity survive.
    ///
    /// * `None` behaves like [`Heap::allocate`].
    /// * A zero `size` releases the block and returns `Ok(None)`.
    /// * A block that is already free yields `Ok(None)`.
    /// * Mapped blocks always move.
    /// * Arena blocks shrink in place, grow in place when they are last or
    ///   their successor is free and big enough, and move otherwise.
    ///
    /// # Safety
    ///
    /// `ptr` must be `None` or a live payload returned by this heap. On a move
    /// the old pointer is released and must not be used again.
    pub unsafe fn resize(&mut self, ptr: Option<NonNull<u8>>, size: usize) -> Result<Option<NonNull<u8>>> {
        let Some(ptr) = ptr else {
            return self.allocate(size);
        };

        if size == 0 {
            unsafe { self.release(Some(ptr))? };
            return Ok(None);
        }

        let Some(aligned) = checked_align(size) else {
            return Err(AllocError::out_of_memory("mmap"));
        };

        let Some(offset) = self.arena.locate(ptr) else {
            return unsafe { self.resize_mapped(ptr, size, aligned) };
        };

        match self.arena.get(offset).status {
            Status::Allocated => unsafe { self.resize_in_arena(offset, ptr, size, aligned) },
            status => {
                log::warn!("resize of {:p}: block is {:?}", ptr, status);
                Ok(None)
            }
        }
    }

    /// Mapped blocks are never resized in place.
    unsafe fn resize_mapped(
        &mut self,
        ptr: NonNull<u8>,
        size: usize,
        aligned: usize,
    ) -> Result<Option<NonNull<u8>>> {
        let block = unsafe { *mmap::header(ptr).as_ptr() };

        if block.status != Status::Mapped {
            log::warn!("resize of {:p}: block is {:?}", ptr, block.status);
            return Ok(None);
        }

        unsafe { self.relocate(ptr, size, block.size.min(aligned)) }
    }

    unsafe fn resize_in_arena(
        &mut self,
        offset: BlockOffset,
        ptr: NonNull<u8>,
        size: usize,
        aligned: usize,
    ) -> Result<Option<NonNull<u8>>> {
        let old_size = self.arena.get(offset).size;
        let min_remainder = self.config.min_split_remainder;

        if aligned <= old_size {
            self.arena.coalesce_all();

            // A tail cut off a shrinking block may sit right before a free
            // block; merge them so no two free blocks stay adjacent.
            if let Some(remainder) = self.arena.split(offset, aligned, min_remainder) {
                self.arena.absorb_next(remainder);
            }

            return Ok(Some(ptr));
        }

        if self.arena.last() == Some(offset) {
            self.arena.extend_last(aligned)?;
            return Ok(Some(ptr));
        }

        if self.arena.absorb_next(offset) {
            if self.arena.get(offset).size >= aligned {
                self.arena.split(offset, aligned, min_remainder);
                return Ok(Some(ptr));
            }

            // Still short. The merged block may have become the last one.
            if self.arena.last() == Some(offset) {
                self.arena.extend_last(aligned)?;
                return Ok(Some(ptr));
            }
        }

        unsafe { self.relocate(ptr, size, old_size) }
    }

    /// Allocates a fresh block of `size` bytes, copies `keep` bytes over and
    /// releases `ptr`.
    unsafe fn relocate(&mut self, ptr: NonNull<u8>, size: usize, keep: usize) -> Result<Option<NonNull<u8>>> {
        let Some(new) = self.allocate(size)? else {
            return Ok(None);
        };

        log::trace!("moving {} bytes from {:p} to {:p}", keep, ptr, new);

        unsafe {
            ptr::copy_nonoverlapping(ptr.as_ptr(), new.as_ptr(), keep);
            self.release(Some(ptr))?;
        }

        Ok(Some(new))
    }

    /// Usable capacity of the block behind `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live payload returned by this heap.
    pub unsafe fn usable_size(&self, ptr: NonNull<u8>) -> usize {
        match self.arena.locate(ptr) {
            Some(offset) => self.arena.get(offset).size,
            None => unsafe { mmap::header(ptr).as_ref().size },
        }
    }

    /// Walks the arena in address order. Mapped blocks are not part of it.
    pub fn blocks(&self) -> impl Iterator<Item = BlockInfo> + '_ {
        self.arena.iter().map(|(offset, block)| BlockInfo {
            offset,
            size: block.size,
            status: block.status,
        })
    }

    /// Start of the arena, i.e. the header of its first block. `None` until the
    /// first small allocation.
    pub fn arena_head(&self) -> Option<NonNull<u8>> {
        self.arena.first().and(self.arena.base())
    }

    /// Bytes currently owned by the arena.
    pub fn arena_len(&self) -> usize {
        self.arena.len()
    }

    /// Block owning `ptr`, if `ptr` lies inside the arena.
    pub fn block_of(&self, ptr: NonNull<u8>) -> Option<BlockInfo> {
        let offset = self.arena.locate(ptr)?;
        let block = self.arena.get(offset);

        Some(BlockInfo {
            offset,
            size: block.size,
            status: block.status,
        })
    }

    /// Checks the arena layout: aligned sizes, no gaps between blocks,
    /// consistent back links, and no two free blocks next to each other.
    pub fn check_layout(&self) -> bool {
        let no_free_pair = self
            .arena
            .iter()
            .zip(self.arena.iter().skip(1))
            .all(|((_, a), (_, b))| !(a.is_free() && b.is_free()));

        self.arena.is_consistent() && no_free_pair
    }
}
