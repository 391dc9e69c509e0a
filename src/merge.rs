//! Splitting oversized blocks and merging free neighbours.

use crate::{
    arena::Arena,
    block::{Block, BlockOffset, HEADER_SIZE, Status},
    utils::align,
};

impl<B> Arena<B> {
    /// Carves the block at `offset` down to `align(requested)` bytes when the
    /// leftover can hold a header plus at least `min_remainder` bytes. The tail
    /// becomes a new free block, which is returned.
    ///
    /// ```text
    /// +--------+------------------------------+
    /// | Header |           Payload            |
    /// +--------+------------------------------+
    ///                      |
    ///                      v
    /// +--------+-----------+--------+---------+
    /// | Header | requested | Header | (free)  |
    /// +--------+-----------+--------+---------+
    /// ```
    ///
    /// If the block is too small to split it is handed out whole. Either way it
    /// ends up allocated.
    pub fn split(
        &mut self,
        offset: BlockOffset,
        requested: usize,
        min_remainder: usize,
    ) -> Option<BlockOffset> {
        let size = align(requested);
        let current = self.get(offset).size;

        if current < size + HEADER_SIZE + min_remainder {
            self.get_mut(offset).status = Status::Allocated;
            return None;
        }

        let remainder = BlockOffset::from_header(offset.payload() + size);
        let remainder_size = current - size - HEADER_SIZE;

        {
            let block = self.get_mut(offset);
            block.size = size;
            block.status = Status::Allocated;
        }

        self.write(remainder, Block::new(remainder_size, Status::Free, None, None));
        self.link_after(offset, remainder);

        log::trace!(
            "split block at {} into {} + {} bytes",
            offset.header(),
            size,
            remainder_size
        );

        Some(remainder)
    }

    /// Tries to merge the block at `offset` with the next one on the list. This
    /// can be performed if that next block is free; the block at `offset` keeps
    /// its status.
    pub fn absorb_next(&mut self, offset: BlockOffset) -> bool {
        let Some(next) = self.get(offset).next else {
            return false;
        };

        let next_block = *self.get(next);
        if !next_block.is_free() {
            return false;
        }

        // We need to cover the header and the actual content of the block.
        self.get_mut(offset).size += HEADER_SIZE + next_block.size;
        self.unlink(next);

        log::trace!("merged block at {} into block at {}", next.header(), offset.header());

        true
    }

    /// Merges every run of adjacent free blocks into a single block.
    ///
    /// One forward pass: a free block first swallows its free successors, then
    /// is itself swallowed by its predecessor if that one is free. The scan
    /// resumes from whichever block survived, so merges propagate along runs.
    pub fn coalesce_all(&mut self) {
        let mut current = self.first();

        while let Some(mut offset) = current {
            if self.get(offset).is_free() {
                while self.absorb_next(offset) {}

                if let Some(prev) = self.get(offset).prev {
                    if self.get(prev).is_free() && self.absorb_next(prev) {
                        offset = prev;
                    }
                }
            }

            current = self.get(offset).next;
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        arena::Arena,
        block::{BlockOffset, HEADER_SIZE, Status},
        brk::ReservedBreak,
        config::MIN_SPLIT_REMAINDER,
    };
    use test_log::test;

    /// Arena with blocks of the given sizes, all allocated. The first block
    /// covers the rest of a 4 KiB initial chunk.
    fn arena_with(sizes: &[usize]) -> (Arena<ReservedBreak>, Vec<BlockOffset>) {
        let mut arena = Arena::new(ReservedBreak::new(1 << 20));
        let mut offsets = vec![arena.grow_initial(4096).unwrap()];

        for &size in sizes {
            offsets.push(arena.append(size).unwrap());
        }

        (arena, offsets)
    }

    fn free(arena: &mut Arena<ReservedBreak>, offset: BlockOffset) {
        arena.get_mut(offset).status = Status::Free;
    }

    fn no_adjacent_free(arena: &Arena<ReservedBreak>) -> bool {
        let blocks: Vec<_> = arena.iter().map(|(_, block)| block.is_free()).collect();
        !blocks.windows(2).any(|pair| pair[0] && pair[1])
    }

    #[test]
    fn split_leaves_free_remainder() {
        let (mut arena, offsets) = arena_with(&[104, 64]);
        free(&mut arena, offsets[1]);

        let remainder = arena.split(offsets[1], 50, MIN_SPLIT_REMAINDER).unwrap();

        assert_eq!(56, arena.get(offsets[1]).size);
        assert_eq!(Status::Allocated, arena.get(offsets[1]).status);
        assert_eq!(104 - 56 - HEADER_SIZE, arena.get(remainder).size);
        assert_eq!(Status::Free, arena.get(remainder).status);
        assert_eq!(Some(offsets[2]), arena.get(remainder).next);
        assert_eq!(Some(remainder), arena.get(offsets[2]).prev);
        assert!(arena.is_consistent());
    }

    #[test]
    fn split_below_threshold_keeps_block_whole() {
        let (mut arena, offsets) = arena_with(&[64]);
        free(&mut arena, offsets[1]);

        // 64 - 32 = 32 bytes left, only room for a header.
        assert!(arena.split(offsets[1], 32, MIN_SPLIT_REMAINDER).is_none());
        assert_eq!(64, arena.get(offsets[1]).size);
        assert_eq!(Status::Allocated, arena.get(offsets[1]).status);
        assert_eq!(2, arena.block_count());
    }

    #[test]
    fn split_at_exact_threshold() {
        let size = 16 + HEADER_SIZE + MIN_SPLIT_REMAINDER;
        let (mut arena, offsets) = arena_with(&[size]);

        let remainder = arena.split(offsets[1], 16, MIN_SPLIT_REMAINDER).unwrap();

        assert_eq!(MIN_SPLIT_REMAINDER, arena.get(remainder).size);
        assert_eq!(Some(remainder), arena.last());
        assert!(arena.is_consistent());
    }

    #[test]
    fn coalesce_merges_runs() {
        let (mut arena, offsets) = arena_with(&[16, 32, 48, 64, 80]);
        for &offset in &offsets[1..4] {
            free(&mut arena, offset);
        }

        arena.coalesce_all();

        assert_eq!(4, arena.block_count());
        assert_eq!(16 + 32 + 48 + 2 * HEADER_SIZE, arena.get(offsets[1]).size);
        assert_eq!(Some(offsets[4]), arena.get(offsets[1]).next);
        assert!(no_adjacent_free(&arena));
        assert!(arena.is_consistent());
    }

    #[test]
    fn coalesce_merges_into_free_predecessor() {
        let (mut arena, offsets) = arena_with(&[16, 32, 48]);
        // Free the last one first, then its predecessor: whichever order the
        // scan meets them in, one block must remain.
        free(&mut arena, offsets[3]);
        free(&mut arena, offsets[2]);

        arena.coalesce_all();

        assert_eq!(Some(offsets[2]), arena.last());
        assert_eq!(32 + 48 + HEADER_SIZE, arena.get(offsets[2]).size);
        assert!(arena.is_consistent());
    }

    #[test]
    fn coalesce_handles_alternating_blocks() {
        let (mut arena, offsets) = arena_with(&[8, 8, 8, 8, 8, 8]);
        for (i, &offset) in offsets.iter().enumerate() {
            if i % 2 == 1 {
                free(&mut arena, offset);
            }
        }

        arena.coalesce_all();

        // Nothing adjacent, nothing merged.
        assert_eq!(7, arena.block_count());
        assert!(no_adjacent_free(&arena));

        free(&mut arena, offsets[2]);
        free(&mut arena, offsets[4]);
        arena.coalesce_all();

        assert_eq!(3, arena.block_count());
        assert!(no_adjacent_free(&arena));
        assert!(arena.is_consistent());
    }

    #[test]
    fn absorb_next_keeps_status() {
        let (mut arena, offsets) = arena_with(&[16, 32]);
        free(&mut arena, offsets[2]);

        assert!(arena.absorb_next(offsets[1]));
        assert_eq!(Status::Allocated, arena.get(offsets[1]).status);
        assert_eq!(16 + 32 + HEADER_SIZE, arena.get(offsets[1]).size);

        // Nothing left to absorb.
        assert!(!arena.absorb_next(offsets[1]));
        assert!(arena.is_consistent());
    }
}
