//! Sources of "program break" memory for the arena.
//!
//! ```text
//!   High Address +-------------------------+
//!                |          Stack          | grows down
//!                |            |            |
//!                |            v            |
//!                |                         |
//!                |            ^            |
//!                |            |            |
//!                |          Heap           | grows up (sbrk)
//!                +-------------------------+ <- program break
//!                |   Uninitialized data    |
//!                +-------------------------+
//!                |    Initialized data     |
//!                +-------------------------+
//!                |          Text           |
//!   Low Address  +-------------------------+
//! ```
//!
//! The arena only ever asks for more memory right after what it already has,
//! so all it needs from a break is [`ProgramBreak::extend`].

use std::ptr::NonNull;

use crate::{
    error::{AllocError, Result},
    kernel,
    utils::align_to,
};

/// Default address space reserved by a [`ReservedBreak`]: 64 MiB.
pub const DEFAULT_RESERVATION: usize = 64 * 1024 * 1024;

/// A monotonically growing heap boundary.
pub trait ProgramBreak {
    /// Moves the break up by `increment` bytes and returns the previous break,
    /// which is where the new memory starts.
    fn extend(&mut self, increment: usize) -> Result<NonNull<u8>>;
}

/// The real process break, moved with `sbrk(2)`.
///
/// Only one arena should sit on top of it. Other users of the break (the C
/// library's own `malloc`, for instance) may still move it; the arena notices
/// and reports [`AllocError::Discontiguous`] instead of growing over a hole.
#[cfg(unix)]
#[derive(Debug, Default)]
pub struct Sbrk {
    _private: (),
}

#[cfg(unix)]
impl Sbrk {
    pub const fn new() -> Self {
        Self { _private: () }
    }

    /// Current position of the process break.
    pub fn current() -> *mut u8 {
        unsafe { libc::sbrk(0).cast() }
    }

    unsafe fn sbrk(increment: usize) -> Result<NonNull<u8>> {
        let increment =
            libc::intptr_t::try_from(increment).map_err(|_| AllocError::out_of_memory("sbrk"))?;

        let addr = unsafe { libc::sbrk(increment) };

        // sbrk returns (void *) -1 on failure.
        if addr == usize::MAX as *mut libc::c_void {
            return Err(AllocError::last_os_error("sbrk"));
        }

        NonNull::new(addr.cast::<u8>()).ok_or_else(|| AllocError::out_of_memory("sbrk"))
    }
}

#[cfg(unix)]
impl ProgramBreak for Sbrk {
    fn extend(&mut self, increment: usize) -> Result<NonNull<u8>> {
        let current = Self::current() as usize;
        let pad = align_to(current, crate::config::ALIGNMENT) - current;

        unsafe {
            if pad != 0 {
                // Headers must be word aligned, so push the break to the next
                // aligned address before handing memory out.
                Self::sbrk(pad)?;
            }

            Self::sbrk(increment)
        }
    }
}

/// An emulated break living in one reserved stretch of address space.
///
/// The reservation is made lazily on the first [`ProgramBreak::extend`] and
/// pages are committed as the break moves over them. This is what backs the
/// arena on platforms without `sbrk`, and it gives every [`crate::Heap`] built
/// on it a private arena that nobody else can move.
#[derive(Debug)]
pub struct ReservedBreak {
    capacity: usize,
    base: Option<NonNull<u8>>,
    brk: usize,
    committed: usize,
}

impl ReservedBreak {
    pub const fn new(capacity: usize) -> Self {
        Self {
            capacity,
            base: None,
            brk: 0,
            committed: 0,
        }
    }

    /// Bytes of address space this break may hand out.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes handed out so far.
    pub fn used(&self) -> usize {
        self.brk
    }

    fn base(&mut self) -> Result<NonNull<u8>> {
        if let Some(base) = self.base {
            return Ok(base);
        }

        self.capacity = align_to(self.capacity, kernel::page_size());
        let base = unsafe { kernel::reserve_memory(self.capacity)? };
        log::debug!("reserved {} bytes of break space at {:p}", self.capacity, base);

        self.base = Some(base);
        Ok(base)
    }
}

impl Default for ReservedBreak {
    fn default() -> Self {
        Self::new(DEFAULT_RESERVATION)
    }
}

impl ProgramBreak for ReservedBreak {
    fn extend(&mut self, increment: usize) -> Result<NonNull<u8>> {
        let base = self.base()?;

        let new_brk = match self.brk.checked_add(increment) {
            Some(new_brk) if new_brk <= self.capacity => new_brk,
            _ => return Err(AllocError::out_of_memory("brk")),
        };

        let needed = align_to(new_brk, kernel::page_size());
        if needed > self.committed {
            unsafe {
                let start = NonNull::new_unchecked(base.as_ptr().add(self.committed));
                kernel::commit_memory(start, needed - self.committed)?;
            }
            self.committed = needed;
        }

        let old = unsafe { NonNull::new_unchecked(base.as_ptr().add(self.brk)) };
        self.brk = new_brk;

        Ok(old)
    }
}

impl Drop for ReservedBreak {
    fn drop(&mut self) {
        if let Some(base) = self.base.take() {
            if let Err(err) = unsafe { kernel::return_memory(base, self.capacity) } {
                log::warn!("could not release break reservation at {:p}: {}", base, err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn reserved_break_is_contiguous() {
        let mut brk = ReservedBreak::new(1 << 20);

        let first = brk.extend(4096).unwrap();
        let second = brk.extend(100).unwrap();
        let third = brk.extend(8).unwrap();

        assert_eq!(first.as_ptr() as usize + 4096, second.as_ptr() as usize);
        assert_eq!(second.as_ptr() as usize + 100, third.as_ptr() as usize);
        assert_eq!(4204, brk.used());

        // The memory behind the break is usable.
        unsafe {
            first.as_ptr().write_bytes(0x5A, 4204);
            assert_eq!(0x5A, *third.as_ptr());
        }
    }

    #[test]
    fn reserved_break_runs_out() {
        let mut brk = ReservedBreak::new(kernel::page_size());

        assert!(brk.extend(kernel::page_size()).is_ok());

        let err = brk.extend(1).unwrap_err();
        assert_eq!(Some("brk"), err.call());
    }

    #[test]
    fn zero_increment_reports_current_break() {
        let mut brk = ReservedBreak::default();

        let start = brk.extend(64).unwrap();
        let current = brk.extend(0).unwrap();

        assert_eq!(start.as_ptr() as usize + 64, current.as_ptr() as usize);
    }
}
