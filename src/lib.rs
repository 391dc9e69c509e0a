//! # brkalloc
//!
//! A general purpose memory allocator built directly on the two classic
//! primitives of a Unix process: moving the program break (`sbrk`) and
//! anonymous mappings (`mmap`/`munmap`).
//!
//! Small and medium requests are carved out of one contiguous arena that
//! grows at the program break. Every block carries a header right before its
//! payload, and the headers form an address-ordered list:
//!
//! ```text
//! +--------+---------------+--------+---------+--------+-------------------+
//! | Header |   Allocated   | Header |  Free   | Header |     Allocated     |
//! +--------+---------------+--------+---------+--------+-------------------+
//! ^ first 128 KiB chunk, then grows to the right as needed  --->  program break
//! ```
//!
//! Requests at or above the large object threshold skip the arena and get a
//! mapping of their own, which goes back to the kernel as soon as it is
//! released.
//!
//! * Free blocks are found first-fit and split when the leftover is worth it.
//! * Released arena blocks are merged with free neighbours immediately.
//! * Resizing shrinks and grows in place whenever it can, and moves the block
//!   otherwise.
//!
//! Arena memory is never returned to the OS, and nothing here is thread safe.
//!
//! ## Usage
//!
//! ```rust
//! use brkalloc::Heap;
//!
//! let mut heap = Heap::reserved(1 << 20);
//!
//! let ptr = heap.allocate(100).unwrap().unwrap();
//! unsafe {
//!     ptr.as_ptr().write_bytes(7, 100);
//!     let ptr = heap.resize(Some(ptr), 400).unwrap();
//!     heap.release(ptr).unwrap();
//! }
//! ```
//!
//! For the C style process heap on top of the real program break see
//! [`global`].

mod arena;
mod block;
mod brk;
mod config;
mod error;
pub mod global;
mod heap;
mod kernel;
mod merge;
mod mmap;
mod utils;

pub use block::{BlockInfo, BlockOffset, HEADER_SIZE, Status};
#[cfg(unix)]
pub use brk::Sbrk;
pub use brk::{DEFAULT_RESERVATION, ProgramBreak, ReservedBreak};
pub use config::{
    ALIGNMENT, HeapConfig, INITIAL_CHUNK, LARGE_OBJECT_THRESHOLD, MIN_SPLIT_REMAINDER,
    ZERO_ALLOC_THRESHOLD,
};
pub use error::{AllocError, Result};
pub use heap::Heap;
pub use utils::align;
