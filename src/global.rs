//! The process heap: one [`Heap`] per process, behind C style functions.
//!
//! These functions never return errors. When the break or a mapping cannot
//! be obtained they print where it happened and the OS error to stderr, then
//! terminate the process with the OS error code. A null pointer only ever
//! means "no memory was requested" (zero sizes) or, for [`resize`], that the
//! block was released.
//!
//! Nothing here is synchronized. Calling these functions from more than one
//! thread at a time corrupts the heap.
//!
//! On unix the arena sits on the real program break ([`SystemBreak`]), which it
//! shares with anything else in the process that calls `sbrk`. The C
//! library's `malloc` does, and so does the Rust global allocator that sits
//! on top of it. Once someone else has moved the break, the next arena
//! growth no longer lands right after the arena: the process is terminated
//! with a "program break moved" message (exit status 1), and the memory that
//! `sbrk` just handed out is lost. Programs that keep other allocators busy
//! should use their own [`Heap`] over a
//! [`ReservedBreak`](crate::ReservedBreak) instead.

use std::{cell::UnsafeCell, ptr, ptr::NonNull};

use crate::{
    error::AllocError,
    heap::Heap,
};

#[cfg(unix)]
use crate::brk::Sbrk;
#[cfg(not(unix))]
use crate::brk::{DEFAULT_RESERVATION, ReservedBreak};

/// Break backing the process heap: the real program break where there is one.
#[cfg(unix)]
pub type SystemBreak = Sbrk;
#[cfg(not(unix))]
pub type SystemBreak = ReservedBreak;

struct ProcessHeap(UnsafeCell<Heap<SystemBreak>>);

// SAFETY: callers of this module promise single-threaded use.
unsafe impl Sync for ProcessHeap {}

#[cfg(unix)]
static HEAP: ProcessHeap = ProcessHeap(UnsafeCell::new(Heap::new(Sbrk::new())));
#[cfg(not(unix))]
static HEAP: ProcessHeap = ProcessHeap(UnsafeCell::new(Heap::new(ReservedBreak::new(DEFAULT_RESERVATION))));

/// Unwraps the result of a heap operation or terminates the process.
macro_rules! die {
    ($result:expr) => {
        match $result {
            Ok(value) => value,
            Err(err) => fail(file!(), line!(), &err),
        }
    };
}

#[cold]
fn fail(file: &str, line: u32, err: &AllocError) -> ! {
    log::error!("fatal allocator error: {}", err);
    eprintln!("({}, {}): {}", file, line, err);

    std::process::exit(err.os_code())
}

#[inline]
unsafe fn heap() -> &'static mut Heap<SystemBreak> {
    unsafe { &mut *HEAP.0.get() }
}

#[inline]
fn into_raw(ptr: Option<NonNull<u8>>) -> *mut u8 {
    ptr.map_or(ptr::null_mut(), NonNull::as_ptr)
}

/// Allocates `size` bytes. Returns null for a zero size.
///
/// # Safety
///
/// No other thread may be inside this module at the same time.
pub unsafe fn allocate(size: usize) -> *mut u8 {
    let heap = unsafe { heap() };

    into_raw(die!(heap.allocate(size)))
}

/// Allocates `count * elem_size` zeroed bytes. Returns null when either is zero.
///
/// # Safety
///
/// No other thread may be inside this module at the same time.
pub unsafe fn zero_allocate(count: usize, elem_size: usize) -> *mut u8 {
    let heap = unsafe { heap() };

    into_raw(die!(heap.zero_allocate(count, elem_size)))
}

/// Resizes the block behind `ptr`, see [`Heap::resize`].
///
/// # Safety
///
/// `ptr` must be null or a live pointer obtained from this module, and no
/// other thread may be inside this module at the same time.
pub unsafe fn resize(ptr: *mut u8, size: usize) -> *mut u8 {
    let heap = unsafe { heap() };

    into_raw(die!(unsafe { heap.resize(NonNull::new(ptr), size) }))
}

/// Releases the block behind `ptr`. Null is ignored.
///
/// # Safety
///
/// `ptr` must be null or a live pointer obtained from this module, and no
/// other thread may be inside this module at the same time.
pub unsafe fn release(ptr: *mut u8) {
    let heap = unsafe { heap() };

    die!(unsafe { heap.release(NonNull::new(ptr)) })
}

/// Read-only view of the process heap, for inspection.
///
/// # Safety
///
/// The reference must not be held across calls to the other functions of
/// this module.
pub unsafe fn process_heap() -> &'static Heap<SystemBreak> {
    unsafe { &*HEAP.0.get() }
}
