use std::{ptr::NonNull, sync::OnceLock};

use crate::error::{AllocError, Result};

/// Virtual memory page size of the computer. This is usually 4096.
/// This value should be a constant, but we can't do that since we
/// don't know the value at compile time.
static PAGE_SIZE: OnceLock<usize> = OnceLock::new();

/// Marker type that owns the platform-dependant memory primitives. The
/// allocator itself never calls into `libc` or the Win32 API except through
/// the wrappers below.
pub(crate) struct Kernel;

/// This trait provides an abstraction to handle low level memory operations
/// and syscalls. The allocator, our top level view of this, has nothing
/// to do with the concrete implementations / APIs offered by each kernel.
trait PlatformMemory {
    /// Request a readable and writable memory region of size `len`. It returns
    /// a pointer to the given location or None if the underlying syscall fails.
    unsafe fn request_memory(len: usize) -> Option<NonNull<u8>>;

    /// Returns the memory of size `len` starting from `addr` back to the kernel.
    /// Returns false if the kernel refused.
    unsafe fn return_memory(addr: NonNull<u8>, len: usize) -> bool;

    /// Reserves `len` bytes of address space without necessarily backing them.
    unsafe fn reserve_memory(len: usize) -> Option<NonNull<u8>>;

    /// Makes `len` bytes starting at `addr`, inside a reservation, usable.
    unsafe fn commit_memory(addr: NonNull<u8>, len: usize) -> bool;

    /// Returns the virtual memory page size of the computer in bytes.
    unsafe fn page_size() -> usize;
}

/// Wrapper to calculate the computer's page size.
#[inline]
pub(crate) fn page_size() -> usize {
    *PAGE_SIZE.get_or_init(|| unsafe { Kernel::page_size() })
}

/// Wrapper to use [`PlatformMemory::request_memory`].
#[inline]
pub(crate) unsafe fn request_memory(len: usize) -> Result<NonNull<u8>> {
    unsafe { Kernel::request_memory(len) }.ok_or_else(|| AllocError::last_os_error(MAP_CALL))
}

/// Wrapper to use [`PlatformMemory::return_memory`].
#[inline]
pub(crate) unsafe fn return_memory(addr: NonNull<u8>, len: usize) -> Result<()> {
    if unsafe { Kernel::return_memory(addr, len) } {
        Ok(())
    } else {
        Err(AllocError::last_os_error(UNMAP_CALL))
    }
}

/// Wrapper to use [`PlatformMemory::reserve_memory`].
#[inline]
pub(crate) unsafe fn reserve_memory(len: usize) -> Result<NonNull<u8>> {
    unsafe { Kernel::reserve_memory(len) }.ok_or_else(|| AllocError::last_os_error(RESERVE_CALL))
}

/// Wrapper to use [`PlatformMemory::commit_memory`].
#[inline]
pub(crate) unsafe fn commit_memory(addr: NonNull<u8>, len: usize) -> Result<()> {
    if unsafe { Kernel::commit_memory(addr, len) } {
        Ok(())
    } else {
        Err(AllocError::last_os_error(COMMIT_CALL))
    }
}

#[cfg(unix)]
const MAP_CALL: &str = "mmap";
#[cfg(unix)]
const UNMAP_CALL: &str = "munmap";
#[cfg(unix)]
const RESERVE_CALL: &str = "mmap";
#[cfg(unix)]
const COMMIT_CALL: &str = "mmap";

#[cfg(windows)]
const MAP_CALL: &str = "VirtualAlloc";
#[cfg(windows)]
const UNMAP_CALL: &str = "VirtualFree";
#[cfg(windows)]
const RESERVE_CALL: &str = "VirtualAlloc(MEM_RESERVE)";
#[cfg(windows)]
const COMMIT_CALL: &str = "VirtualAlloc(MEM_COMMIT)";

#[cfg(unix)]
mod unix {
    use super::{Kernel, PlatformMemory};

    use libc::{mmap, munmap, off_t, size_t};

    use std::{
        os::raw::{c_int, c_void},
        ptr::NonNull,
    };

    // mmap parameters.
    const ADDR: *mut c_void = std::ptr::null_mut::<c_void>();
    // Read-Write only memory.
    const PROT: c_int = libc::PROT_READ | libc::PROT_WRITE;
    const FLAGS: c_int = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
    const FD: c_int = -1;
    const OFFSET: off_t = 0;

    #[cfg(any(target_os = "linux", target_os = "android"))]
    const RESERVE_FLAGS: c_int = FLAGS | libc::MAP_NORESERVE;
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    const RESERVE_FLAGS: c_int = FLAGS;

    unsafe fn map(len: usize, flags: c_int) -> Option<NonNull<u8>> {
        unsafe {
            let addr = mmap(ADDR, len as size_t, PROT, flags, FD, OFFSET);

            match addr {
                libc::MAP_FAILED => None,
                addr => NonNull::new(addr.cast::<u8>()),
            }
        }
    }

    impl PlatformMemory for Kernel {
        unsafe fn request_memory(len: usize) -> Option<NonNull<u8>> {
            unsafe { map(len, FLAGS) }
        }

        unsafe fn return_memory(addr: NonNull<u8>, len: usize) -> bool {
            unsafe { munmap(addr.as_ptr().cast::<c_void>(), len as size_t) == 0 }
        }

        unsafe fn reserve_memory(len: usize) -> Option<NonNull<u8>> {
            // Pages of an anonymous mapping are only backed once touched, so the
            // whole reservation can be mapped read-write up front.
            unsafe { map(len, RESERVE_FLAGS) }
        }

        unsafe fn commit_memory(_addr: NonNull<u8>, _len: usize) -> bool {
            true
        }

        unsafe fn page_size() -> usize {
            unsafe { libc::sysconf(libc::_SC_PAGE_SIZE) as usize }
        }
    }
}

#[cfg(windows)]
mod windows {
    use std::{mem::MaybeUninit, os::raw::c_void, ptr::NonNull};

    use super::{Kernel, PlatformMemory};

    use windows::Win32::System::{Memory, SystemInformation};

    impl PlatformMemory for Kernel {
        unsafe fn request_memory(len: usize) -> Option<NonNull<u8>> {
            // Read-Write only.
            let protection = Memory::PAGE_READWRITE;

            let flags = Memory::MEM_RESERVE | Memory::MEM_COMMIT;

            unsafe {
                let addr = Memory::VirtualAlloc(None, len, flags, protection);

                NonNull::new(addr.cast())
            }
        }

        unsafe fn return_memory(addr: NonNull<u8>, _len: usize) -> bool {
            unsafe {
                Memory::VirtualFree(addr.as_ptr().cast::<c_void>(), 0, Memory::MEM_RELEASE).is_ok()
            }
        }

        unsafe fn reserve_memory(len: usize) -> Option<NonNull<u8>> {
            unsafe {
                let addr = Memory::VirtualAlloc(None, len, Memory::MEM_RESERVE, Memory::PAGE_NOACCESS);

                NonNull::new(addr.cast())
            }
        }

        unsafe fn commit_memory(addr: NonNull<u8>, len: usize) -> bool {
            unsafe {
                let committed = Memory::VirtualAlloc(
                    Some(addr.as_ptr().cast::<c_void>().cast_const()),
                    len,
                    Memory::MEM_COMMIT,
                    Memory::PAGE_READWRITE,
                );

                !committed.is_null()
            }
        }

        unsafe fn page_size() -> usize {
            unsafe {
                let mut system_info = MaybeUninit::uninit();
                SystemInformation::GetSystemInfo(system_info.as_mut_ptr());

                system_info.assume_init().dwPageSize as usize
            }
        }
    }
}
