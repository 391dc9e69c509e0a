use std::io;

use thiserror::Error;

/// Errors surfaced by the allocator.
///
/// Invalid arguments (zero sizes, overflowing element counts) are not errors:
/// they are answered with the "no memory" indicator (`Ok(None)`). Everything in
/// here means one of the OS primitives let us down, which this allocator cannot
/// recover from on its own. The process heap in [`crate::global`] terminates on
/// any of them.
#[derive(Error, Debug)]
pub enum AllocError {
    /// A growth, mapping or unmapping primitive failed.
    #[error("{call} failed: {source}")]
    Exhausted {
        call: &'static str,
        #[source]
        source: io::Error,
    },

    /// The program break moved under the arena, so growing it would leave a
    /// hole between the last block and the new memory.
    #[error("program break moved: arena ends at {expected:#x} but break is at {found:#x}")]
    Discontiguous { expected: usize, found: usize },

    #[error("invalid heap configuration: {0}")]
    InvalidConfig(&'static str),
}

impl AllocError {
    /// Builds an [`AllocError::Exhausted`] from the last OS error.
    pub(crate) fn last_os_error(call: &'static str) -> Self {
        Self::Exhausted {
            call,
            source: io::Error::last_os_error(),
        }
    }

    /// Builds an [`AllocError::Exhausted`] for an out of memory condition we
    /// detected ourselves (e.g. a reservation running out of space).
    pub(crate) fn out_of_memory(call: &'static str) -> Self {
        Self::Exhausted {
            call,
            source: io::Error::from(io::ErrorKind::OutOfMemory),
        }
    }

    /// Name of the failing call, if any.
    pub fn call(&self) -> Option<&'static str> {
        match self {
            Self::Exhausted { call, .. } => Some(call),
            _ => None,
        }
    }

    /// Process exit status used by the fail-fast layer: the OS error code when
    /// there is one, `1` otherwise.
    pub fn os_code(&self) -> i32 {
        match self {
            Self::Exhausted { source, .. } => source.raw_os_error().unwrap_or(1),
            _ => 1,
        }
    }
}

/// Convenience alias used all over the crate.
pub type Result<T> = std::result::Result<T, AllocError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausted_keeps_os_code() {
        let err = AllocError::Exhausted {
            call: "sbrk",
            source: io::Error::from_raw_os_error(12),
        };

        assert_eq!(Some("sbrk"), err.call());
        assert_eq!(12, err.os_code());
        assert!(err.to_string().starts_with("sbrk failed"));
    }

    #[test]
    fn detected_errors_exit_with_one() {
        let err = AllocError::Discontiguous { expected: 0x1000, found: 0x2000 };
        assert_eq!(1, err.os_code());
        assert_eq!(None, err.call());

        assert_eq!(1, AllocError::out_of_memory("reserve").os_code());
    }
}
