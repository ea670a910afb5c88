//! Kernel error taxonomy
//!
//! Every internal failure funnels into one of these variants; the syscall
//! layer folds all of them to -1 before returning to user code.

/// Errors surfaced by kernel-internal interfaces.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KernelError {
    /// Filesystem lookup found no matching entry
    NotFound,
    /// Index or offset outside the valid range
    OutOfRange,
    /// Null pointer, invalid fd, malformed command, oversize name
    BadArgument,
    /// No free pid or fd slot
    Exhausted,
    /// Executable magic check failed
    NotExecutable,
    /// Operation absent for this object (write to a read-only file,
    /// read from stdout, close of stdin/stdout, signal stubs)
    NotSupported,
}

pub type Result<T> = core::result::Result<T, KernelError>;

impl KernelError {
    /// The integer a syscall returns for this error.
    pub fn as_isize(self) -> isize {
        -1
    }
}
