//! Centralized error handling for the abstraction layer.
//!
//! Every fallible operation returns [`Result`]. Construction failures are
//! sticky: an object whose construction failed answers every later call with
//! [`Error::NotConstructed`]. Operation failures are transient and leave the
//! object usable.
//!
//! # Error Reference
//!
//! | Variant | Raised when |
//! |---------|-------------|
//! | `NotConstructed` | The object failed (or never ran) its construction |
//! | `AlreadyConstructed` | `construct` was called a second time |
//! | `InvalidArgument` | Permits, maximum or priority out of range |
//! | `InvalidState` | Thread operation not allowed in its current state |
//! | `Exhausted` | No storage left for a new resource |
//! | `Unsupported` | Operation intentionally not provided |
//! | `Kernel(_)` | The kernel refused the request |

use core::fmt;

/// Failure reported by the underlying kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KernelError {
    /// The kernel could not create the object.
    NoResources,
    /// The caller does not hold the mutex it tries to release.
    NotOwner,
    /// Releasing would push the semaphore past its maximum.
    Overflow,
    /// The operation would have to block but blocking is not possible.
    WouldBlock,
    /// Any other refusal.
    Refused,
}

impl KernelError {
    /// Returns a human-readable description of the failure.
    pub const fn description(self) -> &'static str {
        match self {
            Self::NoResources => "kernel out of resources",
            Self::NotOwner => "mutex not owned by caller",
            Self::Overflow => "semaphore count at maximum",
            Self::WouldBlock => "operation would block",
            Self::Refused => "request refused by kernel",
        }
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Error type of every fallible operation in this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Error {
    /// The object is not validly constructed.
    NotConstructed,
    /// The object has already been through construction.
    AlreadyConstructed,
    /// An argument is outside its allowed range.
    InvalidArgument,
    /// The object is in the wrong lifecycle state for the request.
    InvalidState,
    /// The allocation backing this resource kind has no free storage.
    Exhausted,
    /// The operation is not provided by this layer.
    Unsupported,
    /// The kernel rejected the request.
    Kernel(KernelError),
}

impl Error {
    /// Returns a human-readable description of the error.
    pub const fn description(self) -> &'static str {
        match self {
            Self::NotConstructed => "object is not constructed",
            Self::AlreadyConstructed => "object is already constructed",
            Self::InvalidArgument => "argument out of range",
            Self::InvalidState => "operation not allowed in current state",
            Self::Exhausted => "no storage left for resource",
            Self::Unsupported => "operation not supported",
            Self::Kernel(e) => e.description(),
        }
    }

    /// Returns `true` if the error is sticky, i.e. retrying cannot succeed.
    pub const fn is_permanent(self) -> bool {
        matches!(self, Self::NotConstructed | Self::AlreadyConstructed | Self::Unsupported)
    }
}

impl From<KernelError> for Error {
    fn from(e: KernelError) -> Self {
        Self::Kernel(e)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Kernel(e) => write!(f, "kernel error: {e}"),
            other => f.write_str(other.description()),
        }
    }
}

impl core::error::Error for Error {}
impl core::error::Error for KernelError {}

/// Result type for abstraction-layer operations.
pub type Result<T> = core::result::Result<T, Error>;
