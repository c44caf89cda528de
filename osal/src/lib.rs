//! Portable OS abstraction layer over a real-time kernel.
//!
//! Mutexes, semaphores and threads are validated once at construction and
//! refuse every operation afterwards if that failed. Dynamically created
//! resources come from fixed pools, the heap, or nowhere, as configured at
//! build time. The kernel itself is reached through the [`Kernel`] trait.

#![cfg_attr(not(any(test, feature = "std")), no_std)]

#[cfg(feature = "alloc")]
extern crate alloc;

pub mod allocation;
pub mod config;
pub mod error;
#[cfg(feature = "embedded-heap")]
pub mod heap;
#[cfg(feature = "std")]
pub mod hosted;
pub mod kernel;
pub mod mutex;
pub mod object;
pub mod pool;
pub mod routine;
pub mod scheduler;
pub mod semaphore;
pub mod system;
pub mod thread;

#[cfg(test)]
mod mock;

pub use error::{Error, KernelError, Result};
pub use kernel::Kernel;
pub use object::Object;
