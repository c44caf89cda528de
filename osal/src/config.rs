//! Build-time configuration.
//!
//! Values come from the environment of the build (read by `build.rs`):
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | `OSAL_TASK_STACK_SIZE` | 2048 | Stack bytes per thread (multiple of 8, at least 512) |
//! | `OSAL_NUMBER_OF_MUTEXES` | 0 | Mutex pool capacity of [`System`](crate::system::System) |
//! | `OSAL_NUMBER_OF_SEMAPHORES` | 0 | Semaphore pool capacity |
//! | `OSAL_NUMBER_OF_THREADS` | 0 | Thread pool capacity |
//!
//! A capacity of 0 selects the heap (feature `alloc`) unless the `no-heap`
//! feature is set, in which case that resource kind cannot be created at
//! run time at all.

#[cfg(any(osal_mutexes = "disabled", osal_semaphores = "disabled", osal_threads = "disabled"))]
use crate::allocation::Disabled;
#[cfg(any(osal_mutexes = "heap", osal_semaphores = "heap", osal_threads = "heap"))]
use crate::allocation::Heap;
#[cfg(any(osal_mutexes = "pool", osal_semaphores = "pool", osal_threads = "pool"))]
use crate::pool::ResourcePool;

include!(concat!(env!("OUT_DIR"), "/config.rs"));

/// Storage strategy for mutexes created by the system.
#[cfg(osal_mutexes = "pool")]
pub type MutexAllocation<T> = ResourcePool<T, NUMBER_OF_MUTEXES>;
#[cfg(osal_mutexes = "heap")]
pub type MutexAllocation<T> = Heap<T>;
#[cfg(osal_mutexes = "disabled")]
pub type MutexAllocation<T> = Disabled<T>;

/// Storage strategy for semaphores created by the system.
#[cfg(osal_semaphores = "pool")]
pub type SemaphoreAllocation<T> = ResourcePool<T, NUMBER_OF_SEMAPHORES>;
#[cfg(osal_semaphores = "heap")]
pub type SemaphoreAllocation<T> = Heap<T>;
#[cfg(osal_semaphores = "disabled")]
pub type SemaphoreAllocation<T> = Disabled<T>;

/// Storage strategy for threads created by the scheduler.
#[cfg(osal_threads = "pool")]
pub type ThreadAllocation<T> = ResourcePool<T, NUMBER_OF_THREADS>;
#[cfg(osal_threads = "heap")]
pub type ThreadAllocation<T> = Heap<T>;
#[cfg(osal_threads = "disabled")]
pub type ThreadAllocation<T> = Disabled<T>;

pub const fn mutex_allocation<T>() -> MutexAllocation<T> {
    MutexAllocation::new()
}

pub const fn semaphore_allocation<T>() -> SemaphoreAllocation<T> {
    SemaphoreAllocation::new()
}

pub const fn thread_allocation<T>() -> ThreadAllocation<T> {
    ThreadAllocation::new()
}
