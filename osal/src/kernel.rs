//! The kernel seam.
//!
//! Every primitive in this crate is generic over a [`Kernel`]: the capability
//! set consumed from the underlying real-time kernel. A board support package
//! implements it on top of its kernel bindings; [`crate::hosted`] implements it
//! on `std` threads.
//!
//! Kernel objects are created in storage owned by the caller (the `*Buffer`
//! associated types), so no kernel heap is involved. Buffers are handed over
//! as `NonNull<MaybeUninit<_>>` and must stay at their address until the
//! matching delete call returns; the primitives guarantee this by pinning.
//!
//! # Capability summary
//!
//! | Group | Operations |
//! |-------|------------|
//! | Mutex | create recursive, delete, take, give |
//! | Semaphore | create counting/binary, delete, take, give, give from ISR, count |
//! | Task | create static, set priority, delete, park current |
//! | Tick | increment, switch context, yield, yield from ISR, delay |

use core::ffi::{c_void, CStr};
use core::mem::MaybeUninit;
use core::ptr::NonNull;

use crate::error::KernelError;

/// Entry point the kernel calls when a task starts running.
pub type TaskEntry = unsafe extern "C" fn(parameter: *mut c_void);

/// Capability set the abstraction layer needs from a real-time kernel.
///
/// All functions are associated functions: a kernel is a process-wide
/// singleton, never a value.
///
/// # Safety
///
/// Implementors guarantee that:
///
/// - a handle returned by a `create_*` function stays valid until the
///   matching `delete_*` function is called with it;
/// - a created object never moves out of, or outlives, the buffer it was
///   created in;
/// - functions documented as interrupt-safe never block.
pub unsafe trait Kernel: 'static {
    /// Handle of a kernel mutex.
    type MutexHandle: Copy + Send + Sync;
    /// Handle of a kernel semaphore.
    type SemaphoreHandle: Copy + Send + Sync;
    /// Handle of a kernel task.
    type TaskHandle: Copy + Send + Sync;

    /// Static storage for one mutex control block.
    type MutexBuffer;
    /// Static storage for one semaphore control block.
    type SemaphoreBuffer;
    /// Static storage for one task control block.
    type TaskBuffer;

    /// Number of distinct task priorities; valid priorities are
    /// `0..MAX_PRIORITIES`.
    const MAX_PRIORITIES: i32;
    /// Tick frequency in Hz.
    const TICK_RATE_HZ: u32;
    /// Longest delay, in ticks, a single [`delay`](Self::delay) accepts.
    const MAX_DELAY: u32;

    /// Creates a recursive mutex in `buffer`.
    ///
    /// # Safety
    ///
    /// `buffer` must stay valid and in place until [`delete_mutex`] returns.
    ///
    /// [`delete_mutex`]: Self::delete_mutex
    unsafe fn create_recursive_mutex(
        buffer: NonNull<MaybeUninit<Self::MutexBuffer>>,
    ) -> Option<Self::MutexHandle>;

    /// # Safety
    ///
    /// `mutex` must be live; it is dead afterwards.
    unsafe fn delete_mutex(mutex: Self::MutexHandle);

    /// Takes the mutex, blocking indefinitely. Reentrant for the owner.
    ///
    /// # Safety
    ///
    /// `mutex` must be live. Task context only.
    unsafe fn take_recursive(mutex: Self::MutexHandle) -> Result<(), KernelError>;

    /// Gives back one level of ownership.
    ///
    /// # Safety
    ///
    /// `mutex` must be live. Task context only.
    unsafe fn give_recursive(mutex: Self::MutexHandle) -> Result<(), KernelError>;

    /// Creates a counting semaphore holding `initial` of at most `maximum`
    /// permits.
    ///
    /// # Safety
    ///
    /// `buffer` must stay valid and in place until [`delete_semaphore`]
    /// returns.
    ///
    /// [`delete_semaphore`]: Self::delete_semaphore
    unsafe fn create_counting_semaphore(
        maximum: u32,
        initial: u32,
        buffer: NonNull<MaybeUninit<Self::SemaphoreBuffer>>,
    ) -> Option<Self::SemaphoreHandle>;

    /// Creates an empty binary semaphore.
    ///
    /// # Safety
    ///
    /// Same as [`create_counting_semaphore`](Self::create_counting_semaphore).
    unsafe fn create_binary_semaphore(
        buffer: NonNull<MaybeUninit<Self::SemaphoreBuffer>>,
    ) -> Option<Self::SemaphoreHandle>;

    /// # Safety
    ///
    /// `semaphore` must be live; it is dead afterwards.
    unsafe fn delete_semaphore(semaphore: Self::SemaphoreHandle);

    /// Takes a permit, blocking indefinitely.
    ///
    /// # Safety
    ///
    /// `semaphore` must be live. Task context only.
    unsafe fn take_semaphore(semaphore: Self::SemaphoreHandle) -> Result<(), KernelError>;

    /// Gives a permit.
    ///
    /// # Safety
    ///
    /// `semaphore` must be live. Task context only.
    unsafe fn give_semaphore(semaphore: Self::SemaphoreHandle) -> Result<(), KernelError>;

    /// Gives a permit from an interrupt handler.
    ///
    /// Sets `woken` if the release unblocked a task of higher priority than
    /// the interrupted one. Interrupt-safe.
    ///
    /// # Safety
    ///
    /// `semaphore` must be live.
    unsafe fn give_semaphore_from_isr(
        semaphore: Self::SemaphoreHandle,
        woken: &mut bool,
    ) -> Result<(), KernelError>;

    /// Current number of permits. Interrupt-safe.
    ///
    /// # Safety
    ///
    /// `semaphore` must be live.
    unsafe fn semaphore_count(semaphore: Self::SemaphoreHandle) -> u32;

    /// Creates a task that runs `entry(parameter)` on `stack`.
    ///
    /// The task may start running before this function returns.
    ///
    /// # Safety
    ///
    /// `stack`, `buffer` and whatever `parameter` points to must stay valid
    /// and in place until [`delete_task`] returns.
    ///
    /// [`delete_task`]: Self::delete_task
    unsafe fn create_static_task(
        entry: TaskEntry,
        name: &'static CStr,
        stack: NonNull<[u8]>,
        parameter: *mut c_void,
        priority: u32,
        buffer: NonNull<MaybeUninit<Self::TaskBuffer>>,
    ) -> Option<Self::TaskHandle>;

    /// # Safety
    ///
    /// `task` must be live.
    unsafe fn set_task_priority(task: Self::TaskHandle, priority: u32);

    /// Removes the task from the kernel.
    ///
    /// # Safety
    ///
    /// `task` must be live; it is dead afterwards.
    unsafe fn delete_task(task: Self::TaskHandle);

    /// Suspends the calling task until it is deleted.
    fn park_current_task();

    /// Advances the tick count. Returns `true` if a context switch is due.
    /// Interrupt context only.
    fn increment_tick() -> bool;

    /// Selects the next task to run. Interrupt context only.
    fn switch_context();

    /// Gives up the processor to tasks of equal priority.
    fn yield_now();

    /// Requests a context switch on interrupt exit. Interrupt-safe.
    fn yield_from_isr();

    /// Blocks the calling task for `ticks` ticks.
    fn delay(ticks: u32);

    /// Converts milliseconds to ticks, rounding up and saturating at
    /// [`MAX_DELAY`](Self::MAX_DELAY).
    fn ms_to_ticks(ms: u32) -> u32 {
        let ticks = (u64::from(ms) * u64::from(Self::TICK_RATE_HZ)).div_ceil(1000);
        u32::try_from(ticks).unwrap_or(u32::MAX).min(Self::MAX_DELAY)
    }
}
