//! Threads backed by kernel tasks.
//!
//! A [`Thread`] borrows a [`Task`] and owns everything the kernel needs to
//! run it: the task control block and a stack of
//! [`TASK_STACK_SIZE`](crate::config::TASK_STACK_SIZE) bytes.
//!
//! # Lifecycle
//!
//! ```text
//!   new() ──► NEW ──execute()──► RUNNABLE ──body returns──► DEAD
//!              │                     │
//!              │                     └──────drop──────────► DEAD
//!              └── invalid task / kernel refuses ─────────► DEAD
//! ```
//!
//! The kernel task runs a trampoline: it calls [`Task::start`] once, marks
//! the thread DEAD and parks until the [`Thread`] is dropped.

use core::cell::{Cell, UnsafeCell};
use core::ffi::{c_void, CStr};
use core::marker::PhantomPinned;
use core::mem::MaybeUninit;
use core::pin::Pin;
use core::ptr::{addr_of_mut, NonNull};
use core::sync::atomic::{AtomicBool, AtomicI32, AtomicU8, Ordering};

use byte_strings::c;
use critical_section::Mutex as CsMutex;

use crate::config::TASK_STACK_SIZE;
use crate::error::{Error, KernelError, Result};
use crate::kernel::Kernel;
use crate::object::{Construction, Object};
use crate::scheduler;

/// Returned by [`Thread::priority`] for an invalid thread.
pub const PRIORITY_WRONG: i32 = -1;
/// Priority of the idle task.
pub const PRIORITY_IDLE: i32 = 0;
/// Lowest priority of a regular thread.
pub const PRIORITY_MIN: i32 = 1;
/// Priority of a freshly created thread.
pub const PRIORITY_NORM: i32 = 5;
/// Highest priority of a regular thread.
pub const PRIORITY_MAX: i32 = 10;

/// Name every kernel task created by this module carries.
const THREAD_NAME: &CStr = c!("osal thread");

/// Work executed by a [`Thread`].
pub trait Task: Sync {
    /// Body of the thread. Runs exactly once.
    fn start(&self);

    /// Returns `false` if the task itself failed to construct; such a task
    /// is never started.
    fn is_constructed(&self) -> bool {
        true
    }
}

/// Lifecycle state of a [`Thread`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    /// Constructed, not started.
    New = 0,
    /// Handed to the kernel.
    Runnable = 1,
    /// Finished, deleted or never able to run.
    Dead = 2,
}

impl Status {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::New,
            1 => Self::Runnable,
            _ => Self::Dead,
        }
    }
}

/// Only ever handed to the kernel as raw memory.
#[allow(dead_code)]
#[repr(C, align(8))]
struct Stack([u8; TASK_STACK_SIZE]);

/// Thread of execution running one [`Task`].
pub struct Thread<'t, K: Kernel> {
    construction: Construction,
    task: &'t dyn Task,
    status: AtomicU8,
    priority: AtomicI32,
    /// Set by the trampoline once the task body returned
    finished: AtomicBool,
    handle: CsMutex<Cell<Option<K::TaskHandle>>>,
    /// Kernel control block
    tcb: UnsafeCell<MaybeUninit<K::TaskBuffer>>,
    stack: UnsafeCell<MaybeUninit<Stack>>,
    /// Prevents moving
    _pin: PhantomPinned,
}

// The task is `Sync`; kernel state is only touched through the kernel.
unsafe impl<K: Kernel> Sync for Thread<'_, K> {}
unsafe impl<K: Kernel> Send for Thread<'_, K> {}

impl<'t, K: Kernel> Thread<'t, K> {
    /// Creates a thread for `task` at [`PRIORITY_NORM`].
    ///
    /// The thread is invalid (and DEAD) if the kernel does not provide
    /// priorities up to [`PRIORITY_MAX`] or if `task` is not constructed.
    pub fn new(task: &'t dyn Task) -> Self {
        let mut slot = MaybeUninit::uninit();
        Self::new_in(&mut slot, task);
        // SAFETY: `new_in` initialized the thread.
        unsafe { slot.assume_init() }
    }

    /// Same as [`new`](Self::new), but builds the thread directly in `slot`.
    ///
    /// The stack and the control block are left untouched, so a thread with
    /// a large stack never passes through the caller's frame.
    pub fn new_in<'s>(slot: &'s mut MaybeUninit<Self>, task: &'t dyn Task) -> &'s mut Self {
        let ptr = slot.as_mut_ptr();
        // SAFETY: `ptr` is valid for writes. `tcb` and `stack` are
        // `UnsafeCell<MaybeUninit<_>>`, for which uninitialized memory is a
        // valid value; every other field is written here.
        let thread = unsafe {
            addr_of_mut!((*ptr).construction).write(Construction::new());
            addr_of_mut!((*ptr).task).write(task);
            addr_of_mut!((*ptr).status).write(AtomicU8::new(Status::New as u8));
            addr_of_mut!((*ptr).priority).write(AtomicI32::new(PRIORITY_NORM));
            addr_of_mut!((*ptr).finished).write(AtomicBool::new(false));
            addr_of_mut!((*ptr).handle).write(CsMutex::new(Cell::new(None)));
            addr_of_mut!((*ptr)._pin).write(PhantomPinned);
            slot.assume_init_mut()
        };

        let valid = PRIORITY_MAX < K::MAX_PRIORITIES && task.is_constructed();
        // A fresh flag is always claimable.
        let _ = thread.construction.settle_now(valid);
        if !valid {
            thread.set_status(Status::Dead);
            log::warn!(
                "thread rejected: kernel priorities={} task valid={}",
                K::MAX_PRIORITIES,
                task.is_constructed()
            );
        }
        thread
    }

    fn set_status(&self, status: Status) {
        self.status.store(status as u8, Ordering::Release);
    }

    fn handle(&self) -> Option<K::TaskHandle> {
        critical_section::with(|cs| self.handle.borrow(cs).get())
    }

    /// Current lifecycle state.
    pub fn status(&self) -> Status {
        Status::from_u8(self.status.load(Ordering::Acquire))
    }

    /// Hands the thread to the kernel.
    ///
    /// The thread is RUNNABLE before the kernel task exists, so a task that
    /// finishes before this call returns still ends up DEAD.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConstructed`] for an invalid thread;
    /// - [`Error::InvalidState`] unless the thread is NEW;
    /// - [`Error::Kernel`] if the kernel cannot create the task; the thread
    ///   is DEAD afterwards.
    pub fn execute(self: Pin<&Self>) -> Result<()> {
        self.construction.check()?;
        self.status
            .compare_exchange(
                Status::New as u8,
                Status::Runnable as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map_err(|_| Error::InvalidState)?;

        let stack = NonNull::slice_from_raw_parts(NonNull::from(&self.stack).cast::<u8>(), TASK_STACK_SIZE);
        let tcb = NonNull::from(&self.tcb).cast();
        let parameter = (self.get_ref() as *const Self).cast_mut().cast::<c_void>();
        // Range checked by `set_priority`.
        let priority = self.priority.load(Ordering::Acquire).unsigned_abs();

        // SAFETY: `self` is pinned and `drop` deletes the task before the
        // stack, the control block or `self` go away.
        let handle = unsafe {
            K::create_static_task(trampoline::<K>, THREAD_NAME, stack, parameter, priority, tcb)
        };
        critical_section::with(|cs| self.handle.borrow(cs).set(handle));

        let Some(handle) = handle else {
            self.set_status(Status::Dead);
            log::warn!("kernel refused to create a task");
            return Err(KernelError::NoResources.into());
        };
        // `set_priority` may have run before the handle was published.
        let current = self.priority.load(Ordering::Acquire).unsigned_abs();
        if current != priority {
            // SAFETY: the task lives until `drop`.
            unsafe { K::set_task_priority(handle, current) };
        }
        log::trace!("thread {:p} runnable at priority {}", self.get_ref(), current);
        Ok(())
    }

    /// Waits until the thread is DEAD.
    ///
    /// Busy-waits, yielding the processor between checks. Joining a thread
    /// that already ran to completion returns immediately.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidState`] if the thread was never started or its start
    /// failed.
    pub fn join(&self) -> Result<()> {
        self.construction.check()?;
        match self.status() {
            Status::New => Err(Error::InvalidState),
            Status::Dead if !self.finished.load(Ordering::Acquire) => Err(Error::InvalidState),
            _ => {
                while self.status() != Status::Dead {
                    K::yield_now();
                }
                Ok(())
            }
        }
    }

    /// Current priority, or [`PRIORITY_WRONG`] for an invalid thread.
    pub fn priority(&self) -> i32 {
        if self.is_constructed() {
            self.priority.load(Ordering::Acquire)
        } else {
            PRIORITY_WRONG
        }
    }

    /// Changes the priority.
    ///
    /// A NEW thread keeps the value for [`execute`](Self::execute); a
    /// RUNNABLE thread passes it to the kernel right away.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] unless `priority` is [`PRIORITY_IDLE`] or
    ///   within [`PRIORITY_MIN`]`..=`[`PRIORITY_MAX`];
    /// - [`Error::InvalidState`] for a DEAD thread.
    pub fn set_priority(&self, priority: i32) -> Result<()> {
        self.construction.check()?;
        if !(PRIORITY_IDLE..=PRIORITY_MAX).contains(&priority) {
            return Err(Error::InvalidArgument);
        }
        match self.status() {
            Status::New => {
                self.priority.store(priority, Ordering::Release);
                Ok(())
            }
            Status::Runnable => {
                self.priority.store(priority, Ordering::Release);
                if let Some(handle) = self.handle() {
                    // SAFETY: the task lives until `drop`.
                    unsafe { K::set_task_priority(handle, priority.unsigned_abs()) };
                }
                Ok(())
            }
            Status::Dead => Err(Error::InvalidState),
        }
    }

    fn run(&self) {
        if self.task.is_constructed() {
            self.task.start();
        }
        self.finished.store(true, Ordering::Release);
        self.set_status(Status::Dead);
        log::trace!("thread {:p} finished", self);
    }
}

impl<K: Kernel> Thread<'_, K> {
    /// Puts the calling thread to sleep for `ms` milliseconds.
    pub fn sleep(ms: u32) {
        scheduler::sleep_thread::<K>(ms);
    }

    /// Gives up the processor to threads of equal priority.
    pub fn yield_now() {
        scheduler::yield_thread::<K>();
    }

    /// Requests a context switch on interrupt exit.
    pub fn yield_from_interrupt() {
        scheduler::yield_thread_from_interrupt::<K>();
    }
}

impl<K: Kernel> Object for Thread<'_, K> {
    fn is_constructed(&self) -> bool {
        self.construction.is_valid()
    }
}

impl<K: Kernel> Drop for Thread<'_, K> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.get_mut().take() {
            // SAFETY: created by `execute` and not deleted yet.
            unsafe { K::delete_task(handle) };
        }
        self.construction.invalidate();
        *self.status.get_mut() = Status::Dead as u8;
    }
}

/// Entry point of every kernel task created by [`Thread::execute`].
unsafe extern "C" fn trampoline<K: Kernel>(parameter: *mut c_void) {
    // SAFETY: `execute` passes the pinned thread, which outlives its task.
    if let Some(thread) = unsafe { parameter.cast::<Thread<'_, K>>().as_ref() } {
        thread.run();
    }
    K::park_current_task();
}
