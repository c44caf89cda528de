//! Scheduler front end.
//!
//! The [`Scheduler`] creates [`Thread`]s from an [`Allocation`] guarded by a
//! mutex, and owns the interrupt routines the platform hooks into its tick
//! and supervisor-call vectors.
//!
//! ```text
//! Scheduler
//!   ├── TimerRoutine   (tick vector)
//!   ├── SvcallRoutine  (svcall vector)
//!   └── Guarded<Mutex, Allocation<Thread>>
//!             │
//!             │ create_thread(&task)
//!             ▼
//!        ThreadBox ── execute() / join() / set_priority()
//! ```
//!
//! Sleeping and yielding need no scheduler instance; the free functions
//! [`sleep_thread`], [`yield_thread`] and [`yield_thread_from_interrupt`]
//! talk to the kernel directly.
//!
//! # Example
//!
//! ```
//! use core::pin::pin;
//! use osal::hosted::Hosted;
//! use osal::pool::ResourcePool;
//! use osal::scheduler::Scheduler;
//! use osal::thread::{Task, Thread};
//!
//! struct Hello;
//!
//! impl Task for Hello {
//!     fn start(&self) {}
//! }
//!
//! let scheduler = pin!(Scheduler::<Hosted, ResourcePool<Thread<Hosted>, 1>>::new(ResourcePool::new()));
//! scheduler.as_ref().construct().unwrap();
//!
//! let thread = scheduler.create_thread(&Hello).unwrap();
//! assert!(scheduler.create_thread(&Hello).is_err());
//! thread.as_pin().execute().unwrap();
//! thread.join().unwrap();
//! ```

use core::marker::PhantomData;
use core::pin::Pin;

use crate::allocation::{Allocation, Guarded, ResourceBox};
use crate::error::Result;
use crate::kernel::Kernel;
use crate::object::{Construction, Object};
use crate::routine::{SvcallRoutine, TimerRoutine};
use crate::thread::{Task, Thread};

/// Thread created by a [`Scheduler`]; returns its storage when dropped.
pub type ThreadBox<'s, 't, K, A> = ResourceBox<'s, Thread<'t, K>, A>;

/// Creates threads and hosts the scheduling interrupt routines.
pub struct Scheduler<'t, K: Kernel, A> {
    construction: Construction,
    timer: TimerRoutine<K>,
    svcall: SvcallRoutine<K>,
    threads: Guarded<K, A>,
    _tasks: PhantomData<&'t dyn Task>,
}

impl<'t, K: Kernel, A: Allocation<Thread<'t, K>>> Scheduler<'t, K, A> {
    /// Creates a scheduler drawing thread storage from `threads`.
    pub const fn new(threads: A) -> Self {
        Self {
            construction: Construction::new(),
            timer: TimerRoutine::new(),
            svcall: SvcallRoutine::new(),
            threads: Guarded::new(threads),
            _tasks: PhantomData,
        }
    }

    /// Creates the mutex guarding thread creation.
    pub fn construct(self: Pin<&Self>) -> Result<()> {
        self.construction.claim()?;
        // SAFETY: structural pinning; `threads` is never moved out of `self`.
        let threads = unsafe { self.map_unchecked(|s| &s.threads) };
        let result = threads.construct();
        self.construction.settle(
            result.is_ok() && self.timer.is_constructed() && self.svcall.is_constructed(),
        );
        if let Err(e) = result {
            log::warn!("scheduler construction failed: {e}");
        }
        result
    }

    /// Creates a NEW thread running `task`.
    ///
    /// Serialized against concurrent callers. The thread, stack included, is
    /// built directly in its storage. It is not started; call `execute()` on
    /// [`ThreadBox::as_pin`].
    ///
    /// # Errors
    ///
    /// - [`Error::Exhausted`](crate::Error::Exhausted) when no thread
    ///   storage is left;
    /// - [`Error::NotConstructed`](crate::Error::NotConstructed) if the
    ///   thread could not be constructed (its storage is returned).
    pub fn create_thread(&self, task: &'t dyn Task) -> Result<ThreadBox<'_, 't, K, A>> {
        self.construction.check()?;
        // SAFETY: `Thread::new_in` initializes the whole slot.
        unsafe {
            self.threads.emplace_in_place(|slot| {
                Thread::<K>::new_in(slot, task);
            })
        }
    }

    /// Puts the calling thread to sleep for `ms` milliseconds.
    pub fn sleep(&self, ms: u32) -> Result<()> {
        self.construction.check()?;
        sleep_thread::<K>(ms);
        Ok(())
    }

    /// Gives up the processor to threads of equal priority.
    pub fn yield_now(&self) -> Result<()> {
        self.construction.check()?;
        yield_thread::<K>();
        Ok(())
    }

    /// Routine for the tick interrupt.
    pub fn timer_routine(&self) -> &TimerRoutine<K> {
        &self.timer
    }

    /// Routine for the supervisor-call interrupt.
    pub fn svcall_routine(&self) -> &SvcallRoutine<K> {
        &self.svcall
    }
}

impl<K: Kernel, A> Object for Scheduler<'_, K, A> {
    fn is_constructed(&self) -> bool {
        self.construction.is_valid()
    }
}

/// Blocks the calling thread for `ms` milliseconds, rounded up to whole
/// ticks. Task context only.
pub fn sleep_thread<K: Kernel>(ms: u32) {
    K::delay(K::ms_to_ticks(ms));
}

/// Yields the processor. Task context only.
pub fn yield_thread<K: Kernel>() {
    K::yield_now();
}

/// Requests a context switch on interrupt exit. Interrupt context only.
pub fn yield_thread_from_interrupt<K: Kernel>() {
    K::yield_from_isr();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::mock::{self, MockKernel};
    use crate::pool::ResourcePool;
    use crate::routine::Runnable;
    use crate::thread::Status;
    use core::pin::pin;
    use core::sync::atomic::{AtomicUsize, Ordering};

    type Pool<'t, const N: usize> = ResourcePool<Thread<'t, MockKernel>, N>;

    #[derive(Default)]
    struct Counter(AtomicUsize);

    impl Task for Counter {
        fn start(&self) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    struct Broken;

    impl Task for Broken {
        fn start(&self) {}

        fn is_constructed(&self) -> bool {
            false
        }
    }

    #[test]
    fn pool_of_two_limits_threads() {
        let (a, b, c) = (Counter::default(), Counter::default(), Counter::default());
        let scheduler = pin!(Scheduler::<MockKernel, Pool<'_, 2>>::new(ResourcePool::new()));
        scheduler.as_ref().construct().unwrap();

        let first = scheduler.create_thread(&a).unwrap();
        let second = scheduler.create_thread(&b).unwrap();
        assert_eq!(scheduler.create_thread(&c).err(), Some(Error::Exhausted));

        first.as_pin().execute().unwrap();
        second.as_pin().execute().unwrap();
        for thread in [&first, &second] {
            assert_eq!(thread.status(), Status::Runnable);
        }

        drop(first);
        let third = scheduler.create_thread(&c).unwrap();
        assert_eq!(third.status(), Status::New);
        assert_eq!(second.status(), Status::Runnable);
    }

    #[test]
    fn invalid_thread_returns_its_slot() {
        let task = Counter::default();
        let scheduler = pin!(Scheduler::<MockKernel, Pool<'_, 1>>::new(ResourcePool::new()));
        scheduler.as_ref().construct().unwrap();

        assert_eq!(scheduler.create_thread(&Broken).err(), Some(Error::NotConstructed));
        assert!(scheduler.create_thread(&task).is_ok());
    }

    #[test]
    fn unconstructed_scheduler_refuses() {
        let task = Counter::default();
        let scheduler = Scheduler::<MockKernel, Pool<'_, 1>>::new(ResourcePool::new());
        assert_eq!(scheduler.create_thread(&task).err(), Some(Error::NotConstructed));
        assert_eq!(scheduler.sleep(1), Err(Error::NotConstructed));
        assert_eq!(scheduler.yield_now(), Err(Error::NotConstructed));
        assert!(mock::record().delays.is_empty());
    }

    #[test]
    fn guard_failure_invalidates_scheduler() {
        mock::script(|s| s.fail_mutex = true);
        let scheduler = pin!(Scheduler::<MockKernel, Pool<'_, 1>>::new(ResourcePool::new()));
        assert!(scheduler.as_ref().construct().is_err());
        assert!(!scheduler.is_constructed());
        assert_eq!(scheduler.as_ref().construct(), Err(Error::AlreadyConstructed));
    }

    #[test]
    fn created_thread_runs_through_kernel() {
        let task = Counter::default();
        let scheduler = pin!(Scheduler::<MockKernel, Pool<'_, 1>>::new(ResourcePool::new()));
        scheduler.as_ref().construct().unwrap();

        let thread = scheduler.create_thread(&task).unwrap();
        thread.as_pin().execute().unwrap();
        assert_eq!(mock::record().tasks_created, 1);
        drop(thread);
        assert_eq!(mock::record().tasks_deleted, 1);
        assert_eq!(task.0.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn sleep_converts_to_ticks() {
        let scheduler = pin!(Scheduler::<MockKernel, Pool<'_, 1>>::new(ResourcePool::new()));
        scheduler.as_ref().construct().unwrap();
        scheduler.sleep(1).unwrap();
        scheduler.sleep(1000).unwrap();
        sleep_thread::<MockKernel>(0);
        assert_eq!(mock::record().delays, [1, 100, 0]);
    }

    #[test]
    fn routines_are_exposed() {
        let scheduler = pin!(Scheduler::<MockKernel, Pool<'_, 1>>::new(ResourcePool::new()));
        scheduler.as_ref().construct().unwrap();
        mock::script(|s| s.tick_switches = true);
        scheduler.timer_routine().start();
        scheduler.svcall_routine().start();
        assert_eq!(mock::record().switches, 2);
    }
}
