//! Kernel port on top of `std` threads.
//!
//! [`Hosted`] runs the abstraction layer inside an ordinary process, for
//! simulation and tests. Kernel objects are built from `std::sync`
//! primitives placed in the caller's buffers; tasks are OS threads.
//!
//! # Model
//!
//! | Kernel concept | Hosted realisation |
//! |----------------|--------------------|
//! | Recursive mutex | owner `ThreadId` + depth, `Condvar` hand-off |
//! | Semaphore | permit count + waiting priorities, `Condvar` |
//! | Task | `std::thread` with a priority record |
//! | Tick | global counter; sleepers due on a tick request a switch |
//! | Delay | `std::thread::sleep` for the tick-equivalent duration |
//!
//! Threads that are not tasks (the test harness, a simulated interrupt
//! handler) have priority 0.
//!
//! # Limitations
//!
//! - Priorities are recorded but the host OS schedules the threads.
//! - Task stacks handed over by the caller are not used; tasks run on host
//!   stacks.
//! - Deleting a task whose body is still running waits for the body to
//!   return; a host thread cannot be killed.

use std::cell::RefCell;
use std::ffi::{c_void, CStr};
use std::mem::MaybeUninit;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use crate::error::KernelError;
use crate::kernel::{Kernel, TaskEntry};

/// The hosted kernel.
pub struct Hosted;

/// Initializes `env_logger` for hosted runs; `RUST_LOG` selects the level.
///
/// Safe to call more than once.
pub fn init_logger() {
    let _ = env_logger::builder().is_test(cfg!(test)).try_init();
}

/// Handle to a hosted kernel object living in a caller buffer.
pub struct HostRef<T>(NonNull<T>);

impl<T> Clone for HostRef<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for HostRef<T> {}

// Hosted objects synchronize internally.
unsafe impl<T: Sync> Send for HostRef<T> {}
unsafe impl<T: Sync> Sync for HostRef<T> {}

impl<T> HostRef<T> {
    /// # Safety
    ///
    /// The object must not have been deleted.
    unsafe fn get(&self) -> &T {
        unsafe { self.0.as_ref() }
    }
}

unsafe fn emplace<T>(buffer: NonNull<MaybeUninit<T>>, value: T) -> HostRef<T> {
    // SAFETY: the caller passes a buffer valid for writes.
    let object = unsafe { (*buffer.as_ptr()).write(value) };
    HostRef(NonNull::from(object))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn wait<'a, T>(condvar: &Condvar, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
    condvar.wait(guard).unwrap_or_else(PoisonError::into_inner)
}

struct Ownership {
    owner: Option<ThreadId>,
    depth: u32,
}

/// Hosted recursive mutex.
pub struct HostMutex {
    state: Mutex<Ownership>,
    released: Condvar,
}

struct Permits {
    count: u32,
    maximum: u32,
    /// Priorities of the threads blocked in take
    waiters: Vec<u32>,
}

/// Hosted semaphore.
pub struct HostSemaphore {
    state: Mutex<Permits>,
    available: Condvar,
}

impl HostSemaphore {
    fn give(&self) -> Result<bool, KernelError> {
        let mut permits = lock(&self.state);
        if permits.count >= permits.maximum {
            return Err(KernelError::Overflow);
        }
        permits.count += 1;
        let caller = current_priority();
        let woken = permits.waiters.iter().any(|&waiter| waiter > caller);
        self.available.notify_one();
        Ok(woken)
    }
}

struct TaskRecord {
    priority: AtomicU32,
    deleted: Mutex<bool>,
    deletion: Condvar,
}

/// Hosted task control block.
pub struct HostTask {
    record: Arc<TaskRecord>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

/// Parameter passed to a task's entry point.
struct Parameter(*mut c_void);

// The creator guarantees the pointee outlives the task.
unsafe impl Send for Parameter {}

impl Parameter {
    fn into_inner(self) -> *mut c_void {
        self.0
    }
}

thread_local! {
    static CURRENT: RefCell<Option<Arc<TaskRecord>>> = const { RefCell::new(None) };
}

static TICKS: AtomicU64 = AtomicU64::new(0);
static SWITCHES: AtomicU64 = AtomicU64::new(0);
static BLOCKED: AtomicUsize = AtomicUsize::new(0);
/// Wake-up ticks of the threads currently in `delay`
static SLEEPERS: Mutex<Vec<u64>> = Mutex::new(Vec::new());

fn current_priority() -> u32 {
    CURRENT.with(|current| {
        current
            .borrow()
            .as_ref()
            .map_or(0, |record| record.priority.load(Ordering::Acquire))
    })
}

/// Marks the calling thread as blocked in the kernel while alive.
struct Blocked;

impl Blocked {
    fn enter() -> Self {
        BLOCKED.fetch_add(1, Ordering::AcqRel);
        Self
    }
}

impl Drop for Blocked {
    fn drop(&mut self) {
        BLOCKED.fetch_sub(1, Ordering::AcqRel);
    }
}

impl Hosted {
    /// Ticks counted so far.
    pub fn tick_count() -> u64 {
        TICKS.load(Ordering::Acquire)
    }

    /// Context switches requested so far.
    pub fn context_switches() -> u64 {
        SWITCHES.load(Ordering::Acquire)
    }

    /// Number of threads currently blocked on a mutex or semaphore.
    pub fn blocked_threads() -> usize {
        BLOCKED.load(Ordering::Acquire)
    }

    /// Priority of the calling task; 0 outside of tasks.
    pub fn current_priority() -> u32 {
        current_priority()
    }
}

unsafe impl Kernel for Hosted {
    type MutexHandle = HostRef<HostMutex>;
    type SemaphoreHandle = HostRef<HostSemaphore>;
    type TaskHandle = HostRef<HostTask>;

    type MutexBuffer = HostMutex;
    type SemaphoreBuffer = HostSemaphore;
    type TaskBuffer = HostTask;

    const MAX_PRIORITIES: i32 = 32;
    const TICK_RATE_HZ: u32 = 1000;
    const MAX_DELAY: u32 = u32::MAX;

    unsafe fn create_recursive_mutex(
        buffer: NonNull<MaybeUninit<HostMutex>>,
    ) -> Option<Self::MutexHandle> {
        let mutex = HostMutex {
            state: Mutex::new(Ownership { owner: None, depth: 0 }),
            released: Condvar::new(),
        };
        Some(unsafe { emplace(buffer, mutex) })
    }

    unsafe fn delete_mutex(mutex: Self::MutexHandle) {
        unsafe { ptr::drop_in_place(mutex.0.as_ptr()) };
    }

    unsafe fn take_recursive(mutex: Self::MutexHandle) -> Result<(), KernelError> {
        let mutex = unsafe { mutex.get() };
        let me = thread::current().id();
        let mut state = lock(&mutex.state);
        if state.owner.is_some_and(|owner| owner != me) {
            let _blocked = Blocked::enter();
            while state.owner.is_some() {
                state = wait(&mutex.released, state);
            }
        }
        state.owner = Some(me);
        state.depth += 1;
        Ok(())
    }

    unsafe fn give_recursive(mutex: Self::MutexHandle) -> Result<(), KernelError> {
        let mutex = unsafe { mutex.get() };
        let mut state = lock(&mutex.state);
        if state.owner != Some(thread::current().id()) {
            return Err(KernelError::NotOwner);
        }
        state.depth -= 1;
        if state.depth == 0 {
            state.owner = None;
            mutex.released.notify_one();
        }
        Ok(())
    }

    unsafe fn create_counting_semaphore(
        maximum: u32,
        initial: u32,
        buffer: NonNull<MaybeUninit<HostSemaphore>>,
    ) -> Option<Self::SemaphoreHandle> {
        if initial > maximum {
            return None;
        }
        let semaphore = HostSemaphore {
            state: Mutex::new(Permits {
                count: initial,
                maximum,
                waiters: Vec::new(),
            }),
            available: Condvar::new(),
        };
        Some(unsafe { emplace(buffer, semaphore) })
    }

    unsafe fn create_binary_semaphore(
        buffer: NonNull<MaybeUninit<HostSemaphore>>,
    ) -> Option<Self::SemaphoreHandle> {
        unsafe { Self::create_counting_semaphore(1, 0, buffer) }
    }

    unsafe fn delete_semaphore(semaphore: Self::SemaphoreHandle) {
        unsafe { ptr::drop_in_place(semaphore.0.as_ptr()) };
    }

    unsafe fn take_semaphore(semaphore: Self::SemaphoreHandle) -> Result<(), KernelError> {
        let semaphore = unsafe { semaphore.get() };
        let mut permits = lock(&semaphore.state);
        if permits.count == 0 {
            let priority = current_priority();
            let _blocked = Blocked::enter();
            permits.waiters.push(priority);
            while permits.count == 0 {
                permits = wait(&semaphore.available, permits);
            }
            if let Some(at) = permits.waiters.iter().position(|&p| p == priority) {
                permits.waiters.swap_remove(at);
            }
        }
        permits.count -= 1;
        Ok(())
    }

    unsafe fn give_semaphore(semaphore: Self::SemaphoreHandle) -> Result<(), KernelError> {
        unsafe { semaphore.get() }.give().map(drop)
    }

    unsafe fn give_semaphore_from_isr(
        semaphore: Self::SemaphoreHandle,
        woken: &mut bool,
    ) -> Result<(), KernelError> {
        *woken = unsafe { semaphore.get() }.give()?;
        Ok(())
    }

    unsafe fn semaphore_count(semaphore: Self::SemaphoreHandle) -> u32 {
        let semaphore = unsafe { semaphore.get() };
        let permits = lock(&semaphore.state);
        permits.count
    }

    unsafe fn create_static_task(
        entry: TaskEntry,
        name: &'static CStr,
        _stack: NonNull<[u8]>,
        parameter: *mut c_void,
        priority: u32,
        buffer: NonNull<MaybeUninit<HostTask>>,
    ) -> Option<Self::TaskHandle> {
        let record = Arc::new(TaskRecord {
            priority: AtomicU32::new(priority),
            deleted: Mutex::new(false),
            deletion: Condvar::new(),
        });
        let name = name.to_string_lossy().into_owned();
        let parameter = Parameter(parameter);
        let own = Arc::clone(&record);

        let spawned = thread::Builder::new().name(name.clone()).spawn(move || {
            CURRENT.with(|current| *current.borrow_mut() = Some(own));
            // SAFETY: the creator keeps the parameter alive until deletion.
            unsafe { entry(parameter.into_inner()) };
        });

        match spawned {
            Ok(join) => {
                log::debug!("spawned hosted task {name:?} at priority {priority}");
                let task = HostTask {
                    record,
                    thread: Mutex::new(Some(join)),
                };
                Some(unsafe { emplace(buffer, task) })
            }
            Err(e) => {
                log::warn!("cannot spawn hosted task {name:?}: {e}");
                None
            }
        }
    }

    unsafe fn set_task_priority(task: Self::TaskHandle, priority: u32) {
        unsafe { task.get() }.record.priority.store(priority, Ordering::Release);
    }

    unsafe fn delete_task(task: Self::TaskHandle) {
        let host = unsafe { task.get() };
        *lock(&host.record.deleted) = true;
        host.record.deletion.notify_all();

        let join = lock(&host.thread).take();
        if let Some(join) = join {
            if join.thread().id() != thread::current().id() {
                let _ = join.join();
            }
        }
        log::debug!("deleted hosted task");
        unsafe { ptr::drop_in_place(task.0.as_ptr()) };
    }

    fn park_current_task() {
        let Some(record) = CURRENT.with(|current| current.borrow().clone()) else {
            return;
        };
        let mut deleted = lock(&record.deleted);
        while !*deleted {
            deleted = wait(&record.deletion, deleted);
        }
    }

    fn increment_tick() -> bool {
        let now = TICKS.fetch_add(1, Ordering::AcqRel) + 1;
        let mut sleepers = lock(&SLEEPERS);
        let before = sleepers.len();
        sleepers.retain(|&wake| wake > now);
        before != sleepers.len()
    }

    fn switch_context() {
        SWITCHES.fetch_add(1, Ordering::AcqRel);
        thread::yield_now();
    }

    fn yield_now() {
        thread::yield_now();
    }

    fn yield_from_isr() {
        SWITCHES.fetch_add(1, Ordering::AcqRel);
    }

    fn delay(ticks: u32) {
        if ticks == 0 {
            thread::yield_now();
            return;
        }
        let wake = TICKS.load(Ordering::Acquire) + u64::from(ticks);
        lock(&SLEEPERS).push(wake);

        let micros = u64::from(ticks) * 1_000_000 / u64::from(Self::TICK_RATE_HZ);
        thread::sleep(Duration::from_micros(micros));

        let mut sleepers = lock(&SLEEPERS);
        if let Some(at) = sleepers.iter().position(|&w| w == wake) {
            sleepers.swap_remove(at);
        }
    }
}
