//! Thread lifecycle and scheduler behaviour on the hosted kernel.

#![cfg(feature = "std")]

use std::pin::{pin, Pin};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::thread as host;
use std::time::{Duration, Instant};

use osal::allocation::Heap;
use osal::config;
use osal::hosted::{self, Hosted};
use osal::pool::ResourcePool;
use osal::scheduler::{self, Scheduler};
use osal::semaphore::SemaphoreType;
use osal::system::System;
use osal::thread::{Status, Task, Thread, PRIORITY_MAX, PRIORITY_NORM, PRIORITY_WRONG};
use osal::Error;
use static_cell::StaticCell;

type Pool<'t, const N: usize> = ResourcePool<Thread<'t, Hosted>, N>;

#[derive(Default)]
struct Counter(AtomicUsize);

impl Task for Counter {
    fn start(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

impl Counter {
    fn runs(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// Records the kernel priority the body ran at.
#[derive(Default)]
struct PriorityRecorder(AtomicU32);

impl Task for PriorityRecorder {
    fn start(&self) {
        self.0.store(Hosted::current_priority(), Ordering::SeqCst);
    }
}

#[test]
fn pool_of_two_runs_two_threads_and_refuses_a_third() {
    hosted::init_logger();
    let (a, b, c) = (Counter::default(), Counter::default(), Counter::default());
    let scheduler = pin!(Scheduler::<Hosted, Pool<'_, 2>>::new(ResourcePool::new()));
    scheduler.as_ref().construct().unwrap();

    let first = scheduler.create_thread(&a).unwrap();
    let second = scheduler.create_thread(&b).unwrap();
    assert_eq!(scheduler.create_thread(&c).err(), Some(Error::Exhausted));

    first.as_pin().execute().unwrap();
    second.as_pin().execute().unwrap();
    first.join().unwrap();
    second.join().unwrap();
    assert_eq!((a.runs(), b.runs(), c.runs()), (1, 1, 0));

    drop(first);
    let third = scheduler.create_thread(&c).unwrap();
    third.as_pin().execute().unwrap();
    third.join().unwrap();
    assert_eq!(c.runs(), 1);
    assert_eq!(second.status(), Status::Dead);
}

#[test]
fn thread_runs_its_task_once() {
    let task = Counter::default();
    let thread = pin!(Thread::<Hosted>::new(&task));
    let thread = thread.as_ref();
    assert_eq!(thread.status(), Status::New);
    assert_eq!(thread.join(), Err(Error::InvalidState));

    thread.execute().unwrap();
    thread.join().unwrap();
    assert_eq!(thread.status(), Status::Dead);
    assert_eq!(task.runs(), 1);

    // Already finished: joins immediately, cannot run again.
    thread.join().unwrap();
    assert_eq!(thread.execute(), Err(Error::InvalidState));
    assert_eq!(task.runs(), 1);
}

#[test]
fn priority_set_before_start_reaches_the_task() {
    let recorder = PriorityRecorder::default();
    let thread = pin!(Thread::<Hosted>::new(&recorder));
    let thread = thread.as_ref();
    assert_eq!(thread.priority(), PRIORITY_NORM);

    thread.set_priority(PRIORITY_MAX).unwrap();
    thread.execute().unwrap();
    thread.join().unwrap();
    assert_eq!(recorder.0.load(Ordering::SeqCst), 10);
    assert_eq!(thread.set_priority(PRIORITY_NORM), Err(Error::InvalidState));
}

#[test]
fn invalid_task_gives_wrong_priority() {
    struct Never;
    impl Task for Never {
        fn start(&self) {}
        fn is_constructed(&self) -> bool {
            false
        }
    }

    let thread = Thread::<Hosted>::new(&Never);
    assert_eq!(thread.priority(), PRIORITY_WRONG);
    assert_eq!(thread.status(), Status::Dead);
}

#[test]
fn sleep_waits_at_least_the_requested_time() {
    let start = Instant::now();
    scheduler::sleep_thread::<Hosted>(15);
    Thread::<Hosted>::sleep(15);
    assert!(start.elapsed() >= Duration::from_millis(30));
}

/// Whether `System` has storage for a resource kind with this pool size.
fn has_storage(pool_size: usize) -> bool {
    pool_size > 0 || !cfg!(feature = "no-heap")
}

#[test]
fn system_installs_once_and_creates_resources() {
    static SYSTEM: StaticCell<System<'static, Hosted>> = StaticCell::new();
    static TASK: Counter = Counter(AtomicUsize::new(0));

    let system = System::install(&SYSTEM).unwrap();
    assert_eq!(System::install(&SYSTEM).err(), Some(Error::AlreadyConstructed));

    let mutex = system.create_mutex();
    if has_storage(config::NUMBER_OF_MUTEXES) {
        let mutex = mutex.unwrap();
        mutex.lock().unwrap();
        mutex.unlock().unwrap();
    } else {
        assert_eq!(mutex.err(), Some(Error::Exhausted));
    }

    let semaphore = system.create_semaphore(SemaphoreType::Counting, 1);
    if has_storage(config::NUMBER_OF_SEMAPHORES) {
        let semaphore = semaphore.unwrap();
        semaphore.acquire().unwrap();
        assert_eq!(semaphore.count(), 0);
        assert_eq!(system.create_counting_semaphore(2, 1).err(), Some(Error::InvalidArgument));
    } else {
        assert_eq!(semaphore.err(), Some(Error::Exhausted));
        assert_eq!(system.create_counting_semaphore(2, 1).err(), Some(Error::Exhausted));
    }

    let thread = system.scheduler().create_thread(&TASK);
    if has_storage(config::NUMBER_OF_THREADS) {
        let thread = thread.unwrap();
        thread.as_pin().execute().unwrap();
        thread.join().unwrap();
        assert_eq!(TASK.runs(), 1);
    } else {
        assert_eq!(thread.err(), Some(Error::Exhausted));
        assert_eq!(TASK.runs(), 0);
    }
}

/// Stack of the thread that creates threads. `cargo xtask configs` builds
/// with a task stack larger than this.
const CREATOR_STACK: usize = 64 * 1024;

fn on_small_stack(f: impl FnOnce() + Send + 'static) {
    host::Builder::new()
        .stack_size(CREATOR_STACK)
        .spawn(f)
        .unwrap()
        .join()
        .unwrap();
}

#[test]
fn pooled_thread_is_built_in_its_slot() {
    static SCHEDULER: Scheduler<'static, Hosted, ResourcePool<Thread<'static, Hosted>, 1>> =
        Scheduler::new(ResourcePool::new());
    static TASK: Counter = Counter(AtomicUsize::new(0));

    Pin::static_ref(&SCHEDULER).construct().unwrap();
    on_small_stack(|| {
        let thread = SCHEDULER.create_thread(&TASK).unwrap();
        thread.as_pin().execute().unwrap();
        thread.join().unwrap();
    });
    assert_eq!(TASK.runs(), 1);
}

#[test]
fn heap_thread_is_built_in_its_allocation() {
    static SCHEDULER: Scheduler<'static, Hosted, Heap<Thread<'static, Hosted>>> = Scheduler::new(Heap::new());
    static TASK: Counter = Counter(AtomicUsize::new(0));

    Pin::static_ref(&SCHEDULER).construct().unwrap();
    on_small_stack(|| {
        let thread = SCHEDULER.create_thread(&TASK).unwrap();
        thread.as_pin().execute().unwrap();
        thread.join().unwrap();
    });
    assert_eq!(TASK.runs(), 1);
}
