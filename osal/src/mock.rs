//! Scripted single-threaded kernel for unit tests.
//!
//! State is thread-local, so every `#[test]` (which runs on its own thread)
//! starts from a clean kernel. Nothing ever blocks: a take that would block
//! fails with [`KernelError::WouldBlock`] instead. Tasks do not run on their
//! own; tests drive them with [`run_task`].

use core::cell::{Cell, RefCell};
use core::ffi::{c_void, CStr};
use core::mem::MaybeUninit;
use core::ptr::NonNull;

use crate::error::KernelError;
use crate::kernel::{Kernel, TaskEntry};

/// Kernel double with a configurable number of priorities.
pub struct MockKernel<const PRIORITIES: i32 = 32>;

pub struct Handle<T>(NonNull<T>);

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

// Only ever touched from the test thread that created it.
unsafe impl<T> Send for Handle<T> {}
unsafe impl<T> Sync for Handle<T> {}

impl<T> Handle<T> {
    fn get(&self) -> &T {
        // SAFETY: the primitives keep the buffer alive while the handle is live.
        unsafe { self.0.as_ref() }
    }
}

pub struct MockMutex {
    depth: Cell<u32>,
}

pub struct MockSemaphore {
    count: Cell<u32>,
    maximum: u32,
}

pub struct MockTask {
    entry: TaskEntry,
    parameter: *mut c_void,
    pub priority: Cell<u32>,
}

/// Failure injection and scripted kernel answers.
#[derive(Default)]
pub struct Script {
    pub fail_mutex: bool,
    pub fail_semaphore: bool,
    pub fail_task: bool,
    pub isr_wakes: bool,
    pub tick_switches: bool,
    /// Runs inside `create_static_task`, before the handle is returned
    pub on_task_created: Option<Box<dyn FnOnce()>>,
}

/// What the code under test asked the kernel to do.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub mutexes_created: usize,
    pub mutexes_deleted: usize,
    pub semaphores_created: usize,
    pub semaphores_deleted: usize,
    pub tasks_created: usize,
    pub tasks_deleted: usize,
    pub task_names: Vec<String>,
    pub parked: usize,
    pub ticks: usize,
    pub switches: usize,
    pub yields: usize,
    pub isr_yields: usize,
    pub delays: Vec<u32>,
}

thread_local! {
    static SCRIPT: RefCell<Script> = RefCell::new(Script::default());
    static RECORD: RefCell<Record> = RefCell::new(Record::default());
}

pub fn script(f: impl FnOnce(&mut Script)) {
    SCRIPT.with(|s| f(&mut s.borrow_mut()));
}

pub fn record() -> Record {
    RECORD.with(|r| r.borrow().clone())
}

fn note(f: impl FnOnce(&mut Record)) {
    RECORD.with(|r| f(&mut r.borrow_mut()));
}

fn scripted(f: impl FnOnce(&Script) -> bool) -> bool {
    SCRIPT.with(|s| f(&s.borrow()))
}

/// Runs a created task's entry point to completion on the calling thread.
pub fn run_task(task: Handle<MockTask>) {
    let task = task.get();
    // SAFETY: the parameter is the pinned thread that created the task.
    unsafe { (task.entry)(task.parameter) };
}

pub fn task(handle: Handle<MockTask>) -> &'static MockTask {
    // SAFETY: tests only inspect tasks whose threads are still alive.
    unsafe { &*handle.0.as_ptr() }
}

unsafe fn emplace<T>(buffer: NonNull<MaybeUninit<T>>, value: T) -> Handle<T> {
    // SAFETY: the caller passes a buffer valid for writes.
    let slot = unsafe { (*buffer.as_ptr()).write(value) };
    Handle(NonNull::from(slot))
}

unsafe impl<const PRIORITIES: i32> Kernel for MockKernel<PRIORITIES> {
    type MutexHandle = Handle<MockMutex>;
    type SemaphoreHandle = Handle<MockSemaphore>;
    type TaskHandle = Handle<MockTask>;

    type MutexBuffer = MockMutex;
    type SemaphoreBuffer = MockSemaphore;
    type TaskBuffer = MockTask;

    const MAX_PRIORITIES: i32 = PRIORITIES;
    const TICK_RATE_HZ: u32 = 100;
    const MAX_DELAY: u32 = 1_000_000;

    unsafe fn create_recursive_mutex(
        buffer: NonNull<MaybeUninit<MockMutex>>,
    ) -> Option<Self::MutexHandle> {
        if scripted(|s| s.fail_mutex) {
            return None;
        }
        note(|r| r.mutexes_created += 1);
        Some(unsafe { emplace(buffer, MockMutex { depth: Cell::new(0) }) })
    }

    unsafe fn delete_mutex(_mutex: Self::MutexHandle) {
        note(|r| r.mutexes_deleted += 1);
    }

    unsafe fn take_recursive(mutex: Self::MutexHandle) -> Result<(), KernelError> {
        let depth = &mutex.get().depth;
        depth.set(depth.get() + 1);
        Ok(())
    }

    unsafe fn give_recursive(mutex: Self::MutexHandle) -> Result<(), KernelError> {
        let depth = &mutex.get().depth;
        match depth.get() {
            0 => Err(KernelError::NotOwner),
            n => {
                depth.set(n - 1);
                Ok(())
            }
        }
    }

    unsafe fn create_counting_semaphore(
        maximum: u32,
        initial: u32,
        buffer: NonNull<MaybeUninit<MockSemaphore>>,
    ) -> Option<Self::SemaphoreHandle> {
        if scripted(|s| s.fail_semaphore) {
            return None;
        }
        note(|r| r.semaphores_created += 1);
        let semaphore = MockSemaphore { count: Cell::new(initial), maximum };
        Some(unsafe { emplace(buffer, semaphore) })
    }

    unsafe fn create_binary_semaphore(
        buffer: NonNull<MaybeUninit<MockSemaphore>>,
    ) -> Option<Self::SemaphoreHandle> {
        unsafe { Self::create_counting_semaphore(1, 0, buffer) }
    }

    unsafe fn delete_semaphore(_semaphore: Self::SemaphoreHandle) {
        note(|r| r.semaphores_deleted += 1);
    }

    unsafe fn take_semaphore(semaphore: Self::SemaphoreHandle) -> Result<(), KernelError> {
        let count = &semaphore.get().count;
        match count.get() {
            0 => Err(KernelError::WouldBlock),
            n => {
                count.set(n - 1);
                Ok(())
            }
        }
    }

    unsafe fn give_semaphore(semaphore: Self::SemaphoreHandle) -> Result<(), KernelError> {
        let semaphore = semaphore.get();
        if semaphore.count.get() >= semaphore.maximum {
            return Err(KernelError::Overflow);
        }
        semaphore.count.set(semaphore.count.get() + 1);
        Ok(())
    }

    unsafe fn give_semaphore_from_isr(
        semaphore: Self::SemaphoreHandle,
        woken: &mut bool,
    ) -> Result<(), KernelError> {
        unsafe { Self::give_semaphore(semaphore)? };
        if scripted(|s| s.isr_wakes) {
            *woken = true;
        }
        Ok(())
    }

    unsafe fn semaphore_count(semaphore: Self::SemaphoreHandle) -> u32 {
        semaphore.get().count.get()
    }

    unsafe fn create_static_task(
        entry: TaskEntry,
        name: &'static CStr,
        stack: NonNull<[u8]>,
        parameter: *mut c_void,
        priority: u32,
        buffer: NonNull<MaybeUninit<MockTask>>,
    ) -> Option<Self::TaskHandle> {
        if scripted(|s| s.fail_task) || stack.len() == 0 {
            return None;
        }
        note(|r| {
            r.tasks_created += 1;
            r.task_names.push(name.to_string_lossy().into_owned());
        });
        let task = MockTask {
            entry,
            parameter,
            priority: Cell::new(priority),
        };
        let handle = unsafe { emplace(buffer, task) };
        if let Some(hook) = SCRIPT.with(|s| s.borrow_mut().on_task_created.take()) {
            hook();
        }
        Some(handle)
    }

    unsafe fn set_task_priority(task: Self::TaskHandle, priority: u32) {
        task.get().priority.set(priority);
    }

    unsafe fn delete_task(_task: Self::TaskHandle) {
        note(|r| r.tasks_deleted += 1);
    }

    fn park_current_task() {
        note(|r| r.parked += 1);
    }

    fn increment_tick() -> bool {
        note(|r| r.ticks += 1);
        scripted(|s| s.tick_switches)
    }

    fn switch_context() {
        note(|r| r.switches += 1);
    }

    fn yield_now() {
        note(|r| r.yields += 1);
    }

    fn yield_from_isr() {
        note(|r| r.isr_yields += 1);
    }

    fn delay(ticks: u32) {
        note(|r| r.delays.push(ticks));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_conversion_rounds_up_and_saturates() {
        assert_eq!(MockKernel::<32>::ms_to_ticks(0), 0);
        assert_eq!(MockKernel::<32>::ms_to_ticks(1), 1);
        assert_eq!(MockKernel::<32>::ms_to_ticks(250), 25);
        assert_eq!(MockKernel::<32>::ms_to_ticks(u32::MAX), 1_000_000);
    }
}
