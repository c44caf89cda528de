//! Verify that a Thread cannot outlive the Task it runs.

use osal::hosted::Hosted;
use osal::thread::{Task, Thread};

struct Work;

impl Task for Work {
    fn start(&self) {}
}

fn main() {
    let thread: Thread<'_, Hosted> = {
        let work = Work;
        Thread::new(&work)
        // work is dropped here
    };

    // This should fail: the thread borrows the task
    drop(thread);
}
