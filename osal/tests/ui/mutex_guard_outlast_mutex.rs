//! Verify that MutexGuard cannot outlive the Mutex it was obtained from.

use osal::hosted::Hosted;
use osal::mutex::{Mutex, MutexGuard};
use std::pin::pin;

fn main() {
    let guard: MutexGuard<'_, Hosted> = {
        let mutex = pin!(Mutex::<Hosted>::new());
        mutex.as_ref().construct().unwrap();
        mutex.guard().unwrap()
        // mutex is dropped here
    };

    // This should fail: guard cannot outlive mutex
    drop(guard);
}
