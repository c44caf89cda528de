//! Verify that MutexGuard cannot be sent to another thread.
//!
//! MutexGuard contains `PhantomData<*const ()>` which makes it !Send.
//! Kernel mutex ownership belongs to the task that locked it.

use osal::hosted::Hosted;
use osal::mutex::Mutex;
use std::pin::pin;

/// Helper function that requires T: Send to test the bound.
fn requires_send<T: Send>(_: T) {}

fn main() {
    let mutex = pin!(Mutex::<Hosted>::new());
    mutex.as_ref().construct().unwrap();
    let guard = mutex.guard().unwrap();

    // This should fail: MutexGuard is !Send
    requires_send(guard);
}
