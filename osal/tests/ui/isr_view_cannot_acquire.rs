//! Verify that the interrupt view of a semaphore offers no blocking call.

use osal::hosted::Hosted;
use osal::semaphore::Semaphore;
use std::pin::pin;

fn main() {
    let semaphore = pin!(Semaphore::<Hosted>::binary());
    semaphore.as_ref().construct().unwrap();
    let isr = semaphore.interrupt_view();

    // This should fail: acquiring may block and is not part of the view
    let _ = isr.acquire();
}
