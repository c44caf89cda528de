//! Global heap for the heap allocation strategy on bare-metal targets.
//!
//! With the `embedded-heap` feature the crate registers an `embedded-alloc`
//! linked-list heap as the global allocator. It starts empty: hand it a
//! memory region once at startup, before the first resource is created.
//!
//! ```ignore
//! use core::mem::MaybeUninit;
//! use static_cell::StaticCell;
//!
//! static REGION: StaticCell<[MaybeUninit<u8>; 16 * 1024]> = StaticCell::new();
//!
//! osal::heap::init(REGION.init([MaybeUninit::uninit(); 16 * 1024]))?;
//! ```

use core::mem::MaybeUninit;
use core::sync::atomic::{AtomicBool, Ordering};

use embedded_alloc::LlffHeap;

use crate::error::{Error, Result};

#[global_allocator]
static HEAP: LlffHeap = LlffHeap::empty();

static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Hands `region` to the global heap.
///
/// # Errors
///
/// [`Error::AlreadyConstructed`] if the heap was already initialized.
pub fn init(region: &'static mut [MaybeUninit<u8>]) -> Result<()> {
    if INITIALIZED.swap(true, Ordering::AcqRel) {
        return Err(Error::AlreadyConstructed);
    }
    // SAFETY: runs once; the region is exclusively the heap's from now on.
    unsafe { HEAP.init(region.as_mut_ptr() as usize, region.len()) };
    log::debug!("heap initialized with {} bytes", region.len());
    Ok(())
}

/// Bytes currently allocated.
pub fn used() -> usize {
    HEAP.used()
}

/// Bytes still available.
pub fn free() -> usize {
    HEAP.free()
}
