//! Recursive mutex over a kernel lock.
//!
//! The control block lives inside the [`Mutex`] value, so the mutex has to be
//! pinned before the kernel sees it:
//!
//! ```text
//! Mutex::new()            (const, PENDING)
//!       │
//!       │ construct(Pin<&Mutex>)
//!       ▼
//! &Mutex  ── lock()/unlock()      recursive, owner-reentrant
//!         └─ guard() ──► MutexGuard (unlocks on drop, !Send)
//! ```
//!
//! # Example
//!
//! ```
//! use core::pin::pin;
//! use osal::hosted::Hosted;
//! use osal::mutex::Mutex;
//!
//! let mutex = pin!(Mutex::<Hosted>::new());
//! mutex.as_ref().construct().unwrap();
//!
//! mutex.lock().unwrap();
//! mutex.lock().unwrap();
//! mutex.unlock().unwrap();
//! mutex.unlock().unwrap();
//! assert!(mutex.unlock().is_err());
//!
//! {
//!     let _guard = mutex.guard().unwrap();
//!     // Mutex released when the guard drops.
//! }
//! ```

use core::cell::{Cell, UnsafeCell};
use core::marker::{PhantomData, PhantomPinned};
use core::mem::MaybeUninit;
use core::pin::Pin;
use core::ptr::NonNull;

use critical_section::Mutex as CsMutex;

use crate::error::{Error, KernelError, Result};
use crate::kernel::Kernel;
use crate::object::{Construction, Object};

/// Recursive mutual-exclusion lock.
pub struct Mutex<K: Kernel> {
    construction: Construction,
    handle: CsMutex<Cell<Option<K::MutexHandle>>>,
    /// Kernel control block
    buffer: UnsafeCell<MaybeUninit<K::MutexBuffer>>,
    /// Prevents moving
    _pin: PhantomPinned,
}

// The kernel serializes every access to the control block.
unsafe impl<K: Kernel> Sync for Mutex<K> {}
unsafe impl<K: Kernel> Send for Mutex<K> {}

impl<K: Kernel> Mutex<K> {
    /// Creates a mutex that still has to be constructed.
    pub const fn new() -> Self {
        Self {
            construction: Construction::new(),
            handle: CsMutex::new(Cell::new(None)),
            buffer: UnsafeCell::new(MaybeUninit::uninit()),
            _pin: PhantomPinned,
        }
    }

    /// Creates the kernel mutex in this value's control block.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyConstructed`] on a second call;
    /// - [`Error::Kernel`] if the kernel cannot create the mutex. The mutex
    ///   stays unusable for good.
    pub fn construct(self: Pin<&Self>) -> Result<()> {
        self.construction.claim()?;

        let buffer = NonNull::from(&self.buffer).cast();
        // SAFETY: `self` is pinned, so the control block stays in place until
        // `drop` deletes the kernel object.
        let handle = unsafe { K::create_recursive_mutex(buffer) };
        critical_section::with(|cs| self.handle.borrow(cs).set(handle));
        self.construction.settle(handle.is_some());

        if handle.is_none() {
            log::warn!("kernel refused to create a mutex");
            return Err(KernelError::NoResources.into());
        }
        Ok(())
    }

    fn live(&self) -> Result<K::MutexHandle> {
        self.construction.check()?;
        critical_section::with(|cs| self.handle.borrow(cs).get()).ok_or(Error::NotConstructed)
    }

    /// Locks the mutex, blocking until it is available.
    ///
    /// The owner may lock again; each lock needs a matching [`unlock`].
    ///
    /// [`unlock`]: Self::unlock
    pub fn lock(&self) -> Result<()> {
        let handle = self.live()?;
        // SAFETY: the handle is live until `drop`.
        unsafe { K::take_recursive(handle) }.map_err(Error::from)
    }

    /// Releases one level of ownership.
    ///
    /// # Errors
    ///
    /// [`KernelError::NotOwner`] if the caller does not hold the mutex.
    pub fn unlock(&self) -> Result<()> {
        let handle = self.live()?;
        // SAFETY: the handle is live until `drop`.
        unsafe { K::give_recursive(handle) }.map_err(Error::from)
    }

    /// Non-blocking lock attempt.
    ///
    /// Not provided: always fails with [`Error::Unsupported`] on a
    /// constructed mutex. Use [`lock`](Self::lock).
    pub fn try_lock(&self) -> Result<()> {
        self.live()?;
        Err(Error::Unsupported)
    }

    /// Locks the mutex and returns a guard that unlocks it on drop.
    pub fn guard(&self) -> Result<MutexGuard<'_, K>> {
        self.lock()?;
        Ok(MutexGuard {
            mutex: self,
            _not_send: PhantomData,
        })
    }
}

impl<K: Kernel> Default for Mutex<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Kernel> Object for Mutex<K> {
    fn is_constructed(&self) -> bool {
        self.construction.is_valid()
    }
}

impl<K: Kernel> Drop for Mutex<K> {
    fn drop(&mut self) {
        self.construction.invalidate();
        if let Some(handle) = self.handle.get_mut().take() {
            // SAFETY: created by `construct` and not deleted yet.
            unsafe { K::delete_mutex(handle) };
        }
    }
}

/// RAII guard for a locked [`Mutex`].
///
/// `!Send`: kernel mutex ownership belongs to the task that locked it.
#[must_use = "if unused, the mutex will immediately unlock"]
pub struct MutexGuard<'a, K: Kernel> {
    mutex: &'a Mutex<K>,
    /// Marker to make MutexGuard !Send (raw pointers are !Send)
    _not_send: PhantomData<*const ()>,
}

impl<K: Kernel> Drop for MutexGuard<'_, K> {
    fn drop(&mut self) {
        // Nothing to report to in drop; the owner locked it.
        let _ = self.mutex.unlock();
    }
}
