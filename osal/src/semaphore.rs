//! Counting and binary semaphores.
//!
//! Task code uses [`Semaphore::acquire`] and [`Semaphore::release`].
//! Interrupt handlers use [`Semaphore::release_from_interrupt`] and must then
//! honour [`Semaphore::has_to_switch_context`]: when it reports `true`, the
//! handler requests a context switch before returning, otherwise the woken
//! task only runs at the next tick.
//!
//! An interrupt handler can be given a [`SemaphoreIsr`] view instead of the
//! semaphore itself; the view has no blocking operations at all.
//!
//! # Example
//!
//! ```
//! use core::pin::pin;
//! use osal::hosted::Hosted;
//! use osal::semaphore::Semaphore;
//!
//! let permits = pin!(Semaphore::<Hosted>::with_maximum(2, 2));
//! permits.as_ref().construct().unwrap();
//!
//! permits.acquire().unwrap();
//! assert_eq!(permits.count(), 1);
//! permits.release().unwrap();
//! assert!(permits.release().is_err()); // already at maximum
//! ```

use core::cell::{Cell, UnsafeCell};
use core::marker::PhantomPinned;
use core::mem::MaybeUninit;
use core::pin::Pin;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicBool, Ordering};

use critical_section::Mutex as CsMutex;

use crate::error::{Error, KernelError, Result};
use crate::kernel::Kernel;
use crate::object::{Construction, Object};

/// Largest number of permits a semaphore can hold.
pub const MAX_PERMITS: i32 = 0x7FFF_FFFF;

/// Flavour of a [`Semaphore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SemaphoreType {
    /// Holds up to `maximum` permits.
    Counting,
    /// Holds at most one permit and starts empty.
    Binary,
}

/// Counting or binary semaphore.
pub struct Semaphore<K: Kernel> {
    construction: Construction,
    kind: SemaphoreType,
    permits: i32,
    maximum: i32,
    /// Set by the last interrupt release if it woke a higher-priority task
    woken: AtomicBool,
    handle: CsMutex<Cell<Option<K::SemaphoreHandle>>>,
    /// Kernel control block
    buffer: UnsafeCell<MaybeUninit<K::SemaphoreBuffer>>,
    /// Prevents moving
    _pin: PhantomPinned,
}

// The kernel serializes every access to the control block.
unsafe impl<K: Kernel> Sync for Semaphore<K> {}
unsafe impl<K: Kernel> Send for Semaphore<K> {}

impl<K: Kernel> Semaphore<K> {
    /// Creates a semaphore of the given type with `permits` initial permits
    /// and a maximum of [`MAX_PERMITS`].
    ///
    /// A binary semaphore ignores `permits` (beyond rejecting negative
    /// values) and starts empty.
    pub const fn new(kind: SemaphoreType, permits: i32) -> Self {
        Self::with_parameters(kind, permits, MAX_PERMITS)
    }

    /// Creates a counting semaphore with `permits` of at most `maximum`
    /// permits.
    pub const fn with_maximum(permits: i32, maximum: i32) -> Self {
        Self::with_parameters(SemaphoreType::Counting, permits, maximum)
    }

    /// Empty binary semaphore.
    pub const fn binary() -> Self {
        Self::new(SemaphoreType::Binary, 0)
    }

    const fn with_parameters(kind: SemaphoreType, permits: i32, maximum: i32) -> Self {
        Self {
            construction: Construction::new(),
            kind,
            permits,
            maximum,
            woken: AtomicBool::new(false),
            handle: CsMutex::new(Cell::new(None)),
            buffer: UnsafeCell::new(MaybeUninit::uninit()),
            _pin: PhantomPinned,
        }
    }

    fn arguments_valid(&self) -> bool {
        let in_range = self.permits >= 0
            && self.maximum >= 0
            && i64::from(self.maximum) <= i64::from(MAX_PERMITS);
        match self.kind {
            SemaphoreType::Counting => in_range && self.permits <= self.maximum,
            SemaphoreType::Binary => in_range,
        }
    }

    /// Validates the arguments and creates the kernel semaphore.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyConstructed`] on a second call;
    /// - [`Error::InvalidArgument`] for negative permits or maximum, a
    ///   maximum above [`MAX_PERMITS`], or more permits than the maximum;
    /// - [`Error::Kernel`] if the kernel cannot create the semaphore.
    ///
    /// Any failure leaves the semaphore unusable for good.
    pub fn construct(self: Pin<&Self>) -> Result<()> {
        self.construction.claim()?;

        if !self.arguments_valid() {
            self.construction.settle(false);
            log::warn!(
                "semaphore rejected: permits={} maximum={}",
                self.permits,
                self.maximum
            );
            return Err(Error::InvalidArgument);
        }

        let buffer = NonNull::from(&self.buffer).cast();
        // SAFETY: `self` is pinned, so the control block stays in place until
        // `drop` deletes the kernel object.
        let handle = unsafe {
            match self.kind {
                // Both values are non-negative here.
                SemaphoreType::Counting => K::create_counting_semaphore(
                    self.maximum.unsigned_abs(),
                    self.permits.unsigned_abs(),
                    buffer,
                ),
                SemaphoreType::Binary => K::create_binary_semaphore(buffer),
            }
        };
        critical_section::with(|cs| self.handle.borrow(cs).set(handle));
        self.construction.settle(handle.is_some());

        if handle.is_none() {
            log::warn!("kernel refused to create a {:?} semaphore", self.kind);
            return Err(KernelError::NoResources.into());
        }
        Ok(())
    }

    fn live(&self) -> Result<K::SemaphoreHandle> {
        self.construction.check()?;
        critical_section::with(|cs| self.handle.borrow(cs).get()).ok_or(Error::NotConstructed)
    }

    /// Type this semaphore was created with.
    pub fn kind(&self) -> SemaphoreType {
        self.kind
    }

    /// Takes a permit, blocking until one is available.
    ///
    /// Task context only.
    pub fn acquire(&self) -> Result<()> {
        let handle = self.live()?;
        // SAFETY: the handle is live until `drop`.
        unsafe { K::take_semaphore(handle) }.map_err(Error::from)
    }

    /// Gives a permit back, waking at most one waiter.
    ///
    /// Task context only. Clears the interrupt woken flag.
    pub fn release(&self) -> Result<()> {
        let handle = self.live()?;
        self.woken.store(false, Ordering::Release);
        // SAFETY: the handle is live until `drop`.
        unsafe { K::give_semaphore(handle) }.map_err(Error::from)
    }

    /// Gives a permit back from an interrupt handler. Never blocks.
    ///
    /// Afterwards [`has_to_switch_context`](Self::has_to_switch_context)
    /// tells whether the release woke a task of higher priority than the
    /// interrupted one.
    pub fn release_from_interrupt(&self) -> Result<()> {
        let handle = self.live()?;
        let mut woken = false;
        // SAFETY: the handle is live until `drop`.
        let result = unsafe { K::give_semaphore_from_isr(handle, &mut woken) };
        self.woken.store(woken, Ordering::Release);
        result.map_err(Error::from)
    }

    /// Returns `true` if the last interrupt release woke a higher-priority
    /// task. Cleared by the next release of either kind.
    pub fn has_to_switch_context(&self) -> bool {
        self.woken.load(Ordering::Acquire)
    }

    /// Advisory number of available permits; 0 if not constructed.
    pub fn count(&self) -> i32 {
        match self.live() {
            // SAFETY: the handle is live until `drop`.
            Ok(handle) => i32::try_from(unsafe { K::semaphore_count(handle) }).unwrap_or(MAX_PERMITS),
            Err(_) => 0,
        }
    }

    /// View of this semaphore restricted to interrupt-safe operations.
    pub fn interrupt_view(&self) -> SemaphoreIsr<'_, K> {
        SemaphoreIsr { semaphore: self }
    }
}

impl<K: Kernel> Object for Semaphore<K> {
    fn is_constructed(&self) -> bool {
        self.construction.is_valid()
    }
}

impl<K: Kernel> Drop for Semaphore<K> {
    fn drop(&mut self) {
        self.construction.invalidate();
        if let Some(handle) = self.handle.get_mut().take() {
            // SAFETY: created by `construct` and not deleted yet.
            unsafe { K::delete_semaphore(handle) };
        }
    }
}

/// Interrupt-side handle of a [`Semaphore`].
pub struct SemaphoreIsr<'a, K: Kernel> {
    semaphore: &'a Semaphore<K>,
}

impl<K: Kernel> Clone for SemaphoreIsr<'_, K> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K: Kernel> Copy for SemaphoreIsr<'_, K> {}

impl<K: Kernel> SemaphoreIsr<'_, K> {
    /// See [`Semaphore::release_from_interrupt`].
    pub fn release(&self) -> Result<()> {
        self.semaphore.release_from_interrupt()
    }

    /// See [`Semaphore::has_to_switch_context`].
    pub fn has_to_switch_context(&self) -> bool {
        self.semaphore.has_to_switch_context()
    }

    /// Releases a permit and, if that woke a higher-priority task, asks the
    /// kernel to switch on interrupt exit.
    pub fn release_and_yield(&self) -> Result<()> {
        self.release()?;
        if self.has_to_switch_context() {
            K::yield_from_isr();
        }
        Ok(())
    }
}
