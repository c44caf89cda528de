//! Allocation strategies for resources created at run time.
//!
//! Which strategy backs a resource kind is decided when the crate is built
//! (see [`crate::config`]):
//!
//! | Pool size | Heap allowed | Strategy |
//! |-----------|--------------|----------|
//! | `N > 0` | any | [`ResourcePool<T, N>`] |
//! | `0` | yes | [`Heap<T>`] |
//! | `0` | no (`no-heap`) | [`Disabled<T>`] |
//!
//! [`Guarded`] pairs a strategy with a [`Mutex`] so that concurrent creators
//! are serialized, and hands values out as pinned [`ResourceBox`]es.

use core::mem::MaybeUninit;
use core::ops::Deref;
use core::pin::Pin;

use crate::error::{Error, Result};
use crate::kernel::Kernel;
use crate::mutex::Mutex;
use crate::object::Object;
use crate::pool::{PoolBox, ResourcePool};

/// Source of storage for values of type `T`.
pub trait Allocation<T> {
    /// Owning pointer returned by [`init_in_place`](Self::init_in_place).
    type Owned<'a>: Deref<Target = T>
    where
        Self: 'a;

    /// Hands fresh storage to `init`, which builds the value in place.
    ///
    /// Returns `None`, without calling `init`, when no storage is left.
    ///
    /// # Safety
    ///
    /// `init` must leave the storage fully initialized.
    unsafe fn init_in_place(&self, init: impl FnOnce(&mut MaybeUninit<T>)) -> Option<Self::Owned<'_>>;

    /// Pinned view of an owned value. Values never move once emplaced.
    fn pin<'a, 'b>(owned: &'b Self::Owned<'a>) -> Pin<&'b T>
    where
        Self: 'a;
}

impl<T, const N: usize> Allocation<T> for ResourcePool<T, N> {
    type Owned<'a>
        = PoolBox<'a, T, N>
    where
        Self: 'a;

    unsafe fn init_in_place(&self, init: impl FnOnce(&mut MaybeUninit<T>)) -> Option<PoolBox<'_, T, N>> {
        // SAFETY: forwarded to the caller.
        unsafe { ResourcePool::init_in_place(self, init) }
    }

    fn pin<'a, 'b>(owned: &'b PoolBox<'a, T, N>) -> Pin<&'b T>
    where
        Self: 'a,
    {
        owned.as_pin()
    }
}

/// Resource kind that cannot be created at run time.
pub type Disabled<T> = ResourcePool<T, 0>;

/// Heap allocation through the global allocator.
#[cfg(feature = "alloc")]
pub struct Heap<T>(core::marker::PhantomData<fn() -> T>);

#[cfg(feature = "alloc")]
impl<T> Heap<T> {
    pub const fn new() -> Self {
        Self(core::marker::PhantomData)
    }
}

#[cfg(feature = "alloc")]
impl<T> Default for Heap<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "alloc")]
impl<T> Allocation<T> for Heap<T> {
    type Owned<'a>
        = Pin<alloc::boxed::Box<T>>
    where
        Self: 'a;

    /// Allocates uninitialized memory, so large values never pass through
    /// the caller's stack. An allocation failure counts as exhaustion.
    unsafe fn init_in_place(&self, init: impl FnOnce(&mut MaybeUninit<T>)) -> Option<Self::Owned<'_>> {
        let layout = core::alloc::Layout::new::<T>();
        let ptr = if layout.size() == 0 {
            core::ptr::NonNull::<T>::dangling().as_ptr()
        } else {
            // SAFETY: the layout has a non-zero size.
            let raw = unsafe { alloc::alloc::alloc(layout) }.cast::<T>();
            if raw.is_null() {
                log::debug!("heap allocation of {} bytes failed", layout.size());
                return None;
            }
            raw
        };
        // SAFETY: `ptr` is valid for a `T` and exclusively ours.
        init(unsafe { &mut *ptr.cast::<MaybeUninit<T>>() });
        // SAFETY: allocated by the global allocator with `Layout::new::<T>()`
        // and initialized by `init`.
        Some(alloc::boxed::Box::into_pin(unsafe { alloc::boxed::Box::from_raw(ptr) }))
    }

    fn pin<'a, 'b>(owned: &'b Self::Owned<'a>) -> Pin<&'b T>
    where
        Self: 'a,
    {
        owned.as_ref()
    }
}

/// A constructed resource owned by an [`Allocation`].
///
/// Dropping the box destroys the resource and returns its storage.
pub struct ResourceBox<'a, T, A: Allocation<T> + 'a> {
    owned: A::Owned<'a>,
}

impl<'a, T, A: Allocation<T> + 'a> ResourceBox<'a, T, A> {
    pub(crate) fn new(owned: A::Owned<'a>) -> Self {
        Self { owned }
    }

    /// Pinned view of the resource, as needed by `construct`/`execute`.
    pub fn as_pin(&self) -> Pin<&T> {
        A::pin(&self.owned)
    }
}

impl<'a, T, A: Allocation<T> + 'a> Deref for ResourceBox<'a, T, A> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.owned
    }
}

/// An allocation whose use is serialized by a kernel mutex.
pub struct Guarded<K: Kernel, A> {
    mutex: Mutex<K>,
    allocation: A,
}

impl<K: Kernel, A> Guarded<K, A> {
    pub const fn new(allocation: A) -> Self {
        Self {
            mutex: Mutex::new(),
            allocation,
        }
    }

    /// Creates the guard mutex.
    pub fn construct(self: Pin<&Self>) -> Result<()> {
        self.mutex().construct()
    }

    fn mutex(self: Pin<&Self>) -> Pin<&Mutex<K>> {
        // SAFETY: structural pinning; the mutex is never moved out of `self`.
        unsafe { self.map_unchecked(|g| &g.mutex) }
    }

    /// Takes storage while holding the guard mutex and lets `init` build the
    /// value directly in it.
    ///
    /// # Safety
    ///
    /// `init` must leave its argument fully initialized.
    unsafe fn take<T>(&self, init: impl FnOnce(&mut MaybeUninit<T>)) -> Result<ResourceBox<'_, T, A>>
    where
        A: Allocation<T>,
    {
        let _guard = self.mutex.guard()?;
        // SAFETY: forwarded to the caller.
        let owned = unsafe { self.allocation.init_in_place(init) }.ok_or_else(|| {
            log::debug!("allocation exhausted");
            Error::Exhausted
        })?;
        let boxed: ResourceBox<'_, T, A> = ResourceBox::new(owned);
        Ok(boxed)
    }

    /// Builds a value in place with `init`.
    ///
    /// Fails with [`Error::Exhausted`] when the allocation has no storage
    /// left, and with [`Error::NotConstructed`] if the value reports itself
    /// as not constructed; the value is dropped and its storage returned in
    /// the latter case.
    ///
    /// # Safety
    ///
    /// `init` must leave its argument fully initialized.
    pub unsafe fn emplace_in_place<T: Object>(
        &self,
        init: impl FnOnce(&mut MaybeUninit<T>),
    ) -> Result<ResourceBox<'_, T, A>>
    where
        A: Allocation<T>,
    {
        // SAFETY: forwarded to the caller.
        let boxed = unsafe { self.take(init) }?;
        if !boxed.is_constructed() {
            return Err(Error::NotConstructed);
        }
        Ok(boxed)
    }

    /// Moves `value` into the allocation, see
    /// [`emplace_in_place`](Self::emplace_in_place).
    pub fn emplace<T: Object>(&self, value: T) -> Result<ResourceBox<'_, T, A>>
    where
        A: Allocation<T>,
    {
        // SAFETY: `write` initializes the whole slot.
        unsafe {
            self.emplace_in_place(|slot| {
                slot.write(value);
            })
        }
    }

    /// Emplaces `value` and runs its pinned construction phase.
    pub fn emplace_with<T>(
        &self,
        value: T,
        construct: impl FnOnce(Pin<&T>) -> Result<()>,
    ) -> Result<ResourceBox<'_, T, A>>
    where
        A: Allocation<T>,
    {
        // SAFETY: `write` initializes the whole slot.
        let boxed = unsafe {
            self.take(|slot| {
                slot.write(value);
            })
        }?;
        construct(boxed.as_pin())?;
        Ok(boxed)
    }
}

impl<K: Kernel, A> Object for Guarded<K, A> {
    fn is_constructed(&self) -> bool {
        self.mutex.is_constructed()
    }
}
