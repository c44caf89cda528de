//! Fixed-capacity object pool.
//!
//! A [`ResourcePool`] owns `N` correctly aligned slots for values of type `T`
//! and hands them out without touching any heap. Bookkeeping runs inside a
//! `critical_section`, so the pool can be shared between tasks.
//!
//! ```text
//! ResourcePool<T, N>
//!   ├── slots: [MaybeUninit<T>; N]
//!   └── free list (critical section)
//!         ├── fresh:    next never-used index
//!         ├── returned: stack of freed indices (heapless::Vec)
//!         └── used:     per-slot flag, rejects double frees
//! ```
//!
//! Raw [`Slot`]s carry no value lifetime. [`ResourcePool::emplace`] wraps a
//! slot in a [`PoolBox`] that drops the value and frees the slot for you.
//!
//! # Example
//!
//! ```
//! use osal::pool::ResourcePool;
//!
//! static POOL: ResourcePool<u32, 2> = ResourcePool::new();
//!
//! let a = POOL.emplace(1).unwrap();
//! let b = POOL.emplace(2).unwrap();
//! assert!(POOL.emplace(3).is_err());
//! drop(a);
//! assert_eq!(*POOL.emplace(4).unwrap(), 4);
//! # drop(b);
//! ```

use core::cell::{RefCell, UnsafeCell};
use core::mem::MaybeUninit;
use core::ops::Deref;
use core::pin::Pin;
use core::ptr::NonNull;

use critical_section::Mutex as CsMutex;
use heapless::Vec;

struct FreeList<const N: usize> {
    fresh: usize,
    returned: Vec<usize, N>,
    used: [bool; N],
}

impl<const N: usize> FreeList<N> {
    const fn new() -> Self {
        Self {
            fresh: 0,
            returned: Vec::new(),
            used: [false; N],
        }
    }

    fn pop(&mut self) -> Option<usize> {
        let index = match self.returned.pop() {
            Some(index) => index,
            None if self.fresh < N => {
                self.fresh += 1;
                self.fresh - 1
            }
            None => return None,
        };
        self.used[index] = true;
        Some(index)
    }

    fn push(&mut self, index: usize) -> bool {
        if !core::mem::replace(&mut self.used[index], false) {
            return false;
        }
        // Cannot overflow: at most N indices are ever in use.
        let _ = self.returned.push(index);
        true
    }

    fn available(&self) -> usize {
        N - self.fresh + self.returned.len()
    }
}

/// Storage handed out by [`ResourcePool::allocate`].
///
/// The slot's memory is uninitialized; writing to it and dropping what was
/// written is the caller's business.
pub struct Slot<T> {
    index: usize,
    ptr: NonNull<MaybeUninit<T>>,
}

impl<T> Clone for Slot<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Slot<T> {}

impl<T> Slot<T> {
    /// Pointer to the slot's storage.
    pub fn as_ptr(&self) -> *mut MaybeUninit<T> {
        self.ptr.as_ptr()
    }

    /// Index of the slot inside its pool.
    pub fn index(&self) -> usize {
        self.index
    }
}

/// Fixed pool of `N` slots for values of type `T`.
pub struct ResourcePool<T, const N: usize> {
    slots: [UnsafeCell<MaybeUninit<T>>; N],
    free: CsMutex<RefCell<FreeList<N>>>,
}

// Slots are handed out to exactly one owner each.
unsafe impl<T: Send, const N: usize> Sync for ResourcePool<T, N> {}
unsafe impl<T: Send, const N: usize> Send for ResourcePool<T, N> {}

impl<T, const N: usize> ResourcePool<T, N> {
    /// Creates a pool with all `N` slots free.
    pub const fn new() -> Self {
        Self {
            // SAFETY: an array of `UnsafeCell<MaybeUninit<_>>` needs no
            // initialization.
            slots: unsafe { MaybeUninit::uninit().assume_init() },
            free: CsMutex::new(RefCell::new(FreeList::new())),
        }
    }

    /// Takes a free slot, or `None` when all `N` are in use.
    pub fn allocate(&self) -> Option<Slot<T>> {
        let index = critical_section::with(|cs| self.free.borrow_ref_mut(cs).pop())?;
        let ptr = NonNull::from(&self.slots[index]).cast();
        Some(Slot { index, ptr })
    }

    /// Returns a slot to the pool.
    ///
    /// Freeing a slot twice, or a slot of another pool, is ignored. Any value
    /// still in the slot is leaked, not dropped.
    pub fn free(&self, slot: Slot<T>) {
        let ours = self
            .slots
            .get(slot.index)
            .is_some_and(|cell| cell.get() == slot.as_ptr());
        let freed = ours && critical_section::with(|cs| self.free.borrow_ref_mut(cs).push(slot.index));
        if !freed {
            log::debug!("ignoring free of slot {} not allocated from this pool", slot.index);
        }
    }

    /// Moves `value` into a free slot.
    ///
    /// Gives `value` back when the pool is exhausted.
    pub fn emplace(&self, value: T) -> Result<PoolBox<'_, T, N>, T> {
        let Some(slot) = self.allocate() else {
            return Err(value);
        };
        // SAFETY: the slot was just allocated and is exclusively ours.
        unsafe { slot.as_ptr().write(MaybeUninit::new(value)) };
        Ok(PoolBox { pool: self, slot })
    }

    /// Lets `init` build a value directly in a free slot.
    ///
    /// Returns `None`, without calling `init`, when the pool is exhausted. A
    /// panic in `init` leaks the slot.
    ///
    /// # Safety
    ///
    /// `init` must leave the slot fully initialized.
    pub unsafe fn init_in_place(&self, init: impl FnOnce(&mut MaybeUninit<T>)) -> Option<PoolBox<'_, T, N>> {
        let slot = self.allocate()?;
        // SAFETY: the slot was just allocated and is exclusively ours.
        init(unsafe { &mut *slot.as_ptr() });
        Some(PoolBox { pool: self, slot })
    }

    /// Total number of slots.
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Number of slots currently free.
    pub fn available(&self) -> usize {
        critical_section::with(|cs| self.free.borrow_ref(cs).available())
    }
}

impl<T, const N: usize> Default for ResourcePool<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Owning pointer to a value living in a [`ResourcePool`] slot.
///
/// The value never moves while the box exists, so it can be pinned.
pub struct PoolBox<'p, T, const N: usize> {
    pool: &'p ResourcePool<T, N>,
    slot: Slot<T>,
}

unsafe impl<T: Sync, const N: usize> Sync for PoolBox<'_, T, N> {}
unsafe impl<T: Send + Sync, const N: usize> Send for PoolBox<'_, T, N> {}

impl<T, const N: usize> PoolBox<'_, T, N> {
    /// Pinned view of the value.
    pub fn as_pin(&self) -> Pin<&T> {
        // SAFETY: the value stays in its slot until the box is dropped, and
        // drop runs before the slot is handed out again.
        unsafe { Pin::new_unchecked(&**self) }
    }
}

impl<T, const N: usize> Deref for PoolBox<'_, T, N> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: initialized by `emplace`, dropped only in `drop`.
        unsafe { (*self.slot.as_ptr()).assume_init_ref() }
    }
}

impl<T, const N: usize> Drop for PoolBox<'_, T, N> {
    fn drop(&mut self) {
        // SAFETY: the value was initialized by `emplace` and is dropped once.
        unsafe { (*self.slot.as_ptr()).assume_init_drop() };
        self.pool.free(self.slot);
    }
}
