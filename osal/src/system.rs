//! Process-wide root object.
//!
//! [`System`] bundles the [`Scheduler`] with factories for mutexes and
//! semaphores. Storage for each resource kind follows the build
//! configuration (see [`crate::config`]). The system is set up exactly once
//! at startup, typically through [`System::install`]:
//!
//! ```
//! use osal::hosted::Hosted;
//! use osal::system::System;
//! use static_cell::StaticCell;
//!
//! static SYSTEM: StaticCell<System<'static, Hosted>> = StaticCell::new();
//!
//! let system = System::install(&SYSTEM).unwrap();
//! assert!(System::install(&SYSTEM).is_err());
//!
//! match system.create_mutex() {
//!     Ok(mutex) => {
//!         mutex.lock().unwrap();
//!         mutex.unlock().unwrap();
//!     }
//!     // Built with `no-heap` and no mutex pool.
//!     Err(e) => assert_eq!(e, osal::Error::Exhausted),
//! }
//! ```

use core::pin::Pin;

use static_cell::StaticCell;

use crate::allocation::{Guarded, ResourceBox};
use crate::config::{self, MutexAllocation, SemaphoreAllocation, ThreadAllocation};
use crate::error::{Error, Result};
use crate::kernel::Kernel;
use crate::mutex::Mutex;
use crate::object::{Construction, Object};
use crate::scheduler::Scheduler;
use crate::semaphore::{Semaphore, SemaphoreType};
use crate::thread::Thread;

/// Mutex created by [`System::create_mutex`].
pub type MutexBox<'s, K> = ResourceBox<'s, Mutex<K>, MutexAllocation<Mutex<K>>>;

/// Semaphore created by [`System::create_semaphore`].
pub type SemaphoreBox<'s, K> = ResourceBox<'s, Semaphore<K>, SemaphoreAllocation<Semaphore<K>>>;

/// Scheduler type owned by a [`System`].
pub type SystemScheduler<'t, K> = Scheduler<'t, K, ThreadAllocation<Thread<'t, K>>>;

/// Root of the abstraction layer.
pub struct System<'t, K: Kernel> {
    construction: Construction,
    scheduler: SystemScheduler<'t, K>,
    mutexes: Guarded<K, MutexAllocation<Mutex<K>>>,
    semaphores: Guarded<K, SemaphoreAllocation<Semaphore<K>>>,
}

impl<'t, K: Kernel> System<'t, K> {
    pub const fn new() -> Self {
        Self {
            construction: Construction::new(),
            scheduler: Scheduler::new(config::thread_allocation()),
            mutexes: Guarded::new(config::mutex_allocation()),
            semaphores: Guarded::new(config::semaphore_allocation()),
        }
    }

    /// Constructs the scheduler and both factories.
    ///
    /// Stops at the first failure; the system stays unusable afterwards.
    pub fn construct(self: Pin<&Self>) -> Result<()> {
        self.construction.claim()?;
        // SAFETY: structural pinning; no field is ever moved out of `self`.
        let result = unsafe {
            self.map_unchecked(|s| &s.scheduler)
                .construct()
                .and_then(|()| self.map_unchecked(|s| &s.mutexes).construct())
                .and_then(|()| self.map_unchecked(|s| &s.semaphores).construct())
        };
        self.construction.settle(result.is_ok());
        match result {
            Ok(()) => log::debug!("system constructed"),
            Err(e) => log::warn!("system construction failed: {e}"),
        }
        result
    }

    /// Thread factory and interrupt routines.
    pub fn scheduler(&self) -> &SystemScheduler<'t, K> {
        &self.scheduler
    }

    /// Creates a constructed recursive mutex.
    pub fn create_mutex(&self) -> Result<MutexBox<'_, K>> {
        self.construction.check()?;
        self.mutexes.emplace_with(Mutex::new(), Mutex::construct)
    }

    /// Creates a constructed semaphore, see [`Semaphore::new`].
    pub fn create_semaphore(&self, kind: SemaphoreType, permits: i32) -> Result<SemaphoreBox<'_, K>> {
        self.construction.check()?;
        self.semaphores
            .emplace_with(Semaphore::new(kind, permits), Semaphore::construct)
    }

    /// Creates a constructed counting semaphore, see
    /// [`Semaphore::with_maximum`].
    pub fn create_counting_semaphore(&self, permits: i32, maximum: i32) -> Result<SemaphoreBox<'_, K>> {
        self.construction.check()?;
        self.semaphores
            .emplace_with(Semaphore::with_maximum(permits, maximum), Semaphore::construct)
    }
}

impl<K: Kernel> System<'static, K> {
    /// Places a new system in `cell` and constructs it.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyConstructed`] if `cell` was already used, or the
    /// error of [`construct`](Self::construct).
    pub fn install(cell: &'static StaticCell<Self>) -> Result<Pin<&'static Self>> {
        let system: &'static Self = cell.try_init(Self::new()).ok_or(Error::AlreadyConstructed)?;
        let system = Pin::static_ref(system);
        system.construct()?;
        Ok(system)
    }
}

impl<K: Kernel> Default for System<'_, K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Kernel> Object for System<'_, K> {
    fn is_constructed(&self) -> bool {
        self.construction.is_valid()
    }
}
