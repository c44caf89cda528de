//! Interrupt service routines the platform wires into its vector table.
//!
//! Both routines run in interrupt context and must stay short: they only
//! forward to the kernel.

use core::marker::PhantomData;

use crate::kernel::Kernel;
use crate::object::{Construction, Object};

/// Code invoked by an interrupt vector.
pub trait Runnable {
    fn start(&self);
}

/// Periodic tick handler.
pub struct TimerRoutine<K: Kernel> {
    construction: Construction,
    _kernel: PhantomData<fn() -> K>,
}

impl<K: Kernel> TimerRoutine<K> {
    pub const fn new() -> Self {
        Self {
            construction: Construction::valid(),
            _kernel: PhantomData,
        }
    }
}

impl<K: Kernel> Default for TimerRoutine<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Kernel> Runnable for TimerRoutine<K> {
    /// Advances the tick and switches context if a task became ready.
    fn start(&self) {
        if self.construction.is_valid() && K::increment_tick() {
            K::switch_context();
        }
    }
}

impl<K: Kernel> Object for TimerRoutine<K> {
    fn is_constructed(&self) -> bool {
        self.construction.is_valid()
    }
}

/// Supervisor-call handler.
pub struct SvcallRoutine<K: Kernel> {
    construction: Construction,
    _kernel: PhantomData<fn() -> K>,
}

impl<K: Kernel> SvcallRoutine<K> {
    pub const fn new() -> Self {
        Self {
            construction: Construction::valid(),
            _kernel: PhantomData,
        }
    }
}

impl<K: Kernel> Default for SvcallRoutine<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Kernel> Runnable for SvcallRoutine<K> {
    /// Switches context unconditionally.
    fn start(&self) {
        if self.construction.is_valid() {
            K::switch_context();
        }
    }
}

impl<K: Kernel> Object for SvcallRoutine<K> {
    fn is_constructed(&self) -> bool {
        self.construction.is_valid()
    }
}
