//! Construction tracking shared by every primitive.
//!
//! An object is created in a `PENDING` state by a `const fn new()`. Its
//! fallible construction phase runs once the object sits at its final address
//! and settles the state to either `VALID` or `INVALID`. The state is never
//! revisited afterwards, so a failed construction is permanent.
//!
//! ```text
//! PENDING ──claim()──► CLAIMED ──settle(true)──► VALID
//!                          │
//!                          └────settle(false)──► INVALID
//! ```

use core::sync::atomic::{AtomicU8, Ordering};

use crate::error::{Error, Result};

const PENDING: u8 = 0;
const CLAIMED: u8 = 1;
const VALID: u8 = 2;
const INVALID: u8 = 3;

/// Implemented by every object that goes through two-phase construction.
pub trait Object {
    /// Returns `true` if the object was validly constructed.
    ///
    /// Side-effect free and safe to call from any context, interrupts
    /// included.
    fn is_constructed(&self) -> bool;
}

/// Single-assignment construction flag.
pub(crate) struct Construction(AtomicU8);

impl Construction {
    /// Creates a flag that still has to be settled.
    pub(crate) const fn new() -> Self {
        Self(AtomicU8::new(PENDING))
    }

    /// Creates a flag for objects without a fallible construction phase.
    pub(crate) const fn valid() -> Self {
        Self(AtomicU8::new(VALID))
    }

    /// Claims the right to construct.
    ///
    /// Only one caller ever succeeds; everyone else gets
    /// [`Error::AlreadyConstructed`].
    pub(crate) fn claim(&self) -> Result<()> {
        self.0
            .compare_exchange(PENDING, CLAIMED, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| Error::AlreadyConstructed)
    }

    /// Records the construction outcome. Must follow a successful [`claim`].
    ///
    /// [`claim`]: Self::claim
    pub(crate) fn settle(&self, constructed: bool) {
        let state = if constructed { VALID } else { INVALID };
        self.0.store(state, Ordering::Release);
    }

    /// Claims and settles in one step, for checks that need no kernel call.
    pub(crate) fn settle_now(&self, constructed: bool) -> Result<()> {
        self.claim()?;
        self.settle(constructed);
        Ok(())
    }

    /// Marks the object as no longer usable during teardown.
    pub(crate) fn invalidate(&self) {
        self.0.store(INVALID, Ordering::Release);
    }

    #[inline]
    pub(crate) fn is_valid(&self) -> bool {
        self.0.load(Ordering::Acquire) == VALID
    }

    /// Gate used at the top of every public operation.
    #[inline]
    pub(crate) fn check(&self) -> Result<()> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(Error::NotConstructed)
        }
    }
}
