//! Scoped fail-safe reversion
//!
//! Taking manual control of hardware is paired with a guaranteed release:
//! the controller is wrapped in a [`Failsafe`] guard for the lifetime of
//! the control task, and the guard's drop reverts the hardware to its safe
//! profile. The drop runs on every exit route of the task - channel close,
//! termination signal, error return, or panic unwind. What it cannot cover
//! is SIGKILL or power loss; the process supervisor must provide that
//! backstop.

use std::ops::{Deref, DerefMut};
use tracing::info;

/// Reversion hook implemented by each daemon's controller
pub trait FailsafeRevert {
    /// Return the hardware to its safe profile; must not panic
    fn revert(&mut self);
}

/// Guard that reverts the wrapped controller when dropped
pub struct Failsafe<T: FailsafeRevert> {
    inner: T,
}

impl<T: FailsafeRevert> Failsafe<T> {
    /// Arm the guard around a controller
    pub fn arm(inner: T) -> Self {
        info!("Fail-safe reversion armed");
        Self { inner }
    }
}

impl<T: FailsafeRevert> Deref for Failsafe<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T: FailsafeRevert> DerefMut for Failsafe<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}

impl<T: FailsafeRevert> Drop for Failsafe<T> {
    fn drop(&mut self) {
        info!("Fail-safe reversion running");
        self.inner.revert();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    struct Toy {
        reverted: Rc<Cell<u32>>,
    }

    impl FailsafeRevert for Toy {
        fn revert(&mut self) {
            self.reverted.set(self.reverted.get() + 1);
        }
    }

    #[test]
    fn drop_reverts_exactly_once() {
        let count = Rc::new(Cell::new(0));
        {
            let _guard = Failsafe::arm(Toy { reverted: count.clone() });
            assert_eq!(count.get(), 0, "arming must not revert");
        }
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn revert_runs_on_panic_unwind() {
        let count = Rc::new(Cell::new(0));
        let taken = count.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _guard = Failsafe::arm(Toy { reverted: taken });
            panic!("boom");
        }));
        assert!(result.is_err());
        assert_eq!(count.get(), 1);
    }
}
