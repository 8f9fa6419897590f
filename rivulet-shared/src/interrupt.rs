use crate::error::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation handle.
///
/// Long loops call [`Interrupt::pull`] at the top of each iteration and
/// return the error immediately. Recipients free partial results and do not
/// retry the current operation.
#[derive(Clone, Default)]
pub struct Interrupt {
    fired: Arc<AtomicBool>,
}

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn interrupt(&self) {
        self.fired.store(true, Ordering::Release);
    }

    pub fn is_interrupted(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    /// `Err(Interrupted)` once [`Interrupt::interrupt`] has been called.
    pub fn pull(&self) -> Result<()> {
        if self.is_interrupted() {
            return Err(Error::Interrupted);
        }
        Ok(())
    }

    /// Re-arm a handle for reuse after the interrupted loop has unwound.
    pub fn reset(&self) {
        self.fired.store(false, Ordering::Release);
    }
}
