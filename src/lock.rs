//! The process-wide single-flight lock (`pdmlock` in the source). Backed by
//! `parking_lot::ReentrantMutex`, which already tracks "same logical
//! caller" by OS thread id: a thread already holding the lock can re-enter
//! it (e.g. `setTempBasal` calling `cancelTempBasal`), and the lock is only
//! released when the outermost guard drops.
//!
//! True cross-process exclusion (the "process-wide" half of the name) is
//! the radio/store's concern in a real deployment — typically a `flock` on
//! a file next to the persisted pod — and is out of scope here per spec §1;
//! this type is the seam such a backing could slot into without changing
//! any caller.

use crate::error::PdmBusyError;
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

#[derive(Default)]
pub struct PdmLock {
    inner: ReentrantMutex<()>,
}

impl PdmLock {
    pub fn new() -> Self {
        Self {
            inner: ReentrantMutex::new(()),
        }
    }

    /// Blocks until the lock is available (or immediately re-enters it, if
    /// this thread already holds it). Used by every command entry point —
    /// concurrent commands serialize rather than fail.
    pub fn enter(&self) -> ReentrantMutexGuard<'_, ()> {
        self.inner.lock()
    }

    /// Non-blocking: succeeds immediately if the lock is free or already
    /// held by this thread, otherwise returns [`PdmBusyError`] without
    /// waiting. Used by `is_busy()`, which swallows the error into `true`.
    pub fn try_enter(&self) -> Result<ReentrantMutexGuard<'_, ()>, PdmBusyError> {
        self.inner.try_lock().ok_or(PdmBusyError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reentrant_on_same_thread() {
        let lock = PdmLock::new();
        let _outer = lock.enter();
        let _inner = lock.enter();
    }

    #[test]
    fn try_enter_fails_from_another_thread_while_held() {
        use std::sync::Arc;
        let lock = Arc::new(PdmLock::new());
        let _guard = lock.enter();

        let lock2 = Arc::clone(&lock);
        let busy = std::thread::spawn(move || lock2.try_enter().is_err())
            .join()
            .unwrap();
        assert!(busy);
    }
}
