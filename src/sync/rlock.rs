//! The legacy recursive lock.
//!
//! Kept under its historical name for source compatibility; semantically
//! this is exactly a [`Mutex`] of the Recursive flavour.

use crate::error::ThreadResult;
use crate::sync::mutex::Mutex;
use crate::thread::ThreadId;

pub struct RecursiveLock {
    inner: Mutex,
}

impl RecursiveLock {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::recursive(),
        }
    }

    pub fn lock(&self) -> ThreadResult<()> {
        self.inner.lock()
    }

    pub fn lock_timed(&self, timeout_ms: u64) -> ThreadResult<()> {
        self.inner.lock_timed(timeout_ms)
    }

    pub fn try_lock(&self) -> ThreadResult<()> {
        self.inner.try_lock()
    }

    /// Release one nesting level.
    pub fn unlock(&self) -> ThreadResult<()> {
        self.inner.unlock()
    }

    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }

    pub fn holder(&self) -> Option<ThreadId> {
        self.inner.holder()
    }

    pub fn count(&self) -> u32 {
        self.inner.count()
    }

    pub fn destroy(&self) -> ThreadResult<()> {
        self.inner.destroy()
    }
}

impl Default for RecursiveLock {
    fn default() -> Self {
        Self::new()
    }
}
