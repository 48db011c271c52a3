//! One-shot initializers.

use crate::error::ThreadResult;
use crate::sync::rlock::RecursiveLock;
use portable_atomic::{AtomicBool, Ordering};

/// The ambient lock shared by every `Once` in the process. Recursive so
/// an initializer may itself run another `Once` without deadlocking.
static ONCE_LOCK: RecursiveLock = RecursiveLock::new();

struct OnceLockGuard;

impl Drop for OnceLockGuard {
    fn drop(&mut self) {
        let _ = ONCE_LOCK.unlock();
    }
}

/// Runs a function at most once process-wide.
///
/// All callers return only after the function has completed. The
/// completion flag is set only after the initializer returns: if it
/// panics, the flag stays clear and a later call runs it again.
pub struct Once {
    done: AtomicBool,
}

impl Once {
    pub const fn new() -> Self {
        Self {
            done: AtomicBool::new(false),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    pub fn call_once<F: FnOnce()>(&self, f: F) -> ThreadResult<()> {
        if self.done.load(Ordering::Acquire) {
            return Ok(());
        }
        ONCE_LOCK.lock()?;
        let _unlock = OnceLockGuard;
        if !self.done.load(Ordering::Acquire) {
            f();
            self.done.store(true, Ordering::Release);
        }
        Ok(())
    }
}

impl Default for Once {
    fn default() -> Self {
        Self::new()
    }
}
