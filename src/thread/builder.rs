//! Thread builder for configuring thread creation.

use crate::error::ThreadResult;
use crate::scheduler;
use crate::thread::ThreadId;

/// Smallest stack the scheduler will accept for a new thread.
pub const MIN_STACK_SIZE: usize = 4 * 1024;

/// Stack size used when the builder does not override it.
pub const DEFAULT_STACK_SIZE: usize = 32 * 1024;

/// Builder for configuring and creating new threads.
///
/// Provides a convenient interface for setting thread parameters before
/// spawning, similar to `std::thread::Builder`.
pub struct ThreadBuilder {
    label: Option<&'static str>,
    stack_size: usize,
    detached: bool,
}

impl ThreadBuilder {
    /// Create a new thread builder with default settings.
    pub fn new() -> Self {
        Self {
            label: None,
            stack_size: 0,
            detached: false,
        }
    }

    /// Set the thread label used in diagnostics.
    pub fn label(mut self, label: &'static str) -> Self {
        self.label = Some(label);
        self
    }

    /// Set the stack size in bytes.
    ///
    /// Without an override the scheduler's configured default (normally
    /// [`DEFAULT_STACK_SIZE`]) is used. Validated at spawn time; sizes
    /// below [`MIN_STACK_SIZE`] are rejected with `InvalidArgument`.
    pub fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = size;
        self
    }

    /// Spawn the thread detached: its exit value is discarded and its
    /// storage reclaimed by the scheduler, with no joiner involved.
    pub fn detached(mut self, detached: bool) -> Self {
        self.detached = detached;
        self
    }

    /// Spawn a new thread with the configured parameters.
    ///
    /// The entry closure's return value becomes the thread's exit value,
    /// consumed by `scheduler::join` unless the thread is detached.
    pub fn spawn<F>(self, entry: F) -> ThreadResult<ThreadId>
    where
        F: FnOnce() -> usize + Send + 'static,
    {
        scheduler::spawn_with(self.label, self.stack_size, self.detached, entry)
    }
}

impl Default for ThreadBuilder {
    fn default() -> Self {
        Self::new()
    }
}
