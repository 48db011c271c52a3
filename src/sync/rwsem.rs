//! Reader/writer semaphore with writer priority and a reader-to-writer
//! upgrade path.
//!
//! Two wait keys drive the whole state machine: blocked readers sleep on
//! the semaphore's own address, blocked writers (and the single pending
//! upgrader) sleep on the address of the writer slot. Readers queue
//! behind any waiting writer, which is what prevents reader streams from
//! starving writers without a priority scheduler.

use crate::error::{ThreadError, ThreadResult};
use crate::thread::ThreadId;
use crate::{genwait, irq, scheduler};
use core::cell::UnsafeCell;

struct RwState {
    readers: u32,
    writer: Option<ThreadId>,
    upgrade: Option<ThreadId>,
}

/// A multi-reader / single-writer semaphore.
///
/// Invariants: `readers > 0` implies no writer; a writer implies
/// `readers == 0`; at most one upgrade waiter exists at a time.
pub struct RwSemaphore {
    state: UnsafeCell<RwState>,
}

unsafe impl Send for RwSemaphore {}
unsafe impl Sync for RwSemaphore {}

impl RwSemaphore {
    pub const fn new() -> Self {
        Self {
            state: UnsafeCell::new(RwState {
                readers: 0,
                writer: None,
                upgrade: None,
            }),
        }
    }

    /// Wait key for blocked readers.
    fn read_key(&self) -> usize {
        self as *const RwSemaphore as usize
    }

    /// Wait key for blocked writers and the pending upgrader.
    fn write_key(&self) -> usize {
        unsafe { &(*self.state.get()).writer as *const Option<ThreadId> as usize }
    }

    /// Acquire the semaphore for reading.
    pub fn read_lock(&self) -> ThreadResult<()> {
        self.read_lock_timed(0)
    }

    /// Acquire for reading with a timeout (0 = forever).
    ///
    /// A new reader queues behind a held or *requested* write lock, so a
    /// stream of readers cannot starve a waiting writer.
    pub fn read_lock_timed(&self, timeout_ms: u64) -> ThreadResult<()> {
        if irq::inside_interrupt() {
            return Err(ThreadError::NotPermitted);
        }
        scheduler::current_tid()?;
        let state = irq::disable();
        let result = {
            let st = unsafe { &mut *self.state.get() };
            let contested = st.writer.is_some()
                || st.upgrade.is_some()
                || genwait::waiter_count(self.write_key()) > 0;
            if contested {
                // On a plain wake the write-unlock path has already
                // counted us in; nothing left to do here.
                genwait::wait(self.read_key(), "rwsem_read", timeout_ms, None)
            } else {
                st.readers += 1;
                Ok(())
            }
        };
        irq::restore(state);
        result
    }

    /// Acquire the semaphore for writing.
    pub fn write_lock(&self) -> ThreadResult<()> {
        self.write_lock_timed(0)
    }

    /// Acquire for writing with a timeout (0 = forever).
    pub fn write_lock_timed(&self, timeout_ms: u64) -> ThreadResult<()> {
        if irq::inside_interrupt() {
            return Err(ThreadError::NotPermitted);
        }
        let cur = scheduler::current_tid()?;
        let state = irq::disable();
        let result = {
            let st = unsafe { &mut *self.state.get() };
            if st.readers == 0 && st.writer.is_none() && st.upgrade.is_none() {
                st.writer = Some(cur);
                Ok(())
            } else {
                // Whoever hands over the semaphore installs us as the
                // writer before waking us.
                genwait::wait(self.write_key(), "rwsem_write", timeout_ms, None)
            }
        };
        irq::restore(state);
        result
    }

    /// Release a read lock.
    ///
    /// When the last reader leaves, a pending upgrader wins the writer
    /// slot; otherwise the oldest waiting writer does.
    pub fn read_unlock(&self) -> ThreadResult<()> {
        let _g = irq::IrqGuard::enter();
        let st = unsafe { &mut *self.state.get() };
        if st.readers == 0 {
            return Err(ThreadError::NotPermitted);
        }
        st.readers -= 1;
        if st.readers > 0 {
            return Ok(());
        }
        if let Some(up) = st.upgrade {
            // Promote the upgrader -- unless its wait already timed out,
            // in which case it still owns the upgrade slot and will
            // re-inflate the reader count when it resumes.
            if genwait::wake_thread(self.write_key(), up, None) {
                st.upgrade = None;
                st.writer = Some(up);
            }
        } else if let Some(w) = genwait::wake_one_tid(self.write_key()) {
            st.writer = Some(w);
        }
        Ok(())
    }

    /// Release the write lock: hand it to the oldest waiting writer, or
    /// failing that, admit every blocked reader at once.
    pub fn write_unlock(&self) -> ThreadResult<()> {
        let cur = scheduler::current_tid()?;
        let _g = irq::IrqGuard::enter();
        let st = unsafe { &mut *self.state.get() };
        if st.writer != Some(cur) {
            return Err(ThreadError::NotPermitted);
        }
        st.writer = None;
        if let Some(w) = genwait::wake_one_tid(self.write_key()) {
            st.writer = Some(w);
        } else {
            let admitted = genwait::wake_all(self.read_key());
            st.readers += admitted as u32;
        }
        Ok(())
    }

    /// Upgrade a read lock to the write lock.
    pub fn read_upgrade(&self) -> ThreadResult<()> {
        self.read_upgrade_timed(0)
    }

    /// Upgrade a read lock to the write lock, with a timeout.
    ///
    /// The sole reader flips directly. Otherwise the caller registers as
    /// the single pending upgrader and sleeps until the other readers
    /// drain; a second upgrade attempt in the meantime fails with
    /// `Busy`. On timeout the caller re-inflates the reader count -- it
    /// still holds its read lock -- and returns `TimedOut`.
    pub fn read_upgrade_timed(&self, timeout_ms: u64) -> ThreadResult<()> {
        if irq::inside_interrupt() {
            return Err(ThreadError::NotPermitted);
        }
        let cur = scheduler::current_tid()?;
        let state = irq::disable();
        let result = {
            let st = unsafe { &mut *self.state.get() };
            if st.readers == 0 {
                Err(ThreadError::NotPermitted)
            } else if st.upgrade.is_some() {
                Err(ThreadError::Busy)
            } else if st.readers == 1 {
                st.readers = 0;
                st.writer = Some(cur);
                Ok(())
            } else {
                st.upgrade = Some(cur);
                st.readers -= 1;
                match genwait::wait(self.write_key(), "rwsem_upgrade", timeout_ms, None) {
                    Ok(()) => Ok(()),
                    Err(e) => {
                        // Still a reader: put the count back and free
                        // the upgrade slot.
                        let st = unsafe { &mut *self.state.get() };
                        if st.upgrade == Some(cur) {
                            st.upgrade = None;
                        }
                        st.readers += 1;
                        Err(e)
                    }
                }
            }
        };
        irq::restore(state);
        result
    }

    /// Release whichever side the caller holds: the write lock if the
    /// caller is the writer, else one read lock.
    pub fn unlock(&self) -> ThreadResult<()> {
        let cur = scheduler::current_tid()?;
        let is_writer = {
            let _g = irq::IrqGuard::enter();
            unsafe { &*self.state.get() }.writer == Some(cur)
        };
        if is_writer {
            self.write_unlock()
        } else {
            self.read_unlock()
        }
    }

    /// Advisory read of the reader count.
    pub fn read_count(&self) -> u32 {
        let _g = irq::IrqGuard::enter();
        unsafe { &*self.state.get() }.readers
    }

    /// Advisory read of the writer slot.
    pub fn writer(&self) -> Option<ThreadId> {
        let _g = irq::IrqGuard::enter();
        unsafe { &*self.state.get() }.writer
    }

    /// Fails with `Busy` while the semaphore is held on either side.
    pub fn destroy(&self) -> ThreadResult<()> {
        let _g = irq::IrqGuard::enter();
        let st = unsafe { &*self.state.get() };
        if st.readers > 0 || st.writer.is_some() || st.upgrade.is_some() {
            return Err(ThreadError::Busy);
        }
        Ok(())
    }
}

impl Default for RwSemaphore {
    fn default() -> Self {
        Self::new()
    }
}
