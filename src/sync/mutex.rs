//! Mutual exclusion in three flavours: Normal, ErrorCheck, Recursive.

use crate::error::{ThreadError, ThreadResult};
use crate::thread::ThreadId;
use crate::{genwait, irq, scheduler, time};
use core::cell::UnsafeCell;

/// Mutex flavour, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutexType {
    /// Non-recursive; no owner check on unlock. Relocking from the
    /// holding thread blocks forever.
    Normal,
    /// Non-recursive; relock by the holder fails with `Deadlock`,
    /// unlock by a non-holder fails with `NotPermitted`.
    ErrorCheck,
    /// Re-entrant by the holding thread; released when the nesting
    /// count returns to zero.
    Recursive,
}

struct MutexState {
    holder: Option<ThreadId>,
    count: u32,
}

/// A blocking mutex.
///
/// Invariant: `count == 0` if and only if `holder` is `None`; for the
/// Normal flavour `count` never exceeds 1.
pub struct Mutex {
    ty: MutexType,
    state: UnsafeCell<MutexState>,
}

unsafe impl Send for Mutex {}
unsafe impl Sync for Mutex {}

enum Take {
    Acquired,
    Contested,
    Fail(ThreadError),
}

fn try_take(state: &mut MutexState, cur: ThreadId, ty: MutexType) -> Take {
    if state.count == 0 {
        state.holder = Some(cur);
        state.count = 1;
        return Take::Acquired;
    }
    if state.holder == Some(cur) {
        return match ty {
            MutexType::Recursive => {
                if state.count == u32::MAX {
                    Take::Fail(ThreadError::WouldBlock)
                } else {
                    state.count += 1;
                    Take::Acquired
                }
            }
            MutexType::ErrorCheck => Take::Fail(ThreadError::Deadlock),
            // Undefined for Normal: the holder joins its own waiters.
            MutexType::Normal => Take::Contested,
        };
    }
    Take::Contested
}

impl Mutex {
    pub const fn new(ty: MutexType) -> Self {
        Self {
            ty,
            state: UnsafeCell::new(MutexState {
                holder: None,
                count: 0,
            }),
        }
    }

    pub const fn normal() -> Self {
        Self::new(MutexType::Normal)
    }

    pub const fn errorcheck() -> Self {
        Self::new(MutexType::ErrorCheck)
    }

    pub const fn recursive() -> Self {
        Self::new(MutexType::Recursive)
    }

    pub fn mutex_type(&self) -> MutexType {
        self.ty
    }

    fn key(&self) -> usize {
        self as *const Mutex as usize
    }

    /// Acquire the mutex, blocking until it is free.
    pub fn lock(&self) -> ThreadResult<()> {
        self.lock_timed(0)
    }

    /// Acquire the mutex, giving up after `timeout_ms` (0 = forever).
    ///
    /// A timed-out lock is never held: on `TimedOut` the mutex state is
    /// untouched and the caller is no longer queued.
    pub fn lock_timed(&self, timeout_ms: u64) -> ThreadResult<()> {
        if irq::inside_interrupt() {
            return Err(ThreadError::NotPermitted);
        }
        let cur = scheduler::current_tid()?;
        let deadline = if timeout_ms > 0 {
            time::now_ms().saturating_add(timeout_ms)
        } else {
            0
        };
        let state = irq::disable();
        let result = loop {
            match try_take(unsafe { &mut *self.state.get() }, cur, self.ty) {
                Take::Acquired => break Ok(()),
                Take::Fail(e) => break Err(e),
                Take::Contested => {}
            }
            let remaining = if deadline != 0 {
                let now = time::now_ms();
                if now >= deadline {
                    break Err(ThreadError::TimedOut);
                }
                deadline - now
            } else {
                0
            };
            // The interrupt mask is held from the failed take through the
            // enqueue, so an unlock cannot slip between them. Retry after
            // every wake: the lock is not handed off.
            if let Err(e) = genwait::wait(self.key(), "mutex_lock", remaining, None) {
                break Err(e);
            }
        };
        irq::restore(state);
        result
    }

    /// Acquire the mutex without blocking. Interrupt-callable.
    ///
    /// Returns `WouldBlock` when contested; a Recursive mutex held by
    /// the caller still accumulates nesting.
    pub fn try_lock(&self) -> ThreadResult<()> {
        let cur = scheduler::current_tid()?;
        let _g = irq::IrqGuard::enter();
        match try_take(unsafe { &mut *self.state.get() }, cur, self.ty) {
            Take::Acquired => Ok(()),
            Take::Fail(e) => Err(e),
            Take::Contested => Err(ThreadError::WouldBlock),
        }
    }

    /// Release the mutex.
    ///
    /// Normal: unconditional release. ErrorCheck/Recursive: fails with
    /// `NotPermitted` unless the caller holds it; Recursive only
    /// releases when the nesting count returns to zero.
    pub fn unlock(&self) -> ThreadResult<()> {
        let cur = scheduler::current_tid()?;
        let _g = irq::IrqGuard::enter();
        let release = {
            let state = unsafe { &mut *self.state.get() };
            match self.ty {
                MutexType::Normal => {
                    state.holder = None;
                    state.count = 0;
                    true
                }
                MutexType::ErrorCheck | MutexType::Recursive => {
                    if state.holder != Some(cur) {
                        return Err(ThreadError::NotPermitted);
                    }
                    state.count -= 1;
                    if state.count == 0 {
                        state.holder = None;
                        true
                    } else {
                        false
                    }
                }
            }
        };
        if release {
            genwait::wake_one(self.key());
        }
        Ok(())
    }

    /// Acquire and return an RAII guard that unlocks on drop.
    pub fn guard(&self) -> ThreadResult<MutexGuard<'_>> {
        self.lock()?;
        Ok(MutexGuard { mutex: self })
    }

    pub fn is_locked(&self) -> bool {
        let _g = irq::IrqGuard::enter();
        unsafe { &*self.state.get() }.count > 0
    }

    /// Advisory: the current holder.
    pub fn holder(&self) -> Option<ThreadId> {
        let _g = irq::IrqGuard::enter();
        unsafe { &*self.state.get() }.holder
    }

    /// Advisory: the nesting count.
    pub fn count(&self) -> u32 {
        let _g = irq::IrqGuard::enter();
        unsafe { &*self.state.get() }.count
    }

    /// Fails with `Busy` while the mutex is held.
    pub fn destroy(&self) -> ThreadResult<()> {
        let _g = irq::IrqGuard::enter();
        if unsafe { &*self.state.get() }.count > 0 {
            return Err(ThreadError::Busy);
        }
        Ok(())
    }
}

/// RAII guard returned by [`Mutex::guard`].
pub struct MutexGuard<'a> {
    mutex: &'a Mutex,
}

impl Drop for MutexGuard<'_> {
    fn drop(&mut self) {
        let _ = self.mutex.unlock();
    }
}
