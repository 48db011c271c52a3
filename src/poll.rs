//! The poll bridge: wakes sleepers when a file descriptor becomes ready.
//!
//! Only the event-in contract lives here. The external fd layer reports
//! readiness edges with [`fd_event_trigger`] (from task or interrupt
//! context) and retires level state with [`fd_event_clear`]; the bridge
//! latches events per fd, matches them against registered poll records,
//! and signals each record's condition variable. Fd-handler dispatch and
//! `select` emulation sit above this module.

use crate::error::{ThreadError, ThreadResult};
use crate::sync::{CondVar, Mutex};
use crate::{irq, time};
use bitflags::bitflags;
use core::cell::UnsafeCell;

bitflags! {
    /// Poll event set, `poll(2)` flavoured.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PollEvents: u16 {
        const IN = 0x0001;
        const PRI = 0x0002;
        const OUT = 0x0004;
        const ERR = 0x0008;
        const HUP = 0x0010;
        const NVAL = 0x0020;
    }
}

/// One fd in a poll set: the events requested and those observed.
#[derive(Debug, Clone, Copy)]
pub struct PollFd {
    pub fd: i32,
    pub events: PollEvents,
    pub revents: PollEvents,
}

impl PollFd {
    pub const fn new(fd: i32, events: PollEvents) -> Self {
        Self {
            fd,
            events,
            revents: PollEvents::empty(),
        }
    }
}

/// Latched-event capacity; triggers for more distinct fds than this
/// fail with `NoMemory` (the table is fixed so interrupt-context
/// triggers never allocate).
const MAX_LATCHED_FDS: usize = 32;

struct PollRecord {
    fds: *mut PollFd,
    nfds: usize,
    matched: usize,
    cv: *const CondVar,
}

struct BridgeState {
    latched: [Option<(i32, PollEvents)>; MAX_LATCHED_FDS],
    records: alloc::vec::Vec<*mut PollRecord>,
}

impl BridgeState {
    const fn new() -> Self {
        Self {
            latched: [None; MAX_LATCHED_FDS],
            records: alloc::vec::Vec::new(),
        }
    }

    fn latched_for(&self, fd: i32) -> PollEvents {
        self.latched
            .iter()
            .flatten()
            .find(|(f, _)| *f == fd)
            .map(|(_, ev)| *ev)
            .unwrap_or(PollEvents::empty())
    }

    fn latch(&mut self, fd: i32, events: PollEvents) -> ThreadResult<()> {
        let mut free = None;
        for (i, slot) in self.latched.iter_mut().enumerate() {
            match slot {
                Some((f, ev)) if *f == fd => {
                    *ev |= events;
                    return Ok(());
                }
                None if free.is_none() => free = Some(i),
                _ => {}
            }
        }
        let i = free.ok_or(ThreadError::NoMemory)?;
        self.latched[i] = Some((fd, events));
        Ok(())
    }

    fn unlatch(&mut self, fd: i32, events: PollEvents) {
        for slot in self.latched.iter_mut() {
            if let Some((f, ev)) = slot {
                if *f == fd {
                    *ev &= !events;
                    if ev.is_empty() {
                        *slot = None;
                    }
                    return;
                }
            }
        }
    }
}

struct Bridge {
    lock: Mutex,
    state: UnsafeCell<BridgeState>,
}

unsafe impl Sync for Bridge {}

static BRIDGE: Bridge = Bridge {
    lock: Mutex::normal(),
    state: UnsafeCell::new(BridgeState::new()),
};

struct BridgeUnlock;

impl Drop for BridgeUnlock {
    fn drop(&mut self) {
        let _ = BRIDGE.lock.unlock();
    }
}

/// Take the bridge mutex: blocking from task context, `try_lock` inside
/// an interrupt handler (reporting `WouldBlock` on contention rather
/// than spinning in the handler).
fn lock_bridge() -> ThreadResult<()> {
    if irq::inside_interrupt() {
        BRIDGE.lock.try_lock()
    } else {
        BRIDGE.lock.lock()
    }
}

/// # Safety
/// Caller must hold the bridge mutex.
#[allow(clippy::mut_from_ref)]
unsafe fn bridge_state<'a>() -> &'a mut BridgeState {
    &mut *BRIDGE.state.get()
}

/// Report fd readiness from the external fd layer.
///
/// Latches `events` for `fd`, folds them into every registered poll
/// record that asked for them, and signals the condvar of each record
/// that gained a match. Callable from task or interrupt context.
pub fn fd_event_trigger(fd: i32, events: PollEvents) -> ThreadResult<()> {
    if events.is_empty() {
        return Ok(());
    }
    lock_bridge()?;
    let _unlock = BridgeUnlock;
    let state = unsafe { bridge_state() };
    state.latch(fd, events)?;
    for &rec_ptr in state.records.iter() {
        let rec = unsafe { &mut *rec_ptr };
        let mut gained = false;
        for i in 0..rec.nfds {
            let pf = unsafe { &mut *rec.fds.add(i) };
            if pf.fd != fd {
                continue;
            }
            let hit = pf.events & events;
            if hit.is_empty() {
                continue;
            }
            if pf.revents.is_empty() {
                rec.matched += 1;
            }
            pf.revents |= hit;
            gained = true;
        }
        if gained {
            unsafe { &*rec.cv }.signal();
        }
    }
    Ok(())
}

/// Retire latched level state, e.g. after the fd layer drained a buffer.
pub fn fd_event_clear(fd: i32, events: PollEvents) -> ThreadResult<()> {
    lock_bridge()?;
    let _unlock = BridgeUnlock;
    unsafe { bridge_state() }.unlatch(fd, events);
    Ok(())
}

/// Wait until any fd in `fds` reports a requested event.
///
/// Fills in `revents` and returns the number of fds with observed
/// events. One immediate pass runs against the latched state;
/// `timeout_ms == 0` returns right after it. Not permitted inside
/// interrupts.
pub fn poll(fds: &mut [PollFd], timeout_ms: u64) -> ThreadResult<usize> {
    if irq::inside_interrupt() {
        return Err(ThreadError::NotPermitted);
    }
    for f in fds.iter_mut() {
        f.revents = PollEvents::empty();
    }

    BRIDGE.lock.lock()?;

    let mut matched = 0;
    {
        let state = unsafe { bridge_state() };
        for f in fds.iter_mut() {
            let hit = state.latched_for(f.fd) & f.events;
            if !hit.is_empty() {
                f.revents = hit;
                matched += 1;
            }
        }
    }
    if matched > 0 || timeout_ms == 0 {
        BRIDGE.lock.unlock()?;
        return Ok(matched);
    }

    let cv = CondVar::new();
    let mut rec = PollRecord {
        fds: fds.as_mut_ptr(),
        nfds: fds.len(),
        matched: 0,
        cv: &cv,
    };
    {
        let state = unsafe { bridge_state() };
        if state.records.try_reserve(1).is_err() {
            BRIDGE.lock.unlock()?;
            return Err(ThreadError::NoMemory);
        }
        state.records.push(&mut rec);
    }

    let deadline = time::now_ms().saturating_add(timeout_ms);
    let result = loop {
        let now = time::now_ms();
        if now >= deadline {
            break Ok(rec.matched);
        }
        match cv.wait_timed(&BRIDGE.lock, deadline - now) {
            Ok(()) => {
                if rec.matched > 0 {
                    break Ok(rec.matched);
                }
            }
            Err(ThreadError::TimedOut) => break Ok(rec.matched),
            Err(e) => break Err(e),
        }
    };

    // Unregister under the mutex (re-acquired by the cond wait) before
    // the record and condvar leave scope.
    let rec_ptr = &mut rec as *mut PollRecord;
    unsafe { bridge_state() }.records.retain(|&r| r != rec_ptr);
    BRIDGE.lock.unlock()?;
    result
}

pub(crate) fn reset() {
    let state = unsafe { &mut *BRIDGE.state.get() };
    state.latched = [None; MAX_LATCHED_FDS];
    state.records.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util;

    #[test]
    fn test_immediate_pass_over_latched_events() {
        let _t = test_util::serialize();
        fd_event_trigger(3, PollEvents::IN).unwrap();
        fd_event_trigger(5, PollEvents::OUT | PollEvents::HUP).unwrap();

        let mut fds = [
            PollFd::new(3, PollEvents::IN | PollEvents::PRI),
            PollFd::new(4, PollEvents::IN),
            PollFd::new(5, PollEvents::HUP),
        ];
        let n = poll(&mut fds, 0).unwrap();
        assert_eq!(n, 2);
        assert_eq!(fds[0].revents, PollEvents::IN);
        assert_eq!(fds[1].revents, PollEvents::empty());
        assert_eq!(fds[2].revents, PollEvents::HUP);
    }

    #[test]
    fn test_clear_retires_level_state() {
        let _t = test_util::serialize();
        fd_event_trigger(7, PollEvents::IN).unwrap();
        fd_event_clear(7, PollEvents::IN).unwrap();

        let mut fds = [PollFd::new(7, PollEvents::IN)];
        assert_eq!(poll(&mut fds, 0).unwrap(), 0);
    }

    #[test]
    fn test_trigger_matches_registered_record() {
        let _t = test_util::serialize();
        // Register a record by hand, as a blocked poll() would.
        let cv = CondVar::new();
        let mut fds = [PollFd::new(9, PollEvents::IN | PollEvents::ERR)];
        let mut rec = PollRecord {
            fds: fds.as_mut_ptr(),
            nfds: 1,
            matched: 0,
            cv: &cv,
        };
        BRIDGE.lock.lock().unwrap();
        unsafe { bridge_state() }.records.push(&mut rec);
        BRIDGE.lock.unlock().unwrap();

        // An uninteresting event does not match.
        fd_event_trigger(9, PollEvents::OUT).unwrap();
        assert_eq!(rec.matched, 0);

        fd_event_trigger(9, PollEvents::ERR).unwrap();
        assert_eq!(rec.matched, 1);
        assert_eq!(fds[0].revents, PollEvents::ERR);

        // A second edge on the same fd does not double-count.
        fd_event_trigger(9, PollEvents::IN).unwrap();
        assert_eq!(rec.matched, 1);
        assert_eq!(fds[0].revents, PollEvents::IN | PollEvents::ERR);

        BRIDGE.lock.lock().unwrap();
        let rec_ptr = &mut rec as *mut PollRecord;
        unsafe { bridge_state() }.records.retain(|&r| r != rec_ptr);
        BRIDGE.lock.unlock().unwrap();
    }

    #[test]
    fn test_trigger_from_interrupt_respects_bridge_lock() {
        let _t = test_util::serialize();
        // Uncontended: an interrupt-context trigger goes through.
        irq::enter_interrupt();
        let free = fd_event_trigger(2, PollEvents::IN);
        irq::leave_interrupt();
        assert_eq!(free, Ok(()));

        // Contended: the handler must not spin on the bridge mutex.
        BRIDGE.lock.lock().unwrap();
        irq::enter_interrupt();
        let contended = fd_event_trigger(2, PollEvents::IN);
        irq::leave_interrupt();
        BRIDGE.lock.unlock().unwrap();
        assert_eq!(contended, Err(ThreadError::WouldBlock));
    }

    #[test]
    fn test_poll_rejected_inside_interrupt() {
        let _t = test_util::serialize();
        let mut fds = [PollFd::new(1, PollEvents::IN)];
        irq::enter_interrupt();
        let r = poll(&mut fds, 0);
        irq::leave_interrupt();
        assert_eq!(r, Err(ThreadError::NotPermitted));
    }

    #[test]
    fn test_latched_table_overflow_reports_no_memory() {
        let _t = test_util::serialize();
        for fd in 0..MAX_LATCHED_FDS as i32 {
            fd_event_trigger(fd, PollEvents::IN).unwrap();
        }
        assert_eq!(
            fd_event_trigger(1000, PollEvents::IN),
            Err(ThreadError::NoMemory)
        );
    }
}
