//! Thread-local storage: per-thread key/value words with per-key
//! destructors run at thread exit.
//!
//! Keys are allocated from a global registry guarded by a spinlock; the
//! values live in a per-thread list ordered most-recently-set first,
//! which is also the order destructors run in at exit.

use crate::error::{ThreadError, ThreadResult};
use crate::thread::TlsSlot;
use crate::{irq, scheduler};
use alloc::vec::Vec;
use spin::Mutex as SpinMutex;

struct Registry {
    /// Next key to hand out; keys start at 1 and are never reused.
    next_key: usize,
    destructors: Vec<(usize, Option<fn(usize)>)>,
}

static REGISTRY: SpinMutex<Registry> = SpinMutex::new(Registry {
    next_key: 1,
    destructors: Vec::new(),
});

/// Allocate a fresh key, recording an optional destructor that runs at
/// thread exit for every non-null value stored under the key.
///
/// Takes the registry spinlock and allocates, so it is not permitted
/// inside an interrupt handler.
pub fn key_create(destructor: Option<fn(usize)>) -> ThreadResult<usize> {
    if irq::inside_interrupt() {
        return Err(ThreadError::NotPermitted);
    }
    let mut reg = REGISTRY.lock();
    reg.destructors
        .try_reserve(1)
        .map_err(|_| ThreadError::NoMemory)?;
    let key = reg.next_key;
    reg.next_key += 1;
    reg.destructors.push((key, destructor));
    Ok(key)
}

/// Drop a key's destructor registration.
///
/// Values already stored under the key stay in their threads and their
/// destructors will not run.
pub fn key_delete(key: usize) -> ThreadResult<()> {
    if irq::inside_interrupt() {
        return Err(ThreadError::NotPermitted);
    }
    let mut reg = REGISTRY.lock();
    let pos = reg
        .destructors
        .iter()
        .position(|(k, _)| *k == key)
        .ok_or(ThreadError::InvalidArgument)?;
    reg.destructors.remove(pos);
    Ok(())
}

/// Store `value` under `key` for the current thread.
///
/// A fresh entry captures the key's destructor as registered right now;
/// overwriting keeps the destructor the entry was created with. Storing
/// 0 is allowed and means "no value" to the exit-time destructor run.
pub fn set(key: usize, value: usize) -> ThreadResult<()> {
    if irq::inside_interrupt() {
        return Err(ThreadError::NotPermitted);
    }
    let destructor = {
        let reg = REGISTRY.lock();
        if key == 0 || key >= reg.next_key {
            return Err(ThreadError::InvalidArgument);
        }
        reg.destructors
            .iter()
            .find(|(k, _)| *k == key)
            .and_then(|(_, d)| *d)
    };
    scheduler::with_current_tls(|tls| {
        if let Some(slot) = tls.iter_mut().find(|s| s.key == key) {
            slot.value = value;
            return Ok(());
        }
        tls.try_reserve(1).map_err(|_| ThreadError::NoMemory)?;
        tls.insert(
            0,
            TlsSlot {
                key,
                value,
                destructor,
            },
        );
        Ok(())
    })
    .and_then(|r| r)
}

/// Read the current thread's value under `key`; `None` if never set.
pub fn get(key: usize) -> Option<usize> {
    scheduler::with_current_tls(|tls| tls.iter().find(|s| s.key == key).map(|s| s.value))
        .ok()
        .flatten()
}

/// Exit-time sweep: invoke each destructor once with its non-null value,
/// most-recently-set entries first.
pub(crate) fn run_exit_destructors() {
    let slots = scheduler::take_current_tls();
    for slot in slots {
        if slot.value != 0 {
            if let Some(destructor) = slot.destructor {
                destructor(slot.value);
            }
        }
    }
}

pub(crate) fn reset() {
    let mut reg = REGISTRY.lock();
    reg.next_key = 1;
    reg.destructors.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util;
    use std::sync::Mutex as StdMutex;
    use std::vec::Vec as StdVec;

    #[test]
    fn test_set_get_roundtrip() {
        let _t = test_util::serialize();
        let key = key_create(None).unwrap();
        assert_eq!(get(key), None);
        set(key, 0xABCD).unwrap();
        assert_eq!(get(key), Some(0xABCD));
        set(key, 0x1234).unwrap();
        assert_eq!(get(key), Some(0x1234));
    }

    #[test]
    fn test_keys_are_validated() {
        let _t = test_util::serialize();
        let key = key_create(None).unwrap();
        assert_eq!(set(0, 1), Err(ThreadError::InvalidArgument));
        assert_eq!(set(key + 100, 1), Err(ThreadError::InvalidArgument));
        assert_eq!(key_delete(key + 100), Err(ThreadError::InvalidArgument));
    }

    #[test]
    fn test_key_create_rejected_inside_interrupt() {
        let _t = test_util::serialize();
        irq::enter_interrupt();
        let r = key_create(None);
        irq::leave_interrupt();
        assert_eq!(r, Err(ThreadError::NotPermitted));
    }

    static DESTROYED: StdMutex<StdVec<usize>> = StdMutex::new(StdVec::new());

    fn record_destroy(value: usize) {
        DESTROYED.lock().unwrap().push(value);
    }

    #[test]
    fn test_exit_destructors_most_recent_first() {
        let _t = test_util::serialize();
        DESTROYED.lock().unwrap().clear();

        let main = scheduler::current().unwrap();
        let worker = scheduler::spawn(|| 0).unwrap();
        scheduler::test_support::force_current(worker);

        let k1 = key_create(Some(record_destroy)).unwrap();
        let k2 = key_create(Some(record_destroy)).unwrap();
        let k3 = key_create(Some(record_destroy)).unwrap();
        let k4 = key_create(None).unwrap();
        set(k1, 11).unwrap();
        set(k2, 22).unwrap();
        set(k3, 0).unwrap(); // null value: destructor must not run
        set(k4, 44).unwrap(); // no destructor registered

        scheduler::prepare_exit(0);
        scheduler::test_support::force_current(main);

        // k2 was set after k1, so it runs first; k3 and k4 never fire.
        assert_eq!(*DESTROYED.lock().unwrap(), StdVec::from([22, 11]));
        let _ = k3;
    }

    #[test]
    fn test_key_delete_disarms_future_entries_only() {
        let _t = test_util::serialize();
        DESTROYED.lock().unwrap().clear();

        let main = scheduler::current().unwrap();
        let worker = scheduler::spawn(|| 0).unwrap();
        scheduler::test_support::force_current(worker);

        let key = key_create(Some(record_destroy)).unwrap();
        set(key, 7).unwrap();
        // Deleting the key leaves the stored value alone, but its
        // destructor still fires at exit because the entry captured it.
        key_delete(key).unwrap();
        assert_eq!(get(key), Some(7));

        scheduler::prepare_exit(0);
        scheduler::test_support::force_current(main);
        assert_eq!(*DESTROYED.lock().unwrap(), StdVec::from([7]));
    }

    #[test]
    fn test_tls_is_per_thread() {
        let _t = test_util::serialize();
        let main = scheduler::current().unwrap();
        let worker = scheduler::spawn(|| 0).unwrap();

        let key = key_create(None).unwrap();
        set(key, 5).unwrap();

        scheduler::test_support::force_current(worker);
        assert_eq!(get(key), None);
        set(key, 9).unwrap();
        assert_eq!(get(key), Some(9));

        scheduler::test_support::force_current(main);
        assert_eq!(get(key), Some(5));
    }
}
