#![no_main]

//! Drives the mutex, semaphore and rwsem state machines with arbitrary
//! single-threaded op sequences and checks their documented invariants
//! after every step. Ops are gated so no call ever suspends the fuzzing
//! thread: contested paths are exercised by the unit tests instead.

use arbitrary::Arbitrary;
use coop_threads::scheduler;
use coop_threads::sync::{Mutex, MutexType, RwSemaphore, Semaphore};
use libfuzzer_sys::fuzz_target;
use std::sync::Once;

#[derive(Debug, Arbitrary)]
enum Flavour {
    Normal,
    ErrorCheck,
    Recursive,
}

#[derive(Debug, Arbitrary)]
enum Op {
    MutexTryLock,
    MutexUnlock,
    SemTryWait,
    SemSignal,
    RwReadLock,
    RwReadUnlock,
    RwWriteLock,
    RwWriteUnlock,
    RwUpgrade,
    RwUnlock,
}

#[derive(Debug, Arbitrary)]
struct Plan {
    flavour: Flavour,
    sem_count: u8,
    ops: Vec<Op>,
}

static INIT: Once = Once::new();

fuzz_target!(|plan: Plan| {
    INIT.call_once(|| {
        scheduler::init().expect("scheduler init");
    });

    let ty = match plan.flavour {
        Flavour::Normal => MutexType::Normal,
        Flavour::ErrorCheck => MutexType::ErrorCheck,
        Flavour::Recursive => MutexType::Recursive,
    };
    let mutex = Mutex::new(ty);
    let sem = Semaphore::new(plan.sem_count as u32);
    let rw = RwSemaphore::new();

    let mut sem_model = plan.sem_count as u64;

    for op in plan.ops.iter().take(256) {
        match op {
            Op::MutexTryLock => {
                let _ = mutex.try_lock();
            }
            Op::MutexUnlock => {
                let _ = mutex.unlock();
            }
            Op::SemTryWait => {
                if sem.try_wait().is_ok() {
                    sem_model -= 1;
                }
            }
            Op::SemSignal => {
                sem.signal();
                sem_model += 1;
            }
            Op::RwReadLock => {
                if rw.writer().is_none() {
                    rw.read_lock().expect("uncontested read lock");
                }
            }
            Op::RwReadUnlock => {
                let _ = rw.read_unlock();
            }
            Op::RwWriteLock => {
                if rw.read_count() == 0 && rw.writer().is_none() {
                    rw.write_lock().expect("uncontested write lock");
                }
            }
            Op::RwWriteUnlock => {
                let _ = rw.write_unlock();
            }
            Op::RwUpgrade => {
                // Only the sole-reader fast path is non-blocking.
                if rw.read_count() == 1 && rw.writer().is_none() {
                    rw.read_upgrade().expect("sole-reader upgrade");
                }
            }
            Op::RwUnlock => {
                let _ = rw.unlock();
            }
        }

        // count == 0 iff holder == None
        assert_eq!(mutex.count() == 0, mutex.holder().is_none());
        // never both readers and a writer
        assert!(!(rw.read_count() > 0 && rw.writer().is_some()));
        // the semaphore count tracks the single-threaded model
        assert_eq!(sem.count() as u64, sem_model);
    }

    // Single-threaded: nothing can be left waiting, so teardown of a
    // fully released primitive must succeed.
    while mutex.is_locked() {
        if mutex.unlock().is_err() {
            break;
        }
    }
    mutex.destroy().expect("mutex teardown");
    sem.destroy().expect("sem teardown");
    while rw.unlock().is_ok() {}
    rw.destroy().expect("rwsem teardown");
});
