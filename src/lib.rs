#![no_std]

extern crate alloc;

#[cfg(any(test, feature = "std"))]
extern crate std;

pub mod arch;
pub mod error;
pub mod genwait;
pub mod irq;
pub mod poll;
pub mod scheduler;
pub mod sync;
pub mod thread;
pub mod time;
pub mod tls;

#[cfg(test)]
pub(crate) mod test_util;

#[cfg(all(not(test), not(feature = "std"), target_os = "none"))]
use core::panic::PanicInfo;

#[cfg(all(not(test), not(feature = "std"), target_os = "none"))]
#[panic_handler]
fn panic(_info: &PanicInfo) -> ! {
    loop {}
}

pub use error::{ThreadError, ThreadResult};
pub use scheduler::{
    current, detach, exit, init, init_with, join, preempt_point, shutdown, sleep_ms, spawn,
    stats, threads, timer_tick, yield_now, KernelConfig, SchedulerStats,
};
pub use sync::{CondVar, Mutex, MutexGuard, MutexType, Once, RecursiveLock, RwSemaphore, Semaphore, WaitLock};
pub use thread::{Thread, ThreadBuilder, ThreadId, ThreadInfo, ThreadState};
