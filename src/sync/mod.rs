//! Synchronization primitives built on the generic wait table.

pub mod condvar;
pub mod mutex;
pub mod once;
pub mod rlock;
pub mod rwsem;
pub mod semaphore;

pub use condvar::{CondVar, WaitLock};
pub use mutex::{Mutex, MutexGuard, MutexType};
pub use once::Once;
pub use rlock::RecursiveLock;
pub use rwsem::RwSemaphore;
pub use semaphore::Semaphore;
