//! Thread control blocks.

pub mod builder;

pub use builder::ThreadBuilder;

use crate::arch::{Arch, DefaultArch};
use crate::error::ThreadResult;
use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;

/// Unique identifier for threads.
///
/// Thread IDs are never reused and are guaranteed to be non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(core::num::NonZeroUsize);

impl ThreadId {
    pub(crate) fn new(id: usize) -> Option<Self> {
        core::num::NonZeroUsize::new(id).map(Self)
    }

    /// Get the raw ID value.
    pub fn get(self) -> usize {
        self.0.get()
    }
}

/// Thread execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Runnable, sitting in the run queue
    Ready,
    /// Currently executing
    Running,
    /// Suspended on a wait key in the generic wait table
    Waiting,
    /// Exited; holding its exit value for a joiner (or awaiting reap)
    Zombie,
}

/// Whether a thread's exit value is retained for a joiner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinState {
    /// A joiner will consume the exit value and reap the thread
    Joinable,
    /// Exit value is discarded; the scheduler reaps the thread itself
    Detached,
}

/// One per-thread TLS entry. Most-recently-set entries sit at the front.
pub(crate) struct TlsSlot {
    pub key: usize,
    pub value: usize,
    pub destructor: Option<fn(usize)>,
}

pub(crate) type Entry = Box<dyn FnOnce() -> usize + Send + 'static>;

/// Thread control block.
///
/// Exclusively owned by the scheduler until the thread is a zombie, then
/// shared with at most one joiner until the exit value is consumed.
pub struct Thread {
    pub(crate) id: ThreadId,
    pub(crate) label: String,
    pub(crate) state: ThreadState,
    pub(crate) join_state: JoinState,
    pub(crate) context: <DefaultArch as Arch>::SavedContext,
    pub(crate) stack: Box<[u8]>,
    pub(crate) quantum: u32,
    pub(crate) switches: u64,
    pub(crate) entry: Option<Entry>,
    pub(crate) exit_value: usize,
    /// Wait-site label while Waiting; the wait key itself lives in the
    /// genwait table record.
    pub(crate) wait_label: &'static str,
    pub(crate) wait_result: ThreadResult<()>,
    pub(crate) tls: Vec<TlsSlot>,
}

impl Thread {
    pub(crate) fn new(
        id: ThreadId,
        label: String,
        stack: Box<[u8]>,
        join_state: JoinState,
        entry: Option<Entry>,
    ) -> Self {
        Self {
            id,
            label,
            state: ThreadState::Ready,
            join_state,
            context: Default::default(),
            stack,
            quantum: 0,
            switches: 0,
            entry,
            exit_value: 0,
            wait_label: "",
            wait_result: Ok(()),
            tls: Vec::new(),
        }
    }

    /// Prime the saved context so the first switch into this thread runs
    /// the entry trampoline on its own stack.
    pub(crate) fn prime(&mut self, trampoline: extern "C" fn() -> !) {
        let top = unsafe { self.stack.as_mut_ptr().add(self.stack.len()) };
        unsafe { DefaultArch::prime_context(&mut self.context, top, trampoline) };
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn state(&self) -> ThreadState {
        self.state
    }

    pub fn join_state(&self) -> JoinState {
        self.join_state
    }

    pub fn is_runnable(&self) -> bool {
        matches!(self.state, ThreadState::Ready | ThreadState::Running)
    }

    /// The genwait key a joiner sleeps on: the control block's address.
    pub(crate) fn join_key(&self) -> usize {
        self as *const Thread as usize
    }
}

/// Read-only snapshot of one thread, as returned by `scheduler::threads`.
#[derive(Debug, Clone)]
pub struct ThreadInfo {
    pub id: ThreadId,
    pub label: String,
    pub state: ThreadState,
    pub join_state: JoinState,
    /// Wait-site label while the thread is Waiting, e.g. `"sem_wait"`.
    pub waiting_on: &'static str,
    /// Times this thread has been switched in.
    pub switches: u64,
}
