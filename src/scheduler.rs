//! The scheduler: run queue, context switching, sleep, join, exit.
//!
//! Round-robin over Ready threads. A timer tick decrements the running
//! thread's quantum; on exhaustion the thread rotates to the tail of the
//! queue. No priorities are honoured beyond FIFO-on-wake. The scan,
//! enqueue and context-switch paths all run with interrupts disabled;
//! interrupt handlers may wake threads (marking them Ready) but never
//! switch contexts themselves.

use crate::arch::{Arch, DefaultArch};
use crate::error::{ThreadError, ThreadResult};
use crate::thread::builder::MIN_STACK_SIZE;
use crate::thread::{JoinState, Thread, ThreadBuilder, ThreadId, ThreadInfo, ThreadState, TlsSlot};
use crate::{genwait, irq, poll, time, tls};
use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use portable_atomic::{AtomicBool, Ordering};

type Ctx = <DefaultArch as Arch>::SavedContext;

/// Kernel-wide scheduler configuration.
#[derive(Debug, Clone)]
pub struct KernelConfig {
    /// Label given to the thread that calls `init`.
    pub main_label: &'static str,
    /// Stack size for threads spawned without an override.
    pub default_stack_size: usize,
    /// Timer tick rate; sets the round-robin quantum (~100 ms per slice).
    pub timer_hz: u32,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            main_label: "kernel",
            default_stack_size: crate::thread::builder::DEFAULT_STACK_SIZE,
            timer_hz: time::TIMER_HZ,
        }
    }
}

/// Aggregate scheduler counters, as returned by [`stats`].
#[derive(Debug, Clone, Copy)]
pub struct SchedulerStats {
    pub context_switches: u64,
    pub threads_alive: usize,
}

pub struct Scheduler {
    threads: Vec<Option<Box<Thread>>>,
    run_queue: VecDeque<ThreadId>,
    current: Option<ThreadId>,
    idle: Option<ThreadId>,
    next_id: usize,
    switches: u64,
    quantum_ticks: u32,
    default_stack: usize,
    active: bool,
}

impl Scheduler {
    const fn new() -> Self {
        Self {
            threads: Vec::new(),
            run_queue: VecDeque::new(),
            current: None,
            idle: None,
            next_id: 1,
            switches: 0,
            quantum_ticks: 0,
            default_stack: 0,
            active: false,
        }
    }
}

pub struct SchedulerCell(core::cell::UnsafeCell<Scheduler>);

unsafe impl Sync for SchedulerCell {}

impl SchedulerCell {
    const fn new() -> Self {
        SchedulerCell(core::cell::UnsafeCell::new(Scheduler::new()))
    }

    /// # Safety
    /// Returns a mutable reference to the scheduler. Callers must hold
    /// interrupts disabled and keep the borrow confined to one critical
    /// section at a time.
    #[allow(clippy::mut_from_ref)]
    unsafe fn get(&self) -> &mut Scheduler {
        &mut *self.0.get()
    }
}

static SCHEDULER: SchedulerCell = SchedulerCell::new();

static NEED_RESCHED: AtomicBool = AtomicBool::new(false);

fn slot_of(s: &Scheduler, tid: ThreadId) -> Option<usize> {
    s.threads
        .iter()
        .position(|t| t.as_ref().map(|t| t.id) == Some(tid))
}

fn thread_ref(s: &Scheduler, tid: ThreadId) -> Option<&Thread> {
    s.threads
        .iter()
        .flatten()
        .find(|t| t.id == tid)
        .map(|t| &**t)
}

fn thread_mut(s: &mut Scheduler, tid: ThreadId) -> Option<&mut Thread> {
    s.threads
        .iter_mut()
        .flatten()
        .find(|t| t.id == tid)
        .map(|t| &mut **t)
}

fn alive_count(s: &Scheduler) -> usize {
    s.threads.iter().flatten().count()
}

fn alloc_stack(size: usize) -> ThreadResult<Box<[u8]>> {
    let mut v: Vec<u8> = Vec::new();
    v.try_reserve_exact(size)
        .map_err(|_| ThreadError::NoMemory)?;
    v.resize(size, 0);
    Ok(v.into_boxed_slice())
}

/// Insert a fully-formed thread into a free slot and reserve run-queue
/// capacity so later interrupt-context wakes never allocate.
fn insert_thread(
    s: &mut Scheduler,
    label: String,
    stack: Box<[u8]>,
    join_state: JoinState,
    entry: Option<Box<dyn FnOnce() -> usize + Send + 'static>>,
) -> ThreadResult<ThreadId> {
    let id = ThreadId::new(s.next_id).ok_or(ThreadError::InvalidArgument)?;
    s.next_id += 1;
    let mut thread = Box::new(Thread::new(id, label, stack, join_state, entry));
    thread.quantum = s.quantum_ticks;
    if !thread.stack.is_empty() {
        thread.prime(thread_trampoline);
    }
    match s.threads.iter_mut().find(|slot| slot.is_none()) {
        Some(slot) => *slot = Some(thread),
        None => {
            s.threads
                .try_reserve(1)
                .map_err(|_| ThreadError::NoMemory)?;
            s.threads.push(Some(thread));
        }
    }
    let alive = alive_count(s);
    s.run_queue
        .try_reserve(alive)
        .map_err(|_| ThreadError::NoMemory)?;
    Ok(id)
}

/// Bring up the scheduler with default configuration.
///
/// The calling context becomes the main thread.
pub fn init() -> ThreadResult<()> {
    init_with(KernelConfig::default())
}

/// Bring up the scheduler.
///
/// Creates the main thread (adopting the caller's stack) and the idle
/// thread, then marks the scheduler active. Fails with `Busy` if already
/// initialized.
pub fn init_with(config: KernelConfig) -> ThreadResult<()> {
    let _g = irq::IrqGuard::enter();
    let s = unsafe { SCHEDULER.get() };
    if s.active {
        return Err(ThreadError::Busy);
    }
    s.active = true;
    s.next_id = 1;
    s.switches = 0;
    s.default_stack = config.default_stack_size.max(MIN_STACK_SIZE);
    s.quantum_ticks = (config.timer_hz / 10).max(1);

    let main_id = insert_thread(
        s,
        config.main_label.to_string(),
        Vec::new().into_boxed_slice(),
        JoinState::Joinable,
        None,
    )?;
    if let Some(t) = thread_mut(s, main_id) {
        t.state = ThreadState::Running;
    }
    s.current = Some(main_id);

    let idle_stack = alloc_stack(MIN_STACK_SIZE)?;
    let idle_id = insert_thread(
        s,
        "idle".to_string(),
        idle_stack,
        JoinState::Detached,
        Some(Box::new(idle_main)),
    )?;
    // The idle thread stays out of the run queue; it only runs when
    // nothing else is Ready.
    s.idle = Some(idle_id);

    log::debug!("scheduler up: main={} idle={}", main_id.get(), idle_id.get());
    Ok(())
}

fn idle_main() -> usize {
    loop {
        DefaultArch::wait_for_interrupt();
        yield_now();
    }
}

/// Tear down the scheduler: drop every thread and reset the wait table,
/// the TLS registry and the poll bridge.
pub fn shutdown() {
    {
        let _g = irq::IrqGuard::enter();
        let s = unsafe { SCHEDULER.get() };
        s.threads.clear();
        s.run_queue.clear();
        s.current = None;
        s.idle = None;
        s.next_id = 1;
        s.switches = 0;
        s.active = false;
    }
    NEED_RESCHED.store(false, Ordering::Release);
    genwait::clear();
    tls::reset();
    poll::reset();
    log::debug!("scheduler down");
}

/// First code a new thread runs, entered by the initial context switch
/// with interrupts still disabled.
extern "C" fn thread_trampoline() -> ! {
    irq::restore(true);
    let entry = {
        let _g = irq::IrqGuard::enter();
        let s = unsafe { SCHEDULER.get() };
        s.current
            .and_then(|cur| thread_mut(s, cur))
            .and_then(|t| t.entry.take())
    };
    let value = match entry {
        Some(f) => f(),
        None => 0,
    };
    exit(value)
}

pub(crate) fn spawn_with<F>(
    label: Option<&'static str>,
    stack_size: usize,
    detached: bool,
    entry: F,
) -> ThreadResult<ThreadId>
where
    F: FnOnce() -> usize + Send + 'static,
{
    if irq::inside_interrupt() {
        return Err(ThreadError::NotPermitted);
    }
    let stack_size = if stack_size == 0 {
        let _g = irq::IrqGuard::enter();
        let s = unsafe { SCHEDULER.get() };
        if !s.active {
            return Err(ThreadError::NotPermitted);
        }
        s.default_stack
    } else {
        stack_size
    };
    if stack_size < MIN_STACK_SIZE {
        return Err(ThreadError::InvalidArgument);
    }
    let stack = alloc_stack(stack_size)?;
    let entry: Box<dyn FnOnce() -> usize + Send + 'static> = Box::new(entry);

    let _g = irq::IrqGuard::enter();
    let s = unsafe { SCHEDULER.get() };
    if !s.active {
        return Err(ThreadError::NotPermitted);
    }
    let join_state = if detached {
        JoinState::Detached
    } else {
        JoinState::Joinable
    };
    let id = insert_thread(
        s,
        label.unwrap_or("thread").to_string(),
        stack,
        join_state,
        Some(entry),
    )?;
    s.run_queue.push_back(id);
    log::debug!("spawned thread {}", id.get());
    Ok(id)
}

/// Spawn a joinable thread with default stack size and label.
pub fn spawn<F>(entry: F) -> ThreadResult<ThreadId>
where
    F: FnOnce() -> usize + Send + 'static,
{
    ThreadBuilder::new().spawn(entry)
}

/// The currently running thread, if the scheduler is up.
pub fn current() -> Option<ThreadId> {
    let _g = irq::IrqGuard::enter();
    unsafe { SCHEDULER.get() }.current
}

pub(crate) fn current_tid() -> ThreadResult<ThreadId> {
    current().ok_or(ThreadError::NotPermitted)
}

fn pick_next(s: &mut Scheduler) -> Option<ThreadId> {
    while let Some(tid) = s.run_queue.pop_front() {
        if thread_ref(s, tid).map(|t| t.state) == Some(ThreadState::Ready) {
            return Some(tid);
        }
        // Stale entry (reaped or state changed under us): skip.
    }
    None
}

fn reap_zombies(s: &mut Scheduler, keep: ThreadId) {
    for slot in s.threads.iter_mut() {
        let reapable = slot.as_ref().is_some_and(|t| {
            t.id != keep && t.state == ThreadState::Zombie && t.join_state == JoinState::Detached
        });
        if reapable {
            if let Some(t) = slot.take() {
                log::debug!("reaped detached thread {}", t.id.get());
            }
        }
    }
}

/// Pick the next Ready thread and switch to it.
///
/// Interrupts must be disabled. With `requeue_current` the current thread
/// rotates to the tail of the run queue (a yield); without it the caller
/// has already parked or killed the current thread.
fn switch_away(requeue_current: bool) {
    let (from_ptr, to_ptr): (*mut Ctx, *const Ctx) = {
        let s = unsafe { SCHEDULER.get() };
        if !s.active {
            return;
        }
        let cur_id = match s.current {
            Some(c) => c,
            None => return,
        };
        reap_zombies(s, cur_id);
        if requeue_current && s.idle != Some(cur_id) {
            if let Some(t) = thread_mut(s, cur_id) {
                if t.state == ThreadState::Running {
                    t.state = ThreadState::Ready;
                    s.run_queue.push_back(cur_id);
                }
            }
        }
        let next_id = match pick_next(s) {
            Some(id) => id,
            None => match s.idle {
                Some(idle) if idle != cur_id => idle,
                _ => return,
            },
        };
        if next_id == cur_id {
            if let Some(t) = thread_mut(s, cur_id) {
                t.state = ThreadState::Running;
            }
            return;
        }
        s.switches += 1;
        let quantum = s.quantum_ticks;
        if let Some(next) = thread_mut(s, next_id) {
            next.state = ThreadState::Running;
            next.quantum = quantum;
            next.switches += 1;
        }
        s.current = Some(next_id);
        let from = match thread_mut(s, cur_id) {
            Some(t) => &mut t.context as *mut Ctx,
            None => return,
        };
        let to = match thread_ref(s, next_id) {
            Some(t) => &t.context as *const Ctx,
            None => return,
        };
        (from, to)
    };
    unsafe { DefaultArch::context_switch(from_ptr, to_ptr) };
}

/// Park the current thread on a wait key and switch away; returns the
/// wake result once a waker (or the timeout sweep) readies it again.
///
/// Interrupts must be disabled and the genwait entry already enqueued.
pub(crate) fn block_current(label: &'static str) -> ThreadResult<()> {
    let cur_id = {
        let s = unsafe { SCHEDULER.get() };
        if !s.active {
            return Err(ThreadError::NotPermitted);
        }
        let cur_id = s.current.ok_or(ThreadError::NotPermitted)?;
        if s.idle == Some(cur_id) {
            return Err(ThreadError::NotPermitted);
        }
        match thread_mut(s, cur_id) {
            Some(t) => {
                t.state = ThreadState::Waiting;
                t.wait_label = label;
                t.wait_result = Ok(());
            }
            None => return Err(ThreadError::InvalidArgument),
        }
        cur_id
    };
    switch_away(false);
    let s = unsafe { SCHEDULER.get() };
    match thread_mut(s, cur_id) {
        Some(t) => {
            t.wait_label = "";
            t.wait_result
        }
        None => Err(ThreadError::InvalidArgument),
    }
}

/// Move a waiting thread to the run queue with the given wake result.
/// Interrupt-callable; never switches contexts.
pub(crate) fn make_ready(tid: ThreadId, result: ThreadResult<()>) -> bool {
    let _g = irq::IrqGuard::enter();
    let s = unsafe { SCHEDULER.get() };
    if !s.active {
        return false;
    }
    match thread_mut(s, tid) {
        Some(t) if t.state == ThreadState::Waiting => {
            t.state = ThreadState::Ready;
            t.wait_result = result;
        }
        _ => return false,
    }
    s.run_queue.push_back(tid);
    NEED_RESCHED.store(true, Ordering::Release);
    true
}

/// Voluntarily give up the CPU, rotating to the tail of the run queue.
pub fn yield_now() {
    if irq::inside_interrupt() {
        return;
    }
    let state = irq::disable();
    switch_away(true);
    irq::restore(state);
}

/// Suspend the current thread for at least `ms` milliseconds.
///
/// `ms` of 0 yields instead. Fails with `NotPermitted` inside interrupts.
pub fn sleep_ms(ms: u64) -> ThreadResult<()> {
    if irq::inside_interrupt() {
        return Err(ThreadError::NotPermitted);
    }
    if ms == 0 {
        yield_now();
        return Ok(());
    }
    // A private stack-local key: nothing else can wake it, so the only
    // normal outcome is the timeout.
    let token: u8 = 0;
    let key = &token as *const u8 as usize;
    match genwait::wait(key, "thd_sleep", ms, None) {
        Err(ThreadError::TimedOut) | Ok(()) => Ok(()),
        Err(e) => Err(e),
    }
}

/// Wait for a thread to exit and consume its exit value.
///
/// Fails with `InvalidArgument` for a detached target, an unknown or
/// already-joined thread, or a self-join.
pub fn join(tid: ThreadId) -> ThreadResult<usize> {
    if irq::inside_interrupt() {
        return Err(ThreadError::NotPermitted);
    }
    loop {
        let state = irq::disable();
        let decision = join_check(tid);
        let wait_key = match decision {
            Ok(Some(value)) => {
                irq::restore(state);
                return Ok(value);
            }
            Ok(None) => live_join_key(tid),
            Err(e) => {
                irq::restore(state);
                return Err(e);
            }
        };
        // Still alive: sleep on the control block's address until exit
        // wakes us. The interrupt mask stays held across the check and
        // the enqueue so the wake cannot be lost.
        let r = genwait::wait(wait_key, "thd_join", 0, None);
        irq::restore(state);
        r?;
    }
}

/// One interrupts-disabled pass of the join state machine:
/// `Ok(Some(v))` means reaped with exit value `v`, `Ok(None)` means the
/// target is still alive, `Err` is a hard failure.
fn join_check(tid: ThreadId) -> ThreadResult<Option<usize>> {
    let s = unsafe { SCHEDULER.get() };
    if !s.active {
        return Err(ThreadError::NotPermitted);
    }
    let cur = s.current.ok_or(ThreadError::NotPermitted)?;
    if cur == tid {
        return Err(ThreadError::InvalidArgument);
    }
    let slot = slot_of(s, tid).ok_or(ThreadError::InvalidArgument)?;
    let (join_state, thread_state) = match &s.threads[slot] {
        Some(t) => (t.join_state, t.state),
        None => return Err(ThreadError::InvalidArgument),
    };
    if join_state == JoinState::Detached {
        return Err(ThreadError::InvalidArgument);
    }
    if thread_state == ThreadState::Zombie {
        if let Some(t) = s.threads[slot].take() {
            log::debug!("joined thread {}", t.id.get());
            return Ok(Some(t.exit_value));
        }
        return Err(ThreadError::InvalidArgument);
    }
    Ok(None)
}

fn live_join_key(tid: ThreadId) -> usize {
    let s = unsafe { SCHEDULER.get() };
    thread_ref(s, tid).map(|t| t.join_key()).unwrap_or(1)
}

/// Detach a thread: its exit value will be discarded and its storage
/// reclaimed by the scheduler. A zombie is reaped on the spot.
pub fn detach(tid: ThreadId) -> ThreadResult<()> {
    let _g = irq::IrqGuard::enter();
    let s = unsafe { SCHEDULER.get() };
    if !s.active {
        return Err(ThreadError::NotPermitted);
    }
    let slot = slot_of(s, tid).ok_or(ThreadError::InvalidArgument)?;
    match &mut s.threads[slot] {
        Some(t) if t.join_state == JoinState::Detached => Err(ThreadError::InvalidArgument),
        Some(t) if t.state == ThreadState::Zombie => {
            let id = t.id;
            s.threads[slot] = None;
            log::debug!("detached and reaped zombie thread {}", id.get());
            Ok(())
        }
        Some(t) => {
            t.join_state = JoinState::Detached;
            Ok(())
        }
        None => Err(ThreadError::InvalidArgument),
    }
}

/// Exit bookkeeping without the final switch: run TLS destructors, mark
/// the current thread a zombie carrying `value`, and wake any joiners.
pub(crate) fn prepare_exit(value: usize) {
    tls::run_exit_destructors();
    let wake_key = {
        let _g = irq::IrqGuard::enter();
        let s = unsafe { SCHEDULER.get() };
        let cur = match s.current {
            Some(c) if s.active => c,
            _ => return,
        };
        match thread_mut(s, cur) {
            Some(t) => {
                t.state = ThreadState::Zombie;
                t.exit_value = value;
                t.entry = None;
                log::debug!("thread {} exited", cur.get());
                if t.join_state == JoinState::Joinable {
                    Some(t.join_key())
                } else {
                    None
                }
            }
            None => None,
        }
    };
    if let Some(key) = wake_key {
        genwait::wake_all(key);
    }
}

/// Terminate the current thread with an exit value.
///
/// A joinable thread's value is held for its joiner; a detached thread is
/// reaped by the scheduler on its next pass.
pub fn exit(value: usize) -> ! {
    prepare_exit(value);
    let _ = irq::disable();
    switch_away(false);
    // A zombie is never rescheduled; this only spins if there was
    // nothing at all left to run.
    loop {
        DefaultArch::wait_for_interrupt();
    }
}

/// The scheduler's periodic hook, called from the platform timer
/// interrupt after the clock has been advanced: expire wait deadlines
/// and account the running thread's quantum.
pub fn timer_tick() {
    genwait::check_timeouts(time::now_ms());
    let _g = irq::IrqGuard::enter();
    let s = unsafe { SCHEDULER.get() };
    if !s.active {
        return;
    }
    let cur = match s.current {
        Some(c) if s.idle != Some(c) => c,
        _ => return,
    };
    let quantum_ticks = s.quantum_ticks;
    if let Some(t) = thread_mut(s, cur) {
        t.quantum = t.quantum.saturating_sub(1);
        if t.quantum == 0 {
            t.quantum = quantum_ticks;
            NEED_RESCHED.store(true, Ordering::Release);
        }
    }
}

/// Yield if a reschedule is pending. Platforms call this on the way out
/// of an interrupt, back in thread context; cooperative loops may call
/// it too.
pub fn preempt_point() {
    if irq::inside_interrupt() {
        return;
    }
    if NEED_RESCHED.swap(false, Ordering::AcqRel) {
        yield_now();
    }
}

/// Aggregate counters.
pub fn stats() -> SchedulerStats {
    let _g = irq::IrqGuard::enter();
    let s = unsafe { SCHEDULER.get() };
    SchedulerStats {
        context_switches: s.switches,
        threads_alive: alive_count(s),
    }
}

/// Snapshot of every live thread.
pub fn threads() -> Vec<ThreadInfo> {
    let _g = irq::IrqGuard::enter();
    let s = unsafe { SCHEDULER.get() };
    s.threads
        .iter()
        .flatten()
        .map(|t| ThreadInfo {
            id: t.id,
            label: t.label.clone(),
            state: t.state,
            join_state: t.join_state,
            waiting_on: t.wait_label,
            switches: t.switches,
        })
        .collect()
}

/// Relabel the current thread.
pub fn set_label(label: &str) -> ThreadResult<()> {
    let _g = irq::IrqGuard::enter();
    let s = unsafe { SCHEDULER.get() };
    let cur = s.current.ok_or(ThreadError::NotPermitted)?;
    match thread_mut(s, cur) {
        Some(t) => {
            t.label = label.to_string();
            Ok(())
        }
        None => Err(ThreadError::InvalidArgument),
    }
}

/// Label of the current thread.
pub fn current_label() -> Option<String> {
    let _g = irq::IrqGuard::enter();
    let s = unsafe { SCHEDULER.get() };
    let cur = s.current?;
    thread_ref(s, cur).map(|t| t.label.clone())
}

/// Take the current thread's TLS list for the exit-time destructor run.
pub(crate) fn take_current_tls() -> Vec<TlsSlot> {
    let _g = irq::IrqGuard::enter();
    let s = unsafe { SCHEDULER.get() };
    match s.current.and_then(|cur| thread_mut(s, cur)) {
        Some(t) => core::mem::take(&mut t.tls),
        None => Vec::new(),
    }
}

/// Access the current thread's TLS list in place.
pub(crate) fn with_current_tls<R>(f: impl FnOnce(&mut Vec<TlsSlot>) -> R) -> ThreadResult<R> {
    let _g = irq::IrqGuard::enter();
    let s = unsafe { SCHEDULER.get() };
    let cur = s.current.ok_or(ThreadError::NotPermitted)?;
    match thread_mut(s, cur) {
        Some(t) => Ok(f(&mut t.tls)),
        None => Err(ThreadError::InvalidArgument),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Deterministic hooks for unit tests: fabricate current-thread and
    //! waiting-thread situations without real context switches.

    use super::*;

    pub(crate) fn force_current(tid: ThreadId) {
        let _g = irq::IrqGuard::enter();
        let s = unsafe { SCHEDULER.get() };
        if let Some(old) = s.current {
            if let Some(t) = thread_mut(s, old) {
                if t.state == ThreadState::Running {
                    t.state = ThreadState::Ready;
                }
            }
        }
        if let Some(t) = thread_mut(s, tid) {
            t.state = ThreadState::Running;
        }
        s.run_queue.retain(|&q| q != tid);
        s.current = Some(tid);
    }

    pub(crate) fn force_wait(tid: ThreadId, label: &'static str) {
        let _g = irq::IrqGuard::enter();
        let s = unsafe { SCHEDULER.get() };
        if let Some(t) = thread_mut(s, tid) {
            t.state = ThreadState::Waiting;
            t.wait_label = label;
            t.wait_result = Ok(());
        }
        s.run_queue.retain(|&q| q != tid);
    }

    pub(crate) fn state_of(tid: ThreadId) -> Option<ThreadState> {
        let _g = irq::IrqGuard::enter();
        let s = unsafe { SCHEDULER.get() };
        thread_ref(s, tid).map(|t| t.state)
    }

    pub(crate) fn wait_result_of(tid: ThreadId) -> Option<ThreadResult<()>> {
        let _g = irq::IrqGuard::enter();
        let s = unsafe { SCHEDULER.get() };
        thread_ref(s, tid).map(|t| t.wait_result)
    }

    pub(crate) fn run_queue_snapshot() -> Vec<ThreadId> {
        let _g = irq::IrqGuard::enter();
        let s = unsafe { SCHEDULER.get() };
        s.run_queue.iter().copied().collect()
    }

    pub(crate) fn join_key_of(tid: ThreadId) -> Option<usize> {
        let _g = irq::IrqGuard::enter();
        let s = unsafe { SCHEDULER.get() };
        thread_ref(s, tid).map(|t| t.join_key())
    }

    pub(crate) fn need_resched_pending() -> bool {
        NEED_RESCHED.load(Ordering::Acquire)
    }
}

#[cfg(test)]
pub(crate) use test_support::{
    join_key_of, run_queue_snapshot, state_of, wait_result_of,
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util;

    #[test]
    fn test_init_creates_main_and_idle() {
        let _t = test_util::serialize();
        let infos = threads();
        assert_eq!(infos.len(), 2);
        assert!(infos.iter().any(|t| t.label == "kernel"));
        assert!(infos.iter().any(|t| t.label == "idle"));
        let cur = current().unwrap();
        assert_eq!(current_label().as_deref(), Some("kernel"));
        assert_eq!(test_support::state_of(cur), Some(ThreadState::Running));
    }

    #[test]
    fn test_double_init_fails() {
        let _t = test_util::serialize();
        assert_eq!(init(), Err(ThreadError::Busy));
    }

    #[test]
    fn test_spawned_ids_are_unique_and_nonzero() {
        let _t = test_util::serialize();
        let a = spawn(|| 0).unwrap();
        let b = spawn(|| 0).unwrap();
        assert_ne!(a, b);
        assert!(a.get() > 0 && b.get() > 0);
        let queue = test_support::run_queue_snapshot();
        assert_eq!(queue, alloc::vec![a, b]);
    }

    #[test]
    fn test_spawn_rejected_inside_interrupt() {
        let _t = test_util::serialize();
        irq::enter_interrupt();
        let r = spawn(|| 0);
        irq::leave_interrupt();
        assert_eq!(r, Err(ThreadError::NotPermitted));
    }

    #[test]
    fn test_yield_with_empty_queue_keeps_current() {
        let _t = test_util::serialize();
        let before = current().unwrap();
        yield_now();
        assert_eq!(current(), Some(before));
        assert_eq!(
            test_support::state_of(before),
            Some(ThreadState::Running)
        );
    }

    #[test]
    fn test_exit_wakes_joiner_and_join_reaps() {
        let _t = test_util::serialize();
        let main = current().unwrap();
        let worker = spawn(|| 42).unwrap();
        let joiner = spawn(|| 0).unwrap();

        // Park the joiner on the worker's join key, as join() would.
        let key = join_key_of(worker).unwrap();
        test_util::park(joiner, key, "thd_join", 0, None);

        // Run the exit bookkeeping in the worker's context.
        test_support::force_current(worker);
        prepare_exit(42);
        test_support::force_current(main);

        assert_eq!(
            test_support::state_of(worker),
            Some(ThreadState::Zombie)
        );
        assert_eq!(test_support::state_of(joiner), Some(ThreadState::Ready));
        assert_eq!(test_support::wait_result_of(joiner), Some(Ok(())));
        let snapshot = threads();
        let zombie = snapshot.iter().find(|t| t.id == worker).unwrap();
        assert_eq!(zombie.state, ThreadState::Zombie);

        // Joining the zombie consumes the exit value without blocking.
        assert_eq!(join(worker), Ok(42));
        assert_eq!(join(worker), Err(ThreadError::InvalidArgument));
    }

    #[test]
    fn test_join_errors() {
        let _t = test_util::serialize();
        let main = current().unwrap();
        assert_eq!(join(main), Err(ThreadError::InvalidArgument));

        let detached = ThreadBuilder::new().detached(true).spawn(|| 0).unwrap();
        assert_eq!(join(detached), Err(ThreadError::InvalidArgument));
    }

    #[test]
    fn test_detach_state_machine() {
        let _t = test_util::serialize();
        let main = current().unwrap();
        let worker = spawn(|| 0).unwrap();
        assert_eq!(detach(worker), Ok(()));
        assert_eq!(detach(worker), Err(ThreadError::InvalidArgument));

        // Detaching a zombie reaps it immediately.
        let other = spawn(|| 0).unwrap();
        test_support::force_current(other);
        prepare_exit(0);
        test_support::force_current(main);
        assert_eq!(detach(other), Ok(()));
        assert!(threads().iter().all(|t| t.id != other));
    }

    #[test]
    fn test_quantum_exhaustion_requests_resched() {
        let _t = test_util::serialize();
        assert!(!test_support::need_resched_pending());
        for _ in 0..100 {
            timer_tick();
        }
        assert!(test_support::need_resched_pending());
        // preempt_point with an empty queue just clears the flag.
        preempt_point();
        assert!(!test_support::need_resched_pending());
    }

    #[test]
    fn test_sleep_zero_yields() {
        let _t = test_util::serialize();
        assert_eq!(sleep_ms(0), Ok(()));
    }

    #[test]
    fn test_sleep_rejected_inside_interrupt() {
        let _t = test_util::serialize();
        irq::enter_interrupt();
        let r = sleep_ms(5);
        irq::leave_interrupt();
        assert_eq!(r, Err(ThreadError::NotPermitted));
    }

    #[test]
    fn test_set_label() {
        let _t = test_util::serialize();
        set_label("renamed").unwrap();
        assert_eq!(current_label().as_deref(), Some("renamed"));
    }

    #[test]
    fn test_stats_track_alive_threads() {
        let _t = test_util::serialize();
        let before = stats().threads_alive;
        spawn(|| 0).unwrap();
        assert_eq!(stats().threads_alive, before + 1);
    }
}
