//! The kernel clock: milliseconds since boot, fed by the platform timer.
//!
//! The platform timer interrupt calls [`advance_ms`] (directly or via a
//! [`timer::Timer`] driver) and then `scheduler::timer_tick`. Everything
//! else in the crate reads time through [`now_ms`].

pub mod timer;

use portable_atomic::{AtomicU64, Ordering};

/// Nominal timer interrupt rate.
pub const TIMER_HZ: u32 = 100;

/// Milliseconds per nominal timer tick.
pub const MS_PER_TICK: u64 = 1000 / TIMER_HZ as u64;

static CLOCK_MS: AtomicU64 = AtomicU64::new(0);

/// Milliseconds since boot.
#[inline]
pub fn now_ms() -> u64 {
    CLOCK_MS.load(Ordering::Acquire)
}

/// Advance the clock. Called from the platform timer path.
pub fn advance_ms(delta: u64) {
    CLOCK_MS.fetch_add(delta, Ordering::AcqRel);
}

/// Advance the clock by one nominal tick.
pub fn tick() {
    advance_ms(MS_PER_TICK);
}

pub(crate) fn reset() {
    CLOCK_MS.store(0, Ordering::Release);
}
