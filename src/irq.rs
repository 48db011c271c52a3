//! The IRQ gate: interrupt masking and the inside-interrupt predicate.
//!
//! Every blocking primitive brackets its critical sections with
//! [`disable`]/[`restore`] (or an [`IrqGuard`]) and consults
//! [`inside_interrupt`] on entry. Platform trap stubs maintain the
//! inside-interrupt predicate with [`enter_interrupt`]/[`leave_interrupt`].

use crate::arch::{Arch, DefaultArch};
use portable_atomic::{AtomicUsize, Ordering};

/// Prior interrupt-mask state as returned by [`disable`].
pub type IrqState = bool;

static INTERRUPT_DEPTH: AtomicUsize = AtomicUsize::new(0);

/// Disable interrupts, returning the prior mask state for [`restore`].
#[inline]
pub fn disable() -> IrqState {
    let was_enabled = DefaultArch::interrupts_enabled();
    DefaultArch::disable_interrupts();
    was_enabled
}

/// Restore the interrupt mask saved by a matching [`disable`].
#[inline]
pub fn restore(state: IrqState) {
    if state {
        DefaultArch::enable_interrupts();
    }
}

/// Check whether interrupt delivery is currently enabled.
#[inline]
pub fn enabled() -> bool {
    DefaultArch::interrupts_enabled()
}

/// Check whether the caller is executing inside an interrupt handler.
#[inline]
pub fn inside_interrupt() -> bool {
    INTERRUPT_DEPTH.load(Ordering::Acquire) > 0
}

/// Record interrupt-handler entry. Called by platform trap stubs.
pub fn enter_interrupt() {
    INTERRUPT_DEPTH.fetch_add(1, Ordering::AcqRel);
}

/// Record interrupt-handler exit. Must pair with [`enter_interrupt`].
pub fn leave_interrupt() {
    let prev = INTERRUPT_DEPTH.fetch_sub(1, Ordering::AcqRel);
    debug_assert!(prev > 0, "leave_interrupt without matching enter");
}

/// Interrupt guard for critical sections.
///
/// Disables interrupts on construction and restores the previous mask
/// state when dropped. Nests correctly.
pub struct IrqGuard {
    was_enabled: bool,
}

impl IrqGuard {
    /// Enter an interrupt-disabled critical section.
    pub fn enter() -> Self {
        Self {
            was_enabled: disable(),
        }
    }
}

impl Drop for IrqGuard {
    fn drop(&mut self) {
        restore(self.was_enabled);
    }
}

#[cfg(test)]
pub(crate) fn test_reset() {
    INTERRUPT_DEPTH.store(0, Ordering::Release);
    DefaultArch::enable_interrupts();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_restores_mask() {
        let _t = crate::test_util::serialize();
        assert!(enabled());
        {
            let _g = IrqGuard::enter();
            assert!(!enabled());
            {
                let _g2 = IrqGuard::enter();
                assert!(!enabled());
            }
            // Inner guard saw interrupts already disabled; still disabled here.
            assert!(!enabled());
        }
        assert!(enabled());
    }

    #[test]
    fn test_interrupt_depth() {
        let _t = crate::test_util::serialize();
        assert!(!inside_interrupt());
        enter_interrupt();
        assert!(inside_interrupt());
        enter_interrupt();
        leave_interrupt();
        assert!(inside_interrupt());
        leave_interrupt();
        assert!(!inside_interrupt());
    }
}
