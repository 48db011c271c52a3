//! Architecture abstraction layer for context switching and interrupt control.
//!
//! This module provides a unified interface for the architecture-specific
//! operations the scheduler and the IRQ gate depend on.

/// Architecture abstraction trait.
///
/// This trait must be implemented for each supported CPU architecture to
/// provide context switching and interrupt masking capabilities.
///
/// # Safety
///
/// Implementations of this trait involve direct hardware manipulation and
/// inline assembly. All methods marked as unsafe have specific preconditions
/// that must be upheld by the caller.
pub trait Arch {
    /// Architecture-specific saved context type.
    ///
    /// This type must contain all CPU state needed to fully restore a
    /// thread's execution context.
    type SavedContext: Default + Send;

    /// Switch from one thread context to another.
    ///
    /// # Safety
    ///
    /// - `prev` and `next` must point to valid, properly aligned contexts
    ///   that remain valid for the duration of the call
    /// - Must be called with interrupts disabled
    /// - The `next` context must represent a valid execution state
    unsafe fn context_switch(prev: *mut Self::SavedContext, next: *const Self::SavedContext);

    /// Prime a fresh context so that the first switch into it enters
    /// `entry` on the given stack.
    ///
    /// # Safety
    ///
    /// - `stack_top` must point one past the highest usable byte of a
    ///   stack region owned by the thread the context belongs to
    /// - The region must be large enough for the initial frame
    unsafe fn prime_context(
        ctx: &mut Self::SavedContext,
        stack_top: *mut u8,
        entry: extern "C" fn() -> !,
    );

    /// Enable interrupt delivery on the current CPU.
    fn enable_interrupts();

    /// Disable interrupt delivery on the current CPU.
    fn disable_interrupts();

    /// Check whether interrupts are currently enabled.
    fn interrupts_enabled() -> bool;

    /// Relax the CPU until the next interrupt is plausible.
    ///
    /// Used by the idle thread and the exit path. A no-op fallback is
    /// acceptable; a `hlt`-style instruction is preferred.
    fn wait_for_interrupt() {
        core::hint::spin_loop();
    }
}

/// A no-op architecture implementation for hosted builds and tests.
///
/// Context switches do nothing and the interrupt mask is emulated with an
/// atomic flag so the IRQ gate stays observable. Not suitable for targets
/// where real context switching is required.
pub struct NoOpArch;

use portable_atomic::{AtomicBool, Ordering};

static EMULATED_IRQ_ENABLED: AtomicBool = AtomicBool::new(true);

impl Arch for NoOpArch {
    type SavedContext = ();

    unsafe fn context_switch(_prev: *mut Self::SavedContext, _next: *const Self::SavedContext) {}

    unsafe fn prime_context(
        _ctx: &mut Self::SavedContext,
        _stack_top: *mut u8,
        _entry: extern "C" fn() -> !,
    ) {
    }

    fn enable_interrupts() {
        EMULATED_IRQ_ENABLED.store(true, Ordering::SeqCst);
    }

    fn disable_interrupts() {
        EMULATED_IRQ_ENABLED.store(false, Ordering::SeqCst);
    }

    fn interrupts_enabled() -> bool {
        EMULATED_IRQ_ENABLED.load(Ordering::SeqCst)
    }
}

#[cfg(all(target_arch = "x86_64", feature = "x86_64"))]
pub mod x86_64;

#[cfg(all(target_arch = "x86_64", feature = "x86_64"))]
pub use x86_64::X86_64Arch as DefaultArch;

#[cfg(not(all(target_arch = "x86_64", feature = "x86_64")))]
pub use NoOpArch as DefaultArch;
