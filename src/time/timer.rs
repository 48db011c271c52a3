//! Timer driver contract for preemptive scheduling.

use super::TIMER_HZ;

/// Timer configuration for the periodic scheduling interrupt.
#[derive(Debug, Clone)]
pub struct TimerConfig {
    /// Timer frequency in Hz (interrupts per second)
    pub frequency: u32,
    /// Timer interrupt vector number
    pub vector: u8,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            frequency: TIMER_HZ,
            vector: 0xEF,
        }
    }
}

/// Hardware timer abstraction.
///
/// A platform implements this for its tick source. The interrupt handler
/// it installs is expected to call `time::tick` (or `time::advance_ms`)
/// followed by `scheduler::timer_tick`, bracketed by
/// `irq::enter_interrupt`/`irq::leave_interrupt`, and to invoke
/// `scheduler::preempt_point` on the way back to thread context.
pub trait Timer {
    /// Initialize the timer with the given configuration.
    ///
    /// # Safety
    ///
    /// Configures hardware timers and interrupt vectors. Must only be
    /// called once during system initialization with interrupts disabled.
    unsafe fn init(&mut self, config: &TimerConfig) -> Result<(), TimerError>;

    /// Start periodic interrupt generation.
    fn start(&mut self) -> Result<(), TimerError>;

    /// Stop interrupt generation, preserving configuration.
    fn stop(&mut self) -> Result<(), TimerError>;

    /// Program a one-shot interrupt `ms` from now.
    ///
    /// The scheduler exposes the earliest pending wait deadline through
    /// `genwait::next_timeout` so platforms can tighten the next tick
    /// instead of polling at the periodic rate.
    fn set_oneshot_ms(&mut self, ms: u64) -> Result<(), TimerError>;
}

/// Errors that can occur during timer operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerError {
    /// Timer is not initialized
    NotInitialized,
    /// Invalid configuration parameters
    InvalidConfig,
    /// Hardware timer is not available
    NotAvailable,
    /// Frequency is out of supported range
    UnsupportedFrequency,
}
