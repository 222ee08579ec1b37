//! SimClock - Simulated Time
//!
//! TigerStyle: Deterministic, controllable time for the event queue.

/// A manual clock in milliseconds.
///
/// TigerStyle:
/// - Time only moves forward
/// - All time operations are explicit
/// - No reliance on system time
#[derive(Debug, Clone, Default)]
pub struct SimClock {
    /// Milliseconds since the simulation started
    current_ms: u64,
}

impl SimClock {
    /// Create a new clock starting at time zero.
    #[must_use]
    pub fn new() -> Self {
        Self { current_ms: 0 }
    }

    /// Get current time in milliseconds.
    #[must_use]
    pub fn now_ms(&self) -> u64 {
        self.current_ms
    }

    /// Absolute time `delay_ms` from now, saturating.
    #[must_use]
    pub fn deadline_ms(&self, delay_ms: u64) -> u64 {
        self.current_ms.saturating_add(delay_ms)
    }

    /// Move time forward to `ms`. Earlier values leave the clock unchanged.
    pub fn advance_to_ms(&mut self, ms: u64) -> u64 {
        if ms > self.current_ms {
            self.current_ms = ms;
        }
        self.current_ms
    }
}
