use std::fmt;
use std::time::Instant;

/// Monotonic time source injected into the protocol engine.
///
/// Timestamps are milliseconds on a caller-defined monotonic axis and travel
/// on the wire in the 32-bit `ts_send`/`ts_echo` fields. A reading of 0 is
/// reserved to mean "no timestamp".
pub trait Clock: fmt::Debug {
    fn now_ms(&self) -> u32;
}

/// Production clock: milliseconds elapsed since the clock was created.
#[derive(Debug)]
pub struct MonotonicClock {
    start: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        MonotonicClock {
            start: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        MonotonicClock::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u32 {
        // Offset by one so a live clock never reads the reserved value 0.
        (self.start.elapsed().as_millis() as u32).wrapping_add(1)
    }
}
