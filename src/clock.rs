//! Conversion of a free-running hardware counter into time deltas.

use std::{num::NonZeroU32, time::Duration};

/// Turns readings of a wrapping 32-bit hardware counter into the time
/// elapsed between consecutive readings.
///
/// # Example
///
/// ```
/// use mekf::CounterClock;
/// use std::{num::NonZeroU32, time::Duration};
///
/// let mut clock = CounterClock::new(NonZeroU32::new(1_000_000).unwrap());
/// assert_eq!(clock.tick(u32::MAX - 499), Duration::ZERO);
///
/// // the counter wrapped around between the two readings
/// assert_eq!(clock.tick(500), Duration::from_micros(1000));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CounterClock {
    /// Counter ticks per second.
    frequency: NonZeroU32,
    /// The previous counter reading.
    last: Option<u32>,
}

impl CounterClock {
    /// Create a clock for a counter running at `frequency` Hz.
    #[must_use]
    pub fn new(frequency: NonZeroU32) -> Self {
        Self {
            frequency,
            last: None,
        }
    }

    /// The counter frequency in Hz.
    #[must_use]
    pub fn frequency(&self) -> NonZeroU32 {
        self.frequency
    }

    /// Record a counter reading and return the time elapsed since the
    /// previous one. The first reading returns zero.
    ///
    /// Counter overflow between two readings is handled, as long as less
    /// than one full counter period has passed.
    pub fn tick(&mut self, counter: u32) -> Duration {
        let elapsed = self
            .last
            .map_or(0, |last| counter.wrapping_sub(last));
        self.last = Some(counter);

        let frequency = u64::from(self.frequency.get());
        let ticks = u64::from(elapsed);
        let seconds = ticks / frequency;
        let nanos = (ticks % frequency) * 1_000_000_000 / frequency;

        // nanos < 1e9, so this always fits
        Duration::new(seconds, u32::try_from(nanos).unwrap_or(u32::MAX))
    }

    /// Forget the previous reading, so the next tick returns zero.
    pub fn reset(&mut self) {
        self.last = None;
    }
}
