//! Irreversible shutdown latch.
//!
//! The first confirmed trip sets the latch; it never clears for the life of
//! the process. Power-stage outputs are forced safe by the caller at the
//! moment of latching, and configuration commands are refused afterwards so
//! a latched controller cannot be restarted without a power cycle.

use core::fmt;

use crate::protection::TripEvent;

/// Error returned when a state-changing operation hits a latched controller.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ShutdownLatched {
    pub cause: TripEvent,
}

impl fmt::Display for ShutdownLatched {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "controller is shut down: {}", self.cause)
    }
}

/// One-way latch recording the first trip that fired.
#[derive(Clone, Debug, Default)]
pub struct ShutdownLatch {
    cause: Option<TripEvent>,
}

impl ShutdownLatch {
    #[must_use]
    pub const fn new() -> Self {
        Self { cause: None }
    }

    /// Latches on the given trip. Later trips do not overwrite the first
    /// cause; the original fault is what the operator needs to see.
    pub fn trip(&mut self, event: TripEvent) {
        if self.cause.is_none() {
            self.cause = Some(event);
        }
    }

    #[must_use]
    pub const fn is_latched(&self) -> bool {
        self.cause.is_some()
    }

    #[must_use]
    pub const fn cause(&self) -> Option<&TripEvent> {
        self.cause.as_ref()
    }

    /// Guard for state-changing operations.
    pub fn ensure_operational(&self) -> Result<(), ShutdownLatched> {
        match self.cause {
            None => Ok(()),
            Some(cause) => Err(ShutdownLatched { cause }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_operational() {
        let latch = ShutdownLatch::new();
        assert!(!latch.is_latched());
        assert_eq!(latch.ensure_operational(), Ok(()));
    }

    #[test]
    fn first_trip_wins() {
        let mut latch = ShutdownLatch::new();
        let first = TripEvent::Overcurrent {
            channel: 0,
            amps: 75.0,
        };
        latch.trip(first);
        latch.trip(TripEvent::Overtemperature {
            channel: 3,
            celsius: 120.0,
        });
        assert_eq!(latch.cause(), Some(&first));
    }

    #[test]
    fn latched_guard_reports_the_cause() {
        let mut latch = ShutdownLatch::new();
        latch.trip(TripEvent::Overtemperature {
            channel: 1,
            celsius: 95.0,
        });
        let err = latch.ensure_operational().unwrap_err();
        assert_eq!(
            err.cause,
            TripEvent::Overtemperature {
                channel: 1,
                celsius: 95.0
            }
        );
    }
}
