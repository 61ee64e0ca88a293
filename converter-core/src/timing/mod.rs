//! Clock-division search for the phase PWM sequencer.
//!
//! The hardware sequencer runs each output channel from the system clock
//! through a fractional divider and an integer cycle counter. Hitting a
//! requested switching frequency exactly means choosing both together, so
//! `solve` scans every representable cycle count and keeps the pairing with
//! the smallest frequency error.

use core::fmt;

/// Largest cycle count the sequencer counters can hold.
pub const MAX_TOTAL_CYCLES: u32 = 65_535;

/// Smallest cycle count worth programming; below this the duty-cycle
/// resolution collapses.
pub const MIN_TOTAL_CYCLES: u32 = 100;

/// Divider range supported by the sequencer clock prescaler.
pub const MIN_CLOCK_DIVIDER: f64 = 1.0;
pub const MAX_CLOCK_DIVIDER: f64 = 256.0;

/// A (cycle count, clock divider) pairing produced by [`solve`].
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TimingSolution {
    pub total_cycles: u32,
    pub clock_divider: f64,
}

impl TimingSolution {
    /// Frequency the hardware will actually produce with this pairing.
    #[must_use]
    pub fn effective_hz(&self, system_clock_hz: u32) -> f64 {
        f64::from(system_clock_hz) / (self.clock_divider * f64::from(self.total_cycles))
    }
}

/// Reported when no divider in range can reach the requested frequency.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum TimingError {
    /// Every candidate cycle count demanded a divider outside
    /// [`MIN_CLOCK_DIVIDER`]..=[`MAX_CLOCK_DIVIDER`].
    Unachievable { target_hz: f64 },
}

impl fmt::Display for TimingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimingError::Unachievable { target_hz } => {
                write!(f, "no divider in range reaches {target_hz} Hz")
            }
        }
    }
}

/// Picks the cycle count and clock divider minimizing frequency error.
///
/// Candidates are scanned from [`MAX_TOTAL_CYCLES`] downward so that among
/// equal-error pairings the largest cycle count wins, which keeps the most
/// duty-cycle resolution. Callers must treat an error as "refuse the update
/// and keep the previous configuration".
pub fn solve(target_hz: f64, system_clock_hz: u32) -> Result<TimingSolution, TimingError> {
    let sys = f64::from(system_clock_hz);
    let mut best: Option<(f64, TimingSolution)> = None;

    for cycles in (MIN_TOTAL_CYCLES..=MAX_TOTAL_CYCLES).rev() {
        let divider = sys / (target_hz * f64::from(cycles));
        if !(MIN_CLOCK_DIVIDER..=MAX_CLOCK_DIVIDER).contains(&divider) {
            continue;
        }

        let actual = sys / (divider * f64::from(cycles));
        let err = libm::fabs(actual - target_hz);
        if best.is_none_or(|(best_err, _)| err < best_err) {
            best = Some((
                err,
                TimingSolution {
                    total_cycles: cycles,
                    clock_divider: divider,
                },
            ));
        }
    }

    best.map(|(_, solution)| solution)
        .ok_or(TimingError::Unachievable { target_hz })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SYS_CLK_HZ: u32 = 125_000_000;

    #[test]
    fn exact_frequency_prefers_largest_cycle_count() {
        // 200 kHz: divider hits 1.0 exactly at 625 cycles; every larger
        // cycle count would need a divider below 1.0.
        let solution = solve(200_000.0, SYS_CLK_HZ).expect("should be achievable");
        assert_eq!(solution.total_cycles, 625);
        assert!(libm::fabs(solution.clock_divider - 1.0) < 1e-9);
        assert!(libm::fabs(solution.effective_hz(SYS_CLK_HZ) - 200_000.0) < 1e-6);
    }

    #[test]
    fn low_frequency_uses_divider_headroom() {
        let solution = solve(100.0, SYS_CLK_HZ).expect("should be achievable");
        assert!(solution.clock_divider >= MIN_CLOCK_DIVIDER);
        assert!(solution.clock_divider <= MAX_CLOCK_DIVIDER);
        assert!(libm::fabs(solution.effective_hz(SYS_CLK_HZ) - 100.0) < 0.5);
    }

    #[test]
    fn unreachable_frequency_is_reported() {
        // 1 Hz would need divider ~1907 even at the largest cycle count.
        assert_eq!(
            solve(1.0, SYS_CLK_HZ),
            Err(TimingError::Unachievable { target_hz: 1.0 })
        );
    }

    #[test]
    fn results_stay_inside_hardware_ranges() {
        for &target in &[150.0, 1_000.0, 25_000.0, 123_456.0, 500_000.0, 999_999.0] {
            let Ok(solution) = solve(target, SYS_CLK_HZ) else {
                continue;
            };
            assert!(solution.total_cycles >= MIN_TOTAL_CYCLES, "target {target}");
            assert!(solution.total_cycles <= MAX_TOTAL_CYCLES, "target {target}");
            assert!(solution.clock_divider >= MIN_CLOCK_DIVIDER, "target {target}");
            assert!(solution.clock_divider <= MAX_CLOCK_DIVIDER, "target {target}");
        }
    }

    #[test]
    fn error_is_minimal_over_search_space() {
        let target = 123_456.0;
        let solution = solve(target, SYS_CLK_HZ).expect("should be achievable");
        let chosen_err = libm::fabs(solution.effective_hz(SYS_CLK_HZ) - target);

        for cycles in MIN_TOTAL_CYCLES..=MAX_TOTAL_CYCLES {
            let divider = f64::from(SYS_CLK_HZ) / (target * f64::from(cycles));
            if !(MIN_CLOCK_DIVIDER..=MAX_CLOCK_DIVIDER).contains(&divider) {
                continue;
            }
            let err = libm::fabs(f64::from(SYS_CLK_HZ) / (divider * f64::from(cycles)) - target);
            assert!(
                chosen_err <= err + 1e-9,
                "candidate cycles={cycles} beats chosen solution"
            );
        }
    }
}
