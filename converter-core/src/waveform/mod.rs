//! Phase-shifted waveform planning for the 4-channel inverter stage.
//!
//! Four sequencer channels share one trigger input and run 90 degrees apart.
//! Channels 0/2 carry the pair-A duty cycle, channels 1/3 pair B. Planning is
//! pure: a validated [`WaveformConfig`] becomes a complete [`WaveformProgram`]
//! (divider plus all four channel triples) or an error, never a partial
//! update. Hardware commit happens through [`WaveformSink`] in one shot.

use core::fmt;

use crate::timing::{self, TimingError, TimingSolution};

/// Number of phase-staggered output channels.
pub const PHASE_CHANNELS: usize = 4;

/// Hardware-supported frequency ceiling, exclusive.
pub const MAX_FREQUENCY_HZ: f64 = 1_000_000.0;

/// The sequencer loop spends two instructions per output toggle, so the
/// solver is asked for twice the requested frequency.
const SEQUENCER_FREQUENCY_FACTOR: f64 = 2.0;

/// Requested inverter drive parameters.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct WaveformConfig {
    pub frequency_hz: f64,
    pub duty_pair_a: f32,
    pub duty_pair_b: f32,
}

impl WaveformConfig {
    /// Range checks shared by every entry point.
    pub fn validate(&self) -> Result<(), WaveformError> {
        if !(self.frequency_hz > 0.0 && self.frequency_hz < MAX_FREQUENCY_HZ) {
            return Err(WaveformError::FrequencyOutOfRange {
                frequency_hz: self.frequency_hz,
            });
        }
        for duty in [self.duty_pair_a, self.duty_pair_b] {
            if !(0.0..=1.0).contains(&duty) {
                return Err(WaveformError::DutyOutOfRange { duty });
            }
        }
        Ok(())
    }

    /// Duty cycle assigned to a channel: even channels are pair A, odd pair B.
    #[must_use]
    pub fn duty_for_channel(&self, channel: usize) -> f32 {
        if channel % 2 == 0 {
            self.duty_pair_a
        } else {
            self.duty_pair_b
        }
    }
}

/// Rejection reasons for a waveform update.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum WaveformError {
    FrequencyOutOfRange { frequency_hz: f64 },
    DutyOutOfRange { duty: f32 },
    Timing(TimingError),
}

impl From<TimingError> for WaveformError {
    fn from(error: TimingError) -> Self {
        WaveformError::Timing(error)
    }
}

impl fmt::Display for WaveformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaveformError::FrequencyOutOfRange { frequency_hz } => {
                write!(f, "frequency {frequency_hz} Hz outside (0, 1e6)")
            }
            WaveformError::DutyOutOfRange { duty } => {
                write!(f, "duty cycle {duty} outside [0, 1]")
            }
            WaveformError::Timing(err) => err.fmt(f),
        }
    }
}

/// Parameter triple loaded into one sequencer channel.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ChannelTiming {
    /// Cycles to wait after the trigger before the first edge.
    pub phase_delay_cycles: u32,
    pub high_cycles: u32,
    pub low_cycles: u32,
}

/// Complete, internally consistent parameter set for all four channels.
///
/// A program is only ever constructed whole, so a sink can never observe a
/// new divider paired with stale channel triples or vice versa.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct WaveformProgram {
    pub config: WaveformConfig,
    pub clock_divider: f64,
    pub total_cycles: u32,
    pub channels: [ChannelTiming; PHASE_CHANNELS],
    pub effective_hz: f64,
}

/// Commit target for a planned program.
///
/// Firmware points this at the sequencer hardware (divider write plus FIFO
/// pushes); tests and the emulator record the program instead.
pub trait WaveformSink {
    fn commit(&mut self, program: &WaveformProgram);
}

/// Sink that performs no hardware interaction.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoopWaveformSink;

impl WaveformSink for NoopWaveformSink {
    fn commit(&mut self, _: &WaveformProgram) {}
}

/// Computes the full channel parameter set for `config`.
pub fn plan(config: WaveformConfig, system_clock_hz: u32) -> Result<WaveformProgram, WaveformError> {
    config.validate()?;

    let solution: TimingSolution = timing::solve(
        config.frequency_hz * SEQUENCER_FREQUENCY_FACTOR,
        system_clock_hz,
    )?;

    // Phase stagger is derived from the requested period, not the doubled
    // solver target: a quarter period between adjacent channels.
    let period_s = 1.0 / config.frequency_hz;
    let phase_shift_s = period_s / PHASE_CHANNELS as f64;
    let cycles_per_second = f64::from(system_clock_hz) / solution.clock_divider;

    let mut channels = [ChannelTiming::default(); PHASE_CHANNELS];
    for (index, channel) in channels.iter_mut().enumerate() {
        let duty = f64::from(config.duty_for_channel(index));
        let high = round_cycles(duty * f64::from(solution.total_cycles)).max(1);
        let low = solution.total_cycles.saturating_sub(high).max(1);

        let mut phase = round_cycles(index as f64 * phase_shift_s * cycles_per_second);
        if phase == 0 && index > 0 {
            phase = 1;
        }

        *channel = ChannelTiming {
            phase_delay_cycles: phase,
            high_cycles: high,
            low_cycles: low,
        };
    }

    Ok(WaveformProgram {
        config,
        clock_divider: solution.clock_divider,
        total_cycles: solution.total_cycles,
        channels,
        effective_hz: solution.effective_hz(system_clock_hz),
    })
}

fn round_cycles(value: f64) -> u32 {
    libm::round(value) as u32
}

/// Owns the committed waveform configuration and guards its replacement.
///
/// On any planning failure the previous program is retained untouched; on
/// success the sink receives the whole program in a single commit.
#[derive(Debug, Default)]
pub struct PhaseSequencer {
    committed: Option<WaveformProgram>,
}

impl PhaseSequencer {
    #[must_use]
    pub const fn new() -> Self {
        Self { committed: None }
    }

    /// The last successfully committed program, if any.
    #[must_use]
    pub fn current(&self) -> Option<&WaveformProgram> {
        self.committed.as_ref()
    }

    /// Plans `config` and, on success, commits it through `sink`.
    pub fn configure<S: WaveformSink>(
        &mut self,
        config: WaveformConfig,
        system_clock_hz: u32,
        sink: &mut S,
    ) -> Result<&WaveformProgram, WaveformError> {
        let program = plan(config, system_clock_hz)?;
        sink.commit(&program);
        Ok(self.committed.insert(program))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SYS_CLK_HZ: u32 = 125_000_000;

    fn config(frequency_hz: f64, duty_a: f32, duty_b: f32) -> WaveformConfig {
        WaveformConfig {
            frequency_hz,
            duty_pair_a: duty_a,
            duty_pair_b: duty_b,
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        commits: heapless::Vec<WaveformProgram, 4>,
    }

    impl WaveformSink for RecordingSink {
        fn commit(&mut self, program: &WaveformProgram) {
            self.commits.push(*program).expect("commit capacity");
        }
    }

    #[test]
    fn pairs_alternate_across_channels() {
        let program = plan(config(100_000.0, 0.5, 0.3), SYS_CLK_HZ).expect("plannable");
        let cycles = f64::from(program.total_cycles);

        let expect_high = |duty: f64| libm::round(duty * cycles) as u32;
        assert_eq!(program.channels[0].high_cycles, expect_high(0.5));
        assert_eq!(program.channels[1].high_cycles, expect_high(0.3));
        assert_eq!(program.channels[2].high_cycles, expect_high(0.5));
        assert_eq!(program.channels[3].high_cycles, expect_high(0.3));
    }

    #[test]
    fn stagger_is_a_quarter_period_per_channel() {
        // 100 kHz at 125 MHz: the doubled solver target lands on 625 cycles
        // with divider 1.0, so a quarter of the 10 us period is 312.5 cycles.
        let program = plan(config(100_000.0, 0.5, 0.5), SYS_CLK_HZ).expect("plannable");
        assert_eq!(program.channels[0].phase_delay_cycles, 0);
        assert_eq!(program.channels[1].phase_delay_cycles, 313);
        assert_eq!(program.channels[2].phase_delay_cycles, 625);
        assert_eq!(program.channels[3].phase_delay_cycles, 938);
    }

    #[test]
    fn zero_duty_clamps_to_one_cycle() {
        let program = plan(config(100_000.0, 0.0, 1.0), SYS_CLK_HZ).expect("plannable");
        for channel in [0, 2] {
            assert_eq!(program.channels[channel].high_cycles, 1);
        }
        // Full duty leaves no low time; the low side clamps instead.
        for channel in [1, 3] {
            assert_eq!(program.channels[channel].low_cycles, 1);
        }
    }

    #[test]
    fn rejects_out_of_range_requests() {
        assert!(matches!(
            plan(config(0.0, 0.5, 0.5), SYS_CLK_HZ),
            Err(WaveformError::FrequencyOutOfRange { .. })
        ));
        assert!(matches!(
            plan(config(1_000_000.0, 0.5, 0.5), SYS_CLK_HZ),
            Err(WaveformError::FrequencyOutOfRange { .. })
        ));
        assert!(matches!(
            plan(config(100_000.0, 1.5, 0.5), SYS_CLK_HZ),
            Err(WaveformError::DutyOutOfRange { .. })
        ));
        assert!(matches!(
            plan(config(100_000.0, 0.5, -0.1), SYS_CLK_HZ),
            Err(WaveformError::DutyOutOfRange { .. })
        ));
    }

    #[test]
    fn failed_configure_retains_previous_program() {
        let mut sequencer = PhaseSequencer::new();
        let mut sink = RecordingSink::default();

        sequencer
            .configure(config(100_000.0, 0.5, 0.3), SYS_CLK_HZ, &mut sink)
            .expect("valid config");
        let before = *sequencer.current().expect("committed");

        let result = sequencer.configure(config(-5.0, 0.5, 0.3), SYS_CLK_HZ, &mut sink);
        assert!(result.is_err());
        assert_eq!(sequencer.current(), Some(&before));
        assert_eq!(sink.commits.len(), 1);
    }

    #[test]
    fn identical_configs_produce_identical_commits() {
        let mut sequencer = PhaseSequencer::new();
        let mut sink = RecordingSink::default();
        let request = config(250_000.0, 0.4, 0.6);

        sequencer
            .configure(request, SYS_CLK_HZ, &mut sink)
            .expect("valid config");
        sequencer
            .configure(request, SYS_CLK_HZ, &mut sink)
            .expect("valid config");

        assert_eq!(sink.commits.len(), 2);
        assert_eq!(sink.commits[0], sink.commits[1]);
    }
}
