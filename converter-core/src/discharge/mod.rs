//! Time-stepped discharge duty-cycle engine for the two auxiliary channels.
//!
//! A [`DischargeProgram`] holds per-channel duty sequences plus the shared
//! step duration. Programs are built whole (single-shot builder or streaming
//! loader) and committed by swapping the entire value, so the real-time tick
//! path can never observe a half-written sequence. The [`DischargeEngine`]
//! runs the Idle/Running state machine against wall-clock time relative to
//! the trigger edge.

use core::fmt;

use heapless::Vec;

use crate::trigger::TriggerOverride;

/// Number of discharge output channels.
pub const DISCHARGE_CHANNELS: usize = 2;

/// Longest programmable step sequence per channel.
pub const MAX_DISCHARGE_STEPS: usize = 100;

/// Ordered duty-cycle steps for one output channel.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChannelSequence {
    steps: Vec<f32, MAX_DISCHARGE_STEPS>,
}

impl ChannelSequence {
    #[must_use]
    pub const fn new() -> Self {
        Self { steps: Vec::new() }
    }

    #[must_use]
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    #[must_use]
    pub fn duty_at(&self, index: usize) -> Option<f32> {
        self.steps.get(index).copied()
    }

    /// Appends a duty value, reporting whether it was stored. Out-of-range
    /// values are dropped rather than failing the whole sequence; a full
    /// sequence also drops silently, mirroring the serial protocol.
    fn push_checked(&mut self, duty: f32) -> bool {
        if !(0.0..=1.0).contains(&duty) {
            return false;
        }
        self.steps.push(duty).is_ok()
    }
}

/// Committed discharge configuration: both channel sequences plus timing.
///
/// `enabled` and `max_cycle_duration_ms` are derived at build time and never
/// drift from the sequences; `step_duration_ms` is guaranteed non-zero for
/// any enabled program.
#[derive(Clone, Debug, PartialEq)]
pub struct DischargeProgram {
    channels: [ChannelSequence; DISCHARGE_CHANNELS],
    step_duration_ms: u32,
    max_cycle_duration_ms: u32,
}

impl DischargeProgram {
    /// A program with no steps; the engine will never start on it.
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            channels: [ChannelSequence::new(), ChannelSequence::new()],
            step_duration_ms: 0,
            max_cycle_duration_ms: 0,
        }
    }

    #[must_use]
    pub fn enabled(&self) -> bool {
        self.max_cycle_duration_ms > 0
    }

    #[must_use]
    pub fn step_duration_ms(&self) -> u32 {
        self.step_duration_ms
    }

    #[must_use]
    pub fn max_cycle_duration_ms(&self) -> u32 {
        self.max_cycle_duration_ms
    }

    #[must_use]
    pub fn channel(&self, index: usize) -> &ChannelSequence {
        &self.channels[index]
    }

    /// Longest step count across all channels.
    #[must_use]
    pub fn max_step_count(&self) -> usize {
        self.channels
            .iter()
            .map(ChannelSequence::step_count)
            .max()
            .unwrap_or(0)
    }
}

impl Default for DischargeProgram {
    fn default() -> Self {
        Self::disabled()
    }
}

/// Rejection reasons for sequence programming.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SequenceError {
    /// Step duration of zero is a configuration error, rejected wholesale.
    ZeroStepDuration,
    /// Streaming input was fed or finalized without an active loader.
    LoaderInactive,
    /// A new streaming load was started while one was already active.
    LoaderActive,
}

impl fmt::Display for SequenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SequenceError::ZeroStepDuration => f.write_str("step duration must be > 0 ms"),
            SequenceError::LoaderInactive => f.write_str("streaming input is not active"),
            SequenceError::LoaderActive => f.write_str("streaming input already active"),
        }
    }
}

/// Single-shot program construction: step duration up front, per-channel
/// duty lists appended, then [`finish`](Self::finish) derives the cycle
/// duration and enable flag.
#[derive(Clone, Debug)]
pub struct DischargeProgramBuilder {
    channels: [ChannelSequence; DISCHARGE_CHANNELS],
    step_duration_ms: u32,
    dropped: usize,
}

impl DischargeProgramBuilder {
    pub fn new(step_duration_ms: u32) -> Result<Self, SequenceError> {
        if step_duration_ms == 0 {
            return Err(SequenceError::ZeroStepDuration);
        }
        Ok(Self {
            channels: [ChannelSequence::new(), ChannelSequence::new()],
            step_duration_ms,
            dropped: 0,
        })
    }

    /// Appends one duty value to a channel. Values outside [0, 1] are
    /// silently dropped (counted for diagnostics), not treated as errors.
    pub fn push_step(&mut self, channel: usize, duty: f32) {
        if !self.channels[channel].push_checked(duty) {
            self.dropped += 1;
        }
    }

    pub fn extend<I: IntoIterator<Item = f32>>(&mut self, channel: usize, duties: I) {
        for duty in duties {
            self.push_step(channel, duty);
        }
    }

    /// Number of values rejected so far.
    #[must_use]
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    #[must_use]
    pub fn finish(self) -> DischargeProgram {
        let max_cycle_duration_ms = self
            .channels
            .iter()
            .map(|channel| channel.step_count() as u32 * self.step_duration_ms)
            .max()
            .unwrap_or(0);

        DischargeProgram {
            channels: self.channels,
            step_duration_ms: self.step_duration_ms,
            max_cycle_duration_ms,
        }
    }
}

/// Streaming (line-at-a-time) program construction.
///
/// Between [`begin`](Self::begin) and [`end`](Self::end) each fed pair adds
/// one step to channel 1 and, when present, one to channel 2. `end` runs the
/// same finalize as the single-shot builder, so both forms converge on
/// identical programs.
#[derive(Clone, Debug, Default)]
pub struct StreamingLoader {
    builder: Option<DischargeProgramBuilder>,
}

impl StreamingLoader {
    #[must_use]
    pub const fn new() -> Self {
        Self { builder: None }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.builder.is_some()
    }

    pub fn begin(&mut self, step_duration_ms: u32) -> Result<(), SequenceError> {
        if self.builder.is_some() {
            return Err(SequenceError::LoaderActive);
        }
        self.builder = Some(DischargeProgramBuilder::new(step_duration_ms)?);
        Ok(())
    }

    pub fn feed(&mut self, channel_1: f32, channel_2: Option<f32>) -> Result<(), SequenceError> {
        let builder = self.builder.as_mut().ok_or(SequenceError::LoaderInactive)?;
        builder.push_step(0, channel_1);
        if let Some(duty) = channel_2 {
            builder.push_step(1, duty);
        }
        Ok(())
    }

    /// Finalizes the stream, returning the program together with the number
    /// of duty values rejected while feeding.
    pub fn end(&mut self) -> Result<(DischargeProgram, usize), SequenceError> {
        let builder = self.builder.take().ok_or(SequenceError::LoaderInactive)?;
        let dropped = builder.dropped();
        Ok((builder.finish(), dropped))
    }

    /// Drops any partial input without committing.
    pub fn abort(&mut self) {
        self.builder = None;
    }
}

/// What happens once the programmed steps are exhausted.
///
/// The two deployed firmware revisions disagreed on this, so it is explicit
/// configuration rather than a fork.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum StepPolicy {
    /// One shared step index wraps at the longest channel's step count;
    /// shorter channels wrap at their own length inside the shared cycle.
    #[default]
    ModuloLoop,
    /// Each channel clamps to its own final step and holds it until the
    /// trigger drops.
    HoldLast,
}

/// Output-side flags applied after the duty value is resolved.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DischargeFlags {
    pub trigger: TriggerOverride,
    pub invert_output: bool,
    pub verbose: bool,
}

impl DischargeFlags {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            trigger: TriggerOverride::new(),
            // The deployed revision shipped with inverted outputs.
            invert_output: true,
            verbose: false,
        }
    }
}

impl Default for DischargeFlags {
    fn default() -> Self {
        Self::new()
    }
}

/// Run-state transition reported by a tick.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RunTransition {
    Started,
    Stopped,
}

/// Result of one scheduler tick.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TickOutcome {
    /// Hardware compare levels to apply this tick; `None` when the engine is
    /// idle and the outputs were already released.
    pub levels: Option<[u16; DISCHARGE_CHANNELS]>,
    pub transition: Option<RunTransition>,
    /// Shared step index while running (before per-channel resolution).
    pub step_index: Option<u32>,
}

/// Idle/Running state machine clocked by the core-1 tick loop.
#[derive(Copy, Clone, Debug, Default)]
pub struct DischargeEngine {
    running: bool,
    cycle_start_ms: u64,
}

impl DischargeEngine {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            running: false,
            cycle_start_ms: 0,
        }
    }

    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.running
    }

    /// Advances the state machine one tick.
    ///
    /// `hardware_trigger` is the raw pin level; the effective trigger is
    /// resolved through `flags.trigger` here and nowhere else.
    pub fn tick(
        &mut self,
        program: &DischargeProgram,
        flags: DischargeFlags,
        policy: StepPolicy,
        hardware_trigger: bool,
        now_ms: u64,
        max_level: u16,
    ) -> TickOutcome {
        let trigger = flags.trigger.effective(hardware_trigger);

        if trigger && program.enabled() && !self.running {
            self.running = true;
            self.cycle_start_ms = now_ms;
            let levels = self.resolve_levels(program, flags, policy, 0);
            return TickOutcome {
                levels: Some(levels_to_hw(levels, max_level)),
                transition: Some(RunTransition::Started),
                step_index: Some(0),
            };
        }

        if !trigger && self.running {
            self.running = false;
            return TickOutcome {
                levels: Some([0; DISCHARGE_CHANNELS]),
                transition: Some(RunTransition::Stopped),
                step_index: None,
            };
        }

        if !self.running {
            return TickOutcome {
                levels: None,
                transition: None,
                step_index: None,
            };
        }

        // A disabled program can be swapped in mid-run; stop rather than
        // divide by its zero step duration.
        if !program.enabled() {
            self.running = false;
            return TickOutcome {
                levels: Some([0; DISCHARGE_CHANNELS]),
                transition: Some(RunTransition::Stopped),
                step_index: None,
            };
        }

        let elapsed_ms = now_ms.saturating_sub(self.cycle_start_ms);
        let raw_step = (elapsed_ms / u64::from(program.step_duration_ms)) as u32;
        let step = match policy {
            StepPolicy::ModuloLoop => {
                let max_steps = program.max_step_count() as u32;
                if max_steps == 0 { 0 } else { raw_step % max_steps }
            }
            StepPolicy::HoldLast => raw_step,
        };

        let levels = self.resolve_levels(program, flags, policy, step);
        TickOutcome {
            levels: Some(levels_to_hw(levels, max_level)),
            transition: None,
            step_index: Some(step),
        }
    }

    fn resolve_levels(
        &self,
        program: &DischargeProgram,
        flags: DischargeFlags,
        policy: StepPolicy,
        step: u32,
    ) -> [f32; DISCHARGE_CHANNELS] {
        let mut duties = [0.0_f32; DISCHARGE_CHANNELS];
        for (index, duty) in duties.iter_mut().enumerate() {
            let channel = program.channel(index);
            if channel.is_empty() {
                continue;
            }
            let resolved = match policy {
                StepPolicy::ModuloLoop => step as usize % channel.step_count(),
                StepPolicy::HoldLast => (step as usize).min(channel.step_count() - 1),
            };
            let programmed = channel.duty_at(resolved).unwrap_or(0.0);
            *duty = if flags.invert_output {
                1.0 - programmed
            } else {
                programmed
            };
        }
        duties
    }
}

fn levels_to_hw(duties: [f32; DISCHARGE_CHANNELS], max_level: u16) -> [u16; DISCHARGE_CHANNELS] {
    duties.map(|duty| libm::roundf(duty * f32::from(max_level)) as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOP: u16 = 1_000;

    fn program(step_ms: u32, ch1: &[f32], ch2: &[f32]) -> DischargeProgram {
        let mut builder = DischargeProgramBuilder::new(step_ms).expect("non-zero step");
        builder.extend(0, ch1.iter().copied());
        builder.extend(1, ch2.iter().copied());
        builder.finish()
    }

    fn flags_plain() -> DischargeFlags {
        DischargeFlags {
            invert_output: false,
            ..DischargeFlags::default()
        }
    }

    #[test]
    fn builder_derives_enable_and_cycle_duration() {
        let program = program(100, &[0.5, 0.7, 0.3], &[0.2, 0.9, 0.1]);
        assert!(program.enabled());
        assert_eq!(program.max_cycle_duration_ms(), 300);
        assert_eq!(program.channel(0).step_count(), 3);
        assert_eq!(program.channel(1).step_count(), 3);
    }

    #[test]
    fn out_of_range_duties_drop_without_aborting() {
        let mut builder = DischargeProgramBuilder::new(50).expect("non-zero step");
        builder.extend(0, [0.5, 1.5, -0.2, 0.8]);
        assert_eq!(builder.dropped(), 2);
        let program = builder.finish();
        assert_eq!(program.channel(0).step_count(), 2);
        assert_eq!(program.channel(0).duty_at(1), Some(0.8));
    }

    #[test]
    fn zero_step_duration_rejected_wholesale() {
        assert_eq!(
            DischargeProgramBuilder::new(0).err(),
            Some(SequenceError::ZeroStepDuration)
        );
    }

    #[test]
    fn streaming_load_matches_single_shot() {
        let single = program(100, &[0.5, 0.7, 0.3], &[0.2, 0.9, 0.1]);

        let mut loader = StreamingLoader::new();
        loader.begin(100).expect("inactive loader");
        loader.feed(0.5, Some(0.2)).expect("active loader");
        loader.feed(0.7, Some(0.9)).expect("active loader");
        loader.feed(0.3, Some(0.1)).expect("active loader");
        let (streamed, dropped) = loader.end().expect("active loader");

        assert_eq!(dropped, 0);
        assert_eq!(single, streamed);
        assert_eq!(streamed.enabled(), single.enabled());
        assert_eq!(
            streamed.max_cycle_duration_ms(),
            single.max_cycle_duration_ms()
        );
    }

    #[test]
    fn streaming_counts_rejected_values() {
        let mut loader = StreamingLoader::new();
        loader.begin(50).expect("inactive loader");
        loader.feed(0.5, Some(1.5)).expect("active loader");
        loader.feed(-0.2, Some(0.4)).expect("active loader");
        let (program, dropped) = loader.end().expect("active loader");

        assert_eq!(dropped, 2);
        assert_eq!(program.channel(0).step_count(), 1);
        assert_eq!(program.channel(1).step_count(), 1);
    }

    #[test]
    fn streaming_guards_against_misuse() {
        let mut loader = StreamingLoader::new();
        assert_eq!(loader.feed(0.5, None), Err(SequenceError::LoaderInactive));
        assert_eq!(loader.end().err(), Some(SequenceError::LoaderInactive));
        loader.begin(10).expect("inactive loader");
        assert_eq!(loader.begin(10), Err(SequenceError::LoaderActive));
        assert_eq!(loader.begin(0), Err(SequenceError::LoaderActive));
    }

    #[test]
    fn trigger_edge_starts_and_stops_the_run() {
        let program = program(100, &[0.5, 0.7], &[0.2, 0.9]);
        let mut engine = DischargeEngine::new();
        let flags = flags_plain();

        let idle = engine.tick(&program, flags, StepPolicy::ModuloLoop, false, 0, TOP);
        assert_eq!(idle.levels, None);
        assert!(!engine.is_running());

        let started = engine.tick(&program, flags, StepPolicy::ModuloLoop, true, 10, TOP);
        assert_eq!(started.transition, Some(RunTransition::Started));
        assert_eq!(started.step_index, Some(0));
        assert_eq!(started.levels, Some([500, 200]));
        assert!(engine.is_running());

        let stopped = engine.tick(&program, flags, StepPolicy::ModuloLoop, false, 20, TOP);
        assert_eq!(stopped.transition, Some(RunTransition::Stopped));
        assert_eq!(stopped.levels, Some([0, 0]));
        assert!(!engine.is_running());
    }

    #[test]
    fn disabled_program_never_starts() {
        let mut engine = DischargeEngine::new();
        let outcome = engine.tick(
            &DischargeProgram::disabled(),
            flags_plain(),
            StepPolicy::ModuloLoop,
            true,
            0,
            TOP,
        );
        assert_eq!(outcome.levels, None);
        assert!(!engine.is_running());
    }

    #[test]
    fn swapping_in_a_disabled_program_stops_the_run() {
        let enabled = program(100, &[0.5, 0.7], &[0.2, 0.9]);
        let mut engine = DischargeEngine::new();
        let flags = flags_plain();

        engine.tick(&enabled, flags, StepPolicy::ModuloLoop, true, 0, TOP);
        assert!(engine.is_running());

        let outcome = engine.tick(
            &DischargeProgram::disabled(),
            flags,
            StepPolicy::ModuloLoop,
            true,
            50,
            TOP,
        );
        assert_eq!(outcome.transition, Some(RunTransition::Stopped));
        assert_eq!(outcome.levels, Some([0, 0]));
        assert!(!engine.is_running());
    }

    #[test]
    fn step_advances_with_wall_clock_under_both_policies() {
        // 100 ms steps, trigger at t=0, sample at t=150 ms.
        let program = program(100, &[0.5, 0.7, 0.3], &[0.2, 0.9, 0.1]);
        let flags = flags_plain();

        for policy in [StepPolicy::ModuloLoop, StepPolicy::HoldLast] {
            let mut engine = DischargeEngine::new();
            engine.tick(&program, flags, policy, true, 0, TOP);
            let outcome = engine.tick(&program, flags, policy, true, 150, TOP);
            assert_eq!(outcome.step_index, Some(1), "policy {policy:?}");
            assert_eq!(outcome.levels, Some([700, 900]), "policy {policy:?}");
        }
    }

    #[test]
    fn modulo_policy_wraps_after_the_longest_channel() {
        let program = program(100, &[0.5, 0.7, 0.3], &[0.2, 0.9, 0.1]);
        let flags = flags_plain();
        let mut engine = DischargeEngine::new();
        engine.tick(&program, flags, StepPolicy::ModuloLoop, true, 0, TOP);

        let outcome = engine.tick(&program, flags, StepPolicy::ModuloLoop, true, 350, TOP);
        assert_eq!(outcome.step_index, Some(0));
        assert_eq!(outcome.levels, Some([500, 200]));
    }

    #[test]
    fn hold_last_clamps_each_channel_independently() {
        let program = program(100, &[0.5, 0.7, 0.3], &[0.2]);
        let flags = flags_plain();
        let mut engine = DischargeEngine::new();
        engine.tick(&program, flags, StepPolicy::HoldLast, true, 0, TOP);

        // Past both sequence ends: channel 1 holds 0.3, channel 2 holds 0.2.
        let outcome = engine.tick(&program, flags, StepPolicy::HoldLast, true, 950, TOP);
        assert_eq!(outcome.levels, Some([300, 200]));
    }

    #[test]
    fn inversion_flips_the_applied_level() {
        let program = program(100, &[0.8], &[0.8]);
        let flags = DischargeFlags {
            invert_output: true,
            ..DischargeFlags::default()
        };
        let mut engine = DischargeEngine::new();
        let outcome = engine.tick(&program, flags, StepPolicy::HoldLast, true, 0, TOP);
        // Programmed 0.8 drives the complement, 0.2 of full scale.
        let levels = outcome.levels.expect("running");
        assert!((i32::from(levels[0]) - 200).abs() <= 1);
    }

    #[test]
    fn debug_override_replaces_hardware_trigger_uniformly() {
        let program = program(100, &[0.5], &[0.5]);
        let mut flags = flags_plain();
        flags.trigger.set_debug_mode(true);
        flags.trigger.set_manual(true).expect("debug mode");

        let mut engine = DischargeEngine::new();
        // Hardware pin low, manual override high: engine starts anyway.
        let outcome = engine.tick(&program, flags, StepPolicy::ModuloLoop, false, 0, TOP);
        assert_eq!(outcome.transition, Some(RunTransition::Started));
    }

    #[test]
    fn retrigger_restarts_from_step_zero() {
        let program = program(100, &[0.5, 0.7], &[0.2, 0.9]);
        let flags = flags_plain();
        let mut engine = DischargeEngine::new();

        engine.tick(&program, flags, StepPolicy::ModuloLoop, true, 0, TOP);
        engine.tick(&program, flags, StepPolicy::ModuloLoop, true, 150, TOP);
        engine.tick(&program, flags, StepPolicy::ModuloLoop, false, 200, TOP);

        let restarted = engine.tick(&program, flags, StepPolicy::ModuloLoop, true, 5_000, TOP);
        assert_eq!(restarted.transition, Some(RunTransition::Started));
        assert_eq!(restarted.step_index, Some(0));
        assert_eq!(restarted.levels, Some([500, 200]));
    }
}
