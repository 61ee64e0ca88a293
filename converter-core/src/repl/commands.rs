//! High-level console command dispatcher.
//!
//! Glues the parsed grammar to the waveform planner, discharge sequence
//! state, and trigger overrides. It stays `no_std` friendly so the firmware
//! and emulator crates share the same implementation; the targets supply a
//! [`WaveformSink`] for hardware commits and render the returned outcomes.

use core::fmt;

use crate::discharge::{
    DischargeFlags, DischargeProgram, DischargeProgramBuilder, SequenceError, StepPolicy,
    StreamingLoader,
};
use crate::shutdown::{ShutdownLatch, ShutdownLatched};
use crate::trigger::{TriggerOverride, TriggerStatus};
use crate::waveform::{PhaseSequencer, WaveformConfig, WaveformError, WaveformProgram, WaveformSink};

use super::grammar::{self, Command};

/// Live inputs the executor cannot know on its own.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ConsoleInputs {
    /// Raw sequencer trigger pin level.
    pub sequencer_pin: bool,
    /// Raw discharge trigger pin level.
    pub discharge_pin: bool,
    /// Whether the discharge engine is currently mid-run.
    pub discharge_running: bool,
}

/// Summary returned after a sequence was (re)programmed.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SequenceAck {
    pub step_duration_ms: u32,
    pub channel_1_steps: usize,
    pub channel_2_steps: usize,
    /// Values rejected for being outside [0, 1].
    pub dropped: usize,
}

/// Snapshot rendered for `DC_STATUS`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DischargeStatusReport {
    pub step_duration_ms: u32,
    pub channel_1_steps: usize,
    pub channel_2_steps: usize,
    pub enabled: bool,
    pub running: bool,
    pub invert_output: bool,
}

/// Command execution successes. Variants carry what the caller needs to
/// publish to hardware or render as a reply.
#[derive(Clone, Debug, PartialEq)]
pub enum CommandOutcome {
    /// New waveform committed; carries the planned program for reporting.
    WaveformUpdated(WaveformProgram),
    TcAutoPrint(bool),
    /// Caller renders the thermal log CSV.
    ThermalCsvRequested,
    /// Caller renders the latest temperatures.
    TemperaturesRequested,
    SequencerDebug(bool),
    SequencerTrigger(bool),
    SequencerTriggerStatus(TriggerStatus),
    RelaySet(bool),
    /// Whole-line sequence programming finished; the new program is already
    /// installed and must be republished to the discharge engine.
    SequenceProgrammed(SequenceAck),
    StreamingStarted { step_duration_ms: u32 },
    /// A data line was absorbed while streaming input is active.
    StreamingLineStored,
    /// Streaming finished and the program installed.
    StreamingFinished(SequenceAck),
    DischargeDebug(bool),
    DischargeTrigger(bool),
    DischargeTriggerStatus(TriggerStatus),
    DischargeVerbose(bool),
    DischargeInvert(bool),
    DischargeStatus(DischargeStatusReport),
    /// Caller renders the full controller status.
    StatusRequested,
    Help,
}

/// Errors surfaced while executing a command.
#[derive(Clone, Debug, PartialEq)]
pub enum CommandError {
    Parse(grammar::ParseError),
    Waveform(WaveformError),
    Sequence(SequenceError),
    /// Manual trigger writes require debug mode first.
    DebugModeRequired,
    /// The shutdown latch refuses everything except the thermal log dump.
    Latched(ShutdownLatched),
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::Parse(err) => err.fmt(f),
            CommandError::Waveform(err) => err.fmt(f),
            CommandError::Sequence(err) => err.fmt(f),
            CommandError::DebugModeRequired => {
                f.write_str("debug mode required for manual trigger")
            }
            CommandError::Latched(err) => err.fmt(f),
        }
    }
}

impl From<grammar::ParseError> for CommandError {
    fn from(err: grammar::ParseError) -> Self {
        CommandError::Parse(err)
    }
}

impl From<WaveformError> for CommandError {
    fn from(err: WaveformError) -> Self {
        CommandError::Waveform(err)
    }
}

impl From<SequenceError> for CommandError {
    fn from(err: SequenceError) -> Self {
        CommandError::Sequence(err)
    }
}

/// Dispatches console commands against the controller's configuration state.
pub struct CommandExecutor {
    system_clock_hz: u32,
    step_policy: StepPolicy,
    sequencer: PhaseSequencer,
    sequencer_trigger: TriggerOverride,
    discharge_program: DischargeProgram,
    discharge_flags: DischargeFlags,
    loader: StreamingLoader,
    tc_auto_print: bool,
    relay_closed: bool,
}

impl CommandExecutor {
    #[must_use]
    pub fn new(system_clock_hz: u32, step_policy: StepPolicy) -> Self {
        Self {
            system_clock_hz,
            step_policy,
            sequencer: PhaseSequencer::new(),
            sequencer_trigger: TriggerOverride::new(),
            discharge_program: DischargeProgram::disabled(),
            discharge_flags: DischargeFlags::default(),
            loader: StreamingLoader::new(),
            tc_auto_print: false,
            relay_closed: false,
        }
    }

    #[must_use]
    pub fn discharge_program(&self) -> &DischargeProgram {
        &self.discharge_program
    }

    #[must_use]
    pub fn discharge_flags(&self) -> DischargeFlags {
        self.discharge_flags
    }

    #[must_use]
    pub fn step_policy(&self) -> StepPolicy {
        self.step_policy
    }

    #[must_use]
    pub fn sequencer_trigger(&self) -> TriggerOverride {
        self.sequencer_trigger
    }

    #[must_use]
    pub fn committed_waveform(&self) -> Option<&WaveformProgram> {
        self.sequencer.current()
    }

    #[must_use]
    pub fn tc_auto_print(&self) -> bool {
        self.tc_auto_print
    }

    #[must_use]
    pub fn relay_closed(&self) -> bool {
        self.relay_closed
    }

    #[must_use]
    pub fn streaming_active(&self) -> bool {
        self.loader.is_active()
    }

    /// Parses and executes one console line.
    ///
    /// While streaming input is active every line except the terminator is
    /// treated as sequence data. A latched controller services only the
    /// thermal log dump.
    pub fn execute<S: WaveformSink>(
        &mut self,
        line: &str,
        inputs: ConsoleInputs,
        latch: &ShutdownLatch,
        sink: &mut S,
    ) -> Result<CommandOutcome, CommandError> {
        if self.loader.is_active() && !is_streaming_terminator(line) {
            latch.ensure_operational().map_err(CommandError::Latched)?;
            let (channel_1, channel_2) = grammar::parse_duty_pair(line)?;
            self.loader.feed(channel_1, channel_2)?;
            return Ok(CommandOutcome::StreamingLineStored);
        }

        let command = grammar::parse(line)?;

        if !matches!(command, Command::TcCsv) {
            latch.ensure_operational().map_err(CommandError::Latched)?;
        }

        self.dispatch(command, inputs, sink)
    }

    fn dispatch<S: WaveformSink>(
        &mut self,
        command: Command,
        inputs: ConsoleInputs,
        sink: &mut S,
    ) -> Result<CommandOutcome, CommandError> {
        match command {
            Command::Frequency {
                frequency_hz,
                duty_pair_a,
                duty_pair_b,
            } => {
                let config = WaveformConfig {
                    frequency_hz,
                    duty_pair_a,
                    duty_pair_b,
                };
                let program = self.sequencer.configure(config, self.system_clock_hz, sink)?;
                Ok(CommandOutcome::WaveformUpdated(*program))
            }
            Command::TcAutoPrint(enabled) => {
                self.tc_auto_print = enabled;
                Ok(CommandOutcome::TcAutoPrint(enabled))
            }
            Command::TcCsv => Ok(CommandOutcome::ThermalCsvRequested),
            Command::TcNow => Ok(CommandOutcome::TemperaturesRequested),
            Command::SequencerDebug(enabled) => {
                self.sequencer_trigger.set_debug_mode(enabled);
                Ok(CommandOutcome::SequencerDebug(enabled))
            }
            Command::SequencerTrigger(level) => {
                self.sequencer_trigger
                    .set_manual(level)
                    .map_err(|_| CommandError::DebugModeRequired)?;
                Ok(CommandOutcome::SequencerTrigger(level))
            }
            Command::SequencerTriggerStatus => Ok(CommandOutcome::SequencerTriggerStatus(
                TriggerStatus::capture(self.sequencer_trigger, inputs.sequencer_pin),
            )),
            Command::Relay(closed) => {
                self.relay_closed = closed;
                Ok(CommandOutcome::RelaySet(closed))
            }
            Command::DischargeStep {
                step_ms,
                channel_1,
                channel_2,
            } => {
                let mut builder = DischargeProgramBuilder::new(step_ms)?;
                builder.extend(0, channel_1.iter().copied());
                builder.extend(1, channel_2.iter().copied());
                let dropped = builder.dropped();
                self.discharge_program = builder.finish();
                Ok(CommandOutcome::SequenceProgrammed(
                    self.sequence_ack(dropped),
                ))
            }
            Command::DischargeCsvBegin { step_ms } => {
                self.loader.begin(step_ms)?;
                Ok(CommandOutcome::StreamingStarted {
                    step_duration_ms: step_ms,
                })
            }
            Command::DischargeCsvEnd => {
                let (program, dropped) = self.loader.end()?;
                self.discharge_program = program;
                Ok(CommandOutcome::StreamingFinished(self.sequence_ack(dropped)))
            }
            Command::DischargeDebug(enabled) => {
                self.discharge_flags.trigger.set_debug_mode(enabled);
                Ok(CommandOutcome::DischargeDebug(enabled))
            }
            Command::DischargeTrigger(level) => {
                self.discharge_flags
                    .trigger
                    .set_manual(level)
                    .map_err(|_| CommandError::DebugModeRequired)?;
                Ok(CommandOutcome::DischargeTrigger(level))
            }
            Command::DischargeTriggerStatus => Ok(CommandOutcome::DischargeTriggerStatus(
                TriggerStatus::capture(self.discharge_flags.trigger, inputs.discharge_pin),
            )),
            Command::DischargeVerbose(enabled) => {
                self.discharge_flags.verbose = enabled;
                Ok(CommandOutcome::DischargeVerbose(enabled))
            }
            Command::DischargeInvert(enabled) => {
                self.discharge_flags.invert_output = enabled;
                Ok(CommandOutcome::DischargeInvert(enabled))
            }
            Command::DischargeStatus => Ok(CommandOutcome::DischargeStatus(
                DischargeStatusReport {
                    step_duration_ms: self.discharge_program.step_duration_ms(),
                    channel_1_steps: self.discharge_program.channel(0).step_count(),
                    channel_2_steps: self.discharge_program.channel(1).step_count(),
                    enabled: self.discharge_program.enabled(),
                    running: inputs.discharge_running,
                    invert_output: self.discharge_flags.invert_output,
                },
            )),
            Command::Status => Ok(CommandOutcome::StatusRequested),
            Command::Help => Ok(CommandOutcome::Help),
        }
    }

    fn sequence_ack(&self, dropped: usize) -> SequenceAck {
        SequenceAck {
            step_duration_ms: self.discharge_program.step_duration_ms(),
            channel_1_steps: self.discharge_program.channel(0).step_count(),
            channel_2_steps: self.discharge_program.channel(1).step_count(),
            dropped,
        }
    }
}

fn is_streaming_terminator(line: &str) -> bool {
    line.trim().eq_ignore_ascii_case("DC_CSV_END")
}
