use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::{Duration, Instant as HostInstant};

use converter_core::discharge::{DischargeEngine, RunTransition, StepPolicy};
use converter_core::repl::commands::{
    CommandExecutor, CommandOutcome, ConsoleInputs, DischargeStatusReport, SequenceAck,
};
use converter_core::repl::status::{
    HELP_TEXT, StatusFormatter, StatusSnapshot, write_sensor_lines, write_trigger_status,
};
use converter_core::supervisor::{RawReadings, Supervisor};
use converter_core::trigger::TriggerStatus;
use converter_core::waveform::{WaveformProgram, WaveformSink};

/// Emulated system clock handed to the waveform planner.
const SYSTEM_CLOCK_HZ: u32 = 125_000_000;

/// Compare-level full scale used for discharge output reporting.
const LEVEL_FULL_SCALE: u16 = 1_000;

/// Virtual milliseconds between supervisor sensor polls.
const POLL_INTERVAL_MS: u64 = 100;

const SIM_HELP: &str = "\
sim commands:
  sim seq 0|1           set the sequencer trigger pad
  sim dc 0|1            set the discharge trigger pad
  sim adc <1-3> <raw>   set a current-sense ADC count (0-4095)
  sim temp <1-4> <c>    set a thermocouple temperature in Celsius
  sim temp <1-4> fault  fault a thermocouple
  sim tick <ms>         advance the virtual clock
";

/// Sink that keeps every committed waveform program for inspection.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub commits: Vec<WaveformProgram>,
}

impl WaveformSink for RecordingSink {
    fn commit(&mut self, program: &WaveformProgram) {
        self.commits.push(*program);
    }
}

/// Simulated pad levels and sensor inputs.
#[derive(Debug)]
struct SimulatedInputs {
    sequencer_pin: bool,
    discharge_pin: bool,
    adc_counts: [u16; 3],
    /// `None` renders as a faulted thermocouple frame.
    temperatures_c: [Option<f32>; 4],
}

impl SimulatedInputs {
    fn new() -> Self {
        Self {
            sequencer_pin: false,
            discharge_pin: false,
            adc_counts: [0; 3],
            temperatures_c: [Some(25.0); 4],
        }
    }

    fn raw_readings(&self) -> RawReadings {
        let mut thermocouple_frames = [0_u32; 4];
        for (frame, reading) in thermocouple_frames.iter_mut().zip(&self.temperatures_c) {
            *frame = match reading {
                Some(celsius) => encode_thermocouple(*celsius),
                None => 0x0001_0001,
            };
        }
        RawReadings {
            adc_counts: self.adc_counts,
            thermocouple_frames,
        }
    }
}

/// MAX31855K frame for a healthy reading: quarter-degree counts in the
/// 14-bit field at bit 18, fault bits clear.
fn encode_thermocouple(celsius: f32) -> u32 {
    let quarters = (celsius * 4.0).round() as i32;
    ((quarters & 0x3FFF) as u32) << 18
}

pub struct Session {
    executor: CommandExecutor,
    sink: RecordingSink,
    engine: DischargeEngine,
    supervisor: Supervisor,
    sim: SimulatedInputs,
    discharge_running: bool,
    /// Virtual clock, advanced only by `sim tick`.
    now_ms: u64,
    next_poll_ms: u64,
    transcript: TranscriptLogger,
    started_at: HostInstant,
}

impl Session {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            executor: CommandExecutor::new(SYSTEM_CLOCK_HZ, StepPolicy::default()),
            sink: RecordingSink::default(),
            engine: DischargeEngine::new(),
            supervisor: Supervisor::new(),
            sim: SimulatedInputs::new(),
            discharge_running: false,
            now_ms: 0,
            next_poll_ms: 0,
            transcript: TranscriptLogger::new()?,
            started_at: HostInstant::now(),
        })
    }

    pub fn handle_command(&mut self, line: &str) -> io::Result<Vec<String>> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }

        let elapsed = self.started_at.elapsed();
        self.transcript
            .append_line(elapsed, TranscriptRole::Host, trimmed)?;

        let lines = if let Some(rest) = strip_keyword(trimmed, "sim") {
            self.handle_sim(rest)
        } else {
            self.handle_console(trimmed)
        };

        for output in &lines {
            self.transcript
                .append_line(elapsed, TranscriptRole::Emulator, output)?;
        }
        Ok(lines)
    }

    /// Runs a line through the same executor the firmware console uses.
    fn handle_console(&mut self, line: &str) -> Vec<String> {
        let inputs = ConsoleInputs {
            sequencer_pin: self.sim.sequencer_pin,
            discharge_pin: self.sim.discharge_pin,
            discharge_running: self.discharge_running,
        };

        let outcome = match self
            .executor
            .execute(line, inputs, self.supervisor.latch(), &mut self.sink)
        {
            Ok(outcome) => outcome,
            Err(err) => return vec![format!("error: {err}")],
        };

        match outcome {
            CommandOutcome::WaveformUpdated(program) => vec![format!(
                "waveform committed: freq={:.2}Hz divider={:.2} cycles={}",
                program.effective_hz, program.clock_divider, program.total_cycles,
            )],
            CommandOutcome::TcAutoPrint(enabled) => {
                vec![format!("tc auto print {}", on_off(enabled))]
            }
            CommandOutcome::ThermalCsvRequested => {
                let mut csv = String::new();
                let _ = self.supervisor.thermal_log().write_csv(&mut csv);
                csv.lines().map(str::to_string).collect()
            }
            CommandOutcome::TemperaturesRequested => {
                let mut out = String::new();
                let _ = write_sensor_lines(&mut out, &self.sim_sample());
                out.lines().map(str::to_string).collect()
            }
            CommandOutcome::SequencerDebug(enabled) => {
                if enabled {
                    // Debug mode takes over the pad, starting low.
                    self.sim.sequencer_pin = false;
                }
                vec![format!("sequencer debug {}", on_off(enabled))]
            }
            CommandOutcome::SequencerTrigger(level) => {
                self.sim.sequencer_pin = level;
                vec![format!("sequencer trigger {}", active_inactive(level))]
            }
            CommandOutcome::SequencerTriggerStatus(status)
            | CommandOutcome::DischargeTriggerStatus(status) => {
                let mut out = String::new();
                let _ = write_trigger_status(&mut out, &status);
                vec![out]
            }
            CommandOutcome::RelaySet(closed) => {
                vec![format!("relay {}", if closed { "closed" } else { "open" })]
            }
            CommandOutcome::SequenceProgrammed(ack) | CommandOutcome::StreamingFinished(ack) => {
                vec![sequence_ack_line(&ack)]
            }
            CommandOutcome::StreamingStarted { step_duration_ms } => vec![format!(
                "streaming sequence data at {step_duration_ms}ms per step; DC_CSV_END to finish",
            )],
            CommandOutcome::StreamingLineStored => Vec::new(),
            CommandOutcome::DischargeDebug(enabled) => {
                vec![format!("discharge debug {}", on_off(enabled))]
            }
            CommandOutcome::DischargeTrigger(level) => {
                vec![format!("discharge trigger {}", active_inactive(level))]
            }
            CommandOutcome::DischargeVerbose(enabled) => {
                vec![format!("discharge verbose {}", on_off(enabled))]
            }
            CommandOutcome::DischargeInvert(enabled) => {
                vec![format!("discharge invert {}", on_off(enabled))]
            }
            CommandOutcome::DischargeStatus(report) => {
                let snapshot = self.snapshot(inputs, report);
                let mut out = String::new();
                let _ = StatusFormatter::new(&snapshot).write_discharge_line(&mut out);
                vec![out]
            }
            CommandOutcome::StatusRequested => {
                let report = self.discharge_report();
                let snapshot = self.snapshot(inputs, report);
                let mut out = String::new();
                let _ = StatusFormatter::new(&snapshot).write_all(&mut out);
                out.lines().map(str::to_string).collect()
            }
            CommandOutcome::Help => HELP_TEXT.lines().map(str::to_string).collect(),
        }
    }

    fn handle_sim(&mut self, rest: &str) -> Vec<String> {
        let mut parts = rest.split_whitespace();
        match parts.next() {
            Some("seq") => match parse_switch(parts.next()) {
                Some(level) => {
                    self.sim.sequencer_pin = level;
                    vec![format!("sequencer pad {}", high_low(level))]
                }
                None => vec!["usage: sim seq 0|1".to_string()],
            },
            Some("dc") => match parse_switch(parts.next()) {
                Some(level) => {
                    self.sim.discharge_pin = level;
                    vec![format!("discharge pad {}", high_low(level))]
                }
                None => vec!["usage: sim dc 0|1".to_string()],
            },
            Some("adc") => {
                let channel = parts.next().and_then(|v| v.parse::<usize>().ok());
                let counts = parts.next().and_then(|v| v.parse::<u16>().ok());
                match (channel, counts) {
                    (Some(channel @ 1..=3), Some(counts)) if counts <= 4_095 => {
                        self.sim.adc_counts[channel - 1] = counts;
                        vec![format!("adc channel {channel} = {counts} counts")]
                    }
                    _ => vec!["usage: sim adc <1-3> <0-4095>".to_string()],
                }
            }
            Some("temp") => {
                let channel = parts.next().and_then(|v| v.parse::<usize>().ok());
                let value = parts.next();
                match (channel, value) {
                    (Some(channel @ 1..=4), Some("fault")) => {
                        self.sim.temperatures_c[channel - 1] = None;
                        vec![format!("thermocouple {channel} faulted")]
                    }
                    (Some(channel @ 1..=4), Some(text)) => match text.parse::<f32>() {
                        Ok(celsius) => {
                            self.sim.temperatures_c[channel - 1] = Some(celsius);
                            vec![format!("thermocouple {channel} = {celsius:.2} C")]
                        }
                        Err(_) => vec!["usage: sim temp <1-4> <celsius|fault>".to_string()],
                    },
                    _ => vec!["usage: sim temp <1-4> <celsius|fault>".to_string()],
                }
            }
            Some("tick") => match parts.next().and_then(|v| v.parse::<u64>().ok()) {
                Some(ms) if ms > 0 => self.advance(ms),
                _ => vec!["usage: sim tick <ms>".to_string()],
            },
            _ => SIM_HELP.lines().map(str::to_string).collect(),
        }
    }

    /// Advances the virtual clock millisecond by millisecond, mirroring the
    /// firmware's core-1 tick loop and 10 Hz supervisor poll. Reports level
    /// changes, run transitions, and trips as they happen.
    fn advance(&mut self, ms: u64) -> Vec<String> {
        let mut lines = Vec::new();
        let mut last_levels = None;

        for _ in 0..ms {
            self.now_ms += 1;

            if self.now_ms >= self.next_poll_ms {
                self.next_poll_ms = self.now_ms + POLL_INTERVAL_MS;
                let report = self.supervisor.poll(&self.sim.raw_readings(), self.now_ms);
                if let Some(event) = report.tripped {
                    lines.push(format!("t=+{}ms TRIP: {event}", self.now_ms));
                    lines.push("outputs forced safe, relay opened".to_string());
                }
            }

            if self.supervisor.latch().is_latched() {
                if self.discharge_running {
                    self.discharge_running = false;
                    lines.push(format!("t=+{}ms discharge forced off", self.now_ms));
                }
                continue;
            }

            let outcome = self.engine.tick(
                self.executor.discharge_program(),
                self.executor.discharge_flags(),
                self.executor.step_policy(),
                self.sim.discharge_pin,
                self.now_ms,
                LEVEL_FULL_SCALE,
            );
            self.discharge_running = self.engine.is_running();

            match outcome.transition {
                Some(RunTransition::Started) => {
                    lines.push(format!("t=+{}ms discharge run started", self.now_ms));
                }
                Some(RunTransition::Stopped) => {
                    lines.push(format!("t=+{}ms discharge run stopped", self.now_ms));
                }
                None => {}
            }
            if let Some(levels) = outcome.levels
                && last_levels != Some(levels)
            {
                lines.push(format!(
                    "t=+{}ms levels {}/{} of {}",
                    self.now_ms, levels[0], levels[1], LEVEL_FULL_SCALE,
                ));
                last_levels = Some(levels);
            }
        }

        lines.push(format!("clock at {} ms", self.now_ms));
        lines
    }

    /// Converted sample from the current simulated inputs, without running
    /// a supervisor poll.
    fn sim_sample(&self) -> converter_core::protection::SensorSample {
        self.supervisor.preview(&self.sim.raw_readings())
    }

    fn discharge_report(&self) -> DischargeStatusReport {
        let program = self.executor.discharge_program();
        DischargeStatusReport {
            step_duration_ms: program.step_duration_ms(),
            channel_1_steps: program.channel(0).step_count(),
            channel_2_steps: program.channel(1).step_count(),
            enabled: program.enabled(),
            running: self.discharge_running,
            invert_output: self.executor.discharge_flags().invert_output,
        }
    }

    fn snapshot(&self, inputs: ConsoleInputs, discharge: DischargeStatusReport) -> StatusSnapshot {
        StatusSnapshot {
            waveform: self.executor.committed_waveform().copied(),
            discharge,
            sequencer_trigger: TriggerStatus::capture(
                self.executor.sequencer_trigger(),
                inputs.sequencer_pin,
            ),
            discharge_trigger: TriggerStatus::capture(
                self.executor.discharge_flags().trigger,
                inputs.discharge_pin,
            ),
            relay_closed: self.executor.relay_closed(),
            sensors: Some(self.sim_sample()),
            latched: self.supervisor.latch().is_latched(),
        }
    }
}

fn strip_keyword<'a>(line: &'a str, keyword: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(keyword)?;
    if rest.is_empty() {
        Some(rest)
    } else {
        rest.strip_prefix(char::is_whitespace)
    }
}

fn parse_switch(token: Option<&str>) -> Option<bool> {
    match token {
        Some("0") => Some(false),
        Some("1") => Some(true),
        _ => None,
    }
}

fn sequence_ack_line(ack: &SequenceAck) -> String {
    format!(
        "sequence loaded: step={}ms ch1={} ch2={} dropped={}",
        ack.step_duration_ms, ack.channel_1_steps, ack.channel_2_steps, ack.dropped,
    )
}

fn on_off(value: bool) -> &'static str {
    if value { "on" } else { "off" }
}

fn active_inactive(value: bool) -> &'static str {
    if value { "ACTIVE" } else { "INACTIVE" }
}

fn high_low(value: bool) -> &'static str {
    if value { "HIGH" } else { "LOW" }
}

#[derive(Clone, Copy)]
enum TranscriptRole {
    Host,
    Emulator,
}

impl TranscriptRole {
    fn prefix(self) -> &'static str {
        match self {
            TranscriptRole::Host => ">>",
            TranscriptRole::Emulator => "<<",
        }
    }
}

struct TranscriptLogger {
    writer: BufWriter<std::fs::File>,
}

impl TranscriptLogger {
    const LOG_PATH: &'static str = "logs/emulator-session.log";

    fn new() -> io::Result<Self> {
        let path = Path::new(Self::LOG_PATH);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut logger = Self {
            writer: BufWriter::new(file),
        };
        logger.write_header()?;
        Ok(logger)
    }

    fn write_header(&mut self) -> io::Result<()> {
        writeln!(self.writer, "# Converter Controller Emulator transcript")?;
        writeln!(
            self.writer,
            "# Timestamps are milliseconds since session start"
        )?;
        writeln!(self.writer)?;
        self.writer.flush()
    }

    fn append_line(
        &mut self,
        elapsed: Duration,
        role: TranscriptRole,
        line: &str,
    ) -> io::Result<()> {
        writeln!(
            self.writer,
            "[+{:>6} ms] {} {}",
            elapsed.as_millis(),
            role.prefix(),
            line
        )?;
        self.writer.flush()
    }
}
