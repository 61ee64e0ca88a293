//! Shared status surface for the console.
//!
//! The firmware and emulator assemble a [`StatusSnapshot`] from their live
//! state and render it through [`StatusFormatter`], keeping the textual
//! output identical across front-ends.

use core::fmt;

use crate::protection::SensorSample;
use crate::trigger::TriggerStatus;
use crate::waveform::WaveformProgram;

use super::commands::DischargeStatusReport;

/// Console help text listing every accepted command.
pub const HELP_TEXT: &str = "\
commands:
  FREQ <hz> <duty_a> [<duty_b>]   reprogram the 4-phase waveform
  SEQ_DEBUG 0|1                   enable manual sequencer trigger
  SEQ_TRIGGER 0|1                 drive the sequencer trigger (debug mode)
  SEQ_TRIGGER_STATUS              show sequencer trigger resolution
  DC_STEP <ms> [CH1 d...] [CH2 d...]  program a discharge sequence
  DC_CSV <ms> / DC_CSV_END        stream a sequence one line at a time
  DC_DEBUG 0|1, DC_TRIGGER 0|1    discharge trigger override
  DC_TRIGGER_STATUS, DC_STATUS    discharge state
  DC_VERBOSE 0|1, DC_INVERT 0|1   discharge output flags
  TC_NOW, TC_CSV, TC_ON 0|1       temperatures and thermal log
  RELAY 0|1                       output relay
  STATUS, HELP
";

/// Snapshot of controller state surfaced by the `STATUS` command.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StatusSnapshot {
    pub waveform: Option<WaveformProgram>,
    pub discharge: DischargeStatusReport,
    pub sequencer_trigger: TriggerStatus,
    pub discharge_trigger: TriggerStatus,
    pub relay_closed: bool,
    /// Last converted sensor poll, if one has happened yet.
    pub sensors: Option<SensorSample>,
    pub latched: bool,
}

/// Renders a [`StatusSnapshot`] into human-readable lines.
#[derive(Clone, Copy, Debug)]
pub struct StatusFormatter<'a> {
    snapshot: &'a StatusSnapshot,
}

impl<'a> StatusFormatter<'a> {
    #[must_use]
    pub const fn new(snapshot: &'a StatusSnapshot) -> Self {
        Self { snapshot }
    }

    /// Writes the full multi-line status block.
    pub fn write_all<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        self.write_waveform_line(writer)?;
        writer.write_char('\n')?;
        self.write_discharge_line(writer)?;
        writer.write_char('\n')?;
        self.write_trigger_line(writer)?;
        writer.write_char('\n')?;
        if let Some(sample) = &self.snapshot.sensors {
            write_sensor_lines(writer, sample)?;
        }
        self.write_protection_line(writer)?;
        writer.write_char('\n')
    }

    /// Writes the waveform line (e.g. `waveform freq=100000.00Hz ...`).
    pub fn write_waveform_line<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        match &self.snapshot.waveform {
            Some(program) => write!(
                writer,
                "waveform freq={:.2}Hz duty_a={:.2} duty_b={:.2} divider={:.2} cycles={}",
                program.effective_hz,
                program.config.duty_pair_a,
                program.config.duty_pair_b,
                program.clock_divider,
                program.total_cycles,
            ),
            None => writer.write_str("waveform unconfigured"),
        }
    }

    /// Writes the discharge line (e.g. `discharge step=100ms ch1=3 ...`).
    pub fn write_discharge_line<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        let report = &self.snapshot.discharge;
        write!(
            writer,
            "discharge step={}ms ch1={} ch2={} enabled={} running={} invert={}",
            report.step_duration_ms,
            report.channel_1_steps,
            report.channel_2_steps,
            yes_no(report.enabled),
            yes_no(report.running),
            on_off(report.invert_output),
        )
    }

    /// Writes the trigger/relay line.
    pub fn write_trigger_line<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        write!(
            writer,
            "triggers seq={} dc={} relay={}",
            active_inactive(self.snapshot.sequencer_trigger.effective),
            active_inactive(self.snapshot.discharge_trigger.effective),
            if self.snapshot.relay_closed {
                "closed"
            } else {
                "open"
            },
        )
    }

    /// Writes the protection line.
    pub fn write_protection_line<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        if self.snapshot.latched {
            writer.write_str("protection SHUT DOWN")
        } else {
            writer.write_str("protection ok")
        }
    }
}

/// Renders the trigger resolution reply shared by both `*_TRIGGER_STATUS`
/// commands.
pub fn write_trigger_status<W: fmt::Write>(writer: &mut W, status: &TriggerStatus) -> fmt::Result {
    write!(
        writer,
        "hardware={} debug={} manual={} effective={}",
        if status.hardware_pin { "HIGH" } else { "LOW" },
        on_off(status.debug_mode),
        on_off(status.manual),
        active_inactive(status.effective),
    )
}

/// Renders the current/temperature lines shared by `TC_NOW` and `STATUS`.
pub fn write_sensor_lines<W: fmt::Write>(writer: &mut W, sample: &SensorSample) -> fmt::Result {
    writer.write_str("currents")?;
    for (index, amps) in sample.currents_a.iter().enumerate() {
        write!(writer, " i{}={amps:.1}A", index + 1)?;
    }
    writer.write_char('\n')?;

    writer.write_str("temps")?;
    for (index, reading) in sample.temperatures_c.iter().enumerate() {
        match reading {
            Some(celsius) => write!(writer, " tc{}={celsius:.2}C", index + 1)?,
            None => write!(writer, " tc{}=fault", index + 1)?,
        }
    }
    writer.write_char('\n')
}

fn yes_no(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

fn on_off(value: bool) -> &'static str {
    if value { "on" } else { "off" }
}

fn active_inactive(value: bool) -> &'static str {
    if value { "ACTIVE" } else { "INACTIVE" }
}
