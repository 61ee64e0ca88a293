//! UART console: line assembly, command dispatch, reply rendering.
//!
//! The executor and its configuration state live here; hardware effects
//! reach the other tasks through the phase sink, the published discharge
//! settings, and the relay signal. A one second ticker drives the optional
//! periodic temperature print.

use converter_core::discharge::StepPolicy;
use converter_core::repl::commands::{
    CommandExecutor, CommandOutcome, ConsoleInputs, DischargeStatusReport, SequenceAck,
};
use converter_core::repl::status::{
    HELP_TEXT, StatusFormatter, StatusSnapshot, write_sensor_lines, write_trigger_status,
};
use converter_core::shutdown::ShutdownLatch;
use converter_core::telemetry;
use converter_core::trigger::TriggerStatus;
use core::fmt::Write as _;
use embassy_futures::select::{Either, select};
use embassy_rp::clocks::clk_sys_freq;
use embassy_rp::uart::{BufferedUart, BufferedUartTx};
use embassy_time::{Duration, Ticker};
use embedded_io_async::{Read, Write};
use heapless::{String, Vec};

use crate::hw::SequencerTrigger;
use crate::phase::PhaseSink;
use crate::shared;

/// Sized for a `DC_STEP` line carrying both channels at full length,
/// roughly 820 bytes in the comma-separated form.
const MAX_LINE: usize = 1024;

/// Thermal log rows copied per lock acquisition while streaming `TC_CSV`.
const CSV_BATCH: usize = 16;

#[embassy_executor::task]
pub async fn run(console: BufferedUart<'static>, mut sequencer_trigger: SequencerTrigger) {
    let (mut tx, mut rx) = console.split();
    let mut executor = CommandExecutor::new(clk_sys_freq(), StepPolicy::default());
    let mut latch = ShutdownLatch::new();

    let mut line: Vec<u8, MAX_LINE> = Vec::new();
    let mut overflowed = false;
    let mut chunk = [0_u8; 64];
    let mut auto_print = Ticker::every(Duration::from_secs(1));

    send(&mut tx, b"converter console ready\n").await;

    loop {
        match select(rx.read(&mut chunk), auto_print.next()).await {
            Either::First(Ok(count)) => {
                for &byte in &chunk[..count] {
                    if byte == b'\n' || byte == b'\r' {
                        if overflowed {
                            send(&mut tx, b"error: line too long\n").await;
                        } else if !line.is_empty() {
                            handle_line(
                                &line,
                                &mut executor,
                                &mut latch,
                                &mut sequencer_trigger,
                                &mut tx,
                            )
                            .await;
                        }
                        line.clear();
                        overflowed = false;
                    } else if line.push(byte).is_err() {
                        overflowed = true;
                    }
                }
            }
            Either::First(Err(_)) => defmt::warn!("console read failed"),
            Either::Second(()) => {
                if executor.tc_auto_print()
                    && let Some(sample) = shared::latest_sample()
                {
                    let mut reply: String<256> = String::new();
                    let _ = write_sensor_lines(&mut reply, &sample);
                    send(&mut tx, reply.as_bytes()).await;
                }
            }
        }
    }
}

async fn handle_line(
    raw: &[u8],
    executor: &mut CommandExecutor,
    latch: &mut ShutdownLatch,
    sequencer_trigger: &mut SequencerTrigger,
    tx: &mut BufferedUartTx<'static>,
) {
    let Ok(text) = core::str::from_utf8(raw) else {
        send(tx, b"error: input is not valid text\n").await;
        return;
    };

    sync_latch(latch);
    let inputs = ConsoleInputs {
        sequencer_pin: sequencer_trigger.level(),
        discharge_pin: shared::discharge_trigger_level(),
        discharge_running: shared::is_discharge_running(),
    };

    let mut reply: String<512> = String::new();
    match executor.execute(text, inputs, latch, &mut PhaseSink) {
        Ok(outcome) => match outcome {
            CommandOutcome::WaveformUpdated(program) => {
                let _ = writeln!(
                    reply,
                    "waveform committed: freq={:.2}Hz divider={:.2} cycles={}",
                    program.effective_hz, program.clock_divider, program.total_cycles,
                );
            }
            CommandOutcome::TcAutoPrint(enabled) => {
                let _ = writeln!(reply, "tc auto print {}", on_off(enabled));
            }
            CommandOutcome::ThermalCsvRequested => {
                stream_thermal_csv(tx).await;
            }
            CommandOutcome::TemperaturesRequested => match shared::latest_sample() {
                Some(sample) => {
                    let _ = write_sensor_lines(&mut reply, &sample);
                }
                None => {
                    let _ = reply.push_str("no sensor data yet\n");
                }
            },
            CommandOutcome::SequencerDebug(enabled) => {
                sequencer_trigger.set_debug(enabled);
                let _ = writeln!(reply, "sequencer debug {}", on_off(enabled));
            }
            CommandOutcome::SequencerTrigger(level) => {
                sequencer_trigger.drive(level);
                let _ = writeln!(
                    reply,
                    "sequencer trigger {}",
                    if level { "ACTIVE" } else { "INACTIVE" },
                );
            }
            CommandOutcome::SequencerTriggerStatus(status)
            | CommandOutcome::DischargeTriggerStatus(status) => {
                let _ = write_trigger_status(&mut reply, &status);
                let _ = reply.push('\n');
            }
            CommandOutcome::RelaySet(closed) => {
                shared::RELAY_REQUEST.signal(closed);
                let _ = writeln!(reply, "relay {}", if closed { "closed" } else { "open" });
            }
            CommandOutcome::SequenceProgrammed(ack) | CommandOutcome::StreamingFinished(ack) => {
                publish_discharge(executor);
                write_sequence_ack(&mut reply, &ack);
            }
            CommandOutcome::StreamingStarted { step_duration_ms } => {
                let _ = writeln!(
                    reply,
                    "streaming sequence data at {step_duration_ms}ms per step; DC_CSV_END to finish",
                );
            }
            CommandOutcome::StreamingLineStored => {}
            CommandOutcome::DischargeDebug(enabled) => {
                publish_discharge(executor);
                let _ = writeln!(reply, "discharge debug {}", on_off(enabled));
            }
            CommandOutcome::DischargeTrigger(level) => {
                publish_discharge(executor);
                let _ = writeln!(
                    reply,
                    "discharge trigger {}",
                    if level { "ACTIVE" } else { "INACTIVE" },
                );
            }
            CommandOutcome::DischargeVerbose(enabled) => {
                publish_discharge(executor);
                let _ = writeln!(reply, "discharge verbose {}", on_off(enabled));
            }
            CommandOutcome::DischargeInvert(enabled) => {
                publish_discharge(executor);
                let _ = writeln!(reply, "discharge invert {}", on_off(enabled));
            }
            CommandOutcome::DischargeStatus(report) => {
                let snapshot = snapshot(executor, inputs, report);
                let _ = StatusFormatter::new(&snapshot).write_discharge_line(&mut reply);
                let _ = reply.push('\n');
            }
            CommandOutcome::StatusRequested => {
                let report = discharge_report(executor);
                let snapshot = snapshot(executor, inputs, report);
                let _ = StatusFormatter::new(&snapshot).write_all(&mut reply);
            }
            CommandOutcome::Help => {
                send(tx, HELP_TEXT.as_bytes()).await;
            }
        },
        Err(err) => {
            let _ = writeln!(reply, "error: {err}");
        }
    }

    if !reply.is_empty() {
        send(tx, reply.as_bytes()).await;
    }
}

/// Pulls a supervisor trip into the console's latch view.
fn sync_latch(latch: &mut ShutdownLatch) {
    if shared::is_shut_down()
        && !latch.is_latched()
        && let Some(cause) = shared::with_supervisor(|s| s.latch().cause().copied()).flatten()
    {
        latch.trip(cause);
    }
}

/// Republishes the executor's discharge state for the tick core.
fn publish_discharge(executor: &CommandExecutor) {
    shared::publish_discharge(
        executor.discharge_program(),
        executor.discharge_flags(),
        executor.step_policy(),
    );
}

fn discharge_report(executor: &CommandExecutor) -> DischargeStatusReport {
    let program = executor.discharge_program();
    DischargeStatusReport {
        step_duration_ms: program.step_duration_ms(),
        channel_1_steps: program.channel(0).step_count(),
        channel_2_steps: program.channel(1).step_count(),
        enabled: program.enabled(),
        running: shared::is_discharge_running(),
        invert_output: executor.discharge_flags().invert_output,
    }
}

fn snapshot(
    executor: &CommandExecutor,
    inputs: ConsoleInputs,
    discharge: DischargeStatusReport,
) -> StatusSnapshot {
    StatusSnapshot {
        waveform: executor.committed_waveform().copied(),
        discharge,
        sequencer_trigger: TriggerStatus::capture(
            executor.sequencer_trigger(),
            inputs.sequencer_pin,
        ),
        discharge_trigger: TriggerStatus::capture(
            executor.discharge_flags().trigger,
            inputs.discharge_pin,
        ),
        relay_closed: executor.relay_closed(),
        sensors: shared::latest_sample(),
        latched: shared::is_shut_down(),
    }
}

fn write_sequence_ack(reply: &mut String<512>, ack: &SequenceAck) {
    let _ = writeln!(
        reply,
        "sequence loaded: step={}ms ch1={} ch2={} dropped={}",
        ack.step_duration_ms, ack.channel_1_steps, ack.channel_2_steps, ack.dropped,
    );
}

/// Streams the thermal log without holding the supervisor lock across an
/// await: copy a batch of rows into the buffer, release, transmit, repeat.
async fn stream_thermal_csv(tx: &mut BufferedUartTx<'static>) {
    let mut buf: String<1024> = String::new();
    let _ = telemetry::write_csv_header(&mut buf);
    send(tx, buf.as_bytes()).await;

    let mut offset = 0;
    loop {
        buf.clear();
        let copied = shared::with_supervisor(|supervisor| {
            let mut rows = 0;
            for entry in supervisor.thermal_log().iter().skip(offset).take(CSV_BATCH) {
                let _ = entry.write_csv_row(&mut buf);
                rows += 1;
            }
            rows
        })
        .unwrap_or(0);

        if copied == 0 {
            break;
        }
        offset += copied;
        send(tx, buf.as_bytes()).await;
    }
}

async fn send(tx: &mut BufferedUartTx<'static>, bytes: &[u8]) {
    if tx.write_all(bytes).await.is_err() {
        defmt::warn!("console write failed");
    }
}

fn on_off(value: bool) -> &'static str {
    if value { "on" } else { "off" }
}
