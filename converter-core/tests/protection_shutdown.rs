use converter_core::discharge::StepPolicy;
use converter_core::protection::{
    ADC_MAX_COUNT, CURRENT_CHANNELS, OTP_DEBOUNCE_POLLS, THERMOCOUPLE_CHANNELS, TripEvent,
};
use converter_core::repl::commands::{CommandError, CommandExecutor, CommandOutcome, ConsoleInputs};
use converter_core::supervisor::{RawReadings, Supervisor};
use converter_core::waveform::NoopWaveformSink;

const SYS_CLK_HZ: u32 = 125_000_000;

fn frame_for_quarter_degrees(quarters: u32) -> u32 {
    quarters << 18
}

fn healthy() -> RawReadings {
    RawReadings {
        adc_counts: [0; CURRENT_CHANNELS],
        thermocouple_frames: [frame_for_quarter_degrees(100); THERMOCOUPLE_CHANNELS],
    }
}

#[test]
fn overtemperature_trip_locks_out_configuration() {
    let mut supervisor = Supervisor::new();
    let mut executor = CommandExecutor::new(SYS_CLK_HZ, StepPolicy::ModuloLoop);

    // 95 C on thermocouple 1 for the full debounce window.
    let mut hot = healthy();
    hot.thermocouple_frames[1] = frame_for_quarter_degrees(380);

    let mut tripped = None;
    for poll in 0..u64::from(OTP_DEBOUNCE_POLLS) {
        tripped = supervisor.poll(&hot, poll * 250).tripped;
    }
    assert!(matches!(
        tripped,
        Some(TripEvent::Overtemperature { channel: 1, .. })
    ));

    // Configuration is refused from now on, including waveform updates.
    let refused = executor.execute(
        "FREQ 100000 0.5",
        ConsoleInputs::default(),
        supervisor.latch(),
        &mut NoopWaveformSink,
    );
    assert!(matches!(refused, Err(CommandError::Latched(_))));

    let refused = executor.execute(
        "DC_STEP 100 CH1 0.5",
        ConsoleInputs::default(),
        supervisor.latch(),
        &mut NoopWaveformSink,
    );
    assert!(matches!(refused, Err(CommandError::Latched(_))));
}

#[test]
fn thermal_log_stays_readable_after_the_trip() {
    let mut supervisor = Supervisor::new();
    let mut executor = CommandExecutor::new(SYS_CLK_HZ, StepPolicy::ModuloLoop);

    let mut overloaded = healthy();
    overloaded.adc_counts[0] = ADC_MAX_COUNT;
    let mut poll = 0;
    while !supervisor.latch().is_latched() {
        supervisor.poll(&overloaded, poll * 100);
        poll += 1;
    }

    let outcome = executor.execute(
        "TC_CSV",
        ConsoleInputs::default(),
        supervisor.latch(),
        &mut NoopWaveformSink,
    );
    assert_eq!(outcome, Ok(CommandOutcome::ThermalCsvRequested));

    let mut csv = String::new();
    supervisor
        .thermal_log()
        .write_csv(&mut csv)
        .expect("string never fails");
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines[0], "time_ms,tc1_c,tc2_c,tc3_c,tc4_c");
    assert_eq!(lines.len(), poll as usize + 1);
}

#[test]
fn intermittent_overload_never_latches() {
    let mut supervisor = Supervisor::new();
    let mut overloaded = healthy();
    overloaded.adc_counts[0] = ADC_MAX_COUNT;
    let calm = healthy();

    // Alternating polls keep resetting the debounce counter.
    for cycle in 0..20_u64 {
        supervisor.poll(&overloaded, cycle * 200);
        supervisor.poll(&calm, cycle * 200 + 100);
    }
    assert!(!supervisor.latch().is_latched());
}

#[test]
fn first_trip_is_preserved_across_later_faults() {
    let mut supervisor = Supervisor::new();

    let mut overloaded = healthy();
    overloaded.adc_counts[0] = ADC_MAX_COUNT;
    let mut poll = 0;
    while !supervisor.latch().is_latched() {
        supervisor.poll(&overloaded, poll * 100);
        poll += 1;
    }

    // A later thermal fault does not replace the recorded cause.
    overloaded.thermocouple_frames[0] = frame_for_quarter_degrees(500);
    for extra in 0..5_u64 {
        supervisor.poll(&overloaded, (poll + extra) * 100);
    }
    assert!(matches!(
        supervisor.latch().cause(),
        Some(TripEvent::Overcurrent { channel: 0, .. })
    ));
}
