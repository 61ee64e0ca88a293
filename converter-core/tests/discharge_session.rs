use converter_core::discharge::{DischargeEngine, RunTransition, StepPolicy};
use converter_core::repl::commands::{CommandExecutor, CommandOutcome, ConsoleInputs};
use converter_core::shutdown::ShutdownLatch;
use converter_core::waveform::NoopWaveformSink;

const SYS_CLK_HZ: u32 = 125_000_000;
const PWM_TOP: u16 = 1_000;

fn run(executor: &mut CommandExecutor, line: &str) -> CommandOutcome {
    executor
        .execute(
            line,
            ConsoleInputs::default(),
            &ShutdownLatch::new(),
            &mut NoopWaveformSink,
        )
        .unwrap_or_else(|err| panic!("command `{line}` failed: {err}"))
}

#[test]
fn programmed_sequence_runs_against_the_trigger() {
    let mut executor = CommandExecutor::new(SYS_CLK_HZ, StepPolicy::ModuloLoop);
    run(
        &mut executor,
        "DC_STEP 100 CH1 0.5 0.7 0.3 CH2 0.2 0.9 0.1",
    );
    run(&mut executor, "DC_INVERT 0");

    let program = executor.discharge_program().clone();
    let flags = executor.discharge_flags();
    let policy = executor.step_policy();
    let mut engine = DischargeEngine::new();

    // Idle until the trigger rises.
    let idle = engine.tick(&program, flags, policy, false, 0, PWM_TOP);
    assert_eq!(idle.levels, None);

    let started = engine.tick(&program, flags, policy, true, 1_000, PWM_TOP);
    assert_eq!(started.transition, Some(RunTransition::Started));
    assert_eq!(started.levels, Some([500, 200]));

    // 150 ms into the run lands in the second step.
    let mid = engine.tick(&program, flags, policy, true, 1_150, PWM_TOP);
    assert_eq!(mid.step_index, Some(1));
    assert_eq!(mid.levels, Some([700, 900]));

    // The trigger dropping forces both outputs to zero.
    let stopped = engine.tick(&program, flags, policy, false, 1_200, PWM_TOP);
    assert_eq!(stopped.transition, Some(RunTransition::Stopped));
    assert_eq!(stopped.levels, Some([0, 0]));
}

#[test]
fn streamed_sequence_behaves_like_single_line_programming() {
    let mut streamed = CommandExecutor::new(SYS_CLK_HZ, StepPolicy::ModuloLoop);
    run(&mut streamed, "DC_CSV 100");
    run(&mut streamed, "0.5,0.2");
    run(&mut streamed, "0.7,0.9");
    run(&mut streamed, "0.3,0.1");
    run(&mut streamed, "DC_CSV_END");

    let mut single = CommandExecutor::new(SYS_CLK_HZ, StepPolicy::ModuloLoop);
    run(&mut single, "DC_STEP 100 CH1 0.5 0.7 0.3 CH2 0.2 0.9 0.1");

    assert_eq!(streamed.discharge_program(), single.discharge_program());
}

#[test]
fn manual_trigger_override_drives_the_engine() {
    let mut executor = CommandExecutor::new(SYS_CLK_HZ, StepPolicy::ModuloLoop);
    run(&mut executor, "DC_STEP 10 CH1 1.0 CH2 1.0");
    run(&mut executor, "DC_INVERT 0");
    run(&mut executor, "DC_DEBUG 1");
    run(&mut executor, "DC_TRIGGER 1");

    let program = executor.discharge_program().clone();
    let flags = executor.discharge_flags();
    let mut engine = DischargeEngine::new();

    // Hardware pin stays low; the manual override starts the run anyway.
    let outcome = engine.tick(
        &program,
        flags,
        executor.step_policy(),
        false,
        0,
        PWM_TOP,
    );
    assert_eq!(outcome.transition, Some(RunTransition::Started));
    assert_eq!(outcome.levels, Some([PWM_TOP, PWM_TOP]));
}

#[test]
fn hold_last_policy_survives_sequence_exhaustion() {
    let mut executor = CommandExecutor::new(SYS_CLK_HZ, StepPolicy::HoldLast);
    run(&mut executor, "DC_STEP 100 CH1 0.5 0.3 CH2 0.8");
    run(&mut executor, "DC_INVERT 0");

    let program = executor.discharge_program().clone();
    let flags = executor.discharge_flags();
    let mut engine = DischargeEngine::new();

    engine.tick(&program, flags, StepPolicy::HoldLast, true, 0, PWM_TOP);
    let late = engine.tick(&program, flags, StepPolicy::HoldLast, true, 10_000, PWM_TOP);
    assert_eq!(late.levels, Some([300, 800]));
}
