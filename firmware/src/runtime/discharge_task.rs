//! Core-1 discharge tick loop.
//!
//! Runs every millisecond: mirror the trigger pad, refresh the published
//! settings when the generation counter moves, advance the engine, and move
//! the PWM compare levels. After a shutdown latch the outputs are forced to
//! zero once and the engine stays idle.

use converter_core::discharge::{DischargeEngine, RunTransition};
use embassy_rp::gpio::Input;
use embassy_time::{Duration, Instant, Ticker};

use crate::hw::{DISCHARGE_PWM_TOP, DischargePwm};
use crate::shared;

#[embassy_executor::task]
pub async fn run(mut pwm: DischargePwm, trigger: Input<'static>) {
    let mut engine = DischargeEngine::new();
    let mut generation = shared::discharge_generation();
    let mut settings = shared::clone_discharge();
    let mut last_step = None;
    let mut forced_safe = false;
    let mut ticker = Ticker::every(Duration::from_millis(1));

    defmt::info!("discharge tick loop running on core 1");

    loop {
        ticker.next().await;

        let current = shared::discharge_generation();
        if current != generation {
            settings = shared::clone_discharge();
            generation = current;
            defmt::debug!(
                "discharge settings refreshed: step={} ms steps={}",
                settings.program.step_duration_ms(),
                settings.program.max_step_count(),
            );
        }

        let pin = trigger.is_high();
        shared::set_discharge_trigger_level(pin);

        if shared::is_shut_down() {
            if !forced_safe {
                pwm.set_levels([0, 0]);
                engine = DischargeEngine::new();
                shared::set_discharge_running(false);
                forced_safe = true;
                defmt::warn!("discharge outputs forced off by shutdown latch");
            }
            continue;
        }

        let now_ms = Instant::now().as_millis();
        let outcome = engine.tick(
            &settings.program,
            settings.flags,
            settings.policy,
            pin,
            now_ms,
            DISCHARGE_PWM_TOP,
        );

        if let Some(levels) = outcome.levels {
            pwm.set_levels(levels);
        }
        match outcome.transition {
            Some(RunTransition::Started) => defmt::info!("discharge run started"),
            Some(RunTransition::Stopped) => defmt::info!("discharge run stopped"),
            None => {}
        }
        if settings.flags.verbose
            && outcome.step_index != last_step
            && let (Some(step), Some(levels)) = (outcome.step_index, outcome.levels)
        {
            defmt::debug!("discharge step {}: levels {} {}", step, levels[0], levels[1]);
        }
        last_step = outcome.step_index;
        shared::set_discharge_running(engine.is_running());
    }
}
