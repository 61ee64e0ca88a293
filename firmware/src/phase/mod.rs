//! PIO0 backend for the four-channel phase sequencer.
//!
//! Each state machine runs the same program: pull the phase delay, the high
//! count, and the low count from its FIFO, hold until the shared trigger pad
//! goes high, burn the phase delay, then toggle its output pin for as long
//! as the trigger stays high. A commit reloads all four machines in one
//! pass so the divider and the channel triples always change together.

use core::cell::RefCell;

use converter_core::waveform::{WaveformProgram, WaveformSink};
use embassy_rp::Peri;
use embassy_rp::gpio::Level;
use embassy_rp::peripherals::{PIN_2, PIN_3, PIN_4, PIN_5, PIO0};
use embassy_rp::pio::{Config, Direction, LoadedProgram, Pin, Pio, StateMachine};
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use fixed::FixedU32;
use fixed::types::extra::U8;
use pio::{
    Assembler, JmpCondition, MovDestination, MovOperation, MovSource, SetDestination, WaitSource,
};

use crate::hw::SEQUENCER_TRIGGER_GPIO;

static PHASE: Mutex<CriticalSectionRawMutex, RefCell<Option<PhaseDriver>>> =
    Mutex::new(RefCell::new(None));

/// Assembles the per-channel sequencer program.
///
/// FIFO word order is phase delay, high count, low count. The delay ends up
/// in X, the high count in ISR, the low count stays in OSR; the wrap loop
/// re-checks the trigger every period so output freezes low when it drops.
fn sequencer_program() -> ::pio::Program<32> {
    let mut asm = Assembler::<32>::new();
    let mut phase_loop = asm.label();
    let mut high_loop = asm.label();
    let mut low_loop = asm.label();
    let mut wrap_target = asm.label();
    let mut wrap_source = asm.label();

    asm.pull(false, true);
    asm.mov(MovDestination::X, MovOperation::None, MovSource::OSR);
    asm.pull(false, true);
    asm.mov(MovDestination::ISR, MovOperation::None, MovSource::OSR);
    asm.pull(false, true);
    asm.wait(1, WaitSource::GPIO, SEQUENCER_TRIGGER_GPIO, false);
    asm.bind(&mut phase_loop);
    asm.jmp(JmpCondition::XDecNonZero, &mut phase_loop);
    asm.bind(&mut wrap_target);
    asm.wait(1, WaitSource::GPIO, SEQUENCER_TRIGGER_GPIO, false);
    asm.set(SetDestination::PINS, 1);
    asm.mov(MovDestination::Y, MovOperation::None, MovSource::ISR);
    asm.bind(&mut high_loop);
    asm.jmp(JmpCondition::YDecNonZero, &mut high_loop);
    asm.set(SetDestination::PINS, 0);
    asm.mov(MovDestination::Y, MovOperation::None, MovSource::OSR);
    asm.bind(&mut low_loop);
    asm.jmp(JmpCondition::YDecNonZero, &mut low_loop);
    asm.bind(&mut wrap_source);

    asm.assemble_with_wrap(wrap_source, wrap_target)
}

/// Owns PIO0 and the four phase output pads.
pub struct PhaseDriver {
    sm0: StateMachine<'static, PIO0, 0>,
    sm1: StateMachine<'static, PIO0, 1>,
    sm2: StateMachine<'static, PIO0, 2>,
    sm3: StateMachine<'static, PIO0, 3>,
    pins: [Pin<'static, PIO0>; 4],
    loaded: LoadedProgram<'static, PIO0>,
}

impl PhaseDriver {
    /// Claims the state machines and parks every output low.
    pub fn new(
        pio: Pio<'static, PIO0>,
        pin_2: Peri<'static, PIN_2>,
        pin_3: Peri<'static, PIN_3>,
        pin_4: Peri<'static, PIN_4>,
        pin_5: Peri<'static, PIN_5>,
    ) -> Self {
        let Pio {
            mut common,
            sm0,
            sm1,
            sm2,
            sm3,
            ..
        } = pio;

        let pins = [
            common.make_pio_pin(pin_2),
            common.make_pio_pin(pin_3),
            common.make_pio_pin(pin_4),
            common.make_pio_pin(pin_5),
        ];
        let loaded = common.load_program(&sequencer_program());
        let mut driver = Self {
            sm0,
            sm1,
            sm2,
            sm3,
            pins,
            loaded,
        };

        driver.sm0.set_pin_dirs(Direction::Out, &[&driver.pins[0]]);
        driver.sm1.set_pin_dirs(Direction::Out, &[&driver.pins[1]]);
        driver.sm2.set_pin_dirs(Direction::Out, &[&driver.pins[2]]);
        driver.sm3.set_pin_dirs(Direction::Out, &[&driver.pins[3]]);
        driver.sm0.set_pins(Level::Low, &[&driver.pins[0]]);
        driver.sm1.set_pins(Level::Low, &[&driver.pins[1]]);
        driver.sm2.set_pins(Level::Low, &[&driver.pins[2]]);
        driver.sm3.set_pins(Level::Low, &[&driver.pins[3]]);
        driver
    }

    /// Reloads all four state machines from `program` and arms them on the
    /// trigger. Machines are stopped first so no channel ever runs a mix of
    /// old and new parameters.
    fn apply(&mut self, program: &WaveformProgram) {
        let divider: FixedU32<U8> = FixedU32::from_num(program.clock_divider);

        macro_rules! load_channel {
            ($sm:expr, $pin:expr, $timing:expr) => {{
                $sm.set_enable(false);
                $sm.clear_fifos();

                let mut config = Config::default();
                config.use_program(&self.loaded, &[]);
                config.set_set_pins(&[$pin]);
                config.clock_divider = divider;
                $sm.set_config(&config);

                // Three pushes always fit a freshly cleared FIFO.
                let mut ok = $sm.tx().try_push($timing.phase_delay_cycles);
                ok &= $sm.tx().try_push($timing.high_cycles);
                ok &= $sm.tx().try_push($timing.low_cycles);
                if !ok {
                    defmt::error!("sequencer FIFO rejected a parameter word");
                }

                $sm.restart();
                $sm.set_enable(true);
            }};
        }

        load_channel!(self.sm0, &self.pins[0], program.channels[0]);
        load_channel!(self.sm1, &self.pins[1], program.channels[1]);
        load_channel!(self.sm2, &self.pins[2], program.channels[2]);
        load_channel!(self.sm3, &self.pins[3], program.channels[3]);

        defmt::info!(
            "sequencer loaded: divider={} cycles={} effective={} Hz",
            program.clock_divider,
            program.total_cycles,
            program.effective_hz,
        );
    }

    /// Stops all machines and parks the outputs low.
    fn halt(&mut self) {
        self.sm0.set_enable(false);
        self.sm1.set_enable(false);
        self.sm2.set_enable(false);
        self.sm3.set_enable(false);
        self.sm0.set_pins(Level::Low, &[&self.pins[0]]);
        self.sm1.set_pins(Level::Low, &[&self.pins[1]]);
        self.sm2.set_pins(Level::Low, &[&self.pins[2]]);
        self.sm3.set_pins(Level::Low, &[&self.pins[3]]);
    }
}

/// Publishes the driver for the sink and the supervisor to reach.
pub fn install(driver: PhaseDriver) {
    PHASE.lock(|cell| {
        *cell.borrow_mut() = Some(driver);
    });
}

/// Forces every phase output off. Used on protection trips; the driver
/// stays halted until the next waveform commit.
pub fn disable_outputs() {
    PHASE.lock(|cell| {
        if let Some(driver) = cell.borrow_mut().as_mut() {
            driver.halt();
        }
    });
}

/// [`WaveformSink`] handle the console executor commits through.
pub struct PhaseSink;

impl WaveformSink for PhaseSink {
    fn commit(&mut self, program: &WaveformProgram) {
        PHASE.lock(|cell| {
            if let Some(driver) = cell.borrow_mut().as_mut() {
                driver.apply(program);
            }
        });
    }
}
