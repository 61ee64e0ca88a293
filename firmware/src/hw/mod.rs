//! Board wiring for the Pico-based converter controller.
//!
//! GPIO map:
//!   0/1         UART0 console
//!   2-5         sequencer phase outputs, one per channel
//!   6           sequencer trigger, input unless debug mode drives it
//!   9/13/14/15  thermocouple chip selects
//!   10/12       SPI1 SCK / MISO shared by the thermocouple bank
//!   16/17       discharge PWM, slice 0 outputs A and B
//!   18          discharge trigger input
//!   22          main contactor relay
//!   26-28       current sense ADC inputs

use embassy_rp::gpio::{Flex, Output, Pull};
use embassy_rp::pwm::{Config as PwmConfig, Pwm};

/// GPIO index the sequencer program waits on. The pad stays SIO-owned so
/// debug mode can drive it; the state machines watch the raw input path.
pub const SEQUENCER_TRIGGER_GPIO: u8 = 6;

/// Discharge PWM wrap value: 125 MHz / (12_499 + 1) = 10 kHz.
pub const DISCHARGE_PWM_TOP: u16 = 12_499;

/// Shared trigger pad for the four sequencer channels.
///
/// Normally a pulled-down input sampled by the PIO `wait` instruction and
/// echoed in trigger status lines. Debug mode flips the pad to an output so
/// the console can fire the sequencer without external hardware.
pub struct SequencerTrigger {
    pin: Flex<'static>,
}

impl SequencerTrigger {
    pub fn new(mut pin: Flex<'static>) -> Self {
        pin.set_pull(Pull::Down);
        pin.set_as_input();
        Self { pin }
    }

    /// Entering debug mode takes the pad low before driving it; leaving
    /// returns it to the pulled-down hardware input.
    pub fn set_debug(&mut self, enable: bool) {
        if enable {
            self.pin.set_low();
            self.pin.set_as_output();
        } else {
            self.pin.set_pull(Pull::Down);
            self.pin.set_as_input();
        }
    }

    pub fn drive(&mut self, high: bool) {
        if high {
            self.pin.set_high();
        } else {
            self.pin.set_low();
        }
    }

    pub fn level(&mut self) -> bool {
        self.pin.is_high()
    }
}

/// Main contactor relay on GPIO 22, active high.
pub struct Relay {
    pin: Output<'static>,
}

impl Relay {
    pub fn new(pin: Output<'static>) -> Self {
        Self { pin }
    }

    pub fn set_closed(&mut self, closed: bool) {
        if closed {
            self.pin.set_high();
        } else {
            self.pin.set_low();
        }
    }

    pub fn open(&mut self) {
        self.pin.set_low();
    }
}

/// Discharge output pair on PWM slice 0.
///
/// Runs free at 10 kHz; the tick loop only moves the compare levels, so a
/// level of [`DISCHARGE_PWM_TOP`] is fully on and 0 is fully off.
pub struct DischargePwm {
    pwm: Pwm<'static>,
    config: PwmConfig,
}

impl DischargePwm {
    pub fn new(pwm: Pwm<'static>, config: PwmConfig) -> Self {
        Self { pwm, config }
    }

    /// Baseline slice configuration: both compares at zero, outputs off.
    pub fn initial_config() -> PwmConfig {
        let mut config = PwmConfig::default();
        config.top = DISCHARGE_PWM_TOP;
        config.compare_a = 0;
        config.compare_b = 0;
        config
    }

    pub fn set_levels(&mut self, levels: [u16; 2]) {
        self.config.compare_a = levels[0].min(DISCHARGE_PWM_TOP);
        self.config.compare_b = levels[1].min(DISCHARGE_PWM_TOP);
        self.pwm.set_config(&self.config);
    }
}
