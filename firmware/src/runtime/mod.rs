//! Task wiring for the dual-core controller.
//!
//! Core 0 runs the console and the protection supervisor. Core 1 runs only
//! the discharge tick loop, so its 1 ms cadence never contends with console
//! traffic or sensor polling.

use core::ptr::addr_of_mut;

use defmt_rtt as _;
use embassy_executor::{Executor, Spawner};
use embassy_rp as hal;
use embassy_rp::adc::{self, Adc, Channel};
use embassy_rp::bind_interrupts;
use embassy_rp::gpio::{Flex, Input, Level, Output, Pull};
use embassy_rp::multicore::{Stack, spawn_core1};
use embassy_rp::peripherals::{PIO0, UART0};
use embassy_rp::pio::{self, Pio};
use embassy_rp::pwm::Pwm;
use embassy_rp::spi::{self, Spi};
use embassy_rp::uart::{self, BufferedUart};
use static_cell::StaticCell;

use crate::hw::{DischargePwm, Relay, SequencerTrigger};
use crate::phase::{self, PhaseDriver};
use crate::sensors::SensorBank;
use crate::shared;

mod console_task;
mod discharge_task;
mod supervisor_task;

bind_interrupts!(struct Irqs {
    PIO0_IRQ_0 => pio::InterruptHandler<PIO0>;
    ADC_IRQ_FIFO => adc::InterruptHandler;
    UART0_IRQ => uart::BufferedInterruptHandler<UART0>;
});

static mut CORE1_STACK: Stack<8192> = Stack::new();
static EXECUTOR1: StaticCell<Executor> = StaticCell::new();
static UART_TX_BUF: StaticCell<[u8; 512]> = StaticCell::new();
static UART_RX_BUF: StaticCell<[u8; 512]> = StaticCell::new();

#[embassy_executor::main]
pub async fn main(spawner: Spawner) {
    let hal::Peripherals {
        PIN_0,
        PIN_1,
        PIN_2,
        PIN_3,
        PIN_4,
        PIN_5,
        PIN_6,
        PIN_9,
        PIN_10,
        PIN_12,
        PIN_13,
        PIN_14,
        PIN_15,
        PIN_16,
        PIN_17,
        PIN_18,
        PIN_22,
        PIN_26,
        PIN_27,
        PIN_28,
        ADC,
        CORE1,
        PIO0,
        PWM_SLICE0,
        SPI1,
        UART0,
        ..
    } = hal::init(Default::default());

    defmt::info!("converter controller starting");

    shared::init_supervisor();
    phase::install(PhaseDriver::new(
        Pio::new(PIO0, Irqs),
        PIN_2,
        PIN_3,
        PIN_4,
        PIN_5,
    ));

    let sequencer_trigger = SequencerTrigger::new(Flex::new(PIN_6));
    let relay = Relay::new(Output::new(PIN_22, Level::Low));

    let pwm_config = DischargePwm::initial_config();
    let discharge_pwm = DischargePwm::new(
        Pwm::new_output_ab(PWM_SLICE0, PIN_16, PIN_17, pwm_config.clone()),
        pwm_config,
    );
    let discharge_trigger = Input::new(PIN_18, Pull::Down);

    let adc = Adc::new(ADC, Irqs, adc::Config::default());
    let current_inputs = [
        Channel::new_pin(PIN_26, Pull::None),
        Channel::new_pin(PIN_27, Pull::None),
        Channel::new_pin(PIN_28, Pull::None),
    ];

    let mut spi_config = spi::Config::default();
    spi_config.frequency = 1_000_000;
    let spi = Spi::new_blocking_rxonly(SPI1, PIN_10, PIN_12, spi_config);
    let chip_selects = [
        Output::new(PIN_9, Level::High),
        Output::new(PIN_13, Level::High),
        Output::new(PIN_14, Level::High),
        Output::new(PIN_15, Level::High),
    ];
    let sensors = SensorBank::new(adc, current_inputs, spi, chip_selects);

    let tx_buf = &mut UART_TX_BUF.init([0; 512])[..];
    let rx_buf = &mut UART_RX_BUF.init([0; 512])[..];
    let console = BufferedUart::new(
        UART0,
        PIN_0,
        PIN_1,
        Irqs,
        tx_buf,
        rx_buf,
        uart::Config::default(),
    );

    spawn_core1(
        CORE1,
        unsafe { &mut *addr_of_mut!(CORE1_STACK) },
        move || {
            let executor1 = EXECUTOR1.init(Executor::new());
            executor1.run(|core1_spawner| {
                core1_spawner
                    .spawn(discharge_task::run(discharge_pwm, discharge_trigger))
                    .expect("failed to spawn discharge tick loop");
            });
        },
    );

    spawner
        .spawn(supervisor_task::run(sensors, relay))
        .expect("failed to spawn supervisor task");
    spawner
        .spawn(console_task::run(console, sequencer_trigger))
        .expect("failed to spawn console task");

    core::future::pending::<()>().await;
}
