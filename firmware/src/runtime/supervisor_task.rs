//! Sensor poll and protection loop, 10 Hz on core 0.
//!
//! Owns the contactor relay: console requests arrive through the shared
//! signal and are refused once the latch is set, so nothing can re-energize
//! the output stage after a trip.

use converter_core::protection::TripEvent;
use embassy_time::{Duration, Instant, Ticker};

use crate::hw::Relay;
use crate::phase;
use crate::sensors::SensorBank;
use crate::shared;

const POLL_INTERVAL_MS: u64 = 100;

#[embassy_executor::task]
pub async fn run(mut sensors: SensorBank, mut relay: Relay) {
    let mut ticker = Ticker::every(Duration::from_millis(POLL_INTERVAL_MS));

    loop {
        ticker.next().await;

        let raw = sensors.sample().await;
        let now_ms = Instant::now().as_millis();
        let Some(report) = shared::with_supervisor(|supervisor| supervisor.poll(&raw, now_ms))
        else {
            continue;
        };
        shared::store_latest_sample(report.sample);

        if let Some(event) = report.tripped {
            shared::latch_shutdown();
            relay.open();
            phase::disable_outputs();
            match event {
                TripEvent::Overcurrent { channel, amps } => {
                    defmt::error!("overcurrent trip: channel {} at {} A", channel, amps);
                }
                TripEvent::Overtemperature { channel, celsius } => {
                    defmt::error!("overtemperature trip: channel {} at {} C", channel, celsius);
                }
            }
        }

        if let Some(closed) = shared::RELAY_REQUEST.try_take() {
            if shared::is_shut_down() {
                defmt::warn!("relay request ignored: controller is latched");
            } else {
                relay.set_closed(closed);
            }
        }
    }
}
