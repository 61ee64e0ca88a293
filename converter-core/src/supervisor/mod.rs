//! Sensor poll loop state: conversion, protection, logging, latching.
//!
//! Targets read their ADC and thermocouple hardware however they like and
//! hand the raw values to [`Supervisor::poll`], which converts to
//! engineering units, runs the debounced limit checks, appends to the
//! thermal log, and drives the shutdown latch. The returned report tells
//! the caller whether outputs must be forced safe this poll.

use crate::protection::{
    CURRENT_CHANNELS, ProtectionMonitor, SensorSample, THERMOCOUPLE_CHANNELS, ThermocoupleFault,
    TripEvent, decode_thermocouple,
};
use crate::shutdown::ShutdownLatch;
use crate::telemetry::{ThermalEntry, ThermalLog};

/// Raw hardware values for one poll.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RawReadings {
    pub adc_counts: [u16; CURRENT_CHANNELS],
    pub thermocouple_frames: [u32; THERMOCOUPLE_CHANNELS],
}

/// What one poll produced.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PollReport {
    /// Converted readings, available for status display.
    pub sample: SensorSample,
    /// Per-channel sensor faults seen this poll.
    pub faults: [Option<ThermocoupleFault>; THERMOCOUPLE_CHANNELS],
    /// Trip confirmed this poll, if any. The latch is already set when this
    /// is `Some`; the caller must force outputs safe before returning.
    pub tripped: Option<TripEvent>,
}

/// Protection supervisor owning the monitor, latch, and thermal history.
#[derive(Debug, Default)]
pub struct Supervisor {
    monitor: ProtectionMonitor,
    latch: ShutdownLatch,
    thermal_log: ThermalLog,
}

impl Supervisor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Converts raw readings to engineering units without logging or limit
    /// checking. Used for on-demand displays between polls.
    #[must_use]
    pub fn preview(&self, raw: &RawReadings) -> SensorSample {
        let (sample, _) = self.convert(raw);
        sample
    }

    fn convert(
        &self,
        raw: &RawReadings,
    ) -> (SensorSample, [Option<ThermocoupleFault>; THERMOCOUPLE_CHANNELS]) {
        let currents_a = self.monitor.convert_currents(raw.adc_counts);

        let mut temperatures_c = [None; THERMOCOUPLE_CHANNELS];
        let mut faults = [None; THERMOCOUPLE_CHANNELS];
        for (channel, &frame) in raw.thermocouple_frames.iter().enumerate() {
            match decode_thermocouple(frame) {
                Ok(celsius) => temperatures_c[channel] = Some(celsius),
                Err(fault) => faults[channel] = Some(fault),
            }
        }

        (
            SensorSample {
                currents_a,
                temperatures_c,
            },
            faults,
        )
    }

    /// Processes one set of raw readings.
    ///
    /// Thermal logging continues after latching; the limit checks stop,
    /// since a latched controller has nothing further to trip.
    pub fn poll(&mut self, raw: &RawReadings, now_ms: u64) -> PollReport {
        let (sample, faults) = self.convert(raw);

        self.thermal_log.record(ThermalEntry {
            timestamp_ms: now_ms,
            temperatures_c: sample.temperatures_c,
        });

        let tripped = if self.latch.is_latched() {
            None
        } else {
            let trip = self.monitor.check(&sample);
            if let Some(event) = trip {
                self.latch.trip(event);
            }
            trip
        };

        PollReport {
            sample,
            faults,
            tripped,
        }
    }

    #[must_use]
    pub fn latch(&self) -> &ShutdownLatch {
        &self.latch
    }

    #[must_use]
    pub fn thermal_log(&self) -> &ThermalLog {
        &self.thermal_log
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protection::{ADC_MAX_COUNT, OCP_DEBOUNCE_POLLS};

    fn quiet() -> RawReadings {
        RawReadings {
            adc_counts: [0; CURRENT_CHANNELS],
            // 25.0 C frames on every channel.
            thermocouple_frames: [100 << 18; THERMOCOUPLE_CHANNELS],
        }
    }

    #[test]
    fn healthy_poll_reports_converted_values() {
        let mut supervisor = Supervisor::new();
        let report = supervisor.poll(&quiet(), 0);
        assert_eq!(report.tripped, None);
        assert_eq!(report.sample.temperatures_c[0], Some(25.0));
        assert_eq!(report.sample.currents_a[0], 0.0);
        assert_eq!(supervisor.thermal_log().len(), 1);
    }

    #[test]
    fn sensor_faults_surface_without_tripping() {
        let mut supervisor = Supervisor::new();
        let mut raw = quiet();
        raw.thermocouple_frames[2] = (1 << 16) | 0x1;

        let report = supervisor.poll(&raw, 0);
        assert_eq!(report.faults[2], Some(ThermocoupleFault::OpenCircuit));
        assert_eq!(report.sample.temperatures_c[2], None);
        assert_eq!(report.tripped, None);
    }

    #[test]
    fn sustained_overcurrent_latches_on_the_debounced_poll() {
        let mut supervisor = Supervisor::new();
        let mut raw = quiet();
        raw.adc_counts[0] = ADC_MAX_COUNT;

        for poll in 1..=OCP_DEBOUNCE_POLLS {
            let report = supervisor.poll(&raw, u64::from(poll) * 100);
            if poll < OCP_DEBOUNCE_POLLS {
                assert_eq!(report.tripped, None);
                assert!(!supervisor.latch().is_latched());
            } else {
                assert!(matches!(
                    report.tripped,
                    Some(TripEvent::Overcurrent { channel: 0, .. })
                ));
                assert!(supervisor.latch().is_latched());
            }
        }
    }

    #[test]
    fn latched_supervisor_keeps_logging_but_stops_checking() {
        let mut supervisor = Supervisor::new();
        let mut raw = quiet();
        raw.adc_counts[0] = ADC_MAX_COUNT;
        for poll in 0..u64::from(OCP_DEBOUNCE_POLLS) {
            supervisor.poll(&raw, poll * 100);
        }
        assert!(supervisor.latch().is_latched());
        let logged = supervisor.thermal_log().len();

        let report = supervisor.poll(&raw, 1_000);
        assert_eq!(report.tripped, None);
        assert_eq!(supervisor.thermal_log().len(), logged + 1);
    }
}
