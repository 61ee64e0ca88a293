//! Current and temperature protection with per-channel debounce.
//!
//! Raw ADC counts and thermocouple frames are converted to engineering units
//! here; the monitor itself is pure state, fed one sample set per poll and
//! emitting trip events only after a threshold is exceeded on consecutive
//! polls. A single in-range sample resets the debounce counter.

use core::fmt;

/// Current-sense channels: two DC legs plus the rotating-field bus.
pub const CURRENT_CHANNELS: usize = 3;

/// Thermocouple channels.
pub const THERMOCOUPLE_CHANNELS: usize = 4;

/// ADC full-scale reference in volts.
pub const ADC_REFERENCE_V: f32 = 3.3;

/// 12-bit converter resolution.
pub const ADC_MAX_COUNT: u16 = 4_095;

/// Counts below this read as a disconnected sensor, reported as zero.
pub const ADC_DISCONNECT_THRESHOLD: u16 = 10;

/// Trip limit for the DC legs in amps.
pub const MAX_DC_CURRENT_A: f32 = 50.0;

/// Trip limit for the rotating-field bus in amps.
pub const MAX_FIELD_CURRENT_A: f32 = 400.0;

/// Over-temperature trip limit in degrees Celsius.
pub const MAX_TEMPERATURE_C: f32 = 90.0;

/// Consecutive out-of-range polls before an overcurrent trip.
pub const OCP_DEBOUNCE_POLLS: u8 = 3;

/// Consecutive out-of-range polls before an over-temperature trip.
pub const OTP_DEBOUNCE_POLLS: u8 = 2;

/// Sense-divider and amplifier constants for one current channel.
///
/// The measured amplifier output is divided down before the ADC; conversion
/// back to amps inverts the divider and the shunt transfer.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CurrentChannelCal {
    /// Volts of ADC input per amp of measured current.
    pub volts_per_amp: f32,
    /// ADC input voltage at zero current.
    pub offset_v: f32,
    /// Trip threshold in amps.
    pub limit_a: f32,
}

const DIVIDER_R1: f32 = 2_800.0;
const DIVIDER_R2: f32 = 1_500.0;
const AMP_GAIN: f32 = 5.0 / 0.512;
const DIVIDER_SCALE: f32 = DIVIDER_R1 / (DIVIDER_R1 + DIVIDER_R2);

impl CurrentChannelCal {
    /// DC-leg calibration: 2.5 mV/A shunt into the amplifier and divider.
    #[must_use]
    pub const fn dc_leg() -> Self {
        Self {
            volts_per_amp: AMP_GAIN * 2.5e-3 * DIVIDER_SCALE,
            offset_v: 2.5 * DIVIDER_SCALE,
            limit_a: MAX_DC_CURRENT_A,
        }
    }

    /// Rotating-field bus calibration: 0.125 mV/A shunt.
    #[must_use]
    pub const fn field_bus() -> Self {
        Self {
            volts_per_amp: AMP_GAIN * 1.25e-4 * DIVIDER_SCALE,
            offset_v: 2.5 * DIVIDER_SCALE,
            limit_a: MAX_FIELD_CURRENT_A,
        }
    }

    /// Converts a raw ADC count to amps. Counts below the disconnect
    /// threshold read as exactly zero so an unplugged sensor does not show
    /// as a large negative current.
    #[must_use]
    pub fn raw_to_current(&self, raw: u16) -> f32 {
        if raw < ADC_DISCONNECT_THRESHOLD {
            return 0.0;
        }
        let volts = f32::from(raw) * ADC_REFERENCE_V / f32::from(ADC_MAX_COUNT);
        // Magnitude only: the shunt is bidirectional and the limits are
        // symmetric.
        libm::fabsf((volts - self.offset_v) / self.volts_per_amp)
    }
}

/// Per-board default calibration: channels 0 and 1 are DC legs, channel 2
/// the rotating-field bus.
#[must_use]
pub const fn default_current_cal() -> [CurrentChannelCal; CURRENT_CHANNELS] {
    [
        CurrentChannelCal::dc_leg(),
        CurrentChannelCal::dc_leg(),
        CurrentChannelCal::field_bus(),
    ]
}

/// Faults reported by a MAX31855 frame.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ThermocoupleFault {
    OpenCircuit,
    ShortToGround,
    ShortToVcc,
}

impl fmt::Display for ThermocoupleFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThermocoupleFault::OpenCircuit => f.write_str("open circuit"),
            ThermocoupleFault::ShortToGround => f.write_str("short to GND"),
            ThermocoupleFault::ShortToVcc => f.write_str("short to VCC"),
        }
    }
}

/// Decodes a 32-bit MAX31855 frame into degrees Celsius.
///
/// The hot-junction reading is a signed 14-bit field in bits 31..18 with
/// 0.25 C resolution. Fault bits take priority over the temperature field.
pub fn decode_thermocouple(frame: u32) -> Result<f32, ThermocoupleFault> {
    if frame & (1 << 16) != 0 {
        if frame & 0x1 != 0 {
            return Err(ThermocoupleFault::OpenCircuit);
        }
        if frame & 0x2 != 0 {
            return Err(ThermocoupleFault::ShortToGround);
        }
        return Err(ThermocoupleFault::ShortToVcc);
    }

    let mut value = ((frame >> 18) & 0x3FFF) as i32;
    if value & 0x2000 != 0 {
        value -= 0x4000;
    }
    Ok(value as f32 * 0.25)
}

/// One poll's worth of converted sensor readings.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SensorSample {
    pub currents_a: [f32; CURRENT_CHANNELS],
    /// `None` for a channel with a faulted or absent thermocouple; faulted
    /// channels do not participate in the over-temperature debounce.
    pub temperatures_c: [Option<f32>; THERMOCOUPLE_CHANNELS],
}

/// A confirmed protection trip.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum TripEvent {
    Overcurrent { channel: usize, amps: f32 },
    Overtemperature { channel: usize, celsius: f32 },
}

impl fmt::Display for TripEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TripEvent::Overcurrent { channel, amps } => {
                write!(f, "overcurrent on channel {channel}: {amps:.1} A")
            }
            TripEvent::Overtemperature { channel, celsius } => {
                write!(f, "overtemperature on channel {channel}: {celsius:.1} C")
            }
        }
    }
}

/// Debounced limit checking across all protection channels.
#[derive(Clone, Debug)]
pub struct ProtectionMonitor {
    calibration: [CurrentChannelCal; CURRENT_CHANNELS],
    current_strikes: [u8; CURRENT_CHANNELS],
    temperature_strikes: [u8; THERMOCOUPLE_CHANNELS],
}

impl Default for ProtectionMonitor {
    fn default() -> Self {
        Self::new(default_current_cal())
    }
}

impl ProtectionMonitor {
    #[must_use]
    pub const fn new(calibration: [CurrentChannelCal; CURRENT_CHANNELS]) -> Self {
        Self {
            calibration,
            current_strikes: [0; CURRENT_CHANNELS],
            temperature_strikes: [0; THERMOCOUPLE_CHANNELS],
        }
    }

    #[must_use]
    pub fn calibration(&self, channel: usize) -> &CurrentChannelCal {
        &self.calibration[channel]
    }

    /// Converts raw ADC counts to amps using the per-channel calibration.
    #[must_use]
    pub fn convert_currents(&self, raw: [u16; CURRENT_CHANNELS]) -> [f32; CURRENT_CHANNELS] {
        let mut amps = [0.0; CURRENT_CHANNELS];
        for (index, value) in amps.iter_mut().enumerate() {
            *value = self.calibration[index].raw_to_current(raw[index]);
        }
        amps
    }

    /// Evaluates one sample set, returning the first confirmed trip if any
    /// debounce counter reached its threshold this poll.
    ///
    /// An in-range reading resets that channel's counter; the counters only
    /// accumulate across consecutive out-of-range polls.
    pub fn check(&mut self, sample: &SensorSample) -> Option<TripEvent> {
        let mut trip = None;

        for (channel, &amps) in sample.currents_a.iter().enumerate() {
            if amps > self.calibration[channel].limit_a {
                self.current_strikes[channel] = self.current_strikes[channel].saturating_add(1);
                if trip.is_none() && self.current_strikes[channel] >= OCP_DEBOUNCE_POLLS {
                    trip = Some(TripEvent::Overcurrent { channel, amps });
                }
            } else {
                self.current_strikes[channel] = 0;
            }
        }

        for (channel, reading) in sample.temperatures_c.iter().enumerate() {
            match reading {
                Some(celsius) if *celsius > MAX_TEMPERATURE_C => {
                    self.temperature_strikes[channel] =
                        self.temperature_strikes[channel].saturating_add(1);
                    if trip.is_none() && self.temperature_strikes[channel] >= OTP_DEBOUNCE_POLLS {
                        trip = Some(TripEvent::Overtemperature {
                            channel,
                            celsius: *celsius,
                        });
                    }
                }
                _ => self.temperature_strikes[channel] = 0,
            }
        }

        trip
    }

    /// Current debounce strike count for a current channel.
    #[must_use]
    pub fn current_strikes(&self, channel: usize) -> u8 {
        self.current_strikes[channel]
    }

    /// Current debounce strike count for a thermocouple channel.
    #[must_use]
    pub fn temperature_strikes(&self, channel: usize) -> u8 {
        self.temperature_strikes[channel]
    }
}
