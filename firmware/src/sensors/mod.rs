//! Raw sensor acquisition: current-sense ADC channels and the MAX31855K
//! thermocouple bank on SPI1.
//!
//! This layer only gathers hardware values; conversion and limit checks
//! live in `converter_core::supervisor`.

use converter_core::protection::{CURRENT_CHANNELS, THERMOCOUPLE_CHANNELS};
use converter_core::supervisor::RawReadings;
use embassy_rp::adc::{Adc, Async, Channel};
use embassy_rp::gpio::Output;
use embassy_rp::spi::{Blocking, Spi};

/// Frame returned for a channel the SPI bus failed to read: fault flag plus
/// the open-circuit bit, so it decodes as a sensor fault downstream.
const FAULT_FRAME: u32 = 0x0001_0001;

pub struct SensorBank {
    adc: Adc<'static, Async>,
    current_inputs: [Channel<'static>; CURRENT_CHANNELS],
    spi: Spi<'static, Blocking>,
    chip_selects: [Output<'static>; THERMOCOUPLE_CHANNELS],
}

impl SensorBank {
    pub fn new(
        adc: Adc<'static, Async>,
        current_inputs: [Channel<'static>; CURRENT_CHANNELS],
        spi: Spi<'static, Blocking>,
        chip_selects: [Output<'static>; THERMOCOUPLE_CHANNELS],
    ) -> Self {
        Self {
            adc,
            current_inputs,
            spi,
            chip_selects,
        }
    }

    /// Reads every input once. ADC failures report zero counts, which the
    /// conversion layer treats as a disconnected sensor.
    pub async fn sample(&mut self) -> RawReadings {
        let mut adc_counts = [0_u16; CURRENT_CHANNELS];
        for (count, input) in adc_counts.iter_mut().zip(self.current_inputs.iter_mut()) {
            match self.adc.read(input).await {
                Ok(raw) => *count = raw,
                Err(_) => defmt::warn!("ADC sample failed"),
            }
        }

        let mut thermocouple_frames = [0_u32; THERMOCOUPLE_CHANNELS];
        for (frame, cs) in thermocouple_frames
            .iter_mut()
            .zip(self.chip_selects.iter_mut())
        {
            let mut rx = [0_u8; 4];
            cs.set_low();
            let read = self.spi.blocking_read(&mut rx);
            cs.set_high();
            *frame = match read {
                Ok(()) => u32::from_be_bytes(rx),
                Err(_) => {
                    defmt::warn!("thermocouple SPI read failed");
                    FAULT_FRAME
                }
            };
        }

        RawReadings {
            adc_counts,
            thermocouple_frames,
        }
    }
}
