//! Rolling thermal history.
//!
//! The supervisor appends one entry per sensor poll; the log keeps the most
//! recent window and renders it as CSV on demand. Rendering stays available
//! after shutdown so the thermal record leading up to a trip can always be
//! recovered.

use core::fmt;

use heapless::HistoryBuf;

use crate::protection::THERMOCOUPLE_CHANNELS;

/// Entries retained in the rolling window.
pub const THERMAL_LOG_CAPACITY: usize = 600;

/// One sensor poll's temperatures with its capture time.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ThermalEntry {
    pub timestamp_ms: u64,
    /// `None` marks a faulted or absent thermocouple at capture time.
    pub temperatures_c: [Option<f32>; THERMOCOUPLE_CHANNELS],
}

/// Fixed-capacity ring of thermal entries, oldest evicted first.
#[derive(Debug, Default)]
pub struct ThermalLog {
    entries: HistoryBuf<ThermalEntry, THERMAL_LOG_CAPACITY>,
}

impl ThermalLog {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: HistoryBuf::new(),
        }
    }

    pub fn record(&mut self, entry: ThermalEntry) {
        self.entries.write(entry);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in capture order, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &ThermalEntry> {
        self.entries.oldest_ordered()
    }

    /// Renders the whole window as CSV with a header row.
    pub fn write_csv<W: fmt::Write>(&self, out: &mut W) -> fmt::Result {
        write_csv_header(out)?;
        for entry in self.iter() {
            entry.write_csv_row(out)?;
        }
        Ok(())
    }
}

/// CSV column header matching [`ThermalEntry::write_csv_row`].
pub fn write_csv_header<W: fmt::Write>(out: &mut W) -> fmt::Result {
    out.write_str("time_ms,tc1_c,tc2_c,tc3_c,tc4_c\n")
}

impl ThermalEntry {
    /// One CSV data row. Faulted channels render as `nan` so row width
    /// stays fixed.
    pub fn write_csv_row<W: fmt::Write>(&self, out: &mut W) -> fmt::Result {
        write!(out, "{}", self.timestamp_ms)?;
        for reading in &self.temperatures_c {
            match reading {
                Some(celsius) => write!(out, ",{celsius:.2}")?,
                None => out.write_str(",nan")?,
            }
        }
        out.write_str("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(timestamp_ms: u64, base: f32) -> ThermalEntry {
        ThermalEntry {
            timestamp_ms,
            temperatures_c: [Some(base), Some(base + 1.0), Some(base + 2.0), None],
        }
    }

    #[test]
    fn iterates_oldest_first() {
        let mut log = ThermalLog::new();
        log.record(entry(100, 20.0));
        log.record(entry(200, 21.0));
        log.record(entry(300, 22.0));

        let stamps: heapless::Vec<u64, 4> = log.iter().map(|e| e.timestamp_ms).collect();
        assert_eq!(stamps.as_slice(), &[100, 200, 300]);
    }

    #[test]
    fn evicts_beyond_capacity() {
        let mut log = ThermalLog::new();
        for i in 0..(THERMAL_LOG_CAPACITY as u64 + 5) {
            log.record(entry(i, 20.0));
        }
        assert_eq!(log.len(), THERMAL_LOG_CAPACITY);
        let first = log.iter().next().map(|e| e.timestamp_ms);
        assert_eq!(first, Some(5));
    }

    #[test]
    fn csv_renders_header_and_nan_for_faults() {
        let mut log = ThermalLog::new();
        log.record(entry(1_000, 25.5));

        let mut rendered = heapless::String::<256>::new();
        log.write_csv(&mut rendered).expect("buffer large enough");
        assert_eq!(
            rendered.as_str(),
            "time_ms,tc1_c,tc2_c,tc3_c,tc4_c\n1000,25.50,26.50,27.50,nan\n"
        );
    }
}
