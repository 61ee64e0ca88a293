//! Debug-mode trigger override shared by both waveform engines.
//!
//! Each engine is normally started by a hardware trigger pin. For bench
//! bring-up a debug mode substitutes a manually driven flag for the pin, and
//! every consumer, including status reporting, must look through the same
//! indirection so the two never disagree.

/// Manual trigger override state for one trigger input.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct TriggerOverride {
    /// When set, the hardware pin is ignored in favor of [`Self::manual`].
    pub debug_mode: bool,
    /// Manually driven trigger level, only honored in debug mode.
    pub manual: bool,
}

impl TriggerOverride {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            debug_mode: false,
            manual: false,
        }
    }

    /// The trigger level every consumer must act on.
    #[must_use]
    pub const fn effective(&self, hardware_pin: bool) -> bool {
        if self.debug_mode { self.manual } else { hardware_pin }
    }

    /// Entering or leaving debug mode always drops the manual level so a
    /// stale override cannot fire a sequence on re-entry.
    pub fn set_debug_mode(&mut self, enable: bool) {
        self.debug_mode = enable;
        self.manual = false;
    }

    /// Updates the manual level; refused outside debug mode.
    pub fn set_manual(&mut self, level: bool) -> Result<(), DebugModeRequired> {
        if self.debug_mode {
            self.manual = level;
            Ok(())
        } else {
            Err(DebugModeRequired)
        }
    }
}

/// Manual trigger writes are only legal while debug mode is active.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DebugModeRequired;

/// Snapshot of one trigger input for status reporting.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TriggerStatus {
    pub hardware_pin: bool,
    pub debug_mode: bool,
    pub manual: bool,
    pub effective: bool,
}

impl TriggerStatus {
    #[must_use]
    pub const fn capture(overridden: TriggerOverride, hardware_pin: bool) -> Self {
        Self {
            hardware_pin,
            debug_mode: overridden.debug_mode,
            manual: overridden.manual,
            effective: overridden.effective(hardware_pin),
        }
    }
}
