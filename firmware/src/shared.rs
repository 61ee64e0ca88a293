//! State shared between the console core and the discharge core.
//!
//! The discharge configuration is published whole under a critical-section
//! mutex; the tick loop on the second core keeps a private copy and only
//! re-clones when the generation counter moves, so the common path is two
//! atomic loads. The shutdown flag is sticky for the life of the process.

#![cfg_attr(not(target_os = "none"), allow(dead_code))]

use core::cell::RefCell;

use converter_core::discharge::{DischargeFlags, DischargeProgram, StepPolicy};
use converter_core::protection::SensorSample;
use converter_core::supervisor::Supervisor;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::signal::Signal;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use portable_atomic::{AtomicBool, AtomicU32, Ordering};

type SharedRawMutex = CriticalSectionRawMutex;

/// Everything the discharge tick loop needs to resolve output levels.
#[derive(Clone, Debug)]
pub struct DischargeSettings {
    pub program: DischargeProgram,
    pub flags: DischargeFlags,
    pub policy: StepPolicy,
}

impl DischargeSettings {
    const fn new() -> Self {
        Self {
            program: DischargeProgram::disabled(),
            flags: DischargeFlags::new(),
            policy: StepPolicy::ModuloLoop,
        }
    }
}

static DISCHARGE: Mutex<SharedRawMutex, RefCell<DischargeSettings>> =
    Mutex::new(RefCell::new(DischargeSettings::new()));
static DISCHARGE_GENERATION: AtomicU32 = AtomicU32::new(0);

/// Set once by the supervisor; never cleared.
static SHUTDOWN: AtomicBool = AtomicBool::new(false);

/// Mirrors the discharge engine's run state for status reporting.
static DISCHARGE_RUNNING: AtomicBool = AtomicBool::new(false);

/// Replaces the published discharge settings in one step.
pub fn publish_discharge(program: &DischargeProgram, flags: DischargeFlags, policy: StepPolicy) {
    DISCHARGE.lock(|cell| {
        let mut settings = cell.borrow_mut();
        settings.program = program.clone();
        settings.flags = flags;
        settings.policy = policy;
    });
    DISCHARGE_GENERATION.fetch_add(1, Ordering::Release);
}

/// Current publish generation; changes whenever the settings do.
pub fn discharge_generation() -> u32 {
    DISCHARGE_GENERATION.load(Ordering::Acquire)
}

/// Clones the published settings for local use on the tick core.
pub fn clone_discharge() -> DischargeSettings {
    DISCHARGE.lock(|cell| cell.borrow().clone())
}

pub fn is_shut_down() -> bool {
    SHUTDOWN.load(Ordering::Acquire)
}

pub fn latch_shutdown() {
    SHUTDOWN.store(true, Ordering::Release);
}

/// Raw discharge trigger pad level, mirrored by the tick core each tick so
/// the console can report it without touching the pin.
static DISCHARGE_TRIGGER_LEVEL: AtomicBool = AtomicBool::new(false);

pub fn set_discharge_trigger_level(high: bool) {
    DISCHARGE_TRIGGER_LEVEL.store(high, Ordering::Relaxed);
}

pub fn discharge_trigger_level() -> bool {
    DISCHARGE_TRIGGER_LEVEL.load(Ordering::Relaxed)
}

pub fn set_discharge_running(running: bool) {
    DISCHARGE_RUNNING.store(running, Ordering::Relaxed);
}

pub fn is_discharge_running() -> bool {
    DISCHARGE_RUNNING.load(Ordering::Relaxed)
}

/// Protection supervisor, shared so the console can dump the thermal log
/// and read the trip cause while the poll task keeps it fed.
static SUPERVISOR: Mutex<SharedRawMutex, RefCell<Option<Supervisor>>> =
    Mutex::new(RefCell::new(None));

/// Installs the supervisor. Call once during startup, before the poll task
/// runs.
pub fn init_supervisor() {
    SUPERVISOR.lock(|cell| {
        *cell.borrow_mut() = Some(Supervisor::new());
    });
}

/// Runs `f` against the supervisor while the lock is held. Returns `None`
/// only before [`init_supervisor`].
pub fn with_supervisor<R>(f: impl FnOnce(&mut Supervisor) -> R) -> Option<R> {
    SUPERVISOR.lock(|cell| cell.borrow_mut().as_mut().map(f))
}

/// Most recent converted sensor sample, refreshed every supervisor poll.
static LATEST_SAMPLE: Mutex<SharedRawMutex, RefCell<Option<SensorSample>>> =
    Mutex::new(RefCell::new(None));

pub fn store_latest_sample(sample: SensorSample) {
    LATEST_SAMPLE.lock(|cell| {
        *cell.borrow_mut() = Some(sample);
    });
}

pub fn latest_sample() -> Option<SensorSample> {
    LATEST_SAMPLE.lock(|cell| *cell.borrow())
}

/// Relay commands cross from the console to the supervisor task, which owns
/// the contactor output and refuses requests after a latch.
pub static RELAY_REQUEST: Signal<SharedRawMutex, bool> = Signal::new();
