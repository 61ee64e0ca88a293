#![no_std]

// Shared logic for the dual-core converter controller.
//
// This crate stays portable across MCU firmware and host tooling by avoiding the
// Rust standard library and exposing trait seams the other crates can adopt.

pub mod discharge;
pub mod protection;
pub mod repl;
pub mod shutdown;
pub mod supervisor;
pub mod telemetry;
pub mod timing;
pub mod trigger;
pub mod waveform;
