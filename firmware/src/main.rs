#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

#[cfg(target_os = "none")]
extern crate panic_halt;

mod shared;

#[cfg(target_os = "none")]
mod hw;
#[cfg(target_os = "none")]
mod phase;
#[cfg(target_os = "none")]
mod runtime;
#[cfg(target_os = "none")]
mod sensors;

#[cfg(not(target_os = "none"))]
fn main() {}
