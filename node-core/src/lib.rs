#![no_std]

// Shared logic for the sensor node duty cycle.
//
// This crate stays portable across MCU firmware and host tooling by avoiding the
// Rust standard library and exposing abstractions the other crates can adopt.

pub mod config;
pub mod hibernation;
pub mod lifecycle;
pub mod repl;
pub mod retained;
pub mod rtc;
pub mod sleep;
pub mod telemetry;
