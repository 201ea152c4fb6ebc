//! motionplay library: transit direction detection for an infrared hoop.
//!
//! The hoop carries three sensor modules, each with one proximity sensor
//! facing side A of the detection plane and one facing side B. Sensors sit
//! behind a two-level I²C multiplexer tree. This crate contains all
//! addressing, acquisition, signal processing and protocol logic with no
//! platform dependencies, testable on any host with `cargo test`. The
//! ESP-IDF firmware in `firmware-std/` is a thin consumer that provides the
//! bus, the interrupt lines, threads and serial output.
//!
//! The layers, bottom up:
//! - **Addressing**: `mux`, `vcnl4040`, `sensor`, `board`
//! - **Acquisition**: `calibration`, `polling`, `interrupt`, `session`
//! - **Signal processing**: `wave`, `matcher`, `detector`
//! - **Host interface**: `protocol`, `comm`
//!
//! Configuration lives in `config` with documented defaults in `defaults`.

#![cfg_attr(not(test), no_std)]

pub mod board;
pub mod calibration;
pub mod comm;
pub mod config;
pub mod defaults;
pub mod detector;
pub mod error;
pub mod interrupt;
pub mod matcher;
pub mod mux;
pub mod polling;
pub mod protocol;
pub mod sensor;
pub mod session;
pub mod vcnl4040;
pub mod wave;

#[cfg(test)]
mod testutil;
