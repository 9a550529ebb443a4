//! WebAssembly bindings for the microdrive simulator.
//!
//! This module exposes the control engine, simulated peripherals and cartridge
//! sequencer to JavaScript, enabling browser-based protocol experiments.

#[cfg(feature = "wasm")]
pub mod api;

#[cfg(feature = "wasm")]
pub use api::MicrodriveSim;
