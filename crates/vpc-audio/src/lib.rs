//! Audio peripherals.
//!
//! Currently this is the Disney Sound Source, an 8-bit DAC hanging off the parallel port, plus the
//! small mixer-channel contract it feeds.

pub mod disney;
pub mod sink;

pub use disney::{register_disney, DisneyConfig, DisneyPorts, DisneySoundSource, DisneyTimer};
pub use sink::{CaptureChannel, MixChunk, MixerChannel};
