//! Core library for the rust_slm application.
//!
//! Drives a phase spatial light modulator (SLM) used as the pattern generator of
//! a structured-illumination microscope. The data path is:
//!
//! ```text
//! OpticalParameters -> PatternSynthesizer -> CalibrationRegistry -> SequenceManager -> SlmDevice
//!                      (raw grating)         (LUT lookup)            (ordering, playback)
//! ```
//!
//! - [`synthesis`]: cosine grating rasters from pitch, angle, phase and weight
//! - [`calibration`]: wavelength-indexed lookup tables and flatness maps
//! - [`sequence`]: the sequence manager and its playback state machine
//! - [`hardware`]: the device capability trait, the guarded handle and a mock
//! - [`sim`]: expansion of SIM angle/phase/wavelength plans into parameter lists
//! - [`config`] and [`tracing_init`]: startup configuration and logging

pub mod calibration;
pub mod config;
pub mod error;
pub mod hardware;
pub mod pattern;
pub mod sequence;
pub mod sim;
pub mod synthesis;
pub mod tracing_init;

pub use error::{HardwareError, SlmError, SlmResult};
