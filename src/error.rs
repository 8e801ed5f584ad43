//! Custom error types for the application.
//!
//! This module defines the primary error type, `SlmError`, for the whole crate,
//! plus `HardwareError` for failures reported by (or about) the SLM device.
//! Using the `thiserror` crate, it provides a centralized and consistent way to
//! handle the different kinds of errors that can occur between parameter input
//! and the hardware.
//!
//! ## Error Hierarchy
//!
//! - **`Configuration`**: Malformed or empty parameter input, or a grating whose
//!   pixel period is degenerate. Returned immediately and never retried.
//! - **`Calibration`**: No lookup table is registered for any wavelength. Fatal for
//!   the build call that needed it; the previously built sequence is untouched.
//! - **`Hardware`**: Wraps [`HardwareError`]. This includes `NotInitialized`, which
//!   blocks every hardware-facing operation until a successful initialize.
//! - **`IndexOutOfRange`**: A single-frame request outside the current sequence.
//! - **`InvalidState`**: An operation that the playback state machine does not
//!   allow from the current state (e.g. loading before anything was built).
//!
//! Configuration *file* problems have their own type,
//! [`ConfigError`](crate::config::ConfigError), because they are only relevant at
//! startup.

use thiserror::Error;

use crate::sequence::PlaybackState;

/// Convenience alias for results using the crate error type.
pub type SlmResult<T> = std::result::Result<T, SlmError>;

/// Convenience alias for results of device calls.
pub type HardwareResult<T> = std::result::Result<T, HardwareError>;

/// Crate-wide error type.
#[derive(Error, Debug)]
pub enum SlmError {
    /// Invalid parameter input or degenerate grating geometry.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// No usable calibration lookup table.
    #[error("Calibration error: {0}")]
    Calibration(String),

    /// Failure reported by or about the SLM device.
    #[error("Hardware error: {0}")]
    Hardware(#[from] HardwareError),

    /// Requested frame index is outside the current sequence.
    #[error("Frame index {index} out of range for sequence of length {len}")]
    IndexOutOfRange {
        /// Requested index
        index: usize,
        /// Current sequence length
        len: usize,
    },

    /// Operation not permitted from the current playback state.
    #[error("Cannot {operation} while sequence is {state}")]
    InvalidState {
        /// Name of the rejected operation
        operation: &'static str,
        /// State at the time of the call
        state: PlaybackState,
    },
}

/// Errors raised by the device layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HardwareError {
    /// Any device operation attempted before a successful initialize.
    #[error("SLM is not initialized")]
    NotInitialized,

    /// Vendor library found no boards.
    #[error("No SLM device found")]
    NoDeviceFound,

    /// Vendor library found several boards; only one is supported.
    #[error("More than one SLM device found ({found}); only a single device is supported")]
    MultipleDevicesFound {
        /// Number of boards reported
        found: u32,
    },

    /// Device pixel geometry differs from the configured geometry.
    #[error(
        "Device reports {actual_width}x{actual_height} pixels, configured for {expected_width}x{expected_height}"
    )]
    GeometryMismatch {
        /// Configured width
        expected_width: u32,
        /// Configured height
        expected_height: u32,
        /// Width reported by the device
        actual_width: u32,
        /// Height reported by the device
        actual_height: u32,
    },

    /// A frame handed to the device has the wrong dimensions.
    #[error("Frame is {width}x{height}, device expects {expected_width}x{expected_height}")]
    FrameGeometry {
        /// Frame width
        width: usize,
        /// Frame height
        height: usize,
        /// Device width
        expected_width: u32,
        /// Device height
        expected_height: u32,
    },

    /// Triggered playback needs two or more frames.
    #[error("Sequence load expects two or more images, got {0}")]
    SequenceTooShort(usize),

    /// Direct image write failed.
    #[error("Image write failed: {0}")]
    WriteFailed(String),

    /// Bulk sequence load failed.
    #[error("Sequence load failed: {0}")]
    LoadFailed(String),

    /// Any other failure reported by the vendor call surface.
    #[error("Device call failed: {0}")]
    Device(String),
}
