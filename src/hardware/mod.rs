//! SLM hardware layer
//!
//! [`SlmDevice`] is the capability set a vendor SLM library exposes (board
//! discovery, power, direct image writes, triggered sequence playback, status).
//! It is deliberately thin: implementations translate each call to the vendor
//! SDK and report failures as [`HardwareError`].
//!
//! [`SlmHandle`] is the only way the rest of the crate talks to a device. It is
//! produced by [`SlmHandle::open`] after a successful initialize handshake, so
//! holding a handle means the device is initialized. Dropping the handle cleans
//! the device up.
//!
//! # Available Devices
//!
//! - [`MockSlm`] - Simulated SLM with call logging and failure injection

pub mod mock;

pub use mock::MockSlm;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::error::{HardwareError, HardwareResult};
use crate::pattern::Pattern;

/// Pixel geometry and native bit depth of an SLM.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeviceGeometry {
    /// Columns
    pub width: u32,
    /// Rows
    pub height: u32,
    /// Physical pixel pitch in microns
    pub pixel_pitch_um: f64,
    /// Native bit depth (1..=16)
    pub bit_depth: u8,
}

impl DeviceGeometry {
    /// Create a geometry description.
    pub fn new(width: u32, height: u32, pixel_pitch_um: f64, bit_depth: u8) -> Self {
        Self {
            width,
            height,
            pixel_pitch_um,
            bit_depth,
        }
    }

    /// Largest representable gray level, `2^bit_depth - 1`.
    pub fn max_level(&self) -> u16 {
        let bits = u32::from(self.bit_depth.clamp(1, 16));
        ((1u32 << bits) - 1) as u16
    }

    /// Number of pixels in one frame.
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Whether `(width, height)` in pixels matches this geometry.
    pub fn matches(&self, width: usize, height: usize) -> bool {
        width == self.width as usize && height == self.height as usize
    }
}

/// Vendor SLM capability set.
///
/// Every method other than [`initialize`](SlmDevice::initialize) and
/// [`cleanup`](SlmDevice::cleanup) must fail with
/// [`HardwareError::NotInitialized`] while the device is not initialized.
/// Calls are blocking and may take seconds.
pub trait SlmDevice: Send + Sync {
    /// Open the vendor library and return the number of boards found.
    fn initialize(&self) -> HardwareResult<u32>;

    /// Release the vendor library.
    fn cleanup(&self) -> HardwareResult<()>;

    /// Whether a successful initialize is in effect.
    fn is_initialized(&self) -> bool;

    /// Reported `(width, height)` in pixels.
    fn image_size(&self) -> HardwareResult<(u32, u32)>;

    /// Current power state.
    fn power(&self) -> HardwareResult<bool>;

    /// Switch the modulator on or off.
    fn set_power(&self, on: bool) -> HardwareResult<()>;

    /// Display one frame immediately.
    fn write_image(&self, frame: &Pattern) -> HardwareResult<()>;

    /// Write a wavefront-correction image (row-major levels).
    fn write_calibration(&self, image: &[u16]) -> HardwareResult<()>;

    /// Upload frames for triggered playback.
    fn load_sequence(&self, frames: &[&Pattern]) -> HardwareResult<()>;

    /// Start responding to external triggers.
    fn start_sequence(&self) -> HardwareResult<()>;

    /// Stop responding to external triggers.
    fn stop_sequence(&self) -> HardwareResult<()>;

    /// Index of the frame that will be shown on the next trigger.
    fn current_sequence_index(&self) -> HardwareResult<usize>;

    /// Internal temperature in degrees Celsius.
    fn temperature(&self) -> HardwareResult<f64>;
}

/// An initialized SLM.
///
/// Only constructible through [`SlmHandle::open`]. The device is released by
/// [`SlmHandle::close`], or when the handle is dropped without being closed.
/// Once closed, every call fails with `NotInitialized` even if the device has
/// since been opened again through another handle.
pub struct SlmHandle {
    device: Arc<dyn SlmDevice>,
    geometry: DeviceGeometry,
    released: AtomicBool,
}

impl std::fmt::Debug for SlmHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlmHandle")
            .field("geometry", &self.geometry)
            .field("released", &self.is_released())
            .finish_non_exhaustive()
    }
}

impl SlmHandle {
    /// Initialize `device` and verify it matches `geometry`.
    ///
    /// When `flat_wavefront` is set, a uniform full-scale wavefront correction is
    /// written straight after initialization; the modulator shows nothing until
    /// some correction image has been written.
    ///
    /// # Errors
    /// - `NoDeviceFound` when the vendor library reports zero boards
    /// - `MultipleDevicesFound` when it reports more than one
    /// - `GeometryMismatch` when the reported size differs from `geometry`
    /// - any error from the device itself
    pub fn open(
        device: Arc<dyn SlmDevice>,
        geometry: DeviceGeometry,
        flat_wavefront: bool,
    ) -> HardwareResult<Self> {
        let boards = device.initialize()?;
        match boards {
            0 => {
                release_rejected(device.as_ref());
                return Err(HardwareError::NoDeviceFound);
            }
            1 => {}
            found => {
                release_rejected(device.as_ref());
                return Err(HardwareError::MultipleDevicesFound { found });
            }
        }

        // From here on dropping `handle` cleans up on every error path.
        let handle = Self {
            device,
            geometry,
            released: AtomicBool::new(false),
        };

        let (width, height) = handle.device.image_size()?;
        if width != geometry.width || height != geometry.height {
            return Err(HardwareError::GeometryMismatch {
                expected_width: geometry.width,
                expected_height: geometry.height,
                actual_width: width,
                actual_height: height,
            });
        }

        if flat_wavefront {
            let white = vec![geometry.max_level(); geometry.pixel_count()];
            handle.device.write_calibration(&white)?;
        }

        info!(width, height, "SLM initialized");
        Ok(handle)
    }

    /// Geometry the handle was opened for.
    pub fn geometry(&self) -> &DeviceGeometry {
        &self.geometry
    }

    /// Whether [`close`](Self::close) has run.
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Release the device now. Later calls on this handle (or its clones behind
    /// an `Arc`) fail with `NotInitialized`; closing twice is a no-op.
    pub fn close(&self) -> HardwareResult<()> {
        if self.released.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.device.cleanup()?;
        info!("SLM released");
        Ok(())
    }

    /// Current power state.
    pub fn power(&self) -> HardwareResult<bool> {
        self.check_open()?;
        self.device.power()
    }

    /// Switch the modulator on or off.
    pub fn set_power(&self, on: bool) -> HardwareResult<()> {
        self.check_open()?;
        self.device.set_power(on)
    }

    /// Display one frame immediately.
    pub fn write_image(&self, frame: &Pattern) -> HardwareResult<()> {
        self.check_open()?;
        self.check_frame(frame)?;
        self.device.write_image(frame)
    }

    /// Upload two or more frames for triggered playback.
    pub fn load_sequence(&self, frames: &[&Pattern]) -> HardwareResult<()> {
        self.check_open()?;
        if frames.len() < 2 {
            return Err(HardwareError::SequenceTooShort(frames.len()));
        }
        for frame in frames {
            self.check_frame(frame)?;
        }
        self.device.load_sequence(frames)
    }

    /// Start responding to triggers.
    pub fn start_sequence(&self) -> HardwareResult<()> {
        self.check_open()?;
        self.device.start_sequence()
    }

    /// Stop responding to triggers.
    pub fn stop_sequence(&self) -> HardwareResult<()> {
        self.check_open()?;
        self.device.stop_sequence()
    }

    /// Index that will be displayed on the next trigger.
    pub fn current_sequence_index(&self) -> HardwareResult<usize> {
        self.check_open()?;
        self.device.current_sequence_index()
    }

    /// Internal temperature in degrees Celsius.
    pub fn temperature(&self) -> HardwareResult<f64> {
        self.check_open()?;
        self.device.temperature()
    }

    fn check_open(&self) -> HardwareResult<()> {
        if self.is_released() {
            Err(HardwareError::NotInitialized)
        } else {
            Ok(())
        }
    }

    fn check_frame(&self, frame: &Pattern) -> HardwareResult<()> {
        if self.geometry.matches(frame.width(), frame.height()) {
            Ok(())
        } else {
            Err(HardwareError::FrameGeometry {
                width: frame.width(),
                height: frame.height(),
                expected_width: self.geometry.width,
                expected_height: self.geometry.height,
            })
        }
    }
}

impl Drop for SlmHandle {
    fn drop(&mut self) {
        if self.is_released() {
            return;
        }
        if !self.device.is_initialized() {
            warn!("SLM was already released before its handle was dropped");
            return;
        }
        if let Err(e) = self.device.cleanup() {
            error!("Failed to clean up SLM: {}", e);
        } else {
            info!("SLM released");
        }
    }
}

/// Clean up after a rejected initialize handshake.
fn release_rejected(device: &dyn SlmDevice) {
    if let Err(e) = device.cleanup() {
        error!("Failed to clean up SLM after rejected initialize: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;
    use tracing_test::traced_test;

    fn geometry() -> DeviceGeometry {
        DeviceGeometry::new(8, 8, 15.0, 16)
    }

    fn frame(width: usize, height: usize) -> Pattern {
        Pattern::new(Array2::zeros((height, width)), 532.0)
    }

    #[test]
    fn test_max_level() {
        assert_eq!(DeviceGeometry::new(1, 1, 1.0, 16).max_level(), 65535);
        assert_eq!(DeviceGeometry::new(1, 1, 1.0, 8).max_level(), 255);
        assert_eq!(DeviceGeometry::new(1, 1, 1.0, 1).max_level(), 1);
    }

    #[test]
    fn test_open_single_board() {
        let mock = Arc::new(MockSlm::new(8, 8));
        let handle = SlmHandle::open(mock.clone(), geometry(), true).unwrap();
        assert!(mock.is_initialized());
        assert_eq!(mock.calibration_writes(), 1);
        drop(handle);
        assert!(!mock.is_initialized());
    }

    #[test]
    fn test_open_without_flat_wavefront() {
        let mock = Arc::new(MockSlm::new(8, 8));
        let _handle = SlmHandle::open(mock.clone(), geometry(), false).unwrap();
        assert_eq!(mock.calibration_writes(), 0);
    }

    #[test]
    fn test_open_distinguishes_board_counts() {
        let none = Arc::new(MockSlm::new(8, 8).with_board_count(0));
        assert_eq!(
            SlmHandle::open(none.clone(), geometry(), true).unwrap_err(),
            HardwareError::NoDeviceFound
        );
        assert!(!none.is_initialized());

        let many = Arc::new(MockSlm::new(8, 8).with_board_count(2));
        assert_eq!(
            SlmHandle::open(many.clone(), geometry(), true).unwrap_err(),
            HardwareError::MultipleDevicesFound { found: 2 }
        );
        assert!(!many.is_initialized());
    }

    #[test]
    #[traced_test]
    fn test_rejected_open_logs_failed_cleanup() {
        let many = Arc::new(MockSlm::new(8, 8).with_board_count(2));
        many.inject_failure_on("cleanup");
        assert_eq!(
            SlmHandle::open(many.clone(), geometry(), true).unwrap_err(),
            HardwareError::MultipleDevicesFound { found: 2 }
        );
        assert!(many.was_called("cleanup"));
        assert!(logs_contain("Failed to clean up SLM after rejected initialize"));
    }

    #[test]
    fn test_open_rejects_geometry_mismatch() {
        let mock = Arc::new(MockSlm::new(16, 8));
        let err = SlmHandle::open(mock.clone(), geometry(), true).unwrap_err();
        assert!(matches!(err, HardwareError::GeometryMismatch { .. }));
        assert!(!mock.is_initialized());
    }

    #[test]
    fn test_load_sequence_requires_two_frames() {
        let mock = Arc::new(MockSlm::new(8, 8));
        let handle = SlmHandle::open(mock.clone(), geometry(), false).unwrap();
        let single = frame(8, 8);
        assert_eq!(
            handle.load_sequence(&[&single]).unwrap_err(),
            HardwareError::SequenceTooShort(1)
        );
        assert_eq!(mock.loaded_sequence_len(), 0);

        let other = frame(8, 8);
        handle.load_sequence(&[&single, &other]).unwrap();
        assert_eq!(mock.loaded_sequence_len(), 2);
    }

    #[test]
    fn test_write_image_checks_geometry() {
        let mock = Arc::new(MockSlm::new(8, 8));
        let handle = SlmHandle::open(mock.clone(), geometry(), false).unwrap();
        let err = handle.write_image(&frame(4, 8)).unwrap_err();
        assert!(matches!(err, HardwareError::FrameGeometry { .. }));
        assert!(mock.written_images().is_empty());
    }

    #[test]
    fn test_close_releases_once() {
        let mock = Arc::new(MockSlm::new(8, 8));
        let handle = SlmHandle::open(mock.clone(), geometry(), false).unwrap();
        handle.close().unwrap();
        handle.close().unwrap();
        assert!(!mock.is_initialized());
        assert_eq!(handle.power().unwrap_err(), HardwareError::NotInitialized);

        mock.clear_log();
        drop(handle);
        assert!(mock.call_log().is_empty());
    }

    #[test]
    fn test_closed_handle_leaves_new_session_alone() {
        let mock = Arc::new(MockSlm::new(8, 8));
        let old = SlmHandle::open(mock.clone(), geometry(), false).unwrap();
        old.close().unwrap();

        let current = SlmHandle::open(mock.clone(), geometry(), false).unwrap();
        assert_eq!(old.temperature().unwrap_err(), HardwareError::NotInitialized);
        drop(old);
        assert!(mock.is_initialized());
        assert_eq!(current.temperature().unwrap(), 25.0);
    }
}
