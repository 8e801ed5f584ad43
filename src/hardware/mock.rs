//! Mock SLM Implementation
//!
//! Provides a simulated spatial light modulator for testing without physical
//! hardware. It behaves like the vendor library as seen through [`SlmDevice`]:
//!
//! - Board discovery with a configurable board count
//! - `NotInitialized` from every call before a successful initialize
//! - Call logging for test verification
//! - One-shot failure injection, for the next call or for a named call
//!
//! # Example
//!
//! ```
//! use rust_slm::hardware::{MockSlm, SlmDevice};
//!
//! let slm = MockSlm::new(512, 512);
//! assert!(slm.power().is_err()); // not initialized yet
//! assert_eq!(slm.initialize().unwrap(), 1);
//! slm.set_power(true).unwrap();
//! assert!(slm.power().unwrap());
//! ```

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tracing::debug;

use super::SlmDevice;
use crate::error::{HardwareError, HardwareResult};
use crate::pattern::Pattern;

#[derive(Debug, Default)]
struct MockState {
    initialized: bool,
    power: bool,
    running: bool,
    loaded: Vec<Pattern>,
    written: Vec<Pattern>,
    calibration_writes: usize,
    next_index: usize,
    temperature_c: f64,
}

/// Simulated SLM.
///
/// All state is behind interior mutability so the same instance can be shared
/// as `Arc<dyn SlmDevice>` while a test inspects it.
#[derive(Debug)]
pub struct MockSlm {
    width: u32,
    height: u32,
    board_count: u32,
    state: Mutex<MockState>,
    should_fail_next: AtomicBool,
    fail_call: Mutex<Option<String>>,
    call_log: Mutex<Vec<String>>,
}

impl MockSlm {
    /// Create a single-board mock reporting `width` x `height` pixels.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            board_count: 1,
            state: Mutex::new(MockState {
                temperature_c: 25.0,
                ..MockState::default()
            }),
            should_fail_next: AtomicBool::new(false),
            fail_call: Mutex::new(None),
            call_log: Mutex::new(Vec::new()),
        }
    }

    /// Number of boards `initialize` reports.
    pub fn with_board_count(mut self, boards: u32) -> Self {
        self.board_count = boards;
        self
    }

    /// Set the reported temperature.
    pub fn with_temperature(self, celsius: f64) -> Self {
        self.state.lock().temperature_c = celsius;
        self
    }

    /// Set the index the device reports for its next trigger.
    pub fn set_next_index(&self, index: usize) {
        self.state.lock().next_index = index;
    }

    /// Make the next device call (other than `cleanup`) fail.
    pub fn inject_next_failure(&self) {
        self.should_fail_next.store(true, Ordering::SeqCst);
    }

    /// Make the next call logged as `call` fail, whatever runs before it.
    /// Accepts the call-log names, e.g. `"start_sequence"`, `"set_power(false)"`
    /// or `"cleanup"`.
    pub fn inject_failure_on(&self, call: &str) {
        *self.fail_call.lock() = Some(call.to_string());
    }

    /// Calls made so far, in order.
    pub fn call_log(&self) -> Vec<String> {
        self.call_log.lock().clone()
    }

    /// Whether `call` appears in the call log.
    pub fn was_called(&self, call: &str) -> bool {
        self.call_log.lock().iter().any(|c| c == call)
    }

    /// Clear the call log.
    pub fn clear_log(&self) {
        self.call_log.lock().clear();
    }

    /// Frames written through the direct write path.
    pub fn written_images(&self) -> Vec<Pattern> {
        self.state.lock().written.clone()
    }

    /// Frames from the most recent sequence load.
    pub fn loaded_sequence(&self) -> Vec<Pattern> {
        self.state.lock().loaded.clone()
    }

    /// Length of the most recent sequence load.
    pub fn loaded_sequence_len(&self) -> usize {
        self.state.lock().loaded.len()
    }

    /// Number of wavefront-correction writes.
    pub fn calibration_writes(&self) -> usize {
        self.state.lock().calibration_writes
    }

    /// Whether triggered playback is active.
    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    fn log_call(&self, call: &str) {
        debug!(call, "MockSlm");
        self.call_log.lock().push(call.to_string());
    }

    fn check_failure(&self) -> bool {
        self.should_fail_next.swap(false, Ordering::SeqCst)
    }

    fn check_named_failure(&self, call: &str) -> bool {
        let mut fail_call = self.fail_call.lock();
        if fail_call.as_deref() == Some(call) {
            *fail_call = None;
            true
        } else {
            false
        }
    }

    /// Log the call, then apply the initialized precondition and any injected failure.
    fn begin(&self, call: &str, failure: fn(String) -> HardwareError) -> HardwareResult<()> {
        self.log_call(call);
        if !self.state.lock().initialized {
            return Err(HardwareError::NotInitialized);
        }
        if self.check_named_failure(call) || self.check_failure() {
            return Err(failure(format!("Injected failure in {call}")));
        }
        Ok(())
    }
}

impl SlmDevice for MockSlm {
    fn initialize(&self) -> HardwareResult<u32> {
        self.log_call("initialize");
        if self.check_failure() {
            return Err(HardwareError::Device("Injected failure in initialize".into()));
        }
        self.state.lock().initialized = self.board_count > 0;
        Ok(self.board_count)
    }

    fn cleanup(&self) -> HardwareResult<()> {
        self.log_call("cleanup");
        if self.check_named_failure("cleanup") {
            return Err(HardwareError::Device("Injected failure in cleanup".into()));
        }
        let mut state = self.state.lock();
        state.initialized = false;
        state.power = false;
        state.running = false;
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.state.lock().initialized
    }

    fn image_size(&self) -> HardwareResult<(u32, u32)> {
        self.begin("image_size", HardwareError::Device)?;
        Ok((self.width, self.height))
    }

    fn power(&self) -> HardwareResult<bool> {
        self.begin("power", HardwareError::Device)?;
        Ok(self.state.lock().power)
    }

    fn set_power(&self, on: bool) -> HardwareResult<()> {
        self.begin(if on { "set_power(true)" } else { "set_power(false)" }, HardwareError::Device)?;
        self.state.lock().power = on;
        Ok(())
    }

    fn write_image(&self, frame: &Pattern) -> HardwareResult<()> {
        self.begin("write_image", HardwareError::WriteFailed)?;
        self.state.lock().written.push(frame.clone());
        Ok(())
    }

    fn write_calibration(&self, image: &[u16]) -> HardwareResult<()> {
        self.begin("write_calibration", HardwareError::WriteFailed)?;
        if image.len() != self.width as usize * self.height as usize {
            return Err(HardwareError::WriteFailed(format!(
                "calibration image has {} values, expected {}",
                image.len(),
                self.width as usize * self.height as usize
            )));
        }
        self.state.lock().calibration_writes += 1;
        Ok(())
    }

    fn load_sequence(&self, frames: &[&Pattern]) -> HardwareResult<()> {
        self.begin("load_sequence", HardwareError::LoadFailed)?;
        if frames.len() < 2 {
            return Err(HardwareError::SequenceTooShort(frames.len()));
        }
        let mut state = self.state.lock();
        state.loaded = frames.iter().map(|f| (*f).clone()).collect();
        state.next_index = 0;
        Ok(())
    }

    fn start_sequence(&self) -> HardwareResult<()> {
        self.begin("start_sequence", HardwareError::Device)?;
        self.state.lock().running = true;
        Ok(())
    }

    fn stop_sequence(&self) -> HardwareResult<()> {
        self.begin("stop_sequence", HardwareError::Device)?;
        self.state.lock().running = false;
        Ok(())
    }

    fn current_sequence_index(&self) -> HardwareResult<usize> {
        self.begin("current_sequence_index", HardwareError::Device)?;
        Ok(self.state.lock().next_index)
    }

    fn temperature(&self) -> HardwareResult<f64> {
        self.begin("temperature", HardwareError::Device)?;
        Ok(self.state.lock().temperature_c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn test_mock_requires_initialize() {
        let slm = MockSlm::new(4, 4);
        assert_eq!(slm.power().unwrap_err(), HardwareError::NotInitialized);
        assert_eq!(slm.temperature().unwrap_err(), HardwareError::NotInitialized);
        assert_eq!(slm.start_sequence().unwrap_err(), HardwareError::NotInitialized);

        slm.initialize().unwrap();
        assert!(!slm.power().unwrap());
        assert_eq!(slm.temperature().unwrap(), 25.0);
    }

    #[test]
    fn test_mock_cleanup_resets() {
        let slm = MockSlm::new(4, 4);
        slm.initialize().unwrap();
        slm.set_power(true).unwrap();
        slm.start_sequence().unwrap();
        assert!(slm.is_running());

        slm.cleanup().unwrap();
        assert!(!slm.is_initialized());
        assert!(!slm.is_running());
        assert_eq!(slm.power().unwrap_err(), HardwareError::NotInitialized);
    }

    #[test]
    fn test_mock_injected_failure_is_one_shot() {
        let slm = MockSlm::new(4, 4);
        slm.initialize().unwrap();
        let frame = Pattern::new(Array2::zeros((4, 4)), 532.0);

        slm.inject_next_failure();
        assert!(matches!(
            slm.write_image(&frame),
            Err(HardwareError::WriteFailed(_))
        ));
        slm.write_image(&frame).unwrap();
        assert_eq!(slm.written_images().len(), 1);
    }

    #[test]
    fn test_mock_call_log() {
        let slm = MockSlm::new(4, 4).with_temperature(31.5);
        slm.initialize().unwrap();
        slm.set_power(true).unwrap();
        assert_eq!(slm.temperature().unwrap(), 31.5);
        assert_eq!(
            slm.call_log(),
            vec!["initialize", "set_power(true)", "temperature"]
        );
        slm.clear_log();
        assert!(slm.call_log().is_empty());
    }

    #[test]
    fn test_mock_zero_boards_stays_uninitialized() {
        let slm = MockSlm::new(4, 4).with_board_count(0);
        assert_eq!(slm.initialize().unwrap(), 0);
        assert!(!slm.is_initialized());
    }

    #[test]
    fn test_named_failure_skips_other_calls() {
        let slm = MockSlm::new(8, 8);
        slm.initialize().unwrap();
        slm.inject_failure_on("start_sequence");
        slm.set_power(true).unwrap();
        assert!(slm.start_sequence().is_err());
        slm.start_sequence().unwrap();

        slm.inject_failure_on("cleanup");
        assert!(slm.cleanup().is_err());
        assert!(slm.is_initialized());
    }
}
