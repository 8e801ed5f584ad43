//! Sequence manager.
//!
//! Owns the device handle, the calibration registry and the current
//! [`Sequence`], and drives the [`PlaybackState`] machine. Every method takes
//! `&self` so one manager can be shared between request handlers.
//!
//! Mutating operations are serialized on one internal lock. The sequence, the
//! registry and the handle are each published behind an `RwLock<Arc<_>>`; a
//! reader clones the `Arc` and releases the lock at once, so queries such as
//! [`SequenceManager::get_temperature`] never wait for a long build and never
//! observe a half-replaced sequence.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, info_span, Span};

use super::{PlaybackState, Sequence, SequenceEntry};
use crate::calibration::CalibrationRegistry;
use crate::error::{HardwareError, SlmError, SlmResult};
use crate::hardware::{SlmDevice, SlmHandle};
use crate::pattern::OpticalParameters;
use crate::synthesis::PatternSynthesizer;

/// Builds calibrated sequences and plays them on one SLM.
pub struct SequenceManager {
    device: Arc<dyn SlmDevice>,
    synthesizer: PatternSynthesizer,
    flat_wavefront: bool,
    registry: RwLock<Arc<CalibrationRegistry>>,
    handle: RwLock<Option<Arc<SlmHandle>>>,
    sequence: RwLock<Arc<Sequence>>,
    state: RwLock<PlaybackState>,
    ops: Mutex<()>,
    span: Span,
}

impl std::fmt::Debug for SequenceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequenceManager")
            .field("state", &self.state())
            .field("sequence_len", &self.sequence().len())
            .field("initialized", &self.is_initialized())
            .finish_non_exhaustive()
    }
}

impl SequenceManager {
    /// Create a manager in the `Idle` state. The device is not touched until
    /// [`initialize`](Self::initialize).
    ///
    /// # Errors
    /// `Configuration` when the synthesizer and the registry were built for
    /// different device geometries.
    pub fn new(
        device: Arc<dyn SlmDevice>,
        synthesizer: PatternSynthesizer,
        registry: CalibrationRegistry,
    ) -> SlmResult<Self> {
        check_geometry(&synthesizer, &registry)?;
        Ok(Self {
            device,
            synthesizer,
            flat_wavefront: true,
            registry: RwLock::new(Arc::new(registry)),
            handle: RwLock::new(None),
            sequence: RwLock::new(Arc::new(Sequence::default())),
            state: RwLock::new(PlaybackState::Idle),
            ops: Mutex::new(()),
            span: info_span!("sequence_manager"),
        })
    }

    /// Whether [`initialize`](Self::initialize) writes a flat wavefront
    /// correction (default: yes).
    pub fn with_flat_wavefront(mut self, enabled: bool) -> Self {
        self.flat_wavefront = enabled;
        self
    }

    /// Replace the logging span events from this manager are recorded in.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Current playback state.
    pub fn state(&self) -> PlaybackState {
        *self.state.read()
    }

    /// Snapshot of the current sequence.
    pub fn sequence(&self) -> Arc<Sequence> {
        self.sequence.read().clone()
    }

    /// Snapshot of the current calibration registry.
    pub fn registry(&self) -> Arc<CalibrationRegistry> {
        self.registry.read().clone()
    }

    /// Synthesizer used for every build.
    pub fn synthesizer(&self) -> &PatternSynthesizer {
        &self.synthesizer
    }

    /// Whether a device handle is open.
    pub fn is_initialized(&self) -> bool {
        self.handle.read().is_some()
    }

    /// Parameters of the current sequence, in playback order.
    pub fn get_sequence(&self) -> Vec<OpticalParameters> {
        self.sequence().parameters()
    }

    /// Device temperature in degrees Celsius.
    pub fn get_temperature(&self) -> SlmResult<f64> {
        Ok(self.require_handle()?.temperature()?)
    }

    /// Device power state.
    pub fn get_power(&self) -> SlmResult<bool> {
        Ok(self.require_handle()?.power()?)
    }

    /// Index of the frame on display; see
    /// [`current_display_index`](Self::current_display_index).
    pub fn get_sequence_index(&self) -> SlmResult<usize> {
        self.current_display_index()
    }

    /// Index of the frame currently displayed.
    ///
    /// The device reports the index it will show on the *next* trigger, so the
    /// one on display is the one before it, wrapping at the start.
    ///
    /// # Errors
    /// `InvalidState` when no sequence is built, or any device error.
    pub fn current_display_index(&self) -> SlmResult<usize> {
        let sequence = self.sequence();
        if sequence.is_empty() {
            return Err(SlmError::InvalidState {
                operation: "read the display index",
                state: self.state(),
            });
        }
        let next = self.require_handle()?.current_sequence_index()?;
        Ok(displayed_index(next, sequence.len()))
    }

    // =========================================================================
    // Device lifecycle
    // =========================================================================

    /// Open the device. Calling it again while open is a no-op.
    pub fn initialize(&self) -> SlmResult<()> {
        let _ops = self.ops.lock();
        let _enter = self.span.enter();
        if self.is_initialized() {
            debug!("SLM already initialized");
            return Ok(());
        }
        let handle = SlmHandle::open(
            Arc::clone(&self.device),
            *self.synthesizer.geometry(),
            self.flat_wavefront,
        )?;
        *self.handle.write() = Some(Arc::new(handle));
        Ok(())
    }

    /// Stop playback and release the device.
    ///
    /// The built sequence is kept; the state falls back to `Built` (or `Idle`
    /// when nothing was built). The device is released here even when a query
    /// elsewhere still holds the old handle; that handle fails with
    /// `NotInitialized` from then on.
    pub fn shutdown(&self) -> SlmResult<()> {
        let _ops = self.ops.lock();
        let _enter = self.span.enter();
        self.stop_locked()?;
        let Some(handle) = self.handle.write().take() else {
            return Ok(());
        };
        let released = handle.close();
        if let Err(e) = &released {
            error!("Failed to release SLM: {}", e);
        }
        if self.state() >= PlaybackState::Built {
            self.set_state(PlaybackState::Built);
        }
        info!("SLM shut down");
        Ok(released?)
    }

    // =========================================================================
    // Sequence operations
    // =========================================================================

    /// Synthesize and calibrate one frame per parameter set, in input order,
    /// and make the result the current sequence.
    ///
    /// A running sequence is stopped once the new one has been computed. On
    /// error the previous sequence and state are kept.
    ///
    /// # Errors
    /// - `Configuration` for an empty list or degenerate parameters
    /// - `Calibration` when no lookup table is registered
    pub fn build(&self, params: &[OpticalParameters]) -> SlmResult<Arc<Sequence>> {
        let _ops = self.ops.lock();
        let _enter = self.span.enter();
        self.build_locked(params)
    }

    /// Send the current sequence to the device.
    ///
    /// A one-frame sequence is written directly; longer sequences are uploaded
    /// for triggered playback.
    ///
    /// # Errors
    /// - `Hardware(NotInitialized)` without an open device
    /// - `InvalidState` when nothing was built
    pub fn load_to_device(&self) -> SlmResult<()> {
        let _ops = self.ops.lock();
        let _enter = self.span.enter();
        self.load_locked()
    }

    /// Build then load; returns the number of frames.
    pub fn set_sequence(&self, params: &[OpticalParameters]) -> SlmResult<usize> {
        let _ops = self.ops.lock();
        let _enter = self.span.enter();
        let sequence = self.build_locked(params)?;
        self.load_locked()?;
        Ok(sequence.len())
    }

    /// Power the modulator and start following triggers.
    ///
    /// Already running is a no-op. When playback fails to start the modulator
    /// is powered off again and the state stays `Loaded`.
    ///
    /// # Errors
    /// `InvalidState` unless the sequence is loaded.
    pub fn run(&self) -> SlmResult<()> {
        let _ops = self.ops.lock();
        let _enter = self.span.enter();
        match self.state() {
            PlaybackState::Running => Ok(()),
            PlaybackState::Loaded => {
                let handle = self.require_handle()?;
                let len = self.sequence().len();
                handle.set_power(true)?;
                if len > 1 {
                    if let Err(e) = handle.start_sequence() {
                        if let Err(power) = handle.set_power(false) {
                            error!("Failed to power off after failed start: {}", power);
                        }
                        return Err(e.into());
                    }
                }
                self.set_state(PlaybackState::Running);
                info!(frames = len, "Sequence running");
                Ok(())
            }
            state => Err(SlmError::InvalidState {
                operation: "run",
                state,
            }),
        }
    }

    /// Stop playback and power the modulator off. A no-op unless running.
    pub fn stop(&self) -> SlmResult<()> {
        let _ops = self.ops.lock();
        let _enter = self.span.enter();
        self.stop_locked()
    }

    /// Display one frame of the current sequence, stopping playback first.
    ///
    /// # Errors
    /// `IndexOutOfRange` (without touching the device) when `index` is not in
    /// the current sequence.
    pub fn single_frame(&self, index: usize) -> SlmResult<()> {
        let _ops = self.ops.lock();
        let _enter = self.span.enter();
        let sequence = self.sequence();
        let Some(entry) = sequence.get(index) else {
            return Err(SlmError::IndexOutOfRange {
                index,
                len: sequence.len(),
            });
        };
        let handle = self.require_handle()?;
        self.stop_locked()?;
        handle.write_image(&entry.frame)?;
        debug!(index, "Single frame written");
        Ok(())
    }

    /// Install the uncalibrated test ramps of
    /// [`PatternSynthesizer::test_ramps`] as the current sequence.
    ///
    /// Like [`build`](Self::build), a running sequence is stopped and the state
    /// becomes `Built`; load and run it as usual.
    pub fn build_test_sequence(&self, low: u16, high: u16) -> SlmResult<Arc<Sequence>> {
        let _ops = self.ops.lock();
        let _enter = self.span.enter();
        let entries = self
            .synthesizer
            .test_ramp_parameters(low, high)
            .into_iter()
            .zip(self.synthesizer.test_ramps(low, high))
            .map(|(params, frame)| SequenceEntry { params, frame })
            .collect();
        let sequence = self.install_locked(entries)?;
        info!(low, high, frames = sequence.len(), "Test sequence built");
        Ok(sequence)
    }

    /// Replace the calibration registry. Takes effect from the next build.
    ///
    /// # Errors
    /// `Configuration` when the registry is for a different geometry.
    pub fn reload_calibration(&self, registry: CalibrationRegistry) -> SlmResult<()> {
        let _ops = self.ops.lock();
        let _enter = self.span.enter();
        check_geometry(&self.synthesizer, &registry)?;
        let wavelengths = registry.wavelengths().len();
        *self.registry.write() = Arc::new(registry);
        info!(luts = wavelengths, "Calibration reloaded");
        Ok(())
    }

    // =========================================================================
    // Internals (callers hold `ops`)
    // =========================================================================

    fn require_handle(&self) -> SlmResult<Arc<SlmHandle>> {
        self.handle
            .read()
            .clone()
            .ok_or(SlmError::Hardware(HardwareError::NotInitialized))
    }

    fn set_state(&self, next: PlaybackState) {
        let mut state = self.state.write();
        let from = *state;
        if from != next {
            debug!(%from, to = %next, "Playback state change");
            *state = next;
        }
    }

    fn build_locked(&self, params: &[OpticalParameters]) -> SlmResult<Arc<Sequence>> {
        if params.is_empty() {
            return Err(SlmError::Configuration(
                "sequence needs at least one parameter set".into(),
            ));
        }
        let registry = self.registry();
        let entries = params
            .iter()
            .map(|p| -> SlmResult<SequenceEntry> {
                let raw = self.synthesizer.synthesize(p)?;
                let frame = registry.apply(&raw, p.wavelength_nm)?;
                Ok(SequenceEntry { params: *p, frame })
            })
            .collect::<SlmResult<Vec<_>>>()?;

        let sequence = self.install_locked(entries)?;
        info!(frames = sequence.len(), "Sequence built");
        Ok(sequence)
    }

    fn install_locked(&self, entries: Vec<SequenceEntry>) -> SlmResult<Arc<Sequence>> {
        self.stop_locked()?;
        let sequence = Arc::new(Sequence::new(entries));
        *self.sequence.write() = Arc::clone(&sequence);
        self.set_state(PlaybackState::Built);
        Ok(sequence)
    }

    fn load_locked(&self) -> SlmResult<()> {
        let handle = self.require_handle()?;
        let state = self.state();
        if state == PlaybackState::Idle {
            return Err(SlmError::InvalidState {
                operation: "load to device",
                state,
            });
        }
        self.stop_locked()?;

        let sequence = self.sequence();
        if let [single] = sequence.entries() {
            handle.write_image(&single.frame)?;
        } else {
            handle.load_sequence(&sequence.frames())?;
        }
        self.set_state(PlaybackState::Loaded);
        info!(frames = sequence.len(), "Sequence loaded to device");
        Ok(())
    }

    fn stop_locked(&self) -> SlmResult<()> {
        if self.state() != PlaybackState::Running {
            return Ok(());
        }
        let handle = self.require_handle()?;
        if self.sequence().len() > 1 {
            handle.stop_sequence()?;
            // no longer following triggers, even if power-off fails below
            self.set_state(PlaybackState::Loaded);
        }
        handle.set_power(false)?;
        self.set_state(PlaybackState::Loaded);
        info!("Sequence stopped");
        Ok(())
    }
}

fn check_geometry(
    synthesizer: &PatternSynthesizer,
    registry: &CalibrationRegistry,
) -> SlmResult<()> {
    if synthesizer.geometry() == registry.geometry() {
        Ok(())
    } else {
        Err(SlmError::Configuration(format!(
            "synthesizer geometry {:?} does not match calibration geometry {:?}",
            synthesizer.geometry(),
            registry.geometry()
        )))
    }
}

/// Frame on display given the index the device will show next.
fn displayed_index(next: usize, len: usize) -> usize {
    match next % len {
        0 => len - 1,
        n => n - 1,
    }
}
