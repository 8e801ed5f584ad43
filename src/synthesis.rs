//! Grating pattern synthesis.
//!
//! A SIM illumination grating is a cosine stripe pattern written to the SLM.
//! The pixel period of the stripes comes from the grating equation, either
//! directly from a physical pitch:
//!
//! ```text
//! period_px = pitch / pixel_pitch
//! ```
//!
//! or from a target first-order diffraction angle θ at wavelength λ:
//!
//! ```text
//! pitch · sin θ = λ    =>    period_px = λ / (pixel_pitch · sin θ)
//! ```
//!
//! Each pixel then takes
//!
//! ```text
//! level(x, y) = round(center + amplitude · cos(φ + 2π (cos α · x + sin α · y) / period_px))
//! ```
//!
//! with `center = max_level / 2` and `amplitude = center · weight · order_balance`,
//! clamped to `[0, max_level]`. `order_balance` trades power between the zero
//! order and the ±1 orders; it depends on the optical setup and is always
//! supplied by configuration.
//!
//! [`PatternSynthesizer::test_ramps`] produces uncalibrated sawtooth ramps for
//! checking a lookup table on the bench: three along x, repeating 1, 2 and 3
//! times across the width, then the same three along y.
//!
//! # Example
//!
//! ```
//! use rust_slm::hardware::DeviceGeometry;
//! use rust_slm::pattern::OpticalParameters;
//! use rust_slm::synthesis::PatternSynthesizer;
//!
//! let geometry = DeviceGeometry::new(4, 4, 15.0, 16);
//! let synth = PatternSynthesizer::new(geometry, 1.0);
//! let pattern = synth
//!     .synthesize(&OpticalParameters::new(30.0, 0.0, 0.0, 1.0, 532.0))
//!     .unwrap();
//! assert_eq!(pattern.get(0, 0), Some(65535));
//! assert_eq!(pattern.get(1, 0), Some(0));
//! ```

use std::f64::consts::{FRAC_PI_2, TAU};

use ndarray::Array2;
use tracing::{debug, Span};

use crate::error::{SlmError, SlmResult};
use crate::hardware::DeviceGeometry;
use crate::pattern::{OpticalParameters, Pattern};

/// Default zero-/first-order balancing scalar (no extra scaling).
pub const DEFAULT_ORDER_BALANCE: f64 = 1.0;

/// Ramps per axis in a test sequence.
const RAMP_REPEATS: usize = 3;

/// Pixel period for a physical grating pitch.
///
/// # Errors
/// `Configuration` when the resulting period is zero, negative or not finite.
pub fn period_from_pitch(pitch_um: f64, pixel_pitch_um: f64) -> SlmResult<f64> {
    if !(pixel_pitch_um.is_finite() && pixel_pitch_um > 0.0) {
        return Err(SlmError::Configuration(format!(
            "pixel pitch must be positive, got {pixel_pitch_um}"
        )));
    }
    check_period(pitch_um / pixel_pitch_um)
}

/// Physical grating pitch (µm) that sends the first order to `theta_rad` at
/// `wavelength_nm`.
///
/// # Errors
/// `Configuration` when `sin θ` is zero or the wavelength is not positive.
pub fn grating_pitch_for_diffraction(wavelength_nm: f64, theta_rad: f64) -> SlmResult<f64> {
    if !(wavelength_nm.is_finite() && wavelength_nm > 0.0) {
        return Err(SlmError::Configuration(format!(
            "wavelength must be positive, got {wavelength_nm}"
        )));
    }
    let sin_theta = theta_rad.sin();
    if sin_theta == 0.0 || !sin_theta.is_finite() {
        return Err(SlmError::Configuration(format!(
            "degenerate grating period: sin({theta_rad}) = 0"
        )));
    }
    // nm -> µm
    let pitch_um = wavelength_nm * 1e-3 / sin_theta;
    if !pitch_um.is_finite() {
        return Err(SlmError::Configuration(format!(
            "degenerate grating period for diffraction angle {theta_rad}"
        )));
    }
    Ok(pitch_um.abs())
}

/// Pixel period for a target diffraction angle.
///
/// # Errors
/// `Configuration` for a degenerate angle or non-positive pixel pitch.
pub fn period_from_diffraction(
    wavelength_nm: f64,
    theta_rad: f64,
    pixel_pitch_um: f64,
) -> SlmResult<f64> {
    let pitch_um = grating_pitch_for_diffraction(wavelength_nm, theta_rad)?;
    period_from_pitch(pitch_um, pixel_pitch_um)
}

fn check_period(period_px: f64) -> SlmResult<f64> {
    if period_px.is_finite() && period_px > 0.0 {
        Ok(period_px)
    } else {
        Err(SlmError::Configuration(format!(
            "degenerate grating period: {period_px} pixels"
        )))
    }
}

/// Computes grating rasters for one device geometry.
#[derive(Debug, Clone)]
pub struct PatternSynthesizer {
    geometry: DeviceGeometry,
    order_balance: f64,
    span: Span,
}

impl PatternSynthesizer {
    /// Create a synthesizer for `geometry` with the given order-balancing scalar.
    pub fn new(geometry: DeviceGeometry, order_balance: f64) -> Self {
        Self {
            geometry,
            order_balance,
            span: tracing::debug_span!("pattern_synthesizer"),
        }
    }

    /// Replace the logging span events from this synthesizer are recorded in.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Device geometry patterns are rendered for.
    pub fn geometry(&self) -> &DeviceGeometry {
        &self.geometry
    }

    /// Zero-/first-order balancing scalar.
    pub fn order_balance(&self) -> f64 {
        self.order_balance
    }

    /// Synthesize the raw (uncalibrated) pattern for one parameter tuple.
    ///
    /// # Errors
    /// `Configuration` for a degenerate period or non-finite inputs.
    pub fn synthesize(&self, params: &OpticalParameters) -> SlmResult<Pattern> {
        let period_px = period_from_pitch(params.pitch_um, self.geometry.pixel_pitch_um)?;
        self.render(
            period_px,
            params.angle_rad,
            params.phase_rad,
            params.weight,
            params.wavelength_nm,
        )
    }

    /// Render a grating with an explicit pixel period.
    ///
    /// # Errors
    /// `Configuration` when the period is degenerate, the angle or phase is not
    /// finite, or the weight is negative.
    pub fn render(
        &self,
        period_px: f64,
        angle_rad: f64,
        phase_rad: f64,
        weight: f64,
        wavelength_nm: f64,
    ) -> SlmResult<Pattern> {
        let _enter = self.span.enter();
        let period_px = check_period(period_px)?;
        if !angle_rad.is_finite() || !phase_rad.is_finite() {
            return Err(SlmError::Configuration(format!(
                "angle and phase must be finite (angle={angle_rad}, phase={phase_rad})"
            )));
        }
        if !(weight.is_finite() && weight >= 0.0) {
            return Err(SlmError::Configuration(format!(
                "weight must be a non-negative number, got {weight}"
            )));
        }

        let max_level = f64::from(self.geometry.max_level());
        let center = max_level / 2.0;
        let amplitude = center * weight * self.order_balance;
        let (sin_a, cos_a) = angle_rad.sin_cos();
        let k = TAU / period_px;

        let shape = (self.geometry.height as usize, self.geometry.width as usize);
        let data = Array2::from_shape_fn(shape, |(y, x)| {
            let arg = phase_rad + k * (cos_a * x as f64 + sin_a * y as f64);
            let level = (center + amplitude * arg.cos()).round();
            level.clamp(0.0, max_level) as u16
        });

        debug!(
            period_px,
            angle_rad, phase_rad, weight, wavelength_nm, "Synthesized grating"
        );
        Ok(Pattern::new(data, wavelength_nm))
    }

    /// Sawtooth test ramps between `low` and `high`.
    ///
    /// Both bounds are clamped to the device range and a reversed pair is
    /// reordered. Ramp `n` of an axis repeats `n + 1` times across it:
    ///
    /// ```text
    /// level(t) = low + (high - low) · (t mod (len / (n + 1))) / (len - 1)
    /// ```
    ///
    /// so only the single-repeat ramp reaches `high`. Patterns carry wavelength
    /// `0.0`; they are not calibrated.
    pub fn test_ramps(&self, low: u16, high: u16) -> Vec<Pattern> {
        let _enter = self.span.enter();
        let max_level = self.geometry.max_level();
        let (low, high) = (low.min(high).min(max_level), low.max(high).min(max_level));
        let depth = f64::from(high - low);
        let shape = (self.geometry.height as usize, self.geometry.width as usize);

        let ramps: Vec<Pattern> = self
            .ramp_layout()
            .map(|(along_y, period, len)| {
                let denominator = (len - 1.0).max(1.0);
                let data = Array2::from_shape_fn(shape, |(y, x)| {
                    let t = (if along_y { y } else { x }) as f64;
                    let level = f64::from(low) + depth * (t % period) / denominator;
                    level.clamp(f64::from(low), f64::from(high)) as u16
                });
                Pattern::new(data, 0.0)
            })
            .collect();
        debug!(low, high, ramps = ramps.len(), "Synthesized test ramps");
        ramps
    }

    /// Parameters describing each pattern of [`test_ramps`](Self::test_ramps),
    /// in the same order: the ramp period as a pitch, angle `0` along x and
    /// `π/2` along y, and the ramp depth as a fraction of full scale.
    pub fn test_ramp_parameters(&self, low: u16, high: u16) -> Vec<OpticalParameters> {
        let max_level = self.geometry.max_level();
        let depth = f64::from(low.max(high).min(max_level) - low.min(high).min(max_level));
        let weight = depth / f64::from(max_level.max(1));
        self.ramp_layout()
            .map(|(along_y, period, _)| {
                let angle = if along_y { FRAC_PI_2 } else { 0.0 };
                OpticalParameters::new(
                    period * self.geometry.pixel_pitch_um,
                    angle,
                    0.0,
                    weight,
                    0.0,
                )
            })
            .collect()
    }

    /// `(along_y, period_px, axis_len)` for each test ramp.
    fn ramp_layout(&self) -> impl Iterator<Item = (bool, f64, f64)> {
        let width = f64::from(self.geometry.width);
        let height = f64::from(self.geometry.height);
        [(false, width), (true, height)]
            .into_iter()
            .flat_map(|(along_y, len)| {
                (1..=RAMP_REPEATS).map(move |repeats| (along_y, len / repeats as f64, len))
            })
    }
}
