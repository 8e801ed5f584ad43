//! Shared value types: optical parameters, wavelength keys and raster patterns.

use std::fmt;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// One grating request.
///
/// `pitch_um` is the physical grating period at the SLM plane, `angle_rad` the
/// grating orientation, `phase_rad` the stripe phase, `weight` the modulation
/// depth (1.0 = full swing) and `wavelength_nm` selects the calibration table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OpticalParameters {
    /// Grating pitch in microns
    pub pitch_um: f64,
    /// Grating angle in radians
    pub angle_rad: f64,
    /// Stripe phase in radians
    pub phase_rad: f64,
    /// Modulation depth / diffraction-order weight
    pub weight: f64,
    /// Illumination wavelength in nanometres
    pub wavelength_nm: f64,
}

impl OpticalParameters {
    /// Convenience constructor.
    pub fn new(pitch_um: f64, angle_rad: f64, phase_rad: f64, weight: f64, wavelength_nm: f64) -> Self {
        Self {
            pitch_um,
            angle_rad,
            phase_rad,
            weight,
            wavelength_nm,
        }
    }
}

/// Registered wavelength of a calibration file, in whole nanometres.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WavelengthNm(pub u32);

impl WavelengthNm {
    /// Absolute distance to a (possibly fractional) query wavelength.
    pub fn distance_to(self, query_nm: f64) -> f64 {
        (f64::from(self.0) - query_nm).abs()
    }
}

impl fmt::Display for WavelengthNm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}nm", self.0)
    }
}

/// A device-sized grid of gray levels tagged with its wavelength.
///
/// Indexing is `[[row, column]]`, i.e. `[[y, x]]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Pattern {
    data: Array2<u16>,
    wavelength_nm: f64,
}

impl Pattern {
    /// Wrap a grid of levels.
    pub fn new(data: Array2<u16>, wavelength_nm: f64) -> Self {
        Self {
            data,
            wavelength_nm,
        }
    }

    /// Width in pixels (columns).
    pub fn width(&self) -> usize {
        self.data.ncols()
    }

    /// Height in pixels (rows).
    pub fn height(&self) -> usize {
        self.data.nrows()
    }

    /// Wavelength this pattern was produced for.
    pub fn wavelength_nm(&self) -> f64 {
        self.wavelength_nm
    }

    /// Underlying grid.
    pub fn data(&self) -> &Array2<u16> {
        &self.data
    }

    /// Level at column `x`, row `y`.
    pub fn get(&self, x: usize, y: usize) -> Option<u16> {
        self.data.get((y, x)).copied()
    }

    /// Pixel values in row-major order, the layout the device expects.
    pub fn to_row_major(&self) -> Vec<u16> {
        self.data.iter().copied().collect()
    }

    /// Largest level present.
    pub fn max_value(&self) -> u16 {
        self.data.iter().copied().max().unwrap_or(0)
    }

    /// Smallest level present.
    pub fn min_value(&self) -> u16 {
        self.data.iter().copied().min().unwrap_or(0)
    }
}
