//! Common test utilities for rust_slm integration tests
//!
//! This module provides reusable helpers for:
//! - Small device geometries and identity calibration
//! - Managers wired to a shared `MockSlm`
//! - Calibration file fixtures

#![allow(dead_code)] // Utilities may not all be used by every test binary

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rust_slm::calibration::{CalibrationRegistry, CalibrationTable};
use rust_slm::hardware::{DeviceGeometry, MockSlm};
use rust_slm::pattern::{OpticalParameters, WavelengthNm};
use rust_slm::sequence::SequenceManager;
use rust_slm::synthesis::PatternSynthesizer;

/// 4x4, 16-bit, 15µm pixels.
pub fn small_geometry() -> DeviceGeometry {
    DeviceGeometry::new(4, 4, 15.0, 16)
}

/// Registry with an identity table at each wavelength.
pub fn identity_registry(geometry: DeviceGeometry, shift: u32, wavelengths: &[u32]) -> CalibrationRegistry {
    let mut registry = CalibrationRegistry::new(geometry, shift);
    let levels: Vec<u16> = (0..=registry.quantize(geometry.max_level()))
        .map(|level| registry.dequantize(level))
        .collect();
    for &wl in wavelengths {
        registry.insert_table(CalibrationTable::new(WavelengthNm(wl), levels.clone()).unwrap());
    }
    registry
}

/// Manager on a 4x4 mock with an identity table at 532nm.
pub fn mock_manager() -> (Arc<MockSlm>, SequenceManager) {
    let geometry = small_geometry();
    let mock = Arc::new(MockSlm::new(geometry.width, geometry.height));
    let manager = SequenceManager::new(
        mock.clone(),
        PatternSynthesizer::new(geometry, 1.0),
        identity_registry(geometry, 0, &[532]),
    )
    .unwrap();
    (mock, manager)
}

/// `n` gratings at 532nm that differ only in phase.
pub fn phase_steps(n: usize) -> Vec<OpticalParameters> {
    (0..n)
        .map(|i| {
            let phase = std::f64::consts::TAU * i as f64 / n as f64;
            OpticalParameters::new(45.0, 0.0, phase, 1.0, 532.0)
        })
        .collect()
}

/// Write a two-column LUT with `rows[i]` as the level for input `i`.
pub fn write_lut(dir: &Path, name: &str, rows: &[u16]) -> PathBuf {
    let text: String = rows
        .iter()
        .enumerate()
        .map(|(i, level)| format!("{i} {level}\n"))
        .collect();
    let path = dir.join(name);
    fs::write(&path, text).unwrap();
    path
}
