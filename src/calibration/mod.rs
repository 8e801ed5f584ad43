//! Wavelength-indexed SLM calibration.
//!
//! The SLM's phase response is nonlinear and wavelength dependent, so every raw
//! synthesized level is mapped through a lookup table (LUT) measured at the
//! illumination wavelength before it is sent to the device:
//!
//! ```text
//! device_level = lut[min(raw >> quantization_shift, N - 1)]
//! ```
//!
//! where `N` is the number of rows in the table. The registry also keeps
//! per-wavelength flatness (wavefront) correction maps. Those are metadata only:
//! they are not folded into synthesized patterns.
//!
//! # Loading
//!
//! Calibration data is discovered once at startup with [`CalibrationRegistry::load`]
//! or [`CalibrationRegistry::load_dirs`]. Loading never fails as a whole: a file
//! that cannot be read, does not carry a wavelength tag, has the wrong size or
//! does not parse is logged, recorded in the [`LoadReport`] and skipped. Partial
//! calibration is an accepted degraded state.
//!
//! # Lookup
//!
//! [`CalibrationRegistry::nearest_lut`] returns the table whose registered
//! wavelength is closest to the query. When two tables are equally close the
//! shorter wavelength wins.
//!
//! # Usage
//!
//! ```rust,ignore
//! let mut registry = CalibrationRegistry::new(geometry, 2);
//! let report = registry.load_dirs("Phase_Calibration_Files", "LUT_files");
//! println!("{} LUTs, {} skipped", report.luts_loaded, report.skipped.len());
//!
//! let calibrated = registry.apply(&raw_pattern, 532.0)?;
//! ```

pub mod files;

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ndarray::Array2;
use serde::Serialize;
use tracing::{debug, info, info_span, warn, Span};

use crate::error::{SlmError, SlmResult};
use crate::hardware::DeviceGeometry;
use crate::pattern::{Pattern, WavelengthNm};

pub use files::{parse_file_tag, parse_lut, CalibrationFileError, FileTag};

// =============================================================================
// Calibration Data
// =============================================================================

/// Lookup table for one wavelength.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalibrationTable {
    wavelength: WavelengthNm,
    levels: Vec<u16>,
    source: Option<PathBuf>,
}

impl CalibrationTable {
    /// Build a table from its levels.
    ///
    /// # Errors
    /// `Calibration` when `levels` is empty.
    pub fn new(wavelength: WavelengthNm, levels: Vec<u16>) -> SlmResult<Self> {
        if levels.is_empty() {
            return Err(SlmError::Calibration(format!(
                "lookup table for {wavelength} has no levels"
            )));
        }
        Ok(Self {
            wavelength,
            levels,
            source: None,
        })
    }

    fn with_source(mut self, source: PathBuf) -> Self {
        self.source = Some(source);
        self
    }

    /// Registered wavelength.
    pub fn wavelength(&self) -> WavelengthNm {
        self.wavelength
    }

    /// Table contents.
    pub fn levels(&self) -> &[u16] {
        &self.levels
    }

    /// Number of quantized input levels, `N`.
    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    /// File the table was loaded from.
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Device level for a quantized input level, clamped to `N - 1`.
    pub fn lookup(&self, level: usize) -> u16 {
        let index = level.min(self.levels.len() - 1);
        self.levels[index]
    }
}

/// Per-pixel flatness correction for one wavelength.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatnessMap {
    /// Registered wavelength
    pub wavelength: WavelengthNm,
    /// SLM serial from the file name
    pub serial: Option<u32>,
    /// Correction levels, device-sized
    pub data: Array2<u16>,
    /// File the map was loaded from
    pub source: PathBuf,
}

/// Which kind of calibration file a report entry refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CalibrationKind {
    /// Two-column lookup table
    LookupTable,
    /// Flatness / wavefront correction image
    Flatness,
}

impl fmt::Display for CalibrationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LookupTable => write!(f, "LUT"),
            Self::Flatness => write!(f, "calibration image"),
        }
    }
}

/// A file that was passed over during loading.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedFile {
    /// Offending file
    pub path: PathBuf,
    /// What it was being loaded as
    pub kind: CalibrationKind,
    /// Why it was skipped
    pub reason: String,
}

/// Outcome of a load pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LoadReport {
    /// Lookup tables registered
    pub luts_loaded: usize,
    /// Flatness maps registered
    pub flatness_loaded: usize,
    /// Files skipped, with reasons
    pub skipped: Vec<SkippedFile>,
}

impl LoadReport {
    fn skip(&mut self, path: &Path, kind: CalibrationKind, reason: String) {
        warn!("Skipping {} {}: {}", kind, path.display(), reason);
        self.skipped.push(SkippedFile {
            path: path.to_path_buf(),
            kind,
            reason,
        });
    }
}

// =============================================================================
// Calibration Registry
// =============================================================================

/// Registry of lookup tables and flatness maps keyed by wavelength.
#[derive(Debug, Clone)]
pub struct CalibrationRegistry {
    geometry: DeviceGeometry,
    quantization_shift: u32,
    device_serial: Option<u32>,
    luts: BTreeMap<WavelengthNm, Arc<CalibrationTable>>,
    flatness: BTreeMap<WavelengthNm, FlatnessMap>,
    span: Span,
}

impl CalibrationRegistry {
    /// Create an empty registry.
    ///
    /// Raw levels are divided by `2^quantization_shift` before table lookup.
    pub fn new(geometry: DeviceGeometry, quantization_shift: u32) -> Self {
        Self {
            geometry,
            quantization_shift,
            device_serial: None,
            luts: BTreeMap::new(),
            flatness: BTreeMap::new(),
            span: info_span!("calibration_registry"),
        }
    }

    /// Only accept files tagged with this SLM serial (untagged files are kept).
    pub fn with_device_serial(mut self, serial: Option<u32>) -> Self {
        self.device_serial = serial;
        self
    }

    /// Replace the logging span events from this registry are recorded in.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Geometry calibration images must match.
    pub fn geometry(&self) -> &DeviceGeometry {
        &self.geometry
    }

    /// Number of low-order bits discarded before lookup.
    pub fn quantization_shift(&self) -> u32 {
        self.quantization_shift
    }

    /// Register a table directly, replacing any table at the same wavelength.
    pub fn insert_table(&mut self, table: CalibrationTable) {
        let wavelength = table.wavelength();
        if self.luts.insert(wavelength, Arc::new(table)).is_some() {
            let _enter = self.span.enter();
            warn!(%wavelength, "Replaced existing lookup table");
        }
    }

    /// Registered LUT wavelengths, ascending.
    pub fn wavelengths(&self) -> Vec<WavelengthNm> {
        self.luts.keys().copied().collect()
    }

    /// Registered tables, ascending by wavelength.
    pub fn tables(&self) -> impl Iterator<Item = &Arc<CalibrationTable>> {
        self.luts.values()
    }

    /// Registered flatness maps, ascending by wavelength.
    pub fn flatness_maps(&self) -> impl Iterator<Item = &FlatnessMap> {
        self.flatness.values()
    }

    /// Whether no lookup table is registered.
    pub fn is_empty(&self) -> bool {
        self.luts.is_empty()
    }

    /// Load the given calibration images and LUT files.
    pub fn load<C, L>(&mut self, calibration_paths: C, lut_paths: L) -> LoadReport
    where
        C: IntoIterator,
        C::Item: AsRef<Path>,
        L: IntoIterator,
        L::Item: AsRef<Path>,
    {
        let span = self.span.clone();
        let _enter = span.enter();
        let mut report = LoadReport::default();

        for path in sorted(calibration_paths) {
            self.load_flatness_file(&path, &mut report);
        }
        for path in sorted(lut_paths) {
            self.load_lut_file(&path, &mut report);
        }

        info!(
            luts = report.luts_loaded,
            flatness = report.flatness_loaded,
            skipped = report.skipped.len(),
            "Calibration load complete"
        );
        report
    }

    /// Load every file found in the two directories.
    ///
    /// A missing directory contributes nothing.
    pub fn load_dirs<P: AsRef<Path>, Q: AsRef<Path>>(
        &mut self,
        calibration_dir: P,
        lut_dir: Q,
    ) -> LoadReport {
        let calibration_files = list_files(calibration_dir.as_ref());
        let lut_files = list_files(lut_dir.as_ref());
        self.load(calibration_files, lut_files)
    }

    fn accepts_serial(&self, serial: Option<u32>) -> Result<(), String> {
        match (self.device_serial, serial) {
            (Some(wanted), Some(found)) if wanted != found => Err(format!(
                "tagged for SLM serial {found}, this device is {wanted}"
            )),
            _ => Ok(()),
        }
    }

    fn load_lut_file(&mut self, path: &Path, report: &mut LoadReport) {
        let kind = CalibrationKind::LookupTable;
        let Some(tag) = files::tag_for_path(path) else {
            report.skip(path, kind, "file name carries no wavelength tag".into());
            return;
        };
        if let Err(reason) = self.accepts_serial(tag.serial) {
            report.skip(path, kind, reason);
            return;
        }
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                report.skip(path, kind, format!("could not read file: {e}"));
                return;
            }
        };
        let levels = match files::parse_lut(&text, self.geometry.max_level()) {
            Ok(levels) => levels,
            Err(reason) => {
                report.skip(path, kind, reason.to_string());
                return;
            }
        };

        debug!(
            wavelength = %tag.wavelength,
            levels = levels.len(),
            "Loaded LUT from {}",
            path.display()
        );
        let table = CalibrationTable {
            wavelength: tag.wavelength,
            levels,
            source: None,
        }
        .with_source(path.to_path_buf());
        if let Some(previous) = self.luts.insert(tag.wavelength, Arc::new(table)) {
            warn!(
                wavelength = %tag.wavelength,
                "LUT {} replaces {}",
                path.display(),
                previous.source().map(|p| p.display().to_string()).unwrap_or_default()
            );
        }
        report.luts_loaded += 1;
    }

    fn load_flatness_file(&mut self, path: &Path, report: &mut LoadReport) {
        let kind = CalibrationKind::Flatness;
        let Some(tag) = files::tag_for_path(path) else {
            report.skip(path, kind, "file name carries no wavelength tag".into());
            return;
        };
        if let Err(reason) = self.accepts_serial(tag.serial) {
            report.skip(path, kind, reason);
            return;
        }
        let data = match files::read_flatness_image(path, &self.geometry) {
            Ok(data) => data,
            Err(reason) => {
                report.skip(path, kind, reason.to_string());
                return;
            }
        };

        debug!(wavelength = %tag.wavelength, "Loaded flatness map from {}", path.display());
        let map = FlatnessMap {
            wavelength: tag.wavelength,
            serial: tag.serial,
            data,
            source: path.to_path_buf(),
        };
        if self.flatness.insert(tag.wavelength, map).is_some() {
            warn!(wavelength = %tag.wavelength, "Flatness map {} replaces an earlier one", path.display());
        }
        report.flatness_loaded += 1;
    }

    /// Table registered closest to `wavelength_nm`.
    ///
    /// # Errors
    /// - `Calibration` when no table is registered
    /// - `Configuration` when the query is not a finite number
    pub fn nearest_lut(&self, wavelength_nm: f64) -> SlmResult<Arc<CalibrationTable>> {
        check_query(wavelength_nm)?;
        nearest_key(&self.luts, wavelength_nm)
            .and_then(|key| self.luts.get(&key).cloned())
            .ok_or_else(|| {
                SlmError::Calibration(format!(
                    "no lookup table registered (requested {wavelength_nm}nm)"
                ))
            })
    }

    /// Flatness map registered closest to `wavelength_nm`, if any.
    pub fn nearest_flatness(&self, wavelength_nm: f64) -> Option<&FlatnessMap> {
        if !wavelength_nm.is_finite() {
            return None;
        }
        nearest_key(&self.flatness, wavelength_nm).and_then(|key| self.flatness.get(&key))
    }

    /// Quantized level index for a raw synthesized level.
    ///
    /// A shift at or past the width of `usize` quantizes everything to `0`.
    pub fn quantize(&self, raw: u16) -> usize {
        usize::from(raw)
            .checked_shr(self.quantization_shift)
            .unwrap_or(0)
    }

    /// Smallest raw level that quantizes to `level`, saturating at `u16::MAX`.
    pub fn dequantize(&self, level: usize) -> u16 {
        if level == 0 {
            return 0;
        }
        match level.checked_shl(self.quantization_shift) {
            Some(raw) if raw >> self.quantization_shift == level => {
                u16::try_from(raw).unwrap_or(u16::MAX)
            }
            _ => u16::MAX,
        }
    }

    /// Map a raw pattern through the table nearest to `wavelength_nm`.
    ///
    /// # Errors
    /// `Calibration` when no table is registered.
    pub fn apply(&self, pattern: &Pattern, wavelength_nm: f64) -> SlmResult<Pattern> {
        let table = self.nearest_lut(wavelength_nm)?;
        let _enter = self.span.enter();
        debug!(
            requested_nm = wavelength_nm,
            table = %table.wavelength(),
            "Applying lookup table"
        );
        let data = pattern
            .data()
            .mapv(|raw| table.lookup(self.quantize(raw)));
        Ok(Pattern::new(data, wavelength_nm))
    }
}

fn check_query(wavelength_nm: f64) -> SlmResult<()> {
    if wavelength_nm.is_finite() {
        Ok(())
    } else {
        Err(SlmError::Configuration(format!(
            "wavelength must be finite, got {wavelength_nm}"
        )))
    }
}

/// Key with minimal distance to `query_nm`; ascending iteration with a strict
/// comparison makes the shorter wavelength win ties.
fn nearest_key<V>(map: &BTreeMap<WavelengthNm, V>, query_nm: f64) -> Option<WavelengthNm> {
    let mut best: Option<(WavelengthNm, f64)> = None;
    for key in map.keys() {
        let distance = key.distance_to(query_nm);
        match best {
            Some((_, best_distance)) if distance >= best_distance => {}
            _ => best = Some((*key, distance)),
        }
    }
    best.map(|(key, _)| key)
}

fn sorted<I>(paths: I) -> Vec<PathBuf>
where
    I: IntoIterator,
    I::Item: AsRef<Path>,
{
    let mut paths: Vec<PathBuf> = paths
        .into_iter()
        .map(|p| p.as_ref().to_path_buf())
        .collect();
    paths.sort();
    paths
}

fn list_files(dir: &Path) -> Vec<PathBuf> {
    if !dir.exists() {
        info!("Calibration directory {} not found", dir.display());
        return Vec::new();
    }
    match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .collect(),
        Err(e) => {
            warn!("Could not list {}: {}", dir.display(), e);
            Vec::new()
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
