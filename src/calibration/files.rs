//! Calibration file formats.
//!
//! Both lookup tables and flatness images are tagged with the wavelength they
//! were measured at (and usually the SLM serial) through their file name:
//!
//! ```text
//! slm7070_532.lut
//! slm7070_at532_P16.lut
//! SLM512_0785_flat.png
//! ```
//!
//! LUT files are whitespace-delimited two-column text, one row per quantized
//! input level; the second column is the device gray level. Flatness maps are
//! single-channel raster images with the device's exact pixel size. An 8-bit
//! grayscale map is read as stored (a pixel of 200 is level 200); other color
//! types are converted to 16-bit luma, which rescales 8-bit channels to the
//! full 16-bit range.

use std::path::Path;

use image::DynamicImage;
use ndarray::Array2;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::hardware::DeviceGeometry;
use crate::pattern::WavelengthNm;

static TAG_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^slm(?P<serial>[0-9]{2,4})?_(?:at)?(?P<wavelength>[0-9]{2,4})(?:[^0-9]|$)")
        .unwrap_or_else(|e| unreachable!("calibration tag pattern is valid: {e}"))
});

/// Why a calibration file could not be used.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CalibrationFileError {
    /// A LUT row has no second column.
    #[error("line {line}: expected two columns")]
    MissingColumn {
        /// One-based line number
        line: usize,
    },

    /// A LUT level is not an unsigned integer.
    #[error("line {line}: '{value}' is not an unsigned integer")]
    NotUnsigned {
        /// One-based line number
        line: usize,
        /// Offending text
        value: String,
    },

    /// A LUT level is above the device maximum.
    #[error("line {line}: level {level} exceeds device maximum {max_level}")]
    LevelTooHigh {
        /// One-based line number
        line: usize,
        /// Parsed level
        level: u32,
        /// Device maximum
        max_level: u16,
    },

    /// No data rows.
    #[error("table has no rows")]
    Empty,

    /// The image could not be opened or decoded.
    #[error("could not open image: {0}")]
    Image(String),

    /// The image size differs from the device.
    #[error("image is {width}x{height}, device is {expected_width}x{expected_height}")]
    SizeMismatch {
        /// Image columns
        width: u32,
        /// Image rows
        height: u32,
        /// Device columns
        expected_width: u32,
        /// Device rows
        expected_height: u32,
    },

    /// Decoded pixels do not fill the image dimensions.
    #[error("image buffer has unexpected layout: {0}")]
    Layout(String),
}

/// Wavelength (and optional serial) encoded in a calibration file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileTag {
    /// SLM serial number, if present in the name
    pub serial: Option<u32>,
    /// Wavelength the file was measured at
    pub wavelength: WavelengthNm,
}

/// Parse the tag from a bare file name. Returns `None` for names that do not
/// follow the convention.
pub fn parse_file_tag(file_name: &str) -> Option<FileTag> {
    let caps = TAG_PATTERN.captures(file_name)?;
    let wavelength = caps.name("wavelength")?.as_str().parse().ok()?;
    let serial = caps.name("serial").and_then(|m| m.as_str().parse().ok());
    Some(FileTag {
        serial,
        wavelength: WavelengthNm(wavelength),
    })
}

/// Tag of the file at `path`, using its file name component.
pub fn tag_for_path(path: &Path) -> Option<FileTag> {
    path.file_name()
        .and_then(|name| name.to_str())
        .and_then(parse_file_tag)
}

/// Parse LUT text into the level table.
///
/// Blank lines and lines starting with `#` are ignored. Every other row must
/// have at least two columns with an unsigned integer no larger than
/// `max_level` in the second.
pub fn parse_lut(text: &str, max_level: u16) -> Result<Vec<u16>, CalibrationFileError> {
    let mut levels = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        let line_no = line_no + 1;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let column = line
            .split_whitespace()
            .nth(1)
            .ok_or(CalibrationFileError::MissingColumn { line: line_no })?;
        let value: u32 = column.parse().map_err(|_| CalibrationFileError::NotUnsigned {
            line: line_no,
            value: column.to_string(),
        })?;
        let level = u16::try_from(value)
            .ok()
            .filter(|level| *level <= max_level)
            .ok_or(CalibrationFileError::LevelTooHigh {
                line: line_no,
                level: value,
                max_level,
            })?;
        levels.push(level);
    }
    if levels.is_empty() {
        return Err(CalibrationFileError::Empty);
    }
    Ok(levels)
}

/// Read a flatness image as 16-bit levels, requiring the device's exact size.
pub fn read_flatness_image(
    path: &Path,
    geometry: &DeviceGeometry,
) -> Result<Array2<u16>, CalibrationFileError> {
    let image = image::open(path).map_err(|e| CalibrationFileError::Image(e.to_string()))?;
    let (width, height, levels) = match image {
        DynamicImage::ImageLuma8(luma) => {
            let (width, height) = luma.dimensions();
            let levels = luma.into_raw().into_iter().map(u16::from).collect();
            (width, height, levels)
        }
        other => {
            let luma = other.into_luma16();
            let (width, height) = luma.dimensions();
            (width, height, luma.into_raw())
        }
    };
    if width != geometry.width || height != geometry.height {
        return Err(CalibrationFileError::SizeMismatch {
            width,
            height,
            expected_width: geometry.width,
            expected_height: geometry.height,
        });
    }
    Array2::from_shape_vec((height as usize, width as usize), levels)
        .map_err(|e| CalibrationFileError::Layout(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tag_variants() {
        assert_eq!(
            parse_file_tag("slm7070_532.lut"),
            Some(FileTag {
                serial: Some(7070),
                wavelength: WavelengthNm(532)
            })
        );
        assert_eq!(
            parse_file_tag("slm7070_at405_P16.lut"),
            Some(FileTag {
                serial: Some(7070),
                wavelength: WavelengthNm(405)
            })
        );
        assert_eq!(
            parse_file_tag("SLM512_0785_flat.png").map(|t| t.wavelength),
            Some(WavelengthNm(785))
        );
        assert_eq!(
            parse_file_tag("slm_640.lut"),
            Some(FileTag {
                serial: None,
                wavelength: WavelengthNm(640)
            })
        );
    }

    #[test]
    fn test_parse_tag_rejects_untagged() {
        assert_eq!(parse_file_tag("linear.lut"), None);
        assert_eq!(parse_file_tag("white.tiff"), None);
        assert_eq!(parse_file_tag("notes_slm7070_532.lut"), None);
        // five digit wavelength is not a tag
        assert_eq!(parse_file_tag("slm7070_53200.lut"), None);
    }

    #[test]
    fn test_parse_lut() {
        let text = "# level map\n0 10\n1 20\n\n2 30 extra\n";
        assert_eq!(parse_lut(text, 65535).unwrap(), vec![10, 20, 30]);
    }

    #[test]
    fn test_parse_lut_errors() {
        assert_eq!(
            parse_lut("0 1\n0\n", 65535).unwrap_err(),
            CalibrationFileError::MissingColumn { line: 2 }
        );
        assert!(parse_lut("0 -3\n", 65535).unwrap_err().to_string().contains("unsigned"));
        assert_eq!(
            parse_lut("0 300\n", 255).unwrap_err(),
            CalibrationFileError::LevelTooHigh {
                line: 1,
                level: 300,
                max_level: 255
            }
        );
        assert!(parse_lut("0 70000\n", 65535).unwrap_err().to_string().contains("exceeds"));
        assert_eq!(parse_lut("# only a comment\n", 255).unwrap_err(), CalibrationFileError::Empty);
    }

    #[test]
    fn test_flatness_8bit_read_unscaled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slm_532_flat.png");
        image::GrayImage::from_pixel(4, 2, image::Luma([200u8]))
            .save(&path)
            .unwrap();

        let geometry = DeviceGeometry::new(4, 2, 15.0, 8);
        let data = read_flatness_image(&path, &geometry).unwrap();
        assert!(data.iter().all(|&v| v == 200));

        let wrong = DeviceGeometry::new(4, 4, 15.0, 8);
        assert_eq!(
            read_flatness_image(&path, &wrong).unwrap_err().to_string(),
            "image is 4x2, device is 4x4"
        );
    }
}
