//! SLM configuration using Figment
//!
//! Strongly-typed configuration for the device, calibration data, synthesis
//! and SIM acquisition planning. Defaults are layered under an optional TOML
//! file, which is layered under `RUSTSLM_` environment variables.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::hardware::DeviceGeometry;
use crate::sim::SimOrder;
use crate::synthesis::DEFAULT_ORDER_BALANCE;

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A provider failed or the merged data does not deserialize.
    #[error("Configuration load error: {0}")]
    Load(#[from] figment::Error),
    /// The values loaded but are inconsistent.
    #[error("Configuration validation error: {0}")]
    Validation(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlmConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// SLM geometry and startup behaviour
    pub device: DeviceConfig,
    /// Calibration file locations
    pub calibration: CalibrationConfig,
    /// Pattern synthesis tuning
    pub synthesis: SynthesisConfig,
    /// SIM acquisition plan
    pub sim: SimConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

/// Device configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Columns
    pub width: u32,
    /// Rows
    pub height: u32,
    /// Physical pixel pitch in microns
    pub pixel_pitch_um: f64,
    /// Native bit depth
    pub bit_depth: u8,
    /// Write a flat wavefront correction after initialization
    pub flat_wavefront_on_init: bool,
}

/// Calibration data configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Directory of two-column LUT files
    pub lut_dir: PathBuf,
    /// Directory of flatness correction images
    pub calibration_dir: PathBuf,
    /// Raw levels are shifted right by this many bits before lookup
    pub quantization_shift: u32,
    /// Ignore files tagged for another SLM serial
    pub device_serial: Option<u32>,
}

/// Synthesis configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    /// Zero-/first-order balancing scalar applied to the grating amplitude
    pub order_balance: f64,
}

/// SIM acquisition configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Stripe orientations in degrees
    pub angles_deg: Vec<f64>,
    /// Stripe phases in degrees
    pub phases_deg: Vec<f64>,
    /// Offset added to every orientation, degrees
    pub angle_offset_deg: f64,
    /// Illumination wavelengths
    pub wavelengths_nm: Vec<f64>,
    /// Axis nesting, innermost first (`p`, `a`, `w`)
    pub order: String,
    /// Modulation depth
    pub weight: f64,
    /// Fixed grating pitch in microns; takes precedence when set
    pub pitch_um: Option<f64>,
    /// First-order diffraction angle in degrees
    pub diffraction_angle_deg: Option<f64>,
}

// ============================================================================
// Defaults
// ============================================================================

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "rust-slm".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            width: 512,
            height: 512,
            pixel_pitch_um: 15.0,
            bit_depth: 16,
            flat_wavefront_on_init: true,
        }
    }
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            lut_dir: PathBuf::from("LUT_files"),
            calibration_dir: PathBuf::from("Phase_Calibration_Files"),
            quantization_shift: 2,
            device_serial: None,
        }
    }
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            order_balance: DEFAULT_ORDER_BALANCE,
        }
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            angles_deg: vec![0.0, 60.0, 120.0],
            phases_deg: vec![0.0, 72.0, 144.0, 216.0, 288.0],
            angle_offset_deg: 0.0,
            wavelengths_nm: vec![532.0],
            order: "pa".to_string(),
            weight: 1.0,
            pitch_um: None,
            diffraction_angle_deg: Some(1.0),
        }
    }
}

impl DeviceConfig {
    /// Geometry described by this section.
    pub fn geometry(&self) -> DeviceGeometry {
        DeviceGeometry::new(self.width, self.height, self.pixel_pitch_um, self.bit_depth)
    }
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl SlmConfig {
    /// Load configuration from `config/slm.toml` and environment variables
    ///
    /// Configuration is loaded in this order of precedence (highest to lowest):
    /// 1. Environment variables (`RUSTSLM_` prefix, `__` between keys)
    /// 2. `config/slm.toml`
    /// 3. Built-in defaults
    ///
    /// A missing file contributes nothing. After loading, configuration is
    /// validated.
    ///
    /// # Errors
    ///
    /// Returns a ConfigError if:
    /// - The config file cannot be parsed
    /// - Configuration validation fails
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config/slm.toml")
    }

    /// Load configuration from a specific file path
    ///
    /// # Errors
    ///
    /// Returns a ConfigError if the file cannot be parsed or is invalid.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: Self = Self::figment(path.as_ref()).extract()?;
        config.validate()?;
        Ok(config)
    }

    /// The layered provider stack, before extraction.
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("RUSTSLM_").split("__"))
    }

    /// Validate configuration after loading
    ///
    /// # Errors
    ///
    /// Returns a ConfigError with a descriptive message for any validation failure.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(ConfigError::Validation(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let device = &self.device;
        if device.width == 0 || device.height == 0 {
            return Err(ConfigError::Validation(format!(
                "Invalid device size {}x{}",
                device.width, device.height
            )));
        }
        if !(1..=16).contains(&device.bit_depth) {
            return Err(ConfigError::Validation(format!(
                "Invalid bit_depth {}. Must be 1-16",
                device.bit_depth
            )));
        }
        if !(device.pixel_pitch_um.is_finite() && device.pixel_pitch_um > 0.0) {
            return Err(ConfigError::Validation(format!(
                "Invalid pixel_pitch_um {}. Must be positive",
                device.pixel_pitch_um
            )));
        }

        if self.calibration.quantization_shift >= u32::from(device.bit_depth) {
            return Err(ConfigError::Validation(format!(
                "quantization_shift {} leaves no levels at bit_depth {}",
                self.calibration.quantization_shift, device.bit_depth
            )));
        }

        let balance = self.synthesis.order_balance;
        if !(balance.is_finite() && balance > 0.0) {
            return Err(ConfigError::Validation(format!(
                "Invalid order_balance {balance}. Must be positive"
            )));
        }

        self.validate_sim()
    }

    fn validate_sim(&self) -> Result<(), ConfigError> {
        let sim = &self.sim;
        for (name, values) in [
            ("angles_deg", &sim.angles_deg),
            ("phases_deg", &sim.phases_deg),
            ("wavelengths_nm", &sim.wavelengths_nm),
        ] {
            if values.is_empty() {
                return Err(ConfigError::Validation(format!("sim.{name} is empty")));
            }
            if values.iter().any(|v| !v.is_finite()) {
                return Err(ConfigError::Validation(format!(
                    "sim.{name} contains a non-finite value"
                )));
            }
        }
        if sim.wavelengths_nm.iter().any(|&wl| wl <= 0.0) {
            return Err(ConfigError::Validation(
                "sim.wavelengths_nm must be positive".to_string(),
            ));
        }
        if !(sim.weight.is_finite() && sim.weight >= 0.0) {
            return Err(ConfigError::Validation(format!(
                "Invalid sim.weight {}. Must be non-negative",
                sim.weight
            )));
        }
        sim.order
            .parse::<SimOrder>()
            .map_err(|e| ConfigError::Validation(e.to_string()))?;

        match (sim.pitch_um, sim.diffraction_angle_deg) {
            (None, None) => Err(ConfigError::Validation(
                "One of sim.pitch_um and sim.diffraction_angle_deg must be set".to_string(),
            )),
            (Some(pitch), _) if !(pitch.is_finite() && pitch > 0.0) => Err(
                ConfigError::Validation(format!("Invalid sim.pitch_um {pitch}. Must be positive")),
            ),
            (None, Some(deg)) if !deg.is_finite() || deg.to_radians().sin() == 0.0 => {
                Err(ConfigError::Validation(format!(
                    "Invalid sim.diffraction_angle_deg {deg}"
                )))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_default_config_is_valid() {
        let config = SlmConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.device.geometry().max_level(), 65535);
    }

    #[test]
    fn test_invalid_log_level() {
        let config = SlmConfig {
            application: ApplicationConfig {
                name: "Test".to_string(),
                log_level: "invalid".to_string(),
            },
            ..SlmConfig::default()
        };

        let result = config.validate();
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Invalid log_level"));
    }

    #[test]
    fn test_invalid_device() {
        let config = SlmConfig {
            device: DeviceConfig {
                bit_depth: 17,
                ..DeviceConfig::default()
            },
            ..SlmConfig::default()
        };
        assert!(config.validate().unwrap_err().to_string().contains("bit_depth"));

        let config = SlmConfig {
            device: DeviceConfig {
                width: 0,
                ..DeviceConfig::default()
            },
            ..SlmConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_quantization_shift_must_leave_levels() {
        let config = SlmConfig {
            device: DeviceConfig {
                bit_depth: 8,
                ..DeviceConfig::default()
            },
            calibration: CalibrationConfig {
                quantization_shift: 8,
                ..CalibrationConfig::default()
            },
            ..SlmConfig::default()
        };
        assert!(config
            .validate()
            .unwrap_err()
            .to_string()
            .contains("quantization_shift"));
    }

    #[test]
    fn test_invalid_sim_section() {
        for sim in [
            SimConfig {
                phases_deg: vec![],
                ..SimConfig::default()
            },
            SimConfig {
                order: "junkpaw".to_string(),
                ..SimConfig::default()
            },
            SimConfig {
                diffraction_angle_deg: None,
                ..SimConfig::default()
            },
            SimConfig {
                pitch_um: Some(-3.0),
                ..SimConfig::default()
            },
        ] {
            let config = SlmConfig {
                sim: sim.clone(),
                ..SlmConfig::default()
            };
            assert!(config.validate().is_err(), "{sim:?} should be rejected");
        }
    }

    #[test]
    fn test_invalid_order_balance() {
        let config = SlmConfig {
            synthesis: SynthesisConfig { order_balance: 0.0 },
            ..SlmConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_file_overrides_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "slm.toml",
                r#"
                [device]
                width = 1920
                height = 1152
                pixel_pitch_um = 9.2

                [sim]
                wavelengths_nm = [488.0, 561.0]
                pitch_um = 40.0
                "#,
            )?;

            let config = SlmConfig::load_from("slm.toml").map_err(|e| e.to_string())?;
            assert_eq!(config.device.width, 1920);
            assert_eq!(config.device.bit_depth, 16);
            assert_eq!(config.sim.wavelengths_nm, vec![488.0, 561.0]);
            assert_eq!(config.sim.angles_deg, vec![0.0, 60.0, 120.0]);
            assert_eq!(config.calibration.lut_dir, PathBuf::from("LUT_files"));
            Ok(())
        });
    }

    #[test]
    fn test_env_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "slm.toml",
                r#"
                [application]
                log_level = "warn"

                [synthesis]
                order_balance = 0.5
                "#,
            )?;
            jail.set_env("RUSTSLM_APPLICATION__LOG_LEVEL", "debug");
            jail.set_env("RUSTSLM_CALIBRATION__DEVICE_SERIAL", "7070");

            let config = SlmConfig::load_from("slm.toml").map_err(|e| e.to_string())?;
            assert_eq!(config.application.log_level, "debug");
            assert_eq!(config.synthesis.order_balance, 0.5);
            assert_eq!(config.calibration.device_serial, Some(7070));
            Ok(())
        });
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        Jail::expect_with(|_jail| {
            let config = SlmConfig::load_from("absent.toml").map_err(|e| e.to_string())?;
            assert_eq!(config, SlmConfig::default());
            Ok(())
        });
    }

    #[test]
    fn test_invalid_file_value_fails_validation() {
        Jail::expect_with(|jail| {
            jail.create_file("slm.toml", "[device]\nbit_depth = 0\n")?;
            let err = SlmConfig::load_from("slm.toml").unwrap_err();
            assert!(matches!(err, ConfigError::Validation(_)));
            Ok(())
        });
    }
}
