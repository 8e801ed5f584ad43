//! Configuration System
//!
//! This module provides configuration management using Figment.
//!
//! # Configuration Sources
//!
//! Configuration is loaded from (in order of precedence):
//! 1. Environment variables prefixed with `RUSTSLM_`
//! 2. TOML configuration file (default: `config/slm.toml`)
//! 3. Built-in defaults
//!
//! # Example
//!
//! ```no_run
//! use rust_slm::config::SlmConfig;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Load from default location
//!     let config = SlmConfig::load()?;
//!
//!     // Or load from custom location
//!     let config = SlmConfig::load_from("custom/path.toml")?;
//!
//!     println!("App name: {}", config.application.name);
//!     println!("Device: {}x{}", config.device.width, config.device.height);
//!     Ok(())
//! }
//! ```
//!
//! # Environment Variables
//!
//! Any configuration value can be overridden via environment variables with the
//! `RUSTSLM_` prefix and the key path separated by double underscores:
//!
//! ```text
//! # Set log level
//! RUSTSLM_APPLICATION__LOG_LEVEL=debug
//!
//! # Use a different LUT directory
//! RUSTSLM_CALIBRATION__LUT_DIR=/opt/slm/luts
//!
//! # Tune first-order balance
//! RUSTSLM_SYNTHESIS__ORDER_BALANCE=0.8
//! ```

pub mod slm_config;

pub use slm_config::{
    ApplicationConfig, CalibrationConfig, ConfigError, DeviceConfig, SimConfig, SlmConfig,
    SynthesisConfig,
};
