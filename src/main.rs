//! Command line front end for rust_slm.
//!
//! # Usage
//!
//! ```bash
//! # Show the effective configuration (defaults + config/slm.toml + RUSTSLM_*)
//! rust_slm config
//!
//! # List the lookup tables and flatness maps that were found
//! rust_slm luts --json
//!
//! # Build the configured SIM sequence on the simulated SLM and run it
//! rust_slm sim --run
//!
//! # Export every frame of the SIM sequence as 16-bit PNG
//! rust_slm --identity-lut sim --export frames/
//!
//! # One calibrated grating
//! rust_slm pattern --pitch-um 40 --angle-deg 60 --wavelength-nm 561 -o grating.png
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use image::{ImageBuffer, Luma};
use serde::Serialize;
use tracing::{info, warn};

use rust_slm::calibration::{CalibrationRegistry, CalibrationTable, LoadReport};
use rust_slm::config::SlmConfig;
use rust_slm::hardware::MockSlm;
use rust_slm::pattern::{OpticalParameters, Pattern, WavelengthNm};
use rust_slm::sequence::SequenceManager;
use rust_slm::sim::SimPlan;
use rust_slm::synthesis::PatternSynthesizer;
use rust_slm::tracing_init;

#[derive(Parser, Debug)]
#[command(author, version, about = "Structured-illumination SLM control", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = "config/slm.toml")]
    config: PathBuf,

    /// Register an identity lookup table at every configured SIM wavelength
    /// that has no table on disk
    #[arg(long, default_value_t = false)]
    identity_lut: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the effective configuration as TOML
    Config,

    /// List loaded calibration data
    Luts {
        /// Print as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Build the configured SIM sequence on the simulated SLM
    Sim {
        /// Start triggered playback after loading
        #[arg(long, default_value_t = false)]
        run: bool,

        /// Write every frame to this directory as PNG
        #[arg(long)]
        export: Option<PathBuf>,
    },

    /// Synthesize one calibrated grating
    Pattern {
        /// Grating pitch in microns
        #[arg(long)]
        pitch_um: f64,

        /// Grating angle in degrees
        #[arg(long, default_value_t = 0.0)]
        angle_deg: f64,

        /// Stripe phase in degrees
        #[arg(long, default_value_t = 0.0)]
        phase_deg: f64,

        /// Modulation depth
        #[arg(long, default_value_t = 1.0)]
        weight: f64,

        /// Illumination wavelength
        #[arg(long, default_value_t = 532.0)]
        wavelength_nm: f64,

        /// Output PNG
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Serialize)]
struct LutListing<'a> {
    wavelengths_nm: Vec<u32>,
    tables: Vec<TableListing>,
    flatness_maps: Vec<u32>,
    report: &'a LoadReport,
}

#[derive(Serialize)]
struct TableListing {
    wavelength_nm: u32,
    levels: usize,
    source: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = SlmConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    tracing_init::init_from_config(&config)?;
    info!(app = %config.application.name, "Starting");

    let (registry, report) = load_registry(&config, cli.identity_lut)?;

    match cli.command {
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Luts { json } => print_luts(&registry, &report, json)?,
        Commands::Sim { run, export } => run_sim(&config, registry, run, export.as_deref())?,
        Commands::Pattern {
            pitch_um,
            angle_deg,
            phase_deg,
            weight,
            wavelength_nm,
            output,
        } => {
            let params = OpticalParameters::new(
                pitch_um,
                angle_deg.to_radians(),
                phase_deg.to_radians(),
                weight,
                wavelength_nm,
            );
            let synthesizer = PatternSynthesizer::new(
                config.device.geometry(),
                config.synthesis.order_balance,
            );
            let raw = synthesizer.synthesize(&params)?;
            let frame = registry.apply(&raw, wavelength_nm)?;
            println!(
                "{}x{} frame, levels {}..={}",
                frame.width(),
                frame.height(),
                frame.min_value(),
                frame.max_value()
            );
            if let Some(path) = output {
                save_png(&frame, &path)?;
                println!("Wrote {}", path.display());
            }
        }
    }
    Ok(())
}

fn load_registry(
    config: &SlmConfig,
    identity_lut: bool,
) -> anyhow::Result<(CalibrationRegistry, LoadReport)> {
    let geometry = config.device.geometry();
    let mut registry = CalibrationRegistry::new(geometry, config.calibration.quantization_shift)
        .with_device_serial(config.calibration.device_serial);
    let report = registry.load_dirs(
        &config.calibration.calibration_dir,
        &config.calibration.lut_dir,
    );

    if identity_lut {
        let levels: Vec<u16> = (0..=registry.quantize(geometry.max_level()))
            .map(|level| registry.dequantize(level))
            .collect();
        for &wl in &config.sim.wavelengths_nm {
            let key = WavelengthNm(wl.round() as u32);
            if registry.wavelengths().contains(&key) {
                continue;
            }
            warn!(wavelength = %key, "Using identity lookup table");
            registry.insert_table(CalibrationTable::new(key, levels.clone())?);
        }
    }
    Ok((registry, report))
}

fn print_luts(registry: &CalibrationRegistry, report: &LoadReport, json: bool) -> anyhow::Result<()> {
    if json {
        let listing = LutListing {
            wavelengths_nm: registry.wavelengths().iter().map(|w| w.0).collect(),
            tables: registry
                .tables()
                .map(|t| TableListing {
                    wavelength_nm: t.wavelength().0,
                    levels: t.level_count(),
                    source: t.source().map(Path::to_path_buf),
                })
                .collect(),
            flatness_maps: registry.flatness_maps().map(|m| m.wavelength.0).collect(),
            report,
        };
        println!("{}", serde_json::to_string_pretty(&listing)?);
        return Ok(());
    }

    println!("Lookup tables:");
    for table in registry.tables() {
        let source = table
            .source()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(built in)".to_string());
        println!("  {:>7}  {:>6} levels  {}", table.wavelength(), table.level_count(), source);
    }
    println!("Flatness maps:");
    for map in registry.flatness_maps() {
        println!("  {:>7}  {}", map.wavelength, map.source.display());
    }
    if !report.skipped.is_empty() {
        println!("Skipped:");
        for skipped in &report.skipped {
            println!("  {} ({}): {}", skipped.path.display(), skipped.kind, skipped.reason);
        }
    }
    Ok(())
}

fn run_sim(
    config: &SlmConfig,
    registry: CalibrationRegistry,
    run: bool,
    export: Option<&Path>,
) -> anyhow::Result<()> {
    let geometry = config.device.geometry();
    let plan = SimPlan::from_config(&config.sim)?;
    let params = plan.parameters()?;

    let device = Arc::new(MockSlm::new(geometry.width, geometry.height));
    let manager = SequenceManager::new(
        device,
        PatternSynthesizer::new(geometry, config.synthesis.order_balance),
        registry,
    )?
    .with_flat_wavefront(config.device.flat_wavefront_on_init);

    manager.initialize()?;
    let frames = manager.set_sequence(&params)?;
    println!("Loaded {} frames (order {})", frames, plan.order);

    if run {
        manager.run()?;
        println!(
            "Running: displaying frame {}, power {}, {:.1} C",
            manager.get_sequence_index()?,
            manager.get_power()?,
            manager.get_temperature()?
        );
        manager.stop()?;
    }

    if let Some(dir) = export {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        let sequence = manager.sequence();
        for (index, entry) in sequence.entries().iter().enumerate() {
            let path = dir.join(format!("frame_{index:03}.png"));
            save_png(&entry.frame, &path)?;
        }
        println!("Exported {} frames to {}", sequence.len(), dir.display());
    }

    manager.shutdown()?;
    Ok(())
}

fn save_png(frame: &Pattern, path: &Path) -> anyhow::Result<()> {
    let Some(buffer) = ImageBuffer::<Luma<u16>, Vec<u16>>::from_raw(
        frame.width() as u32,
        frame.height() as u32,
        frame.to_row_major(),
    ) else {
        bail!("frame buffer does not match its dimensions");
    };
    buffer
        .save(path)
        .with_context(|| format!("writing {}", path.display()))
}
