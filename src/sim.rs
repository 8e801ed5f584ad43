//! SIM acquisition planning.
//!
//! Expands the configured angles, phases and wavelengths into the ordered list
//! of [`OpticalParameters`] a [`SequenceManager`](crate::sequence::SequenceManager)
//! builds. The iteration order is written innermost axis first, so `"pa"` steps
//! through every phase before moving to the next angle:
//!
//! ```
//! use rust_slm::sim::{GratingSpec, SimOrder, SimPlan};
//!
//! let plan = SimPlan {
//!     angles_rad: vec![0.0, 1.0],
//!     phases_rad: vec![0.0, 2.0, 4.0],
//!     angle_offset_rad: 0.0,
//!     wavelengths_nm: vec![532.0],
//!     grating: GratingSpec::Pitch { pitch_um: 45.0 },
//!     weight: 1.0,
//!     order: "pa".parse::<SimOrder>().unwrap(),
//! };
//! let params = plan.parameters().unwrap();
//! assert_eq!(params.len(), 6);
//! assert_eq!(params[1].phase_rad, 2.0);
//! assert_eq!(params[3].angle_rad, 1.0);
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::SimConfig;
use crate::error::{SlmError, SlmResult};
use crate::pattern::OpticalParameters;
use crate::synthesis::grating_pitch_for_diffraction;

/// One dimension of a SIM acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SimAxis {
    /// Stripe phase
    Phase,
    /// Stripe orientation
    Angle,
    /// Illumination wavelength
    Wavelength,
}

impl SimAxis {
    const ALL: [SimAxis; 3] = [SimAxis::Phase, SimAxis::Angle, SimAxis::Wavelength];

    fn letter(self) -> char {
        match self {
            Self::Phase => 'p',
            Self::Angle => 'a',
            Self::Wavelength => 'w',
        }
    }

    fn from_letter(c: char) -> Option<Self> {
        match c {
            'p' => Some(Self::Phase),
            'a' => Some(Self::Angle),
            'w' => Some(Self::Wavelength),
            _ => None,
        }
    }
}

/// Axis nesting, innermost (fastest varying) first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimOrder([SimAxis; 3]);

impl SimOrder {
    /// Axes from innermost to outermost.
    pub fn axes(&self) -> [SimAxis; 3] {
        self.0
    }
}

impl Default for SimOrder {
    fn default() -> Self {
        Self(SimAxis::ALL)
    }
}

impl FromStr for SimOrder {
    type Err = SlmError;

    /// Parse a string over `p`, `a` and `w`. Axes that are left out become the
    /// outer loops in `p`, `a`, `w` order.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(SlmError::Configuration("SIM order is empty".into()));
        }
        let mut axes = Vec::with_capacity(3);
        for c in s.chars() {
            let axis = SimAxis::from_letter(c).ok_or_else(|| {
                SlmError::Configuration(format!(
                    "unknown SIM axis '{c}' in order '{s}' (expected p, a or w)"
                ))
            })?;
            if axes.contains(&axis) {
                return Err(SlmError::Configuration(format!(
                    "SIM axis '{c}' repeated in order '{s}'"
                )));
            }
            axes.push(axis);
        }
        for axis in SimAxis::ALL {
            if !axes.contains(&axis) {
                axes.push(axis);
            }
        }
        Ok(Self([axes[0], axes[1], axes[2]]))
    }
}

impl fmt::Display for SimOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for axis in self.0 {
            write!(f, "{}", axis.letter())?;
        }
        Ok(())
    }
}

/// How the grating pitch is determined.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum GratingSpec {
    /// Fixed physical pitch for every wavelength
    Pitch {
        /// Grating pitch in microns
        pitch_um: f64,
    },
    /// Pitch chosen per wavelength to diffract the first order to `theta_rad`
    DiffractionAngle {
        /// First-order diffraction angle
        theta_rad: f64,
    },
}

impl GratingSpec {
    /// Grating pitch in microns at `wavelength_nm`.
    pub fn pitch_um(&self, wavelength_nm: f64) -> SlmResult<f64> {
        match *self {
            Self::Pitch { pitch_um } => Ok(pitch_um),
            Self::DiffractionAngle { theta_rad } => {
                grating_pitch_for_diffraction(wavelength_nm, theta_rad)
            }
        }
    }
}

/// A full SIM acquisition: every combination of angle, phase and wavelength.
#[derive(Debug, Clone, PartialEq)]
pub struct SimPlan {
    /// Stripe orientations
    pub angles_rad: Vec<f64>,
    /// Stripe phases
    pub phases_rad: Vec<f64>,
    /// Added to every orientation
    pub angle_offset_rad: f64,
    /// Illumination wavelengths
    pub wavelengths_nm: Vec<f64>,
    /// Pitch selection
    pub grating: GratingSpec,
    /// Modulation depth
    pub weight: f64,
    /// Axis nesting
    pub order: SimOrder,
}

impl SimPlan {
    /// Build a plan from the `[sim]` configuration section (degrees in, radians out).
    ///
    /// A configured `pitch_um` takes precedence over `diffraction_angle_deg`.
    ///
    /// # Errors
    /// `Configuration` for a bad order string or when neither grating option
    /// is set.
    pub fn from_config(config: &SimConfig) -> SlmResult<Self> {
        let grating = match (config.pitch_um, config.diffraction_angle_deg) {
            (Some(pitch_um), _) => GratingSpec::Pitch { pitch_um },
            (None, Some(deg)) => GratingSpec::DiffractionAngle {
                theta_rad: deg.to_radians(),
            },
            (None, None) => {
                return Err(SlmError::Configuration(
                    "one of sim.pitch_um and sim.diffraction_angle_deg must be set".into(),
                ))
            }
        };
        Ok(Self {
            angles_rad: config.angles_deg.iter().map(|d| d.to_radians()).collect(),
            phases_rad: config.phases_deg.iter().map(|d| d.to_radians()).collect(),
            angle_offset_rad: config.angle_offset_deg.to_radians(),
            wavelengths_nm: config.wavelengths_nm.clone(),
            grating,
            weight: config.weight,
            order: config.order.parse()?,
        })
    }

    /// Number of frames the plan expands to.
    pub fn len(&self) -> usize {
        self.angles_rad.len() * self.phases_rad.len() * self.wavelengths_nm.len()
    }

    /// Whether any axis is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn axis_len(&self, axis: SimAxis) -> usize {
        match axis {
            SimAxis::Phase => self.phases_rad.len(),
            SimAxis::Angle => self.angles_rad.len(),
            SimAxis::Wavelength => self.wavelengths_nm.len(),
        }
    }

    /// Parameter list in acquisition order.
    ///
    /// # Errors
    /// `Configuration` when an axis is empty or the grating pitch is degenerate.
    pub fn parameters(&self) -> SlmResult<Vec<OpticalParameters>> {
        for axis in SimAxis::ALL {
            if self.axis_len(axis) == 0 {
                return Err(SlmError::Configuration(format!(
                    "SIM axis {axis:?} has no values"
                )));
            }
        }
        let pitches = self
            .wavelengths_nm
            .iter()
            .map(|&wl| self.grating.pitch_um(wl))
            .collect::<SlmResult<Vec<_>>>()?;

        let [inner, middle, outer] = self.order.axes();
        let mut params = Vec::with_capacity(self.len());
        for o in 0..self.axis_len(outer) {
            for m in 0..self.axis_len(middle) {
                for i in 0..self.axis_len(inner) {
                    let mut index = [0usize; 3];
                    for (axis, value) in [(inner, i), (middle, m), (outer, o)] {
                        index[axis as usize] = value;
                    }
                    let [phase, angle, wavelength] = index;
                    params.push(OpticalParameters::new(
                        pitches[wavelength],
                        self.angles_rad[angle] + self.angle_offset_rad,
                        self.phases_rad[phase],
                        self.weight,
                        self.wavelengths_nm[wavelength],
                    ));
                }
            }
        }
        Ok(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(order: &str) -> SimPlan {
        SimPlan {
            angles_rad: vec![0.0, 1.0, 2.0],
            phases_rad: vec![0.0, 0.5],
            angle_offset_rad: 0.0,
            wavelengths_nm: vec![488.0, 561.0],
            grating: GratingSpec::Pitch { pitch_um: 40.0 },
            weight: 1.0,
            order: order.parse().unwrap(),
        }
    }

    #[test]
    fn test_order_parsing() {
        assert_eq!("pa".parse::<SimOrder>().unwrap().to_string(), "paw");
        assert_eq!("w".parse::<SimOrder>().unwrap().to_string(), "wpa");
        assert_eq!("apw".parse::<SimOrder>().unwrap().to_string(), "apw");
        for bad in ["", "junkpaw", "ppa", "x"] {
            assert!(
                matches!(bad.parse::<SimOrder>(), Err(SlmError::Configuration(_))),
                "'{bad}' should be rejected"
            );
        }
    }

    #[test]
    fn test_phase_fastest() {
        let params = plan("pa").parameters().unwrap();
        assert_eq!(params.len(), 12);
        let firsts: Vec<(f64, f64, f64)> = params
            .iter()
            .take(4)
            .map(|p| (p.phase_rad, p.angle_rad, p.wavelength_nm))
            .collect();
        assert_eq!(
            firsts,
            vec![(0.0, 0.0, 488.0), (0.5, 0.0, 488.0), (0.0, 1.0, 488.0), (0.5, 1.0, 488.0)]
        );
        assert_eq!(params[6].wavelength_nm, 561.0);
    }

    #[test]
    fn test_angle_fastest() {
        let params = plan("ap").parameters().unwrap();
        let angles: Vec<f64> = params.iter().take(4).map(|p| p.angle_rad).collect();
        assert_eq!(angles, vec![0.0, 1.0, 2.0, 0.0]);
        assert_eq!(params[3].phase_rad, 0.5);
    }

    #[test]
    fn test_wavelength_fastest() {
        let params = plan("wpa").parameters().unwrap();
        assert_eq!(params[0].wavelength_nm, 488.0);
        assert_eq!(params[1].wavelength_nm, 561.0);
        assert_eq!(params[2].phase_rad, 0.5);
    }

    #[test]
    fn test_empty_axis_rejected() {
        let mut plan = plan("pa");
        plan.phases_rad.clear();
        assert!(plan.is_empty());
        assert!(matches!(plan.parameters(), Err(SlmError::Configuration(_))));
    }

    #[test]
    fn test_diffraction_pitch_per_wavelength() {
        let mut plan = plan("paw");
        plan.grating = GratingSpec::DiffractionAngle {
            theta_rad: 30f64.to_radians(),
        };
        plan.angle_offset_rad = 0.25;
        let params = plan.parameters().unwrap();
        let short = params.iter().find(|p| p.wavelength_nm == 488.0).unwrap();
        let long = params.iter().find(|p| p.wavelength_nm == 561.0).unwrap();
        assert!((short.pitch_um - 0.976).abs() < 1e-9);
        assert!((long.pitch_um - 1.122).abs() < 1e-9);
        assert_eq!(params[0].angle_rad, 0.25);
    }

    #[test]
    fn test_from_config_grating_selection() {
        let defaults = SimPlan::from_config(&SimConfig::default()).unwrap();
        assert_eq!(
            defaults.grating,
            GratingSpec::DiffractionAngle {
                theta_rad: 1f64.to_radians()
            }
        );
        assert_eq!(defaults.len(), 15);

        let config = SimConfig {
            pitch_um: Some(40.0),
            ..SimConfig::default()
        };
        let plan = SimPlan::from_config(&config).unwrap();
        assert_eq!(plan.grating, GratingSpec::Pitch { pitch_um: 40.0 });

        let config = SimConfig {
            pitch_um: None,
            diffraction_angle_deg: None,
            ..SimConfig::default()
        };
        assert!(SimPlan::from_config(&config).is_err());
    }
}
