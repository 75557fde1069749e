use fluorosim_common::{FluorophoreConfig, SpeciesConfig};
use serde::{Deserialize, Serialize};

/// Static parameters of one diffusing chemical species.
///
/// The dynamic behaviour of a species (diffusion coefficients, trapping
/// kinetics, crossing probabilities) lives on each region; only what is
/// intrinsic to the molecule itself is kept here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChemicalSpecies {
    pub name: String,
    /// Display color handed to the rendering layer, RGB in [0, 1].
    pub color: [f32; 3],
    /// Fraction of newly created particles drawn immobile, in [0, 1].
    pub immobile_fraction: f64,
}

impl ChemicalSpecies {
    pub fn new(name: impl Into<String>, color: [f32; 3], immobile_fraction: f64) -> Self {
        ChemicalSpecies {
            name: name.into(),
            color,
            immobile_fraction: immobile_fraction.clamp(0.0, 1.0),
        }
    }
}

impl From<&SpeciesConfig> for ChemicalSpecies {
    fn from(cfg: &SpeciesConfig) -> Self {
        ChemicalSpecies::new(cfg.name.clone(), cfg.color, cfg.immobile_fraction)
    }
}

/// Photophysical parameters of one fluorophore species.
///
/// Blinking is reversible (visible <-> dark); bleaching is an absorbing
/// transition triggered externally by a photobleaching head, so no bleach
/// rate appears here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FluorophoreSpecies {
    pub name: String,
    /// Rate (1/s) of the visible -> dark transition.
    pub blink_off_per_s: f64,
    /// Rate (1/s) of the dark -> visible recovery.
    pub blink_on_per_s: f64,
}

impl FluorophoreSpecies {
    pub fn new(name: impl Into<String>, blink_off_per_s: f64, blink_on_per_s: f64) -> Self {
        FluorophoreSpecies {
            name: name.into(),
            blink_off_per_s: blink_off_per_s.max(0.0),
            blink_on_per_s: blink_on_per_s.max(0.0),
        }
    }
}

impl From<&FluorophoreConfig> for FluorophoreSpecies {
    fn from(cfg: &FluorophoreConfig) -> Self {
        FluorophoreSpecies::new(cfg.name.clone(), cfg.blink_off_per_s, cfg.blink_on_per_s)
    }
}
