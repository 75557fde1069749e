use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

// Timing of the simulated experiment.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct TimingConfig {
    /// Physics time step in seconds.
    pub dt_s: f64,
    /// Total simulated time in seconds.
    pub total_time_s: f64,
    /// Interval between recorded snapshots, in seconds.
    pub record_interval_s: f64,
}

/// Threading mode requested for the diffusion engine.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EngineModeConfig {
    Single,
    Multi,
    Automatic,
}

fn default_engine_mode() -> EngineModeConfig {
    EngineModeConfig::Automatic
}

fn default_bench_window() -> u32 {
    16
}

fn default_seed() -> u64 {
    0x5EED
}

// Scheduler settings.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct EngineConfig {
    #[serde(default = "default_engine_mode")]
    pub mode: EngineModeConfig,
    /// Base seed; worker streams are derived from it.
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Steps per mode measured before automatic mode locks in.
    #[serde(default = "default_bench_window")]
    pub bench_window_steps: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            mode: default_engine_mode(),
            seed: default_seed(),
            bench_window_steps: default_bench_window(),
        }
    }
}

// Static parameters of one diffusing chemical species.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SpeciesConfig {
    pub name: String,
    /// Display color, RGB in [0, 1].
    #[serde(default = "default_color")]
    pub color: [f32; 3],
    /// Fraction of the population drawn immobile at creation, in [0, 1].
    #[serde(default)]
    pub immobile_fraction: f64,
}

// Photophysical parameters of one fluorophore species.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct FluorophoreConfig {
    pub name: String,
    /// Rate (1/s) of the reversible visible -> dark (blinked) transition.
    #[serde(default)]
    pub blink_off_per_s: f64,
    /// Rate (1/s) of the dark -> visible recovery.
    #[serde(default)]
    pub blink_on_per_s: f64,
}

fn default_color() -> [f32; 3] {
    [0.2, 0.8, 0.2]
}

fn default_crossing() -> f64 {
    1.0
}

// Per-species dynamic parameters of one region, keyed by species name.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct RegionDynamicsConfig {
    pub species: String,
    #[serde(default)]
    pub is_compartment: bool,
    /// Free diffusion coefficient inside the region (um^2/s).
    #[serde(default)]
    pub d_free: f64,
    /// Diffusion coefficient while trapped (um^2/s).
    #[serde(default)]
    pub d_trapped: f64,
    #[serde(default)]
    pub trapping_enabled: bool,
    /// If true, kon is concentration independent (kon_abundant applies).
    #[serde(default)]
    pub sites_abundant: bool,
    #[serde(default)]
    pub kon_abundant: f64,
    #[serde(default)]
    pub kon_not_abundant: f64,
    #[serde(default)]
    pub koff: f64,
    /// Binding-site density (sites/um^2), consumed by kon_not_abundant.
    #[serde(default)]
    pub site_density: f64,
    /// Mean of an optional Poisson draw scaling d_trapped per binding event.
    #[serde(default)]
    pub trap_d_poisson_mean: Option<f64>,
    /// Probability of transmitting through the boundary, outside -> inside.
    #[serde(default = "default_crossing")]
    pub crossing_in: f64,
    /// Probability of transmitting through the boundary, inside -> outside.
    #[serde(default = "default_crossing")]
    pub crossing_out: f64,
}

// One polygonal region of the cellular geometry.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct RegionConfig {
    pub name: String,
    #[serde(default = "default_color")]
    pub color: [f32; 3],
    /// Polygon vertices, ordered; at least 3 with nonzero area.
    pub vertices: Vec<[f64; 2]>,
    /// Per-species dynamics; species not listed get inert defaults.
    #[serde(default)]
    pub dynamics: Vec<RegionDynamicsConfig>,
}

// One batch of particles to place at startup.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct PlacementConfig {
    pub count: u32,
    pub species: String,
    pub fluorophore: String,
    /// Home region the batch is confined to for its whole lifetime.
    pub mother_region: String,
    /// Region the batch is sampled into (defaults to the mother region).
    #[serde(default)]
    pub creation_region: Option<String>,
    #[serde(default)]
    pub forbidden_regions: Vec<String>,
    /// Start the batch in the trapped state inside the creation region.
    #[serde(default)]
    pub trapped: bool,
}

// Configuration for output settings, loaded from config.toml.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct OutputConfig {
    pub base_filename: String,
    pub save_positions: bool,
    pub save_stats: bool,
    #[serde(default)]
    pub save_positions_in_snapshot: bool,
    /// Output format: "json", "bincode", "messagepack".
    pub format: Option<String>,
}

// Main simulation configuration structure, loaded from config.toml.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SimulationConfig {
    pub timing: TimingConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    pub species: Vec<SpeciesConfig>,
    pub fluorophores: Vec<FluorophoreConfig>,
    pub regions: Vec<RegionConfig>,
    #[serde(default)]
    pub placements: Vec<PlacementConfig>,
    pub output: OutputConfig,
}

impl SimulationConfig {
    /// Loads the simulation configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();

        let config_str = std::fs::read_to_string(path_ref).map_err(|e| {
            anyhow::anyhow!("Failed to read config file '{}': {}", path_ref.display(), e)
        })?;
        let config: SimulationConfig = toml::from_str(&config_str).map_err(|e| {
            anyhow::anyhow!("Failed to parse TOML from '{}': {}", path_ref.display(), e)
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validates cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.timing.dt_s <= 0.0 {
            anyhow::bail!("timing.dt_s must be positive.");
        }
        if self.timing.total_time_s < self.timing.dt_s {
            anyhow::bail!("timing.total_time_s must cover at least one step.");
        }
        if self.regions.is_empty() {
            anyhow::bail!("At least one region (the outer cell contour) is required.");
        }
        for region in &self.regions {
            if region.vertices.len() < 3 {
                anyhow::bail!("Region '{}' needs at least 3 vertices.", region.name);
            }
        }
        if self.species.is_empty() {
            anyhow::bail!("At least one species is required.");
        }
        for sp in &self.species {
            if !(0.0..=1.0).contains(&sp.immobile_fraction) {
                anyhow::bail!("Species '{}' immobile_fraction must be in [0, 1].", sp.name);
            }
        }
        for region in &self.regions {
            for dyn_cfg in &region.dynamics {
                if !(0.0..=1.0).contains(&dyn_cfg.crossing_in)
                    || !(0.0..=1.0).contains(&dyn_cfg.crossing_out)
                {
                    anyhow::bail!(
                        "Region '{}' crossing probabilities for species '{}' must be in [0, 1].",
                        region.name,
                        dyn_cfg.species
                    );
                }
                if dyn_cfg.d_free < 0.0 || dyn_cfg.d_trapped < 0.0 {
                    anyhow::bail!(
                        "Region '{}' diffusion coefficients for species '{}' must be non-negative.",
                        region.name,
                        dyn_cfg.species
                    );
                }
            }
        }
        Ok(())
    }
}
