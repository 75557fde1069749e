use serde::{Deserialize, Serialize};

/// A snapshot of the population state and bulk-fluorescence metrics at a
/// specific simulated time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// The simulation time (in seconds) at which the snapshot was taken.
    pub time: f64,
    /// Total number of particles in the world.
    pub total_particle_count: u32,
    /// Particles currently visible (neither bleached nor blinked).
    pub visible_count: u32,
    /// Particles currently in the trapped state.
    pub trapped_count: u32,
    /// Number of particle centers inside each region, indexed by region handle.
    pub region_counts: Vec<u32>,
    /// Mean squared displacement against the initial placement (um^2).
    /// -1.0 when the population is empty.
    pub mean_squared_displacement: f64,
    /// Optional raw [x, y] positions of all particles at the snapshot time.
    /// Included only if `output.save_positions_in_snapshot` is true.
    #[serde(skip_serializing_if = "Option::is_none")] // Don't write "positions": null
    pub positions: Option<Vec<(f64, f64)>>,
}
