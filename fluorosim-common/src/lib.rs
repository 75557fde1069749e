pub mod config;
pub mod snapshot;
pub mod vecmath;

// Re-export key types for easier use by dependent crates
pub use config::{
    EngineConfig, EngineModeConfig, FluorophoreConfig, OutputConfig, PlacementConfig,
    RegionConfig, RegionDynamicsConfig, SimulationConfig, SpeciesConfig, TimingConfig,
};
pub use snapshot::Snapshot;
pub use vecmath::Vec2;
