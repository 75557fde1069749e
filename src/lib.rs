//! 2-D particle-kinetics simulation of fluorophore-tagged molecules
//! diffusing through polygonal regions of a cell.
//!
//! The [`world::BiologicalWorld`] owns regions, species and the particle
//! population; the [`engine::DiffusionSubEngine`] steps it forward in time,
//! single- or multi-threaded; [`probe`] provides the measurement side
//! (region probes, photobleaching heads, snapshots).

pub mod engine;
pub mod particle;
pub mod probe;
pub mod region;
pub mod rng;
pub mod species;
pub mod world;

pub use engine::{DiffusionSubEngine, EngineMode};
pub use particle::{Particle, StepContext, Tower};
pub use probe::{mean_squared_displacement, take_snapshot, FrapHead, Probe};
pub use region::{BoundaryHit, BoundaryOutcome, CrossingDirection, CrossingSense, Region, SpeciesDynamics};
pub use rng::KineticsRng;
pub use species::{ChemicalSpecies, FluorophoreSpecies};
pub use world::BiologicalWorld;
