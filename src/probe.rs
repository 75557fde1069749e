use crate::particle::Particle;
use crate::world::BiologicalWorld;
use fluorosim_common::{Snapshot, Vec2};
use log::warn;
use rayon::prelude::*;

/// Read-only measurement probe attached to one region.
///
/// Mirrors what an imaging experiment reads out of a region of interest:
/// particle counts, fluorescence intensity and density.
#[derive(Debug, Clone)]
pub struct Probe {
    region: usize,
}

impl Probe {
    pub fn new(region: usize) -> Self {
        Probe { region }
    }

    pub fn region(&self) -> usize {
        self.region
    }

    /// Total particle count inside the probed region.
    pub fn total_count(&self, world: &BiologicalWorld) -> u32 {
        world.count_in_region(self.region, None)
    }

    /// Count of visible (unbleached, unblinked) particles inside the region.
    pub fn visible_count(&self, world: &BiologicalWorld) -> u32 {
        let Some(region) = world.regions().get(self.region) else {
            warn!("Probe region {} out of range.", self.region);
            return 0;
        };
        world
            .particles()
            .par_iter()
            .filter(|p| p.is_visible() && region.is_inside(p.position()))
            .count() as u32
    }

    /// Count of trapped particles inside the region.
    pub fn trapped_count(&self, world: &BiologicalWorld) -> u32 {
        let Some(region) = world.regions().get(self.region) else {
            warn!("Probe region {} out of range.", self.region);
            return 0;
        };
        world
            .particles()
            .par_iter()
            .filter(|p| p.is_trapped() && region.is_inside(p.position()))
            .count() as u32
    }

    /// Fluorescence intensity of the region: one unit per visible particle.
    pub fn intensity(&self, world: &BiologicalWorld) -> f64 {
        self.visible_count(world) as f64
    }

    /// Particle density (1/um^2) of the region, all species.
    pub fn density(&self, world: &BiologicalWorld) -> f64 {
        let Some(region) = world.regions().get(self.region) else {
            warn!("Probe region {} out of range.", self.region);
            return 0.0;
        };
        if region.surface() <= 0.0 {
            return 0.0;
        }
        self.total_count(world) as f64 / region.surface()
    }
}

/// Photobleaching/photoactivation head attached to one region.
///
/// Models the illuminated area of a FRAP or PAF experiment: each particle
/// inside the region is hit independently with the configured probability
/// per pulse.
#[derive(Debug, Clone)]
pub struct FrapHead {
    region: usize,
    /// Per-particle probability of being affected by one pulse, in [0, 1].
    pub efficiency: f64,
}

impl FrapHead {
    pub fn new(region: usize, efficiency: f64) -> Self {
        FrapHead { region, efficiency: efficiency.clamp(0.0, 1.0) }
    }

    pub fn region(&self) -> usize {
        self.region
    }

    /// Fires one bleaching pulse; returns the number of bleached particles.
    pub fn bleach(&self, world: &mut BiologicalWorld) -> u32 {
        let (particles, regions, _, rng, _) = world.split_step();
        let Some(region) = regions.get(self.region) else {
            warn!("FrapHead region {} out of range.", self.region);
            return 0;
        };
        let mut hit = 0;
        for particle in particles.iter_mut() {
            if region.is_inside(particle.position())
                && !particle.fluorophore_state().bleached
                && rng.uniform() < self.efficiency
            {
                particle.bleach();
                hit += 1;
            }
        }
        hit
    }

    /// Fires one activation pulse, clearing the reversible dark state of
    /// covered particles; returns the number activated.
    pub fn photoactivate(&self, world: &mut BiologicalWorld) -> u32 {
        let (particles, regions, _, rng, _) = world.split_step();
        let Some(region) = regions.get(self.region) else {
            warn!("FrapHead region {} out of range.", self.region);
            return 0;
        };
        let mut hit = 0;
        for particle in particles.iter_mut() {
            if region.is_inside(particle.position())
                && particle.fluorophore_state().blinked
                && rng.uniform() < self.efficiency
            {
                particle.activate();
                hit += 1;
            }
        }
        hit
    }
}

/// Mean squared displacement of the population against a baseline recorded
/// at an earlier time.
///
/// Returns -1.0 when the baseline and the population disagree in size or
/// the population is empty, so downstream plots can drop the sample.
pub fn mean_squared_displacement(baseline: &[Vec2], particles: &[Particle]) -> f64 {
    if particles.is_empty() || baseline.len() != particles.len() {
        return -1.0;
    }
    let sum: f64 = particles
        .par_iter()
        .zip(baseline.par_iter())
        .map(|(p, b)| p.position().distance_squared(*b))
        .sum();
    sum / particles.len() as f64
}

/// Captures the current world state into a serializable snapshot.
pub fn take_snapshot(
    world: &BiologicalWorld,
    time: f64,
    baseline: &[Vec2],
    include_positions: bool,
) -> Snapshot {
    let region_counts = (0..world.regions().len())
        .map(|r| world.count_in_region(r, None))
        .collect();
    Snapshot {
        time,
        total_particle_count: world.particles().len() as u32,
        visible_count: world.visible_count(),
        trapped_count: world.trapped_count(),
        region_counts,
        mean_squared_displacement: mean_squared_displacement(baseline, world.particles()),
        positions: include_positions.then(|| world.positions()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::species::{ChemicalSpecies, FluorophoreSpecies};

    fn square(cx: f64, cy: f64, half: f64) -> Vec<Vec2> {
        vec![
            Vec2::new(cx - half, cy - half),
            Vec2::new(cx + half, cy - half),
            Vec2::new(cx + half, cy + half),
            Vec2::new(cx - half, cy + half),
        ]
    }

    fn world_with_particles(count: u32) -> BiologicalWorld {
        let mut world = BiologicalWorld::new(31);
        world.add_species(ChemicalSpecies::new("tracer", [0.0; 3], 0.0));
        world.add_fluorophore(FluorophoreSpecies::new("egfp", 0.0, 0.0));
        world.add_region("cell", [0.0; 3], square(0.0, 0.0, 10.0)).unwrap();
        world.add_particles(count, 0, 0, &[], 0, 0, false);
        world
    }

    #[test]
    fn probe_counts_match_population() {
        let world = world_with_particles(120);
        let probe = Probe::new(0);
        assert_eq!(probe.total_count(&world), 120);
        assert_eq!(probe.visible_count(&world), 120);
        assert_eq!(probe.trapped_count(&world), 0);
        assert!((probe.density(&world) - 120.0 / 400.0).abs() < 1e-12);
        assert!((probe.intensity(&world) - 120.0).abs() < 1e-12);
    }

    #[test]
    fn frap_head_only_bleaches_its_region() {
        let mut world = world_with_particles(200);
        let spot = world.add_region("spot", [0.0; 3], square(5.0, 5.0, 3.0)).unwrap();
        let head = FrapHead::new(spot, 1.0);
        let hit = head.bleach(&mut world);
        assert!(hit > 0);
        for p in world.particles() {
            let covered = world.regions()[spot].is_inside(p.position());
            assert_eq!(p.fluorophore_state().bleached, covered);
        }
        assert_eq!(world.visible_count(), 200 - hit);
        // A second identical pulse finds nothing left to bleach.
        assert_eq!(head.bleach(&mut world), 0);
    }

    #[test]
    fn partial_efficiency_bleaches_part_of_the_spot() {
        let mut world = world_with_particles(400);
        let head = FrapHead::new(0, 0.5);
        let hit = head.bleach(&mut world);
        // Binomial(400, 0.5): a failure here means the draw is broken.
        assert!((120..=280).contains(&hit), "hit = {hit}");
    }

    #[test]
    fn photoactivation_reverses_blinking_inside_region() {
        let mut world = world_with_particles(100);
        for p in world.particles_mut() {
            p.set_blinked(true);
        }
        assert_eq!(world.visible_count(), 0);
        let head = FrapHead::new(0, 1.0);
        let hit = head.photoactivate(&mut world);
        assert_eq!(hit, 100);
        assert_eq!(world.visible_count(), 100);
    }

    #[test]
    fn msd_of_uniform_shift() {
        let world = world_with_particles(50);
        let baseline: Vec<Vec2> =
            world.particles().iter().map(|p| p.position() - Vec2::new(3.0, 4.0)).collect();
        let msd = mean_squared_displacement(&baseline, world.particles());
        assert!((msd - 25.0).abs() < 1e-9);
    }

    #[test]
    fn msd_sentinel_on_mismatch() {
        let world = world_with_particles(10);
        assert_eq!(mean_squared_displacement(&[], world.particles()), -1.0);
        let empty = world_with_particles(0);
        assert_eq!(mean_squared_displacement(&[], empty.particles()), -1.0);
    }

    #[test]
    fn snapshot_reports_world_state() {
        let world = world_with_particles(40);
        let baseline: Vec<Vec2> = world.particles().iter().map(|p| p.position()).collect();
        let snap = take_snapshot(&world, 1.5, &baseline, true);
        assert_eq!(snap.time, 1.5);
        assert_eq!(snap.total_particle_count, 40);
        assert_eq!(snap.visible_count, 40);
        assert_eq!(snap.trapped_count, 0);
        assert_eq!(snap.region_counts, vec![40]);
        assert_eq!(snap.mean_squared_displacement, 0.0);
        assert_eq!(snap.positions.as_ref().map(Vec::len), Some(40));
    }
}
