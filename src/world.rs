use crate::particle::{Particle, StepContext};
use crate::region::{CrossingSense, Region, SpeciesDynamics};
use crate::rng::KineticsRng;
use crate::species::{ChemicalSpecies, FluorophoreSpecies};
use anyhow::Result;
use fluorosim_common::{SimulationConfig, Vec2};
use log::{debug, warn};
use rayon::prelude::*;

/// Attempts per particle before giving up on a rejection placement.
const MAX_PLACEMENT_ATTEMPTS: usize = 1000;

/// Owns the species lists, the region list and the particle population.
///
/// Particles reference regions and species by arena index into the world's
/// vectors; every deletion runs a repair pass over the population so no
/// handle ever dangles. All setters are plain `&mut self` methods, so the
/// borrow checker guarantees they never run concurrently with a step.
pub struct BiologicalWorld {
    species: Vec<ChemicalSpecies>,
    fluorophores: Vec<FluorophoreSpecies>,
    regions: Vec<Region>,
    particles: Vec<Particle>,
    /// Host-side RNG for placement and serial operations; worker threads use
    /// their own forked streams.
    rng: KineticsRng,
    fixed: bool,
}

impl BiologicalWorld {
    pub fn new(seed: u64) -> Self {
        BiologicalWorld {
            species: Vec::new(),
            fluorophores: Vec::new(),
            regions: Vec::new(),
            particles: Vec::new(),
            rng: KineticsRng::seeded(seed),
            fixed: false,
        }
    }

    /// Builds a fully populated world from a validated configuration,
    /// resolving species/region name references to handles.
    pub fn from_config(config: &SimulationConfig) -> Result<Self> {
        let mut world = BiologicalWorld::new(config.engine.seed);

        for sp in &config.species {
            world.add_species(ChemicalSpecies::from(sp));
        }
        for fl in &config.fluorophores {
            world.add_fluorophore(FluorophoreSpecies::from(fl));
        }

        for region_cfg in &config.regions {
            let vertices: Vec<Vec2> =
                region_cfg.vertices.iter().map(|v| Vec2::new(v[0], v[1])).collect();
            let handle = world
                .add_region(region_cfg.name.clone(), region_cfg.color, vertices)
                .ok_or_else(|| {
                    anyhow::anyhow!("Region '{}' has a degenerate polygon.", region_cfg.name)
                })?;
            for dyn_cfg in &region_cfg.dynamics {
                let species = world.species_handle(&dyn_cfg.species).ok_or_else(|| {
                    anyhow::anyhow!(
                        "Region '{}' references unknown species '{}'.",
                        region_cfg.name,
                        dyn_cfg.species
                    )
                })?;
                if let Some(slot) = world.regions[handle].dynamics_mut(species) {
                    *slot = SpeciesDynamics::from_config(dyn_cfg);
                }
            }
        }

        for placement in &config.placements {
            let species = world.species_handle(&placement.species).ok_or_else(|| {
                anyhow::anyhow!("Placement references unknown species '{}'.", placement.species)
            })?;
            let fluorophore =
                world.fluorophore_handle(&placement.fluorophore).ok_or_else(|| {
                    anyhow::anyhow!(
                        "Placement references unknown fluorophore '{}'.",
                        placement.fluorophore
                    )
                })?;
            let mother = world.region_handle(&placement.mother_region).ok_or_else(|| {
                anyhow::anyhow!(
                    "Placement references unknown region '{}'.",
                    placement.mother_region
                )
            })?;
            let creation = match &placement.creation_region {
                Some(name) => world.region_handle(name).ok_or_else(|| {
                    anyhow::anyhow!("Placement references unknown region '{}'.", name)
                })?,
                None => mother,
            };
            let mut forbidden = Vec::new();
            for name in &placement.forbidden_regions {
                forbidden.push(world.region_handle(name).ok_or_else(|| {
                    anyhow::anyhow!("Placement references unknown region '{}'.", name)
                })?);
            }
            let placed = world.add_particles(
                placement.count,
                mother,
                creation,
                &forbidden,
                species,
                fluorophore,
                placement.trapped,
            );
            if placed < placement.count {
                warn!(
                    "Placed only {}/{} particles of '{}' in '{}'.",
                    placed, placement.count, placement.species, placement.mother_region
                );
            }
        }

        Ok(world)
    }

    // --- accessors ---

    pub fn species(&self) -> &[ChemicalSpecies] {
        &self.species
    }

    pub fn fluorophores(&self) -> &[FluorophoreSpecies] {
        &self.fluorophores
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    pub fn particles_mut(&mut self) -> &mut [Particle] {
        &mut self.particles
    }

    pub fn is_fixed(&self) -> bool {
        self.fixed
    }

    pub fn rng_mut(&mut self) -> &mut KineticsRng {
        &mut self.rng
    }

    pub fn species_handle(&self, name: &str) -> Option<usize> {
        self.species.iter().position(|s| s.name == name)
    }

    pub fn fluorophore_handle(&self, name: &str) -> Option<usize> {
        self.fluorophores.iter().position(|f| f.name == name)
    }

    pub fn region_handle(&self, name: &str) -> Option<usize> {
        self.regions.iter().position(|r| r.name() == name)
    }

    /// Splits the world into the pieces one step needs: the mutable particle
    /// slice, the read-only region/fluorophore tables, the host RNG and the
    /// fixation flag.
    pub fn split_step(
        &mut self,
    ) -> (&mut [Particle], &[Region], &[FluorophoreSpecies], &mut KineticsRng, bool) {
        (&mut self.particles, &self.regions, &self.fluorophores, &mut self.rng, self.fixed)
    }

    // --- species management ---

    pub fn add_species(&mut self, species: ChemicalSpecies) -> usize {
        for region in &mut self.regions {
            region.push_species_slot();
        }
        self.species.push(species);
        self.species.len() - 1
    }

    pub fn delete_species(&mut self, species: usize) {
        if species >= self.species.len() {
            warn!("delete_species: handle {} out of range.", species);
            return;
        }
        // Particles of the species go with it; settle their trap counters.
        let mut idx = 0;
        while idx < self.particles.len() {
            if self.particles[idx].species() == species {
                self.settle_trapped_counter(idx);
                self.particles.remove(idx);
            } else {
                idx += 1;
            }
        }
        for region in &mut self.regions {
            region.remove_species_slot(species);
        }
        self.species.remove(species);
        for particle in &mut self.particles {
            particle.repair_species_handle(species);
        }
    }

    pub fn add_fluorophore(&mut self, fluorophore: FluorophoreSpecies) -> usize {
        self.fluorophores.push(fluorophore);
        self.fluorophores.len() - 1
    }

    pub fn delete_fluorophore(&mut self, fluorophore: usize) {
        if fluorophore >= self.fluorophores.len() {
            warn!("delete_fluorophore: handle {} out of range.", fluorophore);
            return;
        }
        let mut idx = 0;
        while idx < self.particles.len() {
            if self.particles[idx].fluorophore() == fluorophore {
                self.settle_trapped_counter(idx);
                self.particles.remove(idx);
            } else {
                idx += 1;
            }
        }
        self.fluorophores.remove(fluorophore);
        for particle in &mut self.particles {
            particle.repair_fluorophore_handle(fluorophore);
        }
    }

    // --- region management ---

    /// Adds a polygonal region; degenerate polygons are silently discarded.
    pub fn add_region(
        &mut self,
        name: impl Into<String>,
        color: [f32; 3],
        vertices: Vec<Vec2>,
    ) -> Option<usize> {
        let region = Region::new(name, color, vertices, self.species.len())?;
        for particle in &mut self.particles {
            particle.sync_new_region(&region);
        }
        self.regions.push(region);
        Some(self.regions.len() - 1)
    }

    /// Deletes a region, repairing every particle reference to it.
    ///
    /// Region 0 is the outer cell contour and cannot be deleted. Particles
    /// whose mother region is deleted are removed with it; particles merely
    /// bound to it fall back to their mother region.
    pub fn delete_region(&mut self, region: usize) {
        if region == 0 {
            warn!("delete_region: region 0 is the outer contour and cannot be deleted.");
            return;
        }
        if region >= self.regions.len() {
            warn!("delete_region: handle {} out of range.", region);
            return;
        }
        let mut idx = 0;
        while idx < self.particles.len() {
            if self.particles[idx].mother() == region {
                self.settle_trapped_counter(idx);
                self.particles.remove(idx);
            } else {
                idx += 1;
            }
        }
        // Particles trapped in the doomed region release their occupancy
        // before the handle shift.
        for particle in &mut self.particles {
            if particle.is_trapped() && particle.child() == region {
                if let Some(dynamics) = self.regions[region].dynamics(particle.species()) {
                    dynamics.note_released();
                }
            }
        }
        self.regions.remove(region);
        for particle in &mut self.particles {
            particle.repair_region_handles(region);
        }
    }

    // --- particle population ---

    /// Places `count` particles uniformly at random inside
    /// `creation ∩ mother` minus the forbidden regions, by rejection
    /// sampling around the creation region's barycenter.
    ///
    /// Returns the number actually placed.
    #[allow(clippy::too_many_arguments)]
    pub fn add_particles(
        &mut self,
        count: u32,
        mother: usize,
        creation: usize,
        forbidden: &[usize],
        species: usize,
        fluorophore: usize,
        trapped: bool,
    ) -> u32 {
        if mother >= self.regions.len() || creation >= self.regions.len() {
            warn!("add_particles: region handle out of range (mother {mother}, creation {creation}).");
            return 0;
        }
        if species >= self.species.len() || fluorophore >= self.fluorophores.len() {
            warn!("add_particles: species {species} or fluorophore {fluorophore} out of range.");
            return 0;
        }
        if forbidden.iter().any(|&f| f >= self.regions.len()) {
            warn!("add_particles: forbidden region handle out of range.");
            return 0;
        }

        let center = self.regions[creation].barycenter();
        let radius = self.regions[creation].bounding_radius_sq().sqrt();
        let immobile_fraction = self.species[species].immobile_fraction;

        let trap_on_creation = if trapped {
            let supports = self.regions[creation]
                .dynamics(species)
                .map(|dy| dy.is_compartment && dy.trapping_enabled)
                .unwrap_or(false);
            if !supports {
                warn!(
                    "add_particles: region '{}' does not trap species {}; placing free particles.",
                    self.regions[creation].name(),
                    species
                );
            }
            supports && creation != mother
        } else {
            false
        };

        let mut placed = 0;
        for _ in 0..count {
            let mut position = None;
            for _ in 0..MAX_PLACEMENT_ATTEMPTS {
                let candidate = Vec2::new(
                    center.x + radius * (2.0 * self.rng.uniform() - 1.0),
                    center.y + radius * (2.0 * self.rng.uniform() - 1.0),
                );
                if !self.regions[creation].is_inside(candidate)
                    || !self.regions[mother].is_inside(candidate)
                {
                    continue;
                }
                if forbidden.iter().any(|&f| self.regions[f].is_inside(candidate)) {
                    continue;
                }
                position = Some(candidate);
                break;
            }
            let Some(position) = position else {
                debug!(
                    "add_particles: no valid position after {} attempts; stopping early.",
                    MAX_PLACEMENT_ATTEMPTS
                );
                break;
            };

            let immobile = self.rng.uniform() < immobile_fraction;
            let mut particle =
                Particle::new(position, mother, species, fluorophore, immobile, &self.regions);
            if trap_on_creation {
                particle.force_trap(creation);
                if let Some(dynamics) = self.regions[creation].dynamics(species) {
                    dynamics.note_trapped();
                }
                let ctx = StepContext {
                    regions: &self.regions,
                    fluorophores: &self.fluorophores,
                    dt: 0.0,
                    fixed: false,
                };
                particle.update_d(&ctx, &mut self.rng);
            }
            self.particles.push(particle);
            placed += 1;
        }
        placed
    }

    /// Removes up to `count` particles homed in `region` (optionally of one
    /// species). Returns the number removed.
    pub fn delete_particles_with_mother_region(
        &mut self,
        count: u32,
        region: usize,
        species: Option<usize>,
    ) -> u32 {
        if region >= self.regions.len() {
            warn!("delete_particles_with_mother_region: handle {} out of range.", region);
            return 0;
        }
        let mut removed = 0;
        let mut idx = self.particles.len();
        while idx > 0 && removed < count {
            idx -= 1;
            let p = &self.particles[idx];
            if p.mother() == region && species.map_or(true, |s| p.species() == s) {
                self.settle_trapped_counter(idx);
                self.particles.remove(idx);
                removed += 1;
            }
        }
        removed
    }

    /// Releases the occupancy slot held by particle `idx`, if any.
    fn settle_trapped_counter(&self, idx: usize) {
        let p = &self.particles[idx];
        if p.is_trapped() {
            if let Some(dynamics) =
                self.regions.get(p.child()).and_then(|r| r.dynamics(p.species()))
            {
                dynamics.note_released();
            }
        }
    }

    // --- broadcast setters ---
    //
    // Each setter validates its handles (no-op with a diagnostic on a stale
    // one), skips entirely when the value is unchanged, and otherwise walks
    // the particle list once marking affected diffusion coefficients dirty.
    // The bool return reports whether a marking pass ran.

    pub fn set_d(&mut self, region: usize, species: usize, d: f64) -> bool {
        let Some(dynamics) = self.checked_dynamics_mut(region, species, "set_d") else {
            return false;
        };
        if dynamics.d_free == d {
            return false;
        }
        dynamics.d_free = d;
        self.mark_dirty_in_region(region, species);
        true
    }

    pub fn set_d_trapped(&mut self, region: usize, species: usize, d: f64) -> bool {
        let Some(dynamics) = self.checked_dynamics_mut(region, species, "set_d_trapped") else {
            return false;
        };
        if dynamics.d_trapped == d {
            return false;
        }
        dynamics.d_trapped = d;
        self.mark_dirty_in_region(region, species);
        true
    }

    /// Flags or unflags a region as a binding compartment. Unflagging evicts
    /// every particle currently bound to the region.
    pub fn set_compartment(&mut self, region: usize, species: usize, is_compartment: bool) -> bool {
        let Some(dynamics) = self.checked_dynamics_mut(region, species, "set_compartment") else {
            return false;
        };
        if dynamics.is_compartment == is_compartment {
            return false;
        }
        dynamics.is_compartment = is_compartment;
        if !is_compartment {
            self.evict_bound(region, species);
        }
        self.mark_dirty_in_region(region, species);
        true
    }

    /// Enables or disables trapping. Disabling evicts trapped occupants.
    pub fn set_trapping_enabled(&mut self, region: usize, species: usize, enabled: bool) -> bool {
        let Some(dynamics) = self.checked_dynamics_mut(region, species, "set_trapping_enabled")
        else {
            return false;
        };
        if dynamics.trapping_enabled == enabled {
            return false;
        }
        dynamics.trapping_enabled = enabled;
        if !enabled {
            self.evict_bound(region, species);
        }
        self.mark_dirty_in_region(region, species);
        true
    }

    #[allow(clippy::too_many_arguments)]
    pub fn set_trapping_rates(
        &mut self,
        region: usize,
        species: usize,
        sites_abundant: bool,
        kon_abundant: f64,
        kon_not_abundant: f64,
        koff: f64,
        site_density: f64,
    ) -> bool {
        let Some(dynamics) = self.checked_dynamics_mut(region, species, "set_trapping_rates")
        else {
            return false;
        };
        if dynamics.sites_abundant == sites_abundant
            && dynamics.kon_abundant == kon_abundant
            && dynamics.kon_not_abundant == kon_not_abundant
            && dynamics.koff == koff
            && dynamics.site_density == site_density
        {
            return false;
        }
        dynamics.sites_abundant = sites_abundant;
        dynamics.kon_abundant = kon_abundant;
        dynamics.kon_not_abundant = kon_not_abundant;
        dynamics.koff = koff;
        dynamics.site_density = site_density;
        true
    }

    pub fn set_crossing(
        &mut self,
        region: usize,
        species: usize,
        sense: CrossingSense,
        probability: f64,
    ) -> bool {
        let probability = probability.clamp(0.0, 1.0);
        let Some(dynamics) = self.checked_dynamics_mut(region, species, "set_crossing") else {
            return false;
        };
        let current = dynamics.crossing_probability(sense);
        if current == probability {
            return false;
        }
        match sense {
            CrossingSense::Inward => dynamics.crossing[0] = probability,
            CrossingSense::Outward => dynamics.crossing[1] = probability,
        }
        true
    }

    /// Updates a species' immobile fraction and re-draws the immobile flag
    /// of its whole population from the new fraction.
    pub fn set_immobile_fraction(&mut self, species: usize, fraction: f64) -> bool {
        let fraction = fraction.clamp(0.0, 1.0);
        let Some(sp) = self.species.get_mut(species) else {
            warn!("set_immobile_fraction: species {} out of range.", species);
            return false;
        };
        if sp.immobile_fraction == fraction {
            return false;
        }
        sp.immobile_fraction = fraction;
        for particle in &mut self.particles {
            if particle.species() == species {
                let immobile = self.rng.uniform() < fraction;
                particle.set_immobile(immobile);
            }
        }
        true
    }

    /// A fixed world halts spatial and trapping updates; only photophysics
    /// advances (fixed-cell control experiments).
    pub fn set_fixation(&mut self, fixed: bool) {
        self.fixed = fixed;
    }

    fn checked_dynamics_mut(
        &mut self,
        region: usize,
        species: usize,
        op: &str,
    ) -> Option<&mut SpeciesDynamics> {
        if region >= self.regions.len() {
            warn!("{op}: region handle {region} out of range.");
            return None;
        }
        if species >= self.species.len() {
            warn!("{op}: species handle {species} out of range.");
            return None;
        }
        self.regions[region].dynamics_mut(species)
    }

    /// One pass over the particle list marking D dirty for every particle of
    /// the species currently associated with the region.
    fn mark_dirty_in_region(&mut self, region: usize, species: usize) {
        for particle in &mut self.particles {
            if particle.species() == species
                && (particle.child() == region || particle.mother() == region)
            {
                particle.mark_d_dirty();
            }
        }
    }

    /// Forces every particle of the species bound to the region back to its
    /// mother region.
    fn evict_bound(&mut self, region: usize, species: usize) {
        for particle in &mut self.particles {
            if particle.species() == species && particle.child() == region {
                if particle.is_trapped() {
                    if let Some(dynamics) = self.regions[region].dynamics(species) {
                        dynamics.note_released();
                    }
                }
                particle.release_to_mother();
            }
        }
    }

    // --- population queries (read-only, parallel scans) ---

    /// Number of particle centers inside a region, optionally one species.
    pub fn count_in_region(&self, region: usize, species: Option<usize>) -> u32 {
        let Some(reg) = self.regions.get(region) else {
            warn!("count_in_region: handle {} out of range.", region);
            return 0;
        };
        self.particles
            .par_iter()
            .filter(|p| species.map_or(true, |s| p.species() == s) && reg.is_inside(p.position()))
            .count() as u32
    }

    /// Particle density (1/um^2) of a species inside a region.
    pub fn density(&self, region: usize, species: usize) -> f64 {
        let Some(reg) = self.regions.get(region) else {
            warn!("density: handle {} out of range.", region);
            return 0.0;
        };
        if reg.surface() <= 0.0 {
            return 0.0;
        }
        self.count_in_region(region, Some(species)) as f64 / reg.surface()
    }

    pub fn visible_count(&self) -> u32 {
        self.particles.par_iter().filter(|p| p.is_visible()).count() as u32
    }

    pub fn trapped_count(&self) -> u32 {
        self.particles.par_iter().filter(|p| p.is_trapped()).count() as u32
    }

    /// Current particle positions, for export.
    pub fn positions(&self) -> Vec<(f64, f64)> {
        self.particles.iter().map(|p| (p.position().x, p.position().y)).collect()
    }

    /// Serial reference step used by the single-threaded path and by tests.
    pub fn step_serial(&mut self, dt: f64) {
        let ctx = StepContext {
            regions: &self.regions,
            fluorophores: &self.fluorophores,
            dt,
            fixed: self.fixed,
        };
        let rng = &mut self.rng;
        for particle in &mut self.particles {
            particle.step(&ctx, rng);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(cx: f64, cy: f64, half: f64) -> Vec<Vec2> {
        vec![
            Vec2::new(cx - half, cy - half),
            Vec2::new(cx + half, cy - half),
            Vec2::new(cx + half, cy + half),
            Vec2::new(cx - half, cy + half),
        ]
    }

    fn base_world() -> BiologicalWorld {
        let mut world = BiologicalWorld::new(99);
        world.add_species(ChemicalSpecies::new("tracer", [0.0; 3], 0.0));
        world.add_fluorophore(FluorophoreSpecies::new("egfp", 0.0, 0.0));
        world.add_region("cell", [0.0; 3], square(0.0, 0.0, 10.0)).unwrap();
        world
    }

    #[test]
    fn degenerate_region_is_discarded() {
        let mut world = base_world();
        let handle = world.add_region("line", [0.0; 3], vec![Vec2::zero(), Vec2::new(1.0, 0.0)]);
        assert!(handle.is_none());
        assert_eq!(world.regions().len(), 1);
    }

    #[test]
    fn particles_are_placed_inside_allowed_area() {
        let mut world = base_world();
        let hole = world.add_region("hole", [0.0; 3], square(3.0, 3.0, 1.0)).unwrap();
        let placed = world.add_particles(200, 0, 0, &[hole], 0, 0, false);
        assert_eq!(placed, 200);
        for p in world.particles() {
            assert!(world.regions()[0].is_inside(p.position()));
            assert!(!world.regions()[hole].is_inside(p.position()));
        }
    }

    #[test]
    fn invalid_handles_are_noops() {
        let mut world = base_world();
        assert_eq!(world.add_particles(10, 7, 0, &[], 0, 0, false), 0);
        assert_eq!(world.add_particles(10, 0, 0, &[], 3, 0, false), 0);
        assert!(!world.set_d(9, 0, 1.0));
        world.delete_region(9); // Logged, no panic.
        assert_eq!(world.regions().len(), 1);
    }

    #[test]
    fn set_d_is_idempotent() {
        let mut world = base_world();
        world.add_particles(10, 0, 0, &[], 0, 0, false);
        assert!(world.set_d(0, 0, 2.5));
        // Second call with the same value must not trigger another pass.
        assert!(!world.set_d(0, 0, 2.5));
        assert!(world.set_d(0, 0, 3.0));
    }

    #[test]
    fn region_deletion_repairs_handles() {
        let mut world = base_world();
        let pit = world.add_region("pit", [0.0; 3], square(0.0, 0.0, 2.0)).unwrap();
        let annex = world.add_region("annex", [0.0; 3], square(5.0, 5.0, 2.0)).unwrap();
        world.set_compartment(annex, 0, true);
        world.add_particles(50, 0, 0, &[], 0, 0, false);
        assert_eq!(annex, 2);

        world.delete_region(pit);
        // The annex shifted down by one and particles still have one tower
        // per region.
        assert_eq!(world.regions().len(), 2);
        assert_eq!(world.region_handle("annex"), Some(1));
        for p in world.particles() {
            assert_eq!(p.mother(), 0);
            assert!(p.tower(1).is_some());
            assert!(p.tower(2).is_none());
        }
    }

    #[test]
    fn deleting_region_zero_is_refused() {
        let mut world = base_world();
        world.delete_region(0);
        assert_eq!(world.regions().len(), 1);
    }

    #[test]
    fn trapped_creation_fills_occupancy() {
        let mut world = base_world();
        let pit = world.add_region("pit", [0.0; 3], square(0.0, 0.0, 2.0)).unwrap();
        world.set_compartment(pit, 0, true);
        world.set_trapping_enabled(pit, 0, true);
        let placed = world.add_particles(20, 0, pit, &[], 0, 0, true);
        assert_eq!(placed, 20);
        assert_eq!(world.trapped_count(), 20);
        assert_eq!(world.regions()[pit].dynamics(0).unwrap().trapped_count(), 20);

        // Disabling trapping evicts everyone and clears the counter usage.
        world.set_trapping_enabled(pit, 0, false);
        assert_eq!(world.trapped_count(), 0);
        assert_eq!(world.regions()[pit].dynamics(0).unwrap().trapped_count(), 0);
    }

    #[test]
    fn delete_particles_matches_mother_and_species() {
        let mut world = base_world();
        world.add_species(ChemicalSpecies::new("other", [0.0; 3], 0.0));
        world.add_particles(30, 0, 0, &[], 0, 0, false);
        world.add_particles(20, 0, 0, &[], 1, 0, false);
        assert_eq!(world.delete_particles_with_mother_region(100, 0, Some(1)), 20);
        assert_eq!(world.particles().len(), 30);
        assert_eq!(world.delete_particles_with_mother_region(10, 0, None), 10);
        assert_eq!(world.particles().len(), 20);
    }

    #[test]
    fn density_counts_species_in_region() {
        let mut world = base_world();
        world.add_particles(100, 0, 0, &[], 0, 0, false);
        let count = world.count_in_region(0, Some(0));
        assert_eq!(count, 100);
        let density = world.density(0, 0);
        assert!((density - 100.0 / 400.0).abs() < 1e-12);
    }
}
