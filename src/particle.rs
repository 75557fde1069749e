use crate::region::{BoundaryOutcome, CrossingSense, Region};
use crate::rng::KineticsRng;
use crate::species::FluorophoreSpecies;
use fluorosim_common::Vec2;
use log::{trace, warn};

/// Fraction of the true distance-to-boundary stored as a Tower's safe
/// radius, leaving a margin so a particle never lands exactly on an edge of
/// a region its Tower claimed it could not reach.
const TOWER_SAFETY: f64 = 0.995;

/// Cap on reflect/transmit iterations per step; any residual displacement
/// beyond it is dropped.
const MAX_REFLECT_ITERS: usize = 32;

/// Cap on rejection draws for a trapped (double-confined) step.
const MAX_TRAP_DRAWS: usize = 100;

/// Residual displacements below this squared magnitude count as consumed.
const MIN_RESIDUAL_SQ: f64 = 1e-24;

/// Per-(particle, region) cached safe-radius circle.
///
/// While the particle stays within `safe_radius` of the position recorded at
/// the last refresh, it cannot have crossed that region's boundary, so all
/// edge tests against the region are skipped.
#[derive(Debug, Clone)]
pub struct Tower {
    last_pos: Vec2,
    safe_radius_sq: f64,
    inside: bool,
}

impl Tower {
    pub fn fresh(pos: Vec2, region: &Region) -> Self {
        let safe = TOWER_SAFETY * region.distance_to_boundary(pos);
        Tower {
            last_pos: pos,
            safe_radius_sq: safe * safe,
            inside: region.is_inside(pos),
        }
    }

    /// Last known containment state at the refresh position.
    pub fn inside(&self) -> bool {
        self.inside
    }

    pub fn safe_radius_sq(&self) -> f64 {
        self.safe_radius_sq
    }

    /// Whether a move from `start` to `end` could have crossed the region
    /// boundary. Both endpoints inside the safe circle bound the whole
    /// segment inside it.
    fn may_have_crossed(&self, start: Vec2, end: Vec2) -> bool {
        start.distance_squared(self.last_pos) >= self.safe_radius_sq
            || end.distance_squared(self.last_pos) >= self.safe_radius_sq
    }

    fn refresh(&mut self, pos: Vec2, region: &Region) {
        *self = Tower::fresh(pos, region);
    }
}

/// Photophysical state of one particle's fluorophore.
#[derive(Debug, Clone, Copy, Default)]
pub struct Fluorophore {
    /// Reversible dark state.
    pub blinked: bool,
    /// Absorbing dark state, set externally by a photobleaching head.
    pub bleached: bool,
}

/// Read-only world state shared by every particle during one step.
#[derive(Clone, Copy)]
pub struct StepContext<'a> {
    pub regions: &'a [Region],
    pub fluorophores: &'a [FluorophoreSpecies],
    /// Step duration in seconds.
    pub dt: f64,
    /// Fixation freezes motion and trapping; photophysics continues.
    pub fixed: bool,
}

/// One diffusing fluorophore-tagged particle.
#[derive(Debug, Clone)]
pub struct Particle {
    position: Vec2,
    /// Home region handle, fixed at creation; the particle never leaves it.
    mother: usize,
    /// Compartment the particle is currently associated with; equals the
    /// mother handle when untrapped and unconfined.
    child: usize,
    species: usize,
    fluorophore: usize,
    trapped: bool,
    immobile: bool,
    /// Current diffusion coefficient, recomputed lazily via `d_dirty`.
    d: f64,
    d_dirty: bool,
    fluo: Fluorophore,
    towers: Vec<Tower>,
}

impl Particle {
    pub fn new(
        position: Vec2,
        mother: usize,
        species: usize,
        fluorophore: usize,
        immobile: bool,
        regions: &[Region],
    ) -> Self {
        let d = regions
            .get(mother)
            .and_then(|r| r.dynamics(species))
            .map(|dy| dy.d_free)
            .unwrap_or(0.0);
        Particle {
            position,
            mother,
            child: mother,
            species,
            fluorophore,
            trapped: false,
            immobile,
            d,
            d_dirty: false,
            fluo: Fluorophore::default(),
            towers: regions.iter().map(|r| Tower::fresh(position, r)).collect(),
        }
    }

    pub fn position(&self) -> Vec2 {
        self.position
    }

    pub fn mother(&self) -> usize {
        self.mother
    }

    pub fn child(&self) -> usize {
        self.child
    }

    pub fn species(&self) -> usize {
        self.species
    }

    pub fn fluorophore(&self) -> usize {
        self.fluorophore
    }

    pub fn is_trapped(&self) -> bool {
        self.trapped
    }

    pub fn is_immobile(&self) -> bool {
        self.immobile
    }

    pub fn set_immobile(&mut self, immobile: bool) {
        self.immobile = immobile;
    }

    pub fn diffusion_coefficient(&self) -> f64 {
        self.d
    }

    pub fn fluorophore_state(&self) -> Fluorophore {
        self.fluo
    }

    /// Visibility as consumed by the rendering layer and the probes.
    pub fn is_visible(&self) -> bool {
        !self.fluo.bleached && !self.fluo.blinked
    }

    /// Irreversibly bleaches the fluorophore.
    pub fn bleach(&mut self) {
        self.fluo.bleached = true;
    }

    /// Clears the reversible dark state (photoactivation).
    pub fn activate(&mut self) {
        self.fluo.blinked = false;
    }

    pub fn set_blinked(&mut self, blinked: bool) {
        self.fluo.blinked = blinked;
    }

    /// Flags the diffusion coefficient for recomputation on the next step.
    pub fn mark_d_dirty(&mut self) {
        self.d_dirty = true;
    }

    /// Forces the particle back to its mother region, dropping any trapped
    /// association. The caller settles the region occupancy counter.
    pub fn release_to_mother(&mut self) {
        self.trapped = false;
        self.child = self.mother;
        self.d_dirty = true;
    }

    /// Forces the trapped state inside the given compartment. The caller
    /// settles the region occupancy counter.
    pub fn force_trap(&mut self, compartment: usize) {
        self.trapped = true;
        self.child = compartment;
        self.d_dirty = true;
    }

    /// Appends a fresh Tower for a region just added to the world.
    pub fn sync_new_region(&mut self, region: &Region) {
        self.towers.push(Tower::fresh(self.position, region));
    }

    /// Shifts region handles after region `removed` was deleted.
    /// The caller guarantees the mother handle does not name the removed
    /// region (such particles are deleted, not repaired).
    pub fn repair_region_handles(&mut self, removed: usize) {
        debug_assert_ne!(self.mother, removed);
        if self.child == removed {
            self.release_to_mother();
        }
        if self.mother > removed {
            self.mother -= 1;
        }
        if self.child > removed {
            self.child -= 1;
        }
        if removed < self.towers.len() {
            self.towers.remove(removed);
        }
    }

    /// Shifts the species handle after species `removed` was deleted.
    /// The caller guarantees this particle is not of the removed species.
    pub fn repair_species_handle(&mut self, removed: usize) {
        debug_assert_ne!(self.species, removed);
        if self.species > removed {
            self.species -= 1;
        }
    }

    /// Shifts the fluorophore handle after fluorophore `removed` was deleted.
    pub fn repair_fluorophore_handle(&mut self, removed: usize) {
        debug_assert_ne!(self.fluorophore, removed);
        if self.fluorophore > removed {
            self.fluorophore -= 1;
        }
    }

    pub fn tower(&self, region: usize) -> Option<&Tower> {
        self.towers.get(region)
    }

    /// One full update: position, trapping, diffusion coefficient, then
    /// photophysics. Trapping precedes the D recomputation that depends on
    /// it; photophysics runs even under fixation.
    pub fn step(&mut self, ctx: &StepContext, rng: &mut KineticsRng) {
        if !ctx.fixed {
            self.update_position(ctx, rng);
            self.update_trapping_state(ctx, rng);
            self.update_d(ctx, rng);
        }
        self.update_photophysic_state(ctx, rng);
    }

    /// Advances the position by one isotropic gaussian step, resolved against
    /// the region boundaries.
    pub fn update_position(&mut self, ctx: &StepContext, rng: &mut KineticsRng) {
        if self.immobile {
            return;
        }
        let sigma = (2.0 * self.d * ctx.dt).max(0.0).sqrt();
        if self.trapped {
            self.update_position_trapped(ctx, sigma, rng);
        } else {
            let dr = Vec2::new(rng.gaussian_step(sigma), rng.gaussian_step(sigma));
            self.update_position_free(ctx, dr, rng);
        }
        self.refresh_towers(ctx.regions);
    }

    /// Trapped diffusion: resample the candidate endpoint until it lies in
    /// both the mother region and the trapping compartment.
    fn update_position_trapped(&mut self, ctx: &StepContext, sigma: f64, rng: &mut KineticsRng) {
        let (Some(mother), Some(child)) =
            (ctx.regions.get(self.mother), ctx.regions.get(self.child))
        else {
            warn!(
                "Particle references region out of range (mother {}, child {}); skipping move.",
                self.mother, self.child
            );
            return;
        };
        for _ in 0..MAX_TRAP_DRAWS {
            let candidate = self.position
                + Vec2::new(rng.gaussian_step(sigma), rng.gaussian_step(sigma));
            if mother.is_inside(candidate) && child.is_inside(candidate) {
                self.position = candidate;
                return;
            }
        }
        // The double confinement rejected every draw; stay put this step.
        trace!("Trapped step rejected {} draws; particle stays.", MAX_TRAP_DRAWS);
    }

    /// Free diffusion: resolve the displacement iteratively against the
    /// globally earliest boundary crossing until it is consumed.
    fn update_position_free(&mut self, ctx: &StepContext, mut dr: Vec2, rng: &mut KineticsRng) {
        let mut pos = self.position;
        let mut avoid: Option<(usize, usize)> = None; // (region, edge)
        let mut iters = 0;

        while dr.length_squared() > MIN_RESIDUAL_SQ {
            if iters >= MAX_REFLECT_ITERS {
                trace!("Dropping residual displacement after {} reflections.", iters);
                break;
            }
            iters += 1;

            let end = pos + dr;
            let mut best: Option<(usize, crate::region::BoundaryHit)> = None;
            for (idx, region) in ctx.regions.iter().enumerate() {
                // Towers prune regions whose boundary cannot have been
                // reached since their last refresh.
                if let Some(tower) = self.towers.get(idx) {
                    if !tower.may_have_crossed(pos, end) {
                        continue;
                    }
                }
                let avoid_edge = avoid.and_then(|(r, e)| (r == idx).then_some(e));
                if let Some(hit) = region.first_crossing(pos, dr, avoid_edge) {
                    if best.as_ref().map_or(true, |(_, b)| hit.t < b.t) {
                        best = Some((idx, hit));
                    }
                }
            }

            let Some((region_idx, hit)) = best else {
                pos = end;
                break;
            };

            let region = &ctx.regions[region_idx];
            let sense = hit.crossing.sense();
            // The home contour is unconditionally reflective outward; a
            // particle never escapes its mother region.
            let p_cross = if region_idx == self.mother && sense == CrossingSense::Outward {
                0.0
            } else {
                region
                    .dynamics(self.species)
                    .map(|dy| dy.crossing_probability(sense))
                    .unwrap_or(1.0)
            };

            match region.resolve_crossing(pos, dr, &hit, p_cross, rng) {
                BoundaryOutcome::Transmitted { pos: p, residual } => {
                    pos = p;
                    dr = residual;
                    avoid = None;
                }
                BoundaryOutcome::Reflected { pos: p, residual, edge } => {
                    pos = p;
                    dr = residual;
                    avoid = Some((region_idx, edge));
                }
            }
        }
        self.position = pos;
    }

    /// Refreshes every Tower whose safe circle the particle has left.
    fn refresh_towers(&mut self, regions: &[Region]) {
        for (idx, tower) in self.towers.iter_mut().enumerate() {
            let Some(region) = regions.get(idx) else { continue };
            if self.position.distance_squared(tower.last_pos) >= tower.safe_radius_sq {
                tower.refresh(self.position, region);
            }
        }
    }

    /// Advances the free <-> trapped state machine by one step.
    pub fn update_trapping_state(&mut self, ctx: &StepContext, rng: &mut KineticsRng) {
        if self.trapped {
            let Some(dynamics) = ctx.regions.get(self.child).and_then(|r| r.dynamics(self.species))
            else {
                warn!("Trapped particle references invalid region {}; releasing.", self.child);
                self.release_to_mother();
                return;
            };
            if rng.uniform() <= dynamics.koff * ctx.dt {
                dynamics.note_released();
                self.trapped = false;
                self.d_dirty = true;
            }
            return;
        }

        // Re-associate with the innermost compartment containing the
        // particle (smallest surface wins on nesting).
        let mut found: Option<(usize, f64)> = None;
        for (idx, region) in ctx.regions.iter().enumerate() {
            if idx == self.mother {
                continue;
            }
            let Some(dynamics) = region.dynamics(self.species) else { continue };
            if !dynamics.is_compartment || !region.is_inside(self.position) {
                continue;
            }
            if found.map_or(true, |(_, s)| region.surface() < s) {
                found = Some((idx, region.surface()));
            }
        }
        let new_child = found.map(|(idx, _)| idx).unwrap_or(self.mother);
        if new_child != self.child {
            self.child = new_child;
            self.d_dirty = true;
        }

        if self.child != self.mother {
            let region = &ctx.regions[self.child];
            if let Some(dynamics) = region.dynamics(self.species) {
                if dynamics.trapping_enabled {
                    let kon = dynamics.kon(region.surface());
                    if rng.uniform() <= kon * ctx.dt {
                        dynamics.note_trapped();
                        self.trapped = true;
                        self.d_dirty = true;
                    }
                }
            }
        }
    }

    /// Recomputes the diffusion coefficient if a state change flagged it.
    pub fn update_d(&mut self, ctx: &StepContext, rng: &mut KineticsRng) {
        if !self.d_dirty {
            return;
        }
        let Some(dynamics) = ctx.regions.get(self.child).and_then(|r| r.dynamics(self.species))
        else {
            warn!("Particle child region {} has no dynamics for species {}.", self.child, self.species);
            self.d_dirty = false;
            return;
        };
        self.d = if self.trapped {
            let mut d = dynamics.d_trapped;
            // Optional heterogeneous trap mobility: scale by a normalized
            // poisson draw so the ensemble mean stays d_trapped.
            if let Some(mean) = dynamics.trap_d_poisson_mean {
                if mean > 0.0 {
                    d *= rng.poisson_with_mean(mean) / mean;
                }
            }
            d
        } else {
            dynamics.d_free
        };
        self.d_dirty = false;
    }

    /// Advances the blinking state machine; bleaching is absorbing.
    pub fn update_photophysic_state(&mut self, ctx: &StepContext, rng: &mut KineticsRng) {
        if self.fluo.bleached {
            return;
        }
        let Some(fluo) = ctx.fluorophores.get(self.fluorophore) else {
            warn!("Particle references fluorophore {} out of range.", self.fluorophore);
            return;
        };
        if self.fluo.blinked {
            if rng.uniform() <= fluo.blink_on_per_s * ctx.dt {
                self.fluo.blinked = false;
            }
        } else if rng.uniform() <= fluo.blink_off_per_s * ctx.dt {
            self.fluo.blinked = true;
        }
    }
}
