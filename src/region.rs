use crate::rng::KineticsRng;
use fluorosim_common::vecmath::{point_segment_distance, Vec2};
use fluorosim_common::RegionDynamicsConfig;
use log::debug;
use std::sync::atomic::{AtomicU32, Ordering};

/// Lower bound of the valid intersection parameter range (0, 1].
///
/// Keeps a particle sitting exactly on an edge (after a transmission) from
/// re-detecting that edge at t = 0 on the next iteration.
const T_EPS: f64 = 1e-9;

/// Distance below which the segment start counts as lying on an edge.
const ON_EDGE_EPS: f64 = 1e-9;

/// Area below which a polygon is considered degenerate and discarded.
const MIN_SURFACE: f64 = 1e-9;

/// Which way a displacement segment crosses a region boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrossingDirection {
    OutsideToInside,
    InsideToOutside,
    /// Start point lies on the boundary, heading inward.
    OnToInside,
    /// Start point lies on the boundary, heading outward.
    OnToOutside,
}

/// The two directional crossing-probability slots of a boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrossingSense {
    Inward,
    Outward,
}

impl CrossingDirection {
    /// Collapses the ON variants onto the probability slot they consume.
    pub fn sense(self) -> CrossingSense {
        match self {
            CrossingDirection::OutsideToInside | CrossingDirection::OnToInside => {
                CrossingSense::Inward
            }
            CrossingDirection::InsideToOutside | CrossingDirection::OnToOutside => {
                CrossingSense::Outward
            }
        }
    }
}

impl CrossingSense {
    fn index(self) -> usize {
        match self {
            CrossingSense::Inward => 0,
            CrossingSense::Outward => 1,
        }
    }
}

/// Earliest boundary intersection of a displacement segment.
#[derive(Debug, Clone, Copy)]
pub struct BoundaryHit {
    /// Fractional position along the displacement, in (0, 1].
    pub t: f64,
    /// Index of the intersected polygon edge.
    pub edge: usize,
    pub crossing: CrossingDirection,
}

/// Result of resolving a boundary hit against a crossing probability.
#[derive(Debug, Clone, Copy)]
pub enum BoundaryOutcome {
    /// The particle passes through: it sits at the exact intersection point
    /// and the unconsumed remainder of the displacement continues unchanged.
    Transmitted { pos: Vec2, residual: Vec2 },
    /// The particle bounces specularly: the remainder keeps its magnitude but
    /// is redirected about the edge normal. `edge` becomes the edge to avoid
    /// on the next iteration.
    Reflected { pos: Vec2, residual: Vec2, edge: usize },
}

/// Per-species dynamic parameters of a region.
#[derive(Debug)]
pub struct SpeciesDynamics {
    /// Whether the region acts as a binding/association compartment for this
    /// species (a particle inside it adopts it as its child region).
    pub is_compartment: bool,
    /// Free diffusion coefficient inside the region (um^2/s).
    pub d_free: f64,
    /// Diffusion coefficient while trapped (um^2/s).
    pub d_trapped: f64,
    pub trapping_enabled: bool,
    /// Selects between the concentration-independent kon and the
    /// site-density-dependent one.
    pub sites_abundant: bool,
    pub kon_abundant: f64,
    pub kon_not_abundant: f64,
    pub koff: f64,
    /// Total binding-site density (sites/um^2).
    pub site_density: f64,
    /// Mean of an optional Poisson draw scaling d_trapped per binding event,
    /// modelling heterogeneous trap mobility.
    pub trap_d_poisson_mean: Option<f64>,
    /// Transmission probabilities, indexed by `CrossingSense`.
    pub crossing: [f64; 2],
    /// Current number of particles trapped in this region.
    ///
    /// Incremented/decremented from worker threads without cross-thread
    /// ordering; relaxed atomics keep the count exact where the original
    /// unsynchronized counter was only approximate.
    trapped_count: AtomicU32,
}

impl Default for SpeciesDynamics {
    fn default() -> Self {
        SpeciesDynamics {
            is_compartment: false,
            d_free: 0.0,
            d_trapped: 0.0,
            trapping_enabled: false,
            sites_abundant: true,
            kon_abundant: 0.0,
            kon_not_abundant: 0.0,
            koff: 0.0,
            site_density: 0.0,
            trap_d_poisson_mean: None,
            crossing: [1.0, 1.0],
            trapped_count: AtomicU32::new(0),
        }
    }
}

impl Clone for SpeciesDynamics {
    fn clone(&self) -> Self {
        SpeciesDynamics {
            is_compartment: self.is_compartment,
            d_free: self.d_free,
            d_trapped: self.d_trapped,
            trapping_enabled: self.trapping_enabled,
            sites_abundant: self.sites_abundant,
            kon_abundant: self.kon_abundant,
            kon_not_abundant: self.kon_not_abundant,
            koff: self.koff,
            site_density: self.site_density,
            trap_d_poisson_mean: self.trap_d_poisson_mean,
            crossing: self.crossing,
            trapped_count: AtomicU32::new(self.trapped_count.load(Ordering::Relaxed)),
        }
    }
}

impl SpeciesDynamics {
    pub fn from_config(cfg: &RegionDynamicsConfig) -> Self {
        SpeciesDynamics {
            is_compartment: cfg.is_compartment,
            d_free: cfg.d_free,
            d_trapped: cfg.d_trapped,
            trapping_enabled: cfg.trapping_enabled,
            sites_abundant: cfg.sites_abundant,
            kon_abundant: cfg.kon_abundant,
            kon_not_abundant: cfg.kon_not_abundant,
            koff: cfg.koff,
            site_density: cfg.site_density,
            trap_d_poisson_mean: cfg.trap_d_poisson_mean,
            crossing: [cfg.crossing_in.clamp(0.0, 1.0), cfg.crossing_out.clamp(0.0, 1.0)],
            trapped_count: AtomicU32::new(0),
        }
    }

    pub fn trapped_count(&self) -> u32 {
        self.trapped_count.load(Ordering::Relaxed)
    }

    /// Notes one more particle entering the trapped state.
    pub fn note_trapped(&self) {
        self.trapped_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Notes one particle leaving the trapped state.
    pub fn note_released(&self) {
        // Saturating on underflow: a stale release after an eviction pass
        // must not wrap the counter.
        let _ = self
            .trapped_count
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| c.checked_sub(1));
    }

    pub fn reset_trapped_count(&self) {
        self.trapped_count.store(0, Ordering::Relaxed);
    }

    /// Site density still available for binding, given the region surface.
    pub fn current_site_density(&self, surface: f64) -> f64 {
        if surface <= 0.0 {
            return 0.0;
        }
        (self.site_density - self.trapped_count() as f64 / surface).max(0.0)
    }

    /// Effective association rate (1/s), given the region surface.
    pub fn kon(&self, surface: f64) -> f64 {
        if self.sites_abundant {
            self.kon_abundant
        } else {
            self.kon_not_abundant * self.current_site_density(surface)
        }
    }

    pub fn crossing_probability(&self, sense: CrossingSense) -> f64 {
        self.crossing[sense.index()]
    }
}

/// A simple polygon with per-species diffusion/trapping/crossing parameters.
///
/// Geometry caches (barycenter, bounding radius, surface, winding) are
/// recomputed whenever the vertices change, so that every `&self` query stays
/// pure during the read-only parallel step.
#[derive(Debug, Clone)]
pub struct Region {
    name: String,
    pub color: [f32; 3],
    vertices: Vec<Vec2>,
    barycenter: Vec2,
    bounding_radius_sq: f64,
    surface: f64,
    /// True if the vertex loop winds counter-clockwise; the interior is then
    /// locally to the left of every directed edge.
    ccw: bool,
    dynamics: Vec<SpeciesDynamics>,
}

impl Region {
    /// Builds a region from an ordered vertex loop.
    ///
    /// Degenerate polygons (fewer than 3 vertices, or near-zero area) are
    /// discarded: `None` is returned and a diagnostic is logged.
    pub fn new(
        name: impl Into<String>,
        color: [f32; 3],
        vertices: Vec<Vec2>,
        species_count: usize,
    ) -> Option<Self> {
        let name = name.into();
        if vertices.len() < 3 {
            debug!("Discarding region '{}': only {} vertices.", name, vertices.len());
            return None;
        }
        let signed = signed_area(&vertices);
        if signed.abs() < MIN_SURFACE {
            debug!("Discarding region '{}': degenerate surface area.", name);
            return None;
        }
        let mut region = Region {
            name,
            color,
            vertices,
            barycenter: Vec2::zero(),
            bounding_radius_sq: 0.0,
            surface: 0.0,
            ccw: signed > 0.0,
            dynamics: (0..species_count).map(|_| SpeciesDynamics::default()).collect(),
        };
        region.recompute_cached();
        Some(region)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn vertices(&self) -> &[Vec2] {
        &self.vertices
    }

    pub fn barycenter(&self) -> Vec2 {
        self.barycenter
    }

    pub fn bounding_radius_sq(&self) -> f64 {
        self.bounding_radius_sq
    }

    /// Polygon surface area (um^2).
    pub fn surface(&self) -> f64 {
        self.surface
    }

    /// Replaces the vertex loop; rejected (and left unchanged) if degenerate.
    pub fn set_vertices(&mut self, vertices: Vec<Vec2>) -> bool {
        if vertices.len() < 3 || signed_area(&vertices).abs() < MIN_SURFACE {
            debug!("Ignoring degenerate vertex update for region '{}'.", self.name);
            return false;
        }
        self.ccw = signed_area(&vertices) > 0.0;
        self.vertices = vertices;
        self.recompute_cached();
        true
    }

    fn recompute_cached(&mut self) {
        let n = self.vertices.len() as f64;
        let mut center = Vec2::zero();
        for v in &self.vertices {
            center = center + *v;
        }
        self.barycenter = center / n;
        self.bounding_radius_sq = self
            .vertices
            .iter()
            .map(|v| v.distance_squared(self.barycenter))
            .fold(0.0, f64::max);
        self.surface = signed_area(&self.vertices).abs();
    }

    /// Per-species dynamics, or None for an out-of-range species handle.
    pub fn dynamics(&self, species: usize) -> Option<&SpeciesDynamics> {
        self.dynamics.get(species)
    }

    pub fn dynamics_mut(&mut self, species: usize) -> Option<&mut SpeciesDynamics> {
        self.dynamics.get_mut(species)
    }

    /// Appends a default dynamics slot for a newly added species.
    pub fn push_species_slot(&mut self) {
        self.dynamics.push(SpeciesDynamics::default());
    }

    /// Removes the dynamics slot of a deleted species.
    pub fn remove_species_slot(&mut self, species: usize) {
        if species < self.dynamics.len() {
            self.dynamics.remove(species);
        }
    }

    pub fn species_slots(&self) -> usize {
        self.dynamics.len()
    }

    /// Standard ray-casting point-in-polygon test, with a bounding-circle
    /// early reject.
    pub fn is_inside(&self, p: Vec2) -> bool {
        if p.distance_squared(self.barycenter) > self.bounding_radius_sq {
            return false;
        }
        let n = self.vertices.len();
        let mut inside = false;
        let mut j = n - 1;
        for i in 0..n {
            let a = self.vertices[i];
            let b = self.vertices[j];
            if (a.y > p.y) != (b.y > p.y) {
                let x_at = a.x + (p.y - a.y) / (b.y - a.y) * (b.x - a.x);
                if p.x < x_at {
                    inside = !inside;
                }
            }
            j = i;
        }
        inside
    }

    /// Shortest distance from `p` to the polygon boundary.
    pub fn distance_to_boundary(&self, p: Vec2) -> f64 {
        let n = self.vertices.len();
        let mut best = f64::INFINITY;
        for i in 0..n {
            let a = self.vertices[i];
            let b = self.vertices[(i + 1) % n];
            best = best.min(point_segment_distance(p, a, b));
        }
        best
    }

    /// Finds the earliest intersection of the displacement segment
    /// `r -> r + dr` with the polygon boundary, excluding `edge_to_avoid`.
    ///
    /// Returns None when the full segment stays on one side of the boundary.
    pub fn first_crossing(
        &self,
        r: Vec2,
        dr: Vec2,
        edge_to_avoid: Option<usize>,
    ) -> Option<BoundaryHit> {
        // The whole segment outside the bounding circle cannot touch an edge.
        let end = r + dr;
        if point_segment_distance(self.barycenter, r, end).powi(2) > self.bounding_radius_sq {
            return None;
        }

        let n = self.vertices.len();
        let mut best: Option<BoundaryHit> = None;
        for edge in 0..n {
            if edge_to_avoid == Some(edge) {
                continue;
            }
            let a = self.vertices[edge];
            let b = self.vertices[(edge + 1) % n];
            let e = b - a;
            let denom = dr.cross(e);
            if denom.abs() < 1e-18 {
                continue; // Parallel to the edge.
            }
            let ap = a - r;
            let t = ap.cross(e) / denom;
            let u = ap.cross(dr) / denom;
            if t <= T_EPS || t > 1.0 || !(0.0..=1.0).contains(&u) {
                continue;
            }
            if best.map_or(true, |h| t < h.t) {
                let crossing = self.classify_crossing(r, dr, a, b, e);
                best = Some(BoundaryHit { t, edge, crossing });
            }
        }
        best
    }

    /// Classifies which way a displacement crosses the edge `a -> b`.
    ///
    /// For a simple polygon the interior lies locally to the left of every
    /// directed edge when the loop winds counter-clockwise, so the sign of
    /// the displacement against the inward edge normal is exact; no sampled
    /// containment test near the knife edge is needed.
    fn classify_crossing(&self, r: Vec2, dr: Vec2, a: Vec2, b: Vec2, e: Vec2) -> CrossingDirection {
        let mut inward = e.perp();
        if !self.ccw {
            inward = -inward;
        }
        let heading_in = dr.dot(inward) > 0.0;
        let starts_on_edge = point_segment_distance(r, a, b) < ON_EDGE_EPS;
        match (starts_on_edge, heading_in) {
            (true, true) => CrossingDirection::OnToInside,
            (true, false) => CrossingDirection::OnToOutside,
            (false, true) => CrossingDirection::OutsideToInside,
            (false, false) => CrossingDirection::InsideToOutside,
        }
    }

    /// Resolves a boundary hit: one uniform draw against `p_cross` decides
    /// between transmission and specular reflection.
    pub fn resolve_crossing(
        &self,
        r: Vec2,
        dr: Vec2,
        hit: &BoundaryHit,
        p_cross: f64,
        rng: &mut KineticsRng,
    ) -> BoundaryOutcome {
        let pos = r + dr * hit.t;
        let residual = dr * (1.0 - hit.t);
        if rng.uniform() < p_cross {
            return BoundaryOutcome::Transmitted { pos, residual };
        }
        let n = self.vertices.len();
        let a = self.vertices[hit.edge];
        let b = self.vertices[(hit.edge + 1) % n];
        let normal = (b - a).perp().normalize_or_zero();
        let reflected = residual - normal * (2.0 * residual.dot(normal));
        BoundaryOutcome::Reflected { pos, residual: reflected, edge: hit.edge }
    }
}

/// Shoelace signed area; positive for counter-clockwise winding.
fn signed_area(vertices: &[Vec2]) -> f64 {
    let n = vertices.len();
    if n < 3 {
        return 0.0;
    }
    let mut acc = 0.0;
    for i in 0..n {
        let a = vertices[i];
        let b = vertices[(i + 1) % n];
        acc += a.cross(b);
    }
    acc * 0.5
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

    fn unit_square() -> Region {
        Region::new("sq", [1.0, 0.0, 0.0], square(0.0, 0.0, 1.0), 1).unwrap()
    }

    #[test]
    fn degenerate_polygons_are_discarded() {
        assert!(Region::new("line", [0.0; 3], vec![Vec2::zero(), Vec2::new(1.0, 0.0)], 0).is_none());
        let collinear = vec![Vec2::zero(), Vec2::new(1.0, 0.0), Vec2::new(2.0, 0.0)];
        assert!(Region::new("flat", [0.0; 3], collinear, 0).is_none());
    }

    #[test]
    fn cached_geometry_matches_square() {
        let sq = unit_square();
        assert!((sq.surface() - 4.0).abs() < 1e-12);
        assert!(sq.barycenter().distance(Vec2::zero()) < 1e-12);
        assert!((sq.bounding_radius_sq() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn point_in_polygon() {
        let sq = unit_square();
        assert!(sq.is_inside(Vec2::new(0.0, 0.0)));
        assert!(sq.is_inside(Vec2::new(0.99, -0.99)));
        assert!(!sq.is_inside(Vec2::new(1.01, 0.0)));
        assert!(!sq.is_inside(Vec2::new(5.0, 5.0)));
    }

    #[test]
    fn point_in_concave_polygon() {
        // L-shape: the notch at the top right is outside.
        let l = Region::new(
            "L",
            [0.0; 3],
            vec![
                Vec2::new(0.0, 0.0),
                Vec2::new(2.0, 0.0),
                Vec2::new(2.0, 1.0),
                Vec2::new(1.0, 1.0),
                Vec2::new(1.0, 2.0),
                Vec2::new(0.0, 2.0),
            ],
            0,
        )
        .unwrap();
        assert!(l.is_inside(Vec2::new(0.5, 1.5)));
        assert!(l.is_inside(Vec2::new(1.5, 0.5)));
        assert!(!l.is_inside(Vec2::new(1.5, 1.5)));
    }

    #[test]
    fn earliest_crossing_from_inside() {
        let sq = unit_square();
        // Heading right from the center, the right edge (index 1) is hit at
        // half the displacement.
        let hit = sq.first_crossing(Vec2::zero(), Vec2::new(2.0, 0.0), None).unwrap();
        assert!((hit.t - 0.5).abs() < 1e-12);
        assert_eq!(hit.edge, 1);
        assert_eq!(hit.crossing, CrossingDirection::InsideToOutside);
    }

    #[test]
    fn earliest_crossing_from_outside() {
        let sq = unit_square();
        let hit = sq.first_crossing(Vec2::new(-3.0, 0.0), Vec2::new(4.0, 0.0), None).unwrap();
        assert!((hit.t - 0.5).abs() < 1e-12);
        assert_eq!(hit.crossing, CrossingDirection::OutsideToInside);
    }

    #[test]
    fn no_crossing_when_contained() {
        let sq = unit_square();
        assert!(sq.first_crossing(Vec2::zero(), Vec2::new(0.3, 0.3), None).is_none());
        assert!(sq
            .first_crossing(Vec2::new(5.0, 5.0), Vec2::new(0.5, 0.0), None)
            .is_none());
    }

    #[test]
    fn avoided_edge_is_skipped() {
        let sq = unit_square();
        let r = Vec2::new(1.0, 0.0); // Exactly on the right edge.
        let dr = Vec2::new(-0.5, 0.0);
        // Without exclusion a grazing re-hit could be reported; with the
        // avoided edge, the segment back into the interior is crossing-free.
        assert!(sq.first_crossing(r, dr, Some(1)).is_none());
    }

    #[test]
    fn on_edge_start_is_classified_on() {
        let sq = unit_square();
        // Start on the left edge, heading out through the right edge is far;
        // heading out through the *left* edge from on it is excluded by the
        // open interval, so test heading inward across to the right edge.
        let hit = sq.first_crossing(Vec2::new(-1.0, 0.0), Vec2::new(2.5, 0.0), Some(3)).unwrap();
        assert_eq!(hit.edge, 1);
        assert_eq!(hit.crossing, CrossingDirection::InsideToOutside);
        // And a hit whose start lies on the struck edge itself:
        let hit = sq.first_crossing(Vec2::new(1.0, 0.0), Vec2::new(0.0001, 0.0), None);
        if let Some(h) = hit {
            assert_eq!(h.crossing.sense(), CrossingSense::Outward);
        }
    }

    #[test]
    fn transmission_keeps_residual_direction() {
        let sq = unit_square();
        let r = Vec2::zero();
        let dr = Vec2::new(2.0, 0.0);
        let hit = sq.first_crossing(r, dr, None).unwrap();
        let mut rng = KineticsRng::seeded(1);
        match sq.resolve_crossing(r, dr, &hit, 1.0, &mut rng) {
            BoundaryOutcome::Transmitted { pos, residual } => {
                assert!(pos.distance(Vec2::new(1.0, 0.0)) < 1e-12);
                assert!(residual.distance(Vec2::new(1.0, 0.0)) < 1e-12);
            }
            BoundaryOutcome::Reflected { .. } => panic!("p_cross = 1 must transmit"),
        }
    }

    #[test]
    fn reflection_is_specular_and_magnitude_preserving() {
        let sq = unit_square();
        let r = Vec2::new(0.5, 0.2);
        let dr = Vec2::new(1.0, 0.4);
        let hit = sq.first_crossing(r, dr, None).unwrap();
        let mut rng = KineticsRng::seeded(1);
        match sq.resolve_crossing(r, dr, &hit, 0.0, &mut rng) {
            BoundaryOutcome::Reflected { pos, residual, edge } => {
                assert_eq!(edge, 1);
                assert!((pos.x - 1.0).abs() < 1e-12);
                // The x component flips at a vertical edge, y is unchanged.
                let expected = Vec2::new(-(1.0 - hit.t) * dr.x, (1.0 - hit.t) * dr.y);
                assert!(residual.distance(expected) < 1e-12);
            }
            BoundaryOutcome::Transmitted { .. } => panic!("p_cross = 0 must reflect"),
        }
    }

    #[test]
    fn trapped_counter_is_saturating() {
        let dynamics = SpeciesDynamics::default();
        dynamics.note_released();
        assert_eq!(dynamics.trapped_count(), 0);
        dynamics.note_trapped();
        dynamics.note_trapped();
        assert_eq!(dynamics.trapped_count(), 2);
    }

    #[test]
    fn kon_selects_site_model() {
        let mut dynamics = SpeciesDynamics {
            sites_abundant: true,
            kon_abundant: 3.0,
            kon_not_abundant: 0.5,
            site_density: 10.0,
            ..Default::default()
        };
        assert!((dynamics.kon(4.0) - 3.0).abs() < 1e-12);
        dynamics.sites_abundant = false;
        // Two trapped particles over 4 um^2 consume 0.5 sites/um^2.
        dynamics.note_trapped();
        dynamics.note_trapped();
        assert!((dynamics.kon(4.0) - 0.5 * 9.5).abs() < 1e-12);
    }
}
