use fluorosim_common::{SimulationConfig, Vec2};
use fluorosim_engine::{
    BiologicalWorld, ChemicalSpecies, DiffusionSubEngine, EngineMode, FluorophoreSpecies,
};

fn square(cx: f64, cy: f64, half: f64) -> Vec<Vec2> {
    vec![
        Vec2::new(cx - half, cy - half),
        Vec2::new(cx + half, cy - half),
        Vec2::new(cx + half, cy + half),
        Vec2::new(cx - half, cy + half),
    ]
}

fn base_world(seed: u64) -> BiologicalWorld {
    let mut world = BiologicalWorld::new(seed);
    world.add_species(ChemicalSpecies::new("tracer", [0.0, 1.0, 0.0], 0.0));
    world.add_fluorophore(FluorophoreSpecies::new("egfp", 0.0, 0.0));
    world.add_region("cell", [0.5, 0.5, 0.5], square(0.0, 0.0, 10.0)).unwrap();
    world
}

#[test]
fn fixation_halts_motion_but_photophysics_continues() {
    let mut world = base_world(301);
    world.delete_fluorophore(0);
    // Certain blink-off within one step at this rate.
    world.add_fluorophore(FluorophoreSpecies::new("fast", 1000.0, 0.0));
    world.set_d(0, 0, 10.0);
    world.add_particles(50, 0, 0, &[], 0, 0, false);
    world.set_fixation(true);

    let before: Vec<Vec2> = world.particles().iter().map(|p| p.position()).collect();
    let mut engine = DiffusionSubEngine::new(EngineMode::SingleThreaded, 301, 8);
    for _ in 0..20 {
        engine.update_system(&mut world, 0.01);
    }
    for (p, b) in world.particles().iter().zip(&before) {
        assert_eq!(p.position(), *b);
    }
    assert_eq!(world.visible_count(), 0);

    // Unfixing resumes diffusion.
    world.set_fixation(false);
    engine.update_system(&mut world, 0.01);
    let moved = world
        .particles()
        .iter()
        .zip(&before)
        .filter(|(p, b)| p.position() != **b)
        .count();
    assert!(moved > 40);
}

#[test]
fn immobile_fraction_redraw_applies_to_population() {
    let mut world = base_world(303);
    world.add_particles(600, 0, 0, &[], 0, 0, false);
    assert!(world.particles().iter().all(|p| !p.is_immobile()));

    assert!(world.set_immobile_fraction(0, 0.5));
    let immobile = world.particles().iter().filter(|p| p.is_immobile()).count();
    // Binomial(600, 0.5): anything outside this band is a broken redraw.
    assert!((200..=400).contains(&immobile), "immobile = {immobile}");

    // Same value again is a no-op, so the draw stays put.
    assert!(!world.set_immobile_fraction(0, 0.5));
    let again = world.particles().iter().filter(|p| p.is_immobile()).count();
    assert_eq!(immobile, again);

    assert!(world.set_immobile_fraction(0, 0.0));
    assert!(world.particles().iter().all(|p| !p.is_immobile()));
}

#[test]
fn species_deletion_removes_its_population() {
    let mut world = base_world(305);
    let other = world.add_species(ChemicalSpecies::new("bulk", [0.0; 3], 0.0));
    world.add_particles(40, 0, 0, &[], 0, 0, false);
    world.add_particles(25, 0, 0, &[], other, 0, false);
    assert_eq!(world.particles().len(), 65);

    world.delete_species(0);
    assert_eq!(world.particles().len(), 25);
    assert_eq!(world.species().len(), 1);
    // The survivors now reference the shifted handle.
    assert!(world.particles().iter().all(|p| p.species() == 0));
    assert_eq!(world.regions()[0].species_slots(), 1);
}

#[test]
fn compartment_unflag_evicts_bound_particles() {
    let mut world = base_world(307);
    let pit = world.add_region("pit", [0.0; 3], square(0.0, 0.0, 2.0)).unwrap();
    world.set_compartment(pit, 0, true);
    world.set_trapping_enabled(pit, 0, true);
    world.add_particles(30, 0, pit, &[], 0, 0, true);
    assert_eq!(world.trapped_count(), 30);

    world.set_compartment(pit, 0, false);
    assert_eq!(world.trapped_count(), 0);
    assert!(world.particles().iter().all(|p| p.child() == p.mother()));
    assert_eq!(world.regions()[pit].dynamics(0).unwrap().trapped_count(), 0);
}

#[test]
fn world_builds_from_config_file() {
    let toml = r#"
[timing]
dt_s = 0.001
total_time_s = 1.0
record_interval_s = 0.1

[engine]
mode = "automatic"
seed = 7

[[species]]
name = "tracer"
color = [0.0, 1.0, 0.0]
immobile_fraction = 0.0

[[fluorophores]]
name = "egfp"
blink_off_per_s = 0.5
blink_on_per_s = 2.0

[[regions]]
name = "cell"
color = [0.5, 0.5, 0.5]
vertices = [[-10.0, -10.0], [10.0, -10.0], [10.0, 10.0], [-10.0, 10.0]]

[[regions.dynamics]]
species = "tracer"
is_compartment = false
d_free = 1.5
d_trapped = 0.0
trapping_enabled = false
sites_abundant = true
kon_abundant = 0.0
kon_not_abundant = 0.0
koff = 0.0
site_density = 0.0

[[placements]]
count = 120
species = "tracer"
fluorophore = "egfp"
mother_region = "cell"

[output]
base_filename = "out/run"
save_positions = false
save_stats = true
save_positions_in_snapshot = false
"#;
    let path = std::env::temp_dir().join("fluorosim_world_test_config.toml");
    std::fs::write(&path, toml).unwrap();
    let config = SimulationConfig::load(path.to_str().unwrap()).unwrap();
    let world = BiologicalWorld::from_config(&config).unwrap();
    assert_eq!(world.regions().len(), 1);
    assert_eq!(world.particles().len(), 120);
    assert!(
        (world.regions()[0].dynamics(0).unwrap().d_free - 1.5).abs() < 1e-12
    );
    assert!(world.particles().iter().all(|p| world.regions()[0].is_inside(p.position())));
    std::fs::remove_file(&path).ok();
}
