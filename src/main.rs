use anyhow::Result;
use log::{error, info, trace, warn};
use std::fs::File;
use std::io::Write;
use std::time::Instant;

use fluorosim_common::{SimulationConfig, Snapshot, Vec2};
use fluorosim_engine::{take_snapshot, BiologicalWorld, DiffusionSubEngine};

fn main() -> Result<()> {
    env_logger::init();

    info!("Starting fluorophore kinetics engine...");

    let config = SimulationConfig::load("config.toml")?;

    let mut world = BiologicalWorld::from_config(&config)?;
    let mut engine = DiffusionSubEngine::from_config(&config.engine);
    info!(
        "World initialized: {} regions, {} species, {} particles; {} worker threads available.",
        world.regions().len(),
        world.species().len(),
        world.particles().len(),
        engine.nb_threads()
    );

    let dt = config.timing.dt_s;
    let total_steps = (config.timing.total_time_s / dt).ceil() as u32;
    let record_interval_s = config.timing.record_interval_s.max(0.0);
    let mut record_interval_steps = (record_interval_s / dt).max(1.0).round() as u32;
    if record_interval_steps == 0 {
        warn!(
            "Record interval ({:.4} s) is smaller than the timestep ({:.4} s). Recording every step.",
            record_interval_s, dt
        );
        record_interval_steps = 1;
    }
    info!(
        "Recording a snapshot every {} steps ({:.4} s).",
        record_interval_steps,
        record_interval_steps as f64 * dt
    );

    // Displacements are measured against the positions at t = 0.
    let baseline: Vec<Vec2> = world.particles().iter().map(|p| p.position()).collect();
    let mut snapshots: Vec<Snapshot> = Vec::new();
    snapshots.push(take_snapshot(&world, 0.0, &baseline, config.output.save_positions_in_snapshot));

    info!("Starting simulation loop for {} steps...", total_steps);
    let start_time = Instant::now();
    let mut previous_print_time = start_time;

    for step in 0..total_steps {
        let step_start_time = Instant::now();
        engine.update_system(&mut world, dt);
        let step_duration = step_start_time.elapsed();

        let current_time = Instant::now();
        let should_print_status =
            current_time.duration_since(previous_print_time).as_secs_f64() >= 5.0;
        let is_record_step = (step + 1) % record_interval_steps == 0;
        let is_last_step = step == total_steps - 1;

        if should_print_status || is_record_step || is_last_step {
            let current_sim_time = (step + 1) as f64 * dt;
            info!(
                "Step [{}/{}] ({:.4} s) | Particles: {} | Visible: {} | Step Time: {:6.2} ms | Elapsed: {:.2} s",
                step + 1,
                total_steps,
                current_sim_time,
                world.particles().len(),
                world.visible_count(),
                step_duration.as_secs_f64() * 1000.0,
                start_time.elapsed().as_secs_f64()
            );
            previous_print_time = current_time;

            if is_record_step || is_last_step {
                snapshots.push(take_snapshot(
                    &world,
                    current_sim_time,
                    &baseline,
                    config.output.save_positions_in_snapshot,
                ));
            }
        } else {
            trace!(
                "Step [{}/{}] completed in {:.2} ms",
                step + 1,
                total_steps,
                step_duration.as_secs_f64() * 1000.0
            );
        }
    }

    let total_duration = start_time.elapsed();
    info!(
        "Simulation finished in {:.3} seconds ({:.3} minutes).",
        total_duration.as_secs_f64(),
        total_duration.as_secs_f64() / 60.0
    );

    if config.output.save_stats {
        save_snapshots(&config, &snapshots);
    } else {
        info!("Skipping saving snapshots as per config (save_stats is false).");
    }

    if config.output.save_positions {
        let filename = format!("{}_final_positions.csv", config.output.base_filename);
        match csv::Writer::from_path(&filename) {
            Ok(mut writer) => {
                writer.write_record(["x_um", "y_um"])?;
                for (x, y) in world.positions() {
                    writer.write_record(&[format!("{:.4}", x), format!("{:.4}", y)])?;
                }
                writer.flush()?;
                info!("Final positions saved to {}", filename);
            }
            Err(e) => error!("Error saving CSV file '{}': {}", filename, e),
        }
    } else {
        info!("Skipping saving final positions as per config.");
    }

    info!("Simulation Complete.");
    Ok(())
}

/// Writes the recorded snapshots in the configured serialization format.
fn save_snapshots(config: &SimulationConfig, snapshots: &[Snapshot]) {
    let output_format = config.output.format.as_deref().unwrap_or("json");
    match output_format {
        "bincode" => {
            let filename = format!("{}_snapshots.bin", config.output.base_filename);
            match File::create(&filename) {
                Ok(file) => match bincode::serialize_into(file, snapshots) {
                    Ok(_) => info!("All snapshots saved to {} (binary format)", filename),
                    Err(e) => error!("Error serializing snapshots to bincode: {}", e),
                },
                Err(e) => error!("Error creating snapshot file '{}': {}", filename, e),
            }
        }
        "messagepack" => {
            let filename = format!("{}_snapshots.msgpack", config.output.base_filename);
            match &mut File::create(&filename) {
                Ok(file) => match rmp_serde::encode::write(file, snapshots) {
                    Ok(_) => info!("All snapshots saved to {} (MessagePack format)", filename),
                    Err(e) => error!("Error serializing snapshots to MessagePack: {}", e),
                },
                Err(e) => error!("Error creating snapshot file '{}': {}", filename, e),
            }
        }
        other => {
            if other != "json" {
                error!("Unknown output format: {}. Using JSON instead.", other);
            }
            let filename = format!("{}_snapshots.json", config.output.base_filename);
            match File::create(&filename) {
                Ok(mut file) => match serde_json::to_string(snapshots) {
                    Ok(json_string) => {
                        if let Err(e) = file.write_all(json_string.as_bytes()) {
                            error!("Error writing snapshot JSON to file '{}': {}", filename, e);
                        } else {
                            info!(
                                "All snapshots saved to {} ({} bytes)",
                                filename,
                                json_string.len()
                            );
                        }
                    }
                    Err(e) => error!("Error serializing snapshots to JSON: {}", e),
                },
                Err(e) => error!("Error creating snapshot file '{}': {}", filename, e),
            }
        }
    }
}
