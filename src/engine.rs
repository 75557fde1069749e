use crate::particle::StepContext;
use crate::rng::KineticsRng;
use crate::world::BiologicalWorld;
use fluorosim_common::{EngineConfig, EngineModeConfig};
use log::{debug, info};
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

/// Seed perturbation separating the engine's worker streams from the world's
/// host stream when both derive from the same configured seed.
const WORKER_SEED_SALT: u64 = 0xD1FF_051A;

/// Threading strategy of the stepping engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineMode {
    SingleThreaded,
    MultiThreaded,
    /// Benchmarks both paths over a rolling window, then locks the faster.
    Automatic,
}

impl From<EngineModeConfig> for EngineMode {
    fn from(cfg: EngineModeConfig) -> Self {
        match cfg {
            EngineModeConfig::Single => EngineMode::SingleThreaded,
            EngineModeConfig::Multi => EngineMode::MultiThreaded,
            EngineModeConfig::Automatic => EngineMode::Automatic,
        }
    }
}

/// Steps the whole particle population forward in time.
///
/// The multi-threaded path splits the population into one contiguous slice
/// per worker, each stepped under a fork-joined scoped thread with its own
/// RNG stream. Region state shared across workers is read-only except for
/// the relaxed occupancy counters.
pub struct DiffusionSubEngine {
    mode: EngineMode,
    nb_threads: usize,
    worker_rngs: Vec<KineticsRng>,
    bench_window: u32,
    single_samples: u32,
    single_total: Duration,
    multi_samples: u32,
    multi_total: Duration,
    /// Mode locked by the automatic benchmark, once both windows are full.
    locked: Option<EngineMode>,
}

impl DiffusionSubEngine {
    pub fn new(mode: EngineMode, seed: u64, bench_window: u32) -> Self {
        let nb_threads = std::thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1);
        let base = KineticsRng::seeded(seed ^ WORKER_SEED_SALT);
        let worker_rngs = (0..nb_threads as u64).map(|i| base.fork(i)).collect();
        debug!("Diffusion engine ready: mode {:?}, {} worker threads.", mode, nb_threads);
        DiffusionSubEngine {
            mode,
            nb_threads,
            worker_rngs,
            bench_window: bench_window.max(1),
            single_samples: 0,
            single_total: Duration::ZERO,
            multi_samples: 0,
            multi_total: Duration::ZERO,
            locked: None,
        }
    }

    pub fn from_config(cfg: &EngineConfig) -> Self {
        DiffusionSubEngine::new(EngineMode::from(cfg.mode), cfg.seed, cfg.bench_window_steps)
    }

    pub fn nb_threads(&self) -> usize {
        self.nb_threads
    }

    /// The configured mode (not the benchmark's resolution of Automatic).
    pub fn mode(&self) -> EngineMode {
        self.mode
    }

    /// The mode the next step will actually run in, or None while the
    /// automatic benchmark is still sampling.
    pub fn selected_mode(&self) -> Option<EngineMode> {
        match self.mode {
            EngineMode::Automatic => self.locked,
            other => Some(other),
        }
    }

    pub fn average_single_step(&self) -> Option<Duration> {
        (self.single_samples > 0).then(|| self.single_total / self.single_samples)
    }

    pub fn average_multi_step(&self) -> Option<Duration> {
        (self.multi_samples > 0).then(|| self.multi_total / self.multi_samples)
    }

    /// Switches mode and restarts the automatic benchmark from scratch.
    pub fn update_selected_mode(&mut self, mode: EngineMode) {
        self.mode = mode;
        self.locked = None;
        self.single_samples = 0;
        self.single_total = Duration::ZERO;
        self.multi_samples = 0;
        self.multi_total = Duration::ZERO;
    }

    /// Advances the world by one step of `dt` seconds.
    pub fn update_system(&mut self, world: &mut BiologicalWorld, dt: f64) {
        match self.mode {
            EngineMode::SingleThreaded => self.step_single(world, dt),
            EngineMode::MultiThreaded => self.step_multi(world, dt),
            EngineMode::Automatic => self.step_automatic(world, dt),
        }
    }

    fn step_single(&mut self, world: &mut BiologicalWorld, dt: f64) {
        world.step_serial(dt);
    }

    fn step_multi(&mut self, world: &mut BiologicalWorld, dt: f64) {
        let (particles, regions, fluorophores, _host_rng, fixed) = world.split_step();
        if particles.is_empty() {
            return;
        }
        let ctx = StepContext { regions, fluorophores, dt, fixed };
        let chunk = particles.len().div_ceil(self.nb_threads).max(1);
        // Fork-join: workers are created and joined every step, so region or
        // population mutations between steps never race with a stepping
        // thread.
        std::thread::scope(|scope| {
            for (slice, rng) in particles.chunks_mut(chunk).zip(self.worker_rngs.iter_mut()) {
                scope.spawn(move || {
                    for particle in slice {
                        particle.step(&ctx, rng);
                    }
                });
            }
        });
    }

    /// Samples each path for a window of steps, then locks the faster one.
    fn step_automatic(&mut self, world: &mut BiologicalWorld, dt: f64) {
        if let Some(locked) = self.locked {
            match locked {
                EngineMode::SingleThreaded => self.step_single(world, dt),
                _ => self.step_multi(world, dt),
            }
            return;
        }
        if self.single_samples < self.bench_window {
            let start = Instant::now();
            self.step_single(world, dt);
            self.single_total += start.elapsed();
            self.single_samples += 1;
            return;
        }
        if self.multi_samples < self.bench_window {
            let start = Instant::now();
            self.step_multi(world, dt);
            self.multi_total += start.elapsed();
            self.multi_samples += 1;
            if self.multi_samples < self.bench_window {
                return;
            }
        }
        let single_avg = self.single_total / self.single_samples.max(1);
        let multi_avg = self.multi_total / self.multi_samples.max(1);
        let winner = if multi_avg < single_avg {
            EngineMode::MultiThreaded
        } else {
            EngineMode::SingleThreaded
        };
        info!(
            "Automatic mode locked to {:?} (single avg {:?}, multi avg {:?}).",
            winner, single_avg, multi_avg
        );
        self.locked = Some(winner);
    }
}
