// Headless lattice run with mass and flow diagnostics.
// Run with: cargo run --bin latticeflow_probe -- [latticeflow.json] [ticks]

use anyhow::Context;
use std::path::PathBuf;

use latticeflow::{ForceField, GpuContext, ObstacleMask, SimulationSettings, Solver};

const DEFAULT_TICKS: u64 = 600;
const REPORT_EVERY: u64 = 100;

struct Report {
    mass: f64,
    min_density: f32,
    max_density: f32,
    peak_speed: f32,
}

fn report(solver: &Solver) -> anyhow::Result<Report> {
    let density = solver.read_density()?;
    let velocity = solver.read_velocity()?;
    let (min_density, max_density) = density
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), p| {
            (lo.min(*p), hi.max(*p))
        });
    let peak_speed = velocity
        .iter()
        .map(|u| (u[0] * u[0] + u[1] * u[1]).sqrt())
        .fold(0.0f32, f32::max);
    Ok(Report {
        mass: solver.total_mass()?,
        min_density,
        max_density,
        peak_speed,
    })
}

fn main() -> anyhow::Result<()> {
    use env_logger::Env;
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let mut args = std::env::args().skip(1);
    let settings = match args.next() {
        Some(path) => {
            let path = PathBuf::from(path);
            SimulationSettings::load_from_disk(&path)
                .with_context(|| format!("loading {}", path.display()))?
        }
        None => SimulationSettings::default(),
    };
    let ticks = match args.next() {
        Some(raw) => raw
            .parse::<u64>()
            .with_context(|| format!("tick count must be a whole number, got {raw:?}"))?,
        None => DEFAULT_TICKS,
    };

    let ctx = GpuContext::new()?;
    let mut solver = Solver::new(ctx, settings.lattice())?;

    let mask = ObstacleMask::from_specs(
        settings.size,
        &settings.obstacles,
        settings.random_obstacles.as_ref(),
    );
    solver.set_boundary(mask.cells())?;
    let pulsed = ForceField::has_pulse(&settings.force_sources);
    let initial_force = ForceField::from_sources(settings.size, &settings.force_sources, 0.0);
    if !initial_force.is_zero() {
        solver.set_force(initial_force.cells())?;
    }

    let initial = report(&solver)?;
    log::info!(
        "tick 0: mass {:.6}, {} obstacle cells",
        initial.mass,
        mask.solid_count()
    );

    let dt = settings.time_step;
    let started = std::time::Instant::now();
    for tick in 1..=ticks {
        let sim_time = tick as f32 * dt;
        if pulsed {
            let force = ForceField::from_sources(settings.size, &settings.force_sources, sim_time);
            solver.set_force(force.cells())?;
        }
        solver.tick(dt, sim_time)?;

        if tick % REPORT_EVERY == 0 || tick == ticks {
            let r = report(&solver)?;
            log::info!(
                "tick {tick}: mass {:.6} (drift {:+.3e}), density [{:.5}, {:.5}], peak |u| {:.4}",
                r.mass,
                r.mass - initial.mass,
                r.min_density,
                r.max_density,
                r.peak_speed
            );
        }
    }

    let elapsed = started.elapsed().as_secs_f64();
    let cell_updates = ticks as f64 * settings.lattice().cell_count() as f64;
    log::info!(
        "{ticks} ticks in {elapsed:.2}s ({:.1} MLUPS)",
        cell_updates / elapsed.max(1e-9) / 1e6
    );

    solver.release();
    Ok(())
}
