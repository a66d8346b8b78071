// ============================================================================
// SOLVER ORCHESTRATOR
// ============================================================================
//
// Owns every field buffer and pipeline. A tick encodes streaming, reduction
// and collision as three compute passes in one command buffer; each pass
// boundary is the barrier that makes the previous stage's writes visible.
// Buffer role swaps happen on the host between encoding passes.

use crate::config::{InitialState, LatticeConfig};
use crate::error::{LbmError, Result};
use crate::fields::{FieldKind, FieldStorage};
use crate::gpu::GpuContext;
use crate::kernels::{CollideParams, FillPattern, Kernels, MacroParams, StreamParams};

/// Reference density of the initial state.
const REFERENCE_DENSITY: f32 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverPhase {
    Uninitialized,
    Ready,
    Streaming,
    Reducing,
    Colliding,
    /// A dispatch failed; the distributions may hold a half-written generation.
    Failed,
    Released,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Stream,
    Reduce,
    Collide,
}

/// Buffers a renderer may sample after a completed tick.
pub struct OutputBindings<'a> {
    pub size: u32,
    pub density: &'a wgpu::Buffer,
    pub velocity: &'a wgpu::Buffer,
    pub boundary: &'a wgpu::Buffer,
}

pub struct Solver {
    ctx: GpuContext,
    config: LatticeConfig,
    fields: FieldStorage,
    kernels: Kernels,
    phase: SolverPhase,
    generation: u64,
    sim_time: f32,
}

impl Solver {
    pub fn new(ctx: GpuContext, config: LatticeConfig) -> Result<Self> {
        config.validate()?;

        let fields = FieldStorage::allocate(&ctx, &config)?;
        let kernels = Kernels::new(&ctx, &fields)?;

        let mut solver = Self {
            ctx,
            config,
            fields,
            kernels,
            phase: SolverPhase::Uninitialized,
            generation: 0,
            sim_time: 0.0,
        };
        solver.initialize().map_err(|e| match e {
            LbmError::Device(msg) => LbmError::Resource(format!("initial fill: {msg}")),
            other => other,
        })?;
        solver.phase = SolverPhase::Ready;

        log::info!(
            "Lattice ready: {n}x{n}, dx = {}, tau = {}, edges {:?}, boundary {:?}",
            config.dx,
            config.tau,
            config.edge,
            config.boundary,
            n = config.size,
        );
        Ok(solver)
    }

    fn initialize(&mut self) -> Result<()> {
        self.fill(FieldKind::Boundary, FillPattern::Constant(0.0))?;
        self.fill(FieldKind::Force, FillPattern::Constant(0.0))?;
        self.fill_flow_state()
    }

    /// Distributions back to the initial state, moments to rest.
    fn fill_flow_state(&mut self) -> Result<()> {
        let initial = match self.config.initial_state {
            InitialState::Isotropic => FillPattern::Isotropic(REFERENCE_DENSITY),
            InitialState::Equilibrium => FillPattern::Equilibrium(REFERENCE_DENSITY),
        };
        self.fill(FieldKind::ScratchDistributions, FillPattern::Constant(0.0))?;
        self.fill(FieldKind::CurrentDistributions, initial)?;
        self.fill(FieldKind::Velocity, FillPattern::Constant(0.0))?;
        self.fill(FieldKind::Density, FillPattern::Constant(REFERENCE_DENSITY))
    }

    pub(crate) fn fill(&self, target: FieldKind, pattern: FillPattern) -> Result<()> {
        self.kernels.fill(&self.ctx, &self.fields, target, pattern)
    }

    fn expect_phase(&self, expected: SolverPhase) -> Result<()> {
        if self.phase != expected {
            log::warn!("Solver is {:?}, expected {:?}", self.phase, expected);
            return Err(LbmError::InvalidState {
                expected,
                found: self.phase,
            });
        }
        Ok(())
    }

    pub fn config(&self) -> &LatticeConfig {
        &self.config
    }

    pub fn phase(&self) -> SolverPhase {
        self.phase
    }

    /// Completed ticks since construction or the last reset.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn sim_time(&self) -> f32 {
        self.sim_time
    }

    /// Advances one generation: stream, swap, reduce, collide, swap.
    pub fn tick(&mut self, dt: f32, sim_time: f32) -> Result<()> {
        self.run_stages(dt, &[Stage::Stream, Stage::Reduce, Stage::Collide])?;
        self.generation += 1;
        self.sim_time = sim_time;
        log::trace!("Tick {} done at t = {sim_time}", self.generation);
        Ok(())
    }

    fn run_stages(&mut self, dt: f32, stages: &[Stage]) -> Result<()> {
        self.expect_phase(SolverPhase::Ready)?;
        if !(dt.is_finite() && dt > 0.0) {
            return Err(LbmError::Configuration(format!(
                "time step must be positive, got {dt}"
            )));
        }

        let n = self.config.size;
        let c = self.config.lattice_speed(dt);
        let tau = self.config.tau;
        let queue = &self.ctx.queue;
        self.kernels.write_stream_params(
            queue,
            StreamParams {
                n,
                edge_policy: self.config.edge.shader_code(),
                boundary_policy: self.config.boundary.shader_code(),
                _pad: 0,
            },
        );
        self.kernels.write_macro_params(
            queue,
            MacroParams {
                n,
                c,
                tau,
                velocity_limit: self.config.velocity_limit.unwrap_or(0.0),
            },
        );
        self.kernels
            .write_collide_params(queue, CollideParams { n, c, tau, _pad: 0 });

        let device = &self.ctx.device;
        device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Lattice Tick"),
        });
        for stage in stages {
            match stage {
                Stage::Stream => {
                    self.phase = SolverPhase::Streaming;
                    self.kernels.encode_stream(&mut encoder, &self.fields);
                    self.fields.distributions.swap();
                }
                Stage::Reduce => {
                    self.phase = SolverPhase::Reducing;
                    self.kernels.encode_reduce(&mut encoder, &self.fields);
                }
                Stage::Collide => {
                    self.phase = SolverPhase::Colliding;
                    self.kernels.encode_collide(&mut encoder, &self.fields);
                    self.fields.distributions.swap();
                }
            }
        }
        self.ctx.queue.submit(std::iter::once(encoder.finish()));

        let validation = pollster::block_on(device.pop_error_scope());
        let out_of_memory = pollster::block_on(device.pop_error_scope());
        if let Some(err) = validation.or(out_of_memory) {
            // Errors surface per submission, not per pass.
            self.phase = SolverPhase::Failed;
            log::warn!("Dispatch of {stages:?} failed: {err}");
            return Err(LbmError::Device(format!(
                "dispatch of {stages:?} failed: {err}"
            )));
        }

        self.phase = SolverPhase::Ready;
        Ok(())
    }

    /// Density, velocity and boundary buffers for the renderer.
    pub fn bind_outputs(&self) -> Result<OutputBindings<'_>> {
        self.expect_phase(SolverPhase::Ready)?;
        Ok(OutputBindings {
            size: self.config.size,
            density: &self.fields.density,
            velocity: &self.fields.velocity,
            boundary: &self.fields.boundary,
        })
    }

    /// Reinitializes the distributions, keeping obstacles and forcing.
    pub fn reset(&mut self) -> Result<()> {
        self.expect_phase(SolverPhase::Ready)?;
        if let Err(e) = self.fill_flow_state() {
            self.phase = SolverPhase::Failed;
            log::warn!("Reset failed: {e}");
            return Err(e);
        }
        self.generation = 0;
        self.sim_time = 0.0;
        log::debug!("Lattice reset");
        Ok(())
    }

    /// Replaces the obstacle mask (`0.0` fluid, non-zero obstacle).
    pub fn set_boundary(&mut self, mask: &[f32]) -> Result<()> {
        self.expect_phase(SolverPhase::Ready)?;
        self.fields.upload(&self.ctx.queue, FieldKind::Boundary, mask)
    }

    /// Replaces the external body force field.
    pub fn set_force(&mut self, force: &[[f32; 2]]) -> Result<()> {
        self.expect_phase(SolverPhase::Ready)?;
        self.fields.upload(&self.ctx.queue, FieldKind::Force, force)
    }

    /// Overwrites the current distribution buffer, `(y*N + x)*9 + i` order.
    pub fn load_distributions(&mut self, populations: &[f32]) -> Result<()> {
        self.expect_phase(SolverPhase::Ready)?;
        self.fields
            .upload(&self.ctx.queue, FieldKind::CurrentDistributions, populations)
    }

    fn expect_live(&self) -> Result<()> {
        if self.phase == SolverPhase::Released {
            return Err(LbmError::InvalidState {
                expected: SolverPhase::Ready,
                found: self.phase,
            });
        }
        Ok(())
    }

    pub fn read_density(&self) -> Result<Vec<f32>> {
        self.expect_live()?;
        self.fields.read(&self.ctx, FieldKind::Density)
    }

    pub fn read_velocity(&self) -> Result<Vec<[f32; 2]>> {
        self.expect_live()?;
        self.fields.read(&self.ctx, FieldKind::Velocity)
    }

    pub fn read_distributions(&self) -> Result<Vec<f32>> {
        self.expect_live()?;
        self.fields.read(&self.ctx, FieldKind::CurrentDistributions)
    }

    #[cfg(test)]
    pub(crate) fn read_field(&self, kind: FieldKind) -> Result<Vec<f32>> {
        self.expect_live()?;
        self.fields.read(&self.ctx, kind)
    }

    /// Sum of every population in the current buffer.
    pub fn total_mass(&self) -> Result<f64> {
        Ok(self
            .read_distributions()?
            .iter()
            .map(|f| *f as f64)
            .sum())
    }

    /// Releases all device resources. Idempotent; also run on drop.
    pub fn release(&mut self) {
        if self.phase == SolverPhase::Released {
            return;
        }
        self.ctx.device.poll(wgpu::Maintain::Wait);
        self.kernels.release();
        self.fields.release();
        self.phase = SolverPhase::Released;
        log::debug!("Solver released after {} ticks", self.generation);
    }
}

impl Drop for Solver {
    fn drop(&mut self) {
        self.release();
    }
}
