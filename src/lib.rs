//! GPU-resident D2Q9 Lattice Boltzmann solver.
//!
//! The solver owns a double-buffered distribution field plus boundary,
//! force, velocity and density fields, all in `wgpu` storage buffers. Each
//! [`Solver::tick`] runs streaming, macroscopic reduction and BGK collision
//! as three ordered compute passes; the density buffer exposed by
//! [`Solver::bind_outputs`] is then ready for rendering.

pub mod config;
pub mod error;
pub mod fields;
pub mod gpu;
pub mod kernels;
pub mod lattice;
pub mod obstacles;
pub mod solver;

pub use config::{BoundaryPolicy, EdgePolicy, InitialState, LatticeConfig, SimulationSettings};
pub use error::{LbmError, Result};
pub use gpu::GpuContext;
pub use obstacles::{ForceField, ForceSource, ObstacleMask, ObstacleSpec, RandomObstacles};
pub use solver::{OutputBindings, Solver, SolverPhase};
