//! Error taxonomy for the solver.

use thiserror::Error;

use crate::solver::SolverPhase;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, LbmError>;

#[derive(Error, Debug)]
pub enum LbmError {
    /// Invalid lattice parameters or malformed configuration input.
    /// Always raised before any device resource is touched.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Adapter, device, buffer or pipeline could not be acquired.
    #[error("resource error: {0}")]
    Resource(String),

    /// A submitted dispatch or a readback failed on the device.
    #[error("device error: {0}")]
    Device(String),

    /// Operation attempted outside the phase that allows it.
    #[error("solver is {found:?}, expected {expected:?}")]
    InvalidState {
        expected: SolverPhase,
        found: SolverPhase,
    },
}

impl From<serde_json::Error> for LbmError {
    fn from(err: serde_json::Error) -> Self {
        LbmError::Configuration(format!("malformed settings: {err}"))
    }
}

impl From<std::io::Error> for LbmError {
    fn from(err: std::io::Error) -> Self {
        LbmError::Configuration(format!("settings file: {err}"))
    }
}
