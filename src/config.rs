// ============================================================================
// CONFIGURATION
// ============================================================================

use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::error::{LbmError, Result};
use crate::obstacles::{ForceSource, ObstacleSpec, RandomObstacles};

pub const SETTINGS_FILE_NAME: &str = "latticeflow.json";

/// How streaming resolves an upstream cell that falls outside the domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EdgePolicy {
    /// Source from the nearest valid cell.
    #[default]
    Clamp,
    /// Wrap to the opposite edge.
    Periodic,
    /// Outside the domain counts as obstacle.
    Wall,
}

impl EdgePolicy {
    pub(crate) fn shader_code(self) -> u32 {
        match self {
            EdgePolicy::Clamp => 0,
            EdgePolicy::Periodic => 1,
            EdgePolicy::Wall => 2,
        }
    }
}

/// Reflection rule for populations whose upstream cell is an obstacle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BoundaryPolicy {
    /// Full bounce-back: the opposite population of the same cell.
    #[default]
    BounceBack,
    /// Specular reflection at straight walls, bounce-back at corners.
    FreeSlip,
}

impl BoundaryPolicy {
    pub(crate) fn shader_code(self) -> u32 {
        match self {
            BoundaryPolicy::BounceBack => 0,
            BoundaryPolicy::FreeSlip => 1,
        }
    }
}

/// Distribution written into the current buffer at construction and reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InitialState {
    /// f_i = 1/9 in every direction.
    #[default]
    Isotropic,
    /// f_i = w_i, the rest equilibrium.
    Equilibrium,
}

/// Immutable lattice parameters for one solver lifetime.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatticeConfig {
    /// Side length N in cells.
    pub size: u32,
    /// Physical cell spacing.
    pub dx: f32,
    /// BGK relaxation time.
    pub tau: f32,
    pub edge: EdgePolicy,
    pub boundary: BoundaryPolicy,
    /// Cap on |u| after reduction; `None` leaves velocity unbounded.
    pub velocity_limit: Option<f32>,
    pub initial_state: InitialState,
}

impl LatticeConfig {
    pub fn new(size: u32, dx: f32, tau: f32) -> Self {
        Self {
            size,
            dx,
            tau,
            edge: EdgePolicy::default(),
            boundary: BoundaryPolicy::default(),
            velocity_limit: None,
            initial_state: InitialState::default(),
        }
    }

    pub fn with_edge(mut self, edge: EdgePolicy) -> Self {
        self.edge = edge;
        self
    }

    pub fn with_boundary(mut self, boundary: BoundaryPolicy) -> Self {
        self.boundary = boundary;
        self
    }

    pub fn with_velocity_limit(mut self, limit: Option<f32>) -> Self {
        self.velocity_limit = limit;
        self
    }

    pub fn with_initial_state(mut self, initial_state: InitialState) -> Self {
        self.initial_state = initial_state;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.size == 0 {
            return Err(LbmError::Configuration(
                "domain size must be a positive number of cells".into(),
            ));
        }
        if !(self.dx.is_finite() && self.dx > 0.0) {
            return Err(LbmError::Configuration(format!(
                "cell spacing must be positive, got {}",
                self.dx
            )));
        }
        if !(self.tau.is_finite() && self.tau > 0.0) {
            return Err(LbmError::Configuration(format!(
                "relaxation time must be positive, got {}",
                self.tau
            )));
        }
        if let Some(limit) = self.velocity_limit {
            if !(limit.is_finite() && limit > 0.0) {
                return Err(LbmError::Configuration(format!(
                    "velocity limit must be positive, got {limit}"
                )));
            }
        }
        Ok(())
    }

    pub fn cell_count(&self) -> usize {
        self.size as usize * self.size as usize
    }

    /// Lattice speed c = dx/dt.
    pub fn lattice_speed(&self, dt: f32) -> f32 {
        self.dx / dt
    }
}

fn default_time_step() -> f32 {
    1.0 / 60.0
}

/// On-disk settings. `size`, `dx` and `relaxationTime` are required.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationSettings {
    pub size: u32,
    pub dx: f32,
    pub relaxation_time: f32,
    #[serde(default)]
    pub edge_policy: EdgePolicy,
    #[serde(default)]
    pub boundary_policy: BoundaryPolicy,
    #[serde(default)]
    pub velocity_limit: Option<f32>,
    #[serde(default)]
    pub initial_state: InitialState,
    #[serde(default = "default_time_step")]
    pub time_step: f32,
    #[serde(default)]
    pub obstacles: Vec<ObstacleSpec>,
    #[serde(default)]
    pub random_obstacles: Option<RandomObstacles>,
    #[serde(default)]
    pub force_sources: Vec<ForceSource>,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            size: 128,
            dx: 1.0,
            relaxation_time: 0.8,
            edge_policy: EdgePolicy::Wall,
            boundary_policy: BoundaryPolicy::BounceBack,
            velocity_limit: Some(10.0),
            initial_state: InitialState::Isotropic,
            time_step: default_time_step(),
            obstacles: Vec::new(),
            random_obstacles: None,
            force_sources: Vec::new(),
        }
    }
}

impl SimulationSettings {
    pub fn default_path() -> PathBuf {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(SETTINGS_FILE_NAME)
    }

    pub fn from_json(data: &str) -> Result<Self> {
        let settings: Self = serde_json::from_str(data)?;
        settings.lattice().validate()?;
        if !(settings.time_step.is_finite() && settings.time_step > 0.0) {
            return Err(LbmError::Configuration(format!(
                "time step must be positive, got {}",
                settings.time_step
            )));
        }
        Ok(settings)
    }

    pub fn load_from_disk(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)?;
        Self::from_json(&data)
    }

    pub fn save_to_disk(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn lattice(&self) -> LatticeConfig {
        LatticeConfig::new(self.size, self.dx, self.relaxation_time)
            .with_edge(self.edge_policy)
            .with_boundary(self.boundary_policy)
            .with_velocity_limit(self.velocity_limit)
            .with_initial_state(self.initial_state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_degenerate_lattices() {
        assert!(LatticeConfig::new(0, 1.0, 1.0).validate().is_err());
        assert!(LatticeConfig::new(4, 0.0, 1.0).validate().is_err());
        assert!(LatticeConfig::new(4, -1.0, 1.0).validate().is_err());
        assert!(LatticeConfig::new(4, 1.0, 0.0).validate().is_err());
        assert!(LatticeConfig::new(4, 1.0, f32::NAN).validate().is_err());
        assert!(LatticeConfig::new(4, 1.0, 1.0)
            .with_velocity_limit(Some(0.0))
            .validate()
            .is_err());
        assert!(LatticeConfig::new(4, 1.0, 1.0).validate().is_ok());
    }

    #[test]
    fn configuration_errors_are_typed() {
        match LatticeConfig::new(4, 1.0, -0.5).validate() {
            Err(LbmError::Configuration(msg)) => assert!(msg.contains("relaxation")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parses_minimal_settings() {
        let settings =
            SimulationSettings::from_json(r#"{ "size": 64, "dx": 0.5, "relaxationTime": 0.9 }"#)
                .unwrap();
        assert_eq!(settings.size, 64);
        assert_eq!(settings.edge_policy, EdgePolicy::Clamp);
        assert_eq!(settings.boundary_policy, BoundaryPolicy::BounceBack);
        assert!((settings.time_step - 1.0 / 60.0).abs() < 1e-9);
        let lattice = settings.lattice();
        assert_eq!(lattice.size, 64);
        assert_eq!(lattice.tau, 0.9);
    }

    #[test]
    fn parses_policies() {
        let settings = SimulationSettings::from_json(
            r#"{ "size": 8, "dx": 1.0, "relaxationTime": 1.0,
                 "edgePolicy": "periodic", "boundaryPolicy": "freeSlip",
                 "initialState": "equilibrium", "velocityLimit": 2.5 }"#,
        )
        .unwrap();
        let lattice = settings.lattice();
        assert_eq!(lattice.edge, EdgePolicy::Periodic);
        assert_eq!(lattice.boundary, BoundaryPolicy::FreeSlip);
        assert_eq!(lattice.initial_state, InitialState::Equilibrium);
        assert_eq!(lattice.velocity_limit, Some(2.5));
    }

    #[test]
    fn missing_fields_are_configuration_errors() {
        let err = SimulationSettings::from_json(r#"{ "size": 8, "dx": 1.0 }"#).unwrap_err();
        assert!(matches!(err, LbmError::Configuration(_)));

        let err = SimulationSettings::from_json(r#"{ "size": 8, "dx": 1.0, "relaxationTime": 0 }"#)
            .unwrap_err();
        assert!(matches!(err, LbmError::Configuration(_)));

        let err = SimulationSettings::from_json(r#"{ "size": -3, "dx": 1.0, "relaxationTime": 1 }"#)
            .unwrap_err();
        assert!(matches!(err, LbmError::Configuration(_)));
    }

    #[test]
    fn settings_survive_disk() {
        let dir = std::env::temp_dir().join(format!("latticeflow-cfg-{}", std::process::id()));
        let path = dir.join(SETTINGS_FILE_NAME);
        let settings = SimulationSettings::default();
        settings.save_to_disk(&path).unwrap();
        let loaded = SimulationSettings::load_from_disk(&path).unwrap();
        assert_eq!(loaded, settings);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn lattice_speed_is_dx_over_dt() {
        let cfg = LatticeConfig::new(4, 2.0, 1.0);
        assert!((cfg.lattice_speed(0.5) - 4.0).abs() < 1e-6);
    }
}
