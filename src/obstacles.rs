// ============================================================================
// HOST-SIDE OBSTACLES AND FORCING
// ============================================================================
//
// Builders for the boundary mask and the external force field. Nothing here
// touches the device; the results are uploaded with `Solver::set_boundary`
// and `Solver::set_force`.

use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::lattice::cell_index;

/// Obstacle shape in cell coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ObstacleSpec {
    Circle { x: f32, y: f32, radius: f32 },
    Rect { x: u32, y: u32, width: u32, height: u32 },
}

/// Porous-medium style scatter of circular obstacles.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RandomObstacles {
    pub count: u32,
    pub radius: f32,
    pub seed: u64,
}

/// Point source of body force with a 1/(1 + distance) falloff.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForceSource {
    pub x: f32,
    pub y: f32,
    pub radius: f32,
    pub force: [f32; 2],
    /// Modulate with (cos²t, |sin t|) over simulation time.
    #[serde(default)]
    pub pulse: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObstacleMask {
    size: u32,
    cells: Vec<f32>,
}

impl ObstacleMask {
    pub fn new(size: u32) -> Self {
        Self {
            size,
            cells: vec![0.0; size as usize * size as usize],
        }
    }

    pub fn from_specs(size: u32, obstacles: &[ObstacleSpec], random: Option<&RandomObstacles>) -> Self {
        let mut mask = Self::new(size);
        for obstacle in obstacles {
            mask.apply(obstacle);
        }
        if let Some(random) = random {
            mask.scatter(random);
        }
        mask
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn cells(&self) -> &[f32] {
        &self.cells
    }

    pub fn is_solid(&self, x: u32, y: u32) -> bool {
        x < self.size && y < self.size && self.cells[cell_index(self.size, x, y)] != 0.0
    }

    pub fn solid_count(&self) -> usize {
        self.cells.iter().filter(|c| **c != 0.0).count()
    }

    pub fn set(&mut self, x: u32, y: u32, solid: bool) {
        if x < self.size && y < self.size {
            self.cells[cell_index(self.size, x, y)] = if solid { 1.0 } else { 0.0 };
        }
    }

    pub fn clear(&mut self) {
        self.cells.fill(0.0);
    }

    pub fn apply(&mut self, obstacle: &ObstacleSpec) {
        match *obstacle {
            ObstacleSpec::Circle { x, y, radius } => self.paint_circle(x, y, radius, true),
            ObstacleSpec::Rect {
                x,
                y,
                width,
                height,
            } => {
                let x_end = x.saturating_add(width).min(self.size);
                let y_end = y.saturating_add(height).min(self.size);
                for cy in y.min(self.size)..y_end {
                    for cx in x.min(self.size)..x_end {
                        self.set(cx, cy, true);
                    }
                }
            }
        }
    }

    /// Marks (or clears) every cell whose centre lies within `radius`.
    pub fn paint_circle(&mut self, cx: f32, cy: f32, radius: f32, solid: bool) {
        let r = radius.max(0.0);
        let x0 = (cx - r).floor().max(0.0) as u32;
        let y0 = (cy - r).floor().max(0.0) as u32;
        let x1 = ((cx + r).ceil().max(0.0) as u32).min(self.size.saturating_sub(1));
        let y1 = ((cy + r).ceil().max(0.0) as u32).min(self.size.saturating_sub(1));
        for y in y0..=y1 {
            for x in x0..=x1 {
                let dx = x as f32 + 0.5 - cx;
                let dy = y as f32 + 0.5 - cy;
                if dx * dx + dy * dy <= r * r {
                    self.set(x, y, solid);
                }
            }
        }
    }

    pub fn scatter(&mut self, random: &RandomObstacles) {
        if self.size == 0 {
            return;
        }
        let mut rng = StdRng::seed_from_u64(random.seed);
        let extent = self.size as f32;
        for _ in 0..random.count {
            let x = rng.gen_range(0.0..extent);
            let y = rng.gen_range(0.0..extent);
            self.paint_circle(x, y, random.radius, true);
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForceField {
    size: u32,
    cells: Vec<[f32; 2]>,
}

impl ForceField {
    pub fn zero(size: u32) -> Self {
        Self {
            size,
            cells: vec![[0.0; 2]; size as usize * size as usize],
        }
    }

    /// Sum of all sources evaluated at simulation time `time`.
    pub fn from_sources(size: u32, sources: &[ForceSource], time: f32) -> Self {
        let mut field = Self::zero(size);
        for source in sources {
            field.add_source(source, time);
        }
        field
    }

    pub fn cells(&self) -> &[[f32; 2]] {
        &self.cells
    }

    pub fn is_zero(&self) -> bool {
        self.cells.iter().all(|f| f[0] == 0.0 && f[1] == 0.0)
    }

    pub fn add_source(&mut self, source: &ForceSource, time: f32) {
        let modulation = if source.pulse {
            let c = time.cos();
            [c * c, time.sin().abs()]
        } else {
            [1.0, 1.0]
        };
        for y in 0..self.size {
            for x in 0..self.size {
                let dx = x as f32 - source.x;
                let dy = y as f32 - source.y;
                let dist = (dx * dx + dy * dy).sqrt();
                if dist > source.radius {
                    continue;
                }
                let falloff = 1.0 / (1.0 + dist);
                let cell = &mut self.cells[cell_index(self.size, x, y)];
                cell[0] += source.force[0] * modulation[0] * falloff;
                cell[1] += source.force[1] * modulation[1] * falloff;
            }
        }
    }

    pub fn has_pulse(sources: &[ForceSource]) -> bool {
        sources.iter().any(|s| s.pulse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rect_is_clipped_to_domain() {
        let mut mask = ObstacleMask::new(8);
        mask.apply(&ObstacleSpec::Rect {
            x: 6,
            y: 6,
            width: 10,
            height: 10,
        });
        assert_eq!(mask.solid_count(), 4);
        assert!(mask.is_solid(7, 7));
        assert!(!mask.is_solid(5, 7));
    }

    #[test]
    fn circle_covers_centre_cells() {
        let mut mask = ObstacleMask::new(16);
        mask.paint_circle(8.0, 8.0, 2.0, true);
        assert!(mask.is_solid(7, 7));
        assert!(mask.is_solid(8, 8));
        assert!(!mask.is_solid(0, 0));
        let solid = mask.solid_count();
        assert!(solid > 4 && solid < 25, "solid = {solid}");

        mask.paint_circle(8.0, 8.0, 2.0, false);
        assert_eq!(mask.solid_count(), 0);
    }

    #[test]
    fn clear_removes_every_obstacle() {
        let mut mask = ObstacleMask::new(8);
        mask.apply(&ObstacleSpec::Rect {
            x: 1,
            y: 1,
            width: 3,
            height: 2,
        });
        mask.set(7, 0, true);
        assert_eq!(mask.solid_count(), 7);
        mask.clear();
        assert_eq!(mask.solid_count(), 0);
        assert_eq!(mask.cells().len(), 64);
    }

    #[test]
    fn scatter_is_deterministic() {
        let random = RandomObstacles {
            count: 5,
            radius: 1.5,
            seed: 42,
        };
        let a = ObstacleMask::from_specs(32, &[], Some(&random));
        let b = ObstacleMask::from_specs(32, &[], Some(&random));
        assert_eq!(a, b);
        assert!(a.solid_count() > 0);
    }

    #[test]
    fn force_source_falls_off() {
        let source = ForceSource {
            x: 4.0,
            y: 4.0,
            radius: 3.0,
            force: [2.0, 0.0],
            pulse: false,
        };
        let field = ForceField::from_sources(9, &[source], 0.0);
        let at = |x, y| field.cells()[cell_index(9, x, y)];
        assert_eq!(at(4, 4), [2.0, 0.0]);
        assert!((at(5, 4)[0] - 1.0).abs() < 1e-6);
        assert_eq!(at(0, 0), [0.0, 0.0]);
        assert!(!field.is_zero());
        assert!(ForceField::zero(9).is_zero());
    }

    #[test]
    fn pulsed_source_vanishes_when_modulation_does() {
        let source = ForceSource {
            x: 1.0,
            y: 1.0,
            radius: 2.0,
            force: [1.0, 1.0],
            pulse: true,
        };
        // cos²(π/2) = 0 and sin(0) = 0
        let field = ForceField::from_sources(4, &[source], std::f32::consts::FRAC_PI_2);
        assert!(field.cells().iter().all(|f| f[0].abs() < 1e-6));
        let field = ForceField::from_sources(4, &[source], 0.0);
        assert!(field.cells().iter().all(|f| f[1] == 0.0));
        assert!(ForceField::has_pulse(&[source]));
    }
}
