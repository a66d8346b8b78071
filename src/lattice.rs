// ============================================================================
// D2Q9 LATTICE
// ============================================================================
//
// Direction order matches the WGSL kernels: the opposite of direction `i`
// is always `8 - i`, and the rest population sits in the middle (index 4).

pub const Q: usize = 9;
pub const REST: usize = 4;

/// Discrete velocities e_i.
pub const DIRECTIONS: [[i32; 2]; Q] = [
    [1, 0],
    [1, 1],
    [1, -1],
    [0, 1],
    [0, 0],
    [0, -1],
    [-1, 1],
    [-1, -1],
    [-1, 0],
];

/// Quadrature weights w_i: 4/9 rest, 1/9 axis, 1/36 diagonal.
pub const WEIGHTS: [f32; Q] = [
    1.0 / 9.0,
    1.0 / 36.0,
    1.0 / 36.0,
    1.0 / 9.0,
    4.0 / 9.0,
    1.0 / 9.0,
    1.0 / 36.0,
    1.0 / 36.0,
    1.0 / 9.0,
];

/// Below this a cell's density is treated as zero and its velocity as (0, 0).
pub const DENSITY_EPSILON: f32 = 1e-6;

#[inline]
pub const fn opposite(i: usize) -> usize {
    Q - 1 - i
}

/// Linear index of population `i` of cell `(x, y)` in a distribution buffer.
#[inline]
pub const fn population_index(n: u32, x: u32, y: u32, i: usize) -> usize {
    ((y as usize * n as usize) + x as usize) * Q + i
}

#[inline]
pub const fn cell_index(n: u32, x: u32, y: u32) -> usize {
    y as usize * n as usize + x as usize
}

/// Second-order BGK equilibrium for direction `i`.
///
/// `velocity` is in physical units (cells per `dx/dt`), so `e·u/c` is the
/// dimensionless lattice projection. Host-side reference only; the device
/// evaluates the same expression in `collide.wgsl`.
pub fn equilibrium(i: usize, density: f32, velocity: [f32; 2], lattice_speed: f32) -> f32 {
    let e = DIRECTIONS[i];
    let eu = (e[0] as f32 * velocity[0] + e[1] as f32 * velocity[1]) / lattice_speed;
    let uu = (velocity[0] * velocity[0] + velocity[1] * velocity[1])
        / (lattice_speed * lattice_speed);
    WEIGHTS[i] * density * (1.0 + 3.0 * eu + 4.5 * eu * eu - 1.5 * uu)
}

/// Density and momentum of one cell's nine populations.
pub fn moments(populations: &[f32]) -> (f32, [f32; 2]) {
    let mut density = 0.0;
    let mut momentum = [0.0f32; 2];
    for (f, e) in populations.iter().zip(DIRECTIONS.iter()) {
        density += f;
        momentum[0] += f * e[0] as f32;
        momentum[1] += f * e[1] as f32;
    }
    (density, momentum)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weights_sum_to_one() {
        let sum: f64 = WEIGHTS.iter().map(|w| *w as f64).sum();
        assert!((sum - 1.0).abs() < 1e-7, "sum = {sum}");

        let rest = WEIGHTS.iter().filter(|w| **w == 4.0 / 9.0).count();
        let axis = WEIGHTS.iter().filter(|w| **w == 1.0 / 9.0).count();
        let diagonal = WEIGHTS.iter().filter(|w| **w == 1.0 / 36.0).count();
        assert_eq!((rest, axis, diagonal), (1, 4, 4));
    }

    #[test]
    fn opposite_directions_cancel() {
        for i in 0..Q {
            let a = DIRECTIONS[i];
            let b = DIRECTIONS[opposite(i)];
            assert_eq!([a[0] + b[0], a[1] + b[1]], [0, 0], "direction {i}");
            assert_eq!(WEIGHTS[i], WEIGHTS[opposite(i)]);
        }
        assert_eq!(DIRECTIONS[REST], [0, 0]);
        assert_eq!(opposite(REST), REST);
    }

    #[test]
    fn weight_tensor_is_isotropic() {
        // Σ w_i e_ia e_ib = δ_ab / 3
        let mut t = [[0.0f32; 2]; 2];
        for i in 0..Q {
            let e = DIRECTIONS[i];
            for a in 0..2 {
                for b in 0..2 {
                    t[a][b] += WEIGHTS[i] * (e[a] * e[b]) as f32;
                }
            }
        }
        assert!((t[0][0] - 1.0 / 3.0).abs() < 1e-6);
        assert!((t[1][1] - 1.0 / 3.0).abs() < 1e-6);
        assert!(t[0][1].abs() < 1e-6);
    }

    #[test]
    fn equilibrium_at_rest_is_weighted_density() {
        for i in 0..Q {
            let feq = equilibrium(i, 1.7, [0.0, 0.0], 60.0);
            assert!((feq - WEIGHTS[i] * 1.7).abs() < 1e-7);
        }
    }

    #[test]
    fn equilibrium_carries_density_and_momentum() {
        let c = 4.0;
        let u = [0.3, -0.2];
        let rho = 1.2;
        let feq: Vec<f32> = (0..Q).map(|i| equilibrium(i, rho, u, c)).collect();
        let (density, momentum) = moments(&feq);
        assert!((density - rho).abs() < 1e-5);
        // momentum in lattice units is rho * u / c
        assert!((momentum[0] - rho * u[0] / c).abs() < 1e-5);
        assert!((momentum[1] - rho * u[1] / c).abs() < 1e-5);
    }

    #[test]
    fn indices_are_dense() {
        let n = 3;
        assert_eq!(population_index(n, 0, 0, 0), 0);
        assert_eq!(population_index(n, 2, 2, 8), n as usize * n as usize * Q - 1);
        assert_eq!(population_index(n, 1, 0, 0), Q);
        assert_eq!(cell_index(n, 0, 1), 3);
    }
}
