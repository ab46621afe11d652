//! Height-field wave simulation on a fixed 2D grid.
//!
//! The surface is evolved with a second-order finite-difference wave equation.
//! Heights are double-buffered (current and previous solution) because every
//! stencil read must see the previous full state, never a partially updated
//! one. The solver runs on a fixed timestep: callers feed it wall-clock
//! deltas and it steps zero or more times per call.

use glam::Vec3;

use crate::params::{ConfigError, WavePhysics};

/// Wave field owning the height grid, its history, and reconstructed normals.
pub struct WaveField {
    rows: usize,
    cols: usize,
    spatial_step: f32,
    time_step: f32,

    // Finite-difference coefficients, fixed at construction from
    // {time step, spatial step, wave speed, damping}.
    k1: f32,
    k2: f32,
    k3: f32,

    /// Accumulated wall time not yet consumed by whole simulation steps
    accumulated: f32,

    curr: Vec<f32>,
    prev: Vec<f32>,
    normals: Vec<Vec3>,
}

impl WaveField {
    /// Cells that must stay clear of every edge when disturbing the surface.
    pub const DISTURB_MARGIN: usize = 2;

    pub fn new(physics: &WavePhysics) -> Result<Self, ConfigError> {
        physics.validate()?;

        let dt = physics.time_step_s;
        let dx = physics.spatial_step_m;
        let d = physics.damping * dt + 2.0;
        let e = (physics.wave_speed * physics.wave_speed) * (dt * dt) / (dx * dx);

        let count = physics.rows * physics.cols;
        Ok(Self {
            rows: physics.rows,
            cols: physics.cols,
            spatial_step: dx,
            time_step: dt,
            k1: (physics.damping * dt - 2.0) / d,
            k2: (4.0 - 8.0 * e) / d,
            k3: (2.0 * e) / d,
            accumulated: 0.0,
            curr: vec![0.0; count],
            prev: vec![0.0; count],
            normals: vec![Vec3::Y; count],
        })
    }

    pub fn row_count(&self) -> usize {
        self.rows
    }

    pub fn column_count(&self) -> usize {
        self.cols
    }

    pub fn vertex_count(&self) -> usize {
        self.rows * self.cols
    }

    pub fn triangle_count(&self) -> usize {
        (self.rows - 1) * (self.cols - 1) * 2
    }

    /// Grid extent along X (meters)
    pub fn width(&self) -> f32 {
        (self.cols - 1) as f32 * self.spatial_step
    }

    /// Grid extent along Z (meters)
    pub fn depth(&self) -> f32 {
        (self.rows - 1) as f32 * self.spatial_step
    }

    /// World-space position of vertex `i` (row-major index), O(1).
    pub fn position(&self, i: usize) -> Vec3 {
        let row = i / self.cols;
        let col = i % self.cols;
        Vec3::new(
            -0.5 * self.width() + col as f32 * self.spatial_step,
            self.curr[i],
            0.5 * self.depth() - row as f32 * self.spatial_step,
        )
    }

    /// Unit normal of vertex `i`, O(1).
    pub fn normal(&self, i: usize) -> Vec3 {
        self.normals[i]
    }

    /// Current height at (row, col); test and probe access.
    pub fn height(&self, row: usize, col: usize) -> f32 {
        self.curr[row * self.cols + col]
    }

    /// Apply a localized impulse: the full magnitude at (row, col) and half of
    /// it at the four direct neighbours.
    ///
    /// Callers must keep the centre at least [`Self::DISTURB_MARGIN`] cells
    /// from every edge; violating that is a caller bug, not a runtime
    /// condition, so it panics.
    pub fn disturb(&mut self, row: usize, col: usize, magnitude: f32) {
        assert!(
            row >= Self::DISTURB_MARGIN && row < self.rows - Self::DISTURB_MARGIN,
            "disturb row {row} outside margin"
        );
        assert!(
            col >= Self::DISTURB_MARGIN && col < self.cols - Self::DISTURB_MARGIN,
            "disturb col {col} outside margin"
        );

        let n = self.cols;
        let half = 0.5 * magnitude;

        self.curr[row * n + col] += magnitude;
        self.curr[row * n + col + 1] += half;
        self.curr[row * n + col - 1] += half;
        self.curr[(row + 1) * n + col] += half;
        self.curr[(row - 1) * n + col] += half;
    }

    /// Advance the simulation by `elapsed` wall seconds. Runs one discrete
    /// step per whole timestep accumulated; a call shorter than the timestep
    /// (including zero) leaves the grid untouched.
    pub fn update(&mut self, elapsed: f32) {
        self.accumulated += elapsed;

        while self.accumulated >= self.time_step {
            self.step();
            self.accumulated -= self.time_step;
        }
    }

    /// One discrete wave-equation step over the interior, then boundary
    /// clamping and normal reconstruction.
    fn step(&mut self) {
        let n = self.cols;

        // The stencil reads only from `curr` and writes into `prev`, which
        // after the swap below becomes the new current solution. This keeps
        // the two previous height states intact while updating.
        for row in 1..self.rows - 1 {
            for col in 1..n - 1 {
                let i = row * n + col;
                self.prev[i] = self.k1 * self.prev[i]
                    + self.k2 * self.curr[i]
                    + self.k3
                        * (self.curr[i + n]
                            + self.curr[i - n]
                            + self.curr[i + 1]
                            + self.curr[i - 1]);
            }
        }
        std::mem::swap(&mut self.curr, &mut self.prev);

        self.clamp_boundary();
        self.rebuild_normals();
    }

    /// Neumann-like boundary: edge cells copy their single interior
    /// neighbour, so the stencil never needs out-of-range reads.
    fn clamp_boundary(&mut self) {
        let n = self.cols;
        let last_row = self.rows - 1;

        for col in 0..n {
            self.curr[col] = self.curr[n + col];
            self.curr[last_row * n + col] = self.curr[(last_row - 1) * n + col];
        }
        for row in 0..self.rows {
            self.curr[row * n] = self.curr[row * n + 1];
            self.curr[row * n + n - 1] = self.curr[row * n + n - 2];
        }
    }

    /// Central-difference normals over the interior. Boundary vertices copy
    /// their nearest interior neighbour's normal; the edge is cosmetically
    /// smoother that way than with a fixed up-vector.
    fn rebuild_normals(&mut self) {
        let n = self.cols;
        let two_dx = 2.0 * self.spatial_step;

        for row in 1..self.rows - 1 {
            for col in 1..n - 1 {
                let i = row * n + col;
                let left = self.curr[i - 1];
                let right = self.curr[i + 1];
                let above = self.curr[i - n];
                let below = self.curr[i + n];
                self.normals[i] = Vec3::new(left - right, two_dx, below - above).normalize();
            }
        }

        let last_row = self.rows - 1;
        for col in 0..n {
            let clamped = col.clamp(1, n - 2);
            self.normals[col] = self.normals[n + clamped];
            self.normals[last_row * n + col] = self.normals[(last_row - 1) * n + clamped];
        }
        for row in 0..self.rows {
            let clamped = row.clamp(1, last_row - 1);
            self.normals[row * n] = self.normals[clamped * n + 1];
            self.normals[row * n + n - 1] = self.normals[clamped * n + n - 2];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::WavePhysics;
    use rand::{Rng, SeedableRng};

    fn reference_field() -> WaveField {
        // 128x128, dx 1.0, dt 0.03, speed 4.0, damping 0.2
        WaveField::new(&WavePhysics::default()).unwrap()
    }

    #[test]
    fn rejects_grid_below_stencil_margin() {
        let physics = WavePhysics {
            rows: 3,
            cols: 3,
            ..WavePhysics::default()
        };
        assert!(WaveField::new(&physics).is_err());
    }

    #[test]
    fn disturb_raises_centre_cell() {
        let mut waves = reference_field();
        let before = waves.height(64, 64);
        waves.disturb(64, 64, 0.4);
        assert!(waves.height(64, 64) > before);
        // Direct neighbours get half the impulse.
        assert_eq!(waves.height(64, 65), 0.2);
        assert_eq!(waves.height(63, 64), 0.2);
    }

    #[test]
    #[should_panic(expected = "outside margin")]
    fn disturb_outside_margin_panics() {
        let mut waves = reference_field();
        waves.disturb(1, 64, 0.4);
    }

    #[test]
    fn update_shorter_than_timestep_runs_no_step() {
        let mut waves = reference_field();
        waves.disturb(64, 64, 0.4);
        let snapshot: Vec<f32> = waves.curr.clone();

        waves.update(0.029);
        assert_eq!(waves.curr, snapshot);
    }

    #[test]
    fn update_runs_exactly_one_step_per_timestep() {
        let mut a = reference_field();
        let mut b = reference_field();
        a.disturb(64, 64, 0.4);
        b.disturb(64, 64, 0.4);

        // Three timesteps in one call vs three calls of one timestep each.
        a.update(0.09);
        for _ in 0..3 {
            b.update(0.03);
        }
        assert_eq!(a.curr, b.curr);

        // A fractional remainder carries over instead of stepping early.
        let mut c = reference_field();
        c.disturb(64, 64, 0.4);
        c.update(0.045);
        c.update(0.045);
        assert_eq!(c.curr, a.curr);
    }

    #[test]
    fn zero_update_is_idempotent() {
        let mut waves = reference_field();
        waves.disturb(40, 40, 0.3);
        waves.update(0.03);
        let snapshot = waves.curr.clone();

        for _ in 0..100 {
            waves.update(0.0);
        }
        assert_eq!(waves.curr, snapshot);
    }

    #[test]
    fn ripple_propagates_outward() {
        let mut waves = reference_field();
        waves.disturb(64, 64, 0.4);
        let baseline = waves.height(64, 62);

        for _ in 0..10 {
            waves.update(0.03);
        }
        assert_ne!(waves.height(64, 62), baseline);
    }

    #[test]
    fn long_run_with_random_disturbs_stays_finite() {
        let mut waves = reference_field();
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);

        waves.disturb(64, 64, 0.4);
        for tick in 0..1000 {
            if tick % 8 == 0 {
                let row = rng.gen_range(2..126);
                let col = rng.gen_range(2..126);
                waves.disturb(row, col, rng.gen_range(0.2..0.5));
            }
            waves.update(0.03);
        }

        for i in 0..waves.vertex_count() {
            assert!(waves.position(i).y.is_finite());
            assert!(waves.normal(i).is_finite());
        }
    }

    #[test]
    fn triangle_count_matches_grid_topology() {
        let waves = reference_field();
        assert_eq!(waves.triangle_count(), 127 * 127 * 2);
        // Three indices per triangle when the grid is tessellated.
        assert_eq!(
            crate::scene::grid_indices(waves.row_count(), waves.column_count()).len(),
            waves.triangle_count() * 3
        );
    }

    #[test]
    fn positions_span_centred_grid() {
        let waves = reference_field();
        let first = waves.position(0);
        let last = waves.position(waves.vertex_count() - 1);

        assert_eq!(first.x, -0.5 * waves.width());
        assert_eq!(first.z, 0.5 * waves.depth());
        assert_eq!(last.x, 0.5 * waves.width());
        assert_eq!(last.z, -0.5 * waves.depth());
    }

    #[test]
    fn normals_stay_unit_length_after_steps() {
        let mut waves = reference_field();
        waves.disturb(30, 90, 0.5);
        for _ in 0..50 {
            waves.update(0.03);
        }
        for i in 0..waves.vertex_count() {
            let len = waves.normal(i).length();
            assert!((len - 1.0).abs() < 1e-4, "normal {i} has length {len}");
        }
    }
}
