//! Parameter definitions with physical units and documented semantics.
//!
//! All magic numbers are extracted here with:
//! - Physical units (meters, seconds, etc.)
//! - Documented ranges and meanings
//! - Validation for values that would break the simulation

use thiserror::Error;

/// Configuration errors. All of these are fatal at startup; there is no
/// runtime recovery path for a malformed grid or ring.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("wave grid {rows}x{cols} is too small; the stencil needs a 2-cell margin (minimum 5x5)")]
    GridTooSmall { rows: usize, cols: usize },

    #[error("spatial step and time step must be positive (dx={spatial_step_m}, dt={time_step_s})")]
    NonPositiveStep { spatial_step_m: f32, time_step_s: f32 },

    #[error("frame resource ring depth {depth} cannot overlap CPU and GPU work (minimum 2)")]
    RingTooShallow { depth: usize },

    #[error("disturbance magnitude range [{min}, {max}] is empty or negative")]
    BadMagnitudeRange { min: f32, max: f32 },

    #[error("disturbance edge margin {margin} leaves no interior cells in a {rows}x{cols} grid")]
    MarginTooWide {
        margin: usize,
        rows: usize,
        cols: usize,
    },
}

/// Wave field simulation parameters
#[derive(Debug, Clone)]
pub struct WavePhysics {
    /// Grid rows (samples along Z)
    pub rows: usize,

    /// Grid columns (samples along X)
    pub cols: usize,

    /// Spacing between grid samples in world units (meters)
    pub spatial_step_m: f32,

    /// Fixed simulation timestep (seconds). The solver always advances in
    /// whole multiples of this, independent of frame rate.
    pub time_step_s: f32,

    /// Wave propagation speed (meters per second)
    pub wave_speed: f32,

    /// Damping coefficient (per second); higher values calm the surface faster
    pub damping: f32,
}

impl Default for WavePhysics {
    fn default() -> Self {
        Self {
            rows: 128,
            cols: 128,
            spatial_step_m: 1.0,
            time_step_s: 0.03,
            wave_speed: 4.0,
            damping: 0.2,
        }
    }
}

impl WavePhysics {
    /// Validate grid dimensions and steps. The update stencil reads one cell
    /// in every direction and disturbances need a 2-cell margin, so anything
    /// under 5x5 cannot host a single valid disturbance.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rows < 5 || self.cols < 5 {
            return Err(ConfigError::GridTooSmall {
                rows: self.rows,
                cols: self.cols,
            });
        }
        if self.spatial_step_m <= 0.0 || self.time_step_s <= 0.0 {
            return Err(ConfigError::NonPositiveStep {
                spatial_step_m: self.spatial_step_m,
                time_step_s: self.time_step_s,
            });
        }
        Ok(())
    }
}

/// Random disturbance scheduling. These are presentation tuning, not physics,
/// so they stay configurable rather than hard-coded.
#[derive(Debug, Clone)]
pub struct DisturbanceConfig {
    /// Simulation-clock seconds between disturbances (frame-rate independent)
    pub interval_s: f32,

    /// Smallest impulse magnitude (meters)
    pub min_magnitude: f32,

    /// Largest impulse magnitude (meters)
    pub max_magnitude: f32,

    /// Cells kept clear at every grid edge when picking a disturbance centre.
    /// Must be at least 2 so the impulse footprint stays in range.
    pub edge_margin: usize,
}

impl Default for DisturbanceConfig {
    fn default() -> Self {
        Self {
            interval_s: 0.25,
            min_magnitude: 0.2,
            max_magnitude: 0.5,
            edge_margin: 4,
        }
    }
}

impl DisturbanceConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_magnitude > self.max_magnitude || self.min_magnitude < 0.0 {
            return Err(ConfigError::BadMagnitudeRange {
                min: self.min_magnitude,
                max: self.max_magnitude,
            });
        }
        Ok(())
    }
}

/// Frame pacing configuration
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Number of in-flight frame resource slots. The CPU may run at most
    /// `ring_depth - 1` frames ahead of the GPU. Three balances input latency
    /// against CPU/GPU overlap; two is the minimum that overlaps at all.
    pub ring_depth: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self { ring_depth: 3 }
    }
}

impl FrameConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ring_depth < 2 {
            return Err(ConfigError::RingTooShallow {
                depth: self.ring_depth,
            });
        }
        Ok(())
    }
}

/// Rendering configuration
#[derive(Debug, Clone)]
pub struct RenderConfig {
    /// Window width (pixels)
    pub window_width: u32,

    /// Window height (pixels)
    pub window_height: u32,

    /// Vertical field of view (degrees)
    pub fov_degrees: f32,

    /// Near clipping plane (meters)
    pub near_plane_m: f32,

    /// Far clipping plane (meters)
    pub far_plane_m: f32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            window_width: 1280,
            window_height: 720,
            fov_degrees: 45.0,
            near_plane_m: 1.0,
            far_plane_m: 1000.0,
        }
    }
}

impl RenderConfig {
    pub fn aspect_ratio(&self) -> f32 {
        self.window_width as f32 / self.window_height as f32
    }
}
