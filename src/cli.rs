//! Command-line argument parsing.

use clap::Parser;

use crate::params::{ConfigError, DisturbanceConfig, FrameConfig, WavePhysics};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "Wavepond")]
#[command(about = "Interactive pond scene with a finite-difference wave surface", long_about = None)]
pub struct Args {
    /// Wave grid rows
    #[arg(long, value_name = "N", default_value = "128")]
    pub rows: usize,

    /// Wave grid columns
    #[arg(long, value_name = "N", default_value = "128")]
    pub cols: usize,

    /// Frame resource ring depth (CPU may run depth-1 frames ahead of the GPU)
    #[arg(long, value_name = "N", default_value = "3")]
    pub ring_depth: usize,

    /// Seconds between random surface disturbances
    #[arg(long, value_name = "SECONDS", default_value = "0.25")]
    pub disturb_interval: f32,
}

impl Args {
    pub fn wave_physics(&self) -> Result<WavePhysics, ConfigError> {
        let physics = WavePhysics {
            rows: self.rows,
            cols: self.cols,
            ..WavePhysics::default()
        };
        physics.validate()?;
        Ok(physics)
    }

    pub fn frame_config(&self) -> Result<FrameConfig, ConfigError> {
        let frame = FrameConfig {
            ring_depth: self.ring_depth,
        };
        frame.validate()?;
        Ok(frame)
    }

    pub fn disturbance_config(&self) -> Result<DisturbanceConfig, ConfigError> {
        let disturbance = DisturbanceConfig {
            interval_s: self.disturb_interval,
            ..DisturbanceConfig::default()
        };
        disturbance.validate()?;
        Ok(disturbance)
    }
}
