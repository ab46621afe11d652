//! Wavepond library - pond scene with a finite-difference wave surface

pub mod camera;
pub mod cli;
pub mod frame_ring;
pub mod orchestrator;
pub mod params;
pub mod rendering;
pub mod scene;
pub mod waves;
