//! Wavepond - an orbit-camera pond scene whose water surface runs a
//! finite-difference wave simulation, streamed to the GPU through a ring of
//! in-flight frame resources.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{error, info, warn};
use winit::{
    application::ApplicationHandler,
    event::*,
    event_loop::EventLoop,
    keyboard::{KeyCode, PhysicalKey},
    window::{Window, WindowId},
};

use wavepond::camera::OrbitCamera;
use wavepond::cli::Args;
use wavepond::frame_ring::FrameResourceRing;
use wavepond::orchestrator::FrameOrchestrator;
use wavepond::params::{DisturbanceConfig, FrameConfig, RenderConfig, WavePhysics};
use wavepond::rendering::{GpuFence, RenderSystem};
use wavepond::scene::{build_pond_scene, RenderItemCatalog};
use wavepond::waves::WaveField;

/// Main application state
struct App {
    window: Option<Arc<Window>>,
    render_system: Option<RenderSystem>,
    orchestrator: Option<FrameOrchestrator<Arc<GpuFence>>>,

    camera: OrbitCamera,

    physics: WavePhysics,
    frame_config: FrameConfig,
    disturbance: DisturbanceConfig,
    render_config: RenderConfig,

    // Mouse drag state for the orbit camera.
    left_held: bool,
    right_held: bool,
    last_cursor: Option<(f64, f64)>,

    start_time: Instant,
    last_frame: Instant,
}

impl App {
    fn new(
        physics: WavePhysics,
        frame_config: FrameConfig,
        disturbance: DisturbanceConfig,
    ) -> Self {
        let now = Instant::now();
        Self {
            window: None,
            render_system: None,
            orchestrator: None,
            camera: OrbitCamera::default(),
            physics,
            frame_config,
            disturbance,
            render_config: RenderConfig::default(),
            left_held: false,
            right_held: false,
            last_cursor: None,
            start_time: now,
            last_frame: now,
        }
    }

    fn init(&mut self, event_loop: &winit::event_loop::ActiveEventLoop) -> Result<()> {
        let window_attributes = Window::default_attributes()
            .with_title("Wavepond")
            .with_inner_size(winit::dpi::LogicalSize::new(
                self.render_config.window_width,
                self.render_config.window_height,
            ));
        let window = Arc::new(
            event_loop
                .create_window(window_attributes)
                .context("failed to create window")?,
        );

        let waves = WaveField::new(&self.physics)?;

        let mut catalog = RenderItemCatalog::new(self.frame_config.ring_depth);
        let mut scene_rng = StdRng::seed_from_u64(0x5EED);
        let scene = build_pond_scene(
            &mut catalog,
            self.physics.rows,
            self.physics.cols,
            &mut scene_rng,
        );

        let render_system = pollster::block_on(RenderSystem::new(
            Arc::clone(&window),
            &catalog,
            waves.vertex_count(),
            &self.render_config,
        ))?;

        let ring = FrameResourceRing::new(
            &self.frame_config,
            waves.vertex_count(),
            render_system.fence(),
        )?;
        let orchestrator = FrameOrchestrator::new(
            waves,
            catalog,
            scene.water_material,
            ring,
            self.disturbance.clone(),
            StdRng::from_entropy(),
        )?;

        info!(
            rows = self.physics.rows,
            cols = self.physics.cols,
            ring_depth = self.frame_config.ring_depth,
            "wavepond running, drag to orbit, right-drag to zoom, ESC to quit"
        );

        self.window = Some(window);
        self.render_system = Some(render_system);
        self.orchestrator = Some(orchestrator);
        self.start_time = Instant::now();
        self.last_frame = self.start_time;
        Ok(())
    }

    /// Advance the simulation one frame and draw it.
    fn render_frame(&mut self, event_loop: &winit::event_loop::ActiveEventLoop) {
        let (Some(render_system), Some(orchestrator)) =
            (self.render_system.as_mut(), self.orchestrator.as_mut())
        else {
            return;
        };

        let now = Instant::now();
        let delta_s = now.duration_since(self.last_frame).as_secs_f32();
        self.last_frame = now;
        let total_s = now.duration_since(self.start_time).as_secs_f32();

        orchestrator.prepare_frame(delta_s, total_s, &self.camera, &self.render_config);

        match render_system.render(orchestrator.catalog(), orchestrator.ring()) {
            Ok(fence_value) => orchestrator.finish_frame(fence_value),
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                warn!("surface lost, reconfiguring");
                render_system.resize(
                    self.render_config.window_width,
                    self.render_config.window_height,
                );
            }
            Err(wgpu::SurfaceError::OutOfMemory) => {
                error!("out of GPU memory, exiting");
                event_loop.exit();
            }
            Err(e) => warn!(error = ?e, "dropped frame"),
        }
    }

    fn handle_cursor_moved(&mut self, x: f64, y: f64) {
        if let Some((last_x, last_y)) = self.last_cursor {
            let dx = (x - last_x) as f32;
            let dy = (y - last_y) as f32;
            if self.left_held {
                self.camera.rotate(dx, dy);
            }
            if self.right_held {
                self.camera.zoom(dx, dy);
            }
        }
        self.last_cursor = Some((x, y));
    }
}

impl ApplicationHandler for App {
    fn about_to_wait(&mut self, _event_loop: &winit::event_loop::ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }

    fn resumed(&mut self, event_loop: &winit::event_loop::ActiveEventLoop) {
        if self.window.is_some() {
            return; // Already initialized
        }
        if let Err(e) = self.init(event_loop) {
            error!(error = ?e, "initialization failed");
            event_loop.exit();
        }
    }

    fn window_event(
        &mut self,
        event_loop: &winit::event_loop::ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        state: ElementState::Pressed,
                        physical_key: PhysicalKey::Code(KeyCode::Escape),
                        ..
                    },
                ..
            } => event_loop.exit(),
            WindowEvent::Resized(size) => {
                self.render_config.window_width = size.width;
                self.render_config.window_height = size.height;
                if let Some(render_system) = self.render_system.as_mut() {
                    render_system.resize(size.width, size.height);
                }
            }
            WindowEvent::MouseInput { state, button, .. } => {
                let held = state == ElementState::Pressed;
                match button {
                    MouseButton::Left => self.left_held = held,
                    MouseButton::Right => self.right_held = held,
                    _ => {}
                }
            }
            WindowEvent::CursorMoved { position, .. } => {
                self.handle_cursor_moved(position.x, position.y);
            }
            WindowEvent::RedrawRequested => {
                self.render_frame(event_loop);
            }
            _ => {}
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let physics = args.wave_physics()?;
    let frame_config = args.frame_config()?;
    let disturbance = args.disturbance_config()?;

    let mut app = App::new(physics, frame_config, disturbance);
    let event_loop = EventLoop::new().context("failed to create event loop")?;
    event_loop.run_app(&mut app)?;
    Ok(())
}
