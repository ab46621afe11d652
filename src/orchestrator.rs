//! Per-frame driver: rotates the frame ring, propagates dirty constants,
//! advances the wave simulation, and stages everything the renderer needs for
//! the current slot.
//!
//! The orchestrator owns the simulation and catalog exclusively; all mutation
//! happens on the control thread in a fixed order per frame. The only point
//! that can block is the ring rotation, which waits for the GPU to retire the
//! oldest in-flight slot.

use glam::{Mat4, Vec3};
use rand::rngs::StdRng;
use rand::Rng;

use crate::camera::OrbitCamera;
use crate::frame_ring::{FenceTimeline, FrameResourceRing};
use crate::params::{ConfigError, DisturbanceConfig, RenderConfig};
use crate::scene::{Light, MAX_LIGHTS, MaterialHandle, PassConstants, RenderItemCatalog};
use crate::waves::WaveField;

/// Water UV scroll rates (UV units per second), wrapped into [0, 1).
const SCROLL_U_PER_S: f32 = 0.1;
const SCROLL_V_PER_S: f32 = 0.02;

pub struct FrameOrchestrator<F: FenceTimeline> {
    waves: WaveField,
    catalog: RenderItemCatalog,
    ring: FrameResourceRing<F>,
    disturbance: DisturbanceConfig,
    /// Effective edge margin for disturbance centres, validated against the
    /// grid at construction so the scheduler always has cells to pick from.
    disturb_margin: usize,
    water_material: MaterialHandle,

    // Explicit water animation state, not a hidden global.
    scroll_u: f32,
    scroll_v: f32,

    /// Simulation-clock time of the last scheduled disturbance. Tracked in
    /// accumulated wall time so frame-rate changes do not change the
    /// disturbance frequency.
    disturb_base_s: f32,
    disturbs_issued: u64,

    rng: StdRng,
}

impl<F: FenceTimeline> FrameOrchestrator<F> {
    pub fn new(
        waves: WaveField,
        catalog: RenderItemCatalog,
        water_material: MaterialHandle,
        ring: FrameResourceRing<F>,
        disturbance: DisturbanceConfig,
        rng: StdRng,
    ) -> Result<Self, ConfigError> {
        disturbance.validate()?;

        let disturb_margin = disturbance.edge_margin.max(WaveField::DISTURB_MARGIN);
        if waves.row_count() <= 2 * disturb_margin || waves.column_count() <= 2 * disturb_margin {
            return Err(ConfigError::MarginTooWide {
                margin: disturb_margin,
                rows: waves.row_count(),
                cols: waves.column_count(),
            });
        }

        Ok(Self {
            waves,
            catalog,
            ring,
            disturbance,
            disturb_margin,
            water_material,
            scroll_u: 0.0,
            scroll_v: 0.0,
            disturb_base_s: 0.0,
            disturbs_issued: 0,
            rng,
        })
    }

    pub fn catalog(&self) -> &RenderItemCatalog {
        &self.catalog
    }

    pub fn catalog_mut(&mut self) -> &mut RenderItemCatalog {
        &mut self.catalog
    }

    pub fn ring(&self) -> &FrameResourceRing<F> {
        &self.ring
    }

    pub fn ring_mut(&mut self) -> &mut FrameResourceRing<F> {
        &mut self.ring
    }

    pub fn waves(&self) -> &WaveField {
        &self.waves
    }

    pub fn disturbs_issued(&self) -> u64 {
        self.disturbs_issued
    }

    /// Stage one frame into the ring. May block in `advance()` if the CPU is
    /// a full ring ahead of the GPU. After this returns, the current slot
    /// holds everything the renderer needs.
    pub fn prepare_frame(
        &mut self,
        delta_s: f32,
        total_s: f32,
        camera: &OrbitCamera,
        render_config: &RenderConfig,
    ) {
        self.ring.advance();

        self.animate_water(delta_s);
        self.upload_dirty_constants();
        self.write_pass_constants(delta_s, total_s, camera, render_config);
        self.schedule_disturbances(total_s);
        self.waves.update(delta_s);
        self.write_wave_snapshot();
    }

    /// Record the fence value signalled for this frame's submission.
    pub fn finish_frame(&mut self, fence_value: u64) {
        self.ring.stamp_current(fence_value);
    }

    /// Scroll the water texture coordinates; the material goes dirty every
    /// frame so each ring slot picks up the fresh transform.
    fn animate_water(&mut self, delta_s: f32) {
        self.scroll_u += SCROLL_U_PER_S * delta_s;
        self.scroll_v += SCROLL_V_PER_S * delta_s;
        if self.scroll_u >= 1.0 {
            self.scroll_u -= 1.0;
        }
        if self.scroll_v >= 1.0 {
            self.scroll_v -= 1.0;
        }

        self.catalog.set_material_uv_transform(
            self.water_material,
            Mat4::from_translation(Vec3::new(self.scroll_u, self.scroll_v, 0.0)),
        );
    }

    /// Copy every dirty object and material record into the current slot and
    /// decrement its counter, so a change reaches each ring slot exactly once.
    fn upload_dirty_constants(&mut self) {
        let slot = self.ring.current_slot_mut();

        for item in self.catalog.items_mut() {
            if item.frames_dirty > 0 {
                slot.write_object(item.object_index, item.constants());
                item.frames_dirty -= 1;
            }
        }

        for material in self.catalog.materials_mut() {
            if material.frames_dirty > 0 {
                slot.write_material(material.material_index, material.constants());
                material.frames_dirty -= 1;
            }
        }
    }

    fn write_pass_constants(
        &mut self,
        delta_s: f32,
        total_s: f32,
        camera: &OrbitCamera,
        render_config: &RenderConfig,
    ) {
        let view = camera.view_matrix();
        let proj = camera.projection_matrix(render_config);
        let view_proj = proj * view;

        let width = render_config.window_width as f32;
        let height = render_config.window_height as f32;

        let mut lights = [Light {
            strength: [0.0; 3],
            falloff_start: 1.0,
            direction: [0.0, -1.0, 0.0],
            falloff_end: 10.0,
            position: [0.0; 3],
            spot_power: 64.0,
        }; MAX_LIGHTS];
        lights[0].direction = [0.57735, -0.57735, 0.57735];
        lights[0].strength = [0.6, 0.6, 0.6];
        lights[1].direction = [-0.57735, -0.57735, 0.57735];
        lights[1].strength = [0.3, 0.3, 0.3];
        lights[2].direction = [0.0, -0.707, -0.707];
        lights[2].strength = [0.15, 0.15, 0.15];
        lights[3].position = [0.0, 8.0, 2.0];
        lights[3].strength = [1.0, 0.0, 0.0];
        lights[3].falloff_end = 20.0;

        let pass = PassConstants {
            view: view.to_cols_array_2d(),
            inv_view: view.inverse().to_cols_array_2d(),
            proj: proj.to_cols_array_2d(),
            inv_proj: proj.inverse().to_cols_array_2d(),
            view_proj: view_proj.to_cols_array_2d(),
            inv_view_proj: view_proj.inverse().to_cols_array_2d(),
            eye_pos: camera.eye_position().to_array(),
            _pad0: 0.0,
            render_target_size: [width, height],
            inv_render_target_size: [1.0 / width, 1.0 / height],
            near_z: render_config.near_plane_m,
            far_z: render_config.far_plane_m,
            total_time: total_s,
            delta_time: delta_s,
            ambient_light: [0.25, 0.25, 0.35, 1.0],
            fog_color: [0.7, 0.7, 0.7, 1.0],
            fog_start: 5.0,
            fog_range: 150.0,
            _pad1: [0.0; 2],
            lights,
        };

        self.ring.current_slot_mut().set_pass_constants(pass);
    }

    /// Every `interval_s` of accumulated simulation time, drop a random
    /// impulse on an interior cell.
    fn schedule_disturbances(&mut self, total_s: f32) {
        let margin = self.disturb_margin;

        while total_s - self.disturb_base_s >= self.disturbance.interval_s {
            self.disturb_base_s += self.disturbance.interval_s;

            let row = self.rng.gen_range(margin..self.waves.row_count() - margin);
            let col = self
                .rng
                .gen_range(margin..self.waves.column_count() - margin);
            let magnitude = self
                .rng
                .gen_range(self.disturbance.min_magnitude..=self.disturbance.max_magnitude);

            self.waves.disturb(row, col, magnitude);
            self.disturbs_issued += 1;
        }
    }

    /// Write the wave field's vertex snapshot (position, normal, UV derived
    /// by mapping [-w/2, w/2] to [0, 1]) into the current slot's dynamic
    /// vertex buffer.
    fn write_wave_snapshot(&mut self) {
        let waves = &self.waves;
        let slot = self.ring.current_slot_mut();
        let vertices = slot.wave_vertices_mut();

        for (i, vertex) in vertices.iter_mut().enumerate() {
            let position = waves.position(i);
            vertex.position = position.to_array();
            vertex.normal = waves.normal(i).to_array();
            vertex.uv = [
                0.5 + position.x / waves.width(),
                0.5 - position.z / waves.depth(),
            ];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_ring::CountingFence;
    use crate::params::{DisturbanceConfig, FrameConfig, RenderConfig, WavePhysics};
    use crate::scene::{build_pond_scene, PondScene};
    use rand::SeedableRng;
    use std::sync::Arc;

    struct Fixture {
        orchestrator: FrameOrchestrator<Arc<CountingFence>>,
        fence: Arc<CountingFence>,
        scene: PondScene,
        camera: OrbitCamera,
        render_config: RenderConfig,
        total_s: f32,
    }

    impl Fixture {
        fn new(disturbance: DisturbanceConfig) -> Self {
            Self::with_physics(WavePhysics::default(), disturbance)
        }

        fn with_physics(physics: WavePhysics, disturbance: DisturbanceConfig) -> Self {
            let waves = WaveField::new(&physics).unwrap();

            let frame = FrameConfig::default();
            let mut catalog = RenderItemCatalog::new(frame.ring_depth);
            let mut rng = StdRng::seed_from_u64(11);
            let scene = build_pond_scene(&mut catalog, physics.rows, physics.cols, &mut rng);

            let fence = Arc::new(CountingFence::new());
            let ring =
                FrameResourceRing::new(&frame, waves.vertex_count(), fence.clone()).unwrap();

            let orchestrator = FrameOrchestrator::new(
                waves,
                catalog,
                scene.water_material,
                ring,
                disturbance,
                StdRng::seed_from_u64(42),
            )
            .unwrap();

            Self {
                orchestrator,
                fence,
                scene,
                camera: OrbitCamera::default(),
                render_config: RenderConfig::default(),
                total_s: 0.0,
            }
        }

        /// Run one frame and immediately retire it so the ring never blocks.
        fn tick(&mut self, delta_s: f32) {
            self.total_s += delta_s;
            self.orchestrator
                .prepare_frame(delta_s, self.total_s, &self.camera, &self.render_config);
            let value = self.orchestrator.ring().fence().signal();
            self.orchestrator.finish_frame(value);
            self.fence.complete_through(value);
        }

        fn object_upload_count(&self, object_index: u32) -> usize {
            self.orchestrator
                .ring()
                .current_slot()
                .object_uploads()
                .iter()
                .filter(|(index, _)| *index == object_index)
                .count()
        }
    }

    #[test]
    fn transform_change_propagates_to_exactly_ring_depth_frames() {
        let mut fixture = Fixture::new(DisturbanceConfig::default());
        let depth = fixture.orchestrator.ring().depth();

        // Drain the initial everything-dirty state.
        for _ in 0..depth {
            fixture.tick(0.016);
        }
        fixture.tick(0.016);
        let moved = fixture.scene.wave_item;
        assert_eq!(
            fixture.object_upload_count(fixture.orchestrator.catalog().item(moved).object_index),
            0
        );

        fixture
            .orchestrator
            .catalog_mut()
            .set_world(moved, Mat4::from_translation(Vec3::new(0.0, 1.0, 0.0)));

        let object_index = fixture.orchestrator.catalog().item(moved).object_index;
        for _ in 0..depth {
            fixture.tick(0.016);
            assert_eq!(fixture.object_upload_count(object_index), 1);
        }
        fixture.tick(0.016);
        assert_eq!(fixture.object_upload_count(object_index), 0);
    }

    #[test]
    fn water_material_reuploads_every_frame() {
        let mut fixture = Fixture::new(DisturbanceConfig::default());
        let material_index = fixture
            .orchestrator
            .catalog()
            .material(fixture.scene.water_material)
            .material_index;

        for _ in 0..6 {
            fixture.tick(0.016);
            let uploads = fixture.orchestrator.ring().current_slot().material_uploads();
            assert!(uploads.iter().any(|(index, _)| *index == material_index));
        }
    }

    #[test]
    fn rejects_margin_that_leaves_no_interior_cells() {
        // 8x8 passes grid validation, but the default 4-cell margin leaves
        // an empty centre range; construction must fail, not panic later.
        let physics = WavePhysics {
            rows: 8,
            cols: 8,
            ..WavePhysics::default()
        };
        let waves = WaveField::new(&physics).unwrap();

        let frame = FrameConfig::default();
        let mut catalog = RenderItemCatalog::new(frame.ring_depth);
        let mut rng = StdRng::seed_from_u64(5);
        let scene = build_pond_scene(&mut catalog, physics.rows, physics.cols, &mut rng);

        let fence = Arc::new(CountingFence::new());
        let ring = FrameResourceRing::new(&frame, waves.vertex_count(), fence).unwrap();

        let result = FrameOrchestrator::new(
            waves,
            catalog,
            scene.water_material,
            ring,
            DisturbanceConfig::default(),
            StdRng::seed_from_u64(6),
        );
        assert!(matches!(result, Err(ConfigError::MarginTooWide { .. })));
    }

    #[test]
    fn small_grid_with_fitting_margin_schedules_disturbances() {
        let physics = WavePhysics {
            rows: 8,
            cols: 8,
            ..WavePhysics::default()
        };
        let mut fixture = Fixture::with_physics(
            physics,
            DisturbanceConfig {
                edge_margin: 2,
                ..DisturbanceConfig::default()
            },
        );

        // A second of simulation time; every scheduled disturbance must land
        // inside the 2..6 centre range without panicking.
        for _ in 0..20 {
            fixture.tick(0.05);
        }
        assert!(fixture.orchestrator.disturbs_issued() > 0);
    }

    #[test]
    fn disturbance_count_tracks_wall_time_not_frame_count() {
        let disturbance = DisturbanceConfig::default();

        let mut fast = Fixture::new(disturbance.clone());
        for _ in 0..205 {
            fast.tick(0.01); // ~2.05 s in 205 frames
        }

        let mut slow = Fixture::new(disturbance);
        for _ in 0..41 {
            slow.tick(0.05); // ~2.05 s in 41 frames
        }

        assert_eq!(fast.orchestrator.disturbs_issued(), 8);
        assert_eq!(slow.orchestrator.disturbs_issued(), 8);
    }

    #[test]
    fn wave_snapshot_lands_in_current_slot() {
        let mut fixture = Fixture::new(DisturbanceConfig {
            // Quiet surface; this test only checks the copy.
            interval_s: f32::MAX,
            ..DisturbanceConfig::default()
        });
        fixture.tick(0.03);

        let waves = fixture.orchestrator.waves();
        let slot = fixture.orchestrator.ring().current_slot();
        let vertices = slot.wave_vertices();
        assert_eq!(vertices.len(), waves.vertex_count());

        for i in [0, 64, waves.vertex_count() - 1] {
            assert_eq!(vertices[i].position, waves.position(i).to_array());
            assert_eq!(vertices[i].normal, waves.normal(i).to_array());
            assert!(vertices[i].uv[0] >= 0.0 && vertices[i].uv[0] <= 1.0);
            assert!(vertices[i].uv[1] >= 0.0 && vertices[i].uv[1] <= 1.0);
        }
    }

    #[test]
    fn pass_constants_carry_camera_and_timing() {
        let mut fixture = Fixture::new(DisturbanceConfig::default());
        fixture.tick(0.016);

        let pass = fixture.orchestrator.ring().current_slot().pass_constants();
        assert_eq!(pass.delta_time, 0.016);
        assert_eq!(pass.total_time, fixture.total_s);
        assert_eq!(pass.eye_pos, fixture.camera.eye_position().to_array());
        assert_eq!(pass.near_z, fixture.render_config.near_plane_m);
        assert_eq!(pass.lights[0].strength, [0.6, 0.6, 0.6]);
    }

    #[test]
    fn uv_scroll_wraps_into_unit_interval() {
        let mut fixture = Fixture::new(DisturbanceConfig::default());
        // 0.1 u/s for 15 s crosses 1.0; the offset must wrap, not grow.
        for _ in 0..1500 {
            fixture.tick(0.01);
        }
        assert!(fixture.orchestrator.scroll_u < 1.0);
        assert!(fixture.orchestrator.scroll_u >= 0.0);
    }
}
