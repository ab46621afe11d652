//! Render-item catalog: meshes, materials, and drawable entities partitioned
//! into render layers.
//!
//! Items and materials live in arenas addressed by stable handles; the layer
//! lists hold handles rather than pointers, so nothing dangles if an arena
//! reallocates. Constant-record types here are the exact byte layouts the
//! shaders consume (matching `shader.wgsl` / `billboard.wgsl`).

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};

pub const MAX_LIGHTS: usize = 4;

/// One light record inside the pass constants. Directional lights use
/// `direction` + `strength`; point lights additionally use `position` and the
/// falloff pair. Field order keeps WGSL's vec3 alignment without padding.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct Light {
    pub strength: [f32; 3],
    pub falloff_start: f32,
    pub direction: [f32; 3],
    pub falloff_end: f32,
    pub position: [f32; 3],
    pub spot_power: f32,
}

/// Per-render-item constants, uploaded at the item's object index.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct ObjectConstants {
    pub world: [[f32; 4]; 4],
    pub tex_transform: [[f32; 4]; 4],
}

/// Per-material constants, uploaded at the material's index.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct MaterialConstants {
    pub albedo: [f32; 4],
    pub fresnel_r0: [f32; 3],
    pub roughness: f32,
    pub uv_transform: [[f32; 4]; 4],
}

/// Per-frame pass constants: camera matrices, viewport, timing, fog, lights.
/// Written once per frame into the current ring slot.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct PassConstants {
    pub view: [[f32; 4]; 4],
    pub inv_view: [[f32; 4]; 4],
    pub proj: [[f32; 4]; 4],
    pub inv_proj: [[f32; 4]; 4],
    pub view_proj: [[f32; 4]; 4],
    pub inv_view_proj: [[f32; 4]; 4],
    pub eye_pos: [f32; 3],
    pub _pad0: f32,
    pub render_target_size: [f32; 2],
    pub inv_render_target_size: [f32; 2],
    pub near_z: f32,
    pub far_z: f32,
    pub total_time: f32,
    pub delta_time: f32,
    pub ambient_light: [f32; 4],
    pub fog_color: [f32; 4],
    pub fog_start: f32,
    pub fog_range: f32,
    pub _pad1: [f32; 2],
    pub lights: [Light; MAX_LIGHTS],
}

/// Standard vertex: position, normal, texture coordinate. Also the record
/// format of the dynamic wave vertex buffer.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

/// Billboard record: a world-space anchor point plus quad size. The vertex
/// shader expands each record into a camera-facing quad.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct BillboardVertex {
    pub position: [f32; 3],
    pub size: [f32; 2],
}

/// Draw-order partition. Transparent is last so blending composites over
/// everything already in the depth buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RenderLayer {
    Opaque,
    AlphaTested,
    Billboard,
    Transparent,
}

/// Fixed submission order for correct blending.
pub const LAYER_ORDER: [RenderLayer; 4] = [
    RenderLayer::Opaque,
    RenderLayer::AlphaTested,
    RenderLayer::Billboard,
    RenderLayer::Transparent,
];

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RenderItemHandle(pub usize);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MaterialHandle(pub usize);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MeshHandle(pub usize);

/// CPU-side mesh data. The renderer uploads static meshes once; the wave grid
/// carries only indices because its vertices stream from the frame ring.
pub enum MeshData {
    Standard {
        vertices: Vec<Vertex>,
        indices: Vec<u32>,
    },
    Points {
        vertices: Vec<BillboardVertex>,
    },
    /// Vertex data comes from the current frame slot's wave vertex buffer.
    WaveGrid { indices: Vec<u32> },
}

pub struct Material {
    pub albedo: Vec4,
    pub fresnel_r0: Vec3,
    pub roughness: f32,
    pub uv_transform: Mat4,
    /// Constant-buffer slot for this material
    pub material_index: u32,
    /// Ring slots that still need this material's record re-uploaded
    pub frames_dirty: usize,
}

impl Material {
    pub fn constants(&self) -> MaterialConstants {
        MaterialConstants {
            albedo: self.albedo.to_array(),
            fresnel_r0: self.fresnel_r0.to_array(),
            roughness: self.roughness,
            uv_transform: self.uv_transform.to_cols_array_2d(),
        }
    }
}

pub struct RenderItem {
    pub world: Mat4,
    pub tex_transform: Mat4,
    pub material: MaterialHandle,
    pub mesh: MeshHandle,
    pub index_count: u32,
    /// Constant-buffer slot for this item
    pub object_index: u32,
    /// Ring slots that still need this item's record re-uploaded
    pub frames_dirty: usize,
}

impl RenderItem {
    pub fn constants(&self) -> ObjectConstants {
        ObjectConstants {
            world: self.world.to_cols_array_2d(),
            tex_transform: self.tex_transform.to_cols_array_2d(),
        }
    }
}

/// Arena of drawable entities plus their meshes and materials, partitioned
/// into render layers by handle lists.
pub struct RenderItemCatalog {
    items: Vec<RenderItem>,
    materials: Vec<Material>,
    meshes: Vec<MeshData>,
    layers: [Vec<RenderItemHandle>; 4],
    /// Ring depth; a change must propagate to this many slots.
    ring_depth: usize,
}

impl RenderItemCatalog {
    pub fn new(ring_depth: usize) -> Self {
        Self {
            items: Vec::new(),
            materials: Vec::new(),
            meshes: Vec::new(),
            layers: Default::default(),
            ring_depth,
        }
    }

    pub fn ring_depth(&self) -> usize {
        self.ring_depth
    }

    pub fn add_mesh(&mut self, mesh: MeshData) -> MeshHandle {
        self.meshes.push(mesh);
        MeshHandle(self.meshes.len() - 1)
    }

    pub fn add_material(
        &mut self,
        albedo: Vec4,
        fresnel_r0: Vec3,
        roughness: f32,
    ) -> MaterialHandle {
        let material_index = self.materials.len() as u32;
        self.materials.push(Material {
            albedo,
            fresnel_r0,
            roughness,
            uv_transform: Mat4::IDENTITY,
            material_index,
            // New materials are dirty everywhere so every slot gets a record.
            frames_dirty: self.ring_depth,
        });
        MaterialHandle(self.materials.len() - 1)
    }

    pub fn add_item(
        &mut self,
        layer: RenderLayer,
        world: Mat4,
        tex_transform: Mat4,
        material: MaterialHandle,
        mesh: MeshHandle,
    ) -> RenderItemHandle {
        let index_count = match &self.meshes[mesh.0] {
            MeshData::Standard { indices, .. } | MeshData::WaveGrid { indices } => {
                indices.len() as u32
            }
            MeshData::Points { vertices } => vertices.len() as u32,
        };
        let object_index = self.items.len() as u32;
        self.items.push(RenderItem {
            world,
            tex_transform,
            material,
            mesh,
            index_count,
            object_index,
            frames_dirty: self.ring_depth,
        });
        let handle = RenderItemHandle(self.items.len() - 1);
        self.layers[layer as usize].push(handle);
        handle
    }

    /// Move an item and mark it dirty so every ring slot observes the change
    /// exactly once.
    pub fn set_world(&mut self, handle: RenderItemHandle, world: Mat4) {
        let item = &mut self.items[handle.0];
        item.world = world;
        item.frames_dirty = self.ring_depth;
    }

    /// Replace a material's UV transform and mark it dirty.
    pub fn set_material_uv_transform(&mut self, handle: MaterialHandle, uv_transform: Mat4) {
        let material = &mut self.materials[handle.0];
        material.uv_transform = uv_transform;
        material.frames_dirty = self.ring_depth;
    }

    pub fn item(&self, handle: RenderItemHandle) -> &RenderItem {
        &self.items[handle.0]
    }

    pub fn material(&self, handle: MaterialHandle) -> &Material {
        &self.materials[handle.0]
    }

    pub fn mesh(&self, handle: MeshHandle) -> &MeshData {
        &self.meshes[handle.0]
    }

    pub fn layer_items(&self, layer: RenderLayer) -> &[RenderItemHandle] {
        &self.layers[layer as usize]
    }

    pub fn items_mut(&mut self) -> impl Iterator<Item = &mut RenderItem> {
        self.items.iter_mut()
    }

    pub fn materials_mut(&mut self) -> impl Iterator<Item = &mut Material> {
        self.materials.iter_mut()
    }

    pub fn meshes(&self) -> &[MeshData] {
        &self.meshes
    }

    pub fn object_count(&self) -> usize {
        self.items.len()
    }

    pub fn material_count(&self) -> usize {
        self.materials.len()
    }
}

/// Analytic land height, the rolling-hills shore around the pond.
pub fn hills_height(x: f32, z: f32) -> f32 {
    0.3 * (z * (0.1 * x).sin() + x * (0.1 * z).cos())
}

/// Analytic land normal: n = (-df/dx, 1, -df/dz), normalized.
pub fn hills_normal(x: f32, z: f32) -> Vec3 {
    Vec3::new(
        -0.03 * z * (0.1 * x).cos() - 0.3 * (0.1 * z).cos(),
        1.0,
        -0.3 * (0.1 * x).sin() + 0.03 * x * (0.1 * z).sin(),
    )
    .normalize()
}

/// Build a land grid mesh with the hills height function applied.
pub fn build_land_grid(width: f32, depth: f32, rows: usize, cols: usize) -> MeshData {
    let mut vertices = Vec::with_capacity(rows * cols);
    for r in 0..rows {
        for c in 0..cols {
            let x = -0.5 * width + c as f32 / (cols - 1) as f32 * width;
            let z = 0.5 * depth - r as f32 / (rows - 1) as f32 * depth;
            vertices.push(Vertex {
                position: [x, hills_height(x, z), z],
                normal: hills_normal(x, z).to_array(),
                uv: [c as f32 / (cols - 1) as f32, r as f32 / (rows - 1) as f32],
            });
        }
    }

    MeshData::Standard {
        indices: grid_indices(rows, cols),
        vertices,
    }
}

/// Triangle indices for any row-major grid (two triangles per quad).
pub fn grid_indices(rows: usize, cols: usize) -> Vec<u32> {
    let mut indices = Vec::with_capacity((rows - 1) * (cols - 1) * 6);
    for r in 0..rows - 1 {
        for c in 0..cols - 1 {
            let i = (r * cols + c) as u32;
            let n = cols as u32;
            indices.extend_from_slice(&[i, i + 1, i + n, i + n, i + 1, i + n + 1]);
        }
    }
    indices
}

/// Axis-aligned box mesh (24 vertices, per-face normals).
pub fn build_box(width: f32, height: f32, depth: f32) -> MeshData {
    let (w, h, d) = (0.5 * width, 0.5 * height, 0.5 * depth);
    let faces: [([f32; 3], [f32; 3], [f32; 3]); 6] = [
        ([0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
        ([0.0, 0.0, -1.0], [-1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
        ([1.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.0, 1.0, 0.0]),
        ([-1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0]),
        ([0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, -1.0]),
        ([0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]),
    ];

    let half = Vec3::new(w, h, d);
    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);
    for (face, (normal, tangent, bitangent)) in faces.iter().enumerate() {
        let n = Vec3::from_array(*normal);
        let t = Vec3::from_array(*tangent);
        let b = Vec3::from_array(*bitangent);
        let corners = [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)];
        for (u, v) in corners {
            let p = (n + t * u + b * v) * half;
            vertices.push(Vertex {
                position: p.to_array(),
                normal: *normal,
                uv: [0.5 * (u + 1.0), 0.5 * (1.0 - v)],
            });
        }
        let base = (face * 4) as u32;
        indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }

    MeshData::Standard { vertices, indices }
}

/// Handles the orchestrator needs after scene assembly.
pub struct PondScene {
    pub wave_item: RenderItemHandle,
    pub water_material: MaterialHandle,
}

/// Assemble the fixed pond scene: hilly shore, the dynamic water surface, a
/// wire-fence crate standing in the shallows, and a ring of brush billboards.
/// Meshes and materials stand in for the external asset catalog.
pub fn build_pond_scene(
    catalog: &mut RenderItemCatalog,
    wave_rows: usize,
    wave_cols: usize,
    rng: &mut impl rand::Rng,
) -> PondScene {
    let land_mesh = catalog.add_mesh(build_land_grid(160.0, 160.0, 50, 50));
    let water_mesh = catalog.add_mesh(MeshData::WaveGrid {
        indices: grid_indices(wave_rows, wave_cols),
    });
    let crate_mesh = catalog.add_mesh(build_box(10.0, 10.0, 10.0));
    let brush_mesh = {
        let mut points = Vec::with_capacity(8);
        for _ in 0..8 {
            let x = rng.gen_range(-60.0..60.0_f32);
            let z = rng.gen_range(-60.0..60.0_f32);
            let y = hills_height(x, z) + 9.0;
            points.push(BillboardVertex {
                position: [x, y, z],
                size: [18.0, 18.0],
            });
        }
        catalog.add_mesh(MeshData::Points { vertices: points })
    };

    let grass = catalog.add_material(Vec4::ONE, Vec3::splat(0.01), 0.125);
    let water = catalog.add_material(Vec4::new(0.2, 0.4, 0.6, 0.5), Vec3::splat(0.1), 0.0);
    let wirefence = catalog.add_material(Vec4::new(0.9, 0.8, 0.6, 1.0), Vec3::splat(0.02), 0.25);
    let brush = catalog.add_material(Vec4::new(0.3, 0.6, 0.25, 1.0), Vec3::splat(0.01), 0.8);

    catalog.add_item(
        RenderLayer::Opaque,
        Mat4::IDENTITY,
        Mat4::from_scale(Vec3::new(5.0, 5.0, 1.0)),
        grass,
        land_mesh,
    );
    let wave_item = catalog.add_item(
        RenderLayer::Transparent,
        Mat4::IDENTITY,
        Mat4::from_scale(Vec3::new(5.0, 5.0, 1.0)),
        water,
        water_mesh,
    );
    catalog.add_item(
        RenderLayer::AlphaTested,
        Mat4::from_translation(Vec3::new(0.0, 6.0, -15.0))
            * Mat4::from_scale(Vec3::new(1.0, 0.6, 1.0)),
        Mat4::IDENTITY,
        wirefence,
        crate_mesh,
    );
    catalog.add_item(
        RenderLayer::Billboard,
        Mat4::IDENTITY,
        Mat4::IDENTITY,
        brush,
        brush_mesh,
    );

    PondScene {
        wave_item,
        water_material: water,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn constant_record_sizes_match_shader_layout() {
        assert_eq!(std::mem::size_of::<Light>(), 48);
        assert_eq!(std::mem::size_of::<ObjectConstants>(), 128);
        assert_eq!(std::mem::size_of::<MaterialConstants>(), 96);
        // 6 mat4 + eye/pad + viewport + scalars + ambient + fog + 4 lights
        assert_eq!(std::mem::size_of::<PassConstants>(), 672);
        assert_eq!(std::mem::size_of::<Vertex>(), 32);
        assert_eq!(std::mem::size_of::<BillboardVertex>(), 20);
    }

    #[test]
    fn object_indices_are_stable_and_sequential() {
        let mut catalog = RenderItemCatalog::new(3);
        let mesh = catalog.add_mesh(build_box(1.0, 1.0, 1.0));
        let mat = catalog.add_material(Vec4::ONE, Vec3::splat(0.02), 0.25);

        let a = catalog.add_item(RenderLayer::Opaque, Mat4::IDENTITY, Mat4::IDENTITY, mat, mesh);
        let b = catalog.add_item(RenderLayer::Opaque, Mat4::IDENTITY, Mat4::IDENTITY, mat, mesh);

        assert_eq!(catalog.item(a).object_index, 0);
        assert_eq!(catalog.item(b).object_index, 1);
        assert_eq!(catalog.layer_items(RenderLayer::Opaque), &[a, b]);
        assert!(catalog.layer_items(RenderLayer::Transparent).is_empty());
    }

    #[test]
    fn set_world_marks_item_dirty_for_every_slot() {
        let mut catalog = RenderItemCatalog::new(3);
        let mesh = catalog.add_mesh(build_box(1.0, 1.0, 1.0));
        let mat = catalog.add_material(Vec4::ONE, Vec3::splat(0.02), 0.25);
        let item = catalog.add_item(RenderLayer::Opaque, Mat4::IDENTITY, Mat4::IDENTITY, mat, mesh);

        // Drain the initial dirtiness.
        for it in catalog.items_mut() {
            it.frames_dirty = 0;
        }

        catalog.set_world(item, Mat4::from_translation(Vec3::X));
        assert_eq!(catalog.item(item).frames_dirty, 3);
    }

    #[test]
    fn grid_indices_cover_every_quad() {
        let indices = grid_indices(3, 4);
        assert_eq!(indices.len(), 2 * 3 * 6);
        assert!(indices.iter().all(|&i| i < 12));
    }

    #[test]
    fn hills_normal_is_unit_length() {
        for (x, z) in [(0.0, 0.0), (10.0, -4.0), (-33.0, 21.0)] {
            assert!((hills_normal(x, z).length() - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn pond_scene_populates_every_layer() {
        let mut catalog = RenderItemCatalog::new(3);
        let mut rng = rand::rngs::StdRng::seed_from_u64(1);
        let scene = build_pond_scene(&mut catalog, 128, 128, &mut rng);

        for layer in LAYER_ORDER {
            assert!(
                !catalog.layer_items(layer).is_empty(),
                "layer {layer:?} is empty"
            );
        }

        // The water item streams its vertices from the frame ring.
        let wave_item = catalog.item(scene.wave_item);
        assert!(matches!(
            catalog.mesh(wave_item.mesh),
            MeshData::WaveGrid { .. }
        ));
        assert_eq!(wave_item.index_count, 127 * 127 * 6);
    }
}
