//! Rendering system with wgpu pipeline and buffer management.
//!
//! GPU-side counterpart of the frame ring: every ring slot owns its own pass,
//! object, and material uniform buffers plus a dynamic wave vertex buffer, so
//! the CPU can fill slot N while the GPU still reads slot N-1. Object and
//! material constants live in one buffer per slot, indexed with dynamic
//! offsets at a 256-byte stride.

use std::mem::size_of;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use bytemuck::Zeroable;
use tracing::{debug, info};
use wgpu::util::DeviceExt;

use crate::frame_ring::{FenceTimeline, FrameResourceRing};
use crate::params::RenderConfig;
use crate::scene::{
    BillboardVertex, LAYER_ORDER, MaterialConstants, MeshData, ObjectConstants, PassConstants,
    RenderItemCatalog, RenderLayer, Vertex,
};

/// Stride between constant records in the per-slot object and material
/// buffers. Matches wgpu's required uniform buffer offset alignment.
const CONSTANT_STRIDE: u64 = 256;

const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// Monotonic submission fence backed by `on_submitted_work_done`. `signal`
/// hands out the next value on the control thread; the completion callback
/// fires on the device's callback path once the GPU retires that submission.
pub struct GpuFence {
    device: Arc<wgpu::Device>,
    next: AtomicU64,
    completed: Arc<AtomicU64>,
}

impl GpuFence {
    pub fn new(device: Arc<wgpu::Device>) -> Self {
        Self {
            device,
            next: AtomicU64::new(0),
            completed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Arrange for `value` to become completed once all work submitted so far
    /// has retired. Call after `queue.submit` for the frame that `value`
    /// stamps.
    fn notify_on_complete(&self, queue: &wgpu::Queue, value: u64) {
        let completed = Arc::clone(&self.completed);
        queue.on_submitted_work_done(move || {
            // Values are handed out in submission order, so a plain max works.
            completed.fetch_max(value, Ordering::Release);
        });
    }
}

impl FenceTimeline for GpuFence {
    fn signal(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn completed(&self) -> u64 {
        self.completed.load(Ordering::Acquire)
    }

    fn wait(&self, value: u64) {
        while self.completed() < value {
            // Blocks until the queue drains, which runs pending
            // on_submitted_work_done callbacks.
            self.device.poll(wgpu::Maintain::Wait);
        }
    }
}

/// GPU buffers for one mesh, mirroring the [`MeshData`] variants.
enum GpuMesh {
    Standard {
        vertex_buffer: wgpu::Buffer,
        index_buffer: wgpu::Buffer,
    },
    /// Vertices stream from the ring slot each frame; only the index
    /// topology is static.
    WaveGrid { index_buffer: wgpu::Buffer },
    Points {
        vertex_buffer: wgpu::Buffer,
        instance_count: u32,
    },
}

/// Per-ring-slot GPU resources.
struct SlotResources {
    pass_buffer: wgpu::Buffer,
    object_buffer: wgpu::Buffer,
    material_buffer: wgpu::Buffer,
    wave_vertex_buffer: wgpu::Buffer,
    pass_bind_group: wgpu::BindGroup,
    object_bind_group: wgpu::BindGroup,
    material_bind_group: wgpu::BindGroup,
}

pub struct RenderSystem {
    surface: wgpu::Surface<'static>,
    device: Arc<wgpu::Device>,
    queue: wgpu::Queue,
    surface_config: wgpu::SurfaceConfiguration,
    depth_view: wgpu::TextureView,

    opaque_pipeline: wgpu::RenderPipeline,
    alpha_tested_pipeline: wgpu::RenderPipeline,
    billboard_pipeline: wgpu::RenderPipeline,
    transparent_pipeline: wgpu::RenderPipeline,

    meshes: Vec<GpuMesh>,
    slots: Vec<SlotResources>,

    fence: Arc<GpuFence>,
}

impl RenderSystem {
    /// Create the rendering system: device, surface, layer pipelines, static
    /// mesh buffers, and one set of constant buffers per ring slot.
    pub async fn new(
        window: Arc<winit::window::Window>,
        catalog: &RenderItemCatalog,
        wave_vertex_count: usize,
        config: &RenderConfig,
    ) -> Result<Self> {
        let size = window.inner_size();

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        // Window must have 'static lifetime via Arc.
        let surface = instance
            .create_surface(window)
            .context("failed to create surface")?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| anyhow!("failed to find suitable GPU adapter"))?;

        info!(adapter = %adapter.get_info().name, "selected GPU adapter");

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Main Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    memory_hints: Default::default(),
                },
                None,
            )
            .await
            .context("failed to request device")?;
        // Shared with the fence, which polls it while waiting.
        let device = Arc::new(device);

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .copied()
            .unwrap_or(surface_caps.formats[0]);

        let surface_config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::Fifo,
            alpha_mode: surface_caps.alpha_modes[0],
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &surface_config);

        let depth_view = create_depth_view(&device, &surface_config);

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Scene Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shader.wgsl").into()),
        });
        let billboard_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Billboard Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("billboard.wgsl").into()),
        });

        // Group 0: per-pass constants. Groups 1 and 2: per-object and
        // per-material records with dynamic offsets.
        let pass_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Pass Bind Group Layout"),
            entries: &[uniform_layout_entry(0, false, size_of::<PassConstants>())],
        });
        let object_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Object Bind Group Layout"),
            entries: &[uniform_layout_entry(0, true, size_of::<ObjectConstants>())],
        });
        let material_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Material Bind Group Layout"),
            entries: &[uniform_layout_entry(0, true, size_of::<MaterialConstants>())],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Render Pipeline Layout"),
            bind_group_layouts: &[&pass_layout, &object_layout, &material_layout],
            push_constant_ranges: &[],
        });

        let standard_buffers = [wgpu::VertexBufferLayout {
            array_stride: size_of::<Vertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[
                wgpu::VertexAttribute {
                    offset: 0,
                    shader_location: 0,
                    format: wgpu::VertexFormat::Float32x3,
                },
                wgpu::VertexAttribute {
                    offset: size_of::<[f32; 3]>() as wgpu::BufferAddress,
                    shader_location: 1,
                    format: wgpu::VertexFormat::Float32x3,
                },
                wgpu::VertexAttribute {
                    offset: size_of::<[f32; 6]>() as wgpu::BufferAddress,
                    shader_location: 2,
                    format: wgpu::VertexFormat::Float32x2,
                },
            ],
        }];

        // One quad per point, expanded in the vertex shader.
        let billboard_buffers = [wgpu::VertexBufferLayout {
            array_stride: size_of::<BillboardVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Instance,
            attributes: &[
                wgpu::VertexAttribute {
                    offset: 0,
                    shader_location: 0,
                    format: wgpu::VertexFormat::Float32x3,
                },
                wgpu::VertexAttribute {
                    offset: size_of::<[f32; 3]>() as wgpu::BufferAddress,
                    shader_location: 1,
                    format: wgpu::VertexFormat::Float32x2,
                },
            ],
        }];

        let opaque_pipeline = build_pipeline(
            &device,
            &pipeline_layout,
            &shader,
            "fs_main",
            &standard_buffers,
            surface_format,
            PipelineKind::Opaque,
        );
        let alpha_tested_pipeline = build_pipeline(
            &device,
            &pipeline_layout,
            &shader,
            "fs_alpha_test",
            &standard_buffers,
            surface_format,
            PipelineKind::AlphaTested,
        );
        let transparent_pipeline = build_pipeline(
            &device,
            &pipeline_layout,
            &shader,
            "fs_main",
            &standard_buffers,
            surface_format,
            PipelineKind::Transparent,
        );
        let billboard_pipeline = build_pipeline(
            &device,
            &pipeline_layout,
            &billboard_shader,
            "fs_main",
            &billboard_buffers,
            surface_format,
            PipelineKind::Billboard,
        );

        let meshes = upload_static_meshes(&device, catalog);

        let slots = (0..catalog.ring_depth())
            .map(|i| {
                build_slot_resources(
                    &device,
                    &pass_layout,
                    &object_layout,
                    &material_layout,
                    catalog,
                    wave_vertex_count,
                    i,
                )
            })
            .collect();

        info!(
            width = surface_config.width,
            height = surface_config.height,
            ring_depth = catalog.ring_depth(),
            objects = catalog.object_count(),
            "render system ready"
        );
        debug!(fov_degrees = config.fov_degrees, "projection configured");

        let fence = Arc::new(GpuFence::new(Arc::clone(&device)));

        Ok(Self {
            surface,
            device,
            queue,
            surface_config,
            depth_view,
            opaque_pipeline,
            alpha_tested_pipeline,
            billboard_pipeline,
            transparent_pipeline,
            meshes,
            slots,
            fence,
        })
    }

    pub fn fence(&self) -> Arc<GpuFence> {
        Arc::clone(&self.fence)
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.surface_config.width = width.max(1);
        self.surface_config.height = height.max(1);
        self.surface.configure(&self.device, &self.surface_config);
        self.depth_view = create_depth_view(&self.device, &self.surface_config);
    }

    /// Upload the current slot's staged data, record one pass drawing every
    /// layer in fixed order, submit, and present. Returns the fence value the
    /// caller must stamp into the ring for this frame.
    pub fn render(
        &self,
        catalog: &RenderItemCatalog,
        ring: &FrameResourceRing<Arc<GpuFence>>,
    ) -> Result<u64, wgpu::SurfaceError> {
        let slot = ring.current_slot();
        let resources = &self.slots[ring.current_index()];

        for (index, record) in slot.object_uploads() {
            self.queue.write_buffer(
                &resources.object_buffer,
                u64::from(*index) * CONSTANT_STRIDE,
                bytemuck::bytes_of(record),
            );
        }
        for (index, record) in slot.material_uploads() {
            self.queue.write_buffer(
                &resources.material_buffer,
                u64::from(*index) * CONSTANT_STRIDE,
                bytemuck::bytes_of(record),
            );
        }
        self.queue.write_buffer(
            &resources.pass_buffer,
            0,
            bytemuck::bytes_of(slot.pass_constants()),
        );
        self.queue.write_buffer(
            &resources.wave_vertex_buffer,
            0,
            bytemuck::cast_slice(slot.wave_vertices()),
        );

        let output = self.surface.get_current_texture()?;
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Render Encoder"),
            });

        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Render Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        // Clear to the fog colour so distant geometry fades
                        // into the backdrop seamlessly.
                        load: wgpu::LoadOp::Clear(wgpu::Color {
                            r: 0.7,
                            g: 0.7,
                            b: 0.7,
                            a: 1.0,
                        }),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &self.depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            render_pass.set_bind_group(0, &resources.pass_bind_group, &[]);

            for layer in LAYER_ORDER {
                let pipeline = match layer {
                    RenderLayer::Opaque => &self.opaque_pipeline,
                    RenderLayer::AlphaTested => &self.alpha_tested_pipeline,
                    RenderLayer::Billboard => &self.billboard_pipeline,
                    RenderLayer::Transparent => &self.transparent_pipeline,
                };
                render_pass.set_pipeline(pipeline);

                for &handle in catalog.layer_items(layer) {
                    let item = catalog.item(handle);
                    let material = catalog.material(item.material);

                    render_pass.set_bind_group(
                        1,
                        &resources.object_bind_group,
                        &[item.object_index * CONSTANT_STRIDE as u32],
                    );
                    render_pass.set_bind_group(
                        2,
                        &resources.material_bind_group,
                        &[material.material_index * CONSTANT_STRIDE as u32],
                    );

                    match &self.meshes[item.mesh.0] {
                        GpuMesh::Standard {
                            vertex_buffer,
                            index_buffer,
                        } => {
                            render_pass.set_vertex_buffer(0, vertex_buffer.slice(..));
                            render_pass
                                .set_index_buffer(index_buffer.slice(..), wgpu::IndexFormat::Uint32);
                            render_pass.draw_indexed(0..item.index_count, 0, 0..1);
                        }
                        GpuMesh::WaveGrid { index_buffer } => {
                            render_pass
                                .set_vertex_buffer(0, resources.wave_vertex_buffer.slice(..));
                            render_pass
                                .set_index_buffer(index_buffer.slice(..), wgpu::IndexFormat::Uint32);
                            render_pass.draw_indexed(0..item.index_count, 0, 0..1);
                        }
                        GpuMesh::Points { vertex_buffer, instance_count } => {
                            render_pass.set_vertex_buffer(0, vertex_buffer.slice(..));
                            render_pass.draw(0..6, 0..*instance_count);
                        }
                    }
                }
            }
        }

        self.queue.submit(std::iter::once(encoder.finish()));

        let fence_value = self.fence.signal();
        self.fence.notify_on_complete(&self.queue, fence_value);

        output.present();
        Ok(fence_value)
    }
}

impl Drop for RenderSystem {
    fn drop(&mut self) {
        // Let in-flight work retire before buffers are released.
        self.device.poll(wgpu::Maintain::Wait);
    }
}

enum PipelineKind {
    Opaque,
    AlphaTested,
    Billboard,
    Transparent,
}

fn uniform_layout_entry(
    binding: u32,
    dynamic: bool,
    min_size: usize,
) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: dynamic,
            min_binding_size: wgpu::BufferSize::new(min_size as u64),
        },
        count: None,
    }
}

fn build_pipeline(
    device: &wgpu::Device,
    layout: &wgpu::PipelineLayout,
    shader: &wgpu::ShaderModule,
    fragment_entry: &str,
    buffers: &[wgpu::VertexBufferLayout],
    format: wgpu::TextureFormat,
    kind: PipelineKind,
) -> wgpu::RenderPipeline {
    let (label, blend, cull_mode, depth_write) = match kind {
        PipelineKind::Opaque => ("Opaque Pipeline", None, Some(wgpu::Face::Back), true),
        // Foliage is visible from both sides, so no culling here.
        PipelineKind::AlphaTested => ("Alpha Tested Pipeline", None, None, true),
        PipelineKind::Billboard => ("Billboard Pipeline", None, None, true),
        PipelineKind::Transparent => (
            "Transparent Pipeline",
            Some(wgpu::BlendState::ALPHA_BLENDING),
            Some(wgpu::Face::Back),
            // Transparent geometry reads depth but must not occlude itself.
            false,
        ),
    };

    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module: shader,
            entry_point: Some("vs_main"),
            buffers,
            compilation_options: Default::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: shader,
            entry_point: Some(fragment_entry),
            targets: &[Some(wgpu::ColorTargetState {
                format,
                blend,
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: Default::default(),
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            strip_index_format: None,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode,
            polygon_mode: wgpu::PolygonMode::Fill,
            unclipped_depth: false,
            conservative: false,
        },
        depth_stencil: Some(wgpu::DepthStencilState {
            format: DEPTH_FORMAT,
            depth_write_enabled: depth_write,
            depth_compare: wgpu::CompareFunction::Less,
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        }),
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
        cache: None,
    })
}

fn create_depth_view(
    device: &wgpu::Device,
    config: &wgpu::SurfaceConfiguration,
) -> wgpu::TextureView {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Depth Texture"),
        size: wgpu::Extent3d {
            width: config.width,
            height: config.height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: DEPTH_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });
    texture.create_view(&wgpu::TextureViewDescriptor::default())
}

fn upload_static_meshes(device: &wgpu::Device, catalog: &RenderItemCatalog) -> Vec<GpuMesh> {
    catalog
        .meshes()
        .iter()
        .enumerate()
        .map(|(i, mesh)| match mesh {
            MeshData::Standard { vertices, indices } => GpuMesh::Standard {
                vertex_buffer: device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(&format!("Mesh {i} Vertices")),
                    contents: bytemuck::cast_slice(vertices),
                    usage: wgpu::BufferUsages::VERTEX,
                }),
                index_buffer: device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(&format!("Mesh {i} Indices")),
                    contents: bytemuck::cast_slice(indices),
                    usage: wgpu::BufferUsages::INDEX,
                }),
            },
            MeshData::WaveGrid { indices } => GpuMesh::WaveGrid {
                index_buffer: device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(&format!("Mesh {i} Indices")),
                    contents: bytemuck::cast_slice(indices),
                    usage: wgpu::BufferUsages::INDEX,
                }),
            },
            MeshData::Points { vertices } => GpuMesh::Points {
                vertex_buffer: device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(&format!("Mesh {i} Points")),
                    contents: bytemuck::cast_slice(vertices),
                    usage: wgpu::BufferUsages::VERTEX,
                }),
                instance_count: vertices.len() as u32,
            },
        })
        .collect()
}

fn build_slot_resources(
    device: &wgpu::Device,
    pass_layout: &wgpu::BindGroupLayout,
    object_layout: &wgpu::BindGroupLayout,
    material_layout: &wgpu::BindGroupLayout,
    catalog: &RenderItemCatalog,
    wave_vertex_count: usize,
    slot_index: usize,
) -> SlotResources {
    let pass_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some(&format!("Slot {slot_index} Pass Constants")),
        contents: bytemuck::bytes_of(&PassConstants::zeroed()),
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
    });
    let object_buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(&format!("Slot {slot_index} Object Constants")),
        size: catalog.object_count() as u64 * CONSTANT_STRIDE,
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    let material_buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(&format!("Slot {slot_index} Material Constants")),
        size: catalog.material_count() as u64 * CONSTANT_STRIDE,
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    let wave_vertex_buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(&format!("Slot {slot_index} Wave Vertices")),
        size: (wave_vertex_count * size_of::<Vertex>()) as u64,
        usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    let pass_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(&format!("Slot {slot_index} Pass Bind Group")),
        layout: pass_layout,
        entries: &[wgpu::BindGroupEntry {
            binding: 0,
            resource: pass_buffer.as_entire_binding(),
        }],
    });
    let object_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(&format!("Slot {slot_index} Object Bind Group")),
        layout: object_layout,
        entries: &[wgpu::BindGroupEntry {
            binding: 0,
            resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                buffer: &object_buffer,
                offset: 0,
                size: wgpu::BufferSize::new(size_of::<ObjectConstants>() as u64),
            }),
        }],
    });
    let material_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(&format!("Slot {slot_index} Material Bind Group")),
        layout: material_layout,
        entries: &[wgpu::BindGroupEntry {
            binding: 0,
            resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                buffer: &material_buffer,
                offset: 0,
                size: wgpu::BufferSize::new(size_of::<MaterialConstants>() as u64),
            }),
        }],
    });

    SlotResources {
        pass_buffer,
        object_buffer,
        material_buffer,
        wave_vertex_buffer,
        pass_bind_group,
        object_bind_group,
        material_bind_group,
    }
}
