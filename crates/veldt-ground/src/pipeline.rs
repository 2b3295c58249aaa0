//! wgpu pipelines for the ground pass.
//!
//! Three pipelines share one bind group layout: an opaque pipeline for the
//! base texture layer, an alpha-blended pipeline for every further layer
//! (the per-corner weight rides in the vertex alpha channel), and a
//! depth-only pipeline for shadow and early-depth passes that reads just
//! the position buffer. Ground texture coordinates are derived from world
//! position, so no UV buffer exists; the fog mask is sampled the same way
//! and composited in the fragment shader.

use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use tracing::debug;
use wgpu::util::DeviceExt;

/// Depth buffer format the ground pipelines are built against.
pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

const GROUND_SHADER: &str = r#"
struct Camera {
    view_proj: mat4x4<f32>,
};

struct FogParams {
    // 1 / fog texture edge length, for world-to-texel mapping.
    inv_size: f32,
    // Nonzero when the fog overlay is composited.
    enabled: u32,
    _pad0: u32,
    _pad1: u32,
};

@group(0) @binding(0) var<uniform> camera: Camera;
@group(0) @binding(1) var layer_texture: texture_2d<f32>;
@group(0) @binding(2) var layer_sampler: sampler;
@group(0) @binding(3) var fog_texture: texture_2d<f32>;
@group(0) @binding(4) var fog_sampler: sampler;
@group(0) @binding(5) var<uniform> fog: FogParams;

struct VsIn {
    @location(0) position: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @location(2) weight: vec4<f32>,
};

struct VsOut {
    @builtin(position) clip: vec4<f32>,
    @location(0) world: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @location(2) weight: vec4<f32>,
};

@vertex
fn vs_main(in: VsIn) -> VsOut {
    var out: VsOut;
    out.clip = camera.view_proj * vec4<f32>(in.position, 1.0);
    out.world = in.position;
    out.normal = in.normal;
    out.weight = in.weight;
    return out;
}

@vertex
fn vs_depth(@location(0) position: vec3<f32>) -> @builtin(position) vec4<f32> {
    return camera.view_proj * vec4<f32>(position, 1.0);
}

const SUN_DIR: vec3<f32> = vec3<f32>(0.4, 0.3, 0.866);

@fragment
fn fs_main(in: VsOut) -> @location(0) vec4<f32> {
    // Object-linear texture coordinates from the world position.
    let uv = in.world.xy * 0.2;
    var color = textureSample(layer_texture, layer_sampler, uv);

    let light = max(dot(normalize(in.normal), normalize(SUN_DIR)), 0.0);
    color = vec4<f32>(color.rgb * (0.35 + 0.65 * light), color.a);

    if fog.enabled != 0u {
        // Cell (x, y) sits at texel (x + 1, y + 1); grid y is -world y.
        let fog_uv = vec2<f32>(in.world.x + 1.0, -in.world.y + 1.0) * fog.inv_size;
        let mask = textureSample(fog_texture, fog_sampler, fog_uv).r;
        color = vec4<f32>(color.rgb * mask, color.a);
    }

    return vec4<f32>(color.rgb, color.a * in.weight.a);
}
"#;

/// Camera uniform block.
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct CameraUniform {
    /// Combined view-projection matrix, column major.
    pub view_proj: [[f32; 4]; 4],
}

/// Fog compositing uniform block.
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct FogUniform {
    /// Reciprocal of the fog texture edge length.
    pub inv_size: f32,
    /// Nonzero when fog is composited.
    pub enabled: u32,
    _pad: [u32; 2],
}

/// The shared pipelines and static resources of the ground pass.
#[derive(Debug)]
pub struct GroundPipelines {
    bind_group_layout: wgpu::BindGroupLayout,
    opaque: wgpu::RenderPipeline,
    blend: wgpu::RenderPipeline,
    depth_only: wgpu::RenderPipeline,
    camera_buffer: wgpu::Buffer,
    fog_buffer: wgpu::Buffer,
    layer_sampler: wgpu::Sampler,
    fog_sampler: wgpu::Sampler,
    fallback_view: wgpu::TextureView,
}

impl GroundPipelines {
    /// Builds the pipelines for the given color target format.
    #[must_use]
    pub fn new(device: &wgpu::Device, surface_format: wgpu::TextureFormat) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("ground-shader"),
            source: wgpu::ShaderSource::Wgsl(GROUND_SHADER.into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("ground-bind-group-layout"),
            entries: &[
                // camera
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                // layer texture
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                // layer sampler
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                // fog texture
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                // fog sampler
                wgpu::BindGroupLayoutEntry {
                    binding: 4,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                // fog params
                wgpu::BindGroupLayoutEntry {
                    binding: 5,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("ground-pipeline-layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let position_layout = wgpu::VertexBufferLayout {
            array_stride: 12,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[wgpu::VertexAttribute {
                format: wgpu::VertexFormat::Float32x3,
                offset: 0,
                shader_location: 0,
            }],
        };
        let normal_layout = wgpu::VertexBufferLayout {
            array_stride: 12,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[wgpu::VertexAttribute {
                format: wgpu::VertexFormat::Float32x3,
                offset: 0,
                shader_location: 1,
            }],
        };
        let weight_layout = wgpu::VertexBufferLayout {
            array_stride: 4,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[wgpu::VertexAttribute {
                format: wgpu::VertexFormat::Unorm8x4,
                offset: 0,
                shader_location: 2,
            }],
        };

        let primitive = wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            strip_index_format: None,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: None,
            polygon_mode: wgpu::PolygonMode::Fill,
            unclipped_depth: false,
            conservative: false,
        };
        let depth_stencil = wgpu::DepthStencilState {
            format: DEPTH_FORMAT,
            depth_write_enabled: true,
            depth_compare: wgpu::CompareFunction::LessEqual,
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        };

        let make_ground = |label: &str, blend: Option<wgpu::BlendState>| {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(label),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &shader,
                    entry_point: Some("vs_main"),
                    buffers: &[
                        position_layout.clone(),
                        normal_layout.clone(),
                        weight_layout.clone(),
                    ],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &shader,
                    entry_point: Some("fs_main"),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: surface_format,
                        blend,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                }),
                primitive,
                depth_stencil: Some(depth_stencil.clone()),
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            })
        };

        let opaque = make_ground("ground-pipeline-opaque", None);
        let blend = make_ground(
            "ground-pipeline-blend",
            Some(wgpu::BlendState::ALPHA_BLENDING),
        );

        let depth_only = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("ground-pipeline-depth"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_depth"),
                buffers: &[position_layout.clone()],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: None,
            primitive,
            depth_stencil: Some(depth_stencil),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        let camera_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("ground-camera"),
            contents: bytemuck::bytes_of(&CameraUniform {
                view_proj: Mat4::IDENTITY.to_cols_array_2d(),
            }),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let fog_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("ground-fog-params"),
            contents: bytemuck::bytes_of(&FogUniform {
                inv_size: 0.0,
                enabled: 0,
                _pad: [0; 2],
            }),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let layer_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("ground-layer-sampler"),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::Repeat,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });
        let fog_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("ground-fog-sampler"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        // 1x1 white stand-in for texture layers that failed to load; the
        // frame keeps rendering with a solid color instead of aborting.
        let fallback_texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("ground-fallback-texture"),
            size: wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8UnormSrgb,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let fallback_view = fallback_texture.create_view(&wgpu::TextureViewDescriptor::default());

        debug!(format = ?surface_format, "created ground pipelines");

        Self {
            bind_group_layout,
            opaque,
            blend,
            depth_only,
            camera_buffer,
            fog_buffer,
            layer_sampler,
            fog_sampler,
            fallback_view,
        }
    }

    /// Pipeline for the base texture layer.
    #[must_use]
    pub fn opaque(&self) -> &wgpu::RenderPipeline {
        &self.opaque
    }

    /// Pipeline for blended overlay layers.
    #[must_use]
    pub fn blend(&self) -> &wgpu::RenderPipeline {
        &self.blend
    }

    /// Position-only pipeline for depth passes.
    #[must_use]
    pub fn depth_only(&self) -> &wgpu::RenderPipeline {
        &self.depth_only
    }

    /// Uploads the frame's view-projection matrix.
    pub fn set_camera(&self, queue: &wgpu::Queue, view_proj: Mat4) {
        queue.write_buffer(
            &self.camera_buffer,
            0,
            bytemuck::bytes_of(&CameraUniform {
                view_proj: view_proj.to_cols_array_2d(),
            }),
        );
    }

    /// Uploads the fog compositing parameters.
    pub fn set_fog(&self, queue: &wgpu::Queue, texture_size: u32, enabled: bool) {
        queue.write_buffer(
            &self.fog_buffer,
            0,
            bytemuck::bytes_of(&FogUniform {
                inv_size: if texture_size == 0 {
                    0.0
                } else {
                    1.0 / texture_size as f32
                },
                enabled: u32::from(enabled),
                _pad: [0; 2],
            }),
        );
    }

    /// Builds the bind group for one texture layer, substituting the
    /// fallback texture where a view is missing.
    #[must_use]
    pub fn layer_bind_group(
        &self,
        device: &wgpu::Device,
        layer_view: Option<&wgpu::TextureView>,
        fog_view: Option<&wgpu::TextureView>,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("ground-layer-bind-group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.camera_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(
                        layer_view.unwrap_or(&self.fallback_view),
                    ),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(&self.layer_sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::TextureView(
                        fog_view.unwrap_or(&self.fallback_view),
                    ),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: wgpu::BindingResource::Sampler(&self.fog_sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 5,
                    resource: self.fog_buffer.as_entire_binding(),
                },
            ],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_blocks_are_tightly_packed() {
        assert_eq!(std::mem::size_of::<CameraUniform>(), 64);
        assert_eq!(std::mem::size_of::<FogUniform>(), 16);
    }

    #[test]
    fn test_shader_has_all_entry_points() {
        assert!(GROUND_SHADER.contains("fn vs_main"));
        assert!(GROUND_SHADER.contains("fn vs_depth"));
        assert!(GROUND_SHADER.contains("fn fs_main"));
    }
}
