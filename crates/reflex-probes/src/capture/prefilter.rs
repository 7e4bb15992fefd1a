//! GGX prefilter producing the radiance mip chain

use wgpu::util::DeviceExt;

use super::{RadianceMap, RADIANCE_FORMAT};
use crate::context::GpuContext;
use crate::shaders::PREFILTER_SHADER;

/// Threads per workgroup along x and y in `cs_prefilter`.
pub const PREFILTER_WORKGROUP_SIZE: u32 = 8;

/// Per-mip uniform for the prefilter pass
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PrefilterParams {
    pub roughness: f32,
    pub face_size: u32,
    pub sample_count: u32,
    pub mip_level: u32,
}

/// Edge length of `mip` for a cube of edge `base`.
pub fn mip_size(base: u32, mip: u32) -> u32 {
    (base >> mip.min(31)).max(1)
}

/// Roughness mip `mip` is convolved for, spread linearly so the last mip is
/// fully rough.
pub fn roughness_for_mip(mip: u32, mip_levels: u32) -> f32 {
    if mip_levels <= 1 {
        return 0.0;
    }
    (mip as f32 / (mip_levels - 1) as f32).min(1.0)
}

/// Workgroups covering every texel of all six faces.
pub fn dispatch_size(face_size: u32) -> (u32, u32, u32) {
    let groups = face_size.div_ceil(PREFILTER_WORKGROUP_SIZE);
    (groups, groups, 6)
}

pub struct RadiancePrefilter {
    pipeline: wgpu::ComputePipeline,
    layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
}

impl RadiancePrefilter {
    pub fn new(device: &wgpu::Device) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Probe Prefilter Shader"),
            source: wgpu::ShaderSource::Wgsl(PREFILTER_SHADER.into()),
        });

        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Probe Prefilter Bind Group Layout"),
            entries: &[
                // Binding 0: Prefilter params
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                // Binding 1: Captured cube
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::Cube,
                        multisampled: false,
                    },
                    count: None,
                },
                // Binding 2: Source sampler
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                // Binding 3: Destination mip, all six faces
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::StorageTexture {
                        access: wgpu::StorageTextureAccess::WriteOnly,
                        format: RADIANCE_FORMAT,
                        view_dimension: wgpu::TextureViewDimension::D2Array,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Probe Prefilter Pipeline Layout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Probe Prefilter Pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: "cs_prefilter",
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            cache: None,
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Probe Prefilter Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        Self {
            pipeline,
            layout,
            sampler,
        }
    }

    /// Convolve `source` (a `size` cube) into a new radiance map with
    /// `mip_levels` mips. Mip 0 is a straight copy.
    pub fn run(
        &self,
        gpu: &GpuContext,
        source: &wgpu::Texture,
        size: u32,
        mip_levels: u32,
        sample_count: u32,
    ) -> RadianceMap {
        let device = &gpu.device;
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Probe Radiance Map"),
            size: wgpu::Extent3d {
                width: size,
                height: size,
                depth_or_array_layers: 6,
            },
            mip_level_count: mip_levels,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: RADIANCE_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::STORAGE_BINDING,
            view_formats: &[],
        });

        let source_view = source.create_view(&wgpu::TextureViewDescriptor {
            label: Some("Probe Capture Cube"),
            dimension: Some(wgpu::TextureViewDimension::Cube),
            ..Default::default()
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Probe Prefilter Encoder"),
        });

        for mip in 0..mip_levels {
            let face_size = mip_size(size, mip);
            let params = PrefilterParams {
                roughness: roughness_for_mip(mip, mip_levels),
                face_size,
                sample_count: sample_count.max(1),
                mip_level: mip,
            };
            let params_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Probe Prefilter Params"),
                contents: bytemuck::bytes_of(&params),
                usage: wgpu::BufferUsages::UNIFORM,
            });
            let target = texture.create_view(&wgpu::TextureViewDescriptor {
                label: Some("Probe Prefilter Target"),
                dimension: Some(wgpu::TextureViewDimension::D2Array),
                base_mip_level: mip,
                mip_level_count: Some(1),
                base_array_layer: 0,
                array_layer_count: Some(6),
                ..Default::default()
            });

            let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Probe Prefilter Bind Group"),
                layout: &self.layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: params_buffer.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::TextureView(&source_view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: wgpu::BindingResource::Sampler(&self.sampler),
                    },
                    wgpu::BindGroupEntry {
                        binding: 3,
                        resource: wgpu::BindingResource::TextureView(&target),
                    },
                ],
            });

            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Probe Prefilter Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            let (x, y, z) = dispatch_size(face_size);
            pass.dispatch_workgroups(x, y, z);
        }

        gpu.queue.submit(Some(encoder.finish()));
        RadianceMap::new(texture, size, mip_levels)
    }
}
