//! Bind group layouts shared by every probe program variant
//!
//! - Group 0: View (camera, globals) - per-frame
//! - Group 1: Material (PBR uniform, base color, lightmap, sampler) - per-draw
//! - Group 2: Probes (volumes, sampler, walls, one cube map per probe) - per
//!   variant, since its entry count depends on the probe and wall counts

use std::sync::Arc;

use super::{
    PROBE_SAMPLER_BINDING, PROBE_TEXTURE_BINDING_BASE, PROBE_UNIFORM_BINDING, WALL_UNIFORM_BINDING,
};
use crate::pipeline::ShaderVariantKey;

fn uniform_entry(binding: u32, visibility: wgpu::ShaderStages) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn texture_entry(binding: u32, view_dimension: wgpu::TextureViewDimension) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: true },
            view_dimension,
            multisampled: false,
        },
        count: None,
    }
}

fn sampler_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
        count: None,
    }
}

/// Layouts for groups 0 and 1, identical across variants
#[derive(Clone)]
pub struct BindGroupLayouts {
    pub global: Arc<wgpu::BindGroupLayout>,
    pub material: Arc<wgpu::BindGroupLayout>,
}

impl BindGroupLayouts {
    pub fn new(device: &wgpu::Device) -> Self {
        Self {
            global: Arc::new(Self::create_global_layout(device)),
            material: Arc::new(Self::create_material_layout(device)),
        }
    }

    /// Group 0: Camera and scene globals
    fn create_global_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
        let stages = wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT;
        device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Probe View Bind Group Layout"),
            entries: &[
                // Binding 0: Camera uniform
                uniform_entry(0, stages),
                // Binding 1: Globals uniform (sun, ambient)
                uniform_entry(1, stages),
            ],
        })
    }

    /// Group 1: Material data and textures
    fn create_material_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
        device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Probe Material Bind Group Layout"),
            entries: &[
                // Binding 0: Material uniform (model matrix, PBR factors)
                uniform_entry(0, wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT),
                // Binding 1: Base color texture
                texture_entry(1, wgpu::TextureViewDimension::D2),
                // Binding 2: Lightmap
                texture_entry(2, wgpu::TextureViewDimension::D2),
                // Binding 3: Material sampler
                sampler_entry(3),
            ],
        })
    }

    /// Group 2 for `key`, `None` for the base program.
    pub fn create_probe_layout(device: &wgpu::Device, key: &ShaderVariantKey) -> Option<wgpu::BindGroupLayout> {
        if key.is_base() {
            return None;
        }
        let entries = probe_layout_entries(key);
        Some(device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(&format!("{} Bind Group Layout", key)),
            entries: &entries,
        }))
    }
}

/// Group 2 entries: volumes, sampler, walls (only with walls), then one cube
/// map per probe starting at [`PROBE_TEXTURE_BINDING_BASE`].
pub fn probe_layout_entries(key: &ShaderVariantKey) -> Vec<wgpu::BindGroupLayoutEntry> {
    if key.is_base() {
        return Vec::new();
    }

    let mut entries = vec![
        uniform_entry(PROBE_UNIFORM_BINDING, wgpu::ShaderStages::FRAGMENT),
        sampler_entry(PROBE_SAMPLER_BINDING),
    ];
    if key.has_walls() {
        entries.push(uniform_entry(WALL_UNIFORM_BINDING, wgpu::ShaderStages::FRAGMENT));
    }
    for i in 0..key.probe_count {
        entries.push(texture_entry(
            PROBE_TEXTURE_BINDING_BASE + i,
            wgpu::TextureViewDimension::Cube,
        ));
    }
    entries
}
