//! GPU resources: texture pool, bind group layouts and uniform layouts

mod bindgroup;
mod pool;

pub use bindgroup::{probe_layout_entries, BindGroupLayouts};
pub use pool::{TextureKey, TexturePool};

use glam::{Mat4, Vec3, Vec4};

// Group 2 binding slots
pub const PROBE_UNIFORM_BINDING: u32 = 0;
pub const PROBE_SAMPLER_BINDING: u32 = 1;
pub const WALL_UNIFORM_BINDING: u32 = 2;
pub const PROBE_TEXTURE_BINDING_BASE: u32 = 3;

/// Group 0 binding 1, matches `Globals` in `view.wgsl` (48 bytes)
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GlobalsUniform {
    pub sun_direction: Vec3,
    pub sun_intensity: f32,
    pub sun_color: Vec3,
    pub ambient_intensity: f32,
    pub ambient_color: Vec4,
}

impl Default for GlobalsUniform {
    fn default() -> Self {
        Self {
            sun_direction: Vec3::new(0.3, 1.0, 0.2).normalize(),
            sun_intensity: 3.0,
            sun_color: Vec3::ONE,
            ambient_intensity: 0.1,
            ambient_color: Vec4::ONE,
        }
    }
}

/// Group 1 binding 0, matches `Material` in `material.wgsl` (112 bytes)
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MaterialUniform {
    pub model: Mat4,
    pub base_color: Vec4,
    pub emissive: Vec3,
    pub metallic: f32,
    pub roughness: f32,
    pub lightmap_intensity: f32,
    pub _pad: [f32; 2],
}

impl Default for MaterialUniform {
    fn default() -> Self {
        Self {
            model: Mat4::IDENTITY,
            base_color: Vec4::ONE,
            emissive: Vec3::ZERO,
            metallic: 0.0,
            roughness: 0.5,
            lightmap_intensity: 1.0,
            _pad: [0.0; 2],
        }
    }
}
