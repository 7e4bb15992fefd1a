//! Context types for features

use crate::context::GpuContext;

/// Context provided to features during registration
pub struct FeatureContext<'a> {
    pub gpu: &'a GpuContext,
    /// Color target format the shaded surfaces render into
    pub color_format: wgpu::TextureFormat,
}

impl<'a> FeatureContext<'a> {
    pub fn new(gpu: &'a GpuContext, color_format: wgpu::TextureFormat) -> Self {
        Self { gpu, color_format }
    }
}

/// Context provided to features during frame preparation
pub struct PrepareContext<'a> {
    pub gpu: &'a GpuContext,
    pub frame: u64,
    pub delta_time: f32,
}

impl<'a> PrepareContext<'a> {
    pub fn new(gpu: &'a GpuContext, frame: u64, delta_time: f32) -> Self {
        Self {
            gpu,
            frame,
            delta_time,
        }
    }
}
