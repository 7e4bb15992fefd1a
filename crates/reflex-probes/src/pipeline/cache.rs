//! Compiled probe program variants
//!
//! Each [`ShaderVariantKey`] maps to one shader module and render pipeline.
//! Variants compile on first use and stay cached until [`ProgramCache::retire_unused`]
//! drops them. A variant that fails to compile is remembered and every later
//! request for it gets the base program instead.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::ShaderVariantKey;
use crate::context::with_error_scope;
use crate::mesh::Vertex;
use crate::resources::BindGroupLayouts;
use crate::shaders::{program_source, validate_wgsl};
use crate::{Error, Result};

/// Depth format every probe program renders against.
pub const PROGRAM_DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// A compiled variant: pipeline plus the group 2 layout it was built with.
pub struct ProbeProgram {
    key: ShaderVariantKey,
    pipeline: wgpu::RenderPipeline,
    probe_layout: Option<wgpu::BindGroupLayout>,
}

impl ProbeProgram {
    pub fn key(&self) -> ShaderVariantKey {
        self.key
    }

    pub fn pipeline(&self) -> &wgpu::RenderPipeline {
        &self.pipeline
    }

    /// Group 2 layout, `None` for the base program.
    pub fn probe_layout(&self) -> Option<&wgpu::BindGroupLayout> {
        self.probe_layout.as_ref()
    }
}

impl std::fmt::Debug for ProbeProgram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbeProgram").field("key", &self.key).finish_non_exhaustive()
    }
}

/// Variant storage with failure memory and base fallback.
#[derive(Debug)]
pub struct VariantSlots<T> {
    entries: HashMap<ShaderVariantKey, Arc<T>>,
    failed: HashSet<ShaderVariantKey>,
}

impl<T> Default for VariantSlots<T> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            failed: HashSet::new(),
        }
    }
}

impl<T> VariantSlots<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached entry for `key`, compiling it on first use. Keys that failed
    /// once resolve to the base entry without another compile attempt.
    pub fn resolve(
        &mut self,
        key: ShaderVariantKey,
        mut compile: impl FnMut(&ShaderVariantKey) -> Result<T>,
    ) -> Result<Arc<T>> {
        if let Some(entry) = self.entries.get(&key) {
            log::trace!("Using cached probe program: {}", key);
            return Ok(entry.clone());
        }

        if !self.failed.contains(&key) {
            match compile(&key) {
                Ok(entry) => {
                    let entry = Arc::new(entry);
                    self.entries.insert(key, entry.clone());
                    return Ok(entry);
                }
                Err(err) => {
                    log::error!("Probe program {} failed to build: {}", key, err);
                    self.failed.insert(key);
                }
            }
        }

        if key.is_base() {
            return Err(Error::Pipeline(format!("{} is unavailable", key)));
        }
        log::warn!("Falling back to {} for {}", ShaderVariantKey::BASE, key);
        self.resolve(ShaderVariantKey::BASE, compile)
    }

    /// Drop every variant not in `active`. The base entry always stays.
    pub fn retire_unused(&mut self, active: &HashSet<ShaderVariantKey>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| key.is_base() || active.contains(key));
        let retired = before - self.entries.len();
        if retired > 0 {
            log::debug!("Retired {} unused probe program variant(s)", retired);
        }
        retired
    }

    pub fn contains(&self, key: &ShaderVariantKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn has_failed(&self, key: &ShaderVariantKey) -> bool {
        self.failed.contains(key)
    }

    pub fn failed_keys(&self) -> impl Iterator<Item = &ShaderVariantKey> {
        self.failed.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.failed.clear();
    }
}

/// Pipeline cache for probe program variants
pub struct ProgramCache {
    device: Arc<wgpu::Device>,
    layouts: Arc<BindGroupLayouts>,
    color_format: wgpu::TextureFormat,
    slots: VariantSlots<ProbeProgram>,
}

impl ProgramCache {
    pub fn new(
        device: Arc<wgpu::Device>,
        layouts: Arc<BindGroupLayouts>,
        color_format: wgpu::TextureFormat,
    ) -> Self {
        Self {
            device,
            layouts,
            color_format,
            slots: VariantSlots::new(),
        }
    }

    /// Program for `key`, or the base program if `key` cannot be built.
    pub fn acquire(&mut self, key: ShaderVariantKey) -> Result<Arc<ProbeProgram>> {
        let device = &self.device;
        let layouts = &self.layouts;
        let color_format = self.color_format;
        self.slots
            .resolve(key, |key| compile_program(device, layouts, color_format, key))
    }

    pub fn retire_unused(&mut self, active: &HashSet<ShaderVariantKey>) -> usize {
        self.slots.retire_unused(active)
    }

    pub fn contains(&self, key: &ShaderVariantKey) -> bool {
        self.slots.contains(key)
    }

    pub fn failed_keys(&self) -> Vec<ShaderVariantKey> {
        let mut keys: Vec<_> = self.slots.failed_keys().copied().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn color_format(&self) -> wgpu::TextureFormat {
        self.color_format
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }
}

fn compile_program(
    device: &wgpu::Device,
    layouts: &BindGroupLayouts,
    color_format: wgpu::TextureFormat,
    key: &ShaderVariantKey,
) -> Result<ProbeProgram> {
    let label = key.label();
    let source = program_source(key)?;
    validate_wgsl(&label, &source)?;

    log::info!("Creating probe program variant: {}", label);

    with_error_scope(device, &label, || {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(&label),
            source: wgpu::ShaderSource::Wgsl(source.as_str().into()),
        });

        let probe_layout = BindGroupLayouts::create_probe_layout(device, key);
        let mut bind_group_layouts = vec![layouts.global.as_ref(), layouts.material.as_ref()];
        if let Some(layout) = &probe_layout {
            bind_group_layouts.push(layout);
        }

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(&format!("{}_layout", label)),
            bind_group_layouts: &bind_group_layouts,
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(&label),
            layout: Some(&pipeline_layout),
            cache: None,
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: "vs_main",
                buffers: &[Vertex::layout()],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: "fs_main",
                targets: &[Some(wgpu::ColorTargetState {
                    format: color_format,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: Some(wgpu::Face::Back),
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: PROGRAM_DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::Less,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState {
                count: 1,
                mask: !0,
                alpha_to_coverage_enabled: false,
            },
            multiview: None,
        });

        Ok(ProbeProgram {
            key: *key,
            pipeline,
            probe_layout,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile_label(key: &ShaderVariantKey) -> Result<String> {
        Ok(key.label())
    }

    #[test]
    fn test_resolve_compiles_once() {
        let mut slots = VariantSlots::new();
        let key = ShaderVariantKey::new(2, 0, false);
        let mut compiles = 0;
        for _ in 0..3 {
            let entry = slots
                .resolve(key, |k| {
                    compiles += 1;
                    compile_label(k)
                })
                .unwrap();
            assert_eq!(entry.as_str(), "probe_program_p2_w0");
        }
        assert_eq!(compiles, 1);
    }

    #[test]
    fn test_failed_variant_falls_back_to_base() {
        let mut slots = VariantSlots::new();
        let broken = ShaderVariantKey::new(3, 2, true);
        let fail_broken = |k: &ShaderVariantKey| {
            if *k == broken {
                Err(Error::Shader("bad".into()))
            } else {
                compile_label(k)
            }
        };

        let entry = slots.resolve(broken, fail_broken).unwrap();
        assert_eq!(entry.as_str(), "probe_program_base");
        assert!(slots.has_failed(&broken));
        assert!(!slots.contains(&broken));

        // No second compile attempt for a known failure
        let entry = slots
            .resolve(broken, |_| -> Result<String> { panic!("recompiled a failed variant") })
            .unwrap();
        assert_eq!(entry.as_str(), "probe_program_base");
    }

    #[test]
    fn test_base_failure_is_an_error() {
        let mut slots: VariantSlots<String> = VariantSlots::new();
        let result = slots.resolve(ShaderVariantKey::new(1, 0, false), |_| {
            Err(Error::Shader("no device".into()))
        });
        assert!(matches!(result, Err(Error::Pipeline(_))));
    }

    #[test]
    fn test_retire_keeps_base_and_active() {
        let mut slots = VariantSlots::new();
        let keep = ShaderVariantKey::new(1, 0, false);
        let drop = ShaderVariantKey::new(4, 0, false);
        for key in [ShaderVariantKey::BASE, keep, drop] {
            slots.resolve(key, compile_label).unwrap();
        }

        let active: HashSet<_> = [keep].into_iter().collect();
        assert_eq!(slots.retire_unused(&active), 1);
        assert!(slots.contains(&ShaderVariantKey::BASE));
        assert!(slots.contains(&keep));
        assert!(!slots.contains(&drop));

        assert_eq!(slots.retire_unused(&HashSet::new()), 1);
        assert_eq!(slots.len(), 1);
    }
}
