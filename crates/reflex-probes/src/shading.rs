//! Per-surface probe uniforms and bind groups
//!
//! Turns a [`SurfaceProbeBinding`] into the group 2 data its program variant
//! reads: the volume uniform, the wall uniform (when walls are bound) and one
//! radiance cube per bound probe. [`ShadingCache`] keeps the result per
//! surface until a registry event makes it stale.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use glam::{Vec3, Vec4};
use wgpu::util::DeviceExt;

use crate::assignment::{InvalidationFlag, SurfaceId, SurfaceProbeBinding};
use crate::capture::RadianceMap;
use crate::config::ProbeSettings;
use crate::context::GpuContext;
use crate::pipeline::{ProbeProgram, ShaderVariantKey};
use crate::probes::{ProbeRegistry, SubscriptionId};
use crate::resources::{
    PROBE_SAMPLER_BINDING, PROBE_TEXTURE_BINDING_BASE, PROBE_UNIFORM_BINDING, WALL_UNIFORM_BINDING,
};
use crate::{Error, Result};

/// Slot value for walls with no bound probe.
pub const WALL_UNASSIGNED_SLOT: u32 = u32::MAX;

/// Scalar tail of the probe uniform
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ProbeParams {
    pub intensity: f32,
    pub contrast: f32,
    pub wall_blend_distance: f32,
    /// 0 disables the lightmap transition
    pub lightmap_transition: f32,
}

impl ProbeParams {
    pub fn new(settings: &ProbeSettings, wall_blend_distance: f32) -> Self {
        Self {
            intensity: settings.intensity,
            contrast: settings.contrast,
            wall_blend_distance,
            lightmap_transition: settings.lightmap_transition,
        }
    }
}

/// Contrast and intensity applied to sampled probe radiance, as the
/// `shape_probe_radiance` WGSL function does it: clamp to `[0, 1]`, raise to
/// `contrast`, scale by `intensity`.
pub fn shape_probe_radiance(radiance: Vec3, intensity: f32, contrast: f32) -> Vec3 {
    radiance.clamp(Vec3::ZERO, Vec3::ONE).powf(contrast) * intensity
}

/// Bytes of the `ProbeVolumes` uniform: `centers[N]` (xyz center, w blend
/// weight), `sizes[N]` (xyz size, w highest radiance mip), then the params.
pub fn encode_probe_uniforms(
    binding: &SurfaceProbeBinding,
    registry: &ProbeRegistry,
    settings: &ProbeSettings,
) -> Vec<u8> {
    let mut centers = Vec::with_capacity(binding.probes.len());
    let mut sizes = Vec::with_capacity(binding.probes.len());
    for bound in &binding.probes {
        let (center, size, max_mip) = match registry.get(&bound.id) {
            Some(volume) => (
                volume.center(),
                volume.size(),
                volume.radiance_map().map_or(0, |map| map.max_mip()),
            ),
            None => {
                log::warn!("Bound probe '{}' is no longer registered", bound.id);
                (Vec3::ZERO, Vec3::ZERO, 0)
            }
        };
        centers.push(center.extend(bound.weight));
        sizes.push(size.extend(max_mip as f32));
    }

    let params = ProbeParams::new(settings, binding.wall_blend_distance);
    let mut bytes = Vec::with_capacity(32 * binding.probes.len() + 16);
    bytes.extend_from_slice(bytemuck::cast_slice::<Vec4, u8>(&centers));
    bytes.extend_from_slice(bytemuck::cast_slice::<Vec4, u8>(&sizes));
    bytes.extend_from_slice(bytemuck::bytes_of(&params));
    bytes
}

/// Bytes of the `WallSegments` uniform: `segments[W]` (start xz, end xz)
/// then `probe_slots[W]` (x: slot or [`WALL_UNASSIGNED_SLOT`]).
pub fn encode_wall_uniforms(binding: &SurfaceProbeBinding) -> Vec<u8> {
    let segments: Vec<[f32; 4]> = binding
        .walls
        .iter()
        .map(|wall| [wall.start.x, wall.start.y, wall.end.x, wall.end.y])
        .collect();
    let slots: Vec<[u32; 4]> = binding
        .walls
        .iter()
        .map(|wall| [wall.probe_slot.unwrap_or(WALL_UNASSIGNED_SLOT), 0, 0, 0])
        .collect();

    let mut bytes = Vec::with_capacity(32 * binding.walls.len());
    bytes.extend_from_slice(bytemuck::cast_slice(&segments));
    bytes.extend_from_slice(bytemuck::cast_slice(&slots));
    bytes
}

/// Program and group 2 bind group for drawing one surface.
#[derive(Debug)]
pub struct SurfaceShading {
    program: Arc<ProbeProgram>,
    probe_bind_group: Option<wgpu::BindGroup>,
    binding: SurfaceProbeBinding,
}

impl SurfaceShading {
    /// Build the shading state for `binding` with `program`.
    ///
    /// A base program (no probes, or a variant that fell back) gets no
    /// group 2. Probes without a radiance map sample `placeholder`.
    pub fn build(
        gpu: &GpuContext,
        program: Arc<ProbeProgram>,
        binding: &SurfaceProbeBinding,
        registry: &ProbeRegistry,
        settings: &ProbeSettings,
        placeholder: &RadianceMap,
        sampler: &wgpu::Sampler,
    ) -> Result<Self> {
        let probe_bind_group = match program.probe_layout() {
            None => None,
            Some(layout) => {
                let key = program.key();
                if key.probe_count != binding.probe_count() || key.wall_count != binding.wall_count() {
                    return Err(Error::Pipeline(format!(
                        "{} cannot shade {} probes and {} walls",
                        key,
                        binding.probe_count(),
                        binding.wall_count()
                    )));
                }
                Some(create_probe_bind_group(
                    gpu,
                    layout,
                    binding,
                    registry,
                    settings,
                    placeholder,
                    sampler,
                ))
            }
        };

        Ok(Self {
            program,
            probe_bind_group,
            binding: binding.clone(),
        })
    }

    pub fn program(&self) -> &Arc<ProbeProgram> {
        &self.program
    }

    pub fn pipeline(&self) -> &wgpu::RenderPipeline {
        self.program.pipeline()
    }

    pub fn probe_bind_group(&self) -> Option<&wgpu::BindGroup> {
        self.probe_bind_group.as_ref()
    }

    pub fn binding(&self) -> &SurfaceProbeBinding {
        &self.binding
    }

    /// Whether the surface is shaded with probe reflections.
    pub fn uses_probes(&self) -> bool {
        self.probe_bind_group.is_some()
    }

    /// Set the pipeline and group 2. Groups 0 and 1 are the caller's.
    pub fn apply<'a>(&'a self, pass: &mut wgpu::RenderPass<'a>) {
        pass.set_pipeline(self.program.pipeline());
        if let Some(bind_group) = &self.probe_bind_group {
            pass.set_bind_group(2, bind_group, &[]);
        }
    }
}

/// Surface shading reused across draws.
///
/// Entries are keyed by surface and only handed out again for the binding
/// and variant they were built for. Any registry event (a capture replacing
/// a radiance map included) drops every entry.
#[derive(Debug, Default)]
pub struct ShadingCache {
    entries: HashMap<SurfaceId, (ShaderVariantKey, Arc<SurfaceShading>)>,
    invalidation: InvalidationFlag,
    subscription: Option<SubscriptionId>,
}

impl ShadingCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&mut self, registry: &mut ProbeRegistry) {
        self.detach(registry);
        let flag = self.invalidation.clone();
        self.subscription = Some(registry.subscribe(Box::new(move |_| flag.raise())));
        self.invalidation.raise();
    }

    pub fn detach(&mut self, registry: &mut ProbeRegistry) {
        if let Some(subscription) = self.subscription.take() {
            registry.unsubscribe(subscription);
        }
    }

    pub fn invalidate(&self) {
        self.invalidation.raise();
    }

    /// Whether an event arrived since entries were last handed out.
    pub fn is_stale(&self) -> bool {
        self.invalidation.is_raised()
    }

    /// Shading built earlier for `surface` with the same binding and
    /// requested variant.
    pub fn get(
        &mut self,
        surface: SurfaceId,
        binding: &SurfaceProbeBinding,
        key: ShaderVariantKey,
    ) -> Option<Arc<SurfaceShading>> {
        if self.invalidation.take() {
            log::debug!("Shading cache invalidated ({} surfaces)", self.entries.len());
            self.entries.clear();
        }
        let (cached_key, shading) = self.entries.get(&surface)?;
        (*cached_key == key && shading.binding() == binding).then(|| shading.clone())
    }

    pub fn insert(
        &mut self,
        surface: SurfaceId,
        key: ShaderVariantKey,
        shading: SurfaceShading,
    ) -> Arc<SurfaceShading> {
        let shading = Arc::new(shading);
        self.entries.insert(surface, (key, shading.clone()));
        shading
    }

    /// Drop entries whose program is not in `active`.
    pub fn retain_programs(&mut self, active: &HashSet<ShaderVariantKey>) {
        self.entries
            .retain(|_, (_, shading)| active.contains(&shading.program().key()));
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn create_probe_bind_group(
    gpu: &GpuContext,
    layout: &wgpu::BindGroupLayout,
    binding: &SurfaceProbeBinding,
    registry: &ProbeRegistry,
    settings: &ProbeSettings,
    placeholder: &RadianceMap,
    sampler: &wgpu::Sampler,
) -> wgpu::BindGroup {
    let probe_buffer = gpu.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("Probe Volumes Uniform"),
        contents: &encode_probe_uniforms(binding, registry, settings),
        usage: wgpu::BufferUsages::UNIFORM,
    });
    let wall_buffer = (!binding.walls.is_empty()).then(|| {
        gpu.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Probe Walls Uniform"),
            contents: &encode_wall_uniforms(binding),
            usage: wgpu::BufferUsages::UNIFORM,
        })
    });

    let views: Vec<&wgpu::TextureView> = binding
        .probes
        .iter()
        .map(|bound| {
            registry
                .get(&bound.id)
                .and_then(|volume| volume.radiance_map())
                .map_or(placeholder.view(), |map| map.view())
        })
        .collect();

    let mut entries = vec![
        wgpu::BindGroupEntry {
            binding: PROBE_UNIFORM_BINDING,
            resource: probe_buffer.as_entire_binding(),
        },
        wgpu::BindGroupEntry {
            binding: PROBE_SAMPLER_BINDING,
            resource: wgpu::BindingResource::Sampler(sampler),
        },
    ];
    if let Some(buffer) = &wall_buffer {
        entries.push(wgpu::BindGroupEntry {
            binding: WALL_UNIFORM_BINDING,
            resource: buffer.as_entire_binding(),
        });
    }
    for (slot, view) in views.into_iter().enumerate() {
        entries.push(wgpu::BindGroupEntry {
            binding: PROBE_TEXTURE_BINDING_BASE + slot as u32,
            resource: wgpu::BindingResource::TextureView(view),
        });
    }

    gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("Probe Bind Group"),
        layout,
        entries: &entries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assignment::{BoundProbe, BoundWall};
    use glam::Vec2;

    fn read_f32(bytes: &[u8], index: usize) -> f32 {
        bytemuck::pod_read_unaligned(&bytes[index * 4..index * 4 + 4])
    }

    fn read_u32(bytes: &[u8], index: usize) -> u32 {
        bytemuck::pod_read_unaligned(&bytes[index * 4..index * 4 + 4])
    }

    #[test]
    fn test_probe_uniform_layout() {
        let mut registry = ProbeRegistry::default();
        registry.create("a", Vec3::new(1.0, 2.0, 3.0), Vec3::new(4.0, 5.0, 6.0)).unwrap();
        registry.create("b", Vec3::new(-1.0, 0.0, 0.0), Vec3::splat(2.0)).unwrap();
        let binding = SurfaceProbeBinding {
            probes: vec![
                BoundProbe {
                    id: "b".into(),
                    registry_index: 1,
                    distance_squared: 0.0,
                    weight: 0.75,
                },
                BoundProbe {
                    id: "a".into(),
                    registry_index: 0,
                    distance_squared: 2.0,
                    weight: 0.25,
                },
            ],
            walls: Vec::new(),
            wall_blend_distance: 0.5,
            dropped: 0,
        };
        let settings = ProbeSettings::default()
            .with_intensity(2.0)
            .with_contrast(1.5)
            .with_lightmap_transition(0.25);

        let bytes = encode_probe_uniforms(&binding, &registry, &settings);
        assert_eq!(bytes.len(), 32 * 2 + 16);

        // centers[0] is slot 0
        assert_eq!(read_f32(&bytes, 0), -1.0);
        assert_eq!(read_f32(&bytes, 3), 0.75);
        assert_eq!(read_f32(&bytes, 4), 1.0);
        assert_eq!(read_f32(&bytes, 6), 3.0);
        // sizes[1], w is the max mip of a probe not yet captured
        assert_eq!(read_f32(&bytes, 12), 4.0);
        assert_eq!(read_f32(&bytes, 14), 6.0);
        assert_eq!(read_f32(&bytes, 15), 0.0);
        // params
        assert_eq!(read_f32(&bytes, 16), 2.0);
        assert_eq!(read_f32(&bytes, 17), 1.5);
        assert_eq!(read_f32(&bytes, 18), 0.5);
        assert_eq!(read_f32(&bytes, 19), 0.25);
    }

    #[test]
    fn test_wall_uniform_layout() {
        let binding = SurfaceProbeBinding {
            probes: Vec::new(),
            walls: vec![
                BoundWall {
                    start: Vec2::new(0.0, 1.0),
                    end: Vec2::new(2.0, 3.0),
                    probe_slot: Some(1),
                },
                BoundWall {
                    start: Vec2::new(4.0, 5.0),
                    end: Vec2::new(6.0, 7.0),
                    probe_slot: None,
                },
            ],
            wall_blend_distance: 0.0,
            dropped: 0,
        };

        let bytes = encode_wall_uniforms(&binding);
        assert_eq!(bytes.len(), 32 * 2);
        let floats: Vec<f32> = (0..8).map(|i| read_f32(&bytes, i)).collect();
        assert_eq!(floats, vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
        assert_eq!(read_u32(&bytes, 8), 1);
        assert_eq!(read_u32(&bytes, 12), WALL_UNASSIGNED_SLOT);
    }

    #[test]
    fn test_shape_clamps_before_contrast() {
        let shaped = shape_probe_radiance(Vec3::new(4.0, 0.5, -1.0), 1.0, 1.0);
        assert!((shaped - Vec3::new(1.0, 0.5, 0.0)).abs().max_element() < 1e-6);

        let shaped = shape_probe_radiance(Vec3::new(3.0, 0.5, 0.25), 1.0, 2.0);
        assert_eq!(shaped.x, 1.0);
        assert!((shaped.y - 0.25).abs() < 1e-6);
        assert!((shaped.z - 0.0625).abs() < 1e-6);
    }

    #[test]
    fn test_shape_scales_by_intensity_last() {
        let shaped = shape_probe_radiance(Vec3::new(2.0, 0.5, 0.0), 3.0, 2.0);
        assert!((shaped - Vec3::new(3.0, 0.75, 0.0)).abs().max_element() < 1e-6);

        let neutral = Vec3::new(0.2, 0.4, 0.8);
        assert!((shape_probe_radiance(neutral, 1.0, 1.0) - neutral).abs().max_element() < 1e-6);
        assert_eq!(shape_probe_radiance(neutral, 0.0, 1.5), Vec3::ZERO);
    }

    #[test]
    fn test_cache_goes_stale_on_registry_events() {
        let mut registry = ProbeRegistry::default();
        let mut cache = ShadingCache::new();
        cache.attach(&mut registry);
        assert!(cache.get(SurfaceId(1), &SurfaceProbeBinding::default(), ShaderVariantKey::BASE).is_none());
        assert!(!cache.is_stale());

        registry.create("a", Vec3::ZERO, Vec3::ONE).unwrap();
        assert!(cache.is_stale());
        cache.get(SurfaceId(1), &SurfaceProbeBinding::default(), ShaderVariantKey::BASE);
        assert!(!cache.is_stale());

        registry.emit_radiance_changed("a".into());
        assert!(cache.is_stale());

        cache.detach(&mut registry);
        cache.get(SurfaceId(1), &SurfaceProbeBinding::default(), ShaderVariantKey::BASE);
        registry.remove(&"a".into()).unwrap();
        assert!(!cache.is_stale());
    }

    #[test]
    fn test_empty_binding_encodes_params_only() {
        let bytes = encode_probe_uniforms(
            &SurfaceProbeBinding::default(),
            &ProbeRegistry::default(),
            &ProbeSettings::default(),
        );
        assert_eq!(bytes.len(), 16);
        assert!(encode_wall_uniforms(&SurfaceProbeBinding::default()).is_empty());
    }
}
