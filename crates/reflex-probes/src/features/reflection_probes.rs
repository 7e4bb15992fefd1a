//! Reflection probes feature

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::{Feature, FeatureContext, PrepareContext, ShaderDefine};
use crate::assignment::{ProbeAssignment, Surface, SurfaceProbeBinding};
use crate::capture::{CaptureOutcome, CaptureScene, ProbeCapture, RadianceMap};
use crate::config::{ProbeLimits, ProbeSettings};
use crate::context::GpuContext;
use crate::pipeline::{ProgramCache, ShaderVariantKey};
use crate::probes::{ProbeId, ProbeRegistry};
use crate::resources::BindGroupLayouts;
use crate::shading::{ShadingCache, SurfaceShading};
use crate::{Error, Result};

/// Device objects created on `register()`.
struct ProbeGpuState {
    layouts: Arc<BindGroupLayouts>,
    programs: ProgramCache,
    placeholder: RadianceMap,
    sampler: wgpu::Sampler,
}

/// Box-projected reflection probes
///
/// Owns the probe registry and everything derived from it: cached surface
/// assignments, the capture path, the compiled program variants and the
/// per-surface bind groups. Edits go through [`registry_mut`](Self::registry_mut);
/// both caches are subscribed to the registry and drop stale entries on
/// their own.
pub struct ReflectionProbesFeature {
    enabled: bool,
    settings: ProbeSettings,
    limits: ProbeLimits,
    registry: ProbeRegistry,
    assignment: ProbeAssignment,
    shading: ShadingCache,
    capture: ProbeCapture,
    gpu: Option<ProbeGpuState>,
    /// Variants shaded since the last `prepare()`
    active_keys: HashSet<ShaderVariantKey>,
}

impl ReflectionProbesFeature {
    pub fn new(settings: ProbeSettings) -> Self {
        let mut registry = ProbeRegistry::new(&settings);
        let mut assignment = ProbeAssignment::new(&settings);
        assignment.attach(&mut registry);
        let mut shading = ShadingCache::new();
        shading.attach(&mut registry);
        let capture = ProbeCapture::new(&settings);

        Self {
            enabled: true,
            limits: ProbeLimits::default(),
            settings,
            registry,
            assignment,
            shading,
            capture,
            gpu: None,
            active_keys: HashSet::new(),
        }
    }

    pub fn with_registry(mut self, registry: ProbeRegistry) -> Self {
        self.set_registry(registry);
        self
    }

    pub fn settings(&self) -> &ProbeSettings {
        &self.settings
    }

    /// Apply new settings. Shading parameters take effect on the next
    /// `shade_surface()`; capture settings on the next capture.
    pub fn set_settings(&mut self, settings: ProbeSettings) -> Result<()> {
        settings.validate()?;
        self.capture.set_settings(&settings);
        self.assignment.set_wall_blend_distance(settings.wall_blend_distance);
        self.registry.set_max_bound_probes(
            settings.max_bound_probes.min(self.limits.max_bound_probes),
        );
        self.settings = settings;
        self.shading.invalidate();
        Ok(())
    }

    pub fn limits(&self) -> ProbeLimits {
        self.limits
    }

    pub fn registry(&self) -> &ProbeRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ProbeRegistry {
        &mut self.registry
    }

    /// Swap in another registry, moving the cache subscriptions over.
    pub fn set_registry(&mut self, mut registry: ProbeRegistry) {
        self.assignment.detach(&mut self.registry);
        self.shading.detach(&mut self.registry);
        registry.set_max_bound_probes(self.registry.max_bound_probes());
        self.assignment.attach(&mut registry);
        self.shading.attach(&mut registry);
        self.registry = registry;
    }

    pub fn is_registered(&self) -> bool {
        self.gpu.is_some()
    }

    /// Probe binding for `surface`. Empty while the feature is disabled.
    pub fn binding_for(&mut self, surface: &Surface) -> SurfaceProbeBinding {
        if !self.enabled {
            return SurfaceProbeBinding::default();
        }
        self.assignment.binding_for(&self.registry, surface).clone()
    }

    /// Program variant `surface` would be shaded with.
    pub fn variant_for(&mut self, surface: &Surface) -> ShaderVariantKey {
        let lightmap_transition = self.lightmap_transition_for(surface);
        self.binding_for(surface).variant_key(lightmap_transition)
    }

    fn lightmap_transition_for(&self, surface: &Surface) -> bool {
        surface.has_lightmap && self.settings.lightmap_transition_enabled()
    }

    /// Capture every probe that needs it. Without a context nothing is
    /// captured and the flags stay set.
    pub fn capture_pending(
        &mut self,
        gpu: Option<&GpuContext>,
        scene: &mut dyn CaptureScene,
    ) -> Result<usize> {
        self.capture.capture_pending(gpu, scene, &mut self.registry)
    }

    pub fn capture_probe(
        &mut self,
        gpu: Option<&GpuContext>,
        scene: &mut dyn CaptureScene,
        id: &ProbeId,
    ) -> Result<CaptureOutcome> {
        self.capture.capture_probe(gpu, scene, &mut self.registry, id)
    }

    /// Resolve the probes for `surface`, get its program variant and build
    /// the probe bind group.
    ///
    /// The result is reused for later calls until the surface's binding
    /// changes or a registry event (a capture included) makes it stale.
    pub fn shade_surface(&mut self, gpu: &GpuContext, surface: &Surface) -> Result<Arc<SurfaceShading>> {
        let binding = self.binding_for(surface);
        let key = binding.variant_key(self.lightmap_transition_for(surface));

        let state = self
            .gpu
            .as_mut()
            .ok_or_else(|| Error::Pipeline("reflection probes feature is not registered".into()))?;

        if let Some(shading) = self.shading.get(surface.id, &binding, key) {
            self.active_keys.insert(shading.program().key());
            return Ok(shading);
        }

        let program = state.programs.acquire(key)?;
        self.active_keys.insert(program.key());

        let shading = SurfaceShading::build(
            gpu,
            program,
            &binding,
            &self.registry,
            &self.settings,
            &state.placeholder,
            &state.sampler,
        )?;
        Ok(self.shading.insert(surface.id, key, shading))
    }

    /// Surfaces with reusable shading.
    pub fn cached_shading_len(&self) -> usize {
        self.shading.len()
    }

    /// Group 0 and 1 layouts the host must build its view and material bind
    /// groups against.
    pub fn bind_group_layouts(&self) -> Option<&Arc<BindGroupLayouts>> {
        self.gpu.as_ref().map(|state| &state.layouts)
    }

    /// Widest probe and wall counts among the variants shaded since the
    /// last `prepare()`.
    pub fn active_variant_extent(&self) -> ShaderVariantKey {
        self.active_keys
            .iter()
            .fold(ShaderVariantKey::BASE, |widest, key| ShaderVariantKey {
                probe_count: widest.probe_count.max(key.probe_count),
                wall_count: widest.wall_count.max(key.wall_count),
                lightmap_transition: widest.lightmap_transition || key.lightmap_transition,
            })
    }
}

impl Default for ReflectionProbesFeature {
    fn default() -> Self {
        Self::new(ProbeSettings::default())
    }
}

impl Drop for ReflectionProbesFeature {
    fn drop(&mut self) {
        self.assignment.detach(&mut self.registry);
        self.shading.detach(&mut self.registry);
    }
}

impl Feature for ReflectionProbesFeature {
    fn name(&self) -> &str {
        "reflection_probes"
    }

    fn register(&mut self, ctx: &mut FeatureContext) -> Result<()> {
        let device = &ctx.gpu.device;

        self.limits = ctx.gpu.probe_limits(&self.settings);
        self.registry.set_max_bound_probes(self.limits.max_bound_probes);
        self.assignment.set_max_bound_walls(self.limits.max_bound_walls);

        let layouts = Arc::new(BindGroupLayouts::new(device));
        let mut programs = ProgramCache::new(device.clone(), layouts.clone(), ctx.color_format);
        programs.acquire(ShaderVariantKey::BASE)?;

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Probe Radiance Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        self.shading.clear();
        self.gpu = Some(ProbeGpuState {
            layouts,
            programs,
            placeholder: RadianceMap::placeholder(device),
            sampler,
        });

        log::info!(
            "Reflection probes registered ({} probes, up to {} bound, {} walls)",
            self.registry.len(),
            self.limits.max_bound_probes,
            self.limits.max_bound_walls
        );
        Ok(())
    }

    fn prepare(&mut self, _ctx: &PrepareContext) -> Result<()> {
        if let Some(state) = self.gpu.as_mut() {
            state.programs.retire_unused(&self.active_keys);
        }
        self.shading.retain_programs(&self.active_keys);
        self.active_keys.clear();
        Ok(())
    }

    fn on_state_change(&mut self, enabled: bool, _ctx: &mut FeatureContext) -> Result<()> {
        self.set_enabled(enabled);
        Ok(())
    }

    fn shader_defines(&self) -> HashMap<String, ShaderDefine> {
        let extent = self.active_variant_extent();
        let mut defines = HashMap::new();
        defines.insert("ENABLE_REFLECTION_PROBES".into(), ShaderDefine::Bool(self.enabled));
        defines.insert("PROBE_COUNT".into(), ShaderDefine::U32(extent.probe_count));
        defines.insert("WALL_COUNT".into(), ShaderDefine::U32(extent.wall_count));
        defines.insert(
            "PROBE_INTENSITY".into(),
            ShaderDefine::F32(self.settings.intensity),
        );
        defines.insert(
            "PROBE_LIGHTMAP_TRANSITION".into(),
            ShaderDefine::Bool(extent.lightmap_transition),
        );
        defines
    }

    fn cleanup(&mut self, _device: &wgpu::Device) {
        self.shading.clear();
        self.capture.release();
        self.registry.release_radiance_maps();
        if let Some(state) = self.gpu.take() {
            state.placeholder.destroy();
        }
        self.active_keys.clear();
        log::info!("Reflection probes released GPU resources");
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        if self.enabled != enabled {
            self.enabled = enabled;
            self.assignment.invalidate();
        }
    }
}
