//! Six-face radiance capture for probe volumes
//!
//! A capture renders the scene into a pooled cube target from the probe
//! center, one pass per face, with editor-only categories hidden for the
//! duration. The result is convolved into a mip chain by [`RadiancePrefilter`]
//! and installed through the registry as the probe's [`RadianceMap`].

mod prefilter;

pub use prefilter::{dispatch_size, mip_size, roughness_for_mip, PrefilterParams, RadiancePrefilter};

use std::ops::{Deref, DerefMut};

use bitflags::bitflags;
use glam::{Mat4, Vec3};
use serde::{Deserialize, Serialize};

use crate::camera::{Camera, CubeFace};
use crate::config::ProbeSettings;
use crate::context::{with_error_scope, GpuContext};
use crate::probes::{ProbeId, ProbeRegistry, ProbeVolume};
use crate::resources::{TextureKey, TexturePool};
use crate::{Error, Result};

/// Format of the per-face capture target.
pub const CAPTURE_COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;
/// Depth format shared by all six face passes.
pub const CAPTURE_DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;
/// Format of the prefiltered radiance cube.
pub const RADIANCE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;

// Captures a pooled target may sit unused before it is destroyed
const POOL_MAX_AGE: u64 = 8;

bitflags! {
    /// Scene object groups that must not appear in a capture.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct ObjectCategories: u32 {
        /// Transform gizmos and manipulation handles
        const CONTROLS = 1 << 0;
        /// Editor helpers (grids, icons, light widgets)
        const GIZMOS = 1 << 1;
        /// Probe volume outlines and debug spheres
        const PROBE_VISUALS = 1 << 2;
    }
}

impl Default for ObjectCategories {
    fn default() -> Self {
        Self::all()
    }
}

/// Everything a scene needs to draw one cube face.
#[derive(Debug, Clone, Copy)]
pub struct CaptureFace {
    pub face: CubeFace,
    pub camera: Camera,
    pub view: Mat4,
    pub projection: Mat4,
    pub resolution: u32,
}

impl CaptureFace {
    pub fn new(face: CubeFace, position: Vec3, resolution: u32, near: f32, far: f32) -> Self {
        Self {
            face,
            camera: Camera::cube_face(position, face, near, far),
            view: face.view(position),
            projection: CubeFace::projection(near, far),
            resolution,
        }
    }

    /// Winding the scene must use for front faces under the flipped projection.
    pub fn front_face(&self) -> wgpu::FrontFace {
        CubeFace::front_face()
    }
}

/// The scene side of a capture.
pub trait CaptureScene {
    /// Whether objects of `category` are currently drawn.
    fn category_visible(&self, category: ObjectCategories) -> bool;

    fn set_category_visible(&mut self, category: ObjectCategories, visible: bool);

    /// Background the face targets are cleared to.
    fn clear_color(&self) -> wgpu::Color {
        wgpu::Color::BLACK
    }

    /// Record the draws for one face into `pass`.
    ///
    /// Pipelines used here must target [`CAPTURE_COLOR_FORMAT`] and
    /// [`CAPTURE_DEPTH_FORMAT`] and wind front faces as [`CaptureFace::front_face`].
    fn draw_face(&mut self, face: &CaptureFace, pass: &mut wgpu::RenderPass<'_>) -> Result<()>;
}

/// Hides categories for as long as it lives, then shows again exactly the
/// ones it hid.
struct HiddenCategories<'a, S: CaptureScene + ?Sized> {
    scene: &'a mut S,
    hidden: ObjectCategories,
}

impl<'a, S: CaptureScene + ?Sized> HiddenCategories<'a, S> {
    fn new(scene: &'a mut S, excluded: ObjectCategories) -> Self {
        let mut hidden = ObjectCategories::empty();
        for category in excluded.iter() {
            if scene.category_visible(category) {
                scene.set_category_visible(category, false);
                hidden |= category;
            }
        }
        Self { scene, hidden }
    }
}

impl<S: CaptureScene + ?Sized> Deref for HiddenCategories<'_, S> {
    type Target = S;

    fn deref(&self) -> &S {
        self.scene
    }
}

impl<S: CaptureScene + ?Sized> DerefMut for HiddenCategories<'_, S> {
    fn deref_mut(&mut self) -> &mut S {
        self.scene
    }
}

impl<S: CaptureScene + ?Sized> Drop for HiddenCategories<'_, S> {
    fn drop(&mut self) {
        for category in self.hidden.iter() {
            self.scene.set_category_visible(category, true);
        }
    }
}

/// Prefiltered cube map owned by one probe volume.
///
/// Mip 0 holds the sharp capture, each further mip a rougher convolution.
#[derive(Debug)]
pub struct RadianceMap {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    resolution: u32,
    mip_levels: u32,
}

impl RadianceMap {
    pub(crate) fn new(texture: wgpu::Texture, resolution: u32, mip_levels: u32) -> Self {
        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some("Probe Radiance Cube"),
            dimension: Some(wgpu::TextureViewDimension::Cube),
            ..Default::default()
        });
        Self {
            texture,
            view,
            resolution,
            mip_levels,
        }
    }

    /// 1x1 black cube bound in place of probes that have not been captured.
    pub fn placeholder(device: &wgpu::Device) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Probe Placeholder Cube"),
            size: wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 6,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: RADIANCE_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        Self::new(texture, 1, 1)
    }

    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }

    /// Highest mip index, the lod used at roughness 1.
    pub fn max_mip(&self) -> u32 {
        self.mip_levels.saturating_sub(1)
    }

    pub fn destroy(self) {
        self.texture.destroy();
    }
}

/// What a capture request ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOutcome {
    Captured { mip_levels: u32 },
    /// No rendering context; the previous map is untouched.
    Skipped,
}

/// Renders and prefilters probe captures.
pub struct ProbeCapture {
    settings: ProbeSettings,
    pool: Option<TexturePool>,
    prefilter: Option<RadiancePrefilter>,
    serial: u64,
}

impl ProbeCapture {
    pub fn new(settings: &ProbeSettings) -> Self {
        Self {
            settings: settings.clone(),
            pool: None,
            prefilter: None,
            serial: 0,
        }
    }

    pub fn set_settings(&mut self, settings: &ProbeSettings) {
        self.settings = settings.clone();
    }

    /// Number of captures attempted with a context.
    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// Render and prefilter a radiance map for `volume`.
    ///
    /// Without a context nothing is rendered and `None` is returned. The
    /// volume is left untouched either way; see [`capture_probe`](Self::capture_probe).
    pub fn render_radiance(
        &mut self,
        gpu: Option<&GpuContext>,
        scene: &mut dyn CaptureScene,
        volume: &ProbeVolume,
    ) -> Result<Option<RadianceMap>> {
        let Some(gpu) = gpu else {
            log::warn!(
                "No rendering context, skipping capture of probe '{}'",
                volume.id()
            );
            return Ok(None);
        };

        let size = volume.resolution().texels();
        let mip_levels = self
            .settings
            .prefilter_mip_levels
            .clamp(1, volume.resolution().max_mip_levels());

        if self.prefilter.is_none() {
            let device = &gpu.device;
            self.prefilter = Some(with_error_scope(device, "probe prefilter pipeline", || {
                Ok(RadiancePrefilter::new(device))
            })?);
        }
        let pool = self
            .pool
            .get_or_insert_with(|| TexturePool::new(gpu.device.clone()));

        self.serial += 1;
        let serial = self.serial;

        let color_key = TextureKey::cube(
            size,
            CAPTURE_COLOR_FORMAT,
            wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
        );
        let depth_key = TextureKey::square(
            size,
            CAPTURE_DEPTH_FORMAT,
            wgpu::TextureUsages::RENDER_ATTACHMENT,
        );
        let color = pool.acquire(color_key, "Probe Capture Color");
        let depth = pool.acquire(depth_key, "Probe Capture Depth");

        let settings = &self.settings;
        let prefilter = &self.prefilter;
        let result = with_error_scope(&gpu.device, "probe capture", || {
            render_faces(gpu, scene, settings, volume.center(), size, &color, &depth)?;
            let prefilter = prefilter
                .as_ref()
                .ok_or_else(|| Error::Capture("prefilter pipeline missing".into()))?;
            Ok(prefilter.run(gpu, &color, size, mip_levels, settings.prefilter_samples))
        });

        // Targets go back to the pool whether or not the capture worked
        if let Some(pool) = self.pool.as_mut() {
            pool.release(color, color_key, serial);
            pool.release(depth, depth_key, serial);
            pool.cleanup_old(serial, POOL_MAX_AGE);
        }

        match result {
            Ok(map) => {
                log::info!(
                    "Captured probe '{}' at {}x{} ({} mips)",
                    volume.id(),
                    size,
                    size,
                    mip_levels
                );
                Ok(Some(map))
            }
            Err(err) => {
                log::error!("Capture of probe '{}' failed: {}", volume.id(), err);
                Err(err)
            }
        }
    }

    /// Capture the probe `id` held by `registry` and install the result,
    /// which notifies the registry's observers.
    ///
    /// Without a context the capture is skipped with a warning. On failure
    /// the previous map stays bound and the error is returned.
    pub fn capture_probe(
        &mut self,
        gpu: Option<&GpuContext>,
        scene: &mut dyn CaptureScene,
        registry: &mut ProbeRegistry,
        id: &ProbeId,
    ) -> Result<CaptureOutcome> {
        let volume = registry
            .get(id)
            .ok_or_else(|| Error::UnknownProbe(id.to_string()))?;
        match self.render_radiance(gpu, scene, volume)? {
            Some(map) => {
                let mip_levels = map.mip_levels();
                registry.install_radiance_map(id, map)?;
                Ok(CaptureOutcome::Captured { mip_levels })
            }
            None => Ok(CaptureOutcome::Skipped),
        }
    }

    /// Capture every probe flagged as needing it. Returns how many were
    /// captured; a failing probe keeps its flag and does not stop the rest.
    pub fn capture_pending(
        &mut self,
        gpu: Option<&GpuContext>,
        scene: &mut dyn CaptureScene,
        registry: &mut ProbeRegistry,
    ) -> Result<usize> {
        let pending = registry.pending_captures();
        if pending.is_empty() {
            return Ok(0);
        }
        if gpu.is_none() {
            log::warn!(
                "No rendering context, {} probe capture(s) stay pending",
                pending.len()
            );
            return Ok(0);
        }

        let mut captured = 0;
        let mut first_error = None;
        for id in pending {
            match self.capture_probe(gpu, scene, registry, &id) {
                Ok(CaptureOutcome::Captured { .. }) => captured += 1,
                Ok(CaptureOutcome::Skipped) => {}
                Err(err) => {
                    first_error.get_or_insert(err);
                }
            }
        }

        match first_error {
            Some(err) if captured == 0 => Err(err),
            _ => Ok(captured),
        }
    }

    /// Drop pooled targets and the prefilter pipeline.
    pub fn release(&mut self) {
        if let Some(pool) = self.pool.as_mut() {
            pool.clear();
        }
        self.pool = None;
        self.prefilter = None;
    }
}

fn render_faces(
    gpu: &GpuContext,
    scene: &mut dyn CaptureScene,
    settings: &ProbeSettings,
    center: Vec3,
    size: u32,
    color: &wgpu::Texture,
    depth: &wgpu::Texture,
) -> Result<()> {
    let mut scene = HiddenCategories::new(scene, settings.excluded_categories);
    let clear_color = scene.clear_color();
    let depth_view = depth.create_view(&wgpu::TextureViewDescriptor::default());

    let mut encoder = gpu.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("Probe Capture Encoder"),
    });

    for face in CubeFace::ALL {
        let face_view = color.create_view(&wgpu::TextureViewDescriptor {
            label: Some("Probe Capture Face"),
            dimension: Some(wgpu::TextureViewDimension::D2),
            base_array_layer: face.layer(),
            array_layer_count: Some(1),
            ..Default::default()
        });
        let capture_face = CaptureFace::new(
            face,
            center,
            size,
            settings.capture_near,
            settings.capture_far,
        );

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Probe Capture Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &face_view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(clear_color),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: &depth_view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(1.0),
                    store: wgpu::StoreOp::Discard,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        scene.draw_face(&capture_face, &mut pass)?;
    }

    gpu.queue.submit(Some(encoder.finish()));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct Toggles {
        hidden: ObjectCategories,
        log: Vec<(ObjectCategories, bool)>,
    }

    impl Default for Toggles {
        fn default() -> Self {
            Self {
                hidden: ObjectCategories::empty(),
                log: Vec::new(),
            }
        }
    }

    impl CaptureScene for Toggles {
        fn category_visible(&self, category: ObjectCategories) -> bool {
            !self.hidden.contains(category)
        }

        fn set_category_visible(&mut self, category: ObjectCategories, visible: bool) {
            self.hidden.set(category, !visible);
            self.log.push((category, visible));
        }

        fn draw_face(&mut self, _: &CaptureFace, _: &mut wgpu::RenderPass<'_>) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_hidden_categories_restore_on_drop() {
        let mut scene = Toggles {
            hidden: ObjectCategories::GIZMOS,
            ..Default::default()
        };
        {
            let guard = HiddenCategories::new(&mut scene, ObjectCategories::all());
            assert!(!guard.category_visible(ObjectCategories::CONTROLS));
            assert!(!guard.category_visible(ObjectCategories::PROBE_VISUALS));
        }
        // Gizmos were already hidden and stay hidden
        assert_eq!(scene.hidden, ObjectCategories::GIZMOS);
        assert_eq!(scene.log.len(), 4);
    }

    #[test]
    fn test_hidden_categories_restore_on_error() {
        fn failing(scene: &mut dyn CaptureScene) -> Result<()> {
            let _guard = HiddenCategories::new(scene, ObjectCategories::CONTROLS);
            Err(Error::Capture("draw failed".into()))
        }

        let mut scene = Toggles::default();
        assert!(failing(&mut scene).is_err());
        assert!(scene.hidden.is_empty());
    }

    #[test]
    fn test_capture_without_context_is_skipped() {
        let mut capture = ProbeCapture::new(&ProbeSettings::default());
        let mut scene = Toggles::default();
        let mut registry = ProbeRegistry::default();
        registry.create("hall", Vec3::ZERO, Vec3::splat(4.0)).unwrap();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        registry.subscribe(Box::new(move |event| sink.lock().unwrap().push(event.clone())));

        let id = ProbeId::from("hall");
        let outcome = capture.capture_probe(None, &mut scene, &mut registry, &id).unwrap();
        assert_eq!(outcome, CaptureOutcome::Skipped);
        let volume = registry.get(&id).unwrap();
        assert!(volume.radiance_map().is_none());
        assert!(volume.needs_capture());
        assert_eq!(capture.serial(), 0);
        assert!(scene.log.is_empty());
        assert!(events.lock().unwrap().is_empty());

        assert!(matches!(
            capture.capture_probe(None, &mut scene, &mut registry, &"missing".into()),
            Err(Error::UnknownProbe(_))
        ));
    }

    #[test]
    fn test_capture_face_matches_camera() {
        let face = CaptureFace::new(CubeFace::PositiveZ, Vec3::new(1.0, 2.0, 3.0), 256, 0.1, 100.0);
        let expected = face.projection * face.view;
        assert!(face.camera.view_proj.abs_diff_eq(expected, 1e-5));
        assert_eq!(face.front_face(), wgpu::FrontFace::Cw);
    }

    #[test]
    fn test_categories_serialize_by_name() {
        let json = serde_json::to_string(&ObjectCategories::CONTROLS).unwrap();
        let back: ObjectCategories = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ObjectCategories::CONTROLS);
    }
}
