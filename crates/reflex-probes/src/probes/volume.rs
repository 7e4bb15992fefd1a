//! Probe volume entity

use std::fmt;

use glam::Vec3;
use reflex_core::Aabb;
use serde::{Deserialize, Serialize};

use crate::capture::RadianceMap;
use crate::{Error, Result};

/// Smallest box extent accepted when no settings are involved.
pub const MIN_PROBE_EXTENT: f32 = 0.01;

/// Stable probe identifier, unique within a registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProbeId(String);

impl ProbeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProbeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProbeId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for ProbeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Supported capture resolutions (cube face edge in texels).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum ProbeResolution {
    R256,
    R512,
    R1024,
    R2048,
}

impl ProbeResolution {
    pub const ALL: [ProbeResolution; 4] = [
        ProbeResolution::R256,
        ProbeResolution::R512,
        ProbeResolution::R1024,
        ProbeResolution::R2048,
    ];

    pub fn texels(self) -> u32 {
        match self {
            ProbeResolution::R256 => 256,
            ProbeResolution::R512 => 512,
            ProbeResolution::R1024 => 1024,
            ProbeResolution::R2048 => 2048,
        }
    }

    /// Full mip chain length down to 1x1.
    pub fn max_mip_levels(self) -> u32 {
        self.texels().ilog2() + 1
    }
}

impl TryFrom<u32> for ProbeResolution {
    type Error = String;

    fn try_from(texels: u32) -> std::result::Result<Self, Self::Error> {
        ProbeResolution::ALL
            .into_iter()
            .find(|r| r.texels() == texels)
            .ok_or_else(|| format!("unsupported probe resolution {texels} (expected 256, 512, 1024 or 2048)"))
    }
}

impl From<ProbeResolution> for u32 {
    fn from(resolution: ProbeResolution) -> Self {
        resolution.texels()
    }
}

impl Default for ProbeResolution {
    fn default() -> Self {
        ProbeResolution::R512
    }
}

/// Reject non-finite values and clamp extents below `min_extent`.
pub(crate) fn sanitize_box(id: &ProbeId, center: Vec3, size: Vec3, min_extent: f32) -> Result<(Vec3, Vec3)> {
    if !center.is_finite() {
        return Err(Error::InvalidVolume(format!("probe '{}' has a non-finite center {:?}", id, center)));
    }
    if !size.is_finite() {
        return Err(Error::InvalidVolume(format!("probe '{}' has a non-finite size {:?}", id, size)));
    }

    let clamped = size.max(Vec3::splat(min_extent));
    if clamped != size {
        log::warn!(
            "Probe '{}' size {:?} below minimum extent {}, clamped to {:?}",
            id,
            size,
            min_extent,
            clamped
        );
    }
    Ok((center, clamped))
}

/// One box-shaped capture volume.
///
/// Owns its radiance map once captured; replacing the map or dropping the
/// volume releases the previous GPU texture.
#[derive(Debug)]
pub struct ProbeVolume {
    id: ProbeId,
    center: Vec3,
    size: Vec3,
    resolution: ProbeResolution,
    radiance_map: Option<RadianceMap>,
    auto_update: bool,
    visible: bool,
    controls_visible: bool,
    needs_capture: bool,
}

impl ProbeVolume {
    /// New volume with no radiance map; it is flagged for capture. Extents
    /// below [`MIN_PROBE_EXTENT`] are clamped.
    pub fn new(id: impl Into<ProbeId>, center: Vec3, size: Vec3) -> Result<Self> {
        Self::new_clamped(id, center, size, MIN_PROBE_EXTENT)
    }

    /// Like [`new`](Self::new) with extents clamped to `min_extent` instead.
    pub fn new_clamped(id: impl Into<ProbeId>, center: Vec3, size: Vec3, min_extent: f32) -> Result<Self> {
        let id = id.into();
        if id.as_str().is_empty() {
            return Err(Error::InvalidVolume("probe id must not be empty".into()));
        }
        let (center, size) = sanitize_box(&id, center, size, min_extent)?;

        Ok(Self {
            id,
            center,
            size,
            resolution: ProbeResolution::default(),
            radiance_map: None,
            auto_update: false,
            visible: true,
            controls_visible: false,
            needs_capture: true,
        })
    }

    pub fn with_resolution(mut self, resolution: ProbeResolution) -> Self {
        self.resolution = resolution;
        self
    }

    pub fn with_auto_update(mut self, auto_update: bool) -> Self {
        self.auto_update = auto_update;
        self
    }

    pub fn id(&self) -> &ProbeId {
        &self.id
    }

    pub fn center(&self) -> Vec3 {
        self.center
    }

    pub fn size(&self) -> Vec3 {
        self.size
    }

    pub fn aabb(&self) -> Aabb {
        Aabb::from_center_size(self.center, self.size)
    }

    pub fn resolution(&self) -> ProbeResolution {
        self.resolution
    }

    pub fn radiance_map(&self) -> Option<&RadianceMap> {
        self.radiance_map.as_ref()
    }

    pub fn auto_update(&self) -> bool {
        self.auto_update
    }

    pub fn visible(&self) -> bool {
        self.visible
    }

    pub fn controls_visible(&self) -> bool {
        self.controls_visible
    }

    pub fn needs_capture(&self) -> bool {
        self.needs_capture
    }

    /// Squared distance from `point` to this box, zero inside.
    pub fn squared_distance(&self, point: Vec3) -> f32 {
        reflex_core::squared_distance_to_aabb(point, self.center, self.size)
    }

    // Mutators below are crate-private: edits go through the registry so
    // observers see every change.

    pub(crate) fn set_box(&mut self, center: Vec3, size: Vec3, min_extent: f32) -> Result<()> {
        let (center, size) = sanitize_box(&self.id, center, size, min_extent)?;
        self.center = center;
        self.size = size;
        if self.auto_update {
            self.needs_capture = true;
        }
        Ok(())
    }

    pub(crate) fn clamp_extent(&mut self, min_extent: f32) -> Result<()> {
        self.set_box(self.center, self.size, min_extent)
    }

    /// Changing resolution invalidates the current map; it is released now.
    pub(crate) fn set_resolution(&mut self, resolution: ProbeResolution) {
        if resolution == self.resolution {
            return;
        }
        self.resolution = resolution;
        self.release_gpu_resources();
        self.needs_capture = true;
    }

    pub(crate) fn set_auto_update(&mut self, auto_update: bool) {
        self.auto_update = auto_update;
    }

    pub(crate) fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    pub(crate) fn set_controls_visible(&mut self, visible: bool) {
        self.controls_visible = visible;
    }

    pub(crate) fn request_capture(&mut self) {
        self.needs_capture = true;
    }

    /// Store a fresh capture, destroying the previous map.
    pub(crate) fn set_radiance_map(&mut self, map: RadianceMap) {
        if let Some(previous) = self.radiance_map.replace(map) {
            previous.destroy();
        }
        self.needs_capture = false;
    }

    pub(crate) fn release_gpu_resources(&mut self) {
        if let Some(map) = self.radiance_map.take() {
            log::debug!("Releasing radiance map of probe '{}'", self.id);
            map.destroy();
        }
    }
}

impl Drop for ProbeVolume {
    fn drop(&mut self) {
        self.release_gpu_resources();
    }
}
