//! Probe settings and device-derived limits

use serde::{Deserialize, Serialize};

use crate::capture::ObjectCategories;
use crate::probes::ProbeResolution;
use crate::{Error, Result};

/// Hard ceiling on probes bound to one surface, whatever the device allows.
pub const MAX_BOUND_PROBES: u32 = 16;

/// Hard ceiling on wall segments uploaded to one surface.
pub const MAX_BOUND_WALLS: u32 = 256;

/// Textures the base material program already samples (base color, lightmap).
pub const MATERIAL_TEXTURE_COUNT: u32 = 2;

/// Bytes per probe in the probe uniform block (center + size).
pub const PROBE_STRIDE_BYTES: u32 = 32;

/// Bytes per wall in the wall uniform block (segment + probe slot).
pub const WALL_STRIDE_BYTES: u32 = 32;

/// Trailing scalar block after the probe arrays.
pub const PROBE_PARAMS_BYTES: u32 = 16;

/// User-facing configuration for the probe subsystem.
///
/// Loaded from JSON or built with the `with_*` methods. Missing JSON fields
/// take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeSettings {
    /// Upper bound on probes bound to one surface (further capped by the device)
    pub max_bound_probes: u32,
    /// Resolution given to probes created without one
    pub default_resolution: ProbeResolution,
    /// Multiplier on sampled probe radiance
    pub intensity: f32,
    /// Exponent applied to clamped probe radiance
    pub contrast: f32,
    /// Maximum reflection ray length for wall routing on floors
    pub wall_blend_distance: f32,
    /// How much lightmap luminance attenuates probe specular (0 disables)
    pub lightmap_transition: f32,
    pub capture_near: f32,
    pub capture_far: f32,
    /// GGX samples per texel during prefiltering
    pub prefilter_samples: u32,
    /// Mip levels in each radiance map, clamped to what the resolution allows
    pub prefilter_mip_levels: u32,
    /// Smallest accepted box extent on any axis
    pub min_extent: f32,
    /// Categories hidden while a probe is captured
    pub excluded_categories: ObjectCategories,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            max_bound_probes: MAX_BOUND_PROBES,
            default_resolution: ProbeResolution::R512,
            intensity: 1.0,
            contrast: 1.0,
            wall_blend_distance: 8.0,
            lightmap_transition: 0.0,
            capture_near: 0.05,
            capture_far: 1000.0,
            prefilter_samples: 64,
            prefilter_mip_levels: 6,
            min_extent: 0.01,
            excluded_categories: ObjectCategories::all(),
        }
    }
}

impl ProbeSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let settings: Self = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn with_max_bound_probes(mut self, count: u32) -> Self {
        self.max_bound_probes = count;
        self
    }

    pub fn with_default_resolution(mut self, resolution: ProbeResolution) -> Self {
        self.default_resolution = resolution;
        self
    }

    pub fn with_intensity(mut self, intensity: f32) -> Self {
        self.intensity = intensity;
        self
    }

    pub fn with_contrast(mut self, contrast: f32) -> Self {
        self.contrast = contrast;
        self
    }

    pub fn with_wall_blend_distance(mut self, distance: f32) -> Self {
        self.wall_blend_distance = distance;
        self
    }

    pub fn with_lightmap_transition(mut self, transition: f32) -> Self {
        self.lightmap_transition = transition;
        self
    }

    pub fn with_capture_planes(mut self, near: f32, far: f32) -> Self {
        self.capture_near = near;
        self.capture_far = far;
        self
    }

    pub fn with_prefilter(mut self, samples: u32, mip_levels: u32) -> Self {
        self.prefilter_samples = samples;
        self.prefilter_mip_levels = mip_levels;
        self
    }

    pub fn with_min_extent(mut self, min_extent: f32) -> Self {
        self.min_extent = min_extent;
        self
    }

    pub fn with_excluded_categories(mut self, categories: ObjectCategories) -> Self {
        self.excluded_categories = categories;
        self
    }

    /// Whether shaded surfaces with a lightmap need the transition block.
    pub fn lightmap_transition_enabled(&self) -> bool {
        self.lightmap_transition > 0.0
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_bound_probes == 0 {
            return Err(Error::Config("max_bound_probes must be at least 1".into()));
        }
        if !(self.intensity.is_finite() && self.intensity >= 0.0) {
            return Err(Error::Config(format!("intensity must be >= 0, got {}", self.intensity)));
        }
        if !(self.contrast.is_finite() && self.contrast > 0.0) {
            return Err(Error::Config(format!("contrast must be > 0, got {}", self.contrast)));
        }
        if !(self.wall_blend_distance.is_finite() && self.wall_blend_distance >= 0.0) {
            return Err(Error::Config(format!(
                "wall_blend_distance must be >= 0, got {}",
                self.wall_blend_distance
            )));
        }
        if !(0.0..=1.0).contains(&self.lightmap_transition) {
            return Err(Error::Config(format!(
                "lightmap_transition must be within [0, 1], got {}",
                self.lightmap_transition
            )));
        }
        if !(self.capture_near > 0.0 && self.capture_far > self.capture_near) {
            return Err(Error::Config(format!(
                "capture planes must satisfy 0 < near < far, got {} / {}",
                self.capture_near, self.capture_far
            )));
        }
        if self.prefilter_samples == 0 || self.prefilter_mip_levels == 0 {
            return Err(Error::Config("prefilter samples and mip levels must be at least 1".into()));
        }
        if !(self.min_extent.is_finite() && self.min_extent > 0.0) {
            return Err(Error::Config(format!("min_extent must be > 0, got {}", self.min_extent)));
        }
        Ok(())
    }
}

/// Probe and wall counts the current device can bind in one draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeLimits {
    pub max_bound_probes: u32,
    pub max_bound_walls: u32,
}

impl ProbeLimits {
    pub fn from_device_limits(limits: &wgpu::Limits, settings: &ProbeSettings) -> Self {
        let texture_budget = limits
            .max_sampled_textures_per_shader_stage
            .saturating_sub(MATERIAL_TEXTURE_COUNT);
        let uniform_budget = limits
            .max_uniform_buffer_binding_size
            .saturating_sub(PROBE_PARAMS_BYTES)
            / PROBE_STRIDE_BYTES;

        let max_bound_probes = settings
            .max_bound_probes
            .min(MAX_BOUND_PROBES)
            .min(texture_budget)
            .min(uniform_budget);
        let max_bound_walls =
            (limits.max_uniform_buffer_binding_size / WALL_STRIDE_BYTES).min(MAX_BOUND_WALLS);

        log::debug!(
            "Probe limits: {} probes, {} walls per surface",
            max_bound_probes,
            max_bound_walls
        );

        Self {
            max_bound_probes,
            max_bound_walls,
        }
    }
}

impl Default for ProbeLimits {
    fn default() -> Self {
        Self::from_device_limits(&wgpu::Limits::default(), &ProbeSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = ProbeSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.max_bound_probes, 16);
        assert_eq!(settings.default_resolution, ProbeResolution::R512);
        assert!(!settings.lightmap_transition_enabled());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let settings = ProbeSettings::from_json(r#"{ "intensity": 2.0, "default_resolution": 1024 }"#)
            .unwrap();
        assert_eq!(settings.intensity, 2.0);
        assert_eq!(settings.default_resolution, ProbeResolution::R1024);
        assert_eq!(settings.contrast, 1.0);
        assert_eq!(settings.wall_blend_distance, 8.0);
    }

    #[test]
    fn test_json_round_trip() {
        let settings = ProbeSettings::default()
            .with_contrast(1.5)
            .with_lightmap_transition(0.5)
            .with_excluded_categories(ObjectCategories::GIZMOS);
        let parsed = ProbeSettings::from_json(&settings.to_json().unwrap()).unwrap();
        assert_eq!(parsed, settings);
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(ProbeSettings::default().with_contrast(0.0).validate().is_err());
        assert!(ProbeSettings::default().with_intensity(-1.0).validate().is_err());
        assert!(ProbeSettings::default().with_capture_planes(1.0, 0.5).validate().is_err());
        assert!(ProbeSettings::default().with_lightmap_transition(2.0).validate().is_err());
        assert!(ProbeSettings::from_json(r#"{ "default_resolution": 300 }"#).is_err());
    }

    #[test]
    fn test_limits_follow_texture_budget() {
        let limits = wgpu::Limits {
            max_sampled_textures_per_shader_stage: 8,
            ..wgpu::Limits::default()
        };
        let probe_limits = ProbeLimits::from_device_limits(&limits, &ProbeSettings::default());
        assert_eq!(probe_limits.max_bound_probes, 6);
    }

    #[test]
    fn test_limits_follow_settings() {
        let limits = wgpu::Limits {
            max_sampled_textures_per_shader_stage: 64,
            ..wgpu::Limits::default()
        };
        let settings = ProbeSettings::default().with_max_bound_probes(4);
        let probe_limits = ProbeLimits::from_device_limits(&limits, &settings);
        assert_eq!(probe_limits.max_bound_probes, 4);

        let generous = ProbeLimits::from_device_limits(&limits, &ProbeSettings::default().with_max_bound_probes(64));
        assert_eq!(generous.max_bound_probes, MAX_BOUND_PROBES);
        assert_eq!(generous.max_bound_walls, MAX_BOUND_WALLS);
    }
}
