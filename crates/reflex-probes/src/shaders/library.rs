//! Block library for the probe-shaded material program

use std::fmt::Write as _;

use super::{ShaderBlock, ShaderComposer};
use crate::pipeline::ShaderVariantKey;
use crate::resources::PROBE_TEXTURE_BINDING_BASE;
use crate::Result;

/// Compute shader that convolves a capture into radiance mips.
pub const PREFILTER_SHADER: &str = include_str!("../../shaders/prefilter.wgsl");

// ── Base program ────────────────────────────────────────────────────────────

fn view_block() -> ShaderBlock {
    ShaderBlock::new("view", include_str!("../../shaders/blocks/view.wgsl"))
        .provides(&["camera", "globals"])
}

fn material_block() -> ShaderBlock {
    ShaderBlock::new("material", include_str!("../../shaders/blocks/material.wgsl"))
        .provides(&["material"])
}

fn vertex_block() -> ShaderBlock {
    ShaderBlock::new("vertex", include_str!("../../shaders/blocks/vertex.wgsl"))
        .provides(&["vertex_io", "vs_main"])
        .requires(&["camera", "material"])
}

fn brdf_block() -> ShaderBlock {
    ShaderBlock::new("brdf", include_str!("../../shaders/blocks/brdf.wgsl"))
        .provides(&["brdf"])
        .requires(&["globals"])
}

fn fragment_block() -> ShaderBlock {
    ShaderBlock::new("fragment", include_str!("../../shaders/blocks/fragment.wgsl"))
        .provides(&["fs_main"])
        .requires(&[
            "vertex_io",
            "brdf",
            "material",
            "indirect_specular",
            "lightmap_specular_occlusion",
        ])
}

// The two slots probe variants replace.

fn indirect_fallback_block() -> ShaderBlock {
    ShaderBlock::new("indirect_specular", include_str!("../../shaders/blocks/indirect_fallback.wgsl"))
        .provides(&["indirect_specular"])
        .requires(&["globals"])
}

fn lightmap_passthrough_block() -> ShaderBlock {
    ShaderBlock::new(
        "lightmap_occlusion",
        include_str!("../../shaders/blocks/lightmap_passthrough.wgsl"),
    )
    .provides(&["lightmap_specular_occlusion"])
}

// ── Probe blocks ────────────────────────────────────────────────────────────

fn probe_count_block(probe_count: u32) -> ShaderBlock {
    ShaderBlock::new("probe_count", format!("const PROBE_COUNT: u32 = {}u;", probe_count))
        .provides(&["PROBE_COUNT"])
}

fn probe_uniforms_block() -> ShaderBlock {
    ShaderBlock::new("probe_uniforms", include_str!("../../shaders/blocks/probe_uniforms.wgsl"))
        .provides(&["probes", "probe_sampler"])
        .requires(&["PROBE_COUNT"])
}

/// One cube texture binding per probe, and a `sample_probe` that switches
/// over them (WGSL has no arrays of sampled textures without extensions).
fn probe_maps_block(probe_count: u32) -> ShaderBlock {
    let mut source = String::new();
    for i in 0..probe_count {
        let _ = writeln!(
            source,
            "@group(2) @binding({}) var probe_map_{}: texture_cube<f32>;",
            PROBE_TEXTURE_BINDING_BASE + i,
            i
        );
    }
    source.push('\n');
    source.push_str("fn sample_probe(index: u32, direction: vec3<f32>, lod: f32) -> vec3<f32> {\n");
    source.push_str("    var radiance = vec3<f32>(0.0);\n");
    source.push_str("    switch index {\n");
    for i in 0..probe_count {
        let _ = writeln!(
            source,
            "        case {i}u: {{ radiance = textureSampleLevel(probe_map_{i}, probe_sampler, direction, lod).rgb; }}"
        );
    }
    source.push_str("        default: {}\n");
    source.push_str("    }\n");
    source.push_str("    return radiance;\n");
    source.push_str("}\n");

    ShaderBlock::new("probe_maps", source)
        .provides(&["sample_probe"])
        .requires(&["probe_sampler"])
}

fn probe_math_block() -> ShaderBlock {
    ShaderBlock::new("probe_math", include_str!("../../shaders/blocks/probe_math.wgsl"))
        .provides(&["parallax_correct", "probe_box_distance_sq", "PARALLAX_FAR"])
}

fn probe_nearest_block() -> ShaderBlock {
    ShaderBlock::new("probe_nearest", include_str!("../../shaders/blocks/probe_nearest.wgsl"))
        .provides(&["nearest_probe"])
        .requires(&["probes", "probe_box_distance_sq", "PARALLAX_FAR", "PROBE_COUNT"])
}

fn select_nearest_block() -> ShaderBlock {
    ShaderBlock::new("probe_select", include_str!("../../shaders/blocks/select_nearest.wgsl"))
        .provides(&["select_probe"])
        .requires(&["nearest_probe"])
}

fn select_walls_block() -> ShaderBlock {
    ShaderBlock::new("probe_select", include_str!("../../shaders/blocks/select_walls.wgsl"))
        .provides(&["select_probe"])
        .requires(&["nearest_probe", "route_floor_probe"])
}

fn wall_count_block(wall_count: u32) -> ShaderBlock {
    ShaderBlock::new("wall_count", format!("const WALL_COUNT: u32 = {}u;", wall_count))
        .provides(&["WALL_COUNT"])
}

fn wall_uniforms_block() -> ShaderBlock {
    ShaderBlock::new("wall_uniforms", include_str!("../../shaders/blocks/wall_uniforms.wgsl"))
        .provides(&["walls"])
        .requires(&["WALL_COUNT"])
}

fn wall_routing_block() -> ShaderBlock {
    ShaderBlock::new("wall_routing", include_str!("../../shaders/blocks/wall_routing.wgsl"))
        .provides(&["route_floor_probe"])
        .requires(&["walls", "probes", "PARALLAX_FAR"])
}

fn indirect_probe_block() -> ShaderBlock {
    ShaderBlock::new("indirect_specular", include_str!("../../shaders/blocks/indirect_probe.wgsl"))
        .provides(&["indirect_specular"])
        .requires(&["select_probe", "sample_probe", "parallax_correct", "probes"])
}

fn lightmap_transition_block() -> ShaderBlock {
    ShaderBlock::new(
        "lightmap_occlusion",
        include_str!("../../shaders/blocks/lightmap_transition.wgsl"),
    )
    .provides(&["lightmap_specular_occlusion"])
    .requires(&["probes"])
}

/// Blocks making up the program for `key`.
///
/// The base key yields the plain material program. Probe keys replace the
/// `indirect_specular` slot (and `lightmap_occlusion` when the transition is
/// on) and add the probe and wall blocks their counts call for.
pub fn program_composer(key: &ShaderVariantKey) -> ShaderComposer {
    let mut composer = ShaderComposer::new()
        .with(view_block())
        .with(material_block())
        .with(vertex_block())
        .with(brdf_block())
        .with(indirect_fallback_block())
        .with(lightmap_passthrough_block())
        .with(fragment_block());

    if key.is_base() {
        return composer;
    }

    composer.insert(probe_count_block(key.probe_count));
    composer.insert(probe_uniforms_block());
    composer.insert(probe_maps_block(key.probe_count));
    composer.insert(probe_math_block());
    composer.insert(probe_nearest_block());

    if key.has_walls() {
        composer.insert(wall_count_block(key.wall_count));
        composer.insert(wall_uniforms_block());
        composer.insert(wall_routing_block());
        composer.insert(select_walls_block());
    } else {
        composer.insert(select_nearest_block());
    }

    composer.insert(indirect_probe_block());
    if key.lightmap_transition {
        composer.insert(lightmap_transition_block());
    }
    composer
}

/// Composed WGSL for `key`.
pub fn program_source(key: &ShaderVariantKey) -> Result<String> {
    program_composer(key).compose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shaders::{block_start_marker, validate_wgsl};

    fn keys() -> Vec<ShaderVariantKey> {
        vec![
            ShaderVariantKey::BASE,
            ShaderVariantKey::new(1, 0, false),
            ShaderVariantKey::new(4, 0, true),
            ShaderVariantKey::new(2, 3, false),
            ShaderVariantKey::new(16, 64, true),
        ]
    }

    #[test]
    fn test_every_variant_validates() {
        for key in keys() {
            let source = program_source(&key).unwrap();
            if let Err(err) = validate_wgsl(&key.label(), &source) {
                panic!("{key}: {err}\n{source}");
            }
        }
    }

    #[test]
    fn test_prefilter_validates() {
        validate_wgsl("prefilter", PREFILTER_SHADER).unwrap();
    }

    #[test]
    fn test_base_program_has_no_probe_code() {
        let source = program_source(&ShaderVariantKey::BASE).unwrap();
        assert!(!source.contains("PROBE_COUNT"));
        assert!(!source.contains("@group(2)"));
        assert!(source.contains("fn fs_main"));
    }

    #[test]
    fn test_counts_size_the_arrays() {
        let source = program_source(&ShaderVariantKey::new(3, 5, false)).unwrap();
        assert!(source.contains("const PROBE_COUNT: u32 = 3u;"));
        assert!(source.contains("const WALL_COUNT: u32 = 5u;"));
        assert_eq!(source.matches("texture_cube<f32>;").count(), 3);
        assert!(source.contains("@group(2) @binding(5) var probe_map_2"));
    }

    #[test]
    fn test_wall_blocks_only_with_walls() {
        let source = program_source(&ShaderVariantKey::new(3, 0, false)).unwrap();
        assert!(!source.contains("WALL_COUNT"));
        assert!(!source.contains("route_floor_probe"));
    }

    #[test]
    fn test_guard_markers_are_unique() {
        let composer = program_composer(&ShaderVariantKey::new(2, 2, true));
        let source = composer.compose().unwrap();
        for name in [
            "indirect_specular",
            "lightmap_occlusion",
            "probe_select",
            "probe_maps",
            "fragment",
        ] {
            assert_eq!(source.matches(&block_start_marker(name)).count(), 1, "{name}");
        }
        assert!(source.contains("fn shape_probe_radiance"));
        assert!(!source.contains("ambient_intensity * (1.0 - roughness)"));
    }

    #[test]
    fn test_radiance_shaping_follows_cpu_order() {
        use crate::shading::shape_probe_radiance;
        use glam::Vec3;

        let source = program_source(&ShaderVariantKey::new(1, 0, false)).unwrap();
        let clamp = source
            .find("let clamped = clamp(radiance, vec3<f32>(0.0), vec3<f32>(1.0));")
            .unwrap();
        let shape = source
            .find("return pow(clamped, vec3<f32>(probes.contrast)) * probes.intensity;")
            .unwrap();
        assert!(clamp < shape);
        assert!(source.contains("return shape_probe_radiance(sample_probe(index, direction, lod));"));

        // The same steps on the CPU: over-range input clamps before contrast
        let shaped = shape_probe_radiance(Vec3::new(5.0, 0.5, 0.5), 2.0, 2.0);
        assert!((shaped - Vec3::new(2.0, 0.5, 0.5)).abs().max_element() < 1e-6);
    }

    #[test]
    fn test_reapplying_probe_blocks_is_idempotent() {
        let key = ShaderVariantKey::new(2, 1, true);
        let mut composer = program_composer(&key);
        let once = composer.compose().unwrap();

        composer.insert(indirect_probe_block());
        composer.insert(probe_maps_block(2));
        composer.insert(select_walls_block());
        assert_eq!(composer.compose().unwrap(), once);
    }

    #[test]
    fn test_composition_is_deterministic() {
        let key = ShaderVariantKey::new(5, 2, false);
        assert_eq!(program_source(&key).unwrap(), program_source(&key).unwrap());
    }
}
