//! Shader variant keys

use std::fmt;

/// Identifies one compiled probe program.
///
/// Probe and wall counts size the fixed-length uniform arrays, so each
/// distinct key is its own shader module and pipeline.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct ShaderVariantKey {
    pub probe_count: u32,
    pub wall_count: u32,
    pub lightmap_transition: bool,
}

impl ShaderVariantKey {
    /// The program without probe blocks.
    pub const BASE: ShaderVariantKey = ShaderVariantKey {
        probe_count: 0,
        wall_count: 0,
        lightmap_transition: false,
    };

    /// Normalized key: walls and the lightmap transition only exist on
    /// top of at least one probe.
    pub fn new(probe_count: u32, wall_count: u32, lightmap_transition: bool) -> Self {
        if probe_count == 0 {
            return Self::BASE;
        }
        Self {
            probe_count,
            wall_count,
            lightmap_transition,
        }
    }

    pub fn is_base(&self) -> bool {
        self.probe_count == 0
    }

    pub fn has_walls(&self) -> bool {
        self.wall_count > 0
    }

    pub fn label(&self) -> String {
        self.to_string()
    }
}

impl Default for ShaderVariantKey {
    fn default() -> Self {
        Self::BASE
    }
}

impl fmt::Display for ShaderVariantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_base() {
            return f.write_str("probe_program_base");
        }
        write!(f, "probe_program_p{}_w{}", self.probe_count, self.wall_count)?;
        if self.lightmap_transition {
            f.write_str("_lm")?;
        }
        Ok(())
    }
}
