//! Reflex Probes - box-projected reflection probes for wgpu
//!
//! Local environment captures for interior scenes:
//!
//! - Probe volumes are boxes captured from their center into a cube map,
//!   then prefiltered into a mip-chained radiance map (GGX convolution)
//! - Surfaces pick a probe by nearest box distance, or by routing the
//!   reflection ray through user-authored wall segments on floors
//! - Fragment programs are assembled from named WGSL blocks and cached per
//!   `(probe count, wall count, lightmap transition)` variant
//! - Registry mutations are published to typed observers, which keeps
//!   per-surface assignments from going stale after a box edit

pub mod assignment;
pub mod capture;
pub mod config;
pub mod features;
pub mod pipeline;
pub mod probes;
pub mod resources;
pub mod shaders;
pub mod shading;

mod camera;
mod context;
mod mesh;

pub use assignment::{
    BoundProbe, BoundWall, InvalidationFlag, ProbeAssignment, ProbeSelection, Surface, SurfaceId,
    SurfaceKind, SurfaceProbeBinding,
};
pub use camera::{Camera, CubeFace};
pub use capture::{CaptureFace, CaptureOutcome, CaptureScene, ObjectCategories, ProbeCapture, RadianceMap};
pub use config::{ProbeLimits, ProbeSettings};
pub use context::GpuContext;
pub use features::{Feature, FeatureContext, PrepareContext, ReflectionProbesFeature, ShaderDefine};
pub use mesh::Vertex;
pub use pipeline::{ProbeProgram, ProgramCache, ShaderVariantKey};
pub use probes::{
    verify_walls, ProbeEvent, ProbeId, ProbeRecord, ProbeRegistry, ProbeResolution, ProbeSet,
    ProbeVolume, SubscriptionId, WallLayout, WallSegment, WallsDocument,
};
pub use shading::{shape_probe_radiance, ShadingCache, SurfaceShading};

/// Result type for probe operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while managing, capturing or shading probes
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Invalid probe volume: {0}")]
    InvalidVolume(String),

    #[error("Duplicate probe id: {0}")]
    DuplicateProbe(String),

    #[error("Unknown probe id: {0}")]
    UnknownProbe(String),

    #[error("Invalid probe set: {0}")]
    InvalidProbeSet(String),

    #[error("Invalid walls: {0}")]
    InvalidWalls(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Shader error: {0}")]
    Shader(String),

    #[error("Pipeline error: {0}")]
    Pipeline(String),

    #[error("Capture error: {0}")]
    Capture(String),

    #[error("WGPU error: {0}")]
    Wgpu(String),
}

impl From<wgpu::Error> for Error {
    fn from(err: wgpu::Error) -> Self {
        Error::Wgpu(err.to_string())
    }
}
