//! Renderer-facing feature interface
//!
//! The probe subsystem plugs into a host renderer as a [`Feature`]: it
//! registers its GPU objects once, retires unused program variants every
//! frame, and hands out [`crate::SurfaceShading`] for each surface drawn.

mod context;
mod reflection_probes;
mod traits;

pub use context::{FeatureContext, PrepareContext};
pub use reflection_probes::ReflectionProbesFeature;
pub use traits::{AsAny, Feature, ShaderDefine};
