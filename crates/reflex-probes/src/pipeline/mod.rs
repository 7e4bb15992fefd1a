//! Probe program variants and their pipeline cache

mod cache;
mod variant;

pub use cache::{ProbeProgram, ProgramCache, VariantSlots, PROGRAM_DEPTH_FORMAT};
pub use variant::ShaderVariantKey;
