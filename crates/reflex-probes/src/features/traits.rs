//! Feature trait definition

use super::{FeatureContext, PrepareContext};
use crate::Result;
use std::collections::HashMap;

/// Shader constant reported by a feature
#[derive(Clone, Debug, PartialEq)]
pub enum ShaderDefine {
    Bool(bool),
    U32(u32),
    F32(f32),
}

/// A renderer component that can be toggled at runtime.
///
/// **Lifecycle:**
/// 1. `register()` - once, when the device is available
/// 2. `prepare()` - every frame before rendering
/// 3. `on_state_change()` - when the feature is enabled or disabled
/// 4. `cleanup()` - when the device goes away
pub trait Feature: Send + Sync + AsAny {
    /// Unique name for this feature (lowercase snake_case)
    fn name(&self) -> &str;

    /// Create the GPU objects the feature needs.
    fn register(&mut self, ctx: &mut FeatureContext) -> Result<()>;

    /// Update per-frame state.
    fn prepare(&mut self, ctx: &PrepareContext) -> Result<()>;

    fn on_state_change(&mut self, enabled: bool, ctx: &mut FeatureContext) -> Result<()> {
        let _ = (enabled, ctx);
        Ok(())
    }

    /// Constants describing the shader variants this feature currently uses.
    fn shader_defines(&self) -> HashMap<String, ShaderDefine> {
        HashMap::new()
    }

    /// Release all GPU resources.
    fn cleanup(&mut self, device: &wgpu::Device) {
        let _ = device;
    }

    fn is_enabled(&self) -> bool {
        true
    }

    fn set_enabled(&mut self, enabled: bool) {
        let _ = enabled;
    }
}

/// Helper trait for downcasting feature trait objects
pub trait AsAny {
    fn as_any(&self) -> &dyn std::any::Any;
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any;
}

impl<T: Feature + 'static> AsAny for T {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}
