//! Explicit GPU context handed to capture and shading

use std::sync::Arc;

use crate::config::{ProbeLimits, ProbeSettings};
use crate::{Error, Result};

/// Device and queue the probe subsystem renders with.
///
/// Passed to every operation that touches the GPU. Capture takes it as an
/// `Option` so a lost or not-yet-created context degrades to a skipped capture.
#[derive(Clone)]
pub struct GpuContext {
    pub device: Arc<wgpu::Device>,
    pub queue: Arc<wgpu::Queue>,
}

impl GpuContext {
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>) -> Self {
        Self { device, queue }
    }

    pub fn probe_limits(&self, settings: &ProbeSettings) -> ProbeLimits {
        ProbeLimits::from_device_limits(&self.device.limits(), settings)
    }
}

/// Run `f` inside a validation error scope and turn any captured device
/// error into [`Error::Wgpu`].
pub(crate) fn with_error_scope<T>(
    device: &wgpu::Device,
    label: &str,
    f: impl FnOnce() -> Result<T>,
) -> Result<T> {
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let result = f();
    let scope_error = pop_error_scope(device);

    let value = result?;
    match scope_error {
        Some(err) => Err(Error::Wgpu(format!("{}: {}", label, err))),
        None => Ok(value),
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn pop_error_scope(device: &wgpu::Device) -> Option<wgpu::Error> {
    pollster::block_on(device.pop_error_scope())
}

// The browser resolves error scopes asynchronously; errors surface through
// the uncaptured error handler instead.
#[cfg(target_arch = "wasm32")]
fn pop_error_scope(device: &wgpu::Device) -> Option<wgpu::Error> {
    let _ = device.pop_error_scope();
    None
}
