//! Texture pooling for capture targets
//!
//! Every capture needs a cube color target and a depth target at the probe's
//! resolution. Pooling them means repeated captures reuse the same textures
//! instead of allocating a fresh set each time.

use std::collections::HashMap;
use std::sync::Arc;

/// Key for texture pool lookup
#[derive(Hash, Eq, PartialEq, Clone, Copy, Debug)]
pub struct TextureKey {
    pub width: u32,
    pub height: u32,
    pub layers: u32,
    pub mip_level_count: u32,
    pub format: wgpu::TextureFormat,
    pub usage: wgpu::TextureUsages,
}

impl TextureKey {
    /// Six-layer square target at `size`
    pub fn cube(size: u32, format: wgpu::TextureFormat, usage: wgpu::TextureUsages) -> Self {
        Self {
            width: size,
            height: size,
            layers: 6,
            mip_level_count: 1,
            format,
            usage,
        }
    }

    /// Single-layer square target at `size`
    pub fn square(size: u32, format: wgpu::TextureFormat, usage: wgpu::TextureUsages) -> Self {
        Self {
            layers: 1,
            ..Self::cube(size, format, usage)
        }
    }

    pub fn from_descriptor(desc: &wgpu::TextureDescriptor) -> Self {
        Self {
            width: desc.size.width,
            height: desc.size.height,
            layers: desc.size.depth_or_array_layers,
            mip_level_count: desc.mip_level_count,
            format: desc.format,
            usage: desc.usage,
        }
    }

    pub fn to_descriptor<'a>(&self, label: Option<&'a str>) -> wgpu::TextureDescriptor<'a> {
        wgpu::TextureDescriptor {
            label,
            size: wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: self.layers,
            },
            mip_level_count: self.mip_level_count,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: self.format,
            usage: self.usage,
            view_formats: &[],
        }
    }
}

/// Pool for reusing textures between captures
pub struct TexturePool {
    device: Arc<wgpu::Device>,
    /// Released textures with the capture serial they were released at
    available: HashMap<TextureKey, Vec<(wgpu::Texture, u64)>>,
    created: u64,
    reused: u64,
}

impl TexturePool {
    pub fn new(device: Arc<wgpu::Device>) -> Self {
        Self {
            device,
            available: HashMap::new(),
            created: 0,
            reused: 0,
        }
    }

    /// Acquire a texture from the pool (or create new one)
    pub fn acquire(&mut self, key: TextureKey, label: &str) -> wgpu::Texture {
        if let Some((texture, _)) = self.available.get_mut(&key).and_then(|t| t.pop()) {
            log::trace!("Reusing pooled texture {:?}", key);
            self.reused += 1;
            return texture;
        }

        log::debug!("Creating new pooled texture '{}' {:?}", label, key);
        self.created += 1;
        self.device.create_texture(&key.to_descriptor(Some(label)))
    }

    /// Release a texture back to the pool
    pub fn release(&mut self, texture: wgpu::Texture, key: TextureKey, serial: u64) {
        self.available.entry(key).or_default().push((texture, serial));
    }

    /// Destroy textures released more than `max_age` captures ago
    pub fn cleanup_old(&mut self, current_serial: u64, max_age: u64) {
        let mut destroyed = 0;
        self.available.retain(|_key, textures| {
            textures.retain(|(texture, released)| {
                let keep = current_serial.saturating_sub(*released) < max_age;
                if !keep {
                    texture.destroy();
                    destroyed += 1;
                }
                keep
            });
            !textures.is_empty()
        });
        if destroyed > 0 {
            log::debug!("Texture pool destroyed {} stale textures", destroyed);
        }
    }

    /// Destroy every pooled texture
    pub fn clear(&mut self) {
        for (texture, _) in self.available.drain().flat_map(|(_, textures)| textures) {
            texture.destroy();
        }
    }

    pub fn available_count(&self) -> usize {
        self.available.values().map(Vec::len).sum()
    }

    /// Textures created and reused since the pool was built
    pub fn stats(&self) -> (u64, u64) {
        (self.created, self.reused)
    }
}
