// src/gpu/mod.rs
//! Device handles and render-target helpers shared by every pass.

pub mod framebuffer;
pub mod image;

pub use framebuffer::{Framebuffer, FramebufferSpec};
pub use image::{Image2D, ImageSpec};

use crate::error::{Error, Result};
use std::sync::Arc;

/// Push-constant budget every pipeline layout is allowed to use.
pub const MAX_PUSH_CONSTANT_SIZE: u32 = 128;

/// Explicit handle to the graphics device, passed to everything that creates GPU objects.
#[derive(Clone)]
pub struct GpuContext {
    pub device: Arc<wgpu::Device>,
    pub queue: Arc<wgpu::Queue>,
}

impl GpuContext {
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>) -> Self {
        Self { device, queue }
    }

    pub fn required_features() -> wgpu::Features {
        wgpu::Features::PUSH_CONSTANTS
    }

    pub fn required_limits(adapter: &wgpu::Adapter) -> wgpu::Limits {
        wgpu::Limits {
            max_push_constant_size: MAX_PUSH_CONSTANT_SIZE,
            ..wgpu::Limits::default().using_resolution(adapter.limits())
        }
    }

    /// Request a device with the features the renderer relies on.
    pub async fn request(adapter: &wgpu::Adapter) -> Result<Self> {
        let missing = Self::required_features() - adapter.features();
        if !missing.is_empty() {
            return Err(Error::ResourceExhausted(format!(
                "adapter lacks required features {missing:?}"
            )));
        }
        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("slop_render_device"),
                    required_features: Self::required_features(),
                    required_limits: Self::required_limits(adapter),
                    memory_hints: Default::default(),
                },
                None,
            )
            .await
            .map_err(|err| Error::ResourceExhausted(format!("device request failed: {err}")))?;
        device.on_uncaptured_error(Box::new(|err| log::error!("Uncaptured GPU error: {err}")));
        log::info!("Created device on {}", adapter.get_info().name);
        Ok(Self::new(Arc::new(device), Arc::new(queue)))
    }

    pub fn limits(&self) -> wgpu::Limits {
        self.device.limits()
    }
}
