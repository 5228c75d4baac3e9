// src/renderer/targets.rs
//! Render targets owned by one scene renderer: shadow map layers, pre-depth, the HDR geometry
//! buffer, the bloom chain and the LDR composite. Everything but the shadow map follows the
//! viewport size.

use super::frame_graph::{light_culling_groups, plan_bloom, BloomPlan, BloomSource};
use crate::config::RendererConfig;
use crate::gpu::{Framebuffer, FramebufferSpec, GpuContext, Image2D};
use std::sync::Arc;
use wgpu::util::DeviceExt;

/// Slots per screen tile in the visible light index buffer, terminator included.
pub const MAX_LIGHTS_PER_TILE: u32 = 64;

pub const COMPOSITE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

const DIRT_SIZE: u32 = 64;

/// Faint smudges, brightest toward the corners. Multiplied into bloom by the composite pass.
pub fn dirt_pixels(size: u32) -> Vec<u8> {
    let mut pixels = Vec::with_capacity((size * size * 4) as usize);
    let half = size as f32 * 0.5;
    for y in 0..size {
        for x in 0..size {
            let dx = (x as f32 + 0.5 - half) / half;
            let dy = (y as f32 + 0.5 - half) / half;
            let vignette = (dx * dx + dy * dy).sqrt().min(1.0);
            let hash = (x.wrapping_mul(73_856_093) ^ y.wrapping_mul(19_349_663)) % 97;
            let smudge = if hash < 5 { 0.5 } else { 0.0 };
            let value = ((vignette * 0.1 + smudge * vignette) * 255.0) as u8;
            pixels.extend_from_slice(&[value, value, value, 255]);
        }
    }
    pixels
}

pub struct BloomTargets {
    pub plan: BloomPlan,
    pub chain: [Arc<Image2D>; 3],
    /// Single-mip views, `views[image][mip]`.
    views: [Vec<Arc<wgpu::TextureView>>; 3],
}

impl BloomTargets {
    fn new(gpu: &GpuContext, config: &RendererConfig, width: u32, height: u32) -> Self {
        let plan = plan_bloom(width, height, config.bloom.work_group_size);
        let (w, h) = plan.size;
        let chain = [0, 1, 2].map(|i| Arc::new(Image2D::storage(gpu, &format!("bloom {i}"), w, h, plan.mip_levels)));
        let views = [0, 1, 2].map(|i| {
            (0..plan.mip_levels)
                .map(|mip| Arc::new(chain[i].mip_view(mip)))
                .collect::<Vec<_>>()
        });
        Self { plan, chain, views }
    }

    pub fn view(&self, image: usize, mip: u32) -> Option<&Arc<wgpu::TextureView>> {
        self.views.get(image).and_then(|views| views.get(mip as usize))
    }
}

pub struct FrameTargets {
    /// Bumped on every reallocation; descriptor sets written against an older version are stale.
    version: u64,
    size: (u32, u32),
    pub shadow_map: Arc<Image2D>,
    pub shadow_framebuffers: Vec<Framebuffer>,
    pub pre_depth: Framebuffer,
    pub geometry: Framebuffer,
    pub scene_color: Option<Arc<wgpu::TextureView>>,
    pub bloom: BloomTargets,
    pub bloom_dirt: Arc<Image2D>,
    pub composite: Framebuffer,
    pub late_composite: Framebuffer,
    pub visible_lights: Arc<wgpu::Buffer>,
}

fn visible_light_buffer(gpu: &GpuContext, config: &RendererConfig, width: u32, height: u32) -> wgpu::Buffer {
    let (x, y) = light_culling_groups(width, height, config.light_culling.tile_size);
    let slots = (x * y * MAX_LIGHTS_PER_TILE) as usize;
    // Every slot starts as the -1 terminator so an uncalled culling pass lights nothing.
    gpu.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("visible light indices"),
        contents: &vec![0xFFu8; slots * std::mem::size_of::<i32>()],
        usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
    })
}

impl FrameTargets {
    pub fn new(gpu: &GpuContext, config: &RendererConfig, width: u32, height: u32) -> Self {
        let (width, height) = (width.max(1), height.max(1));
        let shadows = &config.shadows;
        let shadow_map = Arc::new(Image2D::depth_array(
            gpu,
            "shadow map",
            shadows.map_size,
            shadows.cascade_count,
        ));
        let shadow_framebuffers = (0..shadows.cascade_count)
            .map(|layer| Framebuffer::depth_layer(Arc::clone(&shadow_map), layer, &format!("shadow cascade {layer}")))
            .collect();

        let pre_depth = Framebuffer::new(gpu, FramebufferSpec::new("pre-depth", width, height).with_depth());
        let geometry = Framebuffer::new(
            gpu,
            FramebufferSpec::new("geometry", width, height)
                .with_color(Image2D::HDR_FORMAT)
                .with_depth()
                .with_clear_color(wgpu::Color::BLACK),
        );
        let composite = Framebuffer::new(
            gpu,
            FramebufferSpec::new("composite", width, height).with_color(COMPOSITE_FORMAT),
        );
        let late_composite = Framebuffer::sharing(&composite, "late composite");
        let bloom_dirt = Arc::new(Image2D::from_rgba8(
            gpu,
            "bloom dirt",
            DIRT_SIZE,
            DIRT_SIZE,
            &dirt_pixels(DIRT_SIZE),
        ));

        Self {
            version: 1,
            size: (width, height),
            scene_color: Self::color_view(&geometry),
            bloom: BloomTargets::new(gpu, config, width, height),
            visible_lights: Arc::new(visible_light_buffer(gpu, config, width, height)),
            shadow_map,
            shadow_framebuffers,
            pre_depth,
            geometry,
            bloom_dirt,
            composite,
            late_composite,
        }
    }

    fn color_view(framebuffer: &Framebuffer) -> Option<Arc<wgpu::TextureView>> {
        framebuffer.color(0).map(|image| Arc::new(image.mip_view(0)))
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    /// Reallocate every viewport-sized target. Returns whether anything changed.
    pub fn resize(&mut self, gpu: &GpuContext, config: &RendererConfig, width: u32, height: u32) -> bool {
        if width == 0 || height == 0 || (width, height) == self.size {
            return false;
        }
        log::debug!("Resizing frame targets to {width}x{height}");
        self.size = (width, height);
        self.pre_depth.resize(gpu, width, height);
        self.geometry.resize(gpu, width, height);
        self.scene_color = Self::color_view(&self.geometry);
        self.composite.resize(gpu, width, height);
        self.late_composite = Framebuffer::sharing(&self.composite, "late composite");
        self.bloom = BloomTargets::new(gpu, config, width, height);
        self.visible_lights = Arc::new(visible_light_buffer(gpu, config, width, height));
        self.version += 1;
        true
    }

    /// View a bloom dispatch reads for `source` at `mip`.
    pub fn bloom_source(&self, source: BloomSource, mip: u32) -> Option<Arc<wgpu::TextureView>> {
        match source {
            BloomSource::SceneColor => self.scene_color.clone(),
            BloomSource::Chain(image) => self.bloom.view(image, mip).cloned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dirt_is_dim_and_opaque() {
        let pixels = dirt_pixels(16);
        assert_eq!(pixels.len(), 16 * 16 * 4);
        assert!(pixels.chunks(4).all(|p| p[3] == 255 && p[0] < 160));
        // centre is darker than the corners
        let at = |x: usize, y: usize| pixels[(y * 16 + x) * 4];
        assert!(at(8, 8) <= at(0, 0));
    }
}
