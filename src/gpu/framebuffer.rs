// src/gpu/framebuffer.rs
//! Render-pass attachment sets that survive across frames and are rebuilt on resize.

use super::image::Image2D;
use super::GpuContext;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct FramebufferSpec {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub color_formats: Vec<wgpu::TextureFormat>,
    pub depth: bool,
    pub clear_color: wgpu::Color,
    /// Keep the previous contents instead of clearing when a pass begins.
    pub load: bool,
}

impl FramebufferSpec {
    pub fn new(label: &str, width: u32, height: u32) -> Self {
        Self {
            label: label.to_owned(),
            width,
            height,
            color_formats: Vec::new(),
            depth: false,
            clear_color: wgpu::Color::BLACK,
            load: false,
        }
    }

    pub fn with_color(mut self, format: wgpu::TextureFormat) -> Self {
        self.color_formats.push(format);
        self
    }

    pub fn with_depth(mut self) -> Self {
        self.depth = true;
        self
    }

    pub fn with_clear_color(mut self, color: wgpu::Color) -> Self {
        self.clear_color = color;
        self
    }

    pub fn loading(mut self) -> Self {
        self.load = true;
        self
    }
}

enum DepthAttachment {
    Owned(Arc<Image2D>),
    /// One layer of an image owned elsewhere (shadow cascades share one array texture).
    Layer {
        image: Arc<Image2D>,
        layer: u32,
        view: wgpu::TextureView,
    },
}

pub struct Framebuffer {
    spec: FramebufferSpec,
    color: Vec<Arc<Image2D>>,
    depth: Option<DepthAttachment>,
}

impl Framebuffer {
    pub fn new(gpu: &GpuContext, spec: FramebufferSpec) -> Self {
        let color = spec
            .color_formats
            .iter()
            .enumerate()
            .map(|(i, format)| {
                Arc::new(Image2D::render_target(
                    gpu,
                    &format!("{} color {i}", spec.label),
                    spec.width,
                    spec.height,
                    *format,
                ))
            })
            .collect();
        let depth = spec.depth.then(|| {
            DepthAttachment::Owned(Arc::new(Image2D::depth_target(
                gpu,
                &format!("{} depth", spec.label),
                spec.width,
                spec.height,
            )))
        });
        Self { spec, color, depth }
    }

    /// Depth-only framebuffer rendering into `layer` of a shared array image.
    pub fn depth_layer(image: Arc<Image2D>, layer: u32, label: &str) -> Self {
        let view = image.layer_view(layer);
        let spec = FramebufferSpec {
            label: label.to_owned(),
            width: image.width(),
            height: image.height(),
            color_formats: Vec::new(),
            depth: true,
            clear_color: wgpu::Color::BLACK,
            load: false,
        };
        Self {
            spec,
            color: Vec::new(),
            depth: Some(DepthAttachment::Layer { image, layer, view }),
        }
    }

    /// Same attachments as `other`'s but loaded rather than cleared, so a later pass
    /// can draw on top (late composite).
    pub fn sharing(other: &Framebuffer, label: &str) -> Self {
        let spec = FramebufferSpec {
            label: label.to_owned(),
            load: true,
            ..other.spec.clone()
        };
        let depth = other.depth.as_ref().map(|d| match d {
            DepthAttachment::Owned(image) => DepthAttachment::Owned(Arc::clone(image)),
            DepthAttachment::Layer { image, layer, .. } => DepthAttachment::Layer {
                image: Arc::clone(image),
                layer: *layer,
                view: image.layer_view(*layer),
            },
        });
        Self {
            spec,
            color: other.color.clone(),
            depth,
        }
    }

    pub fn spec(&self) -> &FramebufferSpec {
        &self.spec
    }

    pub fn size(&self) -> (u32, u32) {
        (self.spec.width, self.spec.height)
    }

    pub fn resize(&mut self, gpu: &GpuContext, width: u32, height: u32) {
        if (width, height) == self.size() || width == 0 || height == 0 {
            return;
        }
        let mut spec = self.spec.clone();
        spec.width = width;
        spec.height = height;
        *self = Self::new(gpu, spec);
    }

    pub fn color(&self, index: usize) -> Option<&Arc<Image2D>> {
        self.color.get(index)
    }

    pub fn depth_image(&self) -> Option<&Arc<Image2D>> {
        self.depth.as_ref().map(|d| match d {
            DepthAttachment::Owned(image) | DepthAttachment::Layer { image, .. } => image,
        })
    }

    fn depth_view(&self) -> Option<&wgpu::TextureView> {
        self.depth.as_ref().map(|d| match d {
            DepthAttachment::Owned(image) => &image.view,
            DepthAttachment::Layer { view, .. } => view,
        })
    }

    pub fn color_formats(&self) -> &[wgpu::TextureFormat] {
        &self.spec.color_formats
    }

    pub fn depth_format(&self) -> Option<wgpu::TextureFormat> {
        self.spec.depth.then_some(Image2D::DEPTH_FORMAT)
    }

    pub fn begin_pass<'e>(&self, encoder: &'e mut wgpu::CommandEncoder) -> wgpu::RenderPass<'e> {
        let color_load = if self.spec.load {
            wgpu::LoadOp::Load
        } else {
            wgpu::LoadOp::Clear(self.spec.clear_color)
        };
        let depth_load = if self.spec.load {
            wgpu::LoadOp::Load
        } else {
            wgpu::LoadOp::Clear(1.0)
        };
        let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment>> = self
            .color
            .iter()
            .map(|image| {
                Some(wgpu::RenderPassColorAttachment {
                    view: &image.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: color_load,
                        store: wgpu::StoreOp::Store,
                    },
                })
            })
            .collect();
        encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(&self.spec.label),
            color_attachments: &color_attachments,
            depth_stencil_attachment: self.depth_view().map(|view| {
                wgpu::RenderPassDepthStencilAttachment {
                    view,
                    depth_ops: Some(wgpu::Operations {
                        load: depth_load,
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }
            }),
            occlusion_query_set: None,
            timestamp_writes: None,
        })
    }
}
