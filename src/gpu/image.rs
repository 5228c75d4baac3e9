// src/gpu/image.rs
//! 2D images (optionally layered / mipmapped) used as attachments and compute targets.

use super::GpuContext;

#[derive(Debug, Clone)]
pub struct ImageSpec {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub format: wgpu::TextureFormat,
    pub mip_levels: u32,
    pub layers: u32,
    /// View the whole image as a 2D array even with a single layer.
    pub array: bool,
    pub usage: wgpu::TextureUsages,
}

impl ImageSpec {
    pub fn new(label: &str, width: u32, height: u32, format: wgpu::TextureFormat) -> Self {
        Self {
            label: label.to_owned(),
            width: width.max(1),
            height: height.max(1),
            format,
            mip_levels: 1,
            layers: 1,
            array: false,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
        }
    }

    pub fn with_mips(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels.max(1);
        self
    }

    pub fn with_layers(mut self, layers: u32) -> Self {
        self.layers = layers.max(1);
        self.array = true;
        self
    }

    pub fn with_usage(mut self, usage: wgpu::TextureUsages) -> Self {
        self.usage = usage;
        self
    }
}

pub struct Image2D {
    pub texture: wgpu::Texture,
    /// View over every mip and layer.
    pub view: wgpu::TextureView,
    pub sampler: wgpu::Sampler,
    pub spec: ImageSpec,
}

impl Image2D {
    pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;
    pub const HDR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;

    pub fn new(gpu: &GpuContext, spec: ImageSpec) -> Self {
        let texture = gpu.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(&spec.label),
            size: wgpu::Extent3d {
                width: spec.width,
                height: spec.height,
                depth_or_array_layers: spec.layers,
            },
            mip_level_count: spec.mip_levels,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: spec.format,
            usage: spec.usage,
            view_formats: &[],
        });

        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some(&spec.label),
            dimension: Some(if spec.array {
                wgpu::TextureViewDimension::D2Array
            } else {
                wgpu::TextureViewDimension::D2
            }),
            ..Default::default()
        });

        let depth = spec.format.has_depth_aspect();
        let sampler = gpu.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some(&spec.label),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Linear,
            compare: depth.then_some(wgpu::CompareFunction::LessEqual),
            lod_min_clamp: 0.0,
            lod_max_clamp: 100.0,
            ..Default::default()
        });

        Self {
            texture,
            view,
            sampler,
            spec,
        }
    }

    pub fn render_target(gpu: &GpuContext, label: &str, width: u32, height: u32, format: wgpu::TextureFormat) -> Self {
        Self::new(gpu, ImageSpec::new(label, width, height, format))
    }

    pub fn depth_target(gpu: &GpuContext, label: &str, width: u32, height: u32) -> Self {
        Self::new(gpu, ImageSpec::new(label, width, height, Self::DEPTH_FORMAT))
    }

    /// Layered depth image sampled as `texture2DArray` (one layer per shadow cascade).
    pub fn depth_array(gpu: &GpuContext, label: &str, size: u32, layers: u32) -> Self {
        Self::new(
            gpu,
            ImageSpec::new(label, size, size, Self::DEPTH_FORMAT).with_layers(layers),
        )
    }

    /// Mipmapped storage image for compute chains (bloom).
    pub fn storage(gpu: &GpuContext, label: &str, width: u32, height: u32, mip_levels: u32) -> Self {
        Self::new(
            gpu,
            ImageSpec::new(label, width, height, Self::HDR_FORMAT)
                .with_mips(mip_levels)
                .with_usage(wgpu::TextureUsages::STORAGE_BINDING | wgpu::TextureUsages::TEXTURE_BINDING),
        )
    }

    /// Sampled RGBA8 image filled from `pixels` (tightly packed rows).
    pub fn from_rgba8(gpu: &GpuContext, label: &str, width: u32, height: u32, pixels: &[u8]) -> Self {
        let image = Self::new(
            gpu,
            ImageSpec::new(label, width, height, wgpu::TextureFormat::Rgba8Unorm)
                .with_usage(wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST),
        );
        gpu.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &image.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            pixels,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(4 * image.width()),
                rows_per_image: Some(image.height()),
            },
            wgpu::Extent3d {
                width: image.width(),
                height: image.height(),
                depth_or_array_layers: 1,
            },
        );
        image
    }

    pub fn solid(gpu: &GpuContext, label: &str, rgba: [u8; 4]) -> Self {
        Self::from_rgba8(gpu, label, 1, 1, &rgba)
    }

    pub fn width(&self) -> u32 {
        self.spec.width
    }

    pub fn height(&self) -> u32 {
        self.spec.height
    }

    pub fn format(&self) -> wgpu::TextureFormat {
        self.spec.format
    }

    pub fn mip_count(&self) -> u32 {
        self.spec.mip_levels
    }

    pub fn mip_size(&self, level: u32) -> (u32, u32) {
        mip_size(self.spec.width, self.spec.height, level)
    }

    /// View of one mip level (storage writes need single-mip views).
    pub fn mip_view(&self, level: u32) -> wgpu::TextureView {
        self.texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some(&self.spec.label),
            base_mip_level: level,
            mip_level_count: Some(1),
            ..Default::default()
        })
    }

    /// View of one array layer (per-cascade shadow attachments).
    pub fn layer_view(&self, layer: u32) -> wgpu::TextureView {
        self.texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some(&self.spec.label),
            dimension: Some(wgpu::TextureViewDimension::D2),
            base_array_layer: layer,
            array_layer_count: Some(1),
            ..Default::default()
        })
    }
}

/// Full mip chain length for a `width` x `height` image.
pub fn mip_count(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}

pub fn mip_size(width: u32, height: u32, level: u32) -> (u32, u32) {
    ((width >> level).max(1), (height >> level).max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mip_math() {
        assert_eq!(mip_count(1, 1), 1);
        assert_eq!(mip_count(1920, 1080), 11);
        assert_eq!(mip_count(960, 540), 10);
        assert_eq!(mip_size(960, 540, 3), (120, 67));
        assert_eq!(mip_size(4, 2, 5), (1, 1));
    }
}
