// src/descriptor.rs
//! Reflected blueprints -> bind group layouts, uniform buffer storage and named descriptor writes.
//!
//! - **Layouts**: one [`SetLayoutDesc`] per reflected set (pure data, testable without a device),
//!   realised into `wgpu::BindGroupLayout`s when a [`GpuContext`] is available.
//! - **Uniform buffers**: allocated up front with a CPU shadow copy. [`UniformBufferMap`] is the
//!   scoped write guard; dropping it flushes the bytes to the GPU on every path.
//! - **Writes**: [`DescriptorSet::write`] resolves a reflected name to its binding. A miss is an
//!   error; [`DescriptorSet::write_optional`] is the tolerant variant for optional bindings.
//!
//! Bind groups are immutable in wgpu, so a [`DescriptorSet`] records resources per binding and
//! rebuilds its bind group lazily when something changed.

use crate::context::OptionContext;
use crate::error::{Error, Result};
use crate::gpu::{GpuContext, Image2D};
use crate::shader::reflect::{
    BufferBlueprint, DescriptorSetBlueprint, ImageBlueprint, ImageDimension, ImageSampleKind,
    ResourceKind, SamplerBlueprint, ShaderReflection, StorageAccess,
};
use crate::shader::ShaderStage;
use std::collections::BTreeMap;
use std::num::{NonZeroU32, NonZeroU64};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use wgpu::{BindGroupLayoutEntry, BindingType, ShaderStages};

// ====================== LAYOUT DERIVATION ======================

/// Stage mask for a reflected stage flag.
pub fn stage_mask(stage: ShaderStage) -> ShaderStages {
    match stage {
        ShaderStage::Vertex => ShaderStages::VERTEX,
        ShaderStage::Fragment | ShaderStage::Geometry => ShaderStages::FRAGMENT,
        ShaderStage::Compute => ShaderStages::COMPUTE,
        ShaderStage::All => ShaderStages::VERTEX_FRAGMENT | ShaderStages::COMPUTE,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayoutBinding {
    pub name: String,
    pub kind: ResourceKind,
    pub entry: BindGroupLayoutEntry,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SetLayoutDesc {
    pub set: u32,
    pub bindings: Vec<LayoutBinding>,
}

impl SetLayoutDesc {
    pub fn entries(&self) -> Vec<BindGroupLayoutEntry> {
        self.bindings.iter().map(|b| b.entry).collect()
    }
}

/// Descriptor counts per kind, summed over every set (array elements included).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolSizes {
    pub uniform_buffers: u32,
    pub storage_buffers: u32,
    pub sampled_images: u32,
    pub storage_images: u32,
    pub samplers: u32,
}

impl PoolSizes {
    fn add(&mut self, kind: ResourceKind, count: u32) {
        let slot = match kind {
            ResourceKind::UniformBuffer => &mut self.uniform_buffers,
            ResourceKind::StorageBuffer => &mut self.storage_buffers,
            ResourceKind::SampledImage => &mut self.sampled_images,
            ResourceKind::StorageImage => &mut self.storage_images,
            ResourceKind::Sampler => &mut self.samplers,
        };
        *slot += count;
    }

    /// Exceeding a device limit is a configuration error, not something to recover from.
    pub fn check_limits(&self, limits: &wgpu::Limits) -> Result<()> {
        let checks = [
            ("uniform buffers", self.uniform_buffers, limits.max_uniform_buffers_per_shader_stage),
            ("storage buffers", self.storage_buffers, limits.max_storage_buffers_per_shader_stage),
            ("sampled textures", self.sampled_images, limits.max_sampled_textures_per_shader_stage),
            ("storage textures", self.storage_images, limits.max_storage_textures_per_shader_stage),
            ("samplers", self.samplers, limits.max_samplers_per_shader_stage),
        ];
        for (what, used, limit) in checks {
            if used > limit {
                return Err(Error::ResourceExhausted(format!(
                    "{used} {what} exceed the device limit of {limit}"
                )));
            }
        }
        Ok(())
    }
}

fn buffer_entry(ub: &BufferBlueprint, storage: bool) -> BindGroupLayoutEntry {
    BindGroupLayoutEntry {
        binding: ub.binding,
        visibility: stage_mask(ub.stage),
        ty: BindingType::Buffer {
            ty: if storage {
                wgpu::BufferBindingType::Storage { read_only: ub.read_only }
            } else {
                wgpu::BufferBindingType::Uniform
            },
            has_dynamic_offset: false,
            // Storage buffers may end in a runtime array, so leave their size unchecked.
            min_binding_size: if storage { None } else { NonZeroU64::new(ub.size as u64) },
        },
        count: None,
    }
}

fn view_dimension(image: &ImageBlueprint) -> wgpu::TextureViewDimension {
    use wgpu::TextureViewDimension as D;
    match (image.dimension, image.arrayed) {
        (ImageDimension::D1, _) => D::D1,
        (ImageDimension::D2, false) => D::D2,
        (ImageDimension::D2, true) => D::D2Array,
        (ImageDimension::D3, _) => D::D3,
        (ImageDimension::Cube, false) => D::Cube,
        (ImageDimension::Cube, true) => D::CubeArray,
    }
}

/// SPIR-V `ImageFormat` operand -> wgpu storage format.
pub fn storage_format(format: u32) -> Option<wgpu::TextureFormat> {
    use wgpu::TextureFormat as F;
    Some(match format {
        1 => F::Rgba32Float,
        2 => F::Rgba16Float,
        3 => F::R32Float,
        4 => F::Rgba8Unorm,
        5 => F::Rgba8Snorm,
        6 => F::Rg32Float,
        7 => F::Rg16Float,
        21 => F::Rgba32Sint,
        22 => F::Rgba16Sint,
        23 => F::Rgba8Sint,
        24 => F::R32Sint,
        30 => F::Rgba32Uint,
        31 => F::Rgba16Uint,
        32 => F::Rgba8Uint,
        33 => F::R32Uint,
        _ => return None,
    })
}

fn image_entry(image: &ImageBlueprint, storage: bool) -> Result<BindGroupLayoutEntry> {
    let ty = if storage {
        let format = storage_format(image.format).ok_or_else(|| {
            Error::Reflection(format!(
                "storage image '{}' has unsupported format {}",
                image.name, image.format
            ))
        })?;
        BindingType::StorageTexture {
            access: match image.access {
                StorageAccess::ReadOnly => wgpu::StorageTextureAccess::ReadOnly,
                StorageAccess::WriteOnly => wgpu::StorageTextureAccess::WriteOnly,
                StorageAccess::ReadWrite => wgpu::StorageTextureAccess::ReadWrite,
            },
            format,
            view_dimension: view_dimension(image),
        }
    } else {
        BindingType::Texture {
            sample_type: match image.sample_kind {
                ImageSampleKind::Float => wgpu::TextureSampleType::Float {
                    filterable: image.filterable,
                },
                ImageSampleKind::Depth => wgpu::TextureSampleType::Depth,
                ImageSampleKind::Sint => wgpu::TextureSampleType::Sint,
                ImageSampleKind::Uint => wgpu::TextureSampleType::Uint,
            },
            view_dimension: view_dimension(image),
            multisampled: image.multisampled,
        }
    };
    Ok(BindGroupLayoutEntry {
        binding: image.binding,
        visibility: stage_mask(image.stage),
        ty,
        count: (image.array_size > 1).then(|| NonZeroU32::new(image.array_size)).flatten(),
    })
}

fn sampler_binding_type(sampler: &SamplerBlueprint) -> wgpu::SamplerBindingType {
    match (sampler.comparison, sampler.filtering) {
        (true, _) => wgpu::SamplerBindingType::Comparison,
        (false, true) => wgpu::SamplerBindingType::Filtering,
        (false, false) => wgpu::SamplerBindingType::NonFiltering,
    }
}

fn sampler_entry(sampler: &SamplerBlueprint) -> BindGroupLayoutEntry {
    BindGroupLayoutEntry {
        binding: sampler.binding,
        visibility: stage_mask(sampler.stage),
        ty: BindingType::Sampler(sampler_binding_type(sampler)),
        count: (sampler.array_size > 1).then(|| NonZeroU32::new(sampler.array_size)).flatten(),
    }
}

/// Build the layout description of one set and add its descriptors to `pool`.
pub fn describe_set(blueprint: &DescriptorSetBlueprint, pool: &mut PoolSizes) -> Result<SetLayoutDesc> {
    let mut bindings = Vec::new();
    for ub in blueprint.uniform_buffers.values() {
        bindings.push(LayoutBinding {
            name: ub.name.clone(),
            kind: ResourceKind::UniformBuffer,
            entry: buffer_entry(ub, false),
        });
    }
    for sb in blueprint.storage_buffers.values() {
        bindings.push(LayoutBinding {
            name: sb.name.clone(),
            kind: ResourceKind::StorageBuffer,
            entry: buffer_entry(sb, true),
        });
    }
    for image in &blueprint.sampled_images {
        bindings.push(LayoutBinding {
            name: image.name.clone(),
            kind: ResourceKind::SampledImage,
            entry: image_entry(image, false)?,
        });
    }
    for image in &blueprint.storage_images {
        bindings.push(LayoutBinding {
            name: image.name.clone(),
            kind: ResourceKind::StorageImage,
            entry: image_entry(image, true)?,
        });
    }
    for sampler in &blueprint.samplers {
        bindings.push(LayoutBinding {
            name: sampler.name.clone(),
            kind: ResourceKind::Sampler,
            entry: sampler_entry(sampler),
        });
    }
    bindings.sort_by_key(|b| b.entry.binding);
    for b in &bindings {
        pool.add(b.kind, b.entry.count.map_or(1, NonZeroU32::get));
    }
    Ok(SetLayoutDesc {
        set: blueprint.set,
        bindings,
    })
}

// ====================== UNIFORM BUFFERS ======================

struct UniformBufferSlot {
    blueprint: BufferBlueprint,
    data: Vec<u8>,
    buffer: Option<Arc<wgpu::Buffer>>,
}

/// Scoped write access to a uniform buffer's bytes. Dropping it uploads them.
pub struct UniformBufferMap<'a> {
    slot: &'a mut UniformBufferSlot,
    queue: Option<&'a wgpu::Queue>,
}

impl Deref for UniformBufferMap<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.slot.data
    }
}

impl DerefMut for UniformBufferMap<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.slot.data
    }
}

impl Drop for UniformBufferMap<'_> {
    fn drop(&mut self) {
        if let (Some(queue), Some(buffer)) = (self.queue, self.slot.buffer.as_ref()) {
            queue.write_buffer(buffer, 0, &self.slot.data);
        }
    }
}

/// Where a reflected name lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedBinding {
    pub set: u32,
    pub binding: u32,
    pub kind: ResourceKind,
    pub array_size: u32,
}

// ====================== LAYER ======================

pub struct DescriptorSetLayer {
    label: String,
    reflection: ShaderReflection,
    layouts: BTreeMap<u32, SetLayoutDesc>,
    pool_sizes: PoolSizes,
    uniform_buffers: BTreeMap<(u32, u32), UniformBufferSlot>,
    native_layouts: BTreeMap<u32, Arc<wgpu::BindGroupLayout>>,
    gpu: Option<GpuContext>,
}

impl DescriptorSetLayer {
    /// Derive every set layout, allocate uniform buffers and, with a device, realise the layouts.
    #[tracing::instrument(skip(reflection, gpu), fields(sets = reflection.sets.len()))]
    pub fn create(label: &str, reflection: &ShaderReflection, gpu: Option<&GpuContext>) -> Result<Self> {
        let mut pool_sizes = PoolSizes::default();
        let mut layouts = BTreeMap::new();
        for (set, blueprint) in &reflection.sets {
            layouts.insert(*set, describe_set(blueprint, &mut pool_sizes)?);
        }

        if let Some(gpu) = gpu {
            let limits = gpu.limits();
            pool_sizes.check_limits(&limits)?;
            if reflection.set_count() > limits.max_bind_groups {
                return Err(Error::ResourceExhausted(format!(
                    "'{label}' uses {} bind groups, device allows {}",
                    reflection.set_count(),
                    limits.max_bind_groups
                )));
            }
            if reflection.push_constant_size() > limits.max_push_constant_size {
                return Err(Error::ResourceExhausted(format!(
                    "'{label}' needs {} push-constant bytes, device allows {}",
                    reflection.push_constant_size(),
                    limits.max_push_constant_size
                )));
            }
        }

        let mut uniform_buffers = BTreeMap::new();
        for ub in reflection.sets.values().flat_map(|s| s.uniform_buffers.values()) {
            let buffer = gpu.map(|gpu| {
                Arc::new(gpu.device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some(&format!("{label} {}", ub.name)),
                    size: (ub.size as u64).max(16),
                    usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                }))
            });
            uniform_buffers.insert(
                (ub.set, ub.binding),
                UniformBufferSlot {
                    blueprint: ub.clone(),
                    data: vec![0; ub.size as usize],
                    buffer,
                },
            );
        }

        let mut native_layouts = BTreeMap::new();
        if let Some(gpu) = gpu {
            for set in 0..reflection.set_count() {
                let entries = layouts.get(&set).map(SetLayoutDesc::entries).unwrap_or_default();
                let layout = gpu.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some(&format!("{label} set {set}")),
                    entries: &entries,
                });
                native_layouts.insert(set, Arc::new(layout));
            }
        }

        tracing::debug!(?pool_sizes, "Created descriptor layer for '{label}'");
        Ok(Self {
            label: label.to_owned(),
            reflection: reflection.clone(),
            layouts,
            pool_sizes,
            uniform_buffers,
            native_layouts,
            gpu: gpu.cloned(),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn reflection(&self) -> &ShaderReflection {
        &self.reflection
    }

    pub fn pool_sizes(&self) -> PoolSizes {
        self.pool_sizes
    }

    pub fn set_layout(&self, set: u32) -> Option<&SetLayoutDesc> {
        self.layouts.get(&set)
    }

    pub fn bind_group_layout(&self, set: u32) -> Result<&Arc<wgpu::BindGroupLayout>> {
        self.native_layouts
            .get(&set)
            .with_context(|| format!("'{}' has no realised layout for set {set}", self.label))
    }

    /// Layouts for sets `0..set_count`, gaps filled with empty layouts.
    pub fn bind_group_layouts(&self) -> Vec<&wgpu::BindGroupLayout> {
        self.native_layouts.values().map(|l| l.as_ref()).collect()
    }

    pub fn push_constant_ranges(&self) -> Vec<wgpu::PushConstantRange> {
        self.reflection
            .push_constant_ranges
            .iter()
            .map(|r| wgpu::PushConstantRange {
                stages: stage_mask(r.stage),
                range: r.offset..r.offset + r.size,
            })
            .collect()
    }

    /// Find the binding a reflected name refers to.
    pub fn resolve(&self, name: &str) -> Result<ResolvedBinding> {
        let found = self.reflection.find_resource(name).or_unknown(name)?;
        Ok(ResolvedBinding {
            set: found.set,
            binding: found.binding,
            kind: found.kind,
            array_size: found.array_size,
        })
    }

    /// Scoped write access to the uniform buffer at (set, binding).
    pub fn map_uniform_buffer(&mut self, set: u32, binding: u32) -> Result<UniformBufferMap<'_>> {
        let queue = self.gpu.as_ref().map(|gpu| gpu.queue.as_ref());
        let slot = self
            .uniform_buffers
            .get_mut(&(set, binding))
            .with_context(|| format!("no uniform buffer at set {set} binding {binding}"))?;
        Ok(UniformBufferMap { slot, queue })
    }

    /// Copy `bytes` to the start of the uniform buffer.
    pub fn upload_uniform_buffer(&mut self, set: u32, binding: u32, bytes: &[u8]) -> Result<()> {
        let mut map = self.map_uniform_buffer(set, binding)?;
        if bytes.len() > map.len() {
            return Err(Error::ResourceExhausted(format!(
                "{} bytes do not fit uniform buffer '{}' ({} bytes)",
                bytes.len(),
                map.slot.blueprint.name,
                map.len()
            )));
        }
        map[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    pub fn uniform_buffer(&self, set: u32, binding: u32) -> Option<&Arc<wgpu::Buffer>> {
        self.uniform_buffers.get(&(set, binding)).and_then(|s| s.buffer.as_ref())
    }

    pub fn uniform_buffer_bytes(&self, set: u32, binding: u32) -> Option<&[u8]> {
        self.uniform_buffers.get(&(set, binding)).map(|s| s.data.as_slice())
    }

    pub fn allocate_set(&self, set: u32) -> DescriptorSet {
        DescriptorSet::new(&self.label, set)
    }
}

// ====================== DESCRIPTOR SETS ======================

#[derive(Clone)]
pub enum DescriptorResource {
    Buffer(Arc<wgpu::Buffer>),
    Image(Arc<Image2D>),
    View(Arc<wgpu::TextureView>),
    ViewArray(Vec<Arc<wgpu::TextureView>>),
    Sampler(Arc<wgpu::Sampler>),
}

impl DescriptorResource {
    fn fits(&self, kind: ResourceKind) -> bool {
        match self {
            DescriptorResource::Buffer(_) => {
                matches!(kind, ResourceKind::UniformBuffer | ResourceKind::StorageBuffer)
            }
            DescriptorResource::Image(_) | DescriptorResource::View(_) | DescriptorResource::ViewArray(_) => {
                matches!(kind, ResourceKind::SampledImage | ResourceKind::StorageImage)
            }
            DescriptorResource::Sampler(_) => kind == ResourceKind::Sampler,
        }
    }

    /// `None` for view arrays, which borrow a separate list of views.
    fn binding_resource(&self) -> Option<wgpu::BindingResource<'_>> {
        match self {
            DescriptorResource::Buffer(buffer) => Some(buffer.as_entire_binding()),
            DescriptorResource::Image(image) => Some(wgpu::BindingResource::TextureView(&image.view)),
            DescriptorResource::View(view) => Some(wgpu::BindingResource::TextureView(view)),
            DescriptorResource::ViewArray(_) => None,
            DescriptorResource::Sampler(sampler) => Some(wgpu::BindingResource::Sampler(sampler)),
        }
    }
}

/// Resources for one set index plus the bind group built from them.
pub struct DescriptorSet {
    label: String,
    set: u32,
    resources: BTreeMap<u32, DescriptorResource>,
    bind_group: Option<wgpu::BindGroup>,
}

impl DescriptorSet {
    pub fn new(label: &str, set: u32) -> Self {
        Self {
            label: format!("{label} set {set}"),
            set,
            resources: BTreeMap::new(),
            bind_group: None,
        }
    }

    pub fn set(&self) -> u32 {
        self.set
    }

    /// Bind `resource` to the binding named `name`. Unknown names and kind mismatches are errors.
    pub fn write(&mut self, layer: &DescriptorSetLayer, name: &str, resource: DescriptorResource) -> Result<()> {
        let resolved = layer.resolve(name)?;
        if resolved.set != self.set {
            return Err(Error::Reflection(format!(
                "'{name}' lives in set {}, not set {}",
                resolved.set, self.set
            )));
        }
        if !resource.fits(resolved.kind) {
            return Err(Error::Reflection(format!(
                "'{name}' is a {:?} binding",
                resolved.kind
            )));
        }
        self.write_binding(resolved.binding, resource);
        Ok(())
    }

    /// Like [`write`](Self::write) but a missing name is fine. Returns whether anything was bound.
    pub fn write_optional(
        &mut self,
        layer: &DescriptorSetLayer,
        name: &str,
        resource: DescriptorResource,
    ) -> Result<bool> {
        match self.write(layer, name, resource) {
            Ok(()) => Ok(true),
            Err(err) if err.is_unknown_resource() => {
                log::debug!("{}: optional binding '{name}' not declared", self.label);
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    pub fn write_binding(&mut self, binding: u32, resource: DescriptorResource) {
        self.resources.insert(binding, resource);
        self.bind_group = None;
    }

    /// Bind every reflected uniform buffer of this set to the layer's backing buffer.
    pub fn write_all_uniform_buffers(&mut self, layer: &DescriptorSetLayer) -> Result<()> {
        let Some(desc) = layer.set_layout(self.set) else {
            return Ok(());
        };
        for binding in desc.bindings.iter().filter(|b| b.kind == ResourceKind::UniformBuffer) {
            let buffer = layer
                .uniform_buffer(self.set, binding.entry.binding)
                .with_context(|| format!("uniform buffer '{}' has no GPU storage", binding.name))?;
            self.write_binding(binding.entry.binding, DescriptorResource::Buffer(Arc::clone(buffer)));
        }
        Ok(())
    }

    /// Names of layout bindings that have nothing written yet.
    pub fn missing(&self, layer: &DescriptorSetLayer) -> Vec<String> {
        layer
            .set_layout(self.set)
            .map(|desc| {
                desc.bindings
                    .iter()
                    .filter(|b| !self.resources.contains_key(&b.entry.binding))
                    .map(|b| b.name.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Bind group built by the last [`bind_group`](Self::bind_group) call, if still current.
    pub fn current_bind_group(&self) -> Option<&wgpu::BindGroup> {
        self.bind_group.as_ref()
    }

    /// The bind group for the current resources, rebuilt if anything was written since last time.
    pub fn bind_group(&mut self, gpu: &GpuContext, layer: &DescriptorSetLayer) -> Result<&wgpu::BindGroup> {
        if self.bind_group.is_none() {
            let missing = self.missing(layer);
            if !missing.is_empty() {
                return Err(Error::Reflection(format!(
                    "{}: nothing written for {}",
                    self.label,
                    missing.join(", ")
                )));
            }
            let layout = layer.bind_group_layout(self.set)?;
            let arrays: BTreeMap<u32, Vec<&wgpu::TextureView>> = self
                .resources
                .iter()
                .filter_map(|(binding, res)| match res {
                    DescriptorResource::ViewArray(views) => {
                        Some((*binding, views.iter().map(|v| v.as_ref()).collect()))
                    }
                    _ => None,
                })
                .collect();
            let entries: Vec<wgpu::BindGroupEntry> = self
                .resources
                .iter()
                .filter_map(|(binding, res)| {
                    let resource = match arrays.get(binding) {
                        Some(views) => wgpu::BindingResource::TextureViewArray(views),
                        None => res.binding_resource()?,
                    };
                    Some(wgpu::BindGroupEntry {
                        binding: *binding,
                        resource,
                    })
                })
                .collect();
            self.bind_group = Some(gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(&self.label),
                layout,
                entries: &entries,
            }));
        }
        self.bind_group
            .as_ref()
            .with_context(|| format!("{} has no bind group", self.label))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader::reflect::{reflect_stages, PushConstantRange};
    use crate::shader::spirv::builder::SpirvBuilder;
    use crate::shader::spirv::{dim, storage_class};

    fn reflection() -> ShaderReflection {
        let mut vs = SpirvBuilder::new();
        let f = vs.float();
        let vec4 = vs.vector(f, 4);
        let mat4 = vs.matrix(vec4, 4);
        vs.buffer_block(storage_class::UNIFORM, "Camera", "", &[("ViewProjection", mat4, 0)], 0, 0);
        let vs = vs.build();

        let mut fs = SpirvBuilder::new();
        let f = fs.float();
        let vec4 = fs.vector(f, 4);
        let mat4 = fs.matrix(vec4, 4);
        fs.buffer_block(storage_class::UNIFORM, "Camera", "", &[("ViewProjection", mat4, 0)], 0, 0);
        let tex = fs.image(f, dim::D2, 1);
        fs.resource(tex, "u_AlbedoTexture", 1, 0);
        let sampler = fs.sampler();
        fs.resource(sampler, "u_Sampler", 1, 1);
        fs.buffer_block(storage_class::STORAGE_BUFFER, "PointLights", "", &[("Count", vec4, 0)], 2, 0);
        let fs = fs.build();

        let mut reflection =
            reflect_stages([(ShaderStage::Vertex, &vs[..]), (ShaderStage::Fragment, &fs[..])]).unwrap();
        reflection.push_constant_ranges.push(PushConstantRange {
            name: "u_Material".into(),
            stage: ShaderStage::Fragment,
            offset: 0,
            size: 32,
        });
        reflection
    }

    #[test]
    fn layout_entries_follow_reflection() {
        let layer = DescriptorSetLayer::create("StaticMesh", &reflection(), None).unwrap();

        let set0 = layer.set_layout(0).unwrap();
        assert_eq!(set0.bindings.len(), 1);
        let camera = &set0.bindings[0].entry;
        assert_eq!(camera.visibility, ShaderStages::VERTEX_FRAGMENT | ShaderStages::COMPUTE);
        assert!(matches!(
            camera.ty,
            BindingType::Buffer { ty: wgpu::BufferBindingType::Uniform, min_binding_size: Some(size), .. }
                if size.get() == 64
        ));

        let set1 = layer.set_layout(1).unwrap();
        assert_eq!(set1.bindings.len(), 2);
        assert_eq!(set1.bindings[0].kind, ResourceKind::SampledImage);
        assert_eq!(set1.bindings[0].entry.visibility, ShaderStages::FRAGMENT);
        assert_eq!(set1.bindings[1].kind, ResourceKind::Sampler);

        let pool = layer.pool_sizes();
        assert_eq!(pool.uniform_buffers, 1);
        assert_eq!(pool.storage_buffers, 1);
        assert_eq!(pool.sampled_images, 1);
        assert_eq!(pool.samplers, 1);
    }

    #[test]
    fn push_constant_ranges_use_stage_masks() {
        let layer = DescriptorSetLayer::create("StaticMesh", &reflection(), None).unwrap();
        let ranges = layer.push_constant_ranges();
        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges[0].stages, ShaderStages::FRAGMENT);
        assert_eq!(ranges[0].range, 0..32);
    }

    #[test]
    fn resolve_by_name() {
        let layer = DescriptorSetLayer::create("StaticMesh", &reflection(), None).unwrap();
        let albedo = layer.resolve("u_AlbedoTexture").unwrap();
        assert_eq!((albedo.set, albedo.binding, albedo.kind), (1, 0, ResourceKind::SampledImage));
        assert!(layer.resolve("u_NormalTexture").unwrap_err().is_unknown_resource());
    }

    #[test]
    fn uniform_buffer_map_writes_shadow_copy() {
        let mut layer = DescriptorSetLayer::create("StaticMesh", &reflection(), None).unwrap();
        {
            let mut map = layer.map_uniform_buffer(0, 0).unwrap();
            assert_eq!(map.len(), 64);
            map[0..4].copy_from_slice(&2.0f32.to_le_bytes());
        }
        assert_eq!(&layer.uniform_buffer_bytes(0, 0).unwrap()[0..4], &2.0f32.to_le_bytes());
        layer.upload_uniform_buffer(0, 0, &[1, 2, 3, 4]).unwrap();
        assert_eq!(&layer.uniform_buffer_bytes(0, 0).unwrap()[0..4], &[1, 2, 3, 4]);
        assert!(layer.upload_uniform_buffer(0, 0, &[0; 65]).is_err());
        assert!(layer.map_uniform_buffer(3, 0).is_err());
    }

    #[test]
    fn pool_limits_are_enforced() {
        let pool = PoolSizes {
            samplers: 100,
            ..Default::default()
        };
        let err = pool.check_limits(&wgpu::Limits::default()).unwrap_err();
        assert_eq!(err.code(), "E_RESOURCE_EXHAUSTED");
    }

    #[test]
    fn missing_lists_unwritten_bindings() {
        let layer = DescriptorSetLayer::create("StaticMesh", &reflection(), None).unwrap();
        let set = layer.allocate_set(1);
        assert_eq!(set.missing(&layer), vec!["u_AlbedoTexture".to_owned(), "u_Sampler".to_owned()]);
    }

    #[test]
    fn binding_types_come_from_usage_flags() {
        let mut sampler = SamplerBlueprint {
            name: "u_ShadowSampler".into(),
            set: 0,
            binding: 1,
            stage: ShaderStage::Fragment,
            array_size: 1,
            comparison: false,
            filtering: false,
        };
        assert_eq!(sampler_binding_type(&sampler), wgpu::SamplerBindingType::NonFiltering);
        sampler.filtering = true;
        assert_eq!(sampler_binding_type(&sampler), wgpu::SamplerBindingType::Filtering);
        sampler.comparison = true;
        assert_eq!(sampler_binding_type(&sampler), wgpu::SamplerBindingType::Comparison);

        let mut reflection = reflection();
        let albedo = &mut reflection.sets.get_mut(&1).unwrap().sampled_images[0];
        albedo.name = "u_SceneDepth".into();
        albedo.filterable = true;
        let entry = image_entry(albedo, false).unwrap();
        assert!(matches!(
            entry.ty,
            BindingType::Texture { sample_type: wgpu::TextureSampleType::Float { filterable: true }, .. }
        ));
        albedo.filterable = false;
        let entry = image_entry(albedo, false).unwrap();
        assert!(matches!(
            entry.ty,
            BindingType::Texture { sample_type: wgpu::TextureSampleType::Float { filterable: false }, .. }
        ));
    }

    #[test]
    fn storage_formats() {
        assert_eq!(storage_format(2), Some(wgpu::TextureFormat::Rgba16Float));
        assert_eq!(storage_format(0), None);
    }
}
