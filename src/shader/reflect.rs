// src/shader/reflect.rs
//! SPIR-V reflection: per-set descriptor blueprints, flattened uniforms, push-constant ranges.
//!
//! Stages are reflected one at a time into a single [`ShaderReflection`]:
//! - a resource seen identically in two stages collapses to one binding visible to all stages,
//! - two different resources claiming the same (set, binding) is a reflection error,
//! - push-constant blocks are packed back to back in stage order.

use super::spirv::{dim, storage_class, ResourceUsage, SpirvModule, SpirvType, Variable};
use super::uniform::{ShaderDataType, ShaderUniform, UniformOwner};
use super::ShaderStage;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferBlueprint {
    pub name: String,
    pub set: u32,
    pub binding: u32,
    pub size: u32,
    pub stage: ShaderStage,
    pub read_only: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageDimension {
    D1,
    D2,
    D3,
    Cube,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageSampleKind {
    Float,
    Depth,
    Sint,
    Uint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageAccess {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageBlueprint {
    pub name: String,
    pub set: u32,
    pub binding: u32,
    pub stage: ShaderStage,
    /// 1 for non-array declarations.
    pub array_size: u32,
    pub dimension: ImageDimension,
    pub arrayed: bool,
    pub multisampled: bool,
    pub sample_kind: ImageSampleKind,
    /// Declared as a combined image-sampler rather than a separate texture.
    pub combined: bool,
    /// SPIR-V image format operand; only meaningful for storage images.
    pub format: u32,
    pub access: StorageAccess,
    /// Read through a filtering sample somewhere. Float images that are only fetched or
    /// queried bind as unfilterable, which lets depth attachments be read with `texelFetch`.
    pub filterable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplerBlueprint {
    pub name: String,
    pub set: u32,
    pub binding: u32,
    pub stage: ShaderStage,
    pub array_size: u32,
    /// Feeds a depth-compare instruction.
    pub comparison: bool,
    /// Combined with an image at least once. Samplers that never are bind as non-filtering.
    pub filtering: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    UniformBuffer,
    StorageBuffer,
    SampledImage,
    StorageImage,
    Sampler,
}

/// Borrowed view of any reflected descriptor resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceRef<'a> {
    pub kind: ResourceKind,
    pub name: &'a str,
    pub set: u32,
    pub binding: u32,
    pub stage: ShaderStage,
    pub array_size: u32,
}

/// Everything one descriptor set declares.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DescriptorSetBlueprint {
    pub set: u32,
    pub uniform_buffers: BTreeMap<u32, BufferBlueprint>,
    pub storage_buffers: BTreeMap<u32, BufferBlueprint>,
    pub sampled_images: Vec<ImageBlueprint>,
    pub storage_images: Vec<ImageBlueprint>,
    pub samplers: Vec<SamplerBlueprint>,
}

impl DescriptorSetBlueprint {
    pub fn new(set: u32) -> Self {
        Self {
            set,
            uniform_buffers: BTreeMap::new(),
            storage_buffers: BTreeMap::new(),
            sampled_images: Vec::new(),
            storage_images: Vec::new(),
            samplers: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.uniform_buffers.is_empty()
            && self.storage_buffers.is_empty()
            && self.sampled_images.is_empty()
            && self.storage_images.is_empty()
            && self.samplers.is_empty()
    }

    /// All resources of the set, ordered by binding.
    pub fn resources(&self) -> Vec<ResourceRef<'_>> {
        let mut out = Vec::new();
        for (kind, map) in [
            (ResourceKind::UniformBuffer, &self.uniform_buffers),
            (ResourceKind::StorageBuffer, &self.storage_buffers),
        ] {
            for b in map.values() {
                out.push(ResourceRef {
                    kind,
                    name: &b.name,
                    set: b.set,
                    binding: b.binding,
                    stage: b.stage,
                    array_size: 1,
                });
            }
        }
        for (kind, list) in [
            (ResourceKind::SampledImage, &self.sampled_images),
            (ResourceKind::StorageImage, &self.storage_images),
        ] {
            for i in list {
                out.push(ResourceRef {
                    kind,
                    name: &i.name,
                    set: i.set,
                    binding: i.binding,
                    stage: i.stage,
                    array_size: i.array_size,
                });
            }
        }
        for s in &self.samplers {
            out.push(ResourceRef {
                kind: ResourceKind::Sampler,
                name: &s.name,
                set: s.set,
                binding: s.binding,
                stage: s.stage,
                array_size: s.array_size,
            });
        }
        out.sort_by_key(|r| r.binding);
        out
    }

    pub fn find(&self, name: &str) -> Option<ResourceRef<'_>> {
        self.resources().into_iter().find(|r| r.name == name)
    }

    pub fn at(&self, binding: u32) -> Option<ResourceRef<'_>> {
        self.resources().into_iter().find(|r| r.binding == binding)
    }

    /// Decide whether `(kind, name)` may take `binding`.
    ///
    /// `Ok(true)` means the binding is free, `Ok(false)` means the same resource is already
    /// there (cross-stage duplicate), anything else is a conflict.
    fn claim(&self, binding: u32, kind: ResourceKind, name: &str) -> Result<bool> {
        match self.at(binding) {
            None => Ok(true),
            Some(existing) if existing.kind == kind && existing.name == name => Ok(false),
            Some(existing) => Err(Error::Reflection(format!(
                "set {} binding {binding}: '{name}' ({kind:?}) collides with '{}' ({:?})",
                self.set, existing.name, existing.kind
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushConstantRange {
    /// Block instance name, empty when the block is anonymous.
    pub name: String,
    pub stage: ShaderStage,
    pub offset: u32,
    pub size: u32,
}

/// Reflection output for a whole shader (all stages merged).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShaderReflection {
    pub sets: BTreeMap<u32, DescriptorSetBlueprint>,
    pub uniforms: Vec<ShaderUniform>,
    pub push_constant_ranges: Vec<PushConstantRange>,
}

impl ShaderReflection {
    pub fn find_resource(&self, name: &str) -> Option<ResourceRef<'_>> {
        self.sets.values().find_map(|set| set.find(name))
    }

    pub fn find_uniform(&self, name: &str) -> Option<&ShaderUniform> {
        self.uniforms.iter().find(|u| u.name == name)
    }

    pub fn push_constant_size(&self) -> u32 {
        self.push_constant_ranges
            .last()
            .map(|r| r.offset + r.size)
            .unwrap_or(0)
    }

    /// Highest set index + 1; pipeline layouts need a layout for every index below it.
    pub fn set_count(&self) -> u32 {
        self.sets.keys().next_back().map(|s| s + 1).unwrap_or(0)
    }
}

/// Accumulates reflection data stage by stage.
#[derive(Debug, Default)]
pub struct ShaderReflector {
    reflection: ShaderReflection,
}

struct BufferVar {
    var: Variable,
    struct_id: u32,
    set: u32,
    binding: u32,
}

impl ShaderReflector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reflect one compiled stage and merge it into the accumulated data.
    pub fn reflect_stage(&mut self, stage: ShaderStage, words: &[u32]) -> Result<()> {
        let module = SpirvModule::parse(words)?;
        if let Some(entry) = module.entry_points().first() {
            if ShaderStage::from_execution_model(entry.execution_model) != Some(stage) {
                log::warn!(
                    "{} section has entry point '{}' with execution model {}",
                    stage,
                    entry.name,
                    entry.execution_model
                );
            }
        }

        let mut uniform_buffers = Vec::new();
        let mut storage_buffers = Vec::new();
        let mut push_constants = Vec::new();
        let mut opaque = Vec::new();

        for var in module.variables() {
            let pointee = module.pointee(var)?;
            let decor = module.decorations(var.id);
            let set = decor.set.unwrap_or(0);
            let binding = decor.binding.unwrap_or(0);
            match var.storage_class {
                storage_class::UNIFORM => {
                    let struct_decor = module.decorations(pointee);
                    let struct_id = block_struct(&module, pointee)?;
                    let entry = BufferVar { var: *var, struct_id, set, binding };
                    if struct_decor.buffer_block {
                        storage_buffers.push(entry);
                    } else {
                        uniform_buffers.push(entry);
                    }
                }
                storage_class::STORAGE_BUFFER => {
                    let struct_id = block_struct(&module, pointee)?;
                    storage_buffers.push(BufferVar { var: *var, struct_id, set, binding })
                }
                storage_class::PUSH_CONSTANT => {
                    push_constants.push((*var, block_struct(&module, pointee)?))
                }
                storage_class::UNIFORM_CONSTANT => opaque.push((*var, pointee, set, binding)),
                _ => {}
            }
        }

        uniform_buffers.sort_by_key(|b| (b.set, b.binding));
        storage_buffers.sort_by_key(|b| (b.set, b.binding));

        for ub in &uniform_buffers {
            self.add_uniform_buffer(&module, stage, ub)?;
        }
        for sb in &storage_buffers {
            self.add_storage_buffer(&module, stage, sb)?;
        }
        for (var, struct_id) in push_constants {
            self.add_push_constant(&module, stage, &var, struct_id)?;
        }
        let usage = module.resource_usage();
        for (var, pointee, set, binding) in opaque {
            self.add_opaque(&module, &usage, stage, &var, pointee, set, binding)?;
        }

        log::debug!(
            "Reflected {stage} stage: {} UBs, {} SBs, {} push-constant ranges, {} sets total",
            uniform_buffers.len(),
            storage_buffers.len(),
            self.reflection.push_constant_ranges.len(),
            self.reflection.sets.len()
        );
        Ok(())
    }

    pub fn finish(self) -> ShaderReflection {
        self.reflection
    }

    fn set_mut(&mut self, set: u32) -> &mut DescriptorSetBlueprint {
        self.reflection
            .sets
            .entry(set)
            .or_insert_with(|| DescriptorSetBlueprint::new(set))
    }

    fn buffer_name(module: &SpirvModule, buffer: &BufferVar) -> String {
        module
            .name(buffer.struct_id)
            .or_else(|| module.name(buffer.var.id))
            .map(str::to_owned)
            .unwrap_or_else(|| format!("_{}_{}", buffer.set, buffer.binding))
    }

    fn add_uniform_buffer(&mut self, module: &SpirvModule, stage: ShaderStage, ub: &BufferVar) -> Result<()> {
        let name = Self::buffer_name(module, ub);
        let size = module.struct_size(ub.struct_id)?;
        let blueprint = self.set_mut(ub.set);
        if !blueprint.claim(ub.binding, ResourceKind::UniformBuffer, &name)? {
            let existing = blueprint
                .uniform_buffers
                .get_mut(&ub.binding)
                .ok_or_else(|| Error::Reflection(format!("uniform buffer '{name}' vanished")))?;
            if existing.size != size {
                return Err(Error::Reflection(format!(
                    "uniform buffer '{name}' is {} bytes in one stage and {size} in {stage}",
                    existing.size
                )));
            }
            existing.stage = existing.stage.merge(stage);
            return Ok(());
        }
        blueprint.uniform_buffers.insert(
            ub.binding,
            BufferBlueprint {
                name: name.clone(),
                set: ub.set,
                binding: ub.binding,
                size,
                stage,
                read_only: true,
            },
        );

        let owner = UniformOwner::Buffer { set: ub.set, binding: ub.binding };
        let mut members = Vec::new();
        flatten_members(module, ub.struct_id, &name, 0, &mut members)?;
        self.reflection.uniforms.extend(members.into_iter().map(|m| ShaderUniform {
            name: m.name,
            location: ub.binding,
            data_type: m.data_type,
            size: m.size,
            offset: m.offset,
            owner,
        }));
        Ok(())
    }

    fn add_storage_buffer(&mut self, module: &SpirvModule, stage: ShaderStage, sb: &BufferVar) -> Result<()> {
        let name = Self::buffer_name(module, sb);
        let size = module.struct_size(sb.struct_id)?;
        let member_count = module.struct_members(sb.struct_id)?.len() as u32;
        let read_only = module.decorations(sb.var.id).non_writable
            || (member_count > 0
                && (0..member_count).all(|i| module.member_decorations(sb.struct_id, i).non_writable));
        let blueprint = self.set_mut(sb.set);
        if !blueprint.claim(sb.binding, ResourceKind::StorageBuffer, &name)? {
            if let Some(existing) = blueprint.storage_buffers.get_mut(&sb.binding) {
                existing.stage = existing.stage.merge(stage);
                existing.read_only &= read_only;
            }
            return Ok(());
        }
        blueprint.storage_buffers.insert(
            sb.binding,
            BufferBlueprint {
                name,
                set: sb.set,
                binding: sb.binding,
                size,
                stage,
                read_only,
            },
        );
        Ok(())
    }

    fn add_push_constant(
        &mut self,
        module: &SpirvModule,
        stage: ShaderStage,
        var: &Variable,
        struct_id: u32,
    ) -> Result<()> {
        let count = module.struct_members(struct_id)?.len() as u32;
        let mut first = u32::MAX;
        for index in 0..count {
            first = first.min(module.member_offset(struct_id, index)?);
        }
        if first == u32::MAX {
            first = 0;
        }
        let end = module.struct_size(struct_id)?;
        let size = end.saturating_sub(first);
        let offset = self.reflection.push_constant_size();
        let range = self.reflection.push_constant_ranges.len();
        let block = module.name(var.id).unwrap_or_default().to_owned();

        let mut flattened = Vec::new();
        flatten_members(module, struct_id, &block, 0, &mut flattened)?;
        self.reflection.uniforms.extend(flattened.into_iter().map(|m| ShaderUniform {
            name: m.name,
            location: range as u32,
            data_type: m.data_type,
            size: m.size,
            offset: m.offset - first,
            owner: UniformOwner::PushConstant { range },
        }));
        self.reflection.push_constant_ranges.push(PushConstantRange {
            name: block,
            stage,
            offset,
            size,
        });
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn add_opaque(
        &mut self,
        module: &SpirvModule,
        usage: &ResourceUsage,
        stage: ShaderStage,
        var: &Variable,
        pointee: u32,
        set: u32,
        binding: u32,
    ) -> Result<()> {
        let (base, array_size) = module.strip_array(pointee)?;
        let name = module
            .name(var.id)
            .map(str::to_owned)
            .unwrap_or_else(|| format!("_{set}_{binding}"));

        let (image_type, combined) = match module.ty(base)? {
            SpirvType::SampledImage { image } => (*image, true),
            SpirvType::Image { .. } => (base, false),
            SpirvType::Sampler => {
                let blueprint = self.set_mut(set);
                let comparison = usage.compared.contains(&var.id);
                let filtering = usage.samplers.contains(&var.id);
                if blueprint.claim(binding, ResourceKind::Sampler, &name)? {
                    blueprint.samplers.push(SamplerBlueprint {
                        name,
                        set,
                        binding,
                        stage,
                        array_size,
                        comparison,
                        filtering,
                    });
                } else if let Some(existing) = blueprint.samplers.iter_mut().find(|s| s.binding == binding) {
                    existing.stage = existing.stage.merge(stage);
                    existing.comparison |= comparison;
                    existing.filtering |= filtering;
                }
                return Ok(());
            }
            other => {
                log::debug!("Skipping uniform-constant '{name}' of type {other:?}");
                return Ok(());
            }
        };

        let SpirvType::Image {
            sampled_type,
            dim: image_dim,
            depth,
            arrayed,
            multisampled,
            sampled,
            format,
        } = module.ty(image_type)?.clone()
        else {
            return Err(Error::Spirv(format!("sampled image '{name}' does not wrap an image")));
        };

        let dimension = match image_dim {
            dim::D1 => ImageDimension::D1,
            dim::D2 => ImageDimension::D2,
            dim::D3 => ImageDimension::D3,
            dim::CUBE => ImageDimension::Cube,
            other => {
                return Err(Error::Reflection(format!(
                    "image '{name}' uses unsupported dimensionality {other}"
                )))
            }
        };
        let sample_kind = match module.ty(sampled_type)? {
            _ if depth == 1 => ImageSampleKind::Depth,
            SpirvType::Int { signed: true, .. } => ImageSampleKind::Sint,
            SpirvType::Int { signed: false, .. } => ImageSampleKind::Uint,
            _ => ImageSampleKind::Float,
        };
        let storage = sampled == 2;
        let var_decor = module.decorations(var.id);
        let access = match (var_decor.non_readable, var_decor.non_writable) {
            (true, _) => StorageAccess::WriteOnly,
            (false, true) => StorageAccess::ReadOnly,
            (false, false) if storage => StorageAccess::ReadWrite,
            (false, false) => StorageAccess::ReadOnly,
        };
        let kind = if storage {
            ResourceKind::StorageImage
        } else {
            ResourceKind::SampledImage
        };
        let image = ImageBlueprint {
            name,
            set,
            binding,
            stage,
            array_size,
            dimension,
            arrayed,
            multisampled,
            sample_kind,
            combined,
            format,
            access,
            filterable: combined || usage.filtered.contains(&var.id),
        };

        let blueprint = self.set_mut(set);
        let free = blueprint.claim(binding, kind, &image.name)?;
        let list = if storage {
            &mut blueprint.storage_images
        } else {
            &mut blueprint.sampled_images
        };
        if free {
            list.push(image);
        } else if let Some(existing) = list.iter_mut().find(|i| i.binding == binding) {
            existing.stage = existing.stage.merge(stage);
            existing.filterable |= image.filterable;
        }
        Ok(())
    }
}

/// Reflect every stage in order.
pub fn reflect_stages<'a>(stages: impl IntoIterator<Item = (ShaderStage, &'a [u32])>) -> Result<ShaderReflection> {
    let mut reflector = ShaderReflector::new();
    for (stage, words) in stages {
        reflector.reflect_stage(stage, words)?;
    }
    Ok(reflector.finish())
}

/// The struct that actually holds a block's members.
///
/// The SPIR-V backend wraps non-struct and copyable struct blocks in an anonymous
/// single-member struct; reflection looks through that wrapper.
fn block_struct(module: &SpirvModule, struct_id: u32) -> Result<u32> {
    let members = module.struct_members(struct_id)?;
    if let [inner] = members {
        let anonymous = module.name(struct_id).is_none() && module.member_name(struct_id, 0).is_none();
        if anonymous && matches!(module.ty(*inner)?, SpirvType::Struct { .. }) {
            return Ok(*inner);
        }
    }
    Ok(struct_id)
}

struct FlatMember {
    name: String,
    data_type: ShaderDataType,
    size: u32,
    offset: u32,
}

/// Every member of `struct_id` as `prefix.member`, recursing into nested structs so
/// `Block.Light.Color` is addressable. Struct members are listed too, before their fields.
fn flatten_members(
    module: &SpirvModule,
    struct_id: u32,
    prefix: &str,
    base: u32,
    out: &mut Vec<FlatMember>,
) -> Result<()> {
    let members = module.struct_members(struct_id)?.to_vec();
    for (index, &member_type) in members.iter().enumerate() {
        let index = index as u32;
        let label = member_label(module, struct_id, index);
        let name = if prefix.is_empty() {
            label
        } else {
            format!("{prefix}.{label}")
        };
        let offset = base + module.member_offset(struct_id, index)?;
        out.push(FlatMember {
            name: name.clone(),
            data_type: data_type(module, member_type)?,
            size: module.member_size(struct_id, index)?,
            offset,
        });
        if matches!(module.ty(member_type)?, SpirvType::Struct { .. }) {
            flatten_members(module, member_type, &name, offset, out)?;
        }
    }
    Ok(())
}

fn member_label(module: &SpirvModule, struct_id: u32, index: u32) -> String {
    module
        .member_name(struct_id, index)
        .map(str::to_owned)
        .unwrap_or_else(|| format!("_m{index}"))
}

fn data_type(module: &SpirvModule, type_id: u32) -> Result<ShaderDataType> {
    let ty = match module.ty(type_id)? {
        SpirvType::Bool => ShaderDataType::Bool,
        SpirvType::Int { .. } => ShaderDataType::Int,
        SpirvType::Float { .. } => ShaderDataType::Float,
        SpirvType::Vector { component, count } => match (module.ty(*component)?, count) {
            (SpirvType::Float { .. }, 2) => ShaderDataType::Float2,
            (SpirvType::Float { .. }, 3) => ShaderDataType::Float3,
            (SpirvType::Float { .. }, 4) => ShaderDataType::Float4,
            (SpirvType::Int { .. }, 2) => ShaderDataType::Int2,
            (SpirvType::Int { .. }, 3) => ShaderDataType::Int3,
            (SpirvType::Int { .. }, 4) => ShaderDataType::Int4,
            _ => ShaderDataType::None,
        },
        SpirvType::Matrix { column, columns } => {
            let rows = match module.ty(*column)? {
                SpirvType::Vector { count, .. } => *count,
                _ => 0,
            };
            match (rows, columns) {
                (3, 3) => ShaderDataType::Mat3,
                (4, 4) => ShaderDataType::Mat4,
                _ => ShaderDataType::None,
            }
        }
        SpirvType::Struct { .. } => ShaderDataType::Struct,
        _ => ShaderDataType::None,
    };
    Ok(ty)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader::spirv::builder::SpirvBuilder;
    use crate::shader::compiler::compile_glsl;
    use crate::shader::spirv::{decoration, execution_model};

    const LIT_VERTEX: &str = r#"#version 450
layout(std140, set = 0, binding = 0) uniform Camera
{
    mat4 ViewProjection;
    vec4 Position;
} u_Camera;
layout(location = 0) in vec3 a_Position;
layout(location = 0) out vec2 v_TexCoord;

void main()
{
    v_TexCoord = a_Position.xy;
    gl_Position = u_Camera.ViewProjection * vec4(a_Position + u_Camera.Position.xyz, 1.0);
}
"#;

    const LIT_FRAGMENT: &str = r#"#version 450
struct Light
{
    vec4 Color;
    vec4 Direction;
};
layout(std140, set = 0, binding = 1) uniform Lighting
{
    Light Sun;
    float Exposure;
} u_Lighting;
layout(set = 0, binding = 2) uniform texture2D u_Albedo;
layout(set = 0, binding = 3) uniform sampler u_Sampler;
layout(set = 0, binding = 4) uniform texture2D u_Depth;
layout(set = 0, binding = 5) uniform texture2DArray u_ShadowMap;
layout(set = 0, binding = 6) uniform samplerShadow u_ShadowSampler;
layout(push_constant) uniform Material
{
    vec4 AlbedoColor;
    float Roughness;
} u_Material;
layout(location = 0) in vec2 v_TexCoord;
layout(location = 0) out vec4 o_Color;

void main()
{
    vec4 albedo = texture(sampler2D(u_Albedo, u_Sampler), v_TexCoord);
    float depth = texelFetch(u_Depth, ivec2(gl_FragCoord.xy), 0).r;
    float lit = texture(sampler2DArrayShadow(u_ShadowMap, u_ShadowSampler), vec4(v_TexCoord, 0.0, depth));
    o_Color = albedo * u_Material.AlbedoColor * u_Lighting.Sun.Color * (lit * u_Lighting.Exposure)
        + vec4(u_Material.Roughness);
}
"#;

    fn lit_reflection() -> ShaderReflection {
        let vs = compile_glsl(ShaderStage::Vertex, LIT_VERTEX, "lit").unwrap();
        let fs = compile_glsl(ShaderStage::Fragment, LIT_FRAGMENT, "lit").unwrap();
        reflect_stages([(ShaderStage::Vertex, &vs[..]), (ShaderStage::Fragment, &fs[..])]).unwrap()
    }

    /// vertex: `layout(set=0, binding=0) uniform Camera { mat4 viewProj; };`
    fn camera_vertex() -> Vec<u32> {
        let mut b = SpirvBuilder::new();
        b.entry_point(execution_model::VERTEX, "main");
        let f = b.float();
        let vec4 = b.vector(f, 4);
        let mat4 = b.matrix(vec4, 4);
        b.buffer_block(storage_class::UNIFORM, "Camera", "", &[("viewProj", mat4, 0)], 0, 0);
        b.build()
    }

    /// fragment: `layout(set=0, binding=1) uniform sampler2D u_Albedo;`
    fn albedo_fragment() -> Vec<u32> {
        let mut b = SpirvBuilder::new();
        b.entry_point(execution_model::FRAGMENT, "main");
        let f = b.float();
        let img = b.image(f, dim::D2, 1);
        let sampled = b.sampled_image(img);
        b.resource(sampled, "u_Albedo", 0, 1);
        b.build()
    }

    fn push_block(members: &[(&str, u32)], var: &str, first_offset: u32) -> Vec<u32> {
        let mut b = SpirvBuilder::new();
        let f = b.float();
        let vec4 = b.vector(f, 4);
        let mat4 = b.matrix(vec4, 4);
        let mut layout = Vec::new();
        let mut offset = first_offset;
        for (name, kind) in members {
            let (ty, size) = match kind {
                0 => (f, 4),
                1 => (vec4, 16),
                _ => (mat4, 64),
            };
            layout.push((*name, ty, offset));
            offset += size;
        }
        b.buffer_block(storage_class::PUSH_CONSTANT, "PushBlock", var, &layout, 0, 0);
        b.build()
    }

    #[test]
    fn camera_and_albedo_scenario() {
        let vs = camera_vertex();
        let fs = albedo_fragment();
        let reflection =
            reflect_stages([(ShaderStage::Vertex, &vs[..]), (ShaderStage::Fragment, &fs[..])]).unwrap();

        assert_eq!(reflection.sets.len(), 1);
        let set = &reflection.sets[&0];
        assert_eq!(set.uniform_buffers.len(), 1);
        assert_eq!(set.sampled_images.len(), 1);
        assert!(set.storage_buffers.is_empty() && set.storage_images.is_empty());

        let camera = &set.uniform_buffers[&0];
        assert_eq!(camera.stage, ShaderStage::Vertex);
        assert_eq!(camera.size, 64);

        assert_eq!(reflection.uniforms.len(), 1);
        let member = &reflection.uniforms[0];
        assert_eq!(member.name, "Camera.viewProj");
        assert_eq!(member.offset, 0);
        assert_eq!(member.size, 64);
        assert_eq!(member.data_type, ShaderDataType::Mat4);
        assert_eq!(member.location, 0);

        let albedo = &set.sampled_images[0];
        assert_eq!(albedo.name, "u_Albedo");
        assert_eq!(albedo.binding, 1);
        assert_eq!(albedo.stage, ShaderStage::Fragment);
        assert_eq!(albedo.array_size, 1);
        assert!(albedo.combined);
        assert!(albedo.filterable);
    }

    #[test]
    fn shared_uniform_buffer_collapses_to_all_stages() {
        let vs = camera_vertex();
        let fs = camera_vertex();
        let reflection =
            reflect_stages([(ShaderStage::Vertex, &vs[..]), (ShaderStage::Fragment, &fs[..])]).unwrap();
        let set = &reflection.sets[&0];
        assert_eq!(set.uniform_buffers.len(), 1);
        assert_eq!(set.uniform_buffers[&0].stage, ShaderStage::All);
        assert_eq!(reflection.uniforms.len(), 1, "members are not duplicated");
    }

    #[test]
    fn binding_collision_is_an_error() {
        let vs = camera_vertex();
        let mut b = SpirvBuilder::new();
        let f = b.float();
        let vec4 = b.vector(f, 4);
        b.buffer_block(storage_class::UNIFORM, "Lights", "", &[("color", vec4, 0)], 0, 0);
        let fs = b.build();
        let err =
            reflect_stages([(ShaderStage::Vertex, &vs[..]), (ShaderStage::Fragment, &fs[..])]).unwrap_err();
        assert_eq!(err.code(), "E_REFLECTION");
    }

    #[test]
    fn push_constant_blocks_pack_contiguously() {
        let vs = push_block(&[("Transform", 2)], "u_Renderer", 0);
        let gs = push_block(&[("Time", 0), ("Pad", 0)], "u_Anim", 64);
        let fs = push_block(&[("AlbedoColor", 1), ("Metalness", 0)], "u_Material", 72);
        let reflection = reflect_stages([
            (ShaderStage::Vertex, &vs[..]),
            (ShaderStage::Geometry, &gs[..]),
            (ShaderStage::Fragment, &fs[..]),
        ])
        .unwrap();

        let ranges = &reflection.push_constant_ranges;
        assert_eq!(ranges.len(), 3);
        let mut expected = 0;
        for range in ranges {
            assert_eq!(range.offset, expected);
            expected += range.size;
        }
        assert_eq!(ranges[0].size, 64);
        assert_eq!(ranges[1].size, 8);
        assert_eq!(ranges[2].size, 20);
        assert_eq!(reflection.push_constant_size(), 92);

        let metalness = reflection.find_uniform("u_Material.Metalness").unwrap();
        assert_eq!(metalness.offset, 16, "offsets are relative to the block");
        assert_eq!(metalness.owner, UniformOwner::PushConstant { range: 2 });
        assert!(metalness.is_push_constant());
    }

    #[test]
    fn anonymous_push_constant_members_are_bare() {
        let fs = push_block(&[("Exposure", 0)], "", 0);
        let reflection = reflect_stages([(ShaderStage::Fragment, &fs[..])]).unwrap();
        assert!(reflection.find_uniform("Exposure").is_some());
        assert_eq!(reflection.push_constant_ranges[0].name, "");
    }

    #[test]
    fn storage_resources_and_samplers() {
        let mut b = SpirvBuilder::new();
        b.entry_point(execution_model::GL_COMPUTE, "main");
        let f = b.float();
        let u = b.int(false);
        let vec4 = b.vector(f, 4);

        // layout(set=1, binding=0) buffer PointLights { vec4 Data; } s_Lights;
        b.buffer_block(storage_class::STORAGE_BUFFER, "PointLights", "s_Lights", &[("Data", vec4, 0)], 1, 0);

        // layout(set=1, binding=1, rgba16f) uniform image2D o_Image;
        let storage = b.image(f, dim::D2, 2);
        b.resource(storage, "o_Image", 1, 1);

        // layout(set=1, binding=2) uniform texture2D u_Textures[4];
        let tex = b.image(f, dim::D2, 1);
        let four = b.constant(u, 4);
        let arr = b.array(tex, four);
        b.resource(arr, "u_Textures", 1, 2);

        // layout(set=1, binding=3) uniform sampler u_Sampler; never used
        let sampler = b.sampler();
        b.resource(sampler, "u_Sampler", 1, 3);

        let words = b.build();
        let reflection = reflect_stages([(ShaderStage::Compute, &words[..])]).unwrap();
        let set = &reflection.sets[&1];

        let lights = &set.storage_buffers[&0];
        assert_eq!(lights.name, "PointLights");
        assert_eq!(lights.size, 16);
        assert!(!lights.read_only);

        assert_eq!(set.storage_images.len(), 1);
        assert_eq!(set.storage_images[0].name, "o_Image");

        let textures = &set.sampled_images[0];
        assert_eq!(textures.array_size, 4);
        assert!(!textures.combined);

        assert!(!textures.filterable, "never sampled");

        assert_eq!(set.samplers.len(), 1);
        assert!(!set.samplers[0].comparison);
        assert!(!set.samplers[0].filtering);

        let bindings: Vec<u32> = set.resources().iter().map(|r| r.binding).collect();
        assert_eq!(bindings, vec![0, 1, 2, 3]);
        assert_eq!(
            reflection.find_resource("u_Textures").map(|r| r.kind),
            Some(ResourceKind::SampledImage)
        );
        assert_eq!(reflection.set_count(), 2);
    }

    #[test]
    fn read_only_storage_buffer() {
        let mut b = SpirvBuilder::new();
        let f = b.float();
        let vec4 = b.vector(f, 4);
        let v = b.buffer_block(storage_class::STORAGE_BUFFER, "Visible", "", &[("Index", vec4, 0)], 0, 4);
        b.decorate(v, decoration::NON_WRITABLE, &[]);
        let words = b.build();
        let reflection = reflect_stages([(ShaderStage::Fragment, &words[..])]).unwrap();
        assert!(reflection.sets[&0].storage_buffers[&4].read_only);
    }

    #[test]
    fn compiled_blocks_are_named_after_the_block_type() {
        let reflection = lit_reflection();
        let set = &reflection.sets[&0];
        assert_eq!(set.uniform_buffers[&0].name, "Camera");
        assert_eq!(set.uniform_buffers[&0].size, 80);
        assert_eq!(set.uniform_buffers[&1].name, "Lighting");

        let view_projection = reflection.find_uniform("Camera.ViewProjection").unwrap();
        assert_eq!(view_projection.data_type, ShaderDataType::Mat4);
        assert_eq!((view_projection.offset, view_projection.size), (0, 64));
        let position = reflection.find_uniform("Camera.Position").unwrap();
        assert_eq!((position.offset, position.size), (64, 16));
        assert!(reflection.uniforms.iter().all(|u| !u.name.contains("_m0")));

        let albedo = reflection.find_uniform("u_Material.AlbedoColor").unwrap();
        assert_eq!(albedo.data_type, ShaderDataType::Float4);
        assert_eq!(albedo.offset, 0);
        assert!(albedo.is_push_constant());
        let roughness = reflection.find_uniform("u_Material.Roughness").unwrap();
        assert_eq!((roughness.offset, roughness.size), (16, 4));
        assert_eq!(reflection.push_constant_ranges[0].name, "u_Material");
        assert_eq!(reflection.push_constant_size(), 20);
    }

    #[test]
    fn nested_struct_members_are_flattened() {
        let reflection = lit_reflection();
        let sun = reflection.find_uniform("Lighting.Sun").unwrap();
        assert_eq!(sun.data_type, ShaderDataType::Struct);
        assert_eq!((sun.offset, sun.size), (0, 32));
        let direction = reflection.find_uniform("Lighting.Sun.Direction").unwrap();
        assert_eq!(direction.data_type, ShaderDataType::Float4);
        assert_eq!(direction.offset, 16);
        let exposure = reflection.find_uniform("Lighting.Exposure").unwrap();
        assert_eq!(exposure.offset, 32);
        assert_eq!(exposure.owner, UniformOwner::Buffer { set: 0, binding: 1 });
    }

    #[test]
    fn binding_types_follow_instruction_usage() {
        let reflection = lit_reflection();
        let set = &reflection.sets[&0];
        let image = |name: &str| set.sampled_images.iter().find(|i| i.name == name).unwrap();
        let sampler = |name: &str| set.samplers.iter().find(|s| s.name == name).unwrap();

        assert!(image("u_Albedo").filterable);
        assert_eq!(image("u_Albedo").sample_kind, ImageSampleKind::Float);
        assert!(sampler("u_Sampler").filtering && !sampler("u_Sampler").comparison);

        // Only fetched, so it can hold a depth attachment.
        assert!(!image("u_Depth").filterable);
        assert_eq!(image("u_Depth").sample_kind, ImageSampleKind::Float);

        assert_eq!(image("u_ShadowMap").sample_kind, ImageSampleKind::Depth);
        assert!(image("u_ShadowMap").arrayed);
        assert!(sampler("u_ShadowSampler").comparison);
    }

    #[test]
    fn malformed_stage_fails() {
        let err = reflect_stages([(ShaderStage::Vertex, &[1u32, 2, 3][..])]).unwrap_err();
        assert!(err.is_compile());
    }
}
