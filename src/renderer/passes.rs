// src/renderer/passes.rs
//! Recording a planned frame.
//!
//! [`FrameData`] is everything the scene renderer gathered on the calling thread; it is `Send`
//! and moves into a render-thread closure. [`FrameResources`] owns the GPU state (targets,
//! pipelines, instance and light buffers, material bind groups) and records every pass the
//! [`FramePlan`] lists into one command encoder. A pass that fails to prepare is logged and
//! skipped; the rest of the frame still runs.

use super::camera::CameraData;
use super::cascades::ShadowCascade;
use super::draw_list::{DrawList, InstanceTransformBuffer, TransformBufferData};
use super::frame_graph::{light_culling_groups, FramePlan, PassKind};
use super::material::{Material, SharedMaterial, MATERIAL_SET};
use super::mesh::{StaticMesh, StaticVertex};
use super::pipeline::{RenderPipelineSpec, ShaderPipeline};
use super::scene::{DirectionalLight, PointLight};
use super::targets::{FrameTargets, COMPOSITE_FORMAT};
use crate::config::{RendererConfig, MAX_SHADOW_CASCADES};
use crate::descriptor::{DescriptorResource, DescriptorSet};
use crate::error::{Error, Result};
use crate::gpu::{GpuContext, Image2D};
use crate::shader::{SharedShader, UniformValue};
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};
use std::collections::HashMap;
use std::sync::Arc;

// ====================== SHADER BLOCKS ======================

/// `Scene` uniform block of the mesh shader.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct SceneData {
    /// xyz: direction the light travels, w: intensity
    pub light_direction: [f32; 4],
    /// rgb: radiance, w: 1 when the light casts shadows
    pub light_radiance: [f32; 4],
    /// tile size, tiles per row, point light count, cascade count
    pub info: [u32; 4],
}

impl SceneData {
    pub fn new(light: Option<&DirectionalLight>, tile_size: u32, tiles_x: u32, point_lights: u32, cascades: u32) -> Self {
        // No light: point straight down with zero intensity so the shader never normalizes zero.
        let (direction, intensity, radiance, shadows) = match light {
            Some(light) if light.direction() != glam::Vec3::ZERO => (
                light.direction(),
                light.intensity,
                light.radiance,
                light.cast_shadows as f32,
            ),
            _ => (glam::Vec3::NEG_Y, 0.0, [0.0; 3], 0.0),
        };
        Self {
            light_direction: direction.extend(intensity).to_array(),
            light_radiance: [radiance[0], radiance[1], radiance[2], shadows],
            info: [tile_size, tiles_x, point_lights, cascades],
        }
    }
}

/// `ShadowData` uniform block: one light matrix and one split distance per cascade.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct ShadowData {
    pub light_matrices: [[[f32; 4]; 4]; MAX_SHADOW_CASCADES as usize],
    pub cascade_splits: [f32; 4],
}

impl ShadowData {
    pub fn new(cascades: &[ShadowCascade]) -> Self {
        let mut data = Self {
            light_matrices: [Mat4::IDENTITY.to_cols_array_2d(); MAX_SHADOW_CASCADES as usize],
            cascade_splits: [f32::MAX; 4],
        };
        for (i, cascade) in cascades.iter().take(MAX_SHADOW_CASCADES as usize).enumerate() {
            data.light_matrices[i] = cascade.view_projection.to_cols_array_2d();
            data.cascade_splits[i] = cascade.split_depth;
        }
        data
    }
}

/// `Culling` uniform block of the light culling shader.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct CullingData {
    /// tile size, tiles per row, point light count, tiles per column
    pub tiles: [u32; 4],
}

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct CascadePush {
    pub view_projection: [[f32; 4]; 4],
}

/// Bloom compute push constants.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct BloomPush {
    /// threshold, threshold - knee, 2 * knee, 0.25 / knee
    pub params: [f32; 4],
    pub mode: i32,
}

impl BloomPush {
    pub fn params(threshold: f32, knee: f32) -> [f32; 4] {
        let knee = knee.max(1e-4);
        [threshold, threshold - knee, knee * 2.0, 0.25 / knee]
    }
}

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct CompositePush {
    pub exposure: f32,
    pub bloom_intensity: f32,
    pub bloom_dirt_intensity: f32,
    pub opacity: f32,
}

/// Preetham sky parameters, pushed to the skybox shader.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct DynamicSky {
    pub turbidity: f32,
    pub azimuth: f32,
    /// Sun angle from the zenith, radians.
    pub inclination: f32,
}

impl Default for DynamicSky {
    fn default() -> Self {
        Self {
            turbidity: 2.0,
            azimuth: 0.0,
            inclination: 0.8,
        }
    }
}

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct OutlinePush {
    pub color: [f32; 4],
}

const OUTLINE_COLOR: [f32; 4] = [1.0, 0.55, 0.1, 0.35];
const EXPOSURE: f32 = 0.8;

// ====================== FRAME DATA ======================

/// One instanced draw, ready to record.
#[derive(Debug, Clone)]
pub struct PreparedDraw {
    pub mesh: Arc<StaticMesh>,
    pub submesh_index: u32,
    pub material: Option<SharedMaterial>,
    pub first_instance: u32,
    pub instance_count: u32,
}

impl PreparedDraw {
    /// Pack `list` and turn each command into a draw over its slice of the packed transforms.
    pub fn from_list(list: &mut DrawList) -> (Vec<PreparedDraw>, Vec<TransformBufferData>) {
        let transforms = list.pack();
        let draws = list
            .iter()
            .map(|(command, buffer)| PreparedDraw {
                mesh: Arc::clone(&command.mesh),
                submesh_index: command.submesh_index,
                material: command
                    .mesh
                    .submesh(command.submesh_index)
                    .and_then(|submesh| command.registry.material(submesh.material_index as usize)),
                first_instance: buffer.offset,
                instance_count: command.instance_count,
            })
            .collect();
        (draws, transforms)
    }
}

/// Where the texture pass writes: a swapchain view and its format.
#[derive(Clone)]
pub struct PresentTarget {
    pub view: Arc<wgpu::TextureView>,
    pub format: wgpu::TextureFormat,
}

impl std::fmt::Debug for PresentTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PresentTarget").field("format", &self.format).finish()
    }
}

/// Everything one frame needs, gathered on the calling thread.
#[derive(Clone)]
pub struct FrameData {
    pub plan: FramePlan,
    pub viewport: (u32, u32),
    pub camera: CameraData,
    pub scene: SceneData,
    pub shadows: ShadowData,
    pub cascades: Vec<ShadowCascade>,
    pub draws: Vec<PreparedDraw>,
    pub transforms: Vec<TransformBufferData>,
    pub outlines: Vec<PreparedDraw>,
    pub outline_transforms: Vec<TransformBufferData>,
    pub point_lights: Vec<PointLight>,
    pub sky: DynamicSky,
    pub shaders: HashMap<&'static str, SharedShader>,
    pub present: Option<PresentTarget>,
}

// ====================== PIPELINES ======================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineId {
    DirShadowMap,
    PreDepth,
    LightCulling,
    StaticMesh,
    Skybox,
    Grid,
    Bloom,
    SceneComposite,
    PhysicsOutline,
    TexturePass,
}

impl PipelineId {
    pub const ALL: [PipelineId; 10] = [
        PipelineId::DirShadowMap,
        PipelineId::PreDepth,
        PipelineId::LightCulling,
        PipelineId::StaticMesh,
        PipelineId::Skybox,
        PipelineId::Grid,
        PipelineId::Bloom,
        PipelineId::SceneComposite,
        PipelineId::PhysicsOutline,
        PipelineId::TexturePass,
    ];

    pub fn shader_name(self) -> &'static str {
        match self {
            PipelineId::DirShadowMap => "DirShadowMap",
            PipelineId::PreDepth => "PreDepth",
            PipelineId::LightCulling => "LightCulling",
            PipelineId::StaticMesh => "StaticMesh",
            PipelineId::Skybox => "Skybox",
            PipelineId::Grid => "Grid",
            PipelineId::Bloom => "Bloom",
            PipelineId::SceneComposite => "SceneComposite",
            PipelineId::PhysicsOutline => "PhysicsOutline",
            PipelineId::TexturePass => "TexturePass",
        }
    }

    /// Fixed-function state, or `None` for compute pipelines.
    fn spec(self, present_format: Option<wgpu::TextureFormat>) -> Option<RenderPipelineSpec> {
        let mesh_buffers = || vec![StaticVertex::layout(), TransformBufferData::layout()];
        let spec = RenderPipelineSpec::new();
        match self {
            PipelineId::LightCulling | PipelineId::Bloom => None,
            PipelineId::DirShadowMap => Some(spec.with_vertex_buffers(mesh_buffers()).with_depth(
                true,
                wgpu::CompareFunction::Less,
                wgpu::DepthBiasState {
                    constant: 2,
                    slope_scale: 2.0,
                    clamp: 0.0,
                },
            )),
            PipelineId::PreDepth => Some(
                spec.with_vertex_buffers(mesh_buffers())
                    .with_depth(true, wgpu::CompareFunction::Less, Default::default()),
            ),
            PipelineId::StaticMesh => Some(
                spec.with_vertex_buffers(mesh_buffers())
                    .with_color(Image2D::HDR_FORMAT, None)
                    .with_depth(true, wgpu::CompareFunction::Less, Default::default()),
            ),
            PipelineId::Skybox => Some(
                spec.with_color(Image2D::HDR_FORMAT, None)
                    .with_depth(false, wgpu::CompareFunction::LessEqual, Default::default()),
            ),
            PipelineId::Grid => Some(
                spec.with_color(Image2D::HDR_FORMAT, Some(wgpu::BlendState::ALPHA_BLENDING))
                    .with_depth(false, wgpu::CompareFunction::Less, Default::default()),
            ),
            PipelineId::SceneComposite => Some(spec.with_color(COMPOSITE_FORMAT, None)),
            PipelineId::PhysicsOutline => Some(
                spec.with_vertex_buffers(mesh_buffers())
                    .with_color(COMPOSITE_FORMAT, Some(wgpu::BlendState::ALPHA_BLENDING)),
            ),
            PipelineId::TexturePass => {
                Some(spec.with_color(present_format.unwrap_or(COMPOSITE_FORMAT), None))
            }
        }
    }
}

fn draw_meshes(pass: &mut wgpu::RenderPass<'_>, draws: &[PreparedDraw], instances: &wgpu::Buffer) {
    pass.set_vertex_buffer(1, instances.slice(..));
    for draw in draws {
        let (Some(buffers), Some(submesh)) = (draw.mesh.buffers(), draw.mesh.submesh(draw.submesh_index)) else {
            continue;
        };
        pass.set_vertex_buffer(0, buffers.vertex.slice(..));
        pass.set_index_buffer(buffers.index.slice(..), wgpu::IndexFormat::Uint32);
        pass.draw_indexed(
            submesh.base_index..submesh.base_index + submesh.index_count,
            submesh.base_vertex as i32,
            draw.first_instance..draw.first_instance + draw.instance_count,
        );
    }
}

struct MaterialBinding {
    revision: u64,
    generation: u64,
    set: DescriptorSet,
}

fn make_sampler(gpu: &GpuContext, label: &str, filter: wgpu::FilterMode, compare: Option<wgpu::CompareFunction>) -> Arc<wgpu::Sampler> {
    Arc::new(gpu.device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some(label),
        address_mode_u: wgpu::AddressMode::ClampToEdge,
        address_mode_v: wgpu::AddressMode::ClampToEdge,
        address_mode_w: wgpu::AddressMode::ClampToEdge,
        mag_filter: filter,
        min_filter: filter,
        mipmap_filter: filter,
        compare,
        ..Default::default()
    }))
}

// ====================== RESOURCES ======================

pub struct FrameResources {
    gpu: GpuContext,
    config: RendererConfig,
    targets: FrameTargets,
    pipelines: HashMap<PipelineId, ShaderPipeline>,
    /// Shader generation whose pipeline failed to build, so it is not retried every frame.
    failed: HashMap<PipelineId, u64>,
    present_format: Option<wgpu::TextureFormat>,
    /// Bumped whenever a resource bound in a descriptor set is reallocated.
    binding_version: u64,
    targets_version: u64,
    instances: InstanceTransformBuffer,
    outline_instances: InstanceTransformBuffer,
    point_lights: Arc<wgpu::Buffer>,
    point_light_capacity: u64,
    default_material: Option<SharedMaterial>,
    material_sets: HashMap<u64, MaterialBinding>,
    bloom_sets: Vec<DescriptorSet>,
    bloom_key: Option<(u64, u64)>,
    white: Arc<Image2D>,
    linear: Arc<wgpu::Sampler>,
    shadow_sampler: Arc<wgpu::Sampler>,
    frames: u64,
}

fn point_light_buffer(gpu: &GpuContext, capacity: u64) -> Arc<wgpu::Buffer> {
    Arc::new(gpu.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("point lights"),
        size: capacity * std::mem::size_of::<PointLight>() as u64,
        usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    }))
}

impl FrameResources {
    pub fn new(gpu: GpuContext, config: RendererConfig, width: u32, height: u32) -> Self {
        let targets = FrameTargets::new(&gpu, &config, width, height);
        let capacity = u64::from(config.light_culling.max_point_lights.max(1));
        Self {
            point_lights: point_light_buffer(&gpu, capacity),
            point_light_capacity: capacity,
            white: Arc::new(Image2D::solid(&gpu, "white", [255; 4])),
            linear: make_sampler(&gpu, "linear", wgpu::FilterMode::Linear, None),
            shadow_sampler: make_sampler(
                &gpu,
                "shadow",
                wgpu::FilterMode::Linear,
                Some(wgpu::CompareFunction::LessEqual),
            ),
            targets_version: targets.version(),
            targets,
            pipelines: HashMap::new(),
            failed: HashMap::new(),
            present_format: None,
            binding_version: 1,
            instances: InstanceTransformBuffer::default(),
            outline_instances: InstanceTransformBuffer::default(),
            default_material: None,
            material_sets: HashMap::new(),
            bloom_sets: Vec::new(),
            bloom_key: None,
            gpu,
            config,
            frames: 0,
        }
    }

    pub fn targets(&self) -> &FrameTargets {
        &self.targets
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn pipeline(&self, id: PipelineId) -> Option<&ShaderPipeline> {
        self.pipelines.get(&id)
    }

    /// Follow a reload of `shader`: rebuild its pipelines now (a failed rebuild keeps the old
    /// one) and drop bind groups written against the previous layout.
    pub fn reload_shader(&mut self, shader: &str) {
        for (id, pipeline) in self.pipelines.iter_mut() {
            if id.shader_name() != shader {
                continue;
            }
            if let Err(err) = pipeline.refresh(&self.gpu) {
                log::warn!("Keeping previous '{}' pipeline: {err}", pipeline.label());
            }
        }
        self.failed.retain(|id, _| id.shader_name() != shader);
        if shader == PipelineId::StaticMesh.shader_name() {
            self.material_sets.clear();
        }
        if shader == PipelineId::Bloom.shader_name() {
            self.bloom_key = None;
        }
    }

    /// Record and submit every planned pass.
    #[tracing::instrument(skip_all, fields(frame = self.frames))]
    pub fn render_frame(&mut self, frame: &FrameData) -> Result<()> {
        let (width, height) = frame.viewport;
        if width == 0 || height == 0 {
            return Ok(());
        }
        self.targets.resize(&self.gpu, &self.config, width, height);
        if self.targets.version() != self.targets_version {
            self.targets_version = self.targets.version();
            self.binding_version += 1;
        }
        self.upload(frame);

        let mut encoder = self
            .gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("scene") });
        for &pass in &frame.plan.passes {
            let recorded = match pass {
                PassKind::DirShadowMap => self.shadow_pass(&mut encoder, frame),
                PassKind::PreDepth => self.pre_depth_pass(&mut encoder, frame),
                PassKind::LightCulling => self.light_culling_pass(&mut encoder, frame),
                PassKind::Geometry => self.geometry_pass(&mut encoder, frame),
                PassKind::Bloom => self.bloom_pass(&mut encoder, frame),
                PassKind::SceneComposite => self.composite_pass(&mut encoder, frame),
                PassKind::LateComposite => self.late_composite_pass(&mut encoder, frame),
                PassKind::TexturePass => self.texture_pass(&mut encoder, frame),
            };
            if let Err(err) = recorded {
                log::warn!("{pass} pass skipped: {err}");
            }
        }
        self.gpu.queue.submit(Some(encoder.finish()));
        self.frames += 1;
        Ok(())
    }

    fn upload(&mut self, frame: &FrameData) {
        self.instances.upload(&self.gpu, "mesh instances", &frame.transforms);
        self.outline_instances
            .upload(&self.gpu, "collider instances", &frame.outline_transforms);

        let needed = frame.point_lights.len() as u64;
        if needed > self.point_light_capacity {
            self.point_light_capacity = needed;
            self.point_lights = point_light_buffer(&self.gpu, needed);
            self.binding_version += 1;
        }
        if !frame.point_lights.is_empty() {
            self.gpu
                .queue
                .write_buffer(&self.point_lights, 0, bytemuck::cast_slice(&frame.point_lights));
        }
    }

    /// Make sure the pipeline for `id` exists and follows its shader's latest generation.
    fn ensure(&mut self, id: PipelineId, frame: &FrameData) -> Result<()> {
        let shader = frame
            .shaders
            .get(id.shader_name())
            .cloned()
            .ok_or_else(|| Error::unknown_resource(id.shader_name()))?;
        let format = frame.present.as_ref().map(|target| target.format);
        let generation = shader.read().generation();

        if let Some(pipeline) = self.pipelines.get_mut(&id) {
            let same_target = id != PipelineId::TexturePass || self.present_format == format;
            if Arc::ptr_eq(pipeline.shader(), &shader) && same_target {
                if let Err(err) = pipeline.refresh(&self.gpu) {
                    log::warn!("Keeping previous '{}' pipeline: {err}", pipeline.label());
                }
                return Ok(());
            }
        }
        if self.failed.get(&id) == Some(&generation) {
            return Err(Error::custom(format!("pipeline '{}' failed to build", id.shader_name())));
        }

        let built = match id.spec(format) {
            Some(spec) => ShaderPipeline::render(&self.gpu, id.shader_name(), &shader, spec),
            None => ShaderPipeline::compute(&self.gpu, id.shader_name(), &shader),
        };
        match built {
            Ok(pipeline) => {
                self.failed.remove(&id);
                self.pipelines.insert(id, pipeline);
                if id == PipelineId::TexturePass {
                    self.present_format = format;
                }
                Ok(())
            }
            Err(err) => {
                self.failed.insert(id, generation);
                self.pipelines.remove(&id);
                Err(err)
            }
        }
    }

    fn pipeline_mut(&mut self, id: PipelineId) -> Result<&mut ShaderPipeline> {
        self.pipelines
            .get_mut(&id)
            .ok_or_else(|| Error::unknown_resource(id.shader_name()))
    }

    fn ready(&self, id: PipelineId) -> Result<&ShaderPipeline> {
        self.pipelines
            .get(&id)
            .ok_or_else(|| Error::unknown_resource(id.shader_name()))
    }

    // ====================== PASSES ======================

    fn shadow_pass(&mut self, encoder: &mut wgpu::CommandEncoder, frame: &FrameData) -> Result<()> {
        self.ensure(PipelineId::DirShadowMap, frame)?;
        let pipeline = self.ready(PipelineId::DirShadowMap)?;
        for (framebuffer, cascade) in self.targets.shadow_framebuffers.iter().zip(&frame.cascades) {
            let mut pass = framebuffer.begin_pass(encoder);
            pipeline.bind_render(&mut pass)?;
            let push = CascadePush {
                view_projection: cascade.view_projection.to_cols_array_2d(),
            };
            pipeline.push_render(&mut pass, bytemuck::bytes_of(&push));
            if let Some(instances) = self.instances.buffer() {
                draw_meshes(&mut pass, &frame.draws, instances);
            }
        }
        Ok(())
    }

    fn pre_depth_pass(&mut self, encoder: &mut wgpu::CommandEncoder, frame: &FrameData) -> Result<()> {
        self.ensure(PipelineId::PreDepth, frame)?;
        let version = self.binding_version;
        let gpu = self.gpu.clone();
        let pipeline = self.pipeline_mut(PipelineId::PreDepth)?;
        pipeline.upload_named("Camera", bytemuck::bytes_of(&frame.camera))?;
        if !pipeline.is_bound(version) {
            pipeline.write_uniform_buffers(0)?;
            pipeline.mark_bound(version);
        }
        pipeline.prepare(&gpu)?;

        let pipeline = self.ready(PipelineId::PreDepth)?;
        let mut pass = self.targets.pre_depth.begin_pass(encoder);
        pipeline.bind_render(&mut pass)?;
        if let Some(instances) = self.instances.buffer() {
            draw_meshes(&mut pass, &frame.draws, instances);
        }
        Ok(())
    }

    fn light_culling_pass(&mut self, encoder: &mut wgpu::CommandEncoder, frame: &FrameData) -> Result<()> {
        self.ensure(PipelineId::LightCulling, frame)?;
        let (width, height) = frame.viewport;
        let tile_size = self.config.light_culling.tile_size;
        let (groups_x, groups_y) = light_culling_groups(width, height, tile_size);
        let culling = CullingData {
            tiles: [tile_size, groups_x, frame.point_lights.len() as u32, groups_y],
        };

        let version = self.binding_version;
        let gpu = self.gpu.clone();
        let point_lights = Arc::clone(&self.point_lights);
        let visible = Arc::clone(&self.targets.visible_lights);
        let depth = self
            .targets
            .pre_depth
            .depth_image()
            .cloned()
            .ok_or_else(|| Error::unknown_resource("u_PreDepth"))?;

        let pipeline = self.pipeline_mut(PipelineId::LightCulling)?;
        pipeline.upload_named("Camera", bytemuck::bytes_of(&frame.camera))?;
        pipeline.upload_named("Culling", bytemuck::bytes_of(&culling))?;
        if !pipeline.is_bound(version) {
            pipeline.write_uniform_buffers(0)?;
            pipeline.write(0, "PointLights", DescriptorResource::Buffer(point_lights))?;
            pipeline.write(0, "VisibleLightIndices", DescriptorResource::Buffer(visible))?;
            pipeline.write(0, "u_PreDepth", DescriptorResource::Image(depth))?;
            pipeline.mark_bound(version);
        }
        pipeline.prepare(&gpu)?;

        let pipeline = self.ready(PipelineId::LightCulling)?;
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("light culling"),
            timestamp_writes: None,
        });
        pipeline.bind_compute(&mut pass)?;
        pass.dispatch_workgroups(groups_x, groups_y, 1);
        Ok(())
    }

    /// Material bind group and push-constant bytes for every draw, in draw order.
    fn prepare_materials(&mut self, frame: &FrameData) -> Result<Vec<(u64, Vec<u8>)>> {
        let mesh_pipeline = self.ready(PipelineId::StaticMesh)?;
        let shader = mesh_pipeline.shader().clone();
        let generation = mesh_pipeline.generation();

        let default_current = self
            .default_material
            .as_ref()
            .is_some_and(|material| Arc::ptr_eq(material.read().shader(), &shader));
        if !default_current {
            let mut material = Material::new("Default", shader.clone());
            let defaults = [
                ("u_Material.AlbedoColor", UniformValue::from(Vec4::new(0.8, 0.8, 0.8, 1.0))),
                ("u_Material.Roughness", UniformValue::from(0.6f32)),
            ];
            for (name, value) in defaults {
                if let Err(err) = material.set(name, value) {
                    log::debug!("Default material: {err}");
                }
            }
            self.default_material = Some(material.into_shared());
        }
        let default = self
            .default_material
            .clone()
            .ok_or_else(|| Error::unknown_resource("default material"))?;

        let mut per_draw = Vec::with_capacity(frame.draws.len());
        for draw in &frame.draws {
            let material = match &draw.material {
                Some(material) if Arc::ptr_eq(material.read().shader(), &shader) => material.clone(),
                Some(material) => {
                    log::debug!(
                        "Material '{}' does not use the mesh shader, drawing with the default",
                        material.read().name()
                    );
                    default.clone()
                }
                None => default.clone(),
            };
            if material.read().is_stale() {
                material.write().rebuild();
            }

            let material = material.read();
            let fresh = self
                .material_sets
                .get(&material.id())
                .is_some_and(|binding| binding.revision == material.revision() && binding.generation == generation);
            if !fresh {
                let guard = shader.read();
                let layer = guard.layer();
                let mut set = DescriptorSet::new(material.name(), MATERIAL_SET);
                material.write_descriptors(layer, &mut set, &self.white, &self.linear)?;
                set.bind_group(&self.gpu, layer)?;
                self.material_sets.insert(
                    material.id(),
                    MaterialBinding {
                        revision: material.revision(),
                        generation,
                        set,
                    },
                );
            }
            per_draw.push((material.id(), material.push_constants().map(<[u8]>::to_vec).unwrap_or_default()));
        }
        Ok(per_draw)
    }

    fn geometry_pass(&mut self, encoder: &mut wgpu::CommandEncoder, frame: &FrameData) -> Result<()> {
        self.ensure(PipelineId::StaticMesh, frame)?;
        let version = self.binding_version;
        let gpu = self.gpu.clone();

        // Sky and grid are decoration: without their shaders the meshes still draw.
        let sky = self.ensure(PipelineId::Skybox, frame).is_ok();
        let grid = self.config.grid && self.ensure(PipelineId::Grid, frame).is_ok();
        for (id, enabled) in [(PipelineId::Skybox, sky), (PipelineId::Grid, grid)] {
            if !enabled {
                continue;
            }
            let pipeline = self.pipeline_mut(id)?;
            pipeline.upload_named("Camera", bytemuck::bytes_of(&frame.camera))?;
            if !pipeline.is_bound(version) {
                pipeline.write_uniform_buffers(0)?;
                pipeline.mark_bound(version);
            }
            pipeline.prepare(&gpu)?;
        }

        let point_lights = Arc::clone(&self.point_lights);
        let visible = Arc::clone(&self.targets.visible_lights);
        let shadow_map = Arc::clone(&self.targets.shadow_map);
        let shadow_sampler = Arc::clone(&self.shadow_sampler);
        let pipeline = self.pipeline_mut(PipelineId::StaticMesh)?;
        pipeline.upload_named("Camera", bytemuck::bytes_of(&frame.camera))?;
        pipeline.upload_named("Scene", bytemuck::bytes_of(&frame.scene))?;
        pipeline.upload_named("ShadowData", bytemuck::bytes_of(&frame.shadows))?;
        if !pipeline.is_bound(version) {
            pipeline.write_uniform_buffers(0)?;
            pipeline.write(0, "PointLights", DescriptorResource::Buffer(point_lights))?;
            pipeline.write(0, "VisibleLightIndices", DescriptorResource::Buffer(visible))?;
            pipeline.write(0, "u_ShadowMapTexture", DescriptorResource::Image(shadow_map))?;
            pipeline.write(0, "u_ShadowSampler", DescriptorResource::Sampler(shadow_sampler))?;
            pipeline.mark_bound(version);
        }
        pipeline.prepare(&gpu)?;
        let materials = self.prepare_materials(frame)?;

        let mesh = self.ready(PipelineId::StaticMesh)?;
        let mut pass = self.targets.geometry.begin_pass(encoder);
        if sky {
            let skybox = self.ready(PipelineId::Skybox)?;
            skybox.bind_render(&mut pass)?;
            skybox.push_render(&mut pass, bytemuck::bytes_of(&frame.sky));
            pass.draw(0..3, 0..1);
        }

        mesh.bind_render(&mut pass)?;
        if let Some(instances) = self.instances.buffer() {
            pass.set_vertex_buffer(1, instances.slice(..));
            for (draw, (material, push)) in frame.draws.iter().zip(&materials) {
                let (Some(buffers), Some(submesh)) = (draw.mesh.buffers(), draw.mesh.submesh(draw.submesh_index)) else {
                    continue;
                };
                let Some(bind_group) = self
                    .material_sets
                    .get(material)
                    .and_then(|binding| binding.set.current_bind_group())
                else {
                    continue;
                };
                pass.set_bind_group(MATERIAL_SET, bind_group, &[]);
                mesh.push_render(&mut pass, push);
                pass.set_vertex_buffer(0, buffers.vertex.slice(..));
                pass.set_index_buffer(buffers.index.slice(..), wgpu::IndexFormat::Uint32);
                pass.draw_indexed(
                    submesh.base_index..submesh.base_index + submesh.index_count,
                    submesh.base_vertex as i32,
                    draw.first_instance..draw.first_instance + draw.instance_count,
                );
            }
        }

        if grid {
            let grid = self.ready(PipelineId::Grid)?;
            grid.bind_render(&mut pass)?;
            pass.draw(0..6, 0..1);
        }
        Ok(())
    }

    fn bloom_pass(&mut self, encoder: &mut wgpu::CommandEncoder, frame: &FrameData) -> Result<()> {
        self.ensure(PipelineId::Bloom, frame)?;
        let pipeline = self
            .pipelines
            .get(&PipelineId::Bloom)
            .ok_or_else(|| Error::unknown_resource("Bloom"))?;
        let key = (self.binding_version, pipeline.generation());
        if self.bloom_key != Some(key) {
            self.bloom_sets.clear();
            let shader = pipeline.shader().read();
            let layer = shader.layer();
            for dispatch in &self.targets.bloom.plan.dispatches {
                let view = |source, mip| {
                    self.targets
                        .bloom_source(source, mip)
                        .map(DescriptorResource::View)
                        .ok_or_else(|| Error::unknown_resource(format!("bloom view {source:?} mip {mip}")))
                };
                let output = self
                    .targets
                    .bloom
                    .view(dispatch.output, dispatch.output_mip)
                    .cloned()
                    .map(DescriptorResource::View)
                    .ok_or_else(|| Error::unknown_resource("o_Image"))?;
                let mut set = DescriptorSet::new("Bloom", 0);
                set.write(layer, "o_Image", output)?;
                set.write(layer, "u_Texture", view(dispatch.input, dispatch.input_mip)?)?;
                set.write(layer, "u_BloomTexture", view(dispatch.bloom, dispatch.bloom_mip)?)?;
                set.write(layer, "u_Sampler", DescriptorResource::Sampler(Arc::clone(&self.linear)))?;
                set.bind_group(&self.gpu, layer)?;
                self.bloom_sets.push(set);
            }
            self.bloom_key = Some(key);
        }

        let bloom = &self.config.bloom;
        let params = BloomPush::params(bloom.threshold, bloom.knee);
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("bloom"),
            timestamp_writes: None,
        });
        pipeline.bind_compute(&mut pass)?;
        for (dispatch, set) in self.targets.bloom.plan.dispatches.iter().zip(&self.bloom_sets) {
            let Some(bind_group) = set.current_bind_group() else {
                continue;
            };
            pass.set_bind_group(0, bind_group, &[]);
            pipeline.push_compute(
                &mut pass,
                bytemuck::bytes_of(&BloomPush {
                    params,
                    mode: dispatch.stage as i32,
                }),
            );
            pass.dispatch_workgroups(dispatch.groups.0, dispatch.groups.1, 1);
        }
        Ok(())
    }

    fn composite_pass(&mut self, encoder: &mut wgpu::CommandEncoder, frame: &FrameData) -> Result<()> {
        self.ensure(PipelineId::SceneComposite, frame)?;
        let version = self.binding_version;
        let gpu = self.gpu.clone();
        let color = self
            .targets
            .geometry
            .color(0)
            .cloned()
            .ok_or_else(|| Error::unknown_resource("u_Texture"))?;
        let bloom = Arc::clone(&self.targets.bloom.chain[2]);
        let dirt = Arc::clone(&self.targets.bloom_dirt);
        let sampler = Arc::clone(&self.linear);

        let pipeline = self.pipeline_mut(PipelineId::SceneComposite)?;
        if !pipeline.is_bound(version) {
            pipeline.write(0, "u_Texture", DescriptorResource::Image(color))?;
            pipeline.write(0, "u_BloomTexture", DescriptorResource::Image(bloom))?;
            pipeline.write(0, "u_BloomDirtTexture", DescriptorResource::Image(dirt))?;
            pipeline.write(0, "u_Sampler", DescriptorResource::Sampler(sampler))?;
            pipeline.mark_bound(version);
        }
        pipeline.prepare(&gpu)?;

        let bloom_ran = frame.plan.runs(PassKind::Bloom);
        let push = CompositePush {
            exposure: EXPOSURE,
            bloom_intensity: if bloom_ran { 1.0 } else { 0.0 },
            bloom_dirt_intensity: self.config.bloom.dirt_intensity,
            opacity: 1.0,
        };
        let pipeline = self.ready(PipelineId::SceneComposite)?;
        let mut pass = self.targets.composite.begin_pass(encoder);
        pipeline.bind_render(&mut pass)?;
        pipeline.push_render(&mut pass, bytemuck::bytes_of(&push));
        pass.draw(0..3, 0..1);
        Ok(())
    }

    fn late_composite_pass(&mut self, encoder: &mut wgpu::CommandEncoder, frame: &FrameData) -> Result<()> {
        if frame.outlines.is_empty() {
            return Ok(());
        }
        self.ensure(PipelineId::PhysicsOutline, frame)?;
        let version = self.binding_version;
        let gpu = self.gpu.clone();
        let pipeline = self.pipeline_mut(PipelineId::PhysicsOutline)?;
        pipeline.upload_named("Camera", bytemuck::bytes_of(&frame.camera))?;
        if !pipeline.is_bound(version) {
            pipeline.write_uniform_buffers(0)?;
            pipeline.mark_bound(version);
        }
        pipeline.prepare(&gpu)?;

        let pipeline = self.ready(PipelineId::PhysicsOutline)?;
        let mut pass = self.targets.late_composite.begin_pass(encoder);
        pipeline.bind_render(&mut pass)?;
        pipeline.push_render(&mut pass, bytemuck::bytes_of(&OutlinePush { color: OUTLINE_COLOR }));
        if let Some(instances) = self.outline_instances.buffer() {
            draw_meshes(&mut pass, &frame.outlines, instances);
        }
        Ok(())
    }

    fn texture_pass(&mut self, encoder: &mut wgpu::CommandEncoder, frame: &FrameData) -> Result<()> {
        let target = frame
            .present
            .clone()
            .ok_or_else(|| Error::unknown_resource("present target"))?;
        self.ensure(PipelineId::TexturePass, frame)?;
        let version = self.binding_version;
        let gpu = self.gpu.clone();
        let composite = self
            .targets
            .composite
            .color(0)
            .cloned()
            .ok_or_else(|| Error::unknown_resource("u_Texture"))?;
        let sampler = Arc::clone(&self.linear);

        let pipeline = self.pipeline_mut(PipelineId::TexturePass)?;
        if !pipeline.is_bound(version) {
            pipeline.write(0, "u_Texture", DescriptorResource::Image(composite))?;
            pipeline.write(0, "u_Sampler", DescriptorResource::Sampler(sampler))?;
            pipeline.mark_bound(version);
        }
        pipeline.prepare(&gpu)?;

        let pipeline = self.ready(PipelineId::TexturePass)?;
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("texture pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &target.view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pipeline.bind_render(&mut pass)?;
        pass.draw(0..3, 0..1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::material::MaterialRegistry;
    use crate::renderer::scene::EntityId;
    use crate::shader::Shader;
    use parking_lot::RwLock;

    const FLAT: &str = "#type vertex\n#version 450\nlayout(location = 0) in vec3 a_Position;\nvoid main() {\n    gl_Position = vec4(a_Position, 1.0);\n}\n#type fragment\n#version 450\nlayout(push_constant) uniform Material {\n    vec4 AlbedoColor;\n} u_Material;\nlayout(location = 0) out vec4 o_Color;\nvoid main() {\n    o_Color = u_Material.AlbedoColor;\n}\n";

    #[test]
    fn shader_blocks_match_std140_sizes() {
        assert_eq!(std::mem::size_of::<SceneData>(), 48);
        assert_eq!(std::mem::size_of::<ShadowData>(), 272);
        assert_eq!(std::mem::size_of::<CullingData>(), 16);
        assert_eq!(std::mem::size_of::<BloomPush>(), 20);
        assert_eq!(std::mem::size_of::<CompositePush>(), 16);
        assert_eq!(std::mem::size_of::<DynamicSky>(), 12);
    }

    #[test]
    fn missing_light_points_down_with_no_energy() {
        let scene = SceneData::new(None, 16, 80, 3, 4);
        assert_eq!(scene.light_direction, [0.0, -1.0, 0.0, 0.0]);
        assert_eq!(scene.info, [16, 80, 3, 4]);

        let light = DirectionalLight::new(glam::Vec3::new(0.0, 0.0, -2.0), glam::Vec3::ONE, 3.0);
        let scene = SceneData::new(Some(&light), 16, 80, 0, 4);
        assert_eq!(scene.light_direction, [0.0, 0.0, -1.0, 3.0]);
        assert_eq!(scene.light_radiance[3], 1.0);
    }

    #[test]
    fn unused_cascades_never_win_the_split_test() {
        let cascades = [ShadowCascade {
            near_depth: 0.1,
            split_depth: 12.5,
            view_projection: Mat4::from_scale(glam::Vec3::splat(2.0)),
        }];
        let data = ShadowData::new(&cascades);
        assert_eq!(data.cascade_splits[0], 12.5);
        assert_eq!(data.cascade_splits[1], f32::MAX);
        assert_eq!(data.light_matrices[0][0][0], 2.0);
        assert_eq!(data.light_matrices[3], Mat4::IDENTITY.to_cols_array_2d());
    }

    #[test]
    fn bloom_curve_follows_threshold_and_knee() {
        assert_eq!(BloomPush::params(1.0, 0.1), [1.0, 0.9, 0.2, 2.5]);
        assert!(BloomPush::params(1.0, 0.0)[3].is_finite());
    }

    #[test]
    fn prepared_draws_cover_packed_transforms() {
        let shader = Arc::new(RwLock::new(Shader::from_source("Flat", FLAT, None).unwrap()));
        let registry = Arc::new(MaterialRegistry::new(1));
        registry.set_material(0, Material::new("Grey", shader).into_shared());
        let cube = Arc::new(StaticMesh::cube(None, Arc::clone(&registry)).unwrap());
        let other = Arc::new(StaticMesh::cube(None, Arc::clone(&registry)).unwrap());

        let mut list = DrawList::new();
        list.submit_mesh(EntityId(1), &cube, &registry, Mat4::IDENTITY);
        list.submit_mesh(EntityId(2), &other, &registry, Mat4::IDENTITY);
        list.submit_mesh(EntityId(3), &cube, &registry, Mat4::from_translation(glam::Vec3::X));

        let (draws, transforms) = PreparedDraw::from_list(&mut list);
        assert_eq!(transforms.len(), 3);
        assert_eq!(draws.len(), 2);
        assert_eq!((draws[0].first_instance, draws[0].instance_count), (0, 2));
        assert_eq!((draws[1].first_instance, draws[1].instance_count), (2, 1));
        assert_eq!(draws[0].material.as_ref().unwrap().read().name(), "Grey");
    }

    #[test]
    fn compute_passes_have_no_render_state() {
        assert!(PipelineId::Bloom.spec(None).is_none());
        assert!(PipelineId::LightCulling.spec(None).is_none());
        let blit = PipelineId::TexturePass
            .spec(Some(wgpu::TextureFormat::Bgra8Unorm))
            .unwrap();
        assert_eq!(
            blit.color_targets[0].as_ref().unwrap().format,
            wgpu::TextureFormat::Bgra8Unorm
        );
        let shadow = PipelineId::DirShadowMap.spec(None).unwrap();
        assert!(shadow.color_targets.is_empty());
        assert_eq!(shadow.vertex_buffers.len(), 2);
    }
}
