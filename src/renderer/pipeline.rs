// src/renderer/pipeline.rs
//! Pipelines built straight from a shader's reflected layout.
//!
//! - **Layout**: bind group layouts and push-constant ranges come from the shader's
//!   [`DescriptorSetLayer`](crate::descriptor::DescriptorSetLayer), never written by hand.
//! - **Reload**: [`ShaderPipeline::refresh`] notices a new shader generation and rebuilds. A
//!   rebuild that fails validation keeps the previous pipeline.
//! - **Descriptor sets**: one [`DescriptorSet`] per set index, rewritten whenever the pass's
//!   targets change version.

use crate::descriptor::{DescriptorResource, DescriptorSet};
use crate::error::{Error, Result};
use crate::gpu::GpuContext;
use crate::shader::compiler::ENTRY_POINT;
use crate::shader::{Shader, ShaderStage, SharedShader};
use std::collections::BTreeMap;

/// Fixed-function state for a render pipeline. Compute pipelines need none.
#[derive(Debug, Clone)]
pub struct RenderPipelineSpec {
    pub vertex_buffers: Vec<wgpu::VertexBufferLayout<'static>>,
    pub color_targets: Vec<Option<wgpu::ColorTargetState>>,
    pub depth: Option<wgpu::DepthStencilState>,
    pub cull_mode: Option<wgpu::Face>,
}

impl RenderPipelineSpec {
    pub fn new() -> Self {
        Self {
            vertex_buffers: Vec::new(),
            color_targets: Vec::new(),
            depth: None,
            cull_mode: None,
        }
    }

    pub fn with_vertex_buffers(mut self, layouts: Vec<wgpu::VertexBufferLayout<'static>>) -> Self {
        self.vertex_buffers = layouts;
        self
    }

    pub fn with_color(mut self, format: wgpu::TextureFormat, blend: Option<wgpu::BlendState>) -> Self {
        self.color_targets.push(Some(wgpu::ColorTargetState {
            format,
            blend,
            write_mask: wgpu::ColorWrites::ALL,
        }));
        self
    }

    pub fn with_depth(mut self, write: bool, compare: wgpu::CompareFunction, bias: wgpu::DepthBiasState) -> Self {
        self.depth = Some(wgpu::DepthStencilState {
            format: crate::gpu::Image2D::DEPTH_FORMAT,
            depth_write_enabled: write,
            depth_compare: compare,
            stencil: wgpu::StencilState::default(),
            bias,
        });
        self
    }

    pub fn culling(mut self, face: wgpu::Face) -> Self {
        self.cull_mode = Some(face);
        self
    }
}

impl Default for RenderPipelineSpec {
    fn default() -> Self {
        Self::new()
    }
}

pub enum Pipeline {
    Render(wgpu::RenderPipeline),
    Compute(wgpu::ComputePipeline),
}

fn build(gpu: &GpuContext, label: &str, shader: &Shader, spec: Option<&RenderPipelineSpec>) -> Result<Pipeline> {
    let layer = shader.layer();
    let bind_group_layouts = layer.bind_group_layouts();
    let push_constant_ranges = layer.push_constant_ranges();

    gpu.device.push_error_scope(wgpu::ErrorFilter::Validation);
    let built = (|| -> Result<Pipeline> {
        let layout = gpu.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(label),
            bind_group_layouts: &bind_group_layouts,
            push_constant_ranges: &push_constant_ranges,
        });
        match spec {
            Some(spec) => {
                let vertex = shader.module(gpu, ShaderStage::Vertex)?;
                let fragment = if shader.has_stage(ShaderStage::Fragment) {
                    Some(shader.module(gpu, ShaderStage::Fragment)?)
                } else {
                    None
                };
                Ok(Pipeline::Render(gpu.device.create_render_pipeline(
                    &wgpu::RenderPipelineDescriptor {
                        label: Some(label),
                        layout: Some(&layout),
                        vertex: wgpu::VertexState {
                            module: &vertex,
                            entry_point: ENTRY_POINT,
                            compilation_options: Default::default(),
                            buffers: &spec.vertex_buffers,
                        },
                        fragment: fragment.as_ref().map(|module| wgpu::FragmentState {
                            module,
                            entry_point: ENTRY_POINT,
                            compilation_options: Default::default(),
                            targets: &spec.color_targets,
                        }),
                        primitive: wgpu::PrimitiveState {
                            topology: wgpu::PrimitiveTopology::TriangleList,
                            front_face: wgpu::FrontFace::Ccw,
                            cull_mode: spec.cull_mode,
                            ..Default::default()
                        },
                        depth_stencil: spec.depth.clone(),
                        multisample: wgpu::MultisampleState::default(),
                        multiview: None,
                        cache: None,
                    },
                )))
            }
            None => {
                let module = shader.module(gpu, ShaderStage::Compute)?;
                Ok(Pipeline::Compute(gpu.device.create_compute_pipeline(
                    &wgpu::ComputePipelineDescriptor {
                        label: Some(label),
                        layout: Some(&layout),
                        module: &module,
                        entry_point: ENTRY_POINT,
                        compilation_options: Default::default(),
                        cache: None,
                    },
                )))
            }
        }
    })();
    let validation = pollster::block_on(gpu.device.pop_error_scope());

    let pipeline = built?;
    match validation {
        Some(err) => Err(Error::ShaderCompile {
            stage: if spec.is_some() { "render pipeline" } else { "compute pipeline" }.into(),
            message: format!("{label}: {err}"),
        }),
        None => Ok(pipeline),
    }
}

pub struct ShaderPipeline {
    label: String,
    shader: SharedShader,
    generation: u64,
    spec: Option<RenderPipelineSpec>,
    pipeline: Pipeline,
    push_constants: Vec<wgpu::PushConstantRange>,
    sets: BTreeMap<u32, DescriptorSet>,
    bound_version: Option<u64>,
}

impl ShaderPipeline {
    #[tracing::instrument(skip(gpu, shader, spec), fields(kind = "render"))]
    pub fn render(gpu: &GpuContext, label: &str, shader: &SharedShader, spec: RenderPipelineSpec) -> Result<Self> {
        Self::create(gpu, label, shader, Some(spec))
    }

    #[tracing::instrument(skip(gpu, shader), fields(kind = "compute"))]
    pub fn compute(gpu: &GpuContext, label: &str, shader: &SharedShader) -> Result<Self> {
        Self::create(gpu, label, shader, None)
    }

    fn create(gpu: &GpuContext, label: &str, shader: &SharedShader, spec: Option<RenderPipelineSpec>) -> Result<Self> {
        let (pipeline, push_constants, generation) = {
            let guard = shader.read();
            (
                build(gpu, label, &guard, spec.as_ref())?,
                guard.layer().push_constant_ranges(),
                guard.generation(),
            )
        };
        log::debug!("Created pipeline '{label}'");
        Ok(Self {
            label: label.to_owned(),
            shader: shader.clone(),
            generation,
            spec,
            pipeline,
            push_constants,
            sets: BTreeMap::new(),
            bound_version: None,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn shader(&self) -> &SharedShader {
        &self.shader
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Rebuild after a shader reload. `Ok(true)` when the pipeline was replaced; on error the
    /// previous pipeline stays and the failed generation is not retried.
    pub fn refresh(&mut self, gpu: &GpuContext) -> Result<bool> {
        let (generation, rebuilt) = {
            let shader = self.shader.read();
            let generation = shader.generation();
            if generation == self.generation {
                return Ok(false);
            }
            (
                generation,
                build(gpu, &self.label, &shader, self.spec.as_ref())
                    .map(|pipeline| (pipeline, shader.layer().push_constant_ranges())),
            )
        };
        self.generation = generation;
        let (pipeline, push_constants) = rebuilt?;
        self.pipeline = pipeline;
        self.push_constants = push_constants;
        self.sets.clear();
        self.bound_version = None;
        log::info!("Rebuilt pipeline '{}' for shader generation {generation}", self.label);
        Ok(true)
    }

    /// Whether the descriptor sets were written against targets of `version`.
    pub fn is_bound(&self, version: u64) -> bool {
        self.bound_version == Some(version)
    }

    pub fn mark_bound(&mut self, version: u64) {
        self.bound_version = Some(version);
    }

    fn set_entry(&mut self, set: u32) -> &mut DescriptorSet {
        let label = &self.label;
        self.sets
            .entry(set)
            .or_insert_with(|| DescriptorSet::new(label, set))
    }

    pub fn write(&mut self, set: u32, name: &str, resource: DescriptorResource) -> Result<()> {
        let shader = self.shader.clone();
        let shader = shader.read();
        self.set_entry(set).write(shader.layer(), name, resource)
    }

    /// Bind every uniform buffer the shader's layer owns in `set`.
    pub fn write_uniform_buffers(&mut self, set: u32) -> Result<()> {
        let shader = self.shader.clone();
        let shader = shader.read();
        self.set_entry(set).write_all_uniform_buffers(shader.layer())
    }

    /// Copy `bytes` into the uniform buffer at (`set`, `binding`).
    pub fn upload(&self, set: u32, binding: u32, bytes: &[u8]) -> Result<()> {
        self.shader.write().layer_mut().upload_uniform_buffer(set, binding, bytes)
    }

    /// Upload to the uniform buffer the shader reflects as `name` (the block's type name).
    pub fn upload_named(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let mut shader = self.shader.write();
        let binding = shader.layer().resolve(name)?;
        shader.layer_mut().upload_uniform_buffer(binding.set, binding.binding, bytes)
    }

    /// Build (or reuse) the bind group of every written set.
    pub fn prepare(&mut self, gpu: &GpuContext) -> Result<()> {
        let shader = self.shader.read();
        for set in self.sets.values_mut() {
            set.bind_group(gpu, shader.layer())?;
        }
        Ok(())
    }

    pub fn bind_render(&self, pass: &mut wgpu::RenderPass<'_>) -> Result<()> {
        let Pipeline::Render(pipeline) = &self.pipeline else {
            crate::bail!("'{}' is not a render pipeline", self.label);
        };
        pass.set_pipeline(pipeline);
        for (index, set) in &self.sets {
            if let Some(bind_group) = set.current_bind_group() {
                pass.set_bind_group(*index, bind_group, &[]);
            }
        }
        Ok(())
    }

    pub fn bind_compute(&self, pass: &mut wgpu::ComputePass<'_>) -> Result<()> {
        let Pipeline::Compute(pipeline) = &self.pipeline else {
            crate::bail!("'{}' is not a compute pipeline", self.label);
        };
        pass.set_pipeline(pipeline);
        for (index, set) in &self.sets {
            if let Some(bind_group) = set.current_bind_group() {
                pass.set_bind_group(*index, bind_group, &[]);
            }
        }
        Ok(())
    }

    /// Push `bytes` (laid out from offset 0 of the push-constant space) to every range they cover.
    pub fn push_render(&self, pass: &mut wgpu::RenderPass<'_>, bytes: &[u8]) {
        for range in &self.push_constants {
            let (start, end) = (range.range.start as usize, range.range.end as usize);
            if end <= bytes.len() {
                pass.set_push_constants(range.stages, range.range.start, &bytes[start..end]);
            }
        }
    }

    pub fn push_compute(&self, pass: &mut wgpu::ComputePass<'_>, bytes: &[u8]) {
        for range in &self.push_constants {
            let (start, end) = (range.range.start as usize, range.range.end as usize);
            if end <= bytes.len() {
                pass.set_push_constants(range.range.start, &bytes[start..end]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_builder_collects_state() {
        let spec = RenderPipelineSpec::new()
            .with_color(wgpu::TextureFormat::Rgba16Float, Some(wgpu::BlendState::ALPHA_BLENDING))
            .with_depth(false, wgpu::CompareFunction::LessEqual, Default::default())
            .culling(wgpu::Face::Back);
        assert_eq!(spec.color_targets.len(), 1);
        let depth = spec.depth.as_ref().unwrap();
        assert!(!depth.depth_write_enabled);
        assert_eq!(depth.format, wgpu::TextureFormat::Depth32Float);
        assert_eq!(spec.cull_mode, Some(wgpu::Face::Back));
    }
}
