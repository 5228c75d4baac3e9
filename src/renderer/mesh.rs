// src/renderer/mesh.rs
//! Static meshes: one vertex/index buffer pair split into submeshes, each drawn with
//! one material slot of the mesh's registry.

use super::material::MaterialRegistry;
use crate::error::{Error, Result};
use crate::gpu::GpuContext;
use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use wgpu::util::DeviceExt;

static NEXT_ASSET_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssetId(pub u64);

impl AssetId {
    pub fn next() -> Self {
        Self(NEXT_ASSET_ID.fetch_add(1, Ordering::Relaxed))
    }
}

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct StaticVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub tangent: [f32; 3],
    pub binormal: [f32; 3],
    pub texcoord: [f32; 2],
}

impl StaticVertex {
    const ATTRIBUTES: [wgpu::VertexAttribute; 5] = wgpu::vertex_attr_array![
        0 => Float32x3,
        1 => Float32x3,
        2 => Float32x3,
        3 => Float32x3,
        4 => Float32x2
    ];

    pub fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<StaticVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRIBUTES,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Submesh {
    pub base_vertex: u32,
    pub base_index: u32,
    pub index_count: u32,
    pub material_index: u32,
    /// Mesh-local transform applied before the instance transform.
    pub transform: Mat4,
    pub name: String,
}

pub struct MeshBuffers {
    pub vertex: wgpu::Buffer,
    pub index: wgpu::Buffer,
}

pub struct StaticMesh {
    id: AssetId,
    name: String,
    vertices: Vec<StaticVertex>,
    indices: Vec<u32>,
    submeshes: Vec<Submesh>,
    materials: Arc<MaterialRegistry>,
    buffers: Option<MeshBuffers>,
}

impl std::fmt::Debug for StaticMesh {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticMesh")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("vertices", &self.vertices.len())
            .field("indices", &self.indices.len())
            .field("submeshes", &self.submeshes.len())
            .finish()
    }
}

impl StaticMesh {
    /// Validate submesh ranges and, with a device, upload the geometry.
    pub fn new(
        gpu: Option<&GpuContext>,
        name: &str,
        vertices: Vec<StaticVertex>,
        indices: Vec<u32>,
        submeshes: Vec<Submesh>,
        materials: Arc<MaterialRegistry>,
    ) -> Result<Self> {
        for submesh in &submeshes {
            let end = submesh.base_index as usize + submesh.index_count as usize;
            if end > indices.len() {
                return Err(Error::custom(format!(
                    "mesh '{name}': submesh '{}' reads indices up to {end}, mesh has {}",
                    submesh.name,
                    indices.len()
                )));
            }
        }

        let buffers = gpu.map(|gpu| MeshBuffers {
            vertex: gpu.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(&format!("{name} vertices")),
                contents: bytemuck::cast_slice(&vertices),
                usage: wgpu::BufferUsages::VERTEX,
            }),
            index: gpu.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(&format!("{name} indices")),
                contents: bytemuck::cast_slice(&indices),
                usage: wgpu::BufferUsages::INDEX,
            }),
        });

        Ok(Self {
            id: AssetId::next(),
            name: name.to_owned(),
            vertices,
            indices,
            submeshes,
            materials,
            buffers,
        })
    }

    /// Unit cube with one submesh using material slot 0.
    pub fn cube(gpu: Option<&GpuContext>, materials: Arc<MaterialRegistry>) -> Result<Self> {
        let faces: [([f32; 3], [f32; 3], [f32; 3]); 6] = [
            ([1.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.0, 1.0, 0.0]),
            ([-1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0]),
            ([0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, -1.0]),
            ([0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]),
            ([0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
            ([0.0, 0.0, -1.0], [-1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
        ];
        let mut vertices = Vec::with_capacity(24);
        let mut indices = Vec::with_capacity(36);
        for (normal, tangent, binormal) in faces {
            let n = glam::Vec3::from(normal);
            let t = glam::Vec3::from(tangent);
            let b = glam::Vec3::from(binormal);
            let base = vertices.len() as u32;
            for (u, v) in [(0.0f32, 0.0f32), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)] {
                let p = (n + t * (u * 2.0 - 1.0) + b * (v * 2.0 - 1.0)) * 0.5;
                vertices.push(StaticVertex {
                    position: p.to_array(),
                    normal,
                    tangent,
                    binormal,
                    texcoord: [u, 1.0 - v],
                });
            }
            indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }
        let submesh = Submesh {
            base_vertex: 0,
            base_index: 0,
            index_count: indices.len() as u32,
            material_index: 0,
            transform: Mat4::IDENTITY,
            name: "Cube".to_owned(),
        };
        Self::new(gpu, "Cube", vertices, indices, vec![submesh], materials)
    }

    pub fn id(&self) -> AssetId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn vertices(&self) -> &[StaticVertex] {
        &self.vertices
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn submeshes(&self) -> &[Submesh] {
        &self.submeshes
    }

    pub fn submesh(&self, index: u32) -> Option<&Submesh> {
        self.submeshes.get(index as usize)
    }

    pub fn materials(&self) -> &Arc<MaterialRegistry> {
        &self.materials
    }

    pub fn buffers(&self) -> Option<&MeshBuffers> {
        self.buffers.as_ref()
    }
}
