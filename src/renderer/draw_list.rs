// src/renderer/draw_list.rs
//! Per-frame draw lists.
//!
//! Submissions that share a [`StaticMeshKey`] collapse into one instanced draw. Each key
//! owns a run of per-instance transforms; [`DrawList::pack`] lays the runs out back to back
//! in submission order so one vertex buffer feeds every draw.

use super::material::MaterialRegistry;
use super::mesh::{AssetId, StaticMesh};
use super::scene::EntityId;
use crate::gpu::GpuContext;
use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Batching identity: same mesh, same material registry (by identity) and same submesh.
#[derive(Debug, Clone)]
pub struct StaticMeshKey {
    pub mesh_id: AssetId,
    pub registry: Arc<MaterialRegistry>,
    pub submesh_index: u32,
}

impl PartialEq for StaticMeshKey {
    fn eq(&self, other: &Self) -> bool {
        self.mesh_id == other.mesh_id
            && Arc::ptr_eq(&self.registry, &other.registry)
            && self.submesh_index == other.submesh_index
    }
}

impl Eq for StaticMeshKey {}

impl Hash for StaticMeshKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.mesh_id.hash(state);
        self.registry.id().hash(state);
        self.submesh_index.hash(state);
    }
}

#[derive(Debug, Clone)]
pub struct DrawCommand {
    /// First entity submitted under this key.
    pub entity: EntityId,
    pub mesh: Arc<StaticMesh>,
    pub registry: Arc<MaterialRegistry>,
    pub submesh_index: u32,
    pub instance_count: u32,
}

/// One instance transform as four row vectors (vertex attributes 5..8).
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct TransformBufferData {
    pub rows: [[f32; 4]; 4],
}

impl From<Mat4> for TransformBufferData {
    fn from(m: Mat4) -> Self {
        Self {
            rows: m.transpose().to_cols_array_2d(),
        }
    }
}

impl TransformBufferData {
    const ATTRIBUTES: [wgpu::VertexAttribute; 4] = wgpu::vertex_attr_array![
        5 => Float32x4,
        6 => Float32x4,
        7 => Float32x4,
        8 => Float32x4
    ];

    pub fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<TransformBufferData>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Instance,
            attributes: &Self::ATTRIBUTES,
        }
    }

    pub fn to_mat4(&self) -> Mat4 {
        Mat4::from_cols_array_2d(&self.rows).transpose()
    }
}

/// Transforms of every instance under one key and where they start in the packed buffer.
#[derive(Debug, Clone, Default)]
pub struct TransformBuffer {
    /// First instance index in the packed buffer. Valid after [`DrawList::pack`].
    pub offset: u32,
    pub data: Vec<TransformBufferData>,
}

/// Effective registry for an instance: the entity's overrides win once any of them is active.
pub fn resolve_registry(
    mesh_registry: &Arc<MaterialRegistry>,
    overrides: Option<&Arc<MaterialRegistry>>,
) -> Arc<MaterialRegistry> {
    match overrides {
        Some(overrides) if overrides.has_any_override() => Arc::clone(overrides),
        _ => Arc::clone(mesh_registry),
    }
}

#[derive(Debug, Default)]
pub struct DrawList {
    index: HashMap<StaticMeshKey, usize>,
    commands: Vec<DrawCommand>,
    transforms: Vec<TransformBuffer>,
}

impl DrawList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one instance of `submesh_index`. `transform` is the entity's world transform;
    /// the submesh's local transform is applied on top.
    pub fn submit(
        &mut self,
        entity: EntityId,
        mesh: &Arc<StaticMesh>,
        registry: &Arc<MaterialRegistry>,
        submesh_index: u32,
        transform: Mat4,
    ) {
        let local = mesh
            .submesh(submesh_index)
            .map_or(Mat4::IDENTITY, |submesh| submesh.transform);
        let key = StaticMeshKey {
            mesh_id: mesh.id(),
            registry: Arc::clone(registry),
            submesh_index,
        };
        let slot = *self.index.entry(key).or_insert_with(|| {
            self.commands.push(DrawCommand {
                entity,
                mesh: Arc::clone(mesh),
                registry: Arc::clone(registry),
                submesh_index,
                instance_count: 0,
            });
            self.transforms.push(TransformBuffer::default());
            self.commands.len() - 1
        });
        self.commands[slot].instance_count += 1;
        self.transforms[slot].data.push((transform * local).into());
    }

    /// Submit every submesh of `mesh`.
    pub fn submit_mesh(
        &mut self,
        entity: EntityId,
        mesh: &Arc<StaticMesh>,
        registry: &Arc<MaterialRegistry>,
        transform: Mat4,
    ) {
        for index in 0..mesh.submeshes().len() as u32 {
            self.submit(entity, mesh, registry, index, transform);
        }
    }

    /// Assign offsets in submission order and return every transform, packed.
    pub fn pack(&mut self) -> Vec<TransformBufferData> {
        let mut packed = Vec::with_capacity(self.total_instances() as usize);
        for buffer in &mut self.transforms {
            buffer.offset = packed.len() as u32;
            packed.extend_from_slice(&buffer.data);
        }
        packed
    }

    pub fn commands(&self) -> &[DrawCommand] {
        &self.commands
    }

    pub fn transform_buffer(&self, key: &StaticMeshKey) -> Option<&TransformBuffer> {
        self.index.get(key).map(|&slot| &self.transforms[slot])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&DrawCommand, &TransformBuffer)> {
        self.commands.iter().zip(&self.transforms)
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn total_instances(&self) -> u32 {
        self.commands.iter().map(|c| c.instance_count).sum()
    }

    pub fn clear(&mut self) {
        self.index.clear();
        self.commands.clear();
        self.transforms.clear();
    }
}

/// Capacity after a frame needing `needed` instances. The buffer never shrinks.
pub fn grown_capacity(current: u64, needed: u64) -> u64 {
    current.max(needed)
}

/// GPU vertex buffer holding the packed instance transforms of one draw list.
#[derive(Default)]
pub struct InstanceTransformBuffer {
    buffer: Option<wgpu::Buffer>,
    capacity: u64,
}

impl InstanceTransformBuffer {
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn buffer(&self) -> Option<&wgpu::Buffer> {
        self.buffer.as_ref()
    }

    /// Upload `data`, reallocating only when it outgrows the current buffer.
    pub fn upload(&mut self, gpu: &GpuContext, label: &str, data: &[TransformBufferData]) {
        if data.is_empty() {
            return;
        }
        let needed = data.len() as u64;
        if self.buffer.is_none() || needed > self.capacity {
            self.capacity = grown_capacity(self.capacity, needed);
            log::debug!("{label}: growing instance buffer to {} transforms", self.capacity);
            self.buffer = Some(gpu.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: self.capacity * std::mem::size_of::<TransformBufferData>() as u64,
                usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }));
        }
        if let Some(buffer) = &self.buffer {
            gpu.queue.write_buffer(buffer, 0, bytemuck::cast_slice(data));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn cube(registry: &Arc<MaterialRegistry>) -> Arc<StaticMesh> {
        Arc::new(StaticMesh::cube(None, Arc::clone(registry)).unwrap())
    }

    #[test]
    fn equal_keys_merge_into_one_instanced_draw() {
        let registry = Arc::new(MaterialRegistry::new(1));
        let mesh = cube(&registry);
        let mut list = DrawList::new();
        list.submit(EntityId(1), &mesh, &registry, 0, Mat4::from_translation(Vec3::X));
        list.submit(EntityId(2), &mesh, &registry, 0, Mat4::from_translation(Vec3::Y));

        assert_eq!(list.len(), 1);
        assert_eq!(list.commands()[0].instance_count, 2);
        assert_eq!(list.commands()[0].entity, EntityId(1));
        let key = StaticMeshKey {
            mesh_id: mesh.id(),
            registry: Arc::clone(&registry),
            submesh_index: 0,
        };
        let transforms = list.transform_buffer(&key).unwrap();
        assert_eq!(transforms.data.len(), 2);
        assert_eq!(transforms.data[1].to_mat4(), Mat4::from_translation(Vec3::Y));
    }

    #[test]
    fn distinct_registries_do_not_merge() {
        let a = Arc::new(MaterialRegistry::new(1));
        let b = Arc::new(MaterialRegistry::new(1));
        let mesh = cube(&a);
        let mut list = DrawList::new();
        list.submit(EntityId(1), &mesh, &a, 0, Mat4::IDENTITY);
        list.submit(EntityId(1), &mesh, &b, 0, Mat4::IDENTITY);
        list.submit(EntityId(1), &mesh, &a, 0, Mat4::IDENTITY);
        assert_eq!(list.len(), 2);
        assert_eq!(list.total_instances(), 3);
    }

    #[test]
    fn packing_follows_submission_order() {
        let registry = Arc::new(MaterialRegistry::new(1));
        let first = cube(&registry);
        let second = cube(&registry);
        let mut list = DrawList::new();
        list.submit(EntityId(1), &first, &registry, 0, Mat4::IDENTITY);
        list.submit(EntityId(2), &second, &registry, 0, Mat4::from_scale(Vec3::splat(2.0)));
        list.submit(EntityId(3), &first, &registry, 0, Mat4::IDENTITY);

        let packed = list.pack();
        assert_eq!(packed.len(), 3);
        let offsets: Vec<u32> = list.iter().map(|(_, t)| t.offset).collect();
        assert_eq!(offsets, vec![0, 2]);
        assert_eq!(packed[2].to_mat4(), Mat4::from_scale(Vec3::splat(2.0)));

        list.clear();
        assert!(list.is_empty());
        assert!(list.pack().is_empty());
    }

    #[test]
    fn overrides_win_only_when_active() {
        let mesh_registry = Arc::new(MaterialRegistry::new(1));
        let overrides = Arc::new(MaterialRegistry::new(1));
        assert!(Arc::ptr_eq(&resolve_registry(&mesh_registry, Some(&overrides)), &mesh_registry));
        assert!(Arc::ptr_eq(&resolve_registry(&mesh_registry, None), &mesh_registry));
        overrides.set_override(0, {
            let shader = crate::shader::Shader::from_source(
                "Flat",
                "#type vertex\n#version 450\nvoid main() {\n    gl_Position = vec4(0.0);\n}\n",
                None,
            )
            .unwrap();
            crate::renderer::material::Material::new("Flat", Arc::new(parking_lot::RwLock::new(shader)))
                .into_shared()
        });
        assert!(Arc::ptr_eq(&resolve_registry(&mesh_registry, Some(&overrides)), &overrides));
    }

    #[test]
    fn instance_buffer_never_shrinks() {
        assert_eq!(grown_capacity(0, 10), 10);
        assert_eq!(grown_capacity(10, 4), 10);
        assert_eq!(grown_capacity(10, 12), 12);
    }

    #[test]
    fn transform_rows_are_row_major() {
        let m = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0));
        let data = TransformBufferData::from(m);
        assert_eq!(data.rows[0], [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(data.rows[2], [0.0, 0.0, 1.0, 3.0]);
    }
}
