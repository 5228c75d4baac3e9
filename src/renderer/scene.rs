// src/renderer/scene.rs
//! What the renderer reads from a scene each frame.

use super::material::MaterialRegistry;
use super::mesh::StaticMesh;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct EntityId(pub u64);

/// A static mesh component together with its entity's world transform.
#[derive(Debug, Clone)]
pub struct StaticMeshInstance {
    pub entity: EntityId,
    pub mesh: Arc<StaticMesh>,
    /// Per-entity material overrides; used only when one of its slots is active.
    pub material_overrides: Option<Arc<MaterialRegistry>>,
    pub transform: Mat4,
}

/// Matches `DirectionalLight` in the lighting shaders.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct DirectionalLight {
    /// Direction the light travels.
    pub direction: [f32; 3],
    pub intensity: f32,
    pub radiance: [f32; 3],
    pub cast_shadows: u32,
}

impl DirectionalLight {
    pub fn new(direction: Vec3, radiance: Vec3, intensity: f32) -> Self {
        Self {
            direction: direction.normalize_or_zero().to_array(),
            intensity,
            radiance: radiance.to_array(),
            cast_shadows: 1,
        }
    }

    pub fn direction(&self) -> Vec3 {
        Vec3::from(self.direction)
    }
}

/// Matches `PointLight` in the light culling and mesh shaders.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct PointLight {
    pub position: [f32; 3],
    pub radius: f32,
    pub radiance: [f32; 3],
    pub intensity: f32,
}

impl PointLight {
    pub fn new(position: Vec3, radius: f32, radiance: Vec3, intensity: f32) -> Self {
        Self {
            position: position.to_array(),
            radius,
            radiance: radiance.to_array(),
            intensity,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SceneLights {
    pub directional: Option<DirectionalLight>,
    pub points: Vec<PointLight>,
}

/// A scene as seen by the renderer.
pub trait RenderScene: Send + Sync {
    fn name(&self) -> &str;

    fn static_meshes(&self) -> &[StaticMeshInstance];

    /// Colliders drawn by the physics outline overlay.
    fn physics_colliders(&self) -> &[StaticMeshInstance] {
        &[]
    }

    fn lights(&self) -> SceneLights;
}

/// Plain list-backed scene, for tools, tests and the viewer.
#[derive(Debug, Clone, Default)]
pub struct SceneSnapshot {
    name: String,
    meshes: Vec<StaticMeshInstance>,
    colliders: Vec<StaticMeshInstance>,
    lights: SceneLights,
}

impl SceneSnapshot {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            ..Default::default()
        }
    }

    pub fn add_static_mesh(&mut self, entity: EntityId, mesh: Arc<StaticMesh>, transform: Mat4) -> &mut StaticMeshInstance {
        self.meshes.push(StaticMeshInstance {
            entity,
            mesh,
            material_overrides: None,
            transform,
        });
        let last = self.meshes.len() - 1;
        &mut self.meshes[last]
    }

    pub fn add_physics_collider(&mut self, entity: EntityId, mesh: Arc<StaticMesh>, transform: Mat4) {
        self.colliders.push(StaticMeshInstance {
            entity,
            mesh,
            material_overrides: None,
            transform,
        });
    }

    pub fn set_directional_light(&mut self, light: DirectionalLight) {
        self.lights.directional = Some(light);
    }

    pub fn add_point_light(&mut self, light: PointLight) {
        self.lights.points.push(light);
    }
}

impl RenderScene for SceneSnapshot {
    fn name(&self) -> &str {
        &self.name
    }

    fn static_meshes(&self) -> &[StaticMeshInstance] {
        &self.meshes
    }

    fn physics_colliders(&self) -> &[StaticMeshInstance] {
        &self.colliders
    }

    fn lights(&self) -> SceneLights {
        self.lights.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn light_layouts_match_shader_structs() {
        assert_eq!(std::mem::size_of::<DirectionalLight>(), 32);
        assert_eq!(std::mem::size_of::<PointLight>(), 32);
        let light = DirectionalLight::new(Vec3::new(0.0, -2.0, 0.0), Vec3::ONE, 1.0);
        assert_eq!(light.direction(), Vec3::NEG_Y);
    }
}
