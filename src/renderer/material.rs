// src/renderer/material.rs
//! Materials and material registries.
//!
//! A [`Material`] pairs a shader with values for its reflected uniforms and images for the
//! sampled-image slots of the material set. Per-draw parameters live in the shader's
//! push-constant block; textures live in descriptor set [`MATERIAL_SET`].
//!
//! A [`MaterialRegistry`] is the list of materials a mesh (or an entity overriding the mesh)
//! draws its submeshes with. Registries are compared by identity when batching draws.

use crate::descriptor::{DescriptorResource, DescriptorSet, DescriptorSetLayer};
use crate::error::{Error, Result};
use crate::gpu::Image2D;
use crate::shader::reflect::ResourceKind;
use crate::shader::{SharedShader, UniformStorage, UniformValue};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Descriptor set index holding per-material textures.
pub const MATERIAL_SET: u32 = 1;

static NEXT_MATERIAL_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_REGISTRY_ID: AtomicU64 = AtomicU64::new(1);

pub type SharedMaterial = Arc<RwLock<Material>>;

pub struct Material {
    id: u64,
    name: String,
    shader: SharedShader,
    shader_generation: u64,
    uniforms: UniformStorage,
    textures: BTreeMap<String, Arc<Image2D>>,
    /// Bumped whenever the bound textures change.
    revision: u64,
}

impl std::fmt::Debug for Material {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Material")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("textures", &self.textures.keys().collect::<Vec<_>>())
            .field("revision", &self.revision)
            .finish()
    }
}

impl Material {
    pub fn new(name: &str, shader: SharedShader) -> Self {
        let (uniforms, shader_generation) = {
            let shader = shader.read();
            (UniformStorage::new(shader.reflection()), shader.generation())
        };
        Self {
            id: NEXT_MATERIAL_ID.fetch_add(1, Ordering::Relaxed),
            name: name.to_owned(),
            shader,
            shader_generation,
            uniforms,
            textures: BTreeMap::new(),
            revision: 0,
        }
    }

    pub fn into_shared(self) -> SharedMaterial {
        Arc::new(RwLock::new(self))
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shader(&self) -> &SharedShader {
        &self.shader
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn uniforms(&self) -> &UniformStorage {
        &self.uniforms
    }

    pub fn set(&mut self, name: &str, value: impl Into<UniformValue>) -> Result<()> {
        self.uniforms.set(name, value)
    }

    pub fn get(&self, name: &str) -> Result<UniformValue> {
        self.uniforms.get(name)
    }

    pub fn get_as<T>(&self, name: &str) -> Result<T>
    where
        T: TryFrom<UniformValue, Error = Error>,
    {
        self.uniforms.get_as(name)
    }

    /// Names of the sampled images the shader declares in the material set.
    pub fn texture_slots(&self) -> Vec<String> {
        let shader = self.shader.read();
        shader
            .reflection()
            .sets
            .get(&MATERIAL_SET)
            .map(|set| set.sampled_images.iter().map(|image| image.name.clone()).collect())
            .unwrap_or_default()
    }

    /// `Ok` when `name` is a sampled image of the material set.
    pub fn check_texture_slot(&self, name: &str) -> Result<()> {
        let shader = self.shader.read();
        let resource = shader
            .reflection()
            .find_resource(name)
            .ok_or_else(|| Error::unknown_resource(name))?;
        if resource.kind != ResourceKind::SampledImage || resource.set != MATERIAL_SET {
            return Err(Error::Reflection(format!(
                "'{name}' is a {:?} in set {}, not a material texture",
                resource.kind, resource.set
            )));
        }
        Ok(())
    }

    pub fn set_texture(&mut self, name: &str, image: Arc<Image2D>) -> Result<()> {
        self.check_texture_slot(name)?;
        self.textures.insert(name.to_owned(), image);
        self.revision += 1;
        Ok(())
    }

    pub fn texture(&self, name: &str) -> Option<&Arc<Image2D>> {
        self.textures.get(name)
    }

    /// Bytes of the first push-constant block, pushed once per draw.
    pub fn push_constants(&self) -> Option<&[u8]> {
        self.uniforms.push_constant_bytes(0)
    }

    pub fn take_dirty(&mut self) -> bool {
        self.uniforms.take_dirty()
    }

    pub fn is_stale(&self) -> bool {
        self.shader.read().generation() != self.shader_generation
    }

    /// Follow a shader reload: rebuild the uniform storage from the new reflection,
    /// keeping every value whose name and type survived, and drop textures for removed slots.
    /// Returns whether anything was rebuilt.
    pub fn rebuild(&mut self) -> bool {
        if !self.is_stale() {
            return false;
        }
        let (mut uniforms, generation) = {
            let shader = self.shader.read();
            (UniformStorage::new(shader.reflection()), shader.generation())
        };
        for uniform in self.uniforms.uniforms() {
            if let Ok(value) = self.uniforms.get(&uniform.name) {
                if uniforms.set(&uniform.name, value).is_err() {
                    log::debug!("Material '{}': '{}' reset after reload", self.name, uniform.name);
                }
            }
        }
        let slots = self.texture_slots();
        self.textures.retain(|name, _| slots.contains(name));
        self.uniforms = uniforms;
        self.shader_generation = generation;
        self.revision += 1;
        true
    }

    /// Fill `set` (the material set) from this material, using `fallback` for empty slots.
    pub fn write_descriptors(
        &self,
        layer: &DescriptorSetLayer,
        set: &mut DescriptorSet,
        fallback: &Arc<Image2D>,
        sampler: &Arc<wgpu::Sampler>,
    ) -> Result<()> {
        let Some(desc) = layer.set_layout(set.set()) else {
            return Ok(());
        };
        for binding in &desc.bindings {
            match binding.kind {
                ResourceKind::SampledImage => {
                    let image = self.textures.get(&binding.name).unwrap_or(fallback);
                    set.write_binding(binding.entry.binding, DescriptorResource::Image(Arc::clone(image)));
                }
                ResourceKind::Sampler => {
                    set.write_binding(binding.entry.binding, DescriptorResource::Sampler(Arc::clone(sampler)));
                }
                _ => {}
            }
        }
        set.write_all_uniform_buffers(layer)
    }
}

#[derive(Debug, Clone, Default)]
pub struct MaterialSlot {
    pub material: Option<SharedMaterial>,
    /// An override registry only wins when at least one of its slots is active.
    pub overridden: bool,
}

/// Materials indexed by submesh material index.
#[derive(Debug)]
pub struct MaterialRegistry {
    id: u64,
    slots: RwLock<Vec<MaterialSlot>>,
}

impl MaterialRegistry {
    pub fn new(slot_count: usize) -> Self {
        Self {
            id: NEXT_REGISTRY_ID.fetch_add(1, Ordering::Relaxed),
            slots: RwLock::new(vec![MaterialSlot::default(); slot_count]),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }

    fn slot_mut(slots: &mut Vec<MaterialSlot>, index: usize) -> &mut MaterialSlot {
        if index >= slots.len() {
            slots.resize(index + 1, MaterialSlot::default());
        }
        &mut slots[index]
    }

    pub fn set_material(&self, index: usize, material: SharedMaterial) {
        let mut slots = self.slots.write();
        Self::slot_mut(&mut slots, index).material = Some(material);
    }

    /// Set `material` for `index` and mark the slot as an active override.
    pub fn set_override(&self, index: usize, material: SharedMaterial) {
        let mut slots = self.slots.write();
        let slot = Self::slot_mut(&mut slots, index);
        slot.material = Some(material);
        slot.overridden = true;
    }

    pub fn clear_override(&self, index: usize) {
        if let Some(slot) = self.slots.write().get_mut(index) {
            slot.overridden = false;
        }
    }

    pub fn material(&self, index: usize) -> Option<SharedMaterial> {
        self.slots.read().get(index).and_then(|slot| slot.material.clone())
    }

    pub fn has_any_override(&self) -> bool {
        self.slots.read().iter().any(|slot| slot.overridden)
    }

    /// Every material, for reload bookkeeping.
    pub fn materials(&self) -> Vec<SharedMaterial> {
        self.slots.read().iter().filter_map(|slot| slot.material.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader::Shader;
    use glam::Vec4;

    const LIT: &str = "#type vertex\n#version 450\nlayout(location = 0) in vec3 a_Position;\nvoid main() {\n    gl_Position = vec4(a_Position, 1.0);\n}\n#type fragment\n#version 450\nlayout(push_constant) uniform Material {\n    vec4 AlbedoColor;\n    float Roughness;\n} u_Material;\nlayout(set = 1, binding = 0) uniform texture2D u_AlbedoTexture;\nlayout(set = 1, binding = 1) uniform sampler u_MaterialSampler;\nlayout(location = 0) out vec4 o_Color;\nvoid main() {\n    o_Color = texture(sampler2D(u_AlbedoTexture, u_MaterialSampler), vec2(0.5)) * u_Material.AlbedoColor * u_Material.Roughness;\n}\n";

    fn shader(text: &str) -> SharedShader {
        Arc::new(RwLock::new(Shader::from_source("Lit", text, None).unwrap()))
    }

    #[test]
    fn typed_values_round_through_push_constants() {
        let mut material = Material::new("Red", shader(LIT));
        material.set("u_Material.AlbedoColor", Vec4::new(1.0, 0.0, 0.0, 1.0)).unwrap();
        material.set("u_Material.Roughness", 0.5f32).unwrap();
        assert_eq!(material.get_as::<Vec4>("u_Material.AlbedoColor").unwrap(), Vec4::new(1.0, 0.0, 0.0, 1.0));
        assert_eq!(material.get_as::<f32>("u_Material.Roughness").unwrap(), 0.5);
        assert_eq!(&material.push_constants().unwrap()[16..20], &0.5f32.to_le_bytes());

        let err = material.set("u_Material.Roughness", 1i32).unwrap_err();
        assert_eq!(err.code(), "E_UNIFORM_TYPE");
        assert!(material.set("u_Material.Metalness", 1.0f32).unwrap_err().is_unknown_resource());
    }

    #[test]
    fn texture_slots_come_from_the_material_set() {
        let material = Material::new("Red", shader(LIT));
        assert_eq!(material.texture_slots(), vec!["u_AlbedoTexture".to_owned()]);
        material.check_texture_slot("u_AlbedoTexture").unwrap();
        assert!(material.check_texture_slot("u_NormalTexture").unwrap_err().is_unknown_resource());
        assert_eq!(material.check_texture_slot("u_MaterialSampler").unwrap_err().code(), "E_REFLECTION");
    }

    #[test]
    fn reload_keeps_values_that_still_fit() {
        let shared = shader(LIT);
        let mut material = Material::new("Red", Arc::clone(&shared));
        material.set("u_Material.AlbedoColor", Vec4::splat(0.25)).unwrap();
        material.set("u_Material.Roughness", 0.75f32).unwrap();
        assert!(!material.rebuild());

        let changed = LIT.replace("float Roughness;", "int Roughness;").replace(
            "* u_Material.Roughness",
            "* float(u_Material.Roughness)",
        );
        shared.write().recompile_from(&changed).unwrap();
        assert!(material.is_stale());
        assert!(material.rebuild());
        assert_eq!(material.get_as::<Vec4>("u_Material.AlbedoColor").unwrap(), Vec4::splat(0.25));
        assert_eq!(material.get_as::<i32>("u_Material.Roughness").unwrap(), 0);
        assert!(!material.is_stale());
    }

    #[test]
    fn registry_overrides() {
        let registry = MaterialRegistry::new(2);
        let other = MaterialRegistry::new(2);
        assert_ne!(registry.id(), other.id());
        assert!(registry.material(0).is_none());

        let red = Material::new("Red", shader(LIT)).into_shared();
        registry.set_material(0, Arc::clone(&red));
        assert!(!registry.has_any_override());
        registry.set_override(3, red);
        assert_eq!(registry.len(), 4);
        assert!(registry.has_any_override());
        registry.clear_override(3);
        assert!(!registry.has_any_override());
        assert_eq!(registry.materials().len(), 2);
    }
}
