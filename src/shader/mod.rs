// src/shader/mod.rs
//! Shader assets: `#type`-sectioned GLSL files compiled per stage, reflected, and turned into
//! a [`DescriptorSetLayer`].
//!
//! A [`Shader`] is built once at load time (or from the on-disk cache) and rebuilt wholesale by
//! [`Shader::try_recompile`]. A failed recompile leaves every piece of the previous state in place.
//! [`ShaderLibrary`] owns shaders by name and hands them out as [`SharedShader`].

pub mod cache;
pub mod compiler;
pub mod hot_reload;
pub mod reflect;
pub mod spirv;
pub mod uniform;

pub use reflect::{reflect_stages, ShaderReflection, ShaderReflector};
pub use uniform::{ShaderDataType, ShaderUniform, UniformStorage, UniformValue};

use crate::context::{Context, OptionContext};
use crate::descriptor::DescriptorSetLayer;
use crate::error::{Error, Result};
use crate::gpu::GpuContext;
use cache::{CachedShader, ShaderCache};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use xxhash_rust::xxh3::xxh3_64;

/// Marker that opens a stage section in a shader file.
pub const TYPE_TOKEN: &str = "#type";

/// File extension the library scans for in bundle loads.
pub const SHADER_EXTENSION: &str = "glsl";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
    Geometry,
    /// Visible to every stage; produced when two stages share a resource.
    All,
}

impl ShaderStage {
    /// Parse a `#type` token. Returns `None` for anything unrecognised.
    pub fn from_type_str(token: &str) -> Option<Self> {
        match token {
            "vertex" => Some(ShaderStage::Vertex),
            "fragment" | "pixel" => Some(ShaderStage::Fragment),
            "compute" => Some(ShaderStage::Compute),
            "geometry" => Some(ShaderStage::Geometry),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Fragment => "fragment",
            ShaderStage::Compute => "compute",
            ShaderStage::Geometry => "geometry",
            ShaderStage::All => "all",
        }
    }

    pub fn from_execution_model(model: u32) -> Option<Self> {
        use spirv::execution_model as em;
        match model {
            em::VERTEX => Some(ShaderStage::Vertex),
            em::FRAGMENT => Some(ShaderStage::Fragment),
            em::GL_COMPUTE => Some(ShaderStage::Compute),
            em::GEOMETRY => Some(ShaderStage::Geometry),
            _ => None,
        }
    }

    /// Stage flag for a resource seen in both `self` and `other`.
    #[inline]
    pub fn merge(self, other: ShaderStage) -> ShaderStage {
        if self == other {
            self
        } else {
            ShaderStage::All
        }
    }
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of one section: its stage plus how many sections of that stage came before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ShaderSourceKey {
    pub stage: ShaderStage,
    pub index: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderSource {
    pub key: ShaderSourceKey,
    pub code: String,
}

/// Split a shader file into its `#type` sections, in the order they appear.
///
/// Text before the first marker is ignored. Unknown stage names are compile failures.
pub fn parse_sections(text: &str) -> Result<Vec<ShaderSource>> {
    let mut sections: Vec<ShaderSource> = Vec::new();
    let mut counters: HashMap<ShaderStage, u32> = HashMap::new();

    for line in text.lines() {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if let Some(rest) = line.trim_start().strip_prefix(TYPE_TOKEN) {
            let token = rest.trim();
            let stage = ShaderStage::from_type_str(token).ok_or_else(|| Error::ShaderCompile {
                stage: token.to_owned(),
                message: format!("unknown shader stage '{token}' after {TYPE_TOKEN}"),
            })?;
            let counter = counters.entry(stage).or_insert(0);
            sections.push(ShaderSource {
                key: ShaderSourceKey {
                    stage,
                    index: *counter,
                },
                code: String::new(),
            });
            *counter += 1;
            continue;
        }
        if let Some(section) = sections.last_mut() {
            section.code.push_str(line);
            section.code.push('\n');
        }
    }

    if sections.is_empty() {
        return Err(Error::ShaderCompile {
            stage: "none".into(),
            message: format!("no {TYPE_TOKEN} sections found"),
        });
    }
    Ok(sections)
}

/// 64-bit identity of a shader file, derived from its path.
pub fn path_hash(path: &Path) -> u64 {
    xxh3_64(path.to_string_lossy().as_bytes())
}

/// Everything a successful compile produces. Swapped into a [`Shader`] as a unit.
struct Compiled {
    sources: Vec<ShaderSource>,
    source_hash: u64,
    spirv: Vec<(ShaderSourceKey, Vec<u32>)>,
    reflection: ShaderReflection,
    layer: DescriptorSetLayer,
}

pub struct Shader {
    name: String,
    filepath: Option<PathBuf>,
    hash: u64,
    sources: Vec<ShaderSource>,
    source_hash: u64,
    spirv: Vec<(ShaderSourceKey, Vec<u32>)>,
    reflection: ShaderReflection,
    layer: DescriptorSetLayer,
    generation: u64,
    gpu: Option<GpuContext>,
    cache: Option<ShaderCache>,
}

impl fmt::Debug for Shader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shader")
            .field("name", &self.name)
            .field("filepath", &self.filepath)
            .field("hash", &format_args!("{:016x}", self.hash))
            .field("stages", &self.spirv.iter().map(|(k, _)| k.stage).collect::<Vec<_>>())
            .field("generation", &self.generation)
            .finish()
    }
}

impl Shader {
    /// Load a shader file. The name is the file stem.
    pub fn load(path: impl AsRef<Path>, gpu: Option<&GpuContext>, cache: Option<ShaderCache>) -> Result<Self> {
        let path = path.as_ref();
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .with_context(|| format!("shader path {} has no file name", path.display()))?;
        Self::load_named(&name, path, gpu, cache)
    }

    pub fn load_named(
        name: &str,
        path: impl AsRef<Path>,
        gpu: Option<&GpuContext>,
        cache: Option<ShaderCache>,
    ) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read shader {}", path.display()))?;
        let hash = path_hash(path);
        let compiled = Self::build(name, &text, hash, gpu, cache.as_ref())?;
        log::info!("Loaded shader '{name}' from {}", path.display());
        Ok(Self::from_compiled(name, Some(path.to_path_buf()), hash, compiled, gpu, cache))
    }

    /// Build a shader from in-memory text, never touching the cache.
    pub fn from_source(name: &str, text: &str, gpu: Option<&GpuContext>) -> Result<Self> {
        let hash = xxh3_64(name.as_bytes());
        let compiled = Self::build(name, text, hash, gpu, None)?;
        Ok(Self::from_compiled(name, None, hash, compiled, gpu, None))
    }

    fn from_compiled(
        name: &str,
        filepath: Option<PathBuf>,
        hash: u64,
        compiled: Compiled,
        gpu: Option<&GpuContext>,
        cache: Option<ShaderCache>,
    ) -> Self {
        Self {
            name: name.to_owned(),
            filepath,
            hash,
            sources: compiled.sources,
            source_hash: compiled.source_hash,
            spirv: compiled.spirv,
            reflection: compiled.reflection,
            layer: compiled.layer,
            generation: 0,
            gpu: gpu.cloned(),
            cache,
        }
    }

    /// Parse, compile (or fetch from cache), reflect and create descriptors. Touches no `self` state.
    fn build(
        name: &str,
        text: &str,
        hash: u64,
        gpu: Option<&GpuContext>,
        cache: Option<&ShaderCache>,
    ) -> Result<Compiled> {
        let sources = parse_sections(text)?;
        let source_hash = xxh3_64(text.as_bytes());

        let cached = cache.and_then(|cache| match cache.load(hash, source_hash) {
            Ok(hit) => hit,
            Err(err) => {
                log::warn!("Ignoring shader cache for '{name}': {err}");
                None
            }
        });

        let (spirv, reflection) = match cached {
            Some(hit) => {
                log::debug!("Shader cache hit for '{name}'");
                (hit.spirv, hit.reflection)
            }
            None => {
                let start = std::time::Instant::now();
                let mut spirv = Vec::with_capacity(sources.len());
                for source in &sources {
                    let words = compiler::compile_glsl(source.key.stage, &source.code, name)
                        .with_context(|| format!("shader '{name}'"))?;
                    spirv.push((source.key, words));
                }
                let reflection = reflect_stages(spirv.iter().map(|(key, words)| (key.stage, &words[..])))
                    .with_context(|| format!("shader '{name}'"))?;
                log::debug!("Compiled '{name}' in {:?}", start.elapsed());

                if let Some(cache) = cache {
                    let entry = CachedShader {
                        source_hash,
                        spirv: spirv.clone(),
                        reflection: reflection.clone(),
                    };
                    if let Err(err) = cache.store(hash, &entry) {
                        log::warn!("Could not write shader cache for '{name}': {err}");
                    }
                }
                (spirv, reflection)
            }
        };

        let layer = DescriptorSetLayer::create(name, &reflection, gpu)?;
        Ok(Compiled {
            sources,
            source_hash,
            spirv,
            reflection,
            layer,
        })
    }

    /// Re-read the file and rebuild everything. On failure the previous state stays active.
    pub fn try_recompile(&mut self) -> Result<()> {
        let path = self
            .filepath
            .clone()
            .with_context(|| format!("shader '{}' was not loaded from a file", self.name))?;
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read shader {}", path.display()))?;
        self.recompile_from(&text)
    }

    /// Rebuild from new source text. On failure the previous state stays active.
    pub fn recompile_from(&mut self, text: &str) -> Result<()> {
        let compiled = match Self::build(&self.name, text, self.hash, self.gpu.as_ref(), self.cache.as_ref()) {
            Ok(compiled) => compiled,
            Err(err) => {
                log::error!("Shader hot reload of '{}' failed, keeping previous version: {err}", self.name);
                return Err(err);
            }
        };
        self.sources = compiled.sources;
        self.source_hash = compiled.source_hash;
        self.spirv = compiled.spirv;
        self.reflection = compiled.reflection;
        self.layer = compiled.layer;
        self.generation += 1;
        log::info!("Recompiled shader '{}' (generation {})", self.name, self.generation);
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn filepath(&self) -> Option<&Path> {
        self.filepath.as_deref()
    }

    pub fn hash(&self) -> u64 {
        self.hash
    }

    pub fn source_hash(&self) -> u64 {
        self.source_hash
    }

    /// Bumped on every successful recompile.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn sources(&self) -> &[ShaderSource] {
        &self.sources
    }

    pub fn spirv(&self) -> &[(ShaderSourceKey, Vec<u32>)] {
        &self.spirv
    }

    pub fn stage_spirv(&self, stage: ShaderStage, index: u32) -> Option<&[u32]> {
        let key = ShaderSourceKey { stage, index };
        self.spirv.iter().find(|(k, _)| *k == key).map(|(_, words)| words.as_slice())
    }

    pub fn has_stage(&self, stage: ShaderStage) -> bool {
        self.spirv.iter().any(|(k, _)| k.stage == stage)
    }

    pub fn reflection(&self) -> &ShaderReflection {
        &self.reflection
    }

    pub fn layer(&self) -> &DescriptorSetLayer {
        &self.layer
    }

    pub fn layer_mut(&mut self) -> &mut DescriptorSetLayer {
        &mut self.layer
    }

    /// GPU module for the first section of `stage`.
    pub fn module(&self, gpu: &GpuContext, stage: ShaderStage) -> Result<wgpu::ShaderModule> {
        let words = self
            .stage_spirv(stage, 0)
            .with_context(|| format!("shader '{}' has no {stage} stage", self.name))?;
        Ok(gpu.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(&format!("{} {stage}", self.name)),
            source: wgpu::ShaderSource::SpirV(Cow::Borrowed(words)),
        }))
    }
}

pub type SharedShader = Arc<RwLock<Shader>>;

/// One file that failed during a bundle load.
#[derive(Debug, Clone)]
pub struct BundleFailure {
    pub path: PathBuf,
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct BundleReport {
    pub loaded: Vec<String>,
    pub failed: Vec<BundleFailure>,
}

impl BundleReport {
    pub fn is_ok(&self) -> bool {
        self.failed.is_empty()
    }

    /// One line per failure, error code first, for the user-facing dialog.
    pub fn summary(&self) -> String {
        self.failed
            .iter()
            .map(|f| format!("{}: {}: {}", f.code, f.path.display(), f.message))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Name-keyed shader registry.
#[derive(Default)]
pub struct ShaderLibrary {
    shaders: HashMap<String, SharedShader>,
    gpu: Option<GpuContext>,
    cache: Option<ShaderCache>,
}

impl ShaderLibrary {
    pub fn new(gpu: Option<GpuContext>, cache_directory: Option<PathBuf>) -> Self {
        Self {
            shaders: HashMap::new(),
            gpu,
            cache: cache_directory.map(ShaderCache::new),
        }
    }

    /// Register `shader`. An existing entry of the same name is only replaced with `override_existing`.
    pub fn add(&mut self, shader: Shader, override_existing: bool) -> SharedShader {
        let name = shader.name().to_owned();
        if let Some(existing) = self.shaders.get(&name) {
            if !override_existing {
                log::debug!("Shader '{name}' already registered, keeping the existing one");
                return Arc::clone(existing);
            }
            log::warn!("Shader '{name}' already exists, overriding");
        }
        let shared = Arc::new(RwLock::new(shader));
        self.shaders.insert(name, Arc::clone(&shared));
        shared
    }

    /// Load a file under its stem name. Already-registered names are returned as-is.
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<SharedShader> {
        let path = path.as_ref();
        if let Some(stem) = path.file_stem().map(|s| s.to_string_lossy()) {
            if let Some(existing) = self.shaders.get(stem.as_ref()) {
                return Ok(Arc::clone(existing));
            }
        }
        let shader = Shader::load(path, self.gpu.as_ref(), self.cache.clone())?;
        Ok(self.add(shader, false))
    }

    pub fn find(&self, name: &str) -> Result<SharedShader> {
        self.shaders
            .get(name)
            .cloned()
            .ok_or_else(|| Error::unknown_resource(name))
    }

    pub fn find_or_load(&mut self, name: &str, path: impl AsRef<Path>) -> Result<SharedShader> {
        if let Some(existing) = self.shaders.get(name) {
            return Ok(Arc::clone(existing));
        }
        let shader = Shader::load_named(name, path, self.gpu.as_ref(), self.cache.clone())?;
        Ok(self.add(shader, false))
    }

    /// Shader loaded from `path`, if any.
    pub fn find_by_path(&self, path: &Path) -> Option<SharedShader> {
        let hash = path_hash(path);
        self.shaders
            .values()
            .find(|s| s.read().hash() == hash)
            .cloned()
    }

    pub fn remove(&mut self, name: &str) -> Option<SharedShader> {
        self.shaders.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.shaders.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.shaders.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.shaders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shaders.is_empty()
    }

    /// Load every shader file in `dir`. Individual failures are collected, not propagated.
    pub fn load_directory(&mut self, dir: impl AsRef<Path>) -> Result<BundleReport> {
        let dir = dir.as_ref();
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
            .with_context(|| format!("failed to read shader directory {}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == SHADER_EXTENSION))
            .collect();
        paths.sort();

        let mut report = BundleReport::default();
        for path in paths {
            match self.load(&path) {
                Ok(shader) => report.loaded.push(shader.read().name().to_owned()),
                Err(err) => {
                    log::error!("Failed to load shader {}: {err}", path.display());
                    report.failed.push(BundleFailure {
                        path,
                        code: err.code(),
                        message: err.to_string(),
                    });
                }
            }
        }
        log::info!(
            "Loaded {} shaders from {} ({} failed)",
            report.loaded.len(),
            dir.display(),
            report.failed.len()
        );
        Ok(report)
    }

    pub fn clear(&mut self) {
        self.shaders.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const TEXTURED: &str = "#type vertex\r\n#version 450\r\nlayout(set = 0, binding = 0) uniform Camera {\r\n    mat4 viewProj;\r\n};\r\nlayout(location = 0) in vec3 a_Position;\r\nvoid main() {\r\n    gl_Position = viewProj * vec4(a_Position, 1.0);\r\n}\r\n#type fragment\r\n#version 450\r\nlayout(set = 0, binding = 1) uniform texture2D u_Albedo;\r\nlayout(set = 0, binding = 2) uniform sampler u_AlbedoSampler;\r\nlayout(location = 0) out vec4 o_Color;\r\nvoid main() {\r\n    o_Color = texture(sampler2D(u_Albedo, u_AlbedoSampler), vec2(0.5));\r\n}\r\n";

    #[test]
    fn sections_split_on_type_markers() {
        let sections = parse_sections(TEXTURED).unwrap();
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].key, ShaderSourceKey { stage: ShaderStage::Vertex, index: 0 });
        assert_eq!(sections[1].key.stage, ShaderStage::Fragment);
        assert!(sections[0].code.starts_with("#version 450\n"));
        assert!(!sections[0].code.contains('\r'));
        assert!(!sections[0].code.contains("#type"));
    }

    #[test]
    fn stage_indices_count_per_stage() {
        let text = "#type compute\nA\n#type vertex\nB\n#type compute\nC\n";
        let keys: Vec<_> = parse_sections(text).unwrap().into_iter().map(|s| s.key).collect();
        assert_eq!(
            keys,
            vec![
                ShaderSourceKey { stage: ShaderStage::Compute, index: 0 },
                ShaderSourceKey { stage: ShaderStage::Vertex, index: 0 },
                ShaderSourceKey { stage: ShaderStage::Compute, index: 1 },
            ]
        );
    }

    #[test]
    fn unknown_stage_and_empty_files_fail() {
        assert!(parse_sections("#type tessellation\nvoid main() {}").unwrap_err().is_compile());
        assert!(parse_sections("void main() {}").unwrap_err().is_compile());
    }

    #[test]
    fn stage_merge_promotes_to_all() {
        assert_eq!(ShaderStage::Vertex.merge(ShaderStage::Vertex), ShaderStage::Vertex);
        assert_eq!(ShaderStage::Vertex.merge(ShaderStage::Fragment), ShaderStage::All);
        assert_eq!(ShaderStage::from_type_str("pixel"), Some(ShaderStage::Fragment));
        assert_eq!(ShaderStage::Compute.to_string(), "compute");
    }

    #[test]
    fn from_source_reflects_both_stages() {
        let shader = Shader::from_source("Textured", TEXTURED, None).unwrap();
        let reflection = shader.reflection();
        assert_eq!(reflection.sets.len(), 1);
        let set = &reflection.sets[&0];
        assert_eq!(set.uniform_buffers.len(), 1);
        assert_eq!(set.sampled_images.len(), 1);
        assert_eq!(set.uniform_buffers[&0].stage, ShaderStage::Vertex);
        assert_eq!(set.sampled_images[0].stage, ShaderStage::Fragment);
        assert!(shader.has_stage(ShaderStage::Fragment));
        assert!(!shader.has_stage(ShaderStage::Compute));
    }

    #[test]
    fn failed_recompile_keeps_previous_state() {
        let mut shader = Shader::from_source("Textured", TEXTURED, None).unwrap();
        let before = shader.reflection().clone();
        let err = shader.recompile_from("#type vertex\n#version 450\nvoid main( {\n").unwrap_err();
        assert!(err.is_compile());
        assert_eq!(shader.reflection(), &before);
        assert_eq!(shader.generation(), 0);
        assert_eq!(shader.sources().len(), 2);
    }

    #[test]
    fn library_load_find_remove() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("Textured.glsl");
        std::fs::File::create(&good).unwrap().write_all(TEXTURED.as_bytes()).unwrap();
        let bad = dir.path().join("Broken.glsl");
        std::fs::write(&bad, "#type fragment\n#version 450\nvoid main( {\n").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let mut library = ShaderLibrary::new(None, None);
        let report = library.load_directory(dir.path()).unwrap();
        assert_eq!(report.loaded, vec!["Textured".to_owned()]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].code, "E_SHADER_COMPILE");
        assert!(report.summary().starts_with("E_SHADER_COMPILE"));

        let shader = library.find("Textured").unwrap();
        assert!(Arc::ptr_eq(&shader, &library.find_by_path(&good).unwrap()));
        assert!(Arc::ptr_eq(&shader, &library.find_or_load("Textured", &bad).unwrap()));
        assert!(library.find("Broken").unwrap_err().is_unknown_resource());

        assert!(library.remove("Textured").is_some());
        assert!(library.is_empty());
    }

    #[test]
    fn bundled_shaders_compile_and_reflect() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("assets/shaders");
        let mut library = ShaderLibrary::new(None, None);
        let report = library.load_directory(&dir).unwrap();
        assert!(report.is_ok(), "{}", report.summary());
        assert_eq!(report.loaded.len(), 10);

        let mesh = library.find("StaticMesh").unwrap();
        let mesh = mesh.read();
        let reflection = mesh.reflection();
        for block in ["Camera", "Scene", "ShadowData", "PointLights", "VisibleLightIndices"] {
            assert!(reflection.find_resource(block).is_some(), "StaticMesh lacks {block}");
        }
        assert!(reflection.find_uniform("u_Material.AlbedoColor").is_some());
        assert!(reflection.find_uniform("Camera.ViewProjection").is_some());
        let set = &reflection.sets[&0];
        let shadow = set.samplers.iter().find(|s| s.name == "u_ShadowSampler").unwrap();
        assert!(shadow.comparison);

        let culling = library.find("LightCulling").unwrap();
        let culling = culling.read();
        let depth = culling.reflection().sets[&0]
            .sampled_images
            .iter()
            .find(|i| i.name == "u_PreDepth")
            .unwrap();
        assert!(!depth.filterable);
        assert!(culling.reflection().find_resource("Culling").is_some());
    }
}
