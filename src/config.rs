// src/config.rs
//! Renderer configuration, loaded from JSON with per-field defaults.

use crate::error::{Error, Result};
use crate::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Cascade matrices the mesh shaders declare room for.
pub const MAX_SHADOW_CASCADES: u32 = 4;
/// `local_size_x/y` of the bloom compute shader.
pub const BLOOM_LOCAL_SIZE: u32 = 4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadowConfig {
    pub enabled: bool,
    pub cascade_count: u32,
    /// Edge length of every cascade's depth map.
    pub map_size: u32,
    /// 0 = uniform splits, 1 = logarithmic splits.
    pub split_lambda: f32,
    pub far_plane_offset: f32,
    pub near_plane_offset: f32,
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cascade_count: 4,
            map_size: 4096,
            split_lambda: 0.92,
            far_plane_offset: 100.0,
            near_plane_offset: -150.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LightCullingConfig {
    pub tile_size: u32,
    pub max_point_lights: u32,
}

impl Default for LightCullingConfig {
    fn default() -> Self {
        Self {
            tile_size: 16,
            max_point_lights: 512,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BloomConfig {
    pub enabled: bool,
    pub work_group_size: u32,
    pub threshold: f32,
    pub knee: f32,
    pub dirt_intensity: f32,
}

impl Default for BloomConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            work_group_size: 4,
            threshold: 1.0,
            knee: 0.1,
            dirt_intensity: 20.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// `false` runs every queued render closure synchronously on the caller.
    pub render_thread_enabled: bool,
    pub shader_directory: PathBuf,
    pub shader_cache_directory: Option<PathBuf>,
    pub hot_reload: bool,
    pub shadows: ShadowConfig,
    pub light_culling: LightCullingConfig,
    pub bloom: BloomConfig,
    pub physics_outline: bool,
    /// Blit the composite straight to the swapchain (bundled builds without an editor).
    pub swapchain_target: bool,
    pub grid: bool,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            render_thread_enabled: true,
            shader_directory: PathBuf::from("assets/shaders"),
            shader_cache_directory: Some(PathBuf::from("cache/shaders")),
            hot_reload: true,
            shadows: ShadowConfig::default(),
            light_culling: LightCullingConfig::default(),
            bloom: BloomConfig::default(),
            physics_outline: true,
            swapchain_target: false,
            grid: true,
        }
    }
}

impl RendererConfig {
    /// Load and validate a JSON config. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading renderer config {}", path.display()))?;
        let config = Self::from_json(&text)?;
        log::info!("Loaded renderer config from {}", path.display());
        Ok(config)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.shadows.cascade_count == 0 || self.shadows.cascade_count > MAX_SHADOW_CASCADES {
            return Err(Error::Config(format!(
                "shadows.cascade_count must be in 1..={MAX_SHADOW_CASCADES}, got {}",
                self.shadows.cascade_count
            )));
        }
        if !(0.0..=1.0).contains(&self.shadows.split_lambda) {
            return Err(Error::Config(format!(
                "shadows.split_lambda {} is outside [0, 1]",
                self.shadows.split_lambda
            )));
        }
        crate::ensure!(
            self.light_culling.tile_size != 0,
            Error::Config("light_culling.tile_size must be non-zero".into())
        );
        if self.bloom.work_group_size != BLOOM_LOCAL_SIZE {
            return Err(Error::Config(format!(
                "bloom.work_group_size {} does not match the bloom shader's local size {BLOOM_LOCAL_SIZE}",
                self.bloom.work_group_size
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config = RendererConfig::from_json(
            r#"{ "render_thread_enabled": false, "shadows": { "cascade_count": 2 } }"#,
        )
        .unwrap();
        assert!(!config.render_thread_enabled);
        assert_eq!(config.shadows.cascade_count, 2);
        assert_eq!(config.shadows.split_lambda, 0.92);
        assert_eq!(config.light_culling.tile_size, 16);
        assert_eq!(config.bloom.work_group_size, 4);
    }

    #[test]
    fn rejects_zero_cascades() {
        let err = RendererConfig::from_json(r#"{ "shadows": { "cascade_count": 0 } }"#).unwrap_err();
        assert_eq!(err.code(), "E_CONFIG");
    }

    #[test]
    fn rejects_more_cascades_than_shaders_hold() {
        let err = RendererConfig::from_json(r#"{ "shadows": { "cascade_count": 5 } }"#).unwrap_err();
        assert_eq!(err.code(), "E_CONFIG");
        let err = RendererConfig::from_json(r#"{ "bloom": { "work_group_size": 8 } }"#).unwrap_err();
        assert!(err.to_string().contains("work_group_size"));
    }

    #[test]
    fn rejects_lambda_out_of_range() {
        let err = RendererConfig::from_json(r#"{ "shadows": { "split_lambda": 1.5 } }"#).unwrap_err();
        assert!(err.to_string().contains("split_lambda"));
    }

    #[test]
    fn load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("renderer.json");
        std::fs::write(&path, r#"{ "grid": false }"#).unwrap();
        let config = RendererConfig::load(&path).unwrap();
        assert!(!config.grid);
        assert!(config.physics_outline);
    }
}
