// src/shader/cache.rs
//! On-disk cache of compiled shaders: SPIR-V per stage plus the merged reflection.
//!
//! One bincode blob per shader at `<dir>/<path hash>.shadercache`. A blob is only used when
//! its magic, format version and source-text hash all match.

use super::reflect::ShaderReflection;
use super::ShaderSourceKey;
use crate::context::Context;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const CACHE_MAGIC: u32 = u32::from_le_bytes(*b"SLSC");
const CACHE_VERSION: u32 = 2;
const CACHE_EXTENSION: &str = "shadercache";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedShader {
    /// xxh3 of the full shader file text the entry was compiled from.
    pub source_hash: u64,
    pub spirv: Vec<(ShaderSourceKey, Vec<u32>)>,
    pub reflection: ShaderReflection,
}

#[derive(Serialize, Deserialize)]
struct CacheBlob {
    magic: u32,
    version: u32,
    shader: CachedShader,
}

#[derive(Debug, Clone)]
pub struct ShaderCache {
    dir: PathBuf,
}

impl ShaderCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn entry_path(&self, hash: u64) -> PathBuf {
        self.dir.join(format!("{hash:016x}.{CACHE_EXTENSION}"))
    }

    /// `Ok(None)` for a missing or stale entry, `Err` for a blob that cannot be decoded.
    pub fn load(&self, hash: u64, source_hash: u64) -> Result<Option<CachedShader>> {
        let path = self.entry_path(hash);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(Error::Io(err).context(format!("reading {}", path.display()))),
        };
        let blob: CacheBlob = bincode::deserialize(&bytes)?;
        if blob.magic != CACHE_MAGIC {
            return Err(Error::Cache(format!("{} is not a shader cache blob", path.display())));
        }
        if blob.version != CACHE_VERSION || blob.shader.source_hash != source_hash {
            log::debug!("Stale shader cache entry {}", path.display());
            return Ok(None);
        }
        Ok(Some(blob.shader))
    }

    pub fn store(&self, hash: u64, shader: &CachedShader) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating shader cache directory {}", self.dir.display()))?;
        let blob = CacheBlob {
            magic: CACHE_MAGIC,
            version: CACHE_VERSION,
            shader: shader.clone(),
        };
        let bytes = bincode::serialize(&blob)?;
        let path = self.entry_path(hash);
        std::fs::write(&path, bytes).with_context(|| format!("writing {}", path.display()))?;
        log::debug!("Wrote shader cache entry {}", path.display());
        Ok(())
    }

    /// Drop the entry for `hash`. Missing entries are fine.
    pub fn invalidate(&self, hash: u64) -> Result<()> {
        match std::fs::remove_file(self.entry_path(hash)) {
            Err(err) if err.kind() != std::io::ErrorKind::NotFound => Err(err.into()),
            _ => Ok(()),
        }
    }
}
