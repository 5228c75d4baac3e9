// src/lib.rs
//! `slop_render`: a deferred-submission scene renderer on wgpu.
//!
//! Shaders are GLSL files with `#type` sections, compiled to SPIR-V and reflected into
//! descriptor set layouts ([`shader`], [`descriptor`]). Frames are recorded on a dedicated
//! [`render_thread`] from data gathered by [`renderer::SceneRenderer`].

pub mod attention;
pub mod config;
pub mod context;
pub mod descriptor;
pub mod error;
pub mod gpu;
pub mod render_thread;
pub mod renderer;
pub mod shader;

pub use config::RendererConfig;
pub use context::{Context, OptionContext};
pub use error::{Error, Result};

use log::LevelFilter;

/// Install the `env_logger` backend: debug builds log at `Debug`, release at `Warn`.
/// `RUST_LOG` overrides either. Calling it twice is harmless.
#[cfg(not(target_arch = "wasm32"))]
pub fn init_logging() {
    let _ = env_logger::Builder::new()
        .filter_level(if cfg!(debug_assertions) {
            LevelFilter::Debug
        } else {
            LevelFilter::Warn
        })
        .filter_module("wgpu_core", LevelFilter::Warn)
        .filter_module("wgpu_hal", LevelFilter::Warn)
        .filter_module("naga", LevelFilter::Warn)
        .format_timestamp_millis()
        .parse_default_env()
        .try_init();
}
