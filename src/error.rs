// src/error.rs
//! Error handling for the whole renderer core.
//!
//! - **Taxonomy**: compile failures, malformed SPIR-V, reflection conflicts, named-resource
//!   misses, uniform type mismatches, resource exhaustion, cache and config problems.
//! - **Features**: context chaining, stable error codes for user-facing dialogs, `is_*` helpers,
//!   and the release-mode tolerance helper used by the descriptor layer and render thread.

use std::fmt;
use thiserror::Error;

/// Main error type. Send + Sync + 'static so it can cross the render thread boundary.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// I/O errors (shader files, cache blobs, config files).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// GLSL -> SPIR-V compilation rejected a stage.
    #[error("failed to compile {stage} shader: {message}")]
    ShaderCompile { stage: String, message: String },

    /// The SPIR-V word stream could not be decoded.
    #[error("malformed SPIR-V: {0}")]
    Spirv(String),

    /// Reflected resources could not be merged into a consistent layout.
    #[error("reflection error: {0}")]
    Reflection(String),

    /// A named descriptor or uniform lookup found nothing.
    #[error("no reflected resource named '{name}'")]
    UnknownResource { name: String },

    /// Typed uniform access did not match the reflected type tag.
    #[error("uniform '{name}' is {expected}, got {found}")]
    UniformType {
        name: String,
        expected: String,
        found: String,
    },

    /// Device limits or allocation budgets exceeded.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Shader cache blob could not be read or written.
    #[error("shader cache error: {0}")]
    Cache(String),

    /// Invalid renderer configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Simple custom message.
    #[error("{0}")]
    Custom(String),

    /// Context chaining.
    #[error("{message}: {source}")]
    WithContext {
        message: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    #[inline]
    pub fn custom<S: Into<String>>(msg: S) -> Self {
        Self::Custom(msg.into())
    }

    /// Create a formatted custom error (like `format!` but returns `Error`).
    #[inline]
    pub fn format(args: fmt::Arguments) -> Self {
        Self::Custom(fmt::format(args))
    }

    #[inline]
    pub fn msg(msg: &'static str) -> Self {
        Self::Custom(msg.into())
    }

    /// Add context to any error (chainable).
    #[inline]
    pub fn context<C: Into<String>>(self, context: C) -> Self {
        Self::WithContext {
            message: context.into(),
            source: Box::new(self),
        }
    }

    #[inline]
    pub fn unknown_resource<S: Into<String>>(name: S) -> Self {
        Self::UnknownResource { name: name.into() }
    }

    /// The innermost error, skipping context layers.
    pub fn root(&self) -> &Error {
        match self {
            Error::WithContext { source, .. } => source.root(),
            other => other,
        }
    }

    /// Stable short code shown to users in error dialogs.
    pub fn code(&self) -> &'static str {
        match self.root() {
            Error::Io(_) => "E_IO",
            Error::ShaderCompile { .. } => "E_SHADER_COMPILE",
            Error::Spirv(_) => "E_SPIRV",
            Error::Reflection(_) => "E_REFLECTION",
            Error::UnknownResource { .. } => "E_UNKNOWN_RESOURCE",
            Error::UniformType { .. } => "E_UNIFORM_TYPE",
            Error::ResourceExhausted(_) => "E_RESOURCE_EXHAUSTED",
            Error::Cache(_) => "E_CACHE",
            Error::Config(_) => "E_CONFIG",
            Error::Custom(_) | Error::WithContext { .. } => "E_GENERIC",
        }
    }

    // === kind checks ===
    #[inline]
    pub fn is_io(&self) -> bool {
        matches!(self.root(), Error::Io(_))
    }

    #[inline]
    pub fn is_compile(&self) -> bool {
        matches!(self.root(), Error::ShaderCompile { .. } | Error::Spirv(_))
    }

    #[inline]
    pub fn is_unknown_resource(&self) -> bool {
        matches!(self.root(), Error::UnknownResource { .. })
    }

    #[inline]
    pub fn is_custom(&self) -> bool {
        matches!(self, Error::Custom(_))
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Custom(msg.to_owned())
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Custom(msg)
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Cache(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Config(err.to_string())
    }
}

/// Convenient `Result` alias, use `crate::Result<T>` everywhere.
pub type Result<T> = std::result::Result<T, Error>;

/// Release-mode tolerance for descriptor-layer and render-thread errors.
///
/// Debug builds assert; release builds log and carry on with `None`.
#[track_caller]
pub fn tolerate<T>(result: Result<T>, what: &str) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err) => {
            log::error!("{what}: {err}");
            debug_assert!(false, "{what}: {err}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_looks_through_context() {
        let err = Error::unknown_resource("u_Missing").context("writing material set");
        assert_eq!(err.code(), "E_UNKNOWN_RESOURCE");
        assert!(err.is_unknown_resource());
        assert_eq!(
            err.to_string(),
            "writing material set: no reflected resource named 'u_Missing'"
        );
    }

    #[test]
    fn compile_errors_are_grouped() {
        let a = Error::ShaderCompile {
            stage: "fragment".into(),
            message: "syntax".into(),
        };
        let b = Error::Spirv("bad magic".into());
        assert!(a.is_compile() && b.is_compile());
        assert!(!Error::msg("x").is_compile());
    }

    #[test]
    fn tolerate_passes_ok_through() {
        assert_eq!(tolerate(Ok::<_, Error>(3), "value"), Some(3));
    }
}
