// src/context.rs
//! Context extension traits + macros for the renderer's error type.
//!
//! - `.context()` / `.with_context()` on `Result` and `Option`, lazy on the error path.
//! - `.or_unknown(name)` turns a failed named lookup into `Error::UnknownResource`.
//! - `bail!` / `ensure!` for early returns in reflection and descriptor code.

use crate::error::{Error, Result};

/// `.context()` / `.with_context()` on any `Result` whose error converts into [`Error`].
pub trait Context<T> {
    fn context<C>(self, context: C) -> Result<T>
    where
        C: Into<String>;

    /// Closure only runs on the error path.
    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>;
}

impl<T, E> Context<T> for std::result::Result<T, E>
where
    E: Into<Error>,
{
    #[inline]
    fn context<C>(self, context: C) -> Result<T>
    where
        C: Into<String>,
    {
        self.map_err(|err| err.into().context(context))
    }

    #[inline]
    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>,
    {
        self.map_err(|err| err.into().context(f()))
    }
}

/// `Option<T>` -> `Result<T>` conversions used by lookups.
pub trait OptionContext<T> {
    fn context<C>(self, context: C) -> Result<T>
    where
        C: Into<String>;

    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>;

    /// A missing value means the reflected resource `name` does not exist.
    fn or_unknown(self, name: &str) -> Result<T>;
}

impl<T> OptionContext<T> for Option<T> {
    #[inline]
    fn context<C>(self, context: C) -> Result<T>
    where
        C: Into<String>,
    {
        self.ok_or_else(|| Error::custom(context))
    }

    #[inline]
    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>,
    {
        self.ok_or_else(|| Error::custom(f()))
    }

    #[inline]
    fn or_unknown(self, name: &str) -> Result<T> {
        self.ok_or_else(|| Error::unknown_resource(name))
    }
}

// ====================== CONVENIENCE MACROS ======================

/// Early return with an error: `bail!("msg")`, `bail!(err)` or formatted.
#[macro_export]
macro_rules! bail {
    ($msg:literal $(,)?) => {
        return Err($crate::error::Error::msg($msg))
    };
    ($err:expr $(,)?) => {
        return Err(Into::<$crate::error::Error>::into($err))
    };
    ($fmt:expr, $($arg:tt)*) => {
        return Err($crate::error::Error::format(format_args!($fmt, $($arg)*)))
    };
}

/// Ensure a condition holds, else return the given error expression.
#[macro_export]
macro_rules! ensure {
    ($cond:expr, $err:expr $(,)?) => {
        if !($cond) {
            $crate::bail!($err);
        }
    };
    ($cond:expr, $fmt:expr, $($arg:tt)*) => {
        if !($cond) {
            $crate::bail!($fmt, $($arg)*);
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checked(len: usize) -> Result<usize> {
        ensure!(len % 4 == 0, Error::Spirv(format!("{len} bytes is not word aligned")));
        Ok(len / 4)
    }

    #[test]
    fn ensure_returns_the_given_error() {
        assert_eq!(checked(8).ok(), Some(2));
        let err = checked(7).unwrap_err();
        assert!(err.is_compile());
    }

    #[test]
    fn or_unknown_names_the_resource() {
        let missing: Option<u32> = None;
        let err = missing.or_unknown("u_Albedo").unwrap_err();
        assert_eq!(err.to_string(), "no reflected resource named 'u_Albedo'");
    }

    #[test]
    fn with_context_wraps_foreign_errors() {
        let io: std::result::Result<(), std::io::Error> =
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        let err = io.with_context(|| "reading StaticMesh.glsl").unwrap_err();
        assert!(err.is_io());
        assert!(err.to_string().starts_with("reading StaticMesh.glsl"));
    }
}
