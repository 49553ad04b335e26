//! Low-level configuration for the Tor directory cache.
//!
//! This crate provides the small set of building blocks that the
//! directory manager's configuration (and any other builder-derived
//! configuration struct) needs: a shared [`ConfigBuildError`] type, and
//! the [`define_list_builder_helper`]/[`define_list_builder_accessors`]
//! macros for sub-lists inside a builder.

#![allow(clippy::exhaustive_structs)]
#![allow(clippy::exhaustive_enums)]

pub mod list_builder;

pub use list_builder::*;

use std::path::PathBuf;

/// An error produced while validating a configuration builder.
#[derive(Clone, Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigBuildError {
    /// A field was not set, and has no default.
    #[error("field `{field}` not set")]
    MissingField {
        /// The field in question.
        field: String,
    },
    /// A field was set to an invalid value.
    #[error("invalid value for field `{field}`: {problem}")]
    Invalid {
        /// The field in question.
        field: String,
        /// What was wrong with it.
        problem: String,
    },
}

impl From<derive_builder::UninitializedFieldError> for ConfigBuildError {
    fn from(val: derive_builder::UninitializedFieldError) -> Self {
        ConfigBuildError::MissingField {
            field: val.field_name().to_string(),
        }
    }
}

/// Expand `~` and environment variables in a path read from a
/// configuration file.
///
/// This is deliberately conservative: paths that don't start with `~`
/// or contain no `$VAR` references are returned unchanged.
pub fn expand_path(path: &str) -> Result<PathBuf, ConfigBuildError> {
    #[cfg(feature = "expand-paths")]
    {
        shellexpand::full(path)
            .map(|s| PathBuf::from(s.into_owned()))
            .map_err(|e| ConfigBuildError::Invalid {
                field: "path".into(),
                problem: e.to_string(),
            })
    }
    #[cfg(not(feature = "expand-paths"))]
    {
        Ok(PathBuf::from(path))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn missing_field_message() {
        let err = ConfigBuildError::MissingField {
            field: "cache_dir".into(),
        };
        assert!(err.to_string().contains("cache_dir"));
    }
}
