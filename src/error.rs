use std::path::PathBuf;
use thiserror::Error;

use crate::model::ElementKind;
use crate::validation::ValidationReport;

/// The main error type for spatialdata operations.
///
/// Every variant carries the names involved so calling code can branch on
/// the failure category (see [`SpatialDataError::kind`]) and report the
/// offending element or coordinate system without parsing messages.
#[derive(Debug, Error)]
pub enum SpatialDataError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Axis mismatch in {context}: expected {expected:?}, found {found:?}")]
    AxisMismatch {
        context: String,
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error("Transformation {transformation} is not invertible: {reason}")]
    NotInvertible {
        transformation: String,
        reason: String,
    },

    #[error("No transformation path from coordinate system '{source_system}' to '{target_system}'")]
    NoTransformationPath {
        source_system: String,
        target_system: String,
    },

    #[error(
        "Several transformation paths from '{source_system}' to '{target_system}', name an intermediate system: {}",
        .paths.join("; ")
    )]
    AmbiguousTransformationPath {
        source_system: String,
        target_system: String,
        paths: Vec<String>,
    },

    #[error("Duplicate element name '{name}' ({kind}); already used by a {existing_kind} element")]
    DuplicateName {
        kind: ElementKind,
        name: String,
        existing_kind: ElementKind,
    },

    #[error("Validation failed with {error_count} error(s) and {warning_count} warning(s)")]
    Validation {
        error_count: usize,
        warning_count: usize,
        report: ValidationReport,
    },

    #[error("Incompatible store format at {location}: {reason}")]
    IncompatibleFormat { location: String, reason: String },

    #[error("Element '{element}' has no transformation to coordinate system '{target_system}'")]
    TransformNotFound {
        element: String,
        target_system: String,
    },

    #[error("Element '{name}' not found{}", describe_kind(.kind))]
    ElementNotFound {
        kind: Option<ElementKind>,
        name: String,
    },

    #[error("Element '{name}' is a table and has no coordinate system")]
    NotSpatial { name: String },

    #[error("Invalid element '{name}': {reason}")]
    InvalidElement { name: String, reason: String },

    #[error("Invalid query: {reason}")]
    InvalidQuery { reason: String },

    #[error("Failed to parse metadata at {path}: {source}")]
    MetadataParse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to encode metadata for {path}: {source}")]
    MetadataWrite {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Zarr store error at {path}: {reason}")]
    Zarr { path: String, reason: String },

    #[error("Store path does not exist: {0}")]
    StoreNotFound(PathBuf),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
}

fn describe_kind(kind: &Option<ElementKind>) -> String {
    kind.map(|k| format!(" among {}", k.collection()))
        .unwrap_or_default()
}

/// Coarse failure category of a [`SpatialDataError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    AxisMismatch,
    NotInvertible,
    NoTransformationPath,
    AmbiguousTransformationPath,
    DuplicateName,
    Validation,
    IncompatibleFormat,
    TransformNotFound,
    NotFound,
    InvalidInput,
    Io,
}

impl SpatialDataError {
    /// Returns the failure category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SpatialDataError::AxisMismatch { .. } => ErrorKind::AxisMismatch,
            SpatialDataError::NotInvertible { .. } => ErrorKind::NotInvertible,
            SpatialDataError::NoTransformationPath { .. } => ErrorKind::NoTransformationPath,
            SpatialDataError::AmbiguousTransformationPath { .. } => {
                ErrorKind::AmbiguousTransformationPath
            }
            SpatialDataError::DuplicateName { .. } => ErrorKind::DuplicateName,
            SpatialDataError::Validation { .. } => ErrorKind::Validation,
            SpatialDataError::IncompatibleFormat { .. }
            | SpatialDataError::MetadataParse { .. }
            | SpatialDataError::Zarr { .. } => ErrorKind::IncompatibleFormat,
            SpatialDataError::TransformNotFound { .. } => ErrorKind::TransformNotFound,
            SpatialDataError::ElementNotFound { .. } | SpatialDataError::StoreNotFound(_) => {
                ErrorKind::NotFound
            }
            SpatialDataError::NotSpatial { .. }
            | SpatialDataError::InvalidElement { .. }
            | SpatialDataError::InvalidQuery { .. }
            | SpatialDataError::UnsupportedFormat(_) => ErrorKind::InvalidInput,
            SpatialDataError::Io(_)
            | SpatialDataError::MetadataWrite { .. } => ErrorKind::Io,
        }
    }

    pub(crate) fn axis_mismatch(
        context: impl Into<String>,
        expected: &[String],
        found: &[String],
    ) -> Self {
        SpatialDataError::AxisMismatch {
            context: context.into(),
            expected: expected.to_vec(),
            found: found.to_vec(),
        }
    }

    pub(crate) fn incompatible(location: impl Into<String>, reason: impl Into<String>) -> Self {
        SpatialDataError::IncompatibleFormat {
            location: location.into(),
            reason: reason.into(),
        }
    }

    /// Wraps an error raised by the zarr layer while working on `path`.
    pub(crate) fn zarr(path: impl Into<String>, err: impl std::fmt::Display) -> Self {
        SpatialDataError::Zarr {
            path: path.into(),
            reason: err.to_string(),
        }
    }

    pub(crate) fn invalid_element(name: impl Into<String>, reason: impl Into<String>) -> Self {
        SpatialDataError::InvalidElement {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SpatialDataError>;
