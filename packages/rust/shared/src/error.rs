//! Error types for docmerge.
//!
//! Library crates use [`DocMergeError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all docmerge operations.
#[derive(Debug, thiserror::Error)]
pub enum DocMergeError {
    /// The template could not be loaded (missing file, non-2xx response, empty body).
    #[error("template not found: {message}")]
    TemplateNotFound { message: String },

    /// The archive is unreadable or lacks its main body part.
    #[error("malformed package: {message}")]
    MalformedPackage { message: String },

    /// A required section marker is absent from the main body.
    #[error("marker not found: {marker}")]
    MarkerNotFound { marker: String },

    /// The assembled main body is not well-formed XML.
    #[error("structural validation failed: {message}")]
    StructuralValidation { message: String },

    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error talking to the template proxy or validation endpoint.
    #[error("network error: {0}")]
    Network(String),

    /// Zip archive read/write error.
    #[error("archive error: {0}")]
    Archive(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Input data validation error (records, context, options).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// The access gate rejected the supplied credential.
    #[error("access denied: {attempts} of {max_attempts} attempts used")]
    AccessDenied { attempts: u32, max_attempts: u32 },

    /// Too many failed attempts; the gate is locked until the given time.
    #[error("locked out until {until}")]
    LockedOut { until: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, DocMergeError>;

impl DocMergeError {
    /// Create a template-not-found error from any displayable message.
    pub fn template_not_found(msg: impl Into<String>) -> Self {
        Self::TemplateNotFound {
            message: msg.into(),
        }
    }

    /// Create a malformed-package error from any displayable message.
    pub fn malformed_package(msg: impl Into<String>) -> Self {
        Self::MalformedPackage {
            message: msg.into(),
        }
    }

    /// Create a marker-not-found error naming the missing marker.
    pub fn marker_not_found(marker: impl Into<String>) -> Self {
        Self::MarkerNotFound {
            marker: marker.into(),
        }
    }

    /// Create a structural validation error from any displayable message.
    pub fn structural(msg: impl Into<String>) -> Self {
        Self::StructuralValidation {
            message: msg.into(),
        }
    }

    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = DocMergeError::marker_not_found("SectionEnd");
        assert_eq!(err.to_string(), "marker not found: SectionEnd");

        let err = DocMergeError::template_not_found("HTTP 404 Not Found: missing");
        assert!(err.to_string().contains("HTTP 404"));

        let err = DocMergeError::AccessDenied {
            attempts: 2,
            max_attempts: 5,
        };
        assert_eq!(err.to_string(), "access denied: 2 of 5 attempts used");
    }
}
