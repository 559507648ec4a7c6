//! Shared types, error model, and configuration for docmerge.
//!
//! This crate is the foundation depended on by the engine and the CLI.
//! It provides:
//! - [`DocMergeError`] — the unified error type
//! - Domain types ([`Record`], [`FieldValue`], [`SharedContext`], [`DocumentKind`])
//! - Configuration ([`AppConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AccessConfig, AliasConfig, AppConfig, BreakKind, DateFormat, FormatConfig, GenerationConfig,
    MarkerNames, OutputConfig, PlaceholderConfig, TemplateConfig, config_dir, config_file_path,
    init_config, load_config, load_config_from,
};
pub use error::{DocMergeError, Result};
pub use types::{
    DOCX_MEDIA_TYPE, DocumentKind, FieldValue, Record, SharedContext, format_number,
};
