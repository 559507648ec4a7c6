//! Template-section duplication and placeholder substitution for Word
//! documents.
//!
//! This crate locates the repeatable section of a template's main body,
//! populates one copy per record, splices the copies back in, and repackages
//! the archive with every other part untouched.

pub mod assembler;
pub mod format;
pub mod gate;
pub mod markers;
pub mod package;
pub mod pipeline;
pub mod placeholders;
pub mod replicate;
pub mod template;

pub use pipeline::{
    GenerateOptions, GenerateRequest, GeneratedDocument, GenerationMode, ProgressReporter,
    SilentProgress, TemplateReport, generate, generate_each, inspect, run, write_documents,
};
pub use template::{TemplateSource, load_template};
