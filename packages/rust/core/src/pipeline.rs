//! End-to-end generation: template bytes → locate → replicate → assemble →
//! package.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Instant;

use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};

use docmerge_shared::{
    AliasConfig, AppConfig, BreakKind, DOCX_MEDIA_TYPE, DocMergeError, DocumentKind, MarkerNames,
    Record, Result, SharedContext,
};

use crate::assembler::{splice, validate_well_formed};
use crate::format::FormatOptions;
use crate::markers::{BreakContext, MarkerLocation, MarkerLocator};
use crate::package::DocxPackage;
use crate::placeholders::{PlaceholderConvention, scan_placeholders};
use crate::replicate::Replicator;
use crate::template::{TemplateSource, load_template};

/// Options for a generation run.
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub markers: MarkerNames,
    pub break_kind: BreakKind,
    /// Parse the assembled main body before packaging.
    pub validate: bool,
    pub format: FormatOptions,
    pub aliases: Vec<AliasConfig>,
    /// File name of the merged document in batch mode.
    pub batch_name: String,
    /// Prefix of per-record file names in split mode.
    pub file_prefix: String,
    /// Record fields that name a per-record file.
    pub name_fields: Vec<String>,
}

impl From<&AppConfig> for GenerateOptions {
    fn from(config: &AppConfig) -> Self {
        Self {
            markers: config.generation.markers.clone(),
            break_kind: config.generation.break_kind,
            validate: config.generation.validate,
            format: FormatOptions::from(&config.format),
            aliases: config.placeholders.aliases.clone(),
            batch_name: config.output.batch_name.clone(),
            file_prefix: config.output.file_prefix.clone(),
            name_fields: config.output.name_fields.clone(),
        }
    }
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

/// One finished output document.
#[derive(Debug, Clone)]
pub struct GeneratedDocument {
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub media_type: &'static str,
    /// Number of populated copies of the repeatable region.
    pub copies: usize,
    pub sha256: String,
}

impl GeneratedDocument {
    fn new(file_name: String, bytes: Vec<u8>, copies: usize) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        let sha256 = format!("{:x}", hasher.finalize());

        Self {
            file_name,
            bytes,
            media_type: DOCX_MEDIA_TYPE,
            copies,
            sha256,
        }
    }
}

/// Batch merges every record into one document; split writes one per record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GenerationMode {
    #[default]
    Batch,
    Split,
}

/// Everything a full run needs besides options.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub source: TemplateSource,
    pub kind: DocumentKind,
    pub records: Vec<Record>,
    pub shared: SharedContext,
    pub mode: GenerationMode,
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called after each populated copy.
    fn record_rendered(&self, current: usize, total: usize);
    /// Called when all documents are assembled.
    fn done(&self, documents: &[GeneratedDocument]);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn record_rendered(&self, _current: usize, _total: usize) {}
    fn done(&self, _documents: &[GeneratedDocument]) {}
}

// ---------------------------------------------------------------------------
// Shared steps
// ---------------------------------------------------------------------------

/// Opened package plus the located region, derived once per run.
struct PreparedTemplate {
    package: DocxPackage,
    location: MarkerLocation,
}

impl PreparedTemplate {
    fn new(template: &[u8], markers: &MarkerNames) -> Result<Self> {
        let package = DocxPackage::open(template.to_vec())?;
        let location = MarkerLocator::new().locate(package.main_xml(), markers)?;
        Ok(Self { package, location })
    }

    fn assemble(&self, replicated: &str, validate: bool) -> Result<Vec<u8>> {
        let xml = splice(self.package.main_xml(), &self.location, replicated)?;
        if validate {
            validate_well_formed(&xml)?;
        }
        self.package.repackage(&xml)
    }
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Merge every record into one document.
///
/// Nothing is returned unless every step succeeds.
#[instrument(skip_all, fields(records = records.len()))]
pub fn generate(
    template: &[u8],
    records: &[Record],
    shared: &SharedContext,
    opts: &GenerateOptions,
    progress: &dyn ProgressReporter,
) -> Result<GeneratedDocument> {
    progress.phase("Locating section");
    let prepared = PreparedTemplate::new(template, &opts.markers)?;
    let replicator = Replicator::new(
        &prepared.location,
        opts.break_kind,
        &opts.aliases,
        &opts.format,
    );

    progress.phase("Populating copies");
    let replicated = replicator.replicate(records, shared, |current, total| {
        progress.record_rendered(current, total)
    })?;

    progress.phase("Assembling document");
    let bytes = prepared.assemble(&replicated, opts.validate)?;
    let doc = GeneratedDocument::new(opts.batch_name.clone(), bytes, records.len());

    info!(file = %doc.file_name, copies = doc.copies, size = doc.bytes.len(), "document generated");
    Ok(doc)
}

/// One document per record, named from the record's fields.
///
/// Any failing record aborts the whole run.
#[instrument(skip_all, fields(records = records.len()))]
pub fn generate_each(
    template: &[u8],
    records: &[Record],
    shared: &SharedContext,
    opts: &GenerateOptions,
    progress: &dyn ProgressReporter,
) -> Result<Vec<GeneratedDocument>> {
    progress.phase("Locating section");
    let prepared = PreparedTemplate::new(template, &opts.markers)?;
    let replicator = Replicator::new(
        &prepared.location,
        opts.break_kind,
        &opts.aliases,
        &opts.format,
    );

    progress.phase("Populating documents");
    let total = records.len();
    let mut used = HashSet::new();
    let mut documents = Vec::with_capacity(total);

    for (i, record) in records.iter().enumerate() {
        let copy = replicator.render(record, shared)?;
        let bytes = prepared.assemble(&copy, opts.validate)?;
        let name = unique_name(document_file_name(record, i + 1, opts), &mut used);
        debug!(file = %name, "document generated");
        documents.push(GeneratedDocument::new(name, bytes, 1));
        progress.record_rendered(i + 1, total);
    }

    info!(documents = documents.len(), "split generation complete");
    Ok(documents)
}

/// Fetch the template, then generate in the requested mode.
#[instrument(skip_all, fields(kind = %request.kind, mode = ?request.mode))]
pub async fn run(
    request: &GenerateRequest,
    opts: &GenerateOptions,
    progress: &dyn ProgressReporter,
) -> Result<Vec<GeneratedDocument>> {
    let start = Instant::now();

    progress.phase("Loading template");
    let template = load_template(&request.source, request.kind).await?;

    let documents = match request.mode {
        GenerationMode::Batch => vec![generate(
            &template,
            &request.records,
            &request.shared,
            opts,
            progress,
        )?],
        GenerationMode::Split => generate_each(
            &template,
            &request.records,
            &request.shared,
            opts,
            progress,
        )?,
    };

    progress.done(&documents);
    info!(
        documents = documents.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "generation finished"
    );
    Ok(documents)
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// `{prefix}_{name fields}.docx`, or `{prefix}_{index}.docx` when the record
/// has none of the naming fields.
pub fn document_file_name(record: &Record, index: usize, opts: &GenerateOptions) -> String {
    let parts: Vec<String> = opts
        .name_fields
        .iter()
        .filter_map(|field| record.get(field))
        .map(|value| sanitize_file_component(&value.to_string()))
        .filter(|part| !part.is_empty())
        .collect();

    let stem = if parts.is_empty() {
        index.to_string()
    } else {
        parts.join("_")
    };

    match sanitize_file_component(&opts.file_prefix) {
        prefix if prefix.is_empty() => format!("{stem}.docx"),
        prefix => format!("{prefix}_{stem}.docx"),
    }
}

/// Keep letters (umlauts included), digits, `-` and `.`; everything else
/// collapses to a single `_`.
fn sanitize_file_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.trim().chars() {
        if c.is_alphanumeric() || c == '-' || c == '.' {
            out.push(c);
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    out.trim_matches(|c| c == '_' || c == '.').to_string()
}

fn unique_name(name: String, used: &mut HashSet<String>) -> String {
    if used.insert(name.clone()) {
        return name;
    }
    let stem = name.strip_suffix(".docx").unwrap_or(&name).to_string();
    let mut n = 2;
    loop {
        let candidate = format!("{stem}_{n}.docx");
        if used.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

/// Write documents into `dir`, all or nothing.
///
/// Every document is first written to a hidden temp file; targets are only
/// renamed into place once all temp writes succeed. On failure the temp files
/// are removed and targets already renamed are deleted again.
///
/// Returns the written paths in document order.
pub fn write_documents(dir: &Path, documents: &[GeneratedDocument]) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir).map_err(|e| DocMergeError::io(dir, e))?;

    let staged: Vec<(PathBuf, PathBuf)> = documents
        .iter()
        .map(|doc| (dir.join(format!(".{}.tmp", doc.file_name)), dir.join(&doc.file_name)))
        .collect();

    for (idx, ((temp, _), doc)) in staged.iter().zip(documents).enumerate() {
        if let Err(e) = std::fs::write(temp, &doc.bytes) {
            // The failed write may have left a partial temp file behind.
            discard(staged[..=idx].iter().map(|(partial, _)| partial));
            return Err(DocMergeError::io(temp, e));
        }
    }

    for (idx, (temp, target)) in staged.iter().enumerate() {
        if let Err(e) = std::fs::rename(temp, target) {
            warn!(file = %target.display(), error = %e, "rename failed, rolling back");
            discard(staged[..idx].iter().map(|(_, target)| target));
            discard(staged[idx..].iter().map(|(temp, _)| temp));
            return Err(DocMergeError::io(target, e));
        }
    }

    for ((_, target), doc) in staged.iter().zip(documents) {
        debug!(
            file = %target.display(),
            size = doc.bytes.len(),
            sha256 = %doc.sha256,
            "wrote document"
        );
    }
    Ok(staged.into_iter().map(|(_, target)| target).collect())
}

fn discard<'a>(paths: impl Iterator<Item = &'a PathBuf>) {
    for path in paths {
        match std::fs::remove_file(path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                warn!(file = %path.display(), error = %e, "could not remove");
            }
            _ => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Inspection
// ---------------------------------------------------------------------------

/// What a template looks like to the generator.
#[derive(Debug, Clone)]
pub struct TemplateReport {
    pub main_part: String,
    pub part_count: usize,
    pub strategy: &'static str,
    pub break_context: BreakContext,
    pub convention: PlaceholderConvention,
    /// Placeholder names in order of first appearance. Empty for bare-name
    /// templates, which have no delimiters to scan for.
    pub placeholders: Vec<String>,
    /// Whether the body carries a `w:sectPr` that section breaks can repeat.
    pub has_section_properties: bool,
}

/// Locate the region and list its placeholders without generating.
pub fn inspect(template: &[u8], markers: &MarkerNames) -> Result<TemplateReport> {
    let prepared = PreparedTemplate::new(template, markers)?;
    let opts = FormatOptions::default();
    let replicator = Replicator::new(&prepared.location, BreakKind::None, &[], &opts);
    let convention = replicator.convention();

    Ok(TemplateReport {
        main_part: prepared.package.main_part_name().to_string(),
        part_count: prepared.package.part_count()?,
        strategy: prepared.location.strategy,
        break_context: prepared.location.break_context,
        convention,
        placeholders: scan_placeholders(replicator.template(), convention),
        has_section_properties: !prepared.location.section_properties.is_empty(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts() -> GenerateOptions {
        GenerateOptions::default()
    }

    #[test]
    fn file_name_from_fields() {
        let record = Record::new()
            .with("Vorname", "Jörg")
            .with("Nachname", "Müller-Lüdenscheidt");
        assert_eq!(
            document_file_name(&record, 1, &opts()),
            "zeugnis_Müller-Lüdenscheidt_Jörg.docx"
        );
    }

    #[test]
    fn file_name_sanitizes_separators() {
        let record = Record::new().with("Nachname", "../O'Brien / x");
        assert_eq!(document_file_name(&record, 3, &opts()), "zeugnis_O_Brien_x.docx");
    }

    #[test]
    fn file_name_falls_back_to_index() {
        let record = Record::new().with("Nachname", "  ");
        assert_eq!(document_file_name(&record, 7, &opts()), "zeugnis_7.docx");
    }

    #[test]
    fn duplicate_names_get_suffix() {
        let mut used = HashSet::new();
        assert_eq!(unique_name("a.docx".into(), &mut used), "a.docx");
        assert_eq!(unique_name("a.docx".into(), &mut used), "a_2.docx");
        assert_eq!(unique_name("a.docx".into(), &mut used), "a_3.docx");
    }

    #[test]
    fn options_follow_config() {
        let mut config = AppConfig::default();
        config.generation.break_kind = BreakKind::Section;
        config.output.batch_name = "all.docx".into();
        let opts = GenerateOptions::from(&config);
        assert_eq!(opts.break_kind, BreakKind::Section);
        assert_eq!(opts.batch_name, "all.docx");
        assert!(opts.validate);
    }

    #[test]
    fn write_documents_is_atomic_per_file() {
        let dir = std::env::temp_dir().join(format!("docmerge-write-{}", std::process::id()));
        let docs = vec![GeneratedDocument::new("a.docx".into(), b"abc".to_vec(), 1)];
        let paths = write_documents(&dir, &docs).unwrap();

        assert_eq!(std::fs::read(&paths[0]).unwrap(), b"abc");
        assert!(!dir.join(".a.docx.tmp").exists());
        assert_eq!(docs[0].sha256.len(), 64);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn failed_write_leaves_no_output() {
        let dir = std::env::temp_dir().join(format!("docmerge-rollback-{}", std::process::id()));
        std::fs::create_dir_all(dir.join("b.docx")).unwrap();
        let docs = vec![
            GeneratedDocument::new("a.docx".into(), b"abc".to_vec(), 1),
            GeneratedDocument::new("b.docx".into(), b"def".to_vec(), 1),
        ];

        let err = write_documents(&dir, &docs).unwrap_err();
        assert!(matches!(err, DocMergeError::Io { .. }));

        let mut left: Vec<String> = std::fs::read_dir(&dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        left.sort();
        assert_eq!(left, ["b.docx"]);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
