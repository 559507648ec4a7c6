//! Word package (OPC zip) reading and rewriting.
//!
//! Only the main-body part is ever decoded. Every other part is copied
//! across in its raw compressed form, so its bytes survive untouched.

use std::io::{Cursor, Read, Write};
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, instrument, warn};
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

use docmerge_shared::{DocMergeError, Result};

use crate::markers::attr_value;

/// Package-level relationships part.
pub const ROOT_RELS_PART: &str = "_rels/.rels";

/// Conventional location of the main body.
pub const DEFAULT_MAIN_PART: &str = "word/document.xml";

const OFFICE_DOCUMENT_REL: &str = "/officeDocument";

static RELATIONSHIP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<(?:\w+:)?Relationship\b[^>]*>").expect("valid regex"));

fn archive_err(e: zip::result::ZipError) -> DocMergeError {
    DocMergeError::Archive(e.to_string())
}

/// An opened template package.
#[derive(Debug, Clone)]
pub struct DocxPackage {
    bytes: Vec<u8>,
    main_part: String,
    main_xml: String,
}

impl DocxPackage {
    /// Open a package and decode its main-body part.
    #[instrument(skip_all, fields(size = bytes.len()))]
    pub fn open(bytes: Vec<u8>) -> Result<Self> {
        let (main_part, main_xml) = {
            let mut archive = ZipArchive::new(Cursor::new(bytes.as_slice())).map_err(|e| {
                DocMergeError::malformed_package(format!("not a zip archive: {e}"))
            })?;
            let main_part = resolve_main_part(&mut archive)?;

            let mut entry = archive.by_name(&main_part).map_err(|_| {
                DocMergeError::malformed_package(format!("main part {main_part} is missing"))
            })?;
            let mut main_xml = String::with_capacity(entry.size() as usize);
            entry.read_to_string(&mut main_xml).map_err(|e| {
                DocMergeError::malformed_package(format!(
                    "main part {main_part} is not UTF-8 text: {e}"
                ))
            })?;
            (main_part, main_xml)
        };

        debug!(part = %main_part, xml_len = main_xml.len(), "package opened");

        Ok(Self {
            bytes,
            main_part,
            main_xml,
        })
    }

    /// Archive path of the main-body part.
    pub fn main_part_name(&self) -> &str {
        &self.main_part
    }

    pub fn main_xml(&self) -> &str {
        &self.main_xml
    }

    /// Number of parts in the archive, directory entries included.
    pub fn part_count(&self) -> Result<usize> {
        let archive = ZipArchive::new(Cursor::new(self.bytes.as_slice())).map_err(archive_err)?;
        Ok(archive.len())
    }

    /// Build a new package identical to this one except for the main body.
    ///
    /// Part order and every non-main part's compressed bytes are preserved.
    #[instrument(skip_all, fields(part = %self.main_part, xml_len = new_xml.len()))]
    pub fn repackage(&self, new_xml: &str) -> Result<Vec<u8>> {
        let mut archive =
            ZipArchive::new(Cursor::new(self.bytes.as_slice())).map_err(archive_err)?;
        let mut writer = ZipWriter::new(Cursor::new(Vec::with_capacity(
            self.bytes.len() + new_xml.len(),
        )));

        for i in 0..archive.len() {
            let entry = archive.by_index_raw(i).map_err(archive_err)?;
            if entry.name() == self.main_part {
                let options = SimpleFileOptions::default().compression_method(entry.compression());
                drop(entry);
                writer
                    .start_file(self.main_part.as_str(), options)
                    .map_err(archive_err)?;
                writer
                    .write_all(new_xml.as_bytes())
                    .map_err(|e| DocMergeError::Archive(e.to_string()))?;
            } else {
                writer.raw_copy_file(entry).map_err(archive_err)?;
            }
        }

        let out = writer.finish().map_err(archive_err)?.into_inner();
        debug!(size = out.len(), "package rewritten");
        Ok(out)
    }
}

/// Find the main-body part through the package relationships, falling back
/// to the conventional path.
fn resolve_main_part<R: Read + std::io::Seek>(archive: &mut ZipArchive<R>) -> Result<String> {
    let rels = match archive.by_name(ROOT_RELS_PART) {
        Ok(mut entry) => {
            let mut text = String::new();
            entry.read_to_string(&mut text).map_err(|e| {
                DocMergeError::malformed_package(format!("{ROOT_RELS_PART} is unreadable: {e}"))
            })?;
            Some(text)
        }
        Err(_) => None,
    };

    let target = rels.as_deref().and_then(office_document_target);
    match target {
        Some(target) => Ok(target),
        None => {
            if rels.is_some() {
                warn!("no officeDocument relationship, assuming {DEFAULT_MAIN_PART}");
            }
            Ok(DEFAULT_MAIN_PART.to_string())
        }
    }
}

/// Target of the `officeDocument` relationship, as an archive path.
fn office_document_target(rels: &str) -> Option<String> {
    RELATIONSHIP_RE
        .find_iter(rels)
        .map(|m| m.as_str())
        .find(|tag| attr_value(tag, "Type").is_some_and(|t| t.ends_with(OFFICE_DOCUMENT_REL)))
        .and_then(|tag| attr_value(tag, "Target"))
        .map(|target| target.trim_start_matches('/').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const RELS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId2" Type="http://schemas.openxmlformats.org/package/2006/relationships/metadata/core-properties" Target="docProps/core.xml"/><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="/word/main.xml"/></Relationships>"#;

    fn build(parts: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, body) in parts {
            writer
                .start_file(*name, SimpleFileOptions::default())
                .unwrap();
            writer.write_all(body.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn relationship_target_resolved() {
        assert_eq!(office_document_target(RELS).as_deref(), Some("word/main.xml"));
        assert_eq!(office_document_target("<Relationships/>"), None);
    }

    #[test]
    fn opens_main_part_named_by_relationships() {
        let bytes = build(&[
            (ROOT_RELS_PART, RELS),
            ("word/main.xml", "<w:document/>"),
        ]);
        let pkg = DocxPackage::open(bytes).unwrap();
        assert_eq!(pkg.main_part_name(), "word/main.xml");
        assert_eq!(pkg.main_xml(), "<w:document/>");
    }

    #[test]
    fn falls_back_to_conventional_path() {
        let bytes = build(&[(DEFAULT_MAIN_PART, "<w:document/>")]);
        let pkg = DocxPackage::open(bytes).unwrap();
        assert_eq!(pkg.main_part_name(), DEFAULT_MAIN_PART);
    }

    #[test]
    fn missing_main_part_is_malformed() {
        let bytes = build(&[("word/styles.xml", "<w:styles/>")]);
        let err = DocxPackage::open(bytes).unwrap_err();
        assert!(matches!(err, DocMergeError::MalformedPackage { .. }));
    }

    #[test]
    fn garbage_is_malformed() {
        let err = DocxPackage::open(b"not a zip".to_vec()).unwrap_err();
        assert!(matches!(err, DocMergeError::MalformedPackage { .. }));
    }

    #[test]
    fn repackage_replaces_only_main_part() {
        let bytes = build(&[
            ("[Content_Types].xml", "<Types/>"),
            (DEFAULT_MAIN_PART, "<w:document>old</w:document>"),
            ("word/styles.xml", "<w:styles/>"),
        ]);
        let pkg = DocxPackage::open(bytes).unwrap();
        let out = pkg.repackage("<w:document>new</w:document>").unwrap();

        let mut archive = ZipArchive::new(Cursor::new(out)).unwrap();
        let names: Vec<String> = archive.file_names().map(String::from).collect();
        assert_eq!(names.len(), 3);

        let mut read = |name: &str| {
            let mut s = String::new();
            archive.by_name(name).unwrap().read_to_string(&mut s).unwrap();
            s
        };
        assert_eq!(read(DEFAULT_MAIN_PART), "<w:document>new</w:document>");
        assert_eq!(read("word/styles.xml"), "<w:styles/>");
        assert_eq!(read("[Content_Types].xml"), "<Types/>");
    }
}
