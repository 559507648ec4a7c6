//! Section marker strategies and the locator that picks one by probing.
//!
//! A strategy finds the byte range of the repeatable region in the raw
//! main-body markup. Strategies are tried in priority order; whole-body is
//! the always-last fallback for templates without explicit markers.

mod bookmark;
mod comment;
mod whole_body;

use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, instrument};

use docmerge_shared::{DocMergeError, MarkerNames, Result};

pub use bookmark::BookmarkMarkers;
pub use comment::CommentMarkers;
pub use whole_body::WholeBodyMarkers;

// ---------------------------------------------------------------------------
// Location
// ---------------------------------------------------------------------------

/// Where a break between two copies lands, structurally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakContext {
    /// Between paragraphs/tables: breaks are whole paragraphs.
    Block,
    /// Inside a paragraph: breaks are runs.
    Inline,
}

/// The located repeatable region of a main-body part.
#[derive(Debug, Clone)]
pub struct MarkerLocation {
    /// Name of the strategy that matched.
    pub strategy: &'static str,
    /// Byte offset where the region starts (start marker excluded).
    pub region_start: usize,
    /// Byte offset where the region ends (end marker excluded).
    pub region_end: usize,
    /// The region minus trailing boilerplate and residual marker tags;
    /// copied once per record.
    pub template: String,
    /// Closing structure (body-level section properties) re-emitted once
    /// after all copies.
    pub trailing_boilerplate: String,
    /// The document's body-level `w:sectPr`, wherever the region is.
    pub section_properties: String,
    pub break_context: BreakContext,
}

impl MarkerLocation {
    fn new(
        strategy: &'static str,
        xml: &str,
        region_start: usize,
        region_end: usize,
        names: &MarkerNames,
    ) -> Self {
        let region = &xml[region_start..region_end];
        let (body, trailing) = split_trailing_section(region);

        Self {
            strategy,
            region_start,
            region_end,
            template: strip_marker_tags(body, names),
            trailing_boilerplate: trailing.to_string(),
            section_properties: body_section_properties(xml).trim().to_string(),
            break_context: break_context_at(xml, region_start),
        }
    }
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// One marking convention for the repeatable region.
pub trait MarkerStrategy: Send + Sync {
    /// Whether the markup uses this convention for the given marker names.
    fn detect(&self, xml: &str, names: &MarkerNames) -> bool;

    /// Byte range strictly between the start marker and the end marker.
    fn region(&self, xml: &str, names: &MarkerNames) -> Result<(usize, usize)>;

    /// Remove this convention's marker tags from a fragment.
    fn strip(&self, fragment: &str, names: &MarkerNames) -> String;

    /// Human-readable strategy name for tracing.
    fn name(&self) -> &'static str;
}

// ---------------------------------------------------------------------------
// Locator
// ---------------------------------------------------------------------------

/// Holds marker strategies in priority order.
pub struct MarkerLocator {
    strategies: Vec<Box<dyn MarkerStrategy>>,
}

impl MarkerLocator {
    /// Create a locator with all built-in strategies (explicit markers first,
    /// whole body last).
    pub fn new() -> Self {
        Self {
            strategies: vec![
                Box::new(BookmarkMarkers),
                Box::new(CommentMarkers),
                Box::new(WholeBodyMarkers),
            ],
        }
    }

    /// The first strategy that recognizes the markup.
    pub fn detect(&self, xml: &str, names: &MarkerNames) -> Option<&dyn MarkerStrategy> {
        self.strategies
            .iter()
            .find(|s| s.detect(xml, names))
            .map(|s| s.as_ref())
    }

    /// Locate the repeatable region.
    #[instrument(skip_all, fields(start = %names.start, end = %names.end))]
    pub fn locate(&self, xml: &str, names: &MarkerNames) -> Result<MarkerLocation> {
        let strategy = self
            .detect(xml, names)
            .ok_or_else(|| DocMergeError::marker_not_found(&names.start))?;

        let (start, end) = strategy.region(xml, names)?;
        let location = MarkerLocation::new(strategy.name(), xml, start, end, names);

        debug!(
            strategy = strategy.name(),
            region_start = start,
            region_end = end,
            template_len = location.template.len(),
            trailing = !location.trailing_boilerplate.is_empty(),
            context = ?location.break_context,
            "located repeatable region"
        );

        Ok(location)
    }
}

impl Default for MarkerLocator {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Strip every known marker convention's tags for the given names.
pub fn strip_marker_tags(fragment: &str, names: &MarkerNames) -> String {
    let stripped = BookmarkMarkers.strip(fragment, names);
    CommentMarkers.strip(&stripped, names)
}

/// Split a body-level `w:sectPr` block off the end of a region.
///
/// Returns `(content, trailing)`; `trailing` is empty when the region does not
/// end in section properties.
pub(crate) fn split_trailing_section(region: &str) -> (&str, &str) {
    static SECT_PR_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"<w:sectPr[\s>/]").expect("valid regex"));

    if !region.trim_end().ends_with("</w:sectPr>") {
        return (region, "");
    }

    // Section properties inside a paragraph are followed by `</w:pPr>`; the
    // body-level block is the first candidate whose tail has none.
    for m in SECT_PR_RE.find_iter(region) {
        let tail = &region[m.start()..];
        if !tail.contains("</w:pPr>") {
            return (&region[..m.start()], tail);
        }
    }

    (region, "")
}

/// The last, body-level `w:sectPr` block of a main body; empty if none.
pub(crate) fn body_section_properties(xml: &str) -> &str {
    let body_end = xml.rfind("</w:body>").unwrap_or(xml.len());
    split_trailing_section(&xml[..body_end]).1
}

/// Whether `offset` sits inside an open `w:p` element.
pub(crate) fn break_context_at(xml: &str, offset: usize) -> BreakContext {
    static PARA_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"<(/?)w:p(?:\s[^>]*)?>").expect("valid regex"));

    let mut depth: i64 = 0;
    for caps in PARA_RE.captures_iter(&xml[..offset]) {
        let tag = &caps[0];
        if &caps[1] == "/" {
            depth -= 1;
        } else if !tag.ends_with("/>") {
            depth += 1;
        }
    }

    if depth > 0 {
        BreakContext::Inline
    } else {
        BreakContext::Block
    }
}

/// Value of an attribute within a single start tag.
pub(crate) fn attr_value<'a>(tag: &'a str, name: &str) -> Option<&'a str> {
    let needle = format!("{name}=\"");
    let mut from = 0;
    while let Some(pos) = tag[from..].find(&needle) {
        let at = from + pos;
        let preceded_by_space = tag[..at]
            .chars()
            .next_back()
            .is_some_and(char::is_whitespace);
        let value_start = at + needle.len();
        if preceded_by_space {
            let value_end = tag[value_start..].find('"')? + value_start;
            return Some(&tag[value_start..value_end]);
        }
        from = value_start;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names() -> MarkerNames {
        MarkerNames::default()
    }

    const BODY_SECT: &str = r#"<w:sectPr><w:headerReference w:type="default" r:id="rId1"/><w:pgSz w:w="11906" w:h="16838"/></w:sectPr>"#;

    #[test]
    fn attr_value_requires_word_boundary() {
        let tag = r#"<w:bookmarkStart w:id="3" w:name="SectionStart"/>"#;
        assert_eq!(attr_value(tag, "w:id"), Some("3"));
        assert_eq!(attr_value(tag, "w:name"), Some("SectionStart"));
        assert_eq!(attr_value(r#"<x xw:id="9"/>"#, "w:id"), None);
    }

    #[test]
    fn trailing_section_split_off() {
        let region = format!("<w:p><w:r><w:t>A</w:t></w:r></w:p>{BODY_SECT}\n");
        let (content, trailing) = split_trailing_section(&region);
        assert_eq!(content, "<w:p><w:r><w:t>A</w:t></w:r></w:p>");
        assert!(trailing.starts_with("<w:sectPr>"));
    }

    #[test]
    fn paragraph_section_properties_stay_in_content() {
        let region = format!("<w:p><w:pPr>{BODY_SECT}</w:pPr></w:p><w:p/>{BODY_SECT}");
        let (content, trailing) = split_trailing_section(&region);
        assert!(content.ends_with("<w:p/>"));
        assert_eq!(trailing, BODY_SECT);

        let (content, trailing) = split_trailing_section("<w:p/>");
        assert_eq!(content, "<w:p/>");
        assert!(trailing.is_empty());
    }

    #[test]
    fn body_section_properties_found_outside_region() {
        let xml = format!(
            "<w:body><w:p><w:pPr><w:sectPr/></w:pPr></w:p><!--SectionStart--><w:p/><!--SectionEnd-->{BODY_SECT}</w:body>"
        );
        assert_eq!(body_section_properties(&xml), BODY_SECT);
        let loc = MarkerLocator::new().locate(&xml, &names()).unwrap();
        assert_eq!(loc.strategy, "comment");
        assert!(loc.trailing_boilerplate.is_empty());
        assert_eq!(loc.section_properties, BODY_SECT);
        assert_eq!(body_section_properties("<w:body><w:p/></w:body>"), "");
    }

    #[test]
    fn break_context_tracks_paragraph_depth() {
        let xml = r#"<w:body><w:p w:rsidR="1"><w:r/></w:p><w:p><w:r/>"#;
        assert_eq!(break_context_at(xml, 8), BreakContext::Block);
        assert_eq!(break_context_at(xml, xml.len()), BreakContext::Inline);
        assert_eq!(break_context_at("<w:body><w:p/>", 14), BreakContext::Block);
        // `w:pPr` must not count as a paragraph.
        assert_eq!(break_context_at("<w:pPr></w:pPr>", 15), BreakContext::Block);
    }

    #[test]
    fn locator_falls_back_to_whole_body() {
        let xml = format!(
            r#"<w:document><w:body><w:p><w:r><w:t>{{{{Name}}}}</w:t></w:r></w:p>{BODY_SECT}</w:body></w:document>"#
        );
        let loc = MarkerLocator::new().locate(&xml, &names()).unwrap();
        assert_eq!(loc.strategy, "whole-body");
        assert_eq!(loc.template, "<w:p><w:r><w:t>{{Name}}</w:t></w:r></w:p>");
        assert_eq!(loc.trailing_boilerplate, BODY_SECT);
        assert_eq!(loc.break_context, BreakContext::Block);
        assert_eq!(&xml[loc.region_end..], "</w:body></w:document>");
    }

    #[test]
    fn locator_fails_without_body_or_markers() {
        let err = MarkerLocator::new()
            .locate("<root/>", &names())
            .unwrap_err();
        assert!(matches!(err, DocMergeError::MarkerNotFound { .. }));
    }

    #[test]
    fn strip_removes_all_conventions() {
        let fragment = r#"<!-- SectionEnd --><w:bookmarkStart w:id="7" w:name="SectionStart"/><w:p/><w:bookmarkEnd w:id="7"/><w:bookmarkStart w:id="8" w:name="Other"/>"#;
        let stripped = strip_marker_tags(fragment, &names());
        assert_eq!(stripped, r#"<w:p/><w:bookmarkStart w:id="8" w:name="Other"/>"#);
    }
}
