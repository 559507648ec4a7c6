//! Whole-body fallback: the entire printable body is the repeatable region.
//!
//! Used when a template carries no explicit markers. The body's own section
//! properties end up as trailing boilerplate.

use std::sync::LazyLock;

use regex::Regex;

use docmerge_shared::{DocMergeError, MarkerNames, Result};

use super::MarkerStrategy;

static BODY_OPEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<w:body(?:\s[^>]*)?>").expect("valid regex"));

const BODY_CLOSE: &str = "</w:body>";

/// Degenerate single-marker mode over `w:body`.
pub struct WholeBodyMarkers;

impl MarkerStrategy for WholeBodyMarkers {
    fn detect(&self, xml: &str, _names: &MarkerNames) -> bool {
        BODY_OPEN_RE.is_match(xml)
    }

    fn region(&self, xml: &str, _names: &MarkerNames) -> Result<(usize, usize)> {
        let open = BODY_OPEN_RE
            .find(xml)
            .ok_or_else(|| DocMergeError::marker_not_found("w:body"))?;

        match xml.rfind(BODY_CLOSE) {
            Some(close) if close >= open.end() => Ok((open.end(), close)),
            _ => Err(DocMergeError::marker_not_found(BODY_CLOSE)),
        }
    }

    fn strip(&self, fragment: &str, _names: &MarkerNames) -> String {
        fragment.to_string()
    }

    fn name(&self) -> &'static str {
        "whole-body"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_is_body_content() {
        let xml = r#"<w:document><w:body w:x="1"><w:p/></w:body></w:document>"#;
        let (start, end) = WholeBodyMarkers
            .region(xml, &MarkerNames::default())
            .unwrap();
        assert_eq!(&xml[start..end], "<w:p/>");
    }

    #[test]
    fn unclosed_body_is_not_found() {
        let xml = "<w:document><w:body><w:p/>";
        assert!(WholeBodyMarkers.detect(xml, &MarkerNames::default()));
        assert!(
            WholeBodyMarkers
                .region(xml, &MarkerNames::default())
                .is_err()
        );
    }
}
