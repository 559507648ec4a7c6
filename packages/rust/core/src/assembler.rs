//! Main-body assembler.
//!
//! Splices replicated content back into the original markup and checks the
//! result is well-formed before it is packaged.

use quick_xml::Reader;
use quick_xml::events::Event;
use tracing::{debug, instrument};

use docmerge_shared::{DocMergeError, Result};

use crate::markers::MarkerLocation;

/// Replace the located region with `replicated` plus the trailing
/// boilerplate. Bytes outside the region are untouched:
///
/// ```text
/// xml[..region_start] + replicated + trailing_boilerplate + xml[region_end..]
/// ```
#[instrument(
    skip_all,
    fields(region_start = location.region_start, region_end = location.region_end)
)]
pub fn splice(xml: &str, location: &MarkerLocation, replicated: &str) -> Result<String> {
    let (start, end) = (location.region_start, location.region_end);
    if start > end || end > xml.len() || !xml.is_char_boundary(start) || !xml.is_char_boundary(end)
    {
        return Err(DocMergeError::structural(format!(
            "region {start}..{end} does not fit a body of {} bytes",
            xml.len()
        )));
    }

    let trailing = &location.trailing_boilerplate;
    let mut out =
        String::with_capacity(xml.len() - (end - start) + replicated.len() + trailing.len());
    out.push_str(&xml[..start]);
    out.push_str(replicated);
    out.push_str(trailing);
    out.push_str(&xml[end..]);

    debug!(before = xml.len(), after = out.len(), "main body spliced");
    Ok(out)
}

/// Check that `xml` is a well-formed document: tags nest and match, every
/// opened element is closed, and all entity references resolve.
pub fn validate_well_formed(xml: &str) -> Result<()> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().check_end_names = true;

    let mut depth: usize = 0;
    let mut roots: usize = 0;

    loop {
        let event = reader.read_event().map_err(|e| {
            DocMergeError::structural(format!("at byte {}: {e}", reader.error_position()))
        })?;

        match event {
            Event::Start(_) => {
                if depth == 0 {
                    roots += 1;
                }
                depth += 1;
            }
            Event::End(_) => {
                depth = depth.checked_sub(1).ok_or_else(|| {
                    DocMergeError::structural(format!(
                        "unmatched end tag at byte {}",
                        reader.buffer_position()
                    ))
                })?;
            }
            Event::Empty(_) if depth == 0 => roots += 1,
            Event::Text(text) => {
                text.unescape().map_err(|e| {
                    DocMergeError::structural(format!(
                        "bad character data near byte {}: {e}",
                        reader.buffer_position()
                    ))
                })?;
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if depth != 0 {
        return Err(DocMergeError::structural(format!(
            "{depth} element(s) left open at end of document"
        )));
    }
    if roots != 1 {
        return Err(DocMergeError::structural(format!(
            "expected one root element, found {roots}"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markers::BreakContext;

    fn location(start: usize, end: usize, trailing: &str) -> MarkerLocation {
        MarkerLocation {
            strategy: "test",
            region_start: start,
            region_end: end,
            template: String::new(),
            trailing_boilerplate: trailing.to_string(),
            section_properties: String::new(),
            break_context: BreakContext::Block,
        }
    }

    #[test]
    fn splice_replaces_only_region() {
        let xml = "<a>HEAD[region]TAIL</a>";
        let start = xml.find('[').unwrap();
        let end = xml.find(']').unwrap() + 1;
        let out = splice(xml, &location(start, end, "<s/>"), "XY").unwrap();
        assert_eq!(out, "<a>HEADXY<s/>TAIL</a>");
    }

    #[test]
    fn splice_rejects_out_of_range() {
        let err = splice("<a/>", &location(2, 10, ""), "").unwrap_err();
        assert!(matches!(err, DocMergeError::StructuralValidation { .. }));
    }

    #[test]
    fn well_formed_document_passes() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="x"><w:body><w:p><w:r><w:t>A &amp; B &lt;c&gt;</w:t></w:r></w:p><w:sectPr/></w:body></w:document>"#;
        validate_well_formed(xml).unwrap();
    }

    #[test]
    fn mismatched_tags_fail() {
        let err = validate_well_formed("<a><b></a></b>").unwrap_err();
        assert!(matches!(err, DocMergeError::StructuralValidation { .. }));
    }

    #[test]
    fn unclosed_element_fails() {
        assert!(validate_well_formed("<a><b></b>").is_err());
    }

    #[test]
    fn raw_ampersand_fails() {
        assert!(validate_well_formed("<a>Tom & Jerry</a>").is_err());
    }

    #[test]
    fn second_root_fails() {
        assert!(validate_well_formed("<a/><b/>").is_err());
    }
}
