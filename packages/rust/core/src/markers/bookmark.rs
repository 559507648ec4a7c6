//! Word bookmark markers.
//!
//! The section is delimited by two named bookmarks. Each bookmark is a
//! `w:bookmarkStart` carrying the name and a `w:bookmarkEnd` paired with it
//! through `w:id`:
//!
//! ```xml
//! <w:bookmarkStart w:id="0" w:name="SectionStart"/><w:bookmarkEnd w:id="0"/>
//! ... repeatable region ...
//! <w:bookmarkStart w:id="1" w:name="SectionEnd"/><w:bookmarkEnd w:id="1"/>
//! ```

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

use docmerge_shared::{DocMergeError, MarkerNames, Result};

use super::{MarkerStrategy, attr_value};

static START_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<w:bookmarkStart\b[^>]*>").expect("valid regex"));

static END_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<w:bookmarkEnd\b[^>]*>").expect("valid regex"));

/// A `w:bookmarkStart` tag found in the markup.
struct BookmarkTag<'a> {
    start: usize,
    end: usize,
    id: Option<&'a str>,
}

/// Paired named bookmarks.
pub struct BookmarkMarkers;

impl BookmarkMarkers {
    fn find_start<'a>(xml: &'a str, name: &str, from: usize) -> Option<BookmarkTag<'a>> {
        START_RE
            .find_iter(&xml[from..])
            .find(|m| attr_value(m.as_str(), "w:name") == Some(name))
            .map(|m| BookmarkTag {
                start: from + m.start(),
                end: from + m.end(),
                id: attr_value(m.as_str(), "w:id"),
            })
    }

    fn find_end(xml: &str, id: &str, from: usize) -> Option<(usize, usize)> {
        END_RE
            .find_iter(&xml[from..])
            .find(|m| attr_value(m.as_str(), "w:id") == Some(id))
            .map(|m| (from + m.start(), from + m.end()))
    }
}

impl MarkerStrategy for BookmarkMarkers {
    fn detect(&self, xml: &str, names: &MarkerNames) -> bool {
        Self::find_start(xml, &names.start, 0).is_some()
            || Self::find_start(xml, &names.end, 0).is_some()
    }

    fn region(&self, xml: &str, names: &MarkerNames) -> Result<(usize, usize)> {
        let start = Self::find_start(xml, &names.start, 0)
            .ok_or_else(|| DocMergeError::marker_not_found(&names.start))?;

        let missing_end =
            || DocMergeError::marker_not_found(format!("{} (bookmark end)", names.start));
        let id = start.id.ok_or_else(missing_end)?;
        let (_, region_start) = Self::find_end(xml, id, start.end).ok_or_else(missing_end)?;

        let end = Self::find_start(xml, &names.end, region_start)
            .ok_or_else(|| DocMergeError::marker_not_found(&names.end))?;

        Ok((region_start, end.start))
    }

    fn strip(&self, fragment: &str, names: &MarkerNames) -> String {
        let mut ids = BTreeSet::new();
        let without_starts = START_RE.replace_all(fragment, |caps: &regex::Captures<'_>| {
            let tag = &caps[0];
            match attr_value(tag, "w:name") {
                Some(n) if n == names.start || n == names.end => {
                    if let Some(id) = attr_value(tag, "w:id") {
                        ids.insert(id.to_string());
                    }
                    String::new()
                }
                _ => tag.to_string(),
            }
        });

        if ids.is_empty() {
            return without_starts.into_owned();
        }

        END_RE
            .replace_all(&without_starts, |caps: &regex::Captures<'_>| {
                let tag = &caps[0];
                match attr_value(tag, "w:id") {
                    Some(id) if ids.contains(id) => String::new(),
                    _ => tag.to_string(),
                }
            })
            .into_owned()
    }

    fn name(&self) -> &'static str {
        "bookmark"
    }
}
