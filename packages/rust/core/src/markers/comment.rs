//! XML comment markers: `<!-- SectionStart -->` ... `<!-- SectionEnd -->`.

use regex::Regex;

use docmerge_shared::{DocMergeError, MarkerNames, Result};

use super::MarkerStrategy;

/// Paired inline comments.
pub struct CommentMarkers;

impl CommentMarkers {
    fn pattern(name: &str) -> Result<Regex> {
        Regex::new(&format!(r"<!--\s*{}\s*-->", regex::escape(name)))
            .map_err(|e| DocMergeError::config(format!("invalid marker name '{name}': {e}")))
    }
}

impl MarkerStrategy for CommentMarkers {
    fn detect(&self, xml: &str, names: &MarkerNames) -> bool {
        [&names.start, &names.end]
            .into_iter()
            .any(|name| Self::pattern(name).is_ok_and(|re| re.is_match(xml)))
    }

    fn region(&self, xml: &str, names: &MarkerNames) -> Result<(usize, usize)> {
        let start = Self::pattern(&names.start)?
            .find(xml)
            .ok_or_else(|| DocMergeError::marker_not_found(&names.start))?;

        let end = Self::pattern(&names.end)?
            .find_at(xml, start.end())
            .ok_or_else(|| DocMergeError::marker_not_found(&names.end))?;

        Ok((start.end(), end.start()))
    }

    fn strip(&self, fragment: &str, names: &MarkerNames) -> String {
        let mut out = fragment.to_string();
        for name in [&names.start, &names.end] {
            if let Ok(re) = Self::pattern(name) {
                out = re.replace_all(&out, "").into_owned();
            }
        }
        out
    }

    fn name(&self) -> &'static str {
        "comment"
    }
}
