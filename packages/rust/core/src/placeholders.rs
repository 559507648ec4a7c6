//! Placeholder resolution and substitution.
//!
//! Three template conventions are recognized: `{{name}}`, `<<name>>` (stored
//! in the markup as `&lt;&lt;name&gt;&gt;`), and bare names with no
//! delimiters. Values handed to [`substitute`] are already escaped.

use std::collections::{BTreeSet, HashMap};
use std::sync::LazyLock;

use regex::{Captures, Regex};
use tracing::debug;

use docmerge_shared::{AliasConfig, DocMergeError, Record, Result, SharedContext};

use crate::format::{FormatOptions, escape_markup, render_field, render_value};

/// Longest placeholder name accepted when rejoining split tokens.
const MAX_NAME_LEN: usize = 100;

static BRACES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([^{}<>]+?)\s*\}\}").expect("valid regex"));

static ANGLES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&lt;&lt;\s*([^&<>]+?)\s*&gt;&gt;").expect("valid regex"));

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("valid regex"));

/// Entity or character reference in character data.
const REFERENCE: &str = r"&(?:#[0-9]+|#x[0-9A-Fa-f]+|[A-Za-z][A-Za-z0-9]*);";

// ---------------------------------------------------------------------------
// Convention
// ---------------------------------------------------------------------------

/// How placeholders are written in a template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderConvention {
    /// `{{name}}`
    Braces,
    /// `<<name>>`, escaped in the markup.
    Angles,
    /// The bare field name.
    Bare,
}

impl PlaceholderConvention {
    /// Probe markup for a delimiter convention; bare names when neither
    /// delimiter appears.
    pub fn detect(xml: &str) -> Self {
        if xml.contains("{{") {
            Self::Braces
        } else if xml.contains("&lt;&lt;") {
            Self::Angles
        } else {
            Self::Bare
        }
    }

    /// Opening and closing delimiter as they appear in the markup.
    pub fn delimiters(&self) -> Option<(&'static str, &'static str)> {
        match self {
            Self::Braces => Some(("{{", "}}")),
            Self::Angles => Some(("&lt;&lt;", "&gt;&gt;")),
            Self::Bare => None,
        }
    }

    fn token_regex(&self) -> Option<&'static Regex> {
        match self {
            Self::Braces => Some(&*BRACES_RE),
            Self::Angles => Some(&*ANGLES_RE),
            Self::Bare => None,
        }
    }
}

impl std::fmt::Display for PlaceholderConvention {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Braces => "{{name}}",
            Self::Angles => "<<name>>",
            Self::Bare => "bare names",
        })
    }
}

// ---------------------------------------------------------------------------
// Substitution table
// ---------------------------------------------------------------------------

/// Resolved placeholder values for one copy.
///
/// Structural (alias) entries take precedence over ordinary entries with the
/// same name.
#[derive(Debug, Clone, Default)]
pub struct Substitutions {
    special: Vec<(String, String)>,
    ordinary: Vec<(String, String)>,
}

impl Substitutions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a structural placeholder.
    pub fn special(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        upsert(&mut self.special, name.into(), value.into());
        self
    }

    /// Add an ordinary placeholder.
    pub fn ordinary(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        upsert(&mut self.ordinary, name.into(), value.into());
        self
    }

    /// Merge shared context and one record into a substitution table.
    ///
    /// Record fields override shared values except for reserved shared keys.
    /// Aliases read their source from the record first, then the shared
    /// context; a missing source renders empty.
    pub fn resolve(
        record: &Record,
        shared: &SharedContext,
        aliases: &[AliasConfig],
        format: &FormatOptions,
    ) -> Self {
        let mut ordinary = Vec::new();

        for (name, value) in shared.iter() {
            upsert(&mut ordinary, name.to_string(), render_field(name, value, format));
        }

        for (name, value) in record.iter() {
            if shared.is_reserved(name) && shared.get(name).is_some() {
                debug!(field = name, "record field shadowed by reserved shared key");
                continue;
            }
            upsert(&mut ordinary, name.to_string(), render_field(name, value, format));
        }

        let special = aliases
            .iter()
            .map(|alias| {
                let value = record
                    .get(&alias.source)
                    .or_else(|| shared.get(&alias.source))
                    .map(|v| {
                        let date = alias.format.or_else(|| format.date_format_for(&alias.source));
                        render_value(v, date, format)
                    })
                    .unwrap_or_default();
                (alias.name.clone(), value)
            })
            .collect();

        Self { special, ordinary }
    }

    /// Look up a placeholder, structural entries first.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.special
            .iter()
            .chain(self.ordinary.iter())
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Substitution order: structural entries as declared, then ordinary
    /// entries longest name first (ties by name).
    pub fn ordered(&self) -> Vec<(&str, &str)> {
        let mut ordinary: Vec<(&str, &str)> = self
            .ordinary
            .iter()
            .filter(|(k, _)| !self.special.iter().any(|(s, _)| s == k))
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        ordinary.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(b.0)));

        self.special
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .chain(ordinary)
            .collect()
    }
}

fn upsert(entries: &mut Vec<(String, String)>, name: String, value: String) {
    match entries.iter_mut().find(|(k, _)| *k == name) {
        Some(slot) => slot.1 = value,
        None => entries.push((name, value)),
    }
}

// ---------------------------------------------------------------------------
// Substitution
// ---------------------------------------------------------------------------

/// Replace every placeholder in `fragment`.
///
/// Delimited conventions are resolved in a single pass: each token is looked
/// up, and tokens with no value become empty. Substituted values are never
/// rescanned.
///
/// Bare names are matched only in character data, longest name first, so
/// `klasse` is never read as `kl` followed by `asse`. A structural entry
/// only outranks an ordinary entry of the exact same name; a longer ordinary
/// name still wins over a structural name that is its prefix. Names are
/// compared in their escaped form and never inside an entity reference, so
/// a field `Name & Co` matches `Name &amp; Co` and a field `amp` leaves
/// `&amp;` alone.
pub fn substitute(
    fragment: &str,
    subs: &Substitutions,
    convention: PlaceholderConvention,
) -> Result<String> {
    match convention.token_regex() {
        Some(re) => Ok(re
            .replace_all(fragment, |caps: &Captures<'_>| {
                subs.get(caps[1].trim()).unwrap_or_default().to_string()
            })
            .into_owned()),
        None => substitute_bare(fragment, subs),
    }
}

fn substitute_bare(fragment: &str, subs: &Substitutions) -> Result<String> {
    // Markup form of each name -> value. Quotes may appear literally or
    // escaped in character data, so both spellings are accepted.
    let mut forms: HashMap<String, &str> = HashMap::new();
    for (name, value) in subs.ordered() {
        if name.is_empty() {
            continue;
        }
        forms.entry(escape_text(name)).or_insert(value);
        forms.entry(escape_markup(name)).or_insert(value);
    }
    if forms.is_empty() {
        return Ok(fragment.to_string());
    }

    let mut names: Vec<&str> = forms.keys().map(String::as_str).collect();
    names.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    let alternation = names
        .iter()
        .map(|name| regex::escape(name))
        .collect::<Vec<_>>()
        .join("|");
    // A reference starting at the same offset as a name loses; one starting
    // earlier is consumed whole, so names never match inside it.
    let re = Regex::new(&format!("({alternation})|{REFERENCE}"))
        .map_err(|e| DocMergeError::validation(format!("placeholder pattern: {e}")))?;

    let replace_text = |text: &str| {
        re.replace_all(text, |caps: &Captures<'_>| match caps.get(1) {
            Some(name) => forms.get(name.as_str()).copied().unwrap_or_default().to_string(),
            None => caps[0].to_string(),
        })
        .into_owned()
    };

    let mut out = String::with_capacity(fragment.len());
    let mut cursor = 0;
    for tag in TAG_RE.find_iter(fragment) {
        out.push_str(&replace_text(&fragment[cursor..tag.start()]));
        out.push_str(tag.as_str());
        cursor = tag.end();
    }
    out.push_str(&replace_text(&fragment[cursor..]));

    Ok(out)
}

/// Escape what character data must escape: `& < >`.
fn escape_text(name: &str) -> String {
    name.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

/// Placeholder names present in a fragment, in order of first appearance.
///
/// Bare-name templates carry no syntax to scan for and yield nothing.
pub fn scan_placeholders(fragment: &str, convention: PlaceholderConvention) -> Vec<String> {
    let Some(re) = convention.token_regex() else {
        return Vec::new();
    };

    let mut seen = BTreeSet::new();
    re.captures_iter(fragment)
        .map(|caps| caps[1].trim().to_string())
        .filter(|name| seen.insert(name.clone()))
        .collect()
}

/// Rejoin placeholder tokens that Word split across several runs.
///
/// `<w:t>{{Vor</w:t></w:r><w:r><w:t>name}}</w:t>` becomes
/// `<w:t>{{Vorname}}</w:t>`. Only spans whose intervening tags are balanced
/// and stay within one paragraph are rewritten.
pub fn collapse_split_tokens(fragment: &str, convention: PlaceholderConvention) -> String {
    let Some((open, close)) = convention.delimiters() else {
        return fragment.to_string();
    };

    // Character data with each byte's offset in the markup.
    let mut text = String::new();
    let mut offsets: Vec<usize> = Vec::new();
    let mut in_tag = false;
    for (idx, ch) in fragment.char_indices() {
        if ch == '<' {
            in_tag = true;
        }
        if !in_tag {
            text.push(ch);
            offsets.extend(idx..idx + ch.len_utf8());
        }
        if ch == '>' {
            in_tag = false;
        }
    }

    let mut out = String::with_capacity(fragment.len());
    let mut cursor = 0;
    let mut search = 0;

    while let Some(found) = text[search..].find(open) {
        let token_start = search + found;
        let inner_start = token_start + open.len();
        let Some(inner_len) = text[inner_start..].find(close) else {
            break;
        };
        let token_end = inner_start + inner_len + close.len();
        let inner = &text[inner_start..inner_start + inner_len];

        if inner.contains(open) || inner.len() > MAX_NAME_LEN {
            search = inner_start;
            continue;
        }

        let span_start = offsets[token_start];
        let span_end = offsets[token_end - 1] + 1;
        let span = &fragment[span_start..span_end];

        if span.contains('<') && tags_collapsible(span) {
            out.push_str(&fragment[cursor..span_start]);
            out.push_str(&text[token_start..token_end]);
            cursor = span_end;
        }
        search = token_end;
    }

    out.push_str(&fragment[cursor..]);
    out
}

/// Whether the tags inside a token span can be dropped without unbalancing
/// the markup or merging paragraphs.
fn tags_collapsible(span: &str) -> bool {
    let mut depth: i64 = 0;
    for tag in TAG_RE.find_iter(span) {
        let tag = tag.as_str();
        let name = tag
            .trim_start_matches('<')
            .trim_start_matches('/')
            .split(|c: char| c.is_whitespace() || c == '>' || c == '/')
            .next()
            .unwrap_or_default();
        if name == "w:p" || name == "w:tc" || name == "w:tr" {
            return false;
        }
        if tag.starts_with("</") {
            depth -= 1;
        } else if !tag.ends_with("/>") && !tag.starts_with("<?") && !tag.starts_with("<!") {
            depth += 1;
        }
    }
    depth == 0
}
