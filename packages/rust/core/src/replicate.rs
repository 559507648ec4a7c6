//! Section replication: one populated copy of the region per record.

use tracing::{debug, instrument};

use docmerge_shared::{AliasConfig, BreakKind, Record, Result, SharedContext};

use crate::format::FormatOptions;
use crate::markers::{BreakContext, MarkerLocation};
use crate::placeholders::{PlaceholderConvention, Substitutions, collapse_split_tokens, substitute};

const PAGE_BREAK_RUN: &str = r#"<w:r><w:br w:type="page"/></w:r>"#;

/// Markup placed between two consecutive copies.
///
/// `section_properties` is the document's body-level `w:sectPr` block; a
/// section break repeats it so every copy keeps its headers and footers.
/// Without it, or inside a paragraph, a section break degrades to a page
/// break.
pub fn break_markup(kind: BreakKind, context: BreakContext, section_properties: &str) -> String {
    let section_properties = section_properties.trim();
    match (kind, context) {
        (BreakKind::None, _) => String::new(),
        (BreakKind::Section, BreakContext::Block) if !section_properties.is_empty() => {
            format!("<w:p><w:pPr>{section_properties}</w:pPr></w:p>")
        }
        (_, BreakContext::Block) => format!("<w:p>{PAGE_BREAK_RUN}</w:p>"),
        (_, BreakContext::Inline) => PAGE_BREAK_RUN.to_string(),
    }
}

/// Everything needed to turn the region template into populated copies.
#[derive(Debug, Clone)]
pub struct Replicator<'a> {
    template: String,
    convention: PlaceholderConvention,
    separator: String,
    aliases: &'a [AliasConfig],
    format: &'a FormatOptions,
}

impl<'a> Replicator<'a> {
    /// Prepare the region template once; it is reused read-only for every
    /// record.
    pub fn new(
        location: &MarkerLocation,
        break_kind: BreakKind,
        aliases: &'a [AliasConfig],
        format: &'a FormatOptions,
    ) -> Self {
        let convention = PlaceholderConvention::detect(&location.template);
        let template = collapse_split_tokens(&location.template, convention);
        let separator = break_markup(
            break_kind,
            location.break_context,
            &location.section_properties,
        );

        Self {
            template,
            convention,
            separator,
            aliases,
            format,
        }
    }

    pub fn convention(&self) -> PlaceholderConvention {
        self.convention
    }

    /// The region template after split-token repair.
    pub fn template(&self) -> &str {
        &self.template
    }

    /// One populated copy.
    pub fn render(&self, record: &Record, shared: &SharedContext) -> Result<String> {
        let subs = Substitutions::resolve(record, shared, self.aliases, self.format);
        substitute(&self.template, &subs, self.convention)
    }

    /// All copies in record order, the break between each pair.
    ///
    /// `on_rendered(current, total)` is called after each copy. Any failure
    /// aborts the whole batch.
    #[instrument(skip_all, fields(records = records.len(), convention = %self.convention))]
    pub fn replicate(
        &self,
        records: &[Record],
        shared: &SharedContext,
        mut on_rendered: impl FnMut(usize, usize),
    ) -> Result<String> {
        let total = records.len();
        let mut out = String::with_capacity((self.template.len() + self.separator.len()) * total);

        for (i, record) in records.iter().enumerate() {
            if i > 0 {
                out.push_str(&self.separator);
            }
            out.push_str(&self.render(record, shared)?);
            on_rendered(i + 1, total);
        }

        debug!(copies = total, bytes = out.len(), "section replicated");
        Ok(out)
    }
}
