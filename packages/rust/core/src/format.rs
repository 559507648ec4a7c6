//! Value formatting: date serials, ISO dates, markup escaping.
//!
//! Every function here is pure. Formatting never fails: a value that does
//! not fit the requested format is passed through as given and a warning is
//! logged.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeDelta, Utc};
use tracing::warn;

use docmerge_shared::{DateFormat, FieldValue, FormatConfig};

pub use docmerge_shared::format_number;

/// Days between the spreadsheet's 1900-based day zero and 1970-01-01.
pub const SERIAL_EPOCH_OFFSET: i64 = 25569;

/// Rendered in place of an unparseable ISO date.
pub const INVALID_DATE: &str = "Invalid Date";

/// Markup that ends the current text node, inserts a line break, and opens a
/// new text node. Only valid where the value lands inside a `w:t` element.
const WORD_LINE_BREAK: &str = r#"</w:t><w:br/><w:t xml:space="preserve">"#;

/// Runtime formatting rules, derived from the `[format]` config section.
#[derive(Debug, Clone, Default)]
pub struct FormatOptions {
    pub serial_date_fields: BTreeSet<String>,
    pub iso_date_fields: BTreeSet<String>,
    pub line_breaks: bool,
}

impl From<&FormatConfig> for FormatOptions {
    fn from(config: &FormatConfig) -> Self {
        Self {
            serial_date_fields: config.serial_date_fields.iter().cloned().collect(),
            iso_date_fields: config.iso_date_fields.iter().cloned().collect(),
            line_breaks: config.line_breaks,
        }
    }
}

impl FormatOptions {
    /// The date format configured for a field, if any.
    pub fn date_format_for(&self, field: &str) -> Option<DateFormat> {
        if self.serial_date_fields.contains(field) {
            Some(DateFormat::SerialDate)
        } else if self.iso_date_fields.contains(field) {
            Some(DateFormat::IsoDate)
        } else {
            None
        }
    }
}

/// Render a spreadsheet day-count serial as `DD.MM.YYYY`.
///
/// Numeric text is accepted as well. Anything else is returned unchanged.
pub fn format_serial_date(value: &FieldValue) -> String {
    let serial = match value {
        FieldValue::Number(n) => Some(*n),
        FieldValue::Text(s) => s.trim().parse::<f64>().ok(),
        FieldValue::Empty => return String::new(),
    };

    match serial.and_then(serial_to_date) {
        Some(date) => date.format("%d.%m.%Y").to_string(),
        None => {
            warn!(value = %value, "not a date serial, passing through");
            value.to_string()
        }
    }
}

fn serial_to_date(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() {
        return None;
    }
    // The fractional part is the time of day.
    let days = serial.floor() as i64 - SERIAL_EPOCH_OFFSET;
    DateTime::<Utc>::UNIX_EPOCH
        .date_naive()
        .checked_add_signed(TimeDelta::try_days(days)?)
}

/// Render an ISO-8601 date (or date-time) string as `DD.MM.YYYY`.
///
/// Blank input yields `""`; unparseable input yields [`INVALID_DATE`].
pub fn format_iso_date(value: &str) -> String {
    let value = value.trim();
    if value.is_empty() {
        return String::new();
    }

    match parse_iso_date(value) {
        Some(date) => date.format("%d.%m.%Y").to_string(),
        None => {
            warn!(value, "unparseable ISO date");
            INVALID_DATE.to_string()
        }
    }
}

fn parse_iso_date(value: &str) -> Option<NaiveDate> {
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.date_naive());
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
        .into_iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|dt| dt.date())
}

/// Escape the markup-special characters `& < > " '`.
pub fn escape_markup(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// Replace newlines in already-escaped text with Word line breaks.
pub fn with_line_breaks(escaped: &str) -> String {
    if !escaped.contains('\n') {
        return escaped.to_string();
    }
    escaped.replace("\r\n", "\n").replace('\n', WORD_LINE_BREAK)
}

/// Format, escape, and (optionally) line-break a value for embedding.
pub fn render_value(value: &FieldValue, date: Option<DateFormat>, opts: &FormatOptions) -> String {
    let raw = match date {
        Some(DateFormat::SerialDate) => format_serial_date(value),
        Some(DateFormat::IsoDate) => format_iso_date(&value.to_string()),
        None => value.to_string(),
    };

    let escaped = escape_markup(&raw);
    if opts.line_breaks {
        with_line_breaks(&escaped)
    } else {
        escaped
    }
}

/// Render a named field using the date format configured for its name.
pub fn render_field(name: &str, value: &FieldValue, opts: &FormatOptions) -> String {
    render_value(value, opts.date_format_for(name), opts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_date_45000() {
        assert_eq!(format_serial_date(&FieldValue::Number(45000.0)), "15.03.2023");
    }

    #[test]
    fn serial_date_epoch_and_fraction() {
        assert_eq!(format_serial_date(&FieldValue::Number(25569.0)), "01.01.1970");
        assert_eq!(format_serial_date(&FieldValue::Number(25569.75)), "01.01.1970");
        assert_eq!(format_serial_date(&FieldValue::from("36526")), "01.01.2000");
    }

    #[test]
    fn serial_date_passes_text_through() {
        assert_eq!(format_serial_date(&FieldValue::from("12.05.2012")), "12.05.2012");
        assert_eq!(format_serial_date(&FieldValue::Empty), "");
    }

    #[test]
    fn iso_date_scenarios() {
        assert_eq!(format_iso_date("2025-06-10"), "10.06.2025");
        assert_eq!(format_iso_date("2025-06-10T08:30:00Z"), "10.06.2025");
        assert_eq!(format_iso_date("2025-06-10T08:30"), "10.06.2025");
        assert_eq!(format_iso_date(""), "");
        assert_eq!(format_iso_date("   "), "");
        assert_eq!(format_iso_date("next tuesday"), INVALID_DATE);
    }

    #[test]
    fn escape_all_specials() {
        assert_eq!(
            escape_markup(r#"Tom & "Jerry" <'cat'>"#),
            "Tom &amp; &quot;Jerry&quot; &lt;&apos;cat&apos;&gt;"
        );
        assert_eq!(escape_markup("Müller"), "Müller");
    }

    #[test]
    fn line_breaks_become_word_breaks() {
        let rendered = with_line_breaks("a\r\nb\nc");
        assert_eq!(rendered.matches("<w:br/>").count(), 2);
        assert!(rendered.starts_with("a</w:t>"));
        assert_eq!(with_line_breaks("plain"), "plain");
    }

    #[test]
    fn render_field_uses_configured_format() {
        let opts = FormatOptions::from(&FormatConfig::default());
        assert_eq!(
            render_field("Geburtsdatum", &FieldValue::Number(45000.0), &opts),
            "15.03.2023"
        );
        assert_eq!(render_field("datum", &FieldValue::from("2025-06-10"), &opts), "10.06.2025");
        assert_eq!(render_field("Note", &FieldValue::Number(2.0), &opts), "2");
        assert_eq!(render_field("Name", &FieldValue::from("A & B"), &opts), "A &amp; B");
    }
}
