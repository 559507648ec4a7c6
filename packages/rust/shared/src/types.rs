//! Core domain types for docmerge: records, shared context, document kinds.

use std::collections::BTreeSet;

use serde::{Deserialize, Deserializer, Serialize};

/// Media type of a WordprocessingML package (`.docx`).
pub const DOCX_MEDIA_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

// ---------------------------------------------------------------------------
// FieldValue
// ---------------------------------------------------------------------------

/// A raw value from one spreadsheet cell or form field.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum FieldValue {
    /// Free text, taken verbatim.
    Text(String),
    /// A numeric cell (plain numbers and date serials alike).
    Number(f64),
    /// Missing or blank.
    #[default]
    Empty,
}

impl FieldValue {
    fn from_json(value: serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => Self::Empty,
            Value::Bool(b) => Self::Text(b.to_string()),
            Value::Number(n) => n
                .as_f64()
                .map(Self::Number)
                .unwrap_or_else(|| Self::Text(n.to_string())),
            Value::String(s) => Self::Text(s),
            // Nested structures have no meaning in a flat record; keep their JSON text.
            other => Self::Text(other.to_string()),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<f64> for FieldValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Number(n) => f.write_str(&format_number(*n)),
            Self::Empty => Ok(()),
        }
    }
}

impl<'de> Deserialize<'de> for FieldValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(Self::from_json)
    }
}

/// Render a number the way a spreadsheet cell shows it: whole numbers
/// without a fractional part, everything else in shortest form.
pub fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// One row of input data (e.g. one student), in source column order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: Vec<(String, FieldValue)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert; a repeated name replaces the earlier value.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(k, _)| *k == name) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl<'de> Deserialize<'de> for Record {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let map = serde_json::Map::<String, serde_json::Value>::deserialize(deserializer)?;
        Ok(Self {
            fields: map
                .into_iter()
                .map(|(k, v)| (k, FieldValue::from_json(v)))
                .collect(),
        })
    }
}

// ---------------------------------------------------------------------------
// SharedContext
// ---------------------------------------------------------------------------

/// Values common to every generated copy (school year, head teacher, ...).
///
/// Keys listed as reserved cannot be overwritten by a record field of the
/// same name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SharedContext {
    values: Record,
    reserved: BTreeSet<String>,
}

impl SharedContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reserved<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reserved.extend(keys.into_iter().map(Into::into));
        self
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.values.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) {
        self.values.insert(name, value);
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.values.get(name)
    }

    pub fn is_reserved(&self, name: &str) -> bool {
        self.reserved.contains(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.values.iter()
    }
}

impl From<Record> for SharedContext {
    fn from(values: Record) -> Self {
        Self {
            values,
            reserved: BTreeSet::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// DocumentKind
// ---------------------------------------------------------------------------

/// Which certificate template to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DocumentKind {
    Zwischenzeugnis,
    #[default]
    Jahreszeugnis,
    Abschlusszeugnis,
}

impl DocumentKind {
    pub const ALL: [DocumentKind; 3] = [
        Self::Zwischenzeugnis,
        Self::Jahreszeugnis,
        Self::Abschlusszeugnis,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Zwischenzeugnis => "Zwischenzeugnis",
            Self::Jahreszeugnis => "Jahreszeugnis",
            Self::Abschlusszeugnis => "Abschlusszeugnis",
        }
    }

    /// Short form used in template file names.
    pub fn short_name(&self) -> &'static str {
        match self {
            Self::Zwischenzeugnis => "zwischen",
            Self::Jahreszeugnis => "jahr",
            Self::Abschlusszeugnis => "abschluss",
        }
    }

    /// File name of the template for this kind, both on disk and in the
    /// remote template store.
    pub fn template_file_name(&self) -> String {
        format!("template_{}.docx", self.short_name())
    }
}

impl std::fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DocumentKind {
    type Err = crate::DocMergeError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let needle = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().to_lowercase() == needle || kind.short_name() == needle)
            .ok_or_else(|| {
                crate::DocMergeError::validation(format!(
                    "unknown document kind '{s}': expected Zwischenzeugnis, Jahreszeugnis, or Abschlusszeugnis"
                ))
            })
    }
}
