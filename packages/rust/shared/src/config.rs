//! Application configuration for docmerge.
//!
//! User config lives at `~/.docmerge/docmerge.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{DocMergeError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "docmerge.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".docmerge";

// ---------------------------------------------------------------------------
// Config structs (matching docmerge.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Where templates come from.
    #[serde(default)]
    pub template: TemplateConfig,

    /// Output naming and location.
    #[serde(default)]
    pub output: OutputConfig,

    /// Placeholder aliases and reserved shared keys.
    #[serde(default)]
    pub placeholders: PlaceholderConfig,

    /// Value formatting rules.
    #[serde(default)]
    pub format: FormatConfig,

    /// Section replication settings.
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Optional password gate.
    #[serde(default)]
    pub access: AccessConfig,
}

/// `[template]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateConfig {
    /// Directory holding `template_*.docx` files.
    #[serde(default = "default_template_dir")]
    pub dir: String,

    /// Proxy endpoint that streams templates from the private store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_url: Option<String>,

    /// Name of the env var holding a bearer token for the proxy (never store the token itself).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_env: Option<String>,

    /// Timeout for the remote fetch.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            dir: default_template_dir(),
            remote_url: None,
            token_env: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_template_dir() -> String {
    "templates".into()
}
fn default_timeout_secs() -> u64 {
    30
}

/// `[output]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Directory the generated documents are written to.
    #[serde(default = "default_output_dir")]
    pub dir: String,

    /// File name when all records are merged into one document.
    #[serde(default = "default_batch_name")]
    pub batch_name: String,

    /// Prefix for per-record file names.
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,

    /// Record fields joined into per-record file names.
    #[serde(default = "default_name_fields")]
    pub name_fields: Vec<String>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            batch_name: default_batch_name(),
            file_prefix: default_file_prefix(),
            name_fields: default_name_fields(),
        }
    }
}

fn default_output_dir() -> String {
    ".".into()
}
fn default_batch_name() -> String {
    "zeugnisse.docx".into()
}
fn default_file_prefix() -> String {
    "zeugnis".into()
}
fn default_name_fields() -> Vec<String> {
    vec!["Nachname".into(), "Vorname".into()]
}

/// How a date-valued field is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DateFormat {
    /// Spreadsheet day-count serial.
    SerialDate,
    /// ISO-8601 date string.
    IsoDate,
}

/// `[[placeholders.aliases]]` entry: a structural placeholder resolved
/// before all others.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AliasConfig {
    /// Placeholder name as it appears in the template.
    pub name: String,
    /// Record or shared-context field supplying the value.
    pub source: String,
    /// Optional date rendering for the source value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<DateFormat>,
}

impl AliasConfig {
    fn new(name: &str, source: &str, format: Option<DateFormat>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            format,
        }
    }
}

/// `[placeholders]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceholderConfig {
    /// Reserved structural placeholders.
    #[serde(default = "default_aliases")]
    pub aliases: Vec<AliasConfig>,

    /// Shared-context keys a record field may not overwrite.
    #[serde(default = "default_reserved")]
    pub reserved: Vec<String>,
}

impl Default for PlaceholderConfig {
    fn default() -> Self {
        Self {
            aliases: default_aliases(),
            reserved: default_reserved(),
        }
    }
}

fn default_aliases() -> Vec<AliasConfig> {
    vec![
        AliasConfig::new("SJ", "schuljahr", None),
        AliasConfig::new("Kl", "Klasse", None),
        AliasConfig::new("GDat", "Geburtsdatum", Some(DateFormat::SerialDate)),
        AliasConfig::new("GOrt", "Geburtsort", None),
    ]
}
fn default_reserved() -> Vec<String> {
    ["schuljahr", "klassenleitung", "schulleitung", "datum", "zeugnisart"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// `[format]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormatConfig {
    /// Fields holding spreadsheet date serials.
    #[serde(default = "default_serial_date_fields")]
    pub serial_date_fields: Vec<String>,

    /// Fields holding ISO-8601 date strings.
    #[serde(default = "default_iso_date_fields")]
    pub iso_date_fields: Vec<String>,

    /// Turn `\n` inside values into Word line breaks.
    #[serde(default = "default_true")]
    pub line_breaks: bool,
}

impl Default for FormatConfig {
    fn default() -> Self {
        Self {
            serial_date_fields: default_serial_date_fields(),
            iso_date_fields: default_iso_date_fields(),
            line_breaks: true,
        }
    }
}

fn default_serial_date_fields() -> Vec<String> {
    vec!["Geburtsdatum".into()]
}
fn default_iso_date_fields() -> Vec<String> {
    vec!["datum".into()]
}
fn default_true() -> bool {
    true
}

/// Structure inserted between consecutive copies of the section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BreakKind {
    #[default]
    Page,
    Section,
    None,
}

impl std::str::FromStr for BreakKind {
    type Err = DocMergeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "page" => Ok(Self::Page),
            "section" => Ok(Self::Section),
            "none" => Ok(Self::None),
            other => Err(DocMergeError::config(format!(
                "invalid break kind '{other}': expected 'page', 'section', or 'none'"
            ))),
        }
    }
}

/// Names of the two section markers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerNames {
    #[serde(default = "default_start_marker")]
    pub start: String,
    #[serde(default = "default_end_marker")]
    pub end: String,
}

impl Default for MarkerNames {
    fn default() -> Self {
        Self {
            start: default_start_marker(),
            end: default_end_marker(),
        }
    }
}

fn default_start_marker() -> String {
    "SectionStart".into()
}
fn default_end_marker() -> String {
    "SectionEnd".into()
}

/// `[generation]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Break inserted between copies.
    #[serde(default)]
    pub break_kind: BreakKind,

    /// Check well-formedness of the assembled body before packaging.
    #[serde(default = "default_true")]
    pub validate: bool,

    /// Marker names delimiting the repeatable section.
    #[serde(default)]
    pub markers: MarkerNames,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            break_kind: BreakKind::default(),
            validate: true,
            markers: MarkerNames::default(),
        }
    }
}

/// `[access]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessConfig {
    /// Password validation endpoint; the gate is disabled when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validate_url: Option<String>,

    /// Name of the env var holding the password.
    #[serde(default = "default_password_env")]
    pub password_env: String,

    /// Failed attempts allowed before lockout.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Lockout duration after too many failures.
    #[serde(default = "default_lockout_minutes")]
    pub lockout_minutes: i64,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            validate_url: None,
            password_env: default_password_env(),
            max_attempts: default_max_attempts(),
            lockout_minutes: default_lockout_minutes(),
        }
    }
}

fn default_password_env() -> String {
    "DOCMERGE_PASSWORD".into()
}
fn default_max_attempts() -> u32 {
    5
}
fn default_lockout_minutes() -> i64 {
    60
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.docmerge/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| DocMergeError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.docmerge/docmerge.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| DocMergeError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| DocMergeError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| DocMergeError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| DocMergeError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| DocMergeError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("batch_name"));
        assert!(toml_str.contains("serial-date"));
        assert!(toml_str.contains("DOCMERGE_PASSWORD"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.access.max_attempts, 5);
        assert_eq!(parsed.generation.break_kind, BreakKind::Page);
        assert_eq!(parsed.placeholders.aliases, default_aliases());
        assert_eq!(parsed.generation.markers.start, "SectionStart");
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[template]
remote_url = "https://example.com/api/get-template"

[generation]
break_kind = "section"

[[placeholders.aliases]]
name = "Name"
source = "Nachname"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.template.dir, "templates");
        assert_eq!(config.generation.break_kind, BreakKind::Section);
        assert!(config.generation.validate);
        assert_eq!(config.placeholders.aliases.len(), 1);
        assert_eq!(config.placeholders.reserved.len(), 5);
        assert_eq!(config.access.lockout_minutes, 60);
    }

    #[test]
    fn break_kind_from_str() {
        assert_eq!("Section".parse::<BreakKind>().unwrap(), BreakKind::Section);
        assert!("column".parse::<BreakKind>().is_err());
    }
}
