//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use docmerge_core::gate::{authorize, state_file_path};
use docmerge_core::pipeline::{
    GenerateOptions, GenerateRequest, GeneratedDocument, GenerationMode, ProgressReporter,
    write_documents,
};
use docmerge_core::{TemplateSource, inspect};
use docmerge_shared::{
    AppConfig, BreakKind, DocumentKind, FieldValue, Record, SharedContext, init_config,
    load_config, load_config_from,
};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// docmerge — fill a Word template once per record.
#[derive(Parser)]
#[command(
    name = "docmerge",
    version,
    about = "Duplicate a Word template's marked section once per record and fill in placeholders.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file to use instead of ~/.docmerge/docmerge.toml.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Generate documents from a template and a record list.
    Generate(GenerateArgs),

    /// Show how a template will be read: main part, markers, placeholders.
    Inspect {
        /// Template file (.docx).
        template: PathBuf,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Args)]
pub(crate) struct GenerateArgs {
    /// JSON array of records (one object per row, column order preserved).
    #[arg(short, long)]
    pub records: PathBuf,

    /// JSON object with values shared by every record.
    #[arg(short, long)]
    pub context: Option<PathBuf>,

    /// Shared value as KEY=VALUE (repeatable, overrides --context).
    #[arg(long = "set", value_parser = parse_key_val)]
    pub set: Vec<(String, String)>,

    /// Document kind: Zwischenzeugnis, Jahreszeugnis, or Abschlusszeugnis.
    #[arg(short, long, default_value_t = DocumentKind::default())]
    pub kind: DocumentKind,

    /// Template file to use instead of the configured template source.
    #[arg(short, long, conflicts_with = "remote")]
    pub template: Option<PathBuf>,

    /// Fetch the template from the configured remote endpoint.
    #[arg(long)]
    pub remote: bool,

    /// Write one document per record instead of one merged document.
    #[arg(long)]
    pub split: bool,

    /// Output directory (defaults to [output].dir).
    #[arg(short, long)]
    pub out: Option<PathBuf>,

    /// Break between copies: page, section, or none.
    #[arg(long = "break")]
    pub break_kind: Option<BreakKind>,

    /// Skip the well-formedness check of the assembled document.
    #[arg(long)]
    pub no_validate: bool,
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

fn parse_key_val(raw: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in '{raw}'"));
    }
    Ok((key.to_string(), value.to_string()))
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "docmerge=info",
        1 => "docmerge=debug",
        _ => "docmerge=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Generate(args) => cmd_generate(&args, config_path).await,
        Command::Inspect { template } => cmd_inspect(&template, config_path).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(config_path).await,
        },
    }
}

fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    Ok(config)
}

// ---------------------------------------------------------------------------
// generate
// ---------------------------------------------------------------------------

async fn cmd_generate(args: &GenerateArgs, config_path: Option<&Path>) -> Result<()> {
    let config = resolve_config(config_path)?;

    if config.access.validate_url.is_some() {
        let password = std::env::var(&config.access.password_env).map_err(|_| {
            eyre!(
                "access gate is enabled; set {} to the access password",
                config.access.password_env
            )
        })?;
        authorize(
            &state_file_path()?,
            &config.access,
            &password,
            chrono::Utc::now(),
        )
        .await?;
    }

    let records = read_records(&args.records)?;
    let shared = read_shared(args.context.as_deref(), &args.set, &config)?;
    if records.is_empty() {
        warn!("record list is empty; output keeps only the template's fixed content");
    }

    let source = match &args.template {
        Some(path) => TemplateSource::Uploaded {
            bytes: std::fs::read(path)
                .wrap_err_with(|| format!("cannot read template {}", path.display()))?,
        },
        None => TemplateSource::from_config(&config.template, args.remote)?,
    };

    let mut opts = GenerateOptions::from(&config);
    if let Some(kind) = args.break_kind {
        opts.break_kind = kind;
    }
    if args.no_validate {
        opts.validate = false;
    }

    let request = GenerateRequest {
        source,
        kind: args.kind,
        records,
        shared,
        mode: if args.split {
            GenerationMode::Split
        } else {
            GenerationMode::Batch
        },
    };

    info!(
        kind = %request.kind,
        template = %request.source.describe(request.kind),
        records = request.records.len(),
        mode = ?request.mode,
        "generating"
    );

    let reporter = CliProgress::new();
    let documents = docmerge_core::run(&request, &opts, &reporter).await?;

    let out_dir = args
        .out
        .clone()
        .unwrap_or_else(|| PathBuf::from(&config.output.dir));
    let written = write_documents(&out_dir, &documents)?;

    println!();
    println!("  Generated {} document(s)", written.len());
    for (path, doc) in written.iter().zip(&documents) {
        println!(
            "  {}  ({} cop{}, {} bytes)",
            path.display(),
            doc.copies,
            if doc.copies == 1 { "y" } else { "ies" },
            doc.bytes.len()
        );
    }
    println!();

    Ok(())
}

fn read_records(path: &Path) -> Result<Vec<Record>> {
    let content = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("cannot read records {}", path.display()))?;
    let records: Vec<Record> = serde_json::from_str(&content)
        .wrap_err_with(|| format!("{} is not a JSON array of objects", path.display()))?;
    Ok(records)
}

fn read_shared(
    context: Option<&Path>,
    set: &[(String, String)],
    config: &AppConfig,
) -> Result<SharedContext> {
    let mut values = match context {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .wrap_err_with(|| format!("cannot read context {}", path.display()))?;
            serde_json::from_str::<Record>(&content)
                .wrap_err_with(|| format!("{} is not a JSON object", path.display()))?
        }
        None => Record::new(),
    };
    for (key, value) in set {
        values.insert(key.clone(), FieldValue::from(value.as_str()));
    }

    Ok(SharedContext::from(values).with_reserved(config.placeholders.reserved.iter().cloned()))
}

// ---------------------------------------------------------------------------
// inspect
// ---------------------------------------------------------------------------

async fn cmd_inspect(template: &Path, config_path: Option<&Path>) -> Result<()> {
    let config = resolve_config(config_path)?;
    let bytes = tokio::fs::read(template)
        .await
        .wrap_err_with(|| format!("cannot read template {}", template.display()))?;

    let report = inspect(&bytes, &config.generation.markers)?;

    println!();
    println!("  Main part:    {}", report.main_part);
    println!("  Parts:        {}", report.part_count);
    println!("  Markers:      {}", report.strategy);
    println!("  Context:      {:?}", report.break_context);
    println!("  Convention:   {}", report.convention);
    println!(
        "  Section props: {}",
        if report.has_section_properties { "yes" } else { "no" }
    );
    if report.placeholders.is_empty() {
        println!("  Placeholders: (none found)");
    } else {
        println!("  Placeholders: {}", report.placeholders.join(", "));
    }
    println!();

    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            spinner.set_style(style.tick_strings(&[
                "⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏",
            ]));
        }
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn record_rendered(&self, current: usize, total: usize) {
        self.spinner
            .set_message(format!("Populating [{current}/{total}]"));
    }

    fn done(&self, _documents: &[GeneratedDocument]) {
        self.spinner.finish_and_clear();
    }
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(config_path: Option<&Path>) -> Result<()> {
    let config = resolve_config(config_path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
