//! rowpicker command line driver.
//!
//! Runs the picker engine offline against a saved HTML page:
//! - `extract`: apply column specs and export the table
//! - `test`: count what a selector matches
//! - `synth`: print the synthesized CSS selector and path for an element
//! - `save`: validate column specs and store them as a named selection

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use rowpicker::bridge::check_page_allowed;
use rowpicker::extractors::{css_selector, evaluate, extract_table, path_expr};
use rowpicker::{
    export, ColumnSpec, Document, ExportFormat, JsonFileStore, PickerConfig, SelectedSet,
    SelectionStore, SelectorKind,
};

#[derive(Parser)]
#[command(name = "rowpicker", version, about = "Pick page elements and extract them as a table", long_about = None)]
struct Cli {
    #[command(flatten)]
    settings: Settings,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Settings {
    /// JSON config file; flags below override its values
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Maximum ancestor levels in a synthesized CSS path
    #[arg(long, global = true)]
    max_css_depth: Option<usize>,

    /// Characters kept in an element's text preview
    #[arg(long, global = true)]
    preview_chars: Option<usize>,

    /// Page URL used to resolve relative links
    #[arg(long, global = true)]
    base_url: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract a table from an HTML file
    Extract {
        /// Path to the HTML file
        html: PathBuf,

        /// JSON array of column specs (`[{"selector", "kind", "columnName"}]`)
        #[arg(short, long, conflicts_with = "selection")]
        specs: Option<PathBuf>,

        /// Name of a selection saved with `save`
        #[arg(long)]
        selection: Option<String>,

        /// Directory holding saved selections
        #[arg(long, default_value = "./selections")]
        store_dir: PathBuf,

        /// Output format (csv, json, spreadsheet)
        #[arg(short, long, default_value = "csv")]
        format: ExportFormat,

        /// Output file; stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Count the elements a selector matches
    Test {
        html: PathBuf,
        selector: String,

        /// Selector kind (css, xpath)
        #[arg(short, long, default_value = "css")]
        kind: String,
    },

    /// Print the CSS selector and path expression the picker would emit
    Synth {
        html: PathBuf,

        /// Selector locating the element; the first match is used
        target: String,

        #[arg(short, long, default_value = "css")]
        kind: String,
    },

    /// Validate column specs against a page and save them as a named selection
    Save {
        html: PathBuf,
        specs: PathBuf,
        name: String,

        #[arg(long, default_value = "./selections")]
        store_dir: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.settings)?;

    match cli.command {
        Commands::Extract {
            html,
            specs,
            selection,
            store_dir,
            format,
            output,
        } => {
            let document = load_document(&html, &cli.settings)?;
            let specs = match (specs, selection) {
                (Some(path), _) => read_specs(&path)?,
                (None, Some(name)) => {
                    let store = JsonFileStore::new(store_dir);
                    let set = store
                        .load(&name)?
                        .with_context(|| format!("No saved selection named '{}'", name))?;
                    set.columns().cloned().collect()
                }
                (None, None) => bail!("Either --specs or --selection is required"),
            };
            run_extract(&document, &specs, format, output.as_deref())
        }
        Commands::Test { html, selector, kind } => {
            let document = load_document(&html, &cli.settings)?;
            let kind = parse_kind(&kind)?;
            let matches = evaluate(&document, &selector, kind)?;
            println!("{} {} matches {} element(s)", kind, selector, matches.len());
            Ok(())
        }
        Commands::Synth { html, target, kind } => {
            let document = load_document(&html, &cli.settings)?;
            let kind = parse_kind(&kind)?;
            let node = evaluate(&document, &target, kind)?
                .first()
                .copied()
                .with_context(|| format!("'{}' matches no element", target))?;
            println!("css:  {}", css_selector(&document, node, &config));
            println!("path: {}", path_expr(&document, node));
            Ok(())
        }
        Commands::Save {
            html,
            specs,
            name,
            store_dir,
        } => {
            let document = load_document(&html, &cli.settings)?;
            let mut set = SelectedSet::new();
            for column in read_specs(&specs)? {
                set.add(&document, column)?;
            }
            let mut store = JsonFileStore::new(store_dir);
            store.save(&name, &set)?;
            info!("Saved {} column(s) as '{}'", set.len(), name);
            println!("{}", store.path_for(&name).display());
            Ok(())
        }
    }
}

fn load_config(settings: &Settings) -> Result<PickerConfig> {
    let mut config = match &settings.config {
        Some(path) => PickerConfig::load(path)?,
        None => PickerConfig::default(),
    };
    if let Some(depth) = settings.max_css_depth {
        config.max_css_depth = depth;
    }
    if let Some(chars) = settings.preview_chars {
        config.preview_chars = chars;
    }
    config.validate()?;
    Ok(config)
}

fn load_document(path: &Path, settings: &Settings) -> Result<Document> {
    let html = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let document = Document::parse(&html);
    match &settings.base_url {
        Some(url) => Ok(document.with_base_url(check_page_allowed(url)?)),
        None => Ok(document),
    }
}

fn read_specs(path: &Path) -> Result<Vec<ColumnSpec>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Invalid column specs in {}", path.display()))
}

fn parse_kind(kind: &str) -> Result<SelectorKind> {
    serde_json::from_value(serde_json::Value::String(kind.to_string()))
        .with_context(|| format!("Unknown selector kind '{}'", kind))
}

fn run_extract(
    document: &Document,
    specs: &[ColumnSpec],
    format: ExportFormat,
    output: Option<&Path>,
) -> Result<()> {
    let report = extract_table(document, specs);
    for failure in &report.failures {
        warn!("Column '{}' skipped: {}", failure.column_name, failure.error);
    }
    info!("Extracted {} rows", report.rows.len());

    let encoded = export(&report.rows, &report.columns, format)?;
    match output {
        Some(path) => fs::write(path, encoded)
            .with_context(|| format!("Failed to write {}", path.display()))?,
        None => print!("{}", encoded),
    }
    Ok(())
}
