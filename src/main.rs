use std::fs;
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use metadata_tables::io::{excel_read, excel_write};
use metadata_tables::model::Record;
use metadata_tables::package::{self, Packager};
use metadata_tables::sync::{self, Request};
use metadata_tables::verify::{self, VerifyModes};
use metadata_tables::{Config, Result, ToolError};
use serde::Serialize;
use serde_json::Value;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = Cli::parse();
    match run(cli) {
        Ok(true) => {}
        Ok(false) => std::process::exit(2),
        Err(error) => {
            eprintln!("error: {error}");
            std::process::exit(1);
        }
    }
}

/// Returns `false` when the command ran but reported a failed item.
fn run(cli: Cli) -> Result<bool> {
    init_tracing()?;
    let config = Config::load(&cli.config)?;

    match cli.command {
        Command::Split(args) => {
            let report = sync::split(&config, &args.request())?;
            print_json(&report)?;
            Ok(report.is_ok())
        }
        Command::Upsert(args) => {
            let report = sync::upsert(&config, &args.request())?;
            print_json(&report)?;
            Ok(report.is_ok())
        }
        Command::Merge(args) => {
            let report = sync::merge(&config, &args.request())?;
            print_json(&report)?;
            Ok(report.is_ok())
        }
        Command::Delete(args) => {
            let report = sync::delete(&config, &args.request())?;
            print_json(&report)?;
            Ok(report.is_ok())
        }
        Command::CustomUpsert(args) => {
            let records = load_records(&args.records)?;
            let report = sync::custom_upsert(&config, &args.selection.request(), &records)?;
            print_json(&report)?;
            Ok(report.is_ok())
        }
        Command::Verify(args) => {
            let modes = match (args.logic, args.string) {
                (false, false) => VerifyModes::default(),
                (logic, string) => VerifyModes { logic, string },
            };
            let report = verify::verify(&config, &args.selection.request(), modes)?;
            print_json(&report)?;
            Ok(report.is_aligned())
        }
        Command::Package(args) => execute_package(&config, args),
        Command::Export(args) => {
            let dir = config.document_dir(&args.table_dir(&config), &args.document);
            let sheets = excel_write::export_workbook(&config, &dir, &args.output)?;
            info!(sheets, output = %args.output.display(), "workbook exported");
            Ok(true)
        }
        Command::Import(args) => {
            let dir = config.document_dir(&args.table_dir(&config), &args.document);
            let tables = excel_read::import_workbook(&config, &args.input, &dir)?;
            info!(tables, dir = %dir.display(), "workbook imported");
            Ok(true)
        }
    }
}

fn init_tracing() -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|error| ToolError::Logging(error.to_string()))
}

fn execute_package(config: &Config, args: PackageArgs) -> Result<bool> {
    let manifest = package::read_manifest(&args.manifest)?;
    let mut packager = Packager::from_config(&config.packager);
    if let Some(budget) = args.budget {
        packager = packager.with_budget(budget);
    }

    let chunks = match (&args.container, &args.companion) {
        (Some(container), Some(companion)) => {
            packager.pack_with_companions(&manifest, container, companion)
        }
        (None, None) => packager.pack(&manifest),
        _ => {
            return Err(ToolError::Configuration(
                "--container and --companion must be given together".into(),
            ));
        }
    };

    fs::create_dir_all(&args.output_dir)?;
    let mut summary = Vec::with_capacity(chunks.len());
    for chunk in &chunks {
        let path = args.output_dir.join(format!("package-{}.xml", chunk.index));
        package::write_manifest(&path, &chunk.manifest)?;
        summary.push(ChunkSummary {
            index: chunk.index,
            weight: chunk.weight,
            members: chunk.manifest.member_count(),
            path,
        });
    }
    print_json(&summary)?;
    Ok(true)
}

#[derive(Serialize)]
struct ChunkSummary {
    index: usize,
    weight: usize,
    members: usize,
    path: PathBuf,
}

/// Reads caller supplied records: a JSON object or an array of objects.
fn load_records(path: &Path) -> Result<Vec<Record>> {
    if !path.exists() {
        return Err(ToolError::MissingInput(path.to_path_buf()));
    }
    let data = fs::read_to_string(path)?;
    match serde_json::from_str::<Value>(&data)? {
        Value::Array(items) => items.iter().map(Record::from_json).collect(),
        other => Ok(vec![Record::from_json(&other)?]),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Split XML metadata documents into editable tables and rebuild them"
)]
struct Cli {
    /// Engine configuration file.
    #[arg(long, global = true, default_value = "metadata-tables.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Regenerate the tables of the selected documents from scratch.
    Split(Selection),
    /// Merge the selected documents into their existing tables.
    Upsert(Selection),
    /// Rebuild documents from their tables.
    Merge(Selection),
    /// Remove rows matching identity patterns.
    Delete(Selection),
    /// Merge records from a JSON file into one section.
    CustomUpsert(CustomUpsertArgs),
    /// Check that tables rebuild their source documents.
    Verify(VerifyArgs),
    /// Split a package.xml manifest into budget-bounded chunks.
    Package(PackageArgs),
    /// Export the tables of one document to a workbook.
    Export(ExportArgs),
    /// Import the sheets of a workbook as the tables of one document.
    Import(ImportArgs),
}

#[derive(Args)]
struct Selection {
    /// Document names; all documents when omitted.
    #[arg(long = "document")]
    documents: Vec<String>,

    /// Section keys; all sections when omitted.
    #[arg(long = "section")]
    sections: Vec<String>,

    /// Identity patterns such as `Account.*` or `*Name`.
    #[arg(long = "identity")]
    identities: Vec<String>,

    /// Sort rows by identity, overriding the configuration.
    #[arg(long, conflicts_with = "no_sort")]
    sort: bool,

    /// Keep row order, overriding the configuration.
    #[arg(long)]
    no_sort: bool,

    #[arg(long)]
    source_dir: Option<PathBuf>,

    #[arg(long)]
    table_dir: Option<PathBuf>,
}

impl Selection {
    fn request(&self) -> Request {
        let sort = match (self.sort, self.no_sort) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        };
        Request {
            documents: self.documents.clone(),
            sections: self.sections.clone(),
            identities: self.identities.clone(),
            sort,
            source_dir: self.source_dir.clone(),
            table_dir: self.table_dir.clone(),
        }
    }
}

#[derive(Args)]
struct CustomUpsertArgs {
    #[command(flatten)]
    selection: Selection,

    /// JSON file holding one record or an array of records.
    #[arg(long)]
    records: PathBuf,
}

#[derive(Args)]
struct VerifyArgs {
    #[command(flatten)]
    selection: Selection,

    /// Structural comparison (the default).
    #[arg(long)]
    logic: bool,

    /// Line by line comparison of the serialised documents.
    #[arg(long)]
    string: bool,
}

#[derive(Args)]
struct PackageArgs {
    /// Manifest to split.
    #[arg(long)]
    manifest: PathBuf,

    /// Directory receiving `package-<n>.xml` files.
    #[arg(long)]
    output_dir: PathBuf,

    /// Overrides the configured budget.
    #[arg(long)]
    budget: Option<usize>,

    /// Type whose members travel with their companions.
    #[arg(long)]
    container: Option<String>,

    /// Type holding `<container member>.<name>` companions.
    #[arg(long)]
    companion: Option<String>,
}

#[derive(Args)]
struct ExportArgs {
    #[arg(long)]
    document: String,

    /// Workbook to write.
    #[arg(long)]
    output: PathBuf,

    #[arg(long)]
    table_dir: Option<PathBuf>,
}

impl ExportArgs {
    fn table_dir(&self, config: &Config) -> PathBuf {
        self.table_dir
            .clone()
            .unwrap_or_else(|| config.paths.tables.clone())
    }
}

#[derive(Args)]
struct ImportArgs {
    #[arg(long)]
    document: String,

    /// Workbook to read.
    #[arg(long)]
    input: PathBuf,

    #[arg(long)]
    table_dir: Option<PathBuf>,
}

impl ImportArgs {
    fn table_dir(&self, config: &Config) -> PathBuf {
        self.table_dir
            .clone()
            .unwrap_or_else(|| config.paths.tables.clone())
    }
}
