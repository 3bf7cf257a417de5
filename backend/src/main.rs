//! Sourcecat CLI - Turn VOTable catalogs into per-source JSON records
//!
//! # Main Commands
//!
//! ```bash
//! sourcecat process gaia.vot -o out.json          # Transform a shared input file
//! sourcecat query "SELECT TOP 10 ..." -o out.json  # Fetch from TAP, then transform
//! sourcecat serve                                  # Start HTTP server (port 3000)
//! ```
//!
//! # Debug Commands
//!
//! ```bash
//! sourcecat parse table.vot            # Dump table rows as JSON
//! sourcecat validate out.json          # Validate an aggregate context
//! sourcecat validate 42_0_details --details
//! ```

use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use sourcecat::{
    run_file_job, run_query_job, validate_context, validate_details, ColumnSelection,
    JobOptions, MaskFill, Settings, TapClient, TransformReport, VoTableReader,
};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "sourcecat")]
#[command(about = "Turn VOTable catalogs into per-source JSON records", long_about = None)]
struct Cli {
    /// Directory shared input files are resolved against
    #[arg(long, global = true, env = "SOURCECAT_INPUT_DIR")]
    input_dir: Option<PathBuf>,

    /// Directory every output file is written to
    #[arg(long, global = true, env = "SOURCECAT_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// TAP service base URL for query jobs
    #[arg(long, global = true, env = "SOURCECAT_TAP_URL")]
    tap_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Transform a VOTable file from the input directory
    Process {
        /// File name inside the input directory
        sharedfile: String,

        #[command(flatten)]
        job: JobArgs,
    },

    /// Run an ADQL query, then transform its result
    Query {
        /// ADQL query text
        query: String,

        #[command(flatten)]
        job: JobArgs,
    },

    /// Parse a VOTable and output its rows as JSON
    Parse {
        /// Input VOTable file
        input: PathBuf,

        /// Zero-based index of the table to read
        #[arg(short, long, default_value = "0")]
        table: usize,

        /// Masked cell policy: null or zero
        #[arg(long, default_value = "null")]
        fill: MaskFill,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Validate an emitted aggregate context (or detail document)
    Validate {
        /// Input JSON file
        input: PathBuf,

        /// Validate a per-source detail document instead
        #[arg(long)]
        details: bool,
    },

    /// Start HTTP server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "3000")]
        port: u16,
    },
}

/// Parameters shared by `process` and `query`.
#[derive(Args)]
struct JobArgs {
    /// Name of the aggregate context file
    #[arg(short, long)]
    output_file: String,

    /// Prefix of the detail files (default: a fresh UUID)
    #[arg(short, long)]
    request_id: Option<String>,

    /// Masked cell policy: null or zero
    #[arg(long, default_value = "null")]
    fill: MaskFill,

    /// Aggregate columns: full or required
    #[arg(long, default_value = "full")]
    columns: ColumnSelection,
}

impl JobArgs {
    fn request_id(&self) -> String {
        self.request_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string())
    }

    fn options(&self) -> JobOptions {
        JobOptions {
            mask_fill: self.fill,
            columns: self.columns,
        }
    }
}

#[tokio::main]
async fn main() {
    // Load .env file (if present)
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let settings = load_settings(&cli);

    let result = match cli.command {
        Commands::Process { sharedfile, job } => cmd_process(&settings, &sharedfile, &job),

        Commands::Query { query, job } => cmd_query(&settings, &query, &job).await,

        Commands::Parse {
            input,
            table,
            fill,
            output,
        } => cmd_parse(&input, table, fill, output.as_deref()),

        Commands::Validate { input, details } => cmd_validate(&input, details),

        Commands::Serve { port } => cmd_serve(settings, port).await,
    };

    if let Err(e) = result {
        eprintln!("❌ Error: {}", e);
        std::process::exit(1);
    }
}

/// Environment settings, overridden by explicit flags.
fn load_settings(cli: &Cli) -> Settings {
    let mut settings = Settings::from_env();
    if let Some(dir) = &cli.input_dir {
        settings.input_dir = dir.clone();
    }
    if let Some(dir) = &cli.output_dir {
        settings.output_dir = dir.clone();
    }
    if let Some(url) = &cli.tap_url {
        settings.tap_url = url.clone();
    }
    settings
}

fn cmd_process(
    settings: &Settings,
    sharedfile: &str,
    job: &JobArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    eprintln!("📄 Processing: {}", settings.input_dir.join(sharedfile).display());

    let report = run_file_job(
        settings,
        sharedfile,
        &job.output_file,
        &job.request_id(),
        job.options(),
    )?;
    print_summary(&report);
    Ok(())
}

async fn cmd_query(
    settings: &Settings,
    query: &str,
    job: &JobArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    eprintln!("📡 Querying: {}", settings.tap_url);

    let client = TapClient::new(settings.tap_url.clone());
    let report = run_query_job(
        settings,
        &client,
        query,
        &job.output_file,
        &job.request_id(),
        job.options(),
    )
    .await?;
    print_summary(&report);
    Ok(())
}

fn print_summary(report: &TransformReport) {
    eprintln!("\n📊 Summary");
    eprintln!("   Request ID:    {}", report.request_id);
    eprintln!("   Sources:       {}", report.row_count);
    eprintln!("   Columns:       {}", report.columns.join(", "));
    eprintln!("   Masked cells:  {}", report.masked_cells);
    eprintln!("   Detail files:  {}", report.detail_paths.len());
    eprintln!("💾 Context written to: {}", report.output_path.display());
    eprintln!("\n✨ Done!");
}

fn cmd_parse(
    input: &Path,
    table: usize,
    fill: MaskFill,
    output: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    eprintln!("📄 Parsing VOTable: {}", input.display());

    let table = VoTableReader::new().table_index(table).read_path(input)?;

    if let Some(ref name) = table.name {
        eprintln!("   Table: {}", name);
    }
    eprintln!("   Serialization: {:?}", table.serialization);
    eprintln!(
        "   Columns: {}",
        table.column_names().collect::<Vec<_>>().join(", ")
    );
    eprintln!("✅ Parsed {} rows", table.len());

    let json = serde_json::to_string_pretty(&table.rows_json(fill))?;
    write_output(&json, output)?;

    Ok(())
}

fn cmd_validate(input: &Path, details: bool) -> Result<(), Box<dyn std::error::Error>> {
    eprintln!("✔️  Validating: {}", input.display());

    let content = fs::read_to_string(input)?;
    let document: Value = serde_json::from_str(&content)?;

    let result = if details {
        validate_details(&document)
    } else {
        validate_context(&document)
    };

    match result {
        Ok(()) => {
            if details {
                eprintln!("✅ Detail document valid");
            } else {
                let count = document["sources"].as_array().map_or(0, Vec::len);
                eprintln!("✅ All {} sources valid!", count);
            }
            Ok(())
        }
        Err(errors) => {
            eprintln!("\n❌ {} errors:", errors.len());
            for err in errors.iter().take(10) {
                eprintln!("   - {}", err);
            }
            std::process::exit(1);
        }
    }
}

async fn cmd_serve(settings: Settings, port: u16) -> Result<(), Box<dyn std::error::Error>> {
    sourcecat::server::start_server(settings, port).await
}

fn write_output(content: &str, path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    match path {
        Some(p) => {
            fs::write(p, content)?;
            eprintln!("💾 Output written to: {}", p.display());
        }
        None => {
            println!("{}", content);
        }
    }
    Ok(())
}
