use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tabled::{settings::Style, Table, Tabled};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use bqingest::config::{DEFAULT_POSTGRES_HOST, DEFAULT_POSTGRES_PORT, DEFAULT_SCHEMAS_PATH, DEFAULT_TABLES_PATH};
use bqingest::error::{BigQueryError, IngestError, Result};
use bqingest::{
    ensure_datasets, BqClient, ConfigLoader, ConfigValidator, IngestionRunner, MetricsStore, PgSource,
    PostgresConfig, RunReport, SchemasConfig, TableSpec, WarehouseConfig,
};

#[derive(Parser)]
#[command(name = "bqingest")]
#[command(about = "Incremental Postgres to BigQuery ingestion")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Tables document
    #[arg(long, env = "INGESTION_CONFIG_PATH", default_value = DEFAULT_TABLES_PATH)]
    tables: PathBuf,

    /// Schemas document (required columns per table)
    #[arg(long, env = "INGESTION_SCHEMAS_PATH", default_value = DEFAULT_SCHEMAS_PATH)]
    schemas: PathBuf,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Also write a daily log file into this directory
    #[arg(long, env = "INGESTION_LOG_DIR")]
    log_dir: Option<PathBuf>,

    #[command(flatten)]
    postgres: PostgresArgs,

    #[command(flatten)]
    warehouse: WarehouseArgs,
}

#[derive(Args)]
struct PostgresArgs {
    #[arg(long = "pg-user", env = "POSTGRES_USER")]
    user: Option<String>,

    #[arg(long = "pg-password", env = "POSTGRES_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    #[arg(long = "pg-host", env = "POSTGRES_HOST", default_value = DEFAULT_POSTGRES_HOST)]
    host: String,

    #[arg(long = "pg-port", env = "POSTGRES_PORT", default_value_t = DEFAULT_POSTGRES_PORT)]
    port: u16,

    #[arg(long = "pg-db", env = "POSTGRES_DB")]
    database: Option<String>,

    #[arg(long = "pg-sslmode", env = "POSTGRES_SSLMODE")]
    sslmode: Option<String>,
}

#[derive(Args)]
struct WarehouseArgs {
    /// GCP project ID
    #[arg(short, long, env = "BIGQUERY_PROJECT_ID")]
    project: Option<String>,

    #[arg(long, env = "BIGQUERY_DATASET_ID", default_value = "bank_raw")]
    raw_dataset: String,

    #[arg(long, env = "BIGQUERY_STAGING_DATASET_ID", default_value = "bank_raw_staging")]
    staging_dataset: String,

    #[arg(long, env = "BIGQUERY_META_DATASET_ID", default_value = "bank_meta")]
    meta_dataset: String,
}

impl From<PostgresArgs> for PostgresConfig {
    fn from(args: PostgresArgs) -> Self {
        PostgresConfig {
            user: args.user,
            password: args.password,
            host: args.host,
            port: args.port,
            database: args.database,
            sslmode: args.sslmode,
        }
    }
}

impl From<WarehouseArgs> for WarehouseConfig {
    fn from(args: WarehouseArgs) -> Self {
        WarehouseConfig {
            project_id: args.project,
            raw_dataset: args.raw_dataset,
            staging_dataset: args.staging_dataset,
            meta_dataset: args.meta_dataset,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Extract every configured table and load it into BigQuery
    Run,

    /// Validate the tables and schemas documents
    Validate,

    /// Create the datasets and the metrics table
    Init,
}

#[derive(Tabled)]
struct TableSummaryRow {
    #[tabled(rename = "Table")]
    table: String,
    #[tabled(rename = "Load")]
    load: String,
    #[tabled(rename = "Strategy")]
    strategy: String,
    #[tabled(rename = "Key")]
    key: String,
    #[tabled(rename = "Date columns")]
    date_columns: String,
    #[tabled(rename = "Required")]
    required: usize,
    #[tabled(rename = "Warn %")]
    warn_pct: String,
}

impl TableSummaryRow {
    fn new(spec: &TableSpec, schemas: &SchemasConfig) -> Self {
        let load = match spec.incremental_column() {
            Some(col) => format!("incremental ({})", col),
            None => "full".to_string(),
        };

        Self {
            table: spec.name.clone(),
            load,
            strategy: spec.merge_strategy.to_string(),
            key: spec.primary_key.clone().unwrap_or_else(|| "-".to_string()),
            date_columns: if spec.date_columns.is_empty() {
                "-".to_string()
            } else {
                spec.date_columns.join(", ")
            },
            required: schemas.required_columns(&spec.name).len(),
            warn_pct: format!("{}", spec.rowcount_warning_pct),
        }
    }
}

#[derive(Tabled)]
struct RunSummaryRow {
    #[tabled(rename = "Table")]
    table: String,
    #[tabled(rename = "Rows")]
    rows: i64,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Load (s)")]
    load_sec: String,
    #[tabled(rename = "Metrics")]
    metrics: String,
    #[tabled(rename = "Anomaly")]
    anomaly: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let _guard = init_logging(cli.verbose, cli.log_dir.as_deref());

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            print_error(&e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = if verbose {
        EnvFilter::new("bqingest=debug,info")
    } else {
        EnvFilter::new("bqingest=info,warn")
    };

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "ingestion");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .init();

    guard
}

fn print_error(err: &IngestError) {
    if let IngestError::Table { table, .. } = err {
        eprintln!("\x1b[31m✗ Failed to process {}\x1b[0m", table);
    }

    match err.bigquery() {
        Some(bq) => print_bq_error(bq),
        None => eprintln!("\x1b[31m✗ Error:\x1b[0m {}", err),
    }
}

fn print_bq_error(err: &BigQueryError) {
    eprintln!("\n\x1b[31m✗ BigQuery Error [{}]\x1b[0m", err.error_code());
    eprintln!("  {}", err);
    eprintln!("\n\x1b[33mSuggestion:\x1b[0m");
    for line in err.suggestion().lines() {
        eprintln!("  {}", line);
    }
    eprintln!();
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Run => {
            cmd_run(&cli.tables, &cli.schemas, cli.postgres.into(), cli.warehouse.into()).await
        }
        Commands::Validate => cmd_validate(&cli.tables, &cli.schemas),
        Commands::Init => cmd_init(cli.warehouse.into()).await,
    }
}

async fn cmd_run(
    tables_path: &Path,
    schemas_path: &Path,
    postgres: PostgresConfig,
    warehouse: WarehouseConfig,
) -> Result<()> {
    let config = ConfigLoader::load(tables_path, schemas_path)?;
    let project = warehouse.project_id()?;
    let layout = warehouse.layout()?;

    let source = PgSource::connect(&postgres).await?;
    let client = BqClient::new(project).await?;

    let runner = IngestionRunner::new(Box::new(source), Box::new(client), layout, config);
    let report = runner.run().await?;

    print_run_report(&report);
    Ok(())
}

fn print_run_report(report: &RunReport) {
    let rows: Vec<RunSummaryRow> = report
        .tables
        .iter()
        .map(|t| RunSummaryRow {
            table: t.table.clone(),
            rows: t.metrics.rows_extracted,
            action: t.action.to_string(),
            load_sec: format!("{:.2}", t.metrics.load_time_sec),
            metrics: if t.metrics_written { "written" } else { "skipped" }.to_string(),
            anomaly: match &t.anomaly {
                Some(a) => format!("{:.1}% (was {})", a.change_pct, a.last),
                None => "-".to_string(),
            },
        })
        .collect();

    if !rows.is_empty() {
        let mut table = Table::new(rows);
        table.with(Style::markdown());
        println!("{}", table);
    }

    if let Some(stopped) = &report.stopped_early {
        println!("\x1b[33m⚠\x1b[0m Run ended early: source table '{}' is empty", stopped);
    }
    println!("✓ Ingestion run {} finished", report.run_id);
}

fn cmd_validate(tables_path: &Path, schemas_path: &Path) -> Result<()> {
    info!("Validating {} and {}", tables_path.display(), schemas_path.display());

    let tables = ConfigLoader::load_tables(tables_path)?;
    let schemas = ConfigLoader::load_schemas(schemas_path)?;
    let result = ConfigValidator::validate(&tables);

    if !tables.tables.is_empty() {
        let rows: Vec<TableSummaryRow> = tables
            .tables
            .iter()
            .map(|spec| TableSummaryRow::new(spec, &schemas))
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::markdown());
        println!("{}", table);
    }

    for err in &result.errors {
        match &err.table {
            Some(t) => println!("  {} [{}] {}: {}", "\x1b[31m✗\x1b[0m", err.code, t, err.message),
            None => println!("  {} [{}] {}", "\x1b[31m✗\x1b[0m", err.code, err.message),
        }
    }
    for warn in &result.warnings {
        println!("  {} [{}] {}: {}", "\x1b[33m⚠\x1b[0m", warn.code, warn.table, warn.message);
    }

    if !result.is_valid() {
        return Err(IngestError::Config(result.error_summary()));
    }

    println!(
        "✓ {} table(s) valid, {} warning(s)",
        tables.tables.len(),
        result.warnings.len()
    );
    Ok(())
}

async fn cmd_init(warehouse: WarehouseConfig) -> Result<()> {
    let project = warehouse.project_id()?;
    let layout = warehouse.layout()?;
    info!("Initializing datasets in {}", project);

    let client = BqClient::new(project).await?;
    ensure_datasets(&client, &layout).await?;

    let store = MetricsStore::new(&client, &layout);
    store.ensure_table().await?;

    println!("✓ Datasets ready: {}", layout.datasets().join(", "));
    println!("✓ Metrics table ready: {}", store.table());
    Ok(())
}
