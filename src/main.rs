use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use oa_forecast::db::{self, InputTable};
use oa_forecast::report::{self, OutputFormat};
use oa_forecast::{loader, pipeline, ForecastConfig};

#[derive(Parser)]
#[command(name = "oa-forecast")]
#[command(about = "Forecasts open access availability and readership", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the staging schema
    InitDb,
    /// Import one input table from a CSV file
    Import {
        #[arg(long, value_enum)]
        table: InputTable,
        #[arg(long)]
        csv: PathBuf,
    },
    /// Run the forecast and write its output tables
    Forecast {
        /// TOML file overriding the default run settings
        #[arg(long)]
        config: Option<PathBuf>,
        /// Directory of input CSV files; inputs come from Postgres when omitted
        #[arg(long)]
        input_dir: Option<PathBuf>,
        /// Directory the output tables are written to
        #[arg(long)]
        out: PathBuf,
        #[arg(long, value_enum, default_value_t = OutputFormat::Csv)]
        format: OutputFormat,
    },
}

async fn connect() -> anyhow::Result<PgPool> {
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to reach the staging Postgres instance")?;

    PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("failed to install log subscriber")?;

    match cli.command {
        Commands::InitDb => {
            let pool = connect().await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Import { table, csv } => {
            let pool = connect().await?;
            let written = db::import_csv(&pool, table, &csv).await?;
            println!(
                "Wrote {written} rows into {} from {}.",
                table.table_name(),
                csv.display()
            );
        }
        Commands::Forecast {
            config,
            input_dir,
            out,
            format,
        } => {
            let config = match config {
                Some(path) => ForecastConfig::load(&path)
                    .with_context(|| format!("failed to load config {}", path.display()))?,
                None => ForecastConfig::default(),
            };
            let inputs = match input_dir {
                Some(dir) => loader::load_inputs(&dir)
                    .with_context(|| format!("failed to load inputs from {}", dir.display()))?,
                None => db::fetch_inputs(&connect().await?).await?,
            };

            let outputs = tokio::task::spawn_blocking(move || pipeline::run(&config, &inputs))
                .await
                .context("forecast task panicked")?
                .context("forecast failed")?;

            let written = report::write_outputs(&outputs, &out, format)?;
            print!("{}", report::build_summary(&outputs));
            println!("Wrote {} files to {}.", written.len(), out.display());
        }
    }

    Ok(())
}
