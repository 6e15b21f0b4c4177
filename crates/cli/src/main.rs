use clap::{Parser, Subcommand};

use marketflow_core::{ConfigLoader, SourceKind, TriggeredBy};
use marketflow_etl::EtlPipeline;
use marketflow_ingest::{make_source, Ingester, RateLimitedFetcher};
use marketflow_web_api::ApiServer;

#[derive(Parser)]
#[command(name = "marketflow")]
#[command(about = "Market-data ETL pipeline and reporting API", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one full pipeline cycle (ingest then transform, all sources)
    Run {
        /// Config file path
        #[arg(short, long, default_value = "config/Config.toml")]
        config: String,
    },
    /// Ingest a single source without transforming
    Ingest {
        /// Source name (coingecko_markets, coinpaprika_tickers, csv_market_data)
        #[arg(short, long)]
        source: SourceKind,
        /// Config file path
        #[arg(short, long, default_value = "config/Config.toml")]
        config: String,
    },
    /// Start the reporting API server
    Serve {
        /// Config file path
        #[arg(short, long, default_value = "config/Config.toml")]
        config: String,
        /// Server address (overrides config)
        #[arg(short, long)]
        addr: Option<String>,
    },
    /// Apply pending database migrations and exit
    Migrate {
        /// Config file path
        #[arg(short, long, default_value = "config/Config.toml")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match cli.command {
        Commands::Run { config } => {
            run_pipeline(&config).await?;
        }
        Commands::Ingest { source, config } => {
            run_ingest(source, &config).await?;
        }
        Commands::Serve { config, addr } => {
            run_server(&config, addr.as_deref()).await?;
        }
        Commands::Migrate { config } => {
            run_migrate(&config).await?;
        }
    }

    Ok(())
}

async fn connect(config_path: &str) -> anyhow::Result<(sqlx::PgPool, marketflow_core::AppConfig)> {
    let config = ConfigLoader::load_from(config_path)?;
    let pool =
        marketflow_data::connect(&config.database.url, config.database.max_connections).await?;
    Ok((pool, config))
}

async fn run_pipeline(config_path: &str) -> anyhow::Result<()> {
    let (pool, config) = connect(config_path).await?;
    marketflow_data::run_migrations(&pool).await?;

    let pipeline = EtlPipeline::new(pool, config.sources);
    let stats = pipeline.run().await?;

    for (source, inserted) in &stats.ingested {
        tracing::info!(source, inserted, "ingest summary");
    }
    for (source, outcome) in &stats.transformed {
        tracing::info!(
            source,
            success = outcome.success,
            failed = outcome.failed,
            "transform summary"
        );
    }

    Ok(())
}

async fn run_ingest(source: SourceKind, config_path: &str) -> anyhow::Result<()> {
    let (pool, config) = connect(config_path).await?;
    marketflow_data::run_migrations(&pool).await?;

    let settings = config.sources.for_source(source);
    let fetcher = RateLimitedFetcher::new(settings)?;
    let feed = make_source(source, settings);

    let inserted = Ingester::new(pool)
        .run(feed.as_ref(), &fetcher, TriggeredBy::Manual)
        .await?;
    tracing::info!(source = source.name(), inserted, "ingestion finished");

    Ok(())
}

async fn run_server(config_path: &str, addr_override: Option<&str>) -> anyhow::Result<()> {
    let (pool, config) = connect(config_path).await?;
    marketflow_data::run_migrations(&pool).await?;

    let addr = match addr_override {
        Some(addr) => addr.to_string(),
        None => format!("{}:{}", config.server.host, config.server.port),
    };

    let server = ApiServer::new(pool, config.sources);
    server.serve(&addr).await
}

async fn run_migrate(config_path: &str) -> anyhow::Result<()> {
    let (pool, _config) = connect(config_path).await?;
    marketflow_data::run_migrations(&pool).await?;
    tracing::info!("migrations applied");
    Ok(())
}
