use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use rust_decimal::Decimal;
use settlement_core::config::SettlementConfig;
use settlement_core::domain::fees::{FeeTaxCalculator, LineItem};
use settlement_core::domain::money::Money;
use settlement_core::domain::ports::{ItemDetails, TransactionRepositoryHandle};
use settlement_core::gateway::GatewayRegistry;
use settlement_core::gateway::emi::EmiCalculator;
use settlement_core::infrastructure::in_memory::{
    InMemoryItemCatalog, InMemoryNgoFunds, InMemoryTransactionStore, RecordingEcoImpactService,
    RecordingScoringService, StaticUserDirectory,
};
use settlement_core::interfaces::csv::item_reader::ItemReader;
use settlement_core::interfaces::csv::quote_writer::QuoteWriter;
use settlement_core::interfaces::http::{self, AppState, Collaborators};
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Settlement config file (JSON). Built-in defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log as JSON lines instead of human-readable text
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API
    Serve {
        /// Item catalog CSV: id, owner_id, category and optional eco columns
        #[arg(long)]
        items: Option<PathBuf>,

        /// Overrides `server.bind` from the config
        #[arg(long)]
        bind: Option<String>,

        /// Path to persistent database (optional). If provided, uses RocksDB.
        #[cfg(feature = "storage-rocksdb")]
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
    /// Quote tax and fees for every line of an items CSV, written as CSV to stdout
    Quote {
        /// Items CSV: id, name, category, kind, amount
        input: PathBuf,
    },
    /// Show EMI plans for an amount
    Emi {
        #[arg(long)]
        amount: Decimal,

        /// Single tenor; all eligible tenors are listed when omitted
        #[arg(long)]
        months: Option<u32>,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<PathBuf>) -> Result<SettlementConfig> {
    let config = match path {
        Some(path) => SettlementConfig::from_file(path).into_diagnostic()?,
        None => SettlementConfig::default(),
    }
    .with_env_overrides();
    config.validate().into_diagnostic()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.log_json);
    let config = load_config(cli.config)?;

    match cli.command {
        Command::Quote { input } => quote(&config, input),
        Command::Emi { amount, months } => emi(&config, amount, months),
        #[cfg(feature = "storage-rocksdb")]
        Command::Serve {
            items,
            bind,
            db_path,
        } => {
            let repository: TransactionRepositoryHandle = match db_path {
                Some(path) => Arc::new(
                    settlement_core::infrastructure::rocksdb::RocksDBTransactionStore::open(path)
                        .into_diagnostic()?,
                ),
                None => Arc::new(InMemoryTransactionStore::new()),
            };
            serve(config, repository, items, bind).await
        }
        #[cfg(not(feature = "storage-rocksdb"))]
        Command::Serve { items, bind } => {
            serve(config, Arc::new(InMemoryTransactionStore::new()), items, bind).await
        }
    }
}

fn quote(config: &SettlementConfig, input: PathBuf) -> Result<()> {
    let file = File::open(input).into_diagnostic()?;
    let mut lines: Vec<LineItem> = Vec::new();
    for line in ItemReader::new(file).line_items() {
        match line {
            Ok(line) => lines.push(line),
            Err(e) => tracing::warn!(error = %e, "Skipping unreadable line"),
        }
    }

    let quote = FeeTaxCalculator::from_config(config)
        .quote_batch(&lines)
        .into_diagnostic()?;
    let stdout = io::stdout();
    QuoteWriter::new(stdout.lock())
        .write_quote(&quote)
        .into_diagnostic()?;
    Ok(())
}

fn emi(config: &SettlementConfig, amount: Decimal, months: Option<u32>) -> Result<()> {
    let calculator = EmiCalculator::new(config.emi.clone());
    let amount = Money::new(amount).into_diagnostic()?;
    let output = match months {
        Some(months) => {
            serde_json::to_string_pretty(&calculator.quote(amount, months).into_diagnostic()?)
        }
        None => serde_json::to_string_pretty(&calculator.options(amount)),
    }
    .into_diagnostic()?;
    println!("{}", output);
    Ok(())
}

async fn serve(
    config: SettlementConfig,
    repository: TransactionRepositoryHandle,
    items: Option<PathBuf>,
    bind: Option<String>,
) -> Result<()> {
    let catalog_items: Vec<ItemDetails> = match items {
        Some(path) => ItemReader::new(File::open(path).into_diagnostic()?)
            .catalog_items()
            .collect::<settlement_core::error::Result<_>>()
            .into_diagnostic()?,
        None => Vec::new(),
    };
    tracing::info!(items = catalog_items.len(), "Item catalog loaded");

    let gateways = GatewayRegistry::from_config(&config.gateway).into_diagnostic()?;
    tracing::info!(providers = ?gateways.providers(), "Payment gateways registered");

    let state = AppState::new(
        &config,
        gateways,
        Collaborators {
            repository,
            items: Arc::new(InMemoryItemCatalog::with_items(catalog_items)),
            ngo_funds: Arc::new(InMemoryNgoFunds::new()),
            scoring: Arc::new(RecordingScoringService::new()),
            eco_impact: Arc::new(RecordingEcoImpactService::new()),
            users: Arc::new(StaticUserDirectory::default()),
        },
    )
    .into_diagnostic()?;

    let bind = bind.unwrap_or_else(|| config.server.bind.clone());
    let listener = tokio::net::TcpListener::bind(&bind).await.into_diagnostic()?;
    tracing::info!(bind = %bind, "Settlement API listening");
    axum::serve(listener, http::router(state))
        .await
        .into_diagnostic()?;
    Ok(())
}
