//! Grid CLI binary
//!
//! Run with:
//! ```bash
//! GRID_PRIVATE_KEY=0x... cargo run -p grid-client --bin grid -- \
//!     --contract 0x... create --name "Plant A" --load 600 --capacity 1000
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use alloy_primitives::Address;
use clap::{Parser, Subcommand};
use grid_client::{
    metrics, signer_from_env, AlloyLedger, CreateRequest, LoadTicker, RecordStore, RelayerGateway,
    VerificationOutcome,
};
use grid_core::{GridConfig, Record, RecordId};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "grid")]
#[command(about = "Confidential energy-grid records on an FHE-enabled ledger")]
struct Args {
    /// JSON config file (flags below override it)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Ledger RPC URL
    #[arg(long)]
    rpc_url: Option<String>,

    /// FHE relayer URL
    #[arg(long)]
    relayer_url: Option<String>,

    /// Grid contract address
    #[arg(long)]
    contract: Option<Address>,

    /// Ethereum chain ID
    #[arg(long)]
    chain_id: Option<u64>,

    /// Print Prometheus metrics before exiting
    #[arg(long)]
    metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List records, optionally filtered by name or creator
    List {
        #[arg(long)]
        search: Option<String>,
    },
    /// Encrypt a load value and create a record
    Create {
        #[arg(long)]
        name: String,
        #[arg(long, allow_hyphen_values = true)]
        load: i64,
        #[arg(long, allow_hyphen_values = true)]
        capacity: i64,
    },
    /// Decrypt a record's load and verify it on-chain
    Verify { id: RecordId },
    /// Show load analysis for a record
    Analyze { id: RecordId },
    /// Show aggregate statistics
    Stats,
    /// Print simulated real-time load samples
    Ticker {
        #[arg(long, default_value = "10")]
        ticks: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("grid_client=info".parse()?))
        .init();

    let args = Args::parse();
    let recorder = if args.metrics {
        Some(metrics::init_prometheus_recorder()?)
    } else {
        None
    };

    let mut config = match &args.config {
        Some(path) => GridConfig::load(path)?,
        None => GridConfig::default(),
    };
    if let Some(url) = args.rpc_url {
        config.rpc_url = url;
    }
    if let Some(url) = args.relayer_url {
        config.relayer_url = url;
    }
    if let Some(contract) = args.contract {
        config.contract_address = contract;
    }
    if let Some(chain_id) = args.chain_id {
        config.chain_id = chain_id;
    }
    config.validate()?;

    match args.command {
        Command::Ticker { ticks } => {
            let ticker = LoadTicker::spawn(config.ticker_interval(), config.ticker_window);
            let mut updates = ticker.subscribe();
            for _ in 0..ticks {
                updates.changed().await?;
                if let Some(sample) = ticker.latest() {
                    println!("{sample} MW");
                }
            }
            ticker.stop();
        }
        Command::List { search } => {
            let store = open_store(&config).await?;
            let records = match search {
                Some(term) => store.search(&term).await,
                None => store.records().await,
            };
            for record in &records {
                let reading = store.load_reading(&record.id).await;
                print_record(record, reading.map(|r| r.to_string()));
            }
            println!("{} record(s)", records.len());
        }
        Command::Create {
            name,
            load,
            capacity,
        } => {
            let store = open_store(&config).await?;
            let id = store.create(CreateRequest::new(name, load, capacity)).await?;
            println!("[OK] Created {id}");
        }
        Command::Verify { id } => {
            let store = open_store(&config).await?;
            match store.request_verification(&id).await? {
                VerificationOutcome::Verified { clear_load } => {
                    println!("[OK] {id} verified: {clear_load} MW");
                }
                VerificationOutcome::AlreadyVerified { clear_load: Some(value) } => {
                    println!("[OK] {id} was already verified: {value} MW");
                }
                VerificationOutcome::AlreadyVerified { clear_load: None } => {
                    println!("[OK] {id} was already verified");
                }
            }
        }
        Command::Analyze { id } => {
            let store = open_store(&config).await?;
            let record = store
                .get(&id)
                .await
                .ok_or_else(|| anyhow::anyhow!("record {id} not found"))?;
            let reading = store.load_reading(&id).await;
            print_record(&record, reading.map(|r| r.to_string()));
            match store.analysis(&id).await {
                Some(a) => {
                    println!("  balance:      {}%", a.balance);
                    println!("  efficiency:   {}%", a.efficiency);
                    println!("  stability:    {}%", a.stability);
                    println!("  risk:         {}%", a.risk);
                    println!("  optimization: {}%", a.optimization);
                }
                None => println!("  load is encrypted; run `grid verify {id}` first"),
            }
        }
        Command::Stats => {
            let store = open_store(&config).await?;
            let stats = store.statistics().await;
            println!("Total:        {}", stats.total);
            println!("Verified:     {}", stats.verified);
            println!("Active:       {}", stats.active);
            println!("Avg capacity: {:.1} MW", stats.avg_capacity);
        }
    }

    if let Some(handle) = recorder {
        println!("{}", handle.render());
    }
    Ok(())
}

async fn open_store(config: &GridConfig) -> anyhow::Result<RecordStore> {
    let signer = signer_from_env(&config.private_key_env)?;
    if signer.is_none() {
        tracing::warn!(var = %config.private_key_env, "No signer key set, ledger is read-only");
    }
    let ledger = Arc::new(AlloyLedger::connect(config, signer).await?);
    let gateway = Arc::new(RelayerGateway::new(config.relayer_url.clone())?);
    let store = RecordStore::new(config, ledger, gateway);
    store.initialize().await?;
    Ok(store)
}

fn print_record(record: &Record, reading: Option<String>) {
    println!(
        "{}  {:<24} capacity={:<8} load={:<28} creator={}",
        record.id,
        record.name,
        record.capacity,
        reading.unwrap_or_else(|| "unknown".into()),
        record.creator,
    );
}
