//! coinctl: command-line coin control for UTXO wallets.
//!
//! Every command refreshes the given address first, then browses, selects,
//! funds or annotates against the reconciled live set. Annotations persist
//! in a JSON metadata file.

mod config;
mod esplora;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};

use coinctl_core::constants::COIN;
use coinctl_core::traits::ChainUtxoSource;
use coinctl_core::types::{Chain, ManagedUtxo, SelectionStrategy, Utxo, UtxoKey, UtxoSource};
use coinctl_engine::{
    CoinControlEngine, JsonFileStore, MemoryUtxoSource, SelectionSummary, Snapshot,
};

use crate::config::CliConfig;
use crate::esplora::EsploraSource;

/// UTXO coin control: privacy-aware browsing, selection and annotation.
#[derive(Parser)]
#[command(name = "coinctl")]
#[command(version, about = "Coin control for UTXO wallets")]
struct Cli {
    /// Configuration file (default: ~/.coinctl/config.toml if present).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Chain the address lives on.
    #[arg(long, global = true, default_value = "bitcoin")]
    chain: Chain,

    /// Metadata file (overrides the configured path).
    #[arg(long, global = true)]
    metadata: Option<PathBuf>,

    /// Read raw UTXOs from a JSON file (`{"<address>": [utxo, ...]}`)
    /// instead of querying Esplora.
    #[arg(long, global = true)]
    utxo_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List spendable and frozen outputs in strategy order.
    List(ListArgs),
    /// Pick the minimal strategy-ordered prefix covering a target.
    Select(SelectArgs),
    /// Pick inputs covering a target plus the estimated fee.
    Fund(FundArgs),
    /// Validate a hand-picked set of outputs.
    Pick(PickArgs),
    /// Exclude an output from selection.
    Freeze(KeyArgs),
    /// Make a frozen output spendable again.
    Unfreeze(KeyArgs),
    /// Set an output's label.
    Label(TextArgs),
    /// Set an output's note.
    Note(TextArgs),
    /// Set an output's provenance.
    Source(SourceArgs),
}

#[derive(Args)]
struct ListArgs {
    address: String,

    /// Ordering strategy.
    #[arg(short, long, default_value = "optimal")]
    strategy: SelectionStrategy,
}

#[derive(Args)]
struct SelectArgs {
    address: String,

    #[arg(short, long, default_value = "optimal")]
    strategy: SelectionStrategy,

    /// Amount to cover, in the chain's smallest unit.
    #[arg(short, long)]
    target: u64,
}

#[derive(Args)]
struct FundArgs {
    address: String,

    #[arg(short, long, default_value = "optimal")]
    strategy: SelectionStrategy,

    /// Payment amount, in the chain's smallest unit.
    #[arg(short, long)]
    target: u64,

    /// Fee rate in smallest units per vbyte.
    #[arg(short, long)]
    fee_rate: u64,
}

#[derive(Args)]
struct PickArgs {
    address: String,

    /// Outputs as `txid:vout`.
    #[arg(required = true)]
    keys: Vec<UtxoKey>,

    /// Amount the picked outputs must cover.
    #[arg(short, long)]
    target: Option<u64>,
}

#[derive(Args)]
struct KeyArgs {
    address: String,
    /// Output as `txid:vout`.
    key: UtxoKey,
}

#[derive(Args)]
struct TextArgs {
    address: String,
    key: UtxoKey,
    text: String,
}

#[derive(Args)]
struct SourceArgs {
    address: String,
    key: UtxoKey,
    /// wallet, exchange, mining, gift, unknown, p2p, salary, change,
    /// self-transfer, coinjoin, lightning
    source: UtxoSource,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = CliConfig::load(cli.config.as_deref())?;

    init_logging(&cfg.log_level, &cfg.log_format);

    let engine = build_engine(&cli, &cfg).await?;
    let chain = cli.chain;

    match cli.command {
        Commands::List(args) => list(&engine, &args.address, chain, args.strategy).await,
        Commands::Select(args) => select(&engine, args, chain).await,
        Commands::Fund(args) => fund(&engine, args, chain).await,
        Commands::Pick(args) => pick(&engine, args, chain).await,
        Commands::Freeze(args) => {
            refresh(&engine, &args.address, chain).await?;
            engine.set_frozen(&args.key, true).await?;
            println!("Frozen {}", args.key);
            Ok(())
        }
        Commands::Unfreeze(args) => {
            refresh(&engine, &args.address, chain).await?;
            engine.set_frozen(&args.key, false).await?;
            println!("Unfrozen {}", args.key);
            Ok(())
        }
        Commands::Label(args) => {
            refresh(&engine, &args.address, chain).await?;
            engine.set_label(&args.key, args.text).await?;
            println!("Labelled {}", args.key);
            Ok(())
        }
        Commands::Note(args) => {
            refresh(&engine, &args.address, chain).await?;
            engine.set_note(&args.key, args.text).await?;
            println!("Noted {}", args.key);
            Ok(())
        }
        Commands::Source(args) => {
            refresh(&engine, &args.address, chain).await?;
            engine.set_source(&args.key, args.source).await?;
            println!("Source of {} set to {}", args.key, args.source.label());
            Ok(())
        }
    }
}

/// Logs go to stderr so command output stays pipeable.
fn init_logging(level_str: &str, format: &str) {
    use tracing_subscriber::filter::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level_str));

    if format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}

async fn build_engine(cli: &Cli, cfg: &CliConfig) -> Result<CoinControlEngine> {
    let source: Arc<dyn ChainUtxoSource> = match &cli.utxo_file {
        Some(path) => {
            let body = tokio::fs::read(path)
                .await
                .with_context(|| format!("Failed to read UTXO file: {}", path.display()))?;
            let map: HashMap<String, Vec<Utxo>> = serde_json::from_slice(&body)
                .with_context(|| format!("Invalid UTXO file: {}", path.display()))?;
            Arc::new(MemoryUtxoSource::from_address_map(cli.chain, map))
        }
        None => {
            let engine_cfg = cfg.engine_config();
            Arc::new(
                EsploraSource::new(cfg.esplora.clone(), engine_cfg.refresh_timeout)
                    .context("Failed to build HTTP client")?,
            )
        }
    };

    let metadata_path = cli
        .metadata
        .clone()
        .unwrap_or_else(|| cfg.metadata_path.clone());
    let store = JsonFileStore::open(&metadata_path)
        .await
        .with_context(|| format!("Failed to open metadata: {}", metadata_path.display()))?;

    Ok(CoinControlEngine::new(
        source,
        Arc::new(store),
        cfg.engine_config(),
    ))
}

async fn refresh(engine: &CoinControlEngine, address: &str, chain: Chain) -> Result<()> {
    engine
        .refresh(address, chain)
        .await
        .with_context(|| format!("Failed to refresh {address} on {chain}"))?;
    Ok(())
}

async fn list(
    engine: &CoinControlEngine,
    address: &str,
    chain: Chain,
    strategy: SelectionStrategy,
) -> Result<()> {
    refresh(engine, address, chain).await?;
    let live = engine.live_set();

    let spendable = engine.select(strategy, None)?;
    let mut frozen: Vec<ManagedUtxo> = live.utxos().iter().filter(|u| u.is_frozen()).cloned().collect();
    coinctl_engine::selection::sort(&mut frozen, strategy);

    println!("{address} ({chain}), {} order", strategy.label());
    print_snapshot(&live.snapshot(), chain);

    if spendable.is_empty() && frozen.is_empty() {
        println!("\nNo unspent outputs.");
        return Ok(());
    }
    if !spendable.is_empty() {
        println!("\nSpendable:");
        print_utxos(&spendable, chain);
    }
    if !frozen.is_empty() {
        println!("\nFrozen:");
        print_utxos(&frozen, chain);
    }
    Ok(())
}

async fn select(engine: &CoinControlEngine, args: SelectArgs, chain: Chain) -> Result<()> {
    refresh(engine, &args.address, chain).await?;
    let picked = engine.select(args.strategy, Some(args.target))?;
    println!("Selected ({}):", args.strategy.label());
    print_utxos(&picked, chain);
    print_summary(&SelectionSummary::of(&picked), chain);
    Ok(())
}

async fn fund(engine: &CoinControlEngine, args: FundArgs, chain: Chain) -> Result<()> {
    refresh(engine, &args.address, chain).await?;
    let plan = engine.fund(args.strategy, args.target, args.fee_rate)?;
    println!("Funding plan ({}):", args.strategy.label());
    print_utxos(&plan.selected, chain);
    println!();
    println!("  Inputs:  {}", format_amount(plan.total, chain));
    println!("  Payment: {}", format_amount(args.target, chain));
    println!("  Fee:     {} ({} per vB)", format_amount(plan.fee, chain), args.fee_rate);
    println!("  Change:  {}", format_amount(plan.change, chain));
    Ok(())
}

async fn pick(engine: &CoinControlEngine, args: PickArgs, chain: Chain) -> Result<()> {
    refresh(engine, &args.address, chain).await?;
    let picked = engine.select_manual(&args.keys, args.target)?;
    if picked.is_empty() {
        bail!("No outputs picked");
    }
    println!("Picked:");
    print_utxos(&picked, chain);
    print_summary(&SelectionSummary::of(&picked), chain);
    Ok(())
}

fn format_amount(value: u64, chain: Chain) -> String {
    format!(
        "{}.{:08} {}",
        value / COIN,
        value % COIN,
        chain.ticker()
    )
}

fn print_snapshot(snapshot: &Snapshot, chain: Chain) {
    println!("  Total:     {}", format_amount(snapshot.total, chain));
    println!("  Spendable: {}", format_amount(snapshot.spendable, chain));
    println!("  Frozen:    {}", format_amount(snapshot.frozen, chain));
    println!(
        "  Outputs:   {} (avg privacy {}%)",
        snapshot.count, snapshot.average_privacy_score
    );
}

fn print_summary(summary: &SelectionSummary, chain: Chain) {
    println!(
        "\n  {} input(s), {} total, avg privacy {}%",
        summary.input_count,
        format_amount(summary.total_value, chain),
        summary.average_privacy_score
    );
}

fn print_utxos(utxos: &[ManagedUtxo], chain: Chain) {
    for u in utxos {
        let label = if u.metadata.label.is_empty() {
            String::new()
        } else {
            format!("  \"{}\"", u.metadata.label)
        };
        println!(
            "  {}:{:<4} {:>20}  {:>7} conf  privacy {:>3}  {:<13}{}",
            u.short_txid(),
            u.utxo.vout,
            format_amount(u.value(), chain),
            u.confirmations(),
            u.privacy_score,
            u.metadata.source.label(),
            label
        );
    }
}
