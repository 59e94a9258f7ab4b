use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;
use xsr_assets::core::codec::carried_type;
use xsr_assets::*;

#[derive(Parser)]
#[command(name = "xsr-assets")]
#[command(about = "Sucrecoin asset layer tools - name grammar, script codec and asset directory")]
#[command(version = "1.0.0")]
struct Cli {
    /// Network parameters to use (main or regtest)
    #[arg(short, long, global = true, default_value = "main")]
    network: String,

    /// Node configuration file (JSON); overrides --network
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify an asset name and report its type
    Classify {
        name: String,
    },

    /// Convert a hex content hash (34 bytes) to its base58 text form
    IpfsDecode {
        hex: String,
    },

    /// Convert a base58 content hash to hex
    IpfsEncode {
        hash: String,
    },

    /// Decode an output script given in hex
    DecodeScript {
        script: String,
    },

    /// Build a transfer output script
    BuildTransfer {
        /// Asset name
        #[arg(long)]
        name: String,

        /// Decimal amount, e.g. 12.5
        #[arg(long)]
        amount: String,

        /// Decimal places the asset was minted with
        #[arg(long, default_value = "0")]
        units: u8,

        /// Recipient address
        #[arg(long)]
        to: String,
    },

    /// List directory entries (requires a config with a directory path)
    ListAssets {
        /// `*`, `PREFIX*` or an exact name
        #[arg(default_value = "*")]
        filter: String,

        /// Include full definitions
        #[arg(short, long)]
        verbose: bool,

        /// Number of entries to return
        #[arg(long)]
        count: Option<usize>,

        /// First entry; negative counts from the end
        #[arg(long, default_value = "0", allow_hyphen_values = true)]
        start: i64,
    },

    /// Show the directory entry of one asset
    GetAssetData {
        name: String,
    },

    /// Print the active network parameters
    ShowParams,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = load_config(&cli).and_then(|config| match cli.command {
        Commands::Classify { name } => handle_classify(name),
        Commands::IpfsDecode { hex } => handle_ipfs_decode(hex),
        Commands::IpfsEncode { hash } => handle_ipfs_encode(hash),
        Commands::DecodeScript { script } => handle_decode_script(script, &config.params),
        Commands::BuildTransfer {
            name,
            amount,
            units,
            to,
        } => handle_build_transfer(name, amount, units, to, &config.params),
        Commands::ListAssets {
            filter,
            verbose,
            count,
            start,
        } => handle_list_assets(&config, filter, verbose, count, start),
        Commands::GetAssetData { name } => handle_get_asset_data(&config, name),
        Commands::ShowParams => handle_show_params(&config.params),
    });

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<CoreConfig> {
    match &cli.config {
        Some(path) => CoreConfig::from_json_file(path)
            .with_context(|| format!("loading {}", path.display())),
        None => Ok(CoreConfig::in_memory(AssetParams::for_network(&cli.network)?)),
    }
}

/// Opens the durable directory. No coins are loaded, so only directory queries are meaningful.
fn open_directory(config: &CoreConfig) -> anyhow::Result<AssetCore> {
    if config.directory_path.is_none() {
        bail!("no directory_path configured; pass --config with a directory location");
    }
    let core = AssetCore::open(config)?;
    core.load(Vec::new())?;
    Ok(core)
}

fn handle_classify(name: String) -> anyhow::Result<()> {
    let (valid, asset_type) = classify(&name);
    println!("Name: {}", name);
    println!("Valid: {}", valid);
    println!("Type: {}", asset_type);
    if valid {
        if let Some(parent) = parent_name(&name) {
            println!("Parent: {}", parent);
        }
    }
    Ok(())
}

fn handle_ipfs_decode(text: String) -> anyhow::Result<()> {
    let bytes = hex::decode(text.trim()).context("content hash is not hex")?;
    let hash = ContentHash::from_slice(&bytes)?;
    println!("{}", hash.to_base58());
    Ok(())
}

fn handle_ipfs_encode(text: String) -> anyhow::Result<()> {
    let hash = ContentHash::from_base58(text.trim())?;
    println!("{}", hex::encode(hash.as_bytes()));
    Ok(())
}

fn handle_decode_script(text: String, params: &AssetParams) -> anyhow::Result<()> {
    let script = Script::from_hex(text.trim())?;
    let decoded = decode_script(&script)?;
    let report = serde_json::json!({
        "asset": decoded,
        "type": carried_type(&decoded).map(|t| t.as_str()),
        "address": decoded.destination().map(|d| d.to_address(&params.address_prefixes)),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn handle_build_transfer(
    name: String,
    amount: String,
    units: u8,
    to: String,
    params: &AssetParams,
) -> anyhow::Result<()> {
    let amount = parse_amount(&amount, units)?;
    let destination = Destination::from_address(&to, &params.address_prefixes)?;
    let script = build_transfer_script(&AssetTransfer::new(name, amount), &destination)?;
    println!("{}", script.to_hex());
    Ok(())
}

fn handle_list_assets(
    config: &CoreConfig,
    filter: String,
    verbose: bool,
    count: Option<usize>,
    start: i64,
) -> anyhow::Result<()> {
    let core = open_directory(config)?;
    let entries = core.directory_page(&filter, count, start)?;
    if verbose {
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else {
        for entry in &entries {
            println!("{}", entry.definition.name);
        }
    }
    core.shutdown()?;
    Ok(())
}

fn handle_get_asset_data(config: &CoreConfig, name: String) -> anyhow::Result<()> {
    let core = open_directory(config)?;
    let entry = core
        .asset_definition(&name)?
        .ok_or_else(|| anyhow!("asset {} not found", name))?;
    let definition = &entry.definition;
    println!("Name: {}", definition.name);
    println!("Amount: {}", format_amount(definition.amount, definition.units)?);
    println!("Units: {}", definition.units);
    println!("Reissuable: {}", definition.reissuable);
    if let Some(hash) = &definition.content_hash {
        println!("Content Hash: {}", hash);
    }
    println!("Mint Height: {}", entry.mint_height);
    core.shutdown()?;
    Ok(())
}

fn handle_show_params(params: &AssetParams) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(params)?);
    Ok(())
}
