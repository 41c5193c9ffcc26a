//! hostrecon command-line ingest tool
//!
//! Feeds scanner output into a persistent inventory and prints results as JSON.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use hostrecon::{
    open_inventory, BatchReport, DomainAssetRecord, EngineConfig, HostRecord, InventoryEngine,
};

const DEFAULT_BATCH_SIZE: usize = 50;

enum Command {
    SubmitHosts(PathBuf),
    SubmitDomainAssets(PathBuf),
    ListHosts,
    ListDomainAssets,
    DeleteHosts,
    AddUser(String),
}

/// CLI configuration
struct Config {
    /// Data directory for the inventory
    data_dir: PathBuf,
    /// Optional engine configuration file
    config_file: Option<PathBuf>,
    /// Host records per submitted batch
    batch_size: usize,
    command: Command,
}

fn usage() {
    println!("hostrecon - asset inventory reconciliation");
    println!();
    println!("USAGE:");
    println!("    hostrecon [OPTIONS] <COMMAND>");
    println!();
    println!("OPTIONS:");
    println!("    -d, --data-dir <DIR>      Data directory [default: ./inventory.hrcn]");
    println!("    -c, --config <FILE>       Engine configuration (JSON)");
    println!("    -b, --batch-size <N>      Host records per batch [default: {DEFAULT_BATCH_SIZE}]");
    println!("    -h, --help                Print help information");
    println!();
    println!("COMMANDS:");
    println!("    submit-hosts <FILE>           Reconcile a JSON array of host records");
    println!("    submit-domain-assets <FILE>   Reconcile a JSON array of domain asset records");
    println!("    list-hosts                    Print the host inventory");
    println!("    list-domain-assets            Print all domain assets");
    println!("    delete-hosts                  Remove every host");
    println!("    add-user <NAME>               Register a host owner");
}

fn fail(message: &str) -> ! {
    eprintln!("error: {message}");
    std::process::exit(1);
}

fn value(args: &[String], i: usize, flag: &str) -> String {
    args.get(i + 1)
        .cloned()
        .unwrap_or_else(|| fail(&format!("{flag} requires a value")))
}

fn parse_args() -> Config {
    let args: Vec<String> = std::env::args().collect();
    let mut data_dir = PathBuf::from("./inventory.hrcn");
    let mut config_file = None;
    let mut batch_size = DEFAULT_BATCH_SIZE;
    let mut command = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--data-dir" | "-d" => {
                data_dir = PathBuf::from(value(&args, i, "--data-dir"));
                i += 2;
            }
            "--config" | "-c" => {
                config_file = Some(PathBuf::from(value(&args, i, "--config")));
                i += 2;
            }
            "--batch-size" | "-b" => {
                let raw = value(&args, i, "--batch-size");
                batch_size = match raw.parse::<usize>() {
                    Ok(n) if n > 0 => n,
                    _ => fail(&format!("invalid batch size: {raw}")),
                };
                i += 2;
            }
            "--help" | "-h" => {
                usage();
                std::process::exit(0);
            }
            "submit-hosts" => {
                command = Some(Command::SubmitHosts(PathBuf::from(value(&args, i, "submit-hosts"))));
                i += 2;
            }
            "submit-domain-assets" => {
                command = Some(Command::SubmitDomainAssets(PathBuf::from(value(
                    &args,
                    i,
                    "submit-domain-assets",
                ))));
                i += 2;
            }
            "list-hosts" => {
                command = Some(Command::ListHosts);
                i += 1;
            }
            "list-domain-assets" => {
                command = Some(Command::ListDomainAssets);
                i += 1;
            }
            "delete-hosts" => {
                command = Some(Command::DeleteHosts);
                i += 1;
            }
            "add-user" => {
                command = Some(Command::AddUser(value(&args, i, "add-user")));
                i += 2;
            }
            arg => fail(&format!("unknown argument: {arg}")),
        }
    }

    let Some(command) = command else {
        usage();
        std::process::exit(1);
    };
    Config {
        data_dir,
        config_file,
        batch_size,
        command,
    }
}

fn read_records<T: serde::de::DeserializeOwned>(
    path: &Path,
) -> Result<Vec<T>, Box<dyn std::error::Error>> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Submits `records` in chunks, handing each report to `emit` as soon as its
/// chunk commits. A failing chunk stops the run; earlier chunks stay committed
/// and have already been emitted.
fn submit_in_batches(
    engine: &InventoryEngine,
    records: Vec<HostRecord>,
    batch_size: usize,
    mut emit: impl FnMut(&BatchReport) -> Result<(), Box<dyn std::error::Error>>,
) -> Result<usize, Box<dyn std::error::Error>> {
    let mut committed = 0;
    for chunk in records.chunks(batch_size.max(1)) {
        let report = engine.submit_hosts(chunk.to_vec()).map_err(|e| {
            tracing::error!(error = %e, committed_batches = committed, "host batch failed");
            e
        })?;
        emit(&report)?;
        committed += 1;
    }
    Ok(committed)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "hostrecon=info".into()))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = parse_args();
    let engine_config = match &config.config_file {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };

    // Holds the directory lock for the process lifetime.
    let store = open_inventory(&config.data_dir, None)?;
    let engine = InventoryEngine::new(Arc::new(store), engine_config)?;

    match config.command {
        Command::SubmitHosts(path) => {
            let records: Vec<HostRecord> = read_records(&path)?;
            tracing::info!(records = records.len(), batch_size = config.batch_size, "submitting hosts");
            submit_in_batches(&engine, records, config.batch_size, print_json::<BatchReport>)?;
        }
        Command::SubmitDomainAssets(path) => {
            let records: Vec<DomainAssetRecord> = read_records(&path)?;
            print_json(&engine.submit_domain_assets(records)?)?;
        }
        Command::ListHosts => print_json(&engine.list_hosts()?)?,
        Command::ListDomainAssets => print_json(&engine.list_domain_assets()?)?,
        Command::DeleteHosts => {
            let removed = engine.delete_all_hosts()?;
            print_json(&serde_json::json!({ "removed": removed }))?;
        }
        Command::AddUser(name) => print_json(&engine.register_user(&name)?)?,
    }
    Ok(())
}
