//! utxoscan CLI — inspect scanner configuration and stored state.
//!
//! Usage:
//! ```bash
//! utxoscan status --db ./scanner.db --symbol VAS
//! utxoscan config --config ./scanner.json
//! utxoscan info
//! ```

mod logging;

use std::collections::BTreeMap;
use std::env;
use std::path::Path;
use std::process;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use utxoscan_core::{CursorStore, ScannerConfig, UnscanStore, UnscanTask};
use utxoscan_storage::SqliteStorage;

use logging::{init_tracing, LogConfig};

/// Contents of the `--config` JSON file. Missing fields take their defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct CliConfig {
    scanner: ScannerConfig,
    log: LogConfig,
}

impl CliConfig {
    fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing config file {}", path.display()))
    }
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    if let Err(e) = run(&args).await {
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}

async fn run(args: &[String]) -> anyhow::Result<()> {
    let config = match flag_value(args, "--config") {
        Some(path) => CliConfig::load(Path::new(path))?,
        None => CliConfig::default(),
    };
    let mut log = config.log.clone();
    if let Some(level) = flag_value(args, "--log-level") {
        log.level = level.to_string();
    }
    if has_flag(args, "--log-json") {
        log.json = true;
    }
    init_tracing(&log);

    match args[1].as_str() {
        "info" => cmd_info(),
        "config" => cmd_config(&config)?,
        "status" => {
            let db = flag_value(args, "--db").context("status requires --db <path>")?;
            let symbol = flag_value(args, "--symbol").unwrap_or(&config.scanner.symbol);
            cmd_status(db, symbol).await?;
        }
        "version" | "--version" | "-V" => {
            println!("utxoscan {}", env!("CARGO_PKG_VERSION"));
        }
        "help" | "--help" | "-h" => print_usage(),
        other => {
            print_usage();
            bail!("unknown command: {other}");
        }
    }
    Ok(())
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

fn print_usage() {
    println!("utxoscan {}", env!("CARGO_PKG_VERSION"));
    println!("Fork-aware UTXO block scanner and transaction extractor\n");
    println!("USAGE:");
    println!("    utxoscan <COMMAND> [OPTIONS]\n");
    println!("COMMANDS:");
    println!("    info     Show scanner defaults");
    println!("    config   Print the effective configuration as JSON");
    println!("    status   Show the stored cursor and pending unscanned records");
    println!("    version  Print version");
    println!("    help     Print this help\n");
    println!("OPTIONS:");
    println!("    --config <file>     JSON config file ({{\"scanner\": {{..}}, \"log\": {{..}}}})");
    println!("    --db <path>         SQLite database (status)");
    println!("    --symbol <symbol>   Chain symbol (status; default from config)");
    println!("    --log-level <lvl>   trace | debug | info | warn | error");
    println!("    --log-json          Emit JSON logs");
}

fn cmd_info() {
    let defaults = ScannerConfig::default();
    println!("utxoscan v{}", env!("CARGO_PKG_VERSION"));
    println!("  Default symbol: {} ({} decimals)", defaults.symbol, defaults.decimals);
    println!("  Default extraction slots: {}", defaults.max_extracting);
    println!("  Default result buffer: {}", defaults.result_buffer);
    println!("  Default fork rewind depth: {} blocks", defaults.rewind_depth);
    println!("  Default node call timeout: {} ms", defaults.rpc_timeout_ms);
    println!("  Default poll interval: {} ms", defaults.poll_interval_ms);
    println!("  Data output markers: {}", defaults.data_markers.join(", "));
    println!("  Storage backends: memory, SQLite (feature: sqlite)");
}

fn cmd_config(config: &CliConfig) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}

async fn cmd_status(db: &str, symbol: &str) -> anyhow::Result<()> {
    tracing::debug!(db, symbol, "Opening scanner database");
    let store = SqliteStorage::open(db)
        .await
        .with_context(|| format!("opening {db}"))?;

    println!("Symbol: {symbol}");
    match store.get_cursor(symbol).await? {
        Some(cursor) => {
            println!("  Cursor: height {} hash {}", cursor.height, cursor.hash);
            if let Some(block) = store.get_cached_block(symbol, cursor.height).await? {
                let time = chrono::DateTime::from_timestamp(block.time as i64, 0)
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| block.time.to_string());
                println!("  Block time: {time} ({} txs)", block.tx_count());
            }
        }
        None => println!("  Cursor: none (not scanned yet)"),
    }

    let tasks = store.list_unscanned(symbol).await?;
    println!("  Unscanned records: {}", tasks.len());
    for (height, group) in group_by_height(tasks) {
        let label = if height == 0 {
            "mempool".to_string()
        } else {
            format!("height {height}")
        };
        println!("    {label}:");
        for task in group {
            let txid = if task.is_block_level() {
                "<whole block>"
            } else {
                task.txid.as_str()
            };
            println!("      {txid}  {}", task.reason);
        }
    }
    Ok(())
}

fn group_by_height(tasks: Vec<UnscanTask>) -> BTreeMap<u64, Vec<UnscanTask>> {
    let mut groups: BTreeMap<u64, Vec<UnscanTask>> = BTreeMap::new();
    for task in tasks {
        groups.entry(task.block_height).or_default().push(task);
    }
    groups
}
