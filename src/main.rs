//! walletdb CLI - inspect and maintain a wallet record database

use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tabled::Tabled;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use walletdb::config::{self, WalletDbConfig};
use walletdb::rollback::{rollback_stores, Rollback};
use walletdb::storage::schema::all_schema_statements;
use walletdb::storage::version::CURRENT_DB_VERSION;
use walletdb::storage::{
    ActionStore, InterestedStore, KeyValStore, PuzzleStore, TradeStore, UserStore,
};
use walletdb::ui::{self, Icons};
use walletdb::{Bytes32, CoinRecord, CoinStore, DbWrapper, Dialect, HintStore};

#[derive(Parser)]
#[command(name = "walletdb")]
#[command(version)]
#[command(about = "Reorg-safe wallet record store")]
#[command(long_about = r#"
walletdb keeps blockchain-derived wallet facts in a SQL database:
  • Coin records with an in-memory unspent index per wallet
  • Hints mapping opaque tags to coin ids
  • Height-threshold rollback for chain reorganizations

Example usage:
  walletdb init
  walletdb coins --wallet-id 1
  walletdb hints --hint 0xabcd --page-size 100
  walletdb rollback --height 120000
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Database file or connection string (overrides the config)
    #[arg(short, long, global = true)]
    database: Option<String>,

    /// Emit JSON instead of human-readable output
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a config file and create the database
    Init {
        /// Overwrite an existing config
        #[arg(short, long)]
        force: bool,
    },

    /// Row counts per store
    Stats,

    /// List unspent coins for a wallet
    Coins {
        #[arg(short, long, default_value = "1")]
        wallet_id: u32,
    },

    /// Look up coin ids by hint, one page at a time
    Hints {
        /// Hex-encoded hint, repeatable
        #[arg(long = "hint", required = true)]
        hints: Vec<String>,

        #[arg(long, default_value = "100")]
        page_size: usize,

        /// Coin id returned as `next_cursor` by the previous page
        #[arg(long)]
        cursor: Option<String>,
    },

    /// Remove everything confirmed above a height
    Rollback {
        #[arg(long)]
        height: u32,
    },

    /// Compare the coin cache with storage and rebuild it on divergence
    Rebuild,

    /// Print the CREATE statements for a dialect
    Schema {
        #[arg(long, default_value = "sqlite")]
        dialect: String,

        #[arg(long)]
        db_version: Option<u32>,
    },
}

#[derive(Tabled, Serialize)]
struct CoinLine {
    #[tabled(rename = "Coin")]
    name: String,
    #[tabled(rename = "Amount")]
    amount: u64,
    #[tabled(rename = "Confirmed")]
    confirmed_height: u32,
    #[tabled(rename = "Coinbase")]
    coinbase: bool,
}

impl From<&CoinRecord> for CoinLine {
    fn from(record: &CoinRecord) -> Self {
        Self {
            name: record.name().to_hex(),
            amount: record.coin.amount,
            confirmed_height: record.confirmed_height,
            coinbase: record.coinbase,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = config::load_config(cli.config.as_deref())?.unwrap_or_default();

    // Initialize logging: RUST_LOG wins, then --verbose, then the config
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new(config.log_level.as_deref().unwrap_or("info"))
        }
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    if let Err(e) = run(&cli, &config) {
        if cli.json {
            emit_json(&serde_json::json!({ "ok": false, "error": e.to_string() }))?;
        } else {
            ui::error(&format!("{:#}", e));
        }
        std::process::exit(1);
    }
    Ok(())
}

fn run(cli: &Cli, config: &WalletDbConfig) -> anyhow::Result<()> {
    match &cli.command {
        Commands::Init { force } => {
            let config_path = cli.config.clone().unwrap_or_else(config::default_config_path);
            let db_path = config::default_database_path_in(Path::new("."));
            let fresh = WalletDbConfig {
                database: Some(db_path.display().to_string()),
                dialect: Some(Dialect::Sqlite),
                log_level: Some("info".to_string()),
                db_version: Some(CURRENT_DB_VERSION),
            };
            config::write_config(&config_path, &fresh, *force)?;
            config::ensure_db_dir(&db_path)?;

            let db = Arc::new(DbWrapper::open(&db_path)?);
            open_all_stores(&db)?;

            if cli.json {
                emit_json(&serde_json::json!({
                    "ok": true,
                    "config": config_path,
                    "database": db_path,
                    "db_version": db.db_version(),
                }))?;
            } else {
                ui::header("walletdb initialized");
                ui::status(Icons::GEAR, "Config", &config_path.display().to_string());
                ui::status(Icons::DATABASE, "Database", &db_path.display().to_string());
            }
        }

        Commands::Stats => {
            let db = open_database(cli, config)?;
            let coins = CoinStore::create(db.clone())?;
            let hints = HintStore::create(db.clone())?;
            let trades = TradeStore::create(db.clone())?;
            let users = UserStore::create(db.clone())?;
            let puzzles = PuzzleStore::create(db.clone())?;

            let stats = [
                ("Coins", coins.count_coins()?),
                ("Unspent coins", coins.count_unspent()?),
                ("Hints", hints.count_hints()?),
                ("Trades", trades.count_trades()?),
                ("Wallets", users.get_all_wallet_info_entries()?.len()),
                ("Puzzle hashes", puzzles.get_all_puzzle_hashes()?.len()),
            ];

            if cli.json {
                let map: serde_json::Map<_, _> = stats
                    .iter()
                    .map(|(k, v)| (k.to_lowercase().replace(' ', "_"), serde_json::json!(v)))
                    .collect();
                emit_json(&serde_json::json!({
                    "dialect": db.dialect(),
                    "db_version": db.db_version(),
                    "counts": map,
                }))?;
            } else {
                ui::header(&format!("walletdb statistics ({}, v{})", db.dialect(), db.db_version()));
                println!("{}", ui::stats_table(&stats));
                if let Some(height) = coins.get_first_coin_height()? {
                    ui::summary_row("First coin height:", &height.to_string());
                }
            }
        }

        Commands::Coins { wallet_id } => {
            let db = open_database(cli, config)?;
            let coins = CoinStore::create(db)?;
            let mut records = coins.get_unspent_coins_for_wallet(*wallet_id)?;
            records.sort_by_key(|r| (r.confirmed_height, r.name()));
            let lines: Vec<CoinLine> = records.iter().map(CoinLine::from).collect();

            if cli.json {
                emit_json(&lines)?;
            } else if lines.is_empty() {
                ui::info("Unspent coins", &format!("none for wallet {}", wallet_id));
            } else {
                let total: u64 = records.iter().map(|r| r.coin.amount).sum();
                ui::status(Icons::COIN, &format!("Wallet {}", wallet_id), &format!("{} unspent", lines.len()));
                println!("{}", ui::records_table(&lines));
                ui::summary_row("Total amount:", &total.to_string());
            }
        }

        Commands::Hints { hints, page_size, cursor } => {
            let db = open_database(cli, config)?;
            let store = HintStore::create(db)?;
            let hints = hints
                .iter()
                .map(|h| hex::decode(h.trim_start_matches("0x")))
                .collect::<Result<Vec<_>, _>>()?;
            let cursor = cursor.as_deref().map(Bytes32::from_str).transpose()?;

            let page = store.get_coin_ids_by_hints_paginated(&hints, *page_size, cursor)?;
            if cli.json {
                emit_json(&page)?;
            } else {
                if let Some(total) = page.total_count {
                    ui::status(Icons::HINT, "Matching coins", &total.to_string());
                }
                for id in &page.coin_ids {
                    println!("  {}", ui::hash(id));
                }
                match page.next_cursor {
                    Some(next) => ui::summary_row("Next cursor:", &next.to_hex()),
                    None => ui::summary_row("Next cursor:", &ui::muted("end")),
                }
            }
        }

        Commands::Rollback { height } => {
            let db = open_database(cli, config)?;
            let coins = CoinStore::create(db.clone())?;
            let trades = TradeStore::create(db.clone())?;
            let stores: [&dyn Rollback; 2] = [&coins, &trades];
            let summaries = rollback_stores(&db, &stores, *height)?;

            if cli.json {
                let map: serde_json::Map<_, _> = summaries
                    .iter()
                    .map(|(name, s)| (name.to_string(), serde_json::json!(s)))
                    .collect();
                emit_json(&serde_json::json!({ "height": height, "stores": map }))?;
            } else {
                ui::status(Icons::REWIND, "Rolled back to height", &height.to_string());
                for (name, summary) in &summaries {
                    ui::summary_row(
                        &format!("{}:", name),
                        &format!("{} removed, {} now unspent", summary.removed, summary.unspent),
                    );
                }
            }
        }

        Commands::Rebuild => {
            let db = open_database(cli, config)?;
            let coins = CoinStore::create(db)?;
            match coins.verify_cache() {
                Ok(()) => {
                    if cli.json {
                        emit_json(&serde_json::json!({ "ok": true, "rebuilt": false }))?;
                    } else {
                        ui::success("Coin cache matches storage");
                    }
                }
                Err(walletdb::Error::ConsistencyViolation(msg)) => {
                    if cli.json {
                        emit_json(&serde_json::json!({ "ok": true, "rebuilt": true, "detail": msg }))?;
                    } else {
                        ui::warn(&msg);
                        ui::status(Icons::WRENCH, "Cache", "rebuilt from storage");
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        Commands::Schema { dialect, db_version } => {
            let dialect = Dialect::from_str(dialect)?;
            let version = db_version.or(config.db_version).unwrap_or(CURRENT_DB_VERSION);
            let statements = all_schema_statements(dialect, version);
            if cli.json {
                emit_json(&statements)?;
            } else {
                for statement in statements {
                    println!("{};", statement);
                }
            }
        }
    }

    Ok(())
}

/// Resolve the database from the flag, the config, or the default path
fn open_database(cli: &Cli, config: &WalletDbConfig) -> anyhow::Result<Arc<DbWrapper>> {
    let target = cli
        .database
        .clone()
        .or_else(|| config.database.clone())
        .unwrap_or_else(|| config::default_database_path_in(Path::new(".")).display().to_string());

    let db = if target.contains("://") {
        DbWrapper::connect(&target)?
    } else {
        let path = PathBuf::from(&target);
        match config::db_root_from_env() {
            Some(root) => DbWrapper::connect(&config::connection_string(&path, Some(&root)))?,
            None => {
                config::ensure_db_dir(&path)?;
                DbWrapper::open(&path)?
            }
        }
    };

    if let Some(expected) = config.dialect {
        if expected != db.dialect() {
            anyhow::bail!("config expects {} but the database speaks {}", expected, db.dialect());
        }
    }
    tracing::debug!(target = %target, dialect = %db.dialect(), "Opened database");
    Ok(Arc::new(db))
}

/// Create every table so a fresh database has the full layout
fn open_all_stores(db: &Arc<DbWrapper>) -> anyhow::Result<()> {
    CoinStore::create(db.clone())?;
    HintStore::create(db.clone())?;
    PuzzleStore::create(db.clone())?;
    ActionStore::create(db.clone())?;
    TradeStore::create(db.clone())?;
    UserStore::create(db.clone())?;
    InterestedStore::create(db.clone())?;
    KeyValStore::create(db.clone())?;
    Ok(())
}

fn emit_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
