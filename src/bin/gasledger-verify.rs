#![forbid(unsafe_code)]
//! Offline audit of a gas ledger database: re-verifies the hash chain and
//! lists the most recent blocks.

use clap::Parser;
use colored::*;
use comfy_table::presets::UTF8_FULL;
use comfy_table::Color as TableColor;
use comfy_table::{Attribute, Cell, ContentArrangement, Table};
use gasledger::blockchain::{Block, BlockStore};
use gasledger::config::load_config;
use gasledger::error::ChainError;
use gasledger::persistence::Database;
use std::path::Path;

#[derive(Parser)]
#[command(name = "gasledger-verify", about = "Verify a gas ledger database and show recent blocks")]
struct Args {
    /// Database path; defaults to `database.path` from the config file
    #[arg(short, long)]
    db: Option<String>,

    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Number of most recent blocks to list
    #[arg(short = 'n', long, default_value_t = 20)]
    limit: usize,

    /// Only list blocks flagged anomalous
    #[arg(long)]
    anomalies_only: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let db_path = match args.db {
        Some(path) => path,
        None => load_config(&args.config)?.database.path,
    };

    if !Path::new(&db_path).exists() {
        eprintln!("{}", format!("No ledger database at {}", db_path).red().bold());
        std::process::exit(2);
    }

    let store = BlockStore::load(Box::new(Database::open(&db_path)?))?;
    let verdict = store.verify();

    let blocks: Vec<&Block> = store
        .all()
        .filter(|b| !b.is_genesis())
        .filter(|b| !args.anomalies_only || b.is_anomalous)
        .collect();
    let anomalous = store.all().filter(|b| b.is_anomalous).count();
    let bad_index = verdict.as_ref().err().and_then(ChainError::violation_index);

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(
            ["Block", "Station", "Volume", "Score", "Verdict", "Hash", "Date"]
                .into_iter()
                .map(|h| Cell::new(h).fg(TableColor::Cyan).add_attribute(Attribute::Bold))
                .collect::<Vec<_>>(),
        );

    for block in blocks.iter().rev().take(args.limit) {
        let (verdict_text, color) = if bad_index.is_some_and(|i| block.index >= i) {
            ("UNTRUSTED", TableColor::Magenta)
        } else if block.is_anomalous {
            ("ANOMALY", TableColor::Red)
        } else {
            ("ok", TableColor::Green)
        };

        table.add_row(vec![
            Cell::new(format!("#{}", block.index)).fg(TableColor::White),
            Cell::new(&block.transaction.station_id).fg(TableColor::White),
            Cell::new(format!("{:.3}", block.transaction.volume_f64())).fg(TableColor::White),
            Cell::new(format!("{:.2}", block.anomaly_score)).fg(color),
            Cell::new(verdict_text).fg(color),
            Cell::new(&block.hash_str()[..16]).fg(TableColor::Grey),
            Cell::new(format_timestamp_short(block.timestamp)).fg(TableColor::Grey),
        ]);
    }

    println!("{}", table);
    println!();
    println!("{}", format!("Blocks:    {}", store.len()).blue());
    println!("{}", format!("Anomalous: {}", anomalous).yellow());

    match verdict {
        Ok(()) => {
            println!("{}", "Chain integrity: OK".green().bold());
            Ok(())
        }
        Err(e) => {
            eprintln!("{}", format!("Chain integrity: FAILED ({})", e).red().bold());
            std::process::exit(1);
        }
    }
}

fn format_timestamp_short(timestamp_ms: u64) -> String {
    use chrono::DateTime;

    match DateTime::from_timestamp_millis(timestamp_ms as i64) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => "Invalid".to_string(),
    }
}
