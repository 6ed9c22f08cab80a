//! Durable store management commands

use colored::Colorize;
use serde::Serialize;
use tabled::Tabled;

use pomocache::cache::StoreStats;
use pomocache::error::Result;

use crate::cli::{CommandContext, OutputFormat};
use crate::output::{format_json, format_size, format_table, format_timestamp};

/// One store in `cache status` table output
#[derive(Debug, Tabled, Serialize)]
struct StoreRow {
    #[tabled(rename = "STORE")]
    name: String,
    #[tabled(rename = "ENTRIES")]
    entries: usize,
    #[tabled(rename = "SIZE")]
    size: String,
    #[tabled(rename = "NEWEST")]
    newest: String,
}

impl From<&StoreStats> for StoreRow {
    fn from(store: &StoreStats) -> Self {
        Self {
            name: store.name.clone(),
            entries: store.entries,
            size: format_size(store.size_bytes),
            newest: store
                .newest_entry
                .map(format_timestamp)
                .unwrap_or_else(|| "-".to_string()),
        }
    }
}

/// Show per-store statistics
pub fn status(ctx: &CommandContext) -> Result<()> {
    let stats = ctx.storage()?.stats()?;
    let layout = ctx.config.layout();

    match ctx.format {
        OutputFormat::Json => {
            let json = serde_json::json!({
                "path": ctx.cache_dir.display().to_string(),
                "total_entries": stats.total_entries,
                "total_size_bytes": stats.total_size_bytes,
                "total_size_human": format_size(stats.total_size_bytes),
                "precache_store": layout.precache_name(),
                "image_store": layout.image_store,
                "stores": stats.stores,
            });
            println!("{}", format_json(&json)?);
        }
        OutputFormat::Table => {
            let rows: Vec<StoreRow> = stats.stores.iter().map(StoreRow::from).collect();
            println!("{}", format_table(&rows));
        }
        OutputFormat::Pretty => {
            println!("{}", "Cache Status".bold());
            println!("────────────────────────────────────────");
            println!("Location:       {}", ctx.cache_dir.display());
            println!("Entries:        {}", stats.total_entries);
            println!("Total size:     {}", format_size(stats.total_size_bytes));

            if stats.stores.is_empty() {
                println!();
                println!("No stores yet. Run `pomocache warm` to cache backgrounds.");
                return Ok(());
            }

            println!();
            for store in &stats.stores {
                let marker = if layout.should_retain(&store.name) {
                    "●".green()
                } else {
                    "○".yellow()
                };
                println!(
                    "{} {:<28} {:>5} entries  {:>10}",
                    marker,
                    store.name.bold(),
                    store.entries,
                    format_size(store.size_bytes)
                );
                if let Some(newest) = store.newest_entry {
                    println!("  newest entry {}", format_timestamp(newest).dimmed());
                }
            }
        }
    }

    Ok(())
}

/// Delete every store and entry
pub fn clear(ctx: &CommandContext) -> Result<()> {
    let stats = ctx.storage()?.clear_all()?;

    match ctx.format {
        OutputFormat::Json => {
            let json = serde_json::json!({
                "entries_removed": stats.entries_removed,
                "stores_removed": stats.stores_removed,
                "success": true,
            });
            println!("{}", format_json(&json)?);
        }
        _ => {
            if stats.stores_removed > 0 {
                println!(
                    "Cleared {} entries from {} stores",
                    stats.entries_removed, stats.stores_removed
                );
            } else {
                println!("Cache was already empty");
            }
        }
    }

    Ok(())
}

/// Print the store directory
pub fn path(config_path: Option<&str>, cache_dir: Option<&str>) -> Result<()> {
    let path = crate::cli::context::cache_dir_only(config_path, cache_dir)?;
    println!("{}", path.display());
    Ok(())
}
