//! Catalog listing

use std::collections::HashSet;

use serde::Serialize;
use tabled::Tabled;

use pomocache::error::Result;

use crate::cli::CommandContext;
use crate::output::print_rows;

/// One category in `catalog` output
#[derive(Debug, Tabled, Serialize)]
struct CategoryRow {
    #[tabled(rename = "CATEGORY")]
    name: String,
    #[tabled(rename = "IMAGES")]
    images: usize,
    /// Images already in the durable image store
    #[tabled(rename = "OFFLINE")]
    offline: usize,
}

/// List categories with image counts and offline coverage
pub fn list(ctx: &CommandContext) -> Result<()> {
    let stored: HashSet<String> = ctx
        .storage()?
        .keys(&ctx.config.image_store)?
        .into_iter()
        .collect();

    let rows: Vec<CategoryRow> = ctx
        .config
        .catalog
        .iter()
        .map(|category| CategoryRow {
            name: category.name.clone(),
            images: category.urls.len(),
            offline: category.urls.iter().filter(|u| stored.contains(*u)).count(),
        })
        .collect();

    print_rows(&rows, ctx.format)?;
    Ok(())
}
