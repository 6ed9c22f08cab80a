//! Warm the decode cache and the durable image store

use std::sync::Arc;

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use log::warn;

use pomocache::catalog::Catalog;
use pomocache::client::{CacheStatus, FetchImageLoader, ImageCache, register_and_warm};
use pomocache::controller::{ControllerHandle, WarmReport};
use pomocache::error::{Error, Result};

use crate::cli::{CommandContext, OutputFormat};
use crate::output::format_json;

/// Register the controller, hand it the catalog, and decode every image.
///
/// Decoding goes through the host, so each image the active controller sees
/// is also written to the durable store.
pub async fn run(ctx: &CommandContext, category: Option<&str>, offline_only: bool) -> Result<()> {
    let catalog = scoped_catalog(&ctx.config.catalog, category)?;
    let host = ctx.host()?;

    if offline_only {
        let registration = host.register(ctx.controller_options())?;
        let handle = registration.wait_settled().await.ok_or_else(|| {
            Error::Other("cache controller failed to install; see log for details".to_string())
        })?;
        return persist(ctx, &handle, &catalog).await;
    }

    match register_and_warm(&host, ctx.controller_options(), &catalog) {
        Some(registration) => {
            if registration.wait_settled().await.is_none() {
                warn!("No cache controller in control; images will not be kept offline");
            }
        }
        None => warn!("Running without a cache controller; images will not be kept offline"),
    }

    let total = catalog.all_urls().len() as u64;
    let bar = progress_bar(total, ctx.format);
    let cache = ImageCache::new(
        Arc::new(catalog),
        Arc::new(FetchImageLoader::new(host.clone())),
    );
    let status = cache
        .preload_all_with_progress(|s| bar.set_position(s.loaded as u64))
        .await;
    bar.finish_and_clear();

    print_status(&status, ctx.format)
}

/// Persist without decoding and report what the controller stored
async fn persist(ctx: &CommandContext, handle: &ControllerHandle, catalog: &Catalog) -> Result<()> {
    let urls = catalog.all_urls();
    let spinner = progress_bar(0, ctx.format);
    spinner.set_message(format!("Persisting {} backgrounds", urls.len()));
    spinner.enable_steady_tick(std::time::Duration::from_millis(100));
    let report = handle.cache_backgrounds(&urls).await;
    spinner.finish_and_clear();

    print_report(&report, ctx.format)
}

/// The whole catalog, or just one category of it
fn scoped_catalog(catalog: &Catalog, category: Option<&str>) -> Result<Catalog> {
    let Some(name) = category else {
        return Ok(catalog.clone());
    };
    let known: Vec<&str> = catalog.categories().collect();
    if !known.contains(&name) {
        return Err(Error::Other(format!(
            "Unknown category '{}' (available: {})",
            name,
            known.join(", ")
        )));
    }
    Ok(Catalog::from_pairs([(name, catalog.urls(name).to_vec())])?)
}

fn progress_bar(total: u64, format: OutputFormat) -> ProgressBar {
    if format == OutputFormat::Json {
        return ProgressBar::hidden();
    }
    if total == 0 {
        return ProgressBar::new_spinner();
    }
    let bar = ProgressBar::new(total);
    if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} images")
    {
        bar.set_style(style.progress_chars("━━╌"));
    }
    bar
}

fn print_status(status: &CacheStatus, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", format_json(status)?),
        _ => {
            let ok = status.loaded - status.failed.len();
            println!(
                "{} {}/{} backgrounds decoded",
                if status.failed.is_empty() {
                    "✓".green()
                } else {
                    "!".yellow()
                },
                ok,
                status.total
            );
            for url in &status.failed {
                println!("  {} {}", "failed".red(), url);
            }
        }
    }
    Ok(())
}

fn print_report(report: &WarmReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let json = serde_json::json!({
                "stored": report.stored,
                "skipped": report.skipped,
                "failed": report.failed,
            });
            println!("{}", format_json(&json)?);
        }
        _ => {
            println!(
                "{} {} backgrounds stored for offline use",
                "✓".green(),
                report.stored.len()
            );
            for url in &report.skipped {
                println!("  {} {}", "skipped".yellow(), url);
            }
            for url in &report.failed {
                println!("  {} {}", "failed".red(), url);
            }
        }
    }
    Ok(())
}
