//! Single request through the cache controller

use colored::Colorize;
use log::warn;

use pomocache::error::Result;
use pomocache::network::{Fetcher, Request};

use crate::cli::{CommandContext, OutputFormat};
use crate::output::{format_json, format_size};

/// Register the controller, wait for it to take control, then send `url`
/// through it
pub async fn run(ctx: &CommandContext, url: &str) -> Result<()> {
    let request = Request::get(url)?;
    let host = ctx.host()?;

    let registration = host.register(ctx.controller_options())?;
    if registration.wait_settled().await.is_none() {
        warn!("No cache controller in control; sending straight to the network");
    }

    let response = host.fetch(&request).await?;
    let content_type = response.header("content-type").unwrap_or("-").to_string();

    match ctx.format {
        OutputFormat::Json => {
            let json = serde_json::json!({
                "url": url,
                "status": response.status,
                "status_text": response.status_text,
                "content_type": content_type,
                "size_bytes": response.body.len(),
            });
            println!("{}", format_json(&json)?);
        }
        _ => {
            let status = format!("{} {}", response.status, response.status_text);
            let status = if response.ok() {
                status.green()
            } else {
                status.red()
            };
            println!("{}", status);
            println!("Content-Type:   {}", content_type);
            println!("Size:           {}", format_size(response.body.len()));
        }
    }

    Ok(())
}
