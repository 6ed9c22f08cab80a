//! Output formatting for CLI results

use serde::Serialize;

use crate::cli::OutputFormat;

pub mod table;

pub use table::format_table;

/// Pretty-printed JSON for `--format json`
pub fn format_json<T: Serialize + ?Sized>(data: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(data)
}

/// Print rows as a table, or as JSON when requested
pub fn print_rows<T>(rows: &[T], format: OutputFormat) -> Result<(), serde_json::Error>
where
    T: tabled::Tabled + Serialize,
{
    match format {
        OutputFormat::Json => println!("{}", format_json(rows)?),
        OutputFormat::Pretty | OutputFormat::Table => println!("{}", format_table(rows)),
    }
    Ok(())
}

/// Format bytes as human-readable size
pub fn format_size(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;
    const GB: usize = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

/// Unix seconds as local `YYYY-MM-DD HH:MM`
pub fn format_timestamp(secs: i64) -> String {
    chrono::DateTime::from_timestamp(secs, 0)
        .map(|d| {
            d.with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M")
                .to_string()
        })
        .unwrap_or_else(|| "unknown".to_string())
}
