//! CLI command definitions and handlers

use clap::{Parser, Subcommand};
pub use clap_complete::Shell;

pub mod args;
pub mod cache;
pub mod catalog;
pub mod context;
pub mod fetch;
pub mod warm;

pub use args::OutputFormat;
pub use context::CommandContext;

/// pomocache - offline background-image caching for the Pomodoro timer
#[derive(Parser, Debug)]
#[command(name = "pomocache")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Output format (pretty, table, json)
    #[arg(
        long,
        global = true,
        env = "POMOCACHE_FORMAT",
        default_value = "pretty",
        hide_env = true,
        hide_possible_values = true
    )]
    pub format: OutputFormat,

    /// Override config file location
    #[arg(long, global = true, env = "POMOCACHE_CONFIG", hide_env = true)]
    pub config: Option<String>,

    /// Override durable store location
    #[arg(long, global = true, env = "POMOCACHE_CACHE_DIR", hide_env = true)]
    pub cache_dir: Option<String>,

    /// Enable debug logging
    #[arg(long, global = true, env = "POMOCACHE_DEBUG", hide_env = true)]
    pub debug: bool,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Register the cache controller and warm every background image
    #[command(after_help = "\
Examples:
  pomocache warm                    # decode and persist the whole catalog
  pomocache warm --category space   # only one category
  pomocache warm --offline-only     # persist for offline use without decoding")]
    Warm {
        /// Only warm this category
        #[arg(long)]
        category: Option<String>,

        /// Persist images to the durable store without decoding them
        #[arg(long)]
        offline_only: bool,
    },

    /// Send one GET through the cache controller
    Fetch {
        /// URL to request
        url: String,
    },

    /// List background categories and how many images are stored offline
    Catalog,

    /// Manage the durable stores
    #[command(subcommand)]
    Cache(CacheCommands),

    /// Generate shell completions
    #[command(after_help = "\
Examples:
  bash:   pomocache completions bash > /etc/bash_completion.d/pomocache
  zsh:    pomocache completions zsh > \"${fpath[1]}/_pomocache\"
  fish:   pomocache completions fish > ~/.config/fish/completions/pomocache.fish")]
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Cache subcommands
#[derive(Subcommand, Debug)]
pub enum CacheCommands {
    /// Show per-store statistics
    Status,
    /// Delete every store
    Clear,
    /// Print the store directory path
    Path,
}
