//! pomocache CLI - offline background-image caching for the Pomodoro timer

use clap::{CommandFactory, Parser};

mod cli;
mod output;

use cli::{CacheCommands, Cli, CommandContext, Commands};
use pomocache::error::Result;

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("Error: {}", err);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let config = cli.config.as_deref();
    let cache_dir = cli.cache_dir.as_deref();

    match cli.command {
        Commands::Warm {
            ref category,
            offline_only,
        } => {
            let ctx = CommandContext::new(cli.format, config, cache_dir)?;
            cli::warm::run(&ctx, category.as_deref(), offline_only).await
        }
        Commands::Fetch { ref url } => {
            let ctx = CommandContext::new(cli.format, config, cache_dir)?;
            cli::fetch::run(&ctx, url).await
        }
        Commands::Catalog => {
            let ctx = CommandContext::new(cli.format, config, cache_dir)?;
            cli::catalog::list(&ctx)
        }
        Commands::Cache(ref cache_cmd) => match cache_cmd {
            CacheCommands::Status => {
                cli::cache::status(&CommandContext::new(cli.format, config, cache_dir)?)
            }
            CacheCommands::Clear => {
                cli::cache::clear(&CommandContext::new(cli.format, config, cache_dir)?)
            }
            CacheCommands::Path => cli::cache::path(config, cache_dir),
        },
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "pomocache", &mut std::io::stdout());
            Ok(())
        }
    }
}

/// `--debug` forces debug output; otherwise `RUST_LOG`, defaulting to warnings
fn init_logging(debug: bool) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    if debug {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.format_timestamp(None).init();
}
