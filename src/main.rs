#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::too_many_lines,
    clippy::uninlined_format_args
)]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use highlite::{simulate, Config, OutputFormat};
use std::path::PathBuf;
use tracing_subscriber::{fmt, EnvFilter};

/// `Highlite` - hook and plugin framework for the HighSpell client.
#[derive(Parser, Debug)]
#[command(name = "highlite")]
#[command(version)]
#[command(about = "Intercept client methods and dispatch them to plugins.", long_about = None)]
struct Cli {
    /// Config file to use instead of ~/.highlite/config.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the configured alias and lookup tables
    Aliases {
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Run a scripted session against the built-in mock client
    Simulate {
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(path) => {
            let mut config = Config::load_from(path)?;
            config.apply_env_overrides();
            Ok(config)
        }
        None => Config::load_or_init(),
    }
}

fn print_aliases(config: &Config, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let tables = serde_json::json!({
                "aliases": config.aliases,
                "lookups": config.lookups,
            });
            println!(
                "{}",
                serde_json::to_string_pretty(&tables).context("Failed to render alias tables")?
            );
        }
        OutputFormat::Text => {
            println!("Aliases ({}):", config.aliases.len());
            for (alias, symbol) in &config.aliases {
                println!("  {alias:<28} -> {symbol}");
            }
            println!();
            println!("Lookups ({}):", config.lookups.len());
            for (name, symbol) in &config.lookups {
                println!("  {name:<28} -> {symbol}");
            }
        }
    }
    Ok(())
}

fn print_report(report: &simulate::SimulationReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(report).context("Failed to render report")?
            );
        }
        OutputFormat::Text => {
            println!("Events delivered to plugins:");
            for event in &report.events {
                println!("  {event}");
            }
            println!("Original bodies run:");
            for call in &report.original_calls {
                println!("  {call}");
            }
            println!("Installed patches: {}", report.patches);
            println!("Inventory menu:    {}", report.inventory_menu);
            println!("Mouse actions:     {}", report.mouse_actions);
            println!(
                "Account settings:  {}",
                report.visible_account_settings.join(", ")
            );
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging - respects RUST_LOG env var, defaults to INFO
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("setting default subscriber failed")?;

    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Aliases { format } => print_aliases(&config, format),
        Commands::Simulate { format } => {
            let report = simulate::run(config).await?;
            print_report(&report, format)
        }
    }
}
