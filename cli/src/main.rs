// proxima: desktop harness for the proximity peripheral engine
//
// Runs the engine against an in-memory radio, decodes signal packets and
// manages the JSON configuration.

mod config;
mod logging;
mod loopback;
mod simulate;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use proxima_core::ble::SignalData;
use proxima_core::Proximity;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "proxima")]
#[command(about = "Proxima: BLE proximity peripheral harness", long_about = None)]
#[command(version)]
struct Cli {
    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Also write JSON logs to a daily rolling file in this directory
    #[arg(long, global = true, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    /// Config file to use instead of the platform default
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a peripheral and simulated centrals over a loopback radio
    Simulate {
        #[arg(short, long)]
        centrals: Option<usize>,
        #[arg(short, long)]
        rounds: Option<usize>,
        #[arg(short, long, default_value = "1")]
        seed: u64,
    },
    /// Decode a signal characteristic write given as hex
    DecodeSignal { hex: String },
    /// Configure settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print every setting
    Show,
    /// Write the default configuration
    Init {
        #[arg(short, long)]
        force: bool,
    },
    /// Print the config file location
    Path,
    Get { key: String },
    Set { key: String, value: String },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = logging::init(cli.verbose, cli.log_dir.as_deref())?;
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Simulate {
            centrals,
            rounds,
            seed,
        } => {
            let config = config::Config::load(config_path)?;
            let centrals = centrals.unwrap_or(config.simulation.centrals);
            let rounds = rounds.unwrap_or(config.simulation.rounds);
            simulate::run(&config, centrals, rounds, seed)
        }
        Commands::DecodeSignal { hex } => cmd_decode_signal(&hex),
        Commands::Config { action } => cmd_config(action, config_path),
    }
}

fn cmd_decode_signal(input: &str) -> Result<()> {
    let cleaned: String = input
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':')
        .collect();
    let bytes = hex::decode(cleaned.trim_start_matches("0x")).context("Invalid hex input")?;
    let signal = SignalData::decode(&bytes).context("Not a signal characteristic write")?;

    println!("{}", "Signal".bold());
    println!("  Length:    {} bytes", bytes.len());
    println!("  RSSI:      {}", signal.rssi.to_string().bright_yellow());
    println!("  Proximity: {}", Proximity::from(signal.rssi));
    if signal.payload.is_empty() {
        println!("  Payload:   {}", "(none)".dimmed());
    } else {
        println!("  Payload:   {} bytes", signal.payload.len());
        println!("             {}", signal.payload.to_string().bright_cyan());
    }
    Ok(())
}

fn cmd_config(action: ConfigAction, path: Option<&std::path::Path>) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = config::Config::load(path)?;
            println!("{}", "Configuration".bold());
            println!();
            for (key, value) in config.list() {
                println!("  {:<38} {}", key.bright_cyan(), value);
            }
        }

        ConfigAction::Init { force } => {
            let file = config::Config::config_file(path)?;
            if file.exists() && !force {
                anyhow::bail!("{} already exists (use --force to overwrite)", file.display());
            }
            config::Config::default().save(path)?;
            println!("{} Wrote default config to {}", "✓".green(), file.display());
        }

        ConfigAction::Path => {
            println!("{}", config::Config::config_file(path)?.display());
        }

        ConfigAction::Get { key } => {
            let config = config::Config::load(path)?;
            match config.get(&key) {
                Some(value) => println!("{} = {}", key.bright_cyan(), value),
                None => anyhow::bail!("Unknown config key: {}", key),
            }
        }

        ConfigAction::Set { key, value } => {
            let mut config = config::Config::load(path)?;
            config.set(&key, &value)?;
            config.save(path)?;
            println!("{} Set {} = {}", "✓".green(), key.bright_cyan(), value);
        }
    }

    Ok(())
}
