//! Moonbeam CLI - command-line host for the MIDI continuation engine
//!
//! Generates continuations of MIDI phrases, inspects token streams and
//! reports on the loaded model.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{debug, info, Level};
use tracing_subscriber::FmtSubscriber;

mod commands;
mod config;
mod utils;

use commands::{generate::GenerateCommand, info::InfoCommand, tokenize::TokenizeCommand, Command};

#[derive(Parser)]
#[command(
    name = "moonbeam",
    version = env!("CARGO_PKG_VERSION"),
    about = "Moonbeam MIDI continuation CLI",
    long_about = "Continue a MIDI phrase with a pretrained autoregressive model, inspect its token stream, and check the model setup."
)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Quiet output (errors only)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Configuration file path
    #[arg(short, long, global = true, env = "MOONBEAM_CONFIG")]
    config: Option<PathBuf>,

    /// JSON output format
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a continuation of a MIDI file
    #[command(name = "generate", alias = "gen", alias = "g")]
    Generate(GenerateCommand),

    /// Show the token stream of a MIDI file
    #[command(name = "tokenize", alias = "tok", alias = "t")]
    Tokenize(TokenizeCommand),

    /// Display model and engine information
    #[command(name = "info", alias = "i")]
    Info(InfoCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(&cli)?;

    debug!("Moonbeam CLI v{} starting", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = config::Config::load(cli.config.as_deref())?;
    debug!("Configuration loaded: {:?}", config);

    // Execute command
    let result = match cli.command {
        Commands::Generate(cmd) => cmd.execute(&config, cli.json).await,
        Commands::Tokenize(cmd) => cmd.execute(&config, cli.json).await,
        Commands::Info(cmd) => cmd.execute(&config, cli.json).await,
    };

    match result {
        Ok(_) => {
            if !cli.quiet {
                info!("Command completed successfully");
            }
            Ok(())
        }
        Err(e) => {
            utils::print_error(&format!("{:#}", e));
            std::process::exit(1);
        }
    }
}

fn init_logging(cli: &Cli) -> Result<()> {
    let level = if cli.debug {
        Level::DEBUG
    } else if cli.verbose {
        Level::INFO
    } else if cli.quiet {
        Level::ERROR
    } else {
        Level::WARN
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}
