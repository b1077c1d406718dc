use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use std::path::PathBuf;
use yen_to_freedom::core::log::init_logging;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to optional configuration file
    #[arg(short, long, global = true)]
    config_path: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

impl From<Commands> for yen_to_freedom::AppCommand {
    fn from(cmd: Commands) -> yen_to_freedom::AppCommand {
        match cmd {
            Commands::Rates => yen_to_freedom::AppCommand::Rates,
            Commands::Refresh => yen_to_freedom::AppCommand::Refresh,
            Commands::Annotate { input, output } => {
                yen_to_freedom::AppCommand::Annotate { input, output }
            }
            Commands::Daemon => yen_to_freedom::AppCommand::Daemon,
            Commands::Setup => unreachable!("Setup command should be handled separately"),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create default configuration
    Setup,
    /// Show the stored exchange rates
    Rates,
    /// Fetch exchange rates now
    Refresh,
    /// Add converted prices to an HTML page
    Annotate {
        /// HTML file to annotate
        input: PathBuf,
        /// Where to write the result; stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Keep exchange rates fresh until interrupted
    Daemon,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let result = match cli.command {
        Some(Commands::Setup) => yen_to_freedom::cli::setup::setup(),
        Some(cmd) => yen_to_freedom::run_command(cmd.into(), cli.config_path.as_deref()).await,
        None => {
            Cli::command().print_help()?;
            Ok(())
        }
    };

    if let Err(e) = &result {
        tracing::error!(error = %e, "Application failed");
    }
    result
}
