mod commands;
mod logging;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "sluice",
    version,
    about = "Move a table from any source to any destination, incrementally"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy one table between two locations given on the command line
    Ingest(commands::ingest::IngestArgs),
    /// Run a job described in a YAML file
    Run {
        /// Path to job YAML file
        job: PathBuf,
    },
    /// Validate a job file and resolve its adapters without moving data
    Check {
        /// Path to job YAML file
        job: PathBuf,
    },
    /// List supported source and destination schemes
    Connectors,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init(&cli.log_level);

    match cli.command {
        Commands::Ingest(args) => commands::ingest::execute(args).await,
        Commands::Run { job } => commands::run::execute(&job).await,
        Commands::Check { job } => commands::check::execute(&job),
        Commands::Connectors => {
            commands::connectors::execute();
            Ok(())
        }
    }
}
