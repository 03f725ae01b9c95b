mod commands;
mod logging;

use std::path::PathBuf;

use bulkport_types::state::EntityId;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "bulkport",
    version,
    about = "Resumable bulk imports: extract, transform, load, and track every entity"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value_t = logging::LogFormat::Text, global = true)]
    log_format: logging::LogFormat,
}

#[derive(Subcommand)]
enum Commands {
    /// Run (or resume) an import
    Run {
        /// Path to import YAML file
        import: PathBuf,
    },
    /// Show entity and pipeline tracker status
    Status {
        /// Path to import YAML file
        import: PathBuf,
    },
    /// List recorded pipeline failures
    Failures {
        /// Path to import YAML file
        import: PathBuf,
        /// Only show failures of this entity id
        #[arg(long)]
        entity: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init(&cli.log_level, cli.log_format);

    match cli.command {
        Commands::Run { import } => commands::run::execute(&import).await,
        Commands::Status { import } => commands::status::execute(&import),
        Commands::Failures { import, entity } => {
            commands::failures::execute(&import, entity.map(EntityId::new))
        }
    }
}
