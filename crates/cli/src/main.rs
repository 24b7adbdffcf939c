use clap::{Parser, Subcommand};

mod commands;
use commands::{handle_config_command, handle_store_command, ConfigCommands, StoreCommands};

#[derive(Parser)]
#[command(name = "flock-cli")]
#[command(about = "Flock CLI - management tool for the flock JSON-RPC proxy")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configuration Management
    #[command(subcommand)]
    Config(ConfigCommands),

    /// Inspect the block store (only while the server is stopped)
    #[command(subcommand)]
    Store(StoreCommands),
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Config(config_command) => {
            handle_config_command(config_command).await?;
        }

        Commands::Store(store_command) => {
            handle_store_command(store_command)?;
        }
    }

    Ok(())
}
