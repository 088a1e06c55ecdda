use anyhow::{Context, Result};
use clap::Parser;
use exposer_cli::{check, status};
use kubert::ClientArgs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
/// Inspects the Service exposer and the hosts it has published.
struct Cli {
    #[command(flatten)]
    client: kubert::ClientArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::ValueEnum, Clone)]
enum OutputMode {
    Table,
    Json,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Check the configuration and cluster access for potential problems
    Check {
        /// Path to the controller's configuration file
        #[arg(long, env = "CONFIG_FILE_PATH", default_value = "configs/config.yaml")]
        config: PathBuf,

        /// Output format
        #[arg(short, long, default_value = "table")]
        output: OutputMode,
    },

    /// List the hosts recorded in the exposure registries
    Status {
        /// Only show the registry of this namespace
        #[arg(short, long)]
        namespace: Option<String>,

        /// Output format
        #[arg(short, long, default_value = "table")]
        output: OutputMode,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let Cli { client, command } = Cli::parse();

    match command {
        Commands::Check { config, output } => {
            let client = try_client(client).await?;

            let results = check::run_checks(client, &config).await;
            let success = match output {
                OutputMode::Table => check::print_checks(results),
                OutputMode::Json => check::json_print_checks(results)?,
            };

            if !success {
                std::process::exit(1);
            }
        }

        Commands::Status { namespace, output } => {
            let client = try_client(client).await?;

            let results = status::status(client, namespace.as_deref()).await?;
            match output {
                OutputMode::Table => status::print_status(&results),
                OutputMode::Json => status::json_print_status(&results)?,
            }
        }
    };

    Ok(())
}

async fn try_client(client: ClientArgs) -> Result<kubert::client::Client> {
    client
        .try_client()
        .await
        .context("failed to load a Kubernetes client configuration")
}
