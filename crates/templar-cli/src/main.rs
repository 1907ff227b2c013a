//! templar CLI
//!
//! Command-line interface for resolving, inspecting and packing template collections.

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use templar_core::DataType;
use tracing::Level;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// templar - template collection resolution for data conversion
#[derive(Parser, Debug)]
#[command(name = "templar")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Log level, overridden per target by RUST_LOG
    #[arg(long, default_value = "warn", global = true)]
    log_level: Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Resolve a template collection reference and list its templates
    Resolve {
        /// Collection reference (e.g., microsofthealth/hl7v2templates:default)
        reference: String,

        /// Configuration file (TOML)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Custom HL7v2 template package replacing the built-in default
        #[arg(long)]
        custom_hl7: Option<PathBuf>,

        /// Bearer token for registry access
        #[arg(long, env = "TEMPLAR_REGISTRY_TOKEN")]
        token: Option<String>,

        /// Use plain HTTP for registries
        #[arg(long)]
        plain_http: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List the templates in a package and check it for a data type
    Inspect {
        /// Package file (tar.gz)
        package: PathBuf,

        /// Data type whose minimum-content rule to check
        #[arg(long, default_value = "hl7v2")]
        data_type: DataType,
    },

    /// Build a package from a directory of .liquid templates
    Pack {
        /// Directory containing templates
        dir: PathBuf,

        /// Output package file
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(cli.log_level).into())
        .from_env_lossy();

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    match cli.command {
        Commands::Resolve {
            reference,
            config,
            custom_hl7,
            token,
            plain_http,
            json,
        } => {
            let options = commands::ResolveOptions {
                config,
                custom_hl7,
                token,
                plain_http,
                json,
            };
            commands::resolve(reference, options).await?;
        }
        Commands::Inspect { package, data_type } => {
            commands::inspect(&package, data_type)?;
        }
        Commands::Pack { dir, output } => {
            commands::pack(&dir, &output)?;
        }
    }

    Ok(())
}
