//! flextk CLI - command line front-end for the flextk adapters.
//!
//! Each invocation resolves credentials (flags, then environment, then the
//! encrypted configuration store), performs one adapter call and prints
//! the result.

mod commands;
mod context;

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use commands::{cloud, config, media, services};
use context::Context;

#[derive(Parser)]
#[command(name = "flextk")]
#[command(about = "flextk - cloud storage, services and media toolkit")]
#[command(version)]
struct Cli {
    /// Path of the encrypted configuration file.
    #[arg(long, global = true, env = "FLEXTK_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Master password for the configuration store.
    #[arg(long, global = true, env = "FLEXTK_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the encrypted configuration store.
    #[command(subcommand)]
    Config(config::ConfigCommand),

    /// Object storage operations.
    #[command(subcommand)]
    Cloud(cloud::CloudCommand),

    /// Convert and inspect media files with external tools.
    #[command(subcommand)]
    Media(media::MediaCommand),

    /// Identity provider lookups.
    #[command(subcommand)]
    Auth(services::AuthCommand),

    /// Firestore documents.
    Firestore(services::FirestoreArgs),

    /// Stripe payment intents and refunds.
    Payment(services::PaymentArgs),

    /// Unsplash photo search.
    Unsplash(services::UnsplashArgs),

    /// Person and face detection.
    #[cfg(feature = "onnx")]
    #[command(subcommand)]
    Detect(commands::detect::DetectCommand),

    /// Print a shell completion script.
    Completions {
        /// Target shell.
        shell: clap_complete::Shell,
    },
}

fn init_logging(verbose: bool) -> Result<()> {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))
}

/// Exit status for an error: the code of the first flextk error in the
/// chain, 1 otherwise.
fn exit_code(err: &anyhow::Error) -> u8 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<flextk_common::Error>())
        .map(|e| e.exit_code())
        .unwrap_or(1)
        .clamp(1, 255) as u8
}

async fn run(cli: Cli) -> Result<()> {
    let ctx = Context::new(cli.config, cli.password)?;

    match cli.command {
        Commands::Config(cmd) => config::run(&ctx, cmd).await,
        Commands::Cloud(cmd) => cloud::run(&ctx, cmd).await,
        Commands::Media(cmd) => media::run(cmd).await,
        Commands::Auth(cmd) => services::run_auth(&ctx, cmd).await,
        Commands::Firestore(cmd) => services::run_firestore(&ctx, cmd).await,
        Commands::Payment(cmd) => services::run_payment(&ctx, cmd).await,
        Commands::Unsplash(cmd) => services::run_unsplash(&ctx, cmd).await,
        #[cfg(feature = "onnx")]
        Commands::Detect(cmd) => commands::detect::run(cmd).await,
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "flextk", &mut std::io::stdout());
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.verbose) {
        eprintln!("{:#}", e);
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            ExitCode::from(exit_code(&err))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_exit_code_follows_error_chain() {
        let err = anyhow::Error::new(flextk_common::Error::Decryption("bad tag".into()))
            .context("Failed to read section");
        assert_eq!(exit_code(&err), 3);
        assert_eq!(exit_code(&anyhow::anyhow!("plain failure")), 1);
    }
}
