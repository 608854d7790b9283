use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use minirag::config::{LogFormat, LoggingSettings};
use minirag::{bootstrap, Settings};

#[derive(Parser, Debug)]
#[command(name = "minirag")]
#[command(version, about = "Retrieval-augmented generation service")]
struct Cli {
    /// Read settings from this file instead of `./.env`.
    #[arg(long, global = true, env = "MINIRAG_ENV_FILE")]
    env_file: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply schema migrations, then start the HTTP server.
    Serve {
        /// Start the server against an already-migrated schema.
        #[arg(long, default_value_t = false)]
        skip_migrations: bool,
    },
    /// Apply schema migrations and exit.
    Migrate,
    /// Configuration utilities.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Load and validate settings, then print a redacted summary.
    Check,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let loaded = match &cli.env_file {
        Some(path) => Settings::from_env_file(path),
        None => Settings::from_env(),
    };
    let settings = match loaded {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("invalid configuration: {err}");
            return ExitCode::FAILURE;
        }
    };

    init_tracing(&settings.logging);

    match run(cli.command.unwrap_or(Command::Serve { skip_migrations: false }), settings) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command, settings: Settings) -> Result<()> {
    match command {
        Command::Config {
            command: ConfigCommand::Check,
        } => {
            let summary = serde_json::to_string_pretty(&settings.summary())?;
            println!("{summary}");
            Ok(())
        }
        Command::Migrate => {
            let runtime = runtime(1)?;
            runtime.block_on(bootstrap::migrate_only(&settings))?;
            Ok(())
        }
        Command::Serve { skip_migrations } => {
            let runtime = runtime(settings.server.workers)?;
            runtime.block_on(bootstrap::run(settings, skip_migrations))
        }
    }
}

fn runtime(workers: usize) -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(workers)
        .enable_all()
        .build()
        .context("failed to build tokio runtime")
}

fn init_tracing(logging: &LoggingSettings) {
    let filter = EnvFilter::try_new(&logging.filter).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}
