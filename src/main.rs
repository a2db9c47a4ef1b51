use anyhow::Result;
use clap::{Parser, Subcommand};
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use podctl::commands::{self, BuildArgs, RunArgs};
use podctl::config;
use podctl::engine::BollardEngine;
use podctl::orchestrator::TokioClock;
use podctl::report::Report;

#[derive(Parser, Debug)]
#[command(
    name = "podctl",
    version,
    about = "Run short-lived containers and manage images over a Podman/Docker socket"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Path to the engine's unix socket
    #[arg(long, global = true, env = config::SOCKET_ENV_VAR, default_value = config::DEFAULT_SOCKET_PATH)]
    socket: String,
    /// Verbose logs
    #[arg(long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List images
    Images {
        /// Include intermediate images
        #[arg(short, long)]
        all: bool,
    },
    /// List containers
    Ps {
        /// Include stopped containers
        #[arg(short, long)]
        all: bool,
    },
    /// Pull an image from a registry
    Pull {
        /// Image reference (e.g., alpine:3.20)
        image: String,
    },
    /// Build an image from a context directory
    Build(BuildArgs),
    /// Run a container to completion
    Run(RunArgs),
    /// Send a signal to a running container
    Kill {
        /// Container ID or name
        container: String,
        /// Signal to send
        #[arg(short, long, default_value = config::DEFAULT_SIGNAL)]
        signal: String,
    },
    /// Remove a container
    Rm {
        /// Container ID or name
        container: String,
        /// Remove even if running
        #[arg(short, long)]
        force: bool,
    },
    /// Remove an image
    Rmi {
        /// Image ID or reference
        image: String,
        /// Remove even if in use
        #[arg(short, long)]
        force: bool,
    },
    /// Remove unused images
    Prune,
    /// Show engine information
    Info {
        /// Render with a template such as '{{.host.arch}}'
        #[arg(long)]
        format: Option<String>,
    },
    /// Show engine version
    Version {
        /// Render with a template such as '{{.Version}}'
        #[arg(long)]
        format: Option<String>,
    },
    /// Show a container's full attributes
    Inspect {
        /// Container ID or name
        container: String,
        /// Render with a template such as '{{.State.Status}}'
        #[arg(long)]
        format: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "info" } else { "warn" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var(config::LOG_ENV_VAR).unwrap_or_else(|_| filter.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()?;

    let report = dispatch(cli).await;
    report.emit();
    Ok(ExitCode::from(report.exit_code.clamp(0, 255) as u8))
}

async fn dispatch(cli: Cli) -> Report {
    let engine = match BollardEngine::connect(&cli.socket) {
        Ok(engine) => engine,
        Err(err) => return Report::failed("Failed to connect to engine socket", &err),
    };
    if let Some(report) = commands::connect(&engine).await {
        return report;
    }

    match cli.command {
        Commands::Images { all } => commands::images(&engine, all).await,
        Commands::Ps { all } => commands::ps(&engine, all).await,
        Commands::Pull { image } => commands::pull(&engine, &image).await,
        Commands::Build(args) => commands::build(&engine, args).await,
        Commands::Run(args) => {
            let clock = TokioClock::new();
            commands::run(&engine, &clock, args).await
        }
        Commands::Kill { container, signal } => commands::kill(&engine, &container, &signal).await,
        Commands::Rm { container, force } => commands::rm(&engine, &container, force).await,
        Commands::Rmi { image, force } => commands::rmi(&engine, &image, force).await,
        Commands::Prune => commands::prune(&engine).await,
        Commands::Info { format } => commands::info(&engine, format.as_deref()).await,
        Commands::Version { format } => commands::version(&engine, format.as_deref()).await,
        Commands::Inspect { container, format } => {
            commands::inspect(&engine, &container, format.as_deref()).await
        }
    }
}
