use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod cmd;

#[derive(Parser)]
#[command(name = "boardsync")]
#[command(version, about = "Optimistic board edits with realtime sync")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Path to boardsync.toml (defaults to ./boardsync.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Realtime endpoint. Overrides the config file and BOARDSYNC_URL.
    #[arg(long, global = true)]
    pub url: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Connect and log connection changes and project broadcasts until Ctrl-C
    Watch {
        /// Project whose broadcasts are shown (all projects if omitted)
        #[arg(short, long)]
        project: Option<String>,
    },
    /// Send one acknowledged save of a board read from a JSON file
    Push {
        #[arg(short, long)]
        project: String,

        /// JSON file with `columns` and `items`
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Check whether a role may perform an action
    Can {
        /// admin, editor or viewer (anything else is treated as viewer)
        role: String,
        /// view, edit, delete, create_columns, delete_columns, invite, manage_project
        action: String,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Write a default boardsync.toml
    Init,
}

fn init_logging(cli: &Cli) {
    let default = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let registry = tracing_subscriber::registry().with(filter);
    if cli.json_logs {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    match &cli.command {
        Commands::Watch { project } => cmd::cmd_watch(&cli, project.as_deref()).await?,
        Commands::Push { project, file } => cmd::cmd_push(&cli, project, file).await?,
        Commands::Can { role, action } => cmd::cmd_can(role, action)?,
        Commands::Config { command } => cmd::cmd_config(&cli, command.clone())?,
    }

    Ok(())
}
