//! forgeloop CLI: the main entry point.
//!
//! Commands:
//! - `run`     Execute one coding task and exit
//! - `chat`    Interactive session; context carries across tasks
//! - `config`  Create, show or locate the config file

use clap::{Parser, Subcommand};

mod approver;
mod commands;

#[derive(Parser)]
#[command(name = "forgeloop", about = "forgeloop: a terminal coding agent", version, author)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single task
    Run {
        /// What the agent should do
        task: String,

        /// Accepted for symmetry with chat; a fresh process always starts empty
        #[arg(long)]
        clear: bool,

        /// Override the iteration limit
        #[arg(long)]
        max_iterations: Option<usize>,

        /// Apply edits without asking
        #[arg(short, long)]
        yes: bool,
    },

    /// Interactive mode
    Chat {
        /// Apply edits without asking
        #[arg(short, long)]
        yes: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write a starter config file
    Init {
        #[arg(long)]
        force: bool,
    },
    /// Print the effective configuration with keys redacted
    Show,
    /// Print the config file path
    Path,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr so they never interleave with the agent's answer.
    let filter = if cli.verbose { "debug" } else { "warn" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }

    match cli.command {
        Commands::Run {
            task,
            clear,
            max_iterations,
            yes,
        } => commands::run::run(task, clear, max_iterations, yes).await?,
        Commands::Chat { yes } => commands::chat::run(yes).await?,
        Commands::Config { action } => match action {
            ConfigAction::Init { force } => commands::config_cmd::init(force).await?,
            ConfigAction::Show => commands::config_cmd::show().await?,
            ConfigAction::Path => commands::config_cmd::path().await?,
        },
    }

    Ok(())
}
