mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::config::ConfigSubcommand;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "dearblog",
    about = "Hugo blog helper: run the local preview server and check your toolchain",
    version,
    propagate_version = true
)]
struct Cli {
    /// Blog project root (default: auto-detect from the Hugo site config or .git/)
    #[arg(long, global = true, env = "DEARBLOG_ROOT")]
    root: Option<PathBuf>,

    /// Hugo executable (overrides hugo.binary from .dearblog.yaml)
    #[arg(long, global = true, env = "DEARBLOG_HUGO")]
    hugo: Option<String>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run `hugo serve -D -F` (drafts and future posts) until Ctrl-C
    Preview {
        /// Open the browser once the server should be up
        #[arg(long)]
        open: bool,

        /// Read start/stop commands from stdin instead of exiting when the server stops
        #[arg(long, short = 'i')]
        interactive: bool,
    },

    /// Check that Hugo is installed and the project root is a Hugo site
    Doctor {
        /// Open the Hugo install guide if the check fails
        #[arg(long)]
        open_guide: bool,
    },

    /// Inspect and initialise .dearblog.yaml
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Preview { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());
    let hugo = cli.hugo.as_deref();

    let result = match cli.command {
        Commands::Preview { open, interactive } => cmd::preview::run(&root, hugo, open, interactive),
        Commands::Doctor { open_guide } => cmd::doctor::run(&root, hugo, open_guide, cli.json),
        Commands::Config { subcommand } => cmd::config::run(&root, hugo, subcommand, cli.json),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
