//! Callscope CLI entry point

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser)]
#[command(name = "callscope")]
#[command(about = "Call graph closure and layout for code bases", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Repository root path (defaults to current directory)
    #[arg(short, long, default_value = ".", global = true)]
    root: PathBuf,
}

/// Options shared by every command that reads the index.
#[derive(clap::Args, Clone)]
pub struct IndexArgs {
    /// Index manifest (defaults to <root>/callscope.json)
    #[arg(short, long)]
    index: Option<PathBuf>,

    /// Config file (defaults to <root>/callscope.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

/// What to build and how to print it.
#[derive(clap::Args, Clone)]
pub struct BuildArgs {
    #[command(flatten)]
    index: IndexArgs,

    /// Focus on these functions (qualified or unambiguous short names)
    #[arg(short, long = "seed")]
    seeds: Vec<String>,

    /// Which calls to follow from the seeds
    #[arg(short, long, value_enum, default_value_t = DirectionArg::Both)]
    direction: DirectionArg,

    /// Scope build: project, project-no-tests, module:<name> or dir:<path>
    #[arg(long, conflicts_with = "seeds")]
    scope: Option<String>,

    /// Only keep calls with both ends inside the scope
    #[arg(long, requires = "scope")]
    limited: bool,

    /// Also print device coordinates for a viewport of this size, e.g. 800x600
    #[arg(long)]
    viewport: Option<String>,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum DirectionArg {
    Upstream,
    Downstream,
    Both,
}

#[derive(Subcommand)]
enum Commands {
    /// Build one call graph and print it as JSON
    Build(BuildArgs),
    /// List the functions of a scope
    Functions {
        #[command(flatten)]
        index: IndexArgs,

        /// project, project-no-tests, module:<name> or dir:<path>
        #[arg(long, default_value = "project")]
        scope: String,
    },
    /// Rebuild whenever a file under the root changes
    Watch(BuildArgs),
    /// Show version
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(format!("callscope={}", log_level)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::debug!("Repository root: {}", cli.root.display());

    match cli.command {
        Commands::Build(args) => commands::build(cli.root, args).await,
        Commands::Functions { index, scope } => commands::functions(cli.root, index, &scope),
        Commands::Watch(args) => commands::watch(cli.root, args).await,
        Commands::Version => {
            println!("Callscope v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
