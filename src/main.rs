//! Spangraph CLI entry point

use clap::{Args, Parser, Subcommand};
use spangraph_core::{EdgeType, ExpansionStrategy};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

#[derive(Parser)]
#[command(name = "spangraph")]
#[command(about = "Build and traverse confidence-scored code relationship graphs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Repository root path (defaults to current directory)
    #[arg(short, long, default_value = ".", global = true)]
    root: PathBuf,

    /// Config file (defaults to spangraph.toml in the repository root)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract edges from a span file and print them as JSON
    Build(BuildArgs),
    /// Build the graph, then run a cached traversal from the given spans
    Traverse(TraverseArgs),
    /// Show version
    Version,
}

#[derive(Args, Debug, Clone)]
pub struct BuildArgs {
    /// JSON array of spans produced by the parser
    #[arg(short, long)]
    pub spans: PathBuf,

    /// Extractors to run, overriding the config
    #[arg(short, long, value_delimiter = ',')]
    pub extractors: Vec<String>,

    /// Minimum edge confidence, overriding the config
    #[arg(long)]
    pub threshold: Option<f32>,

    /// Stop at the first precision stage that yields edges
    #[arg(long)]
    pub incremental: bool,
}

#[derive(Args, Debug, Clone)]
pub struct TraverseArgs {
    #[command(flatten)]
    pub build: BuildArgs,

    /// Span ids to start from
    #[arg(long = "start", required = true)]
    pub start: Vec<String>,

    /// Free-text query recorded on the result
    #[arg(short, long, default_value = "")]
    pub query: String,

    #[arg(long)]
    pub depth: Option<usize>,

    #[arg(long)]
    pub budget: Option<usize>,

    /// Edge types to follow (call, import, test-of, routes, config-key)
    #[arg(long = "edge-type", value_delimiter = ',')]
    pub edge_types: Vec<EdgeType>,

    /// breadth or quality-first
    #[arg(long, default_value = "breadth")]
    pub strategy: ExpansionStrategy,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries JSON.
    let log_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "spangraph={log_level},spangraph_core={log_level},spangraph_extract={log_level},spangraph_traverse={log_level}"
        ))
    });
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli.command {
        Commands::Build(args) => {
            tracing::debug!("Repository root: {}", cli.root.display());
            commands::build(&cli.root, cli.config.as_deref(), &args).await
        }
        Commands::Traverse(args) => {
            tracing::debug!("Repository root: {}", cli.root.display());
            commands::traverse(&cli.root, cli.config.as_deref(), &args).await
        }
        Commands::Version => {
            println!("Spangraph v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
