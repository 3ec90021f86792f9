use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

use defgraph::config::{load_config, Config};

mod cli;

#[derive(Parser)]
#[command(name = "defgraph")]
#[command(author = "Defgraph Project Team")]
#[command(version)]
#[command(about = "Mines XML definition trees into a deduplicated tag and definition graph", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to .defgraph.toml in the working directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Enable verbose logging and detailed statistics
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze module directories and archive the resulting graph
    Analyze {
        /// Official content module directory (repeatable)
        #[arg(long, value_name = "DIR")]
        official: Vec<PathBuf>,

        /// Additional module directory (repeatable)
        #[arg(short, long, value_name = "DIR")]
        include: Vec<PathBuf>,

        /// Archive to write (overrides [output] archive)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Export an archived graph
    Export {
        #[command(subcommand)]
        format: ExportFormat,
    },

    /// Show archive statistics
    Stats {
        /// Archive to inspect (defaults to [output] archive)
        archive: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum ExportFormat {
    /// Compact index-based JSON
    Json {
        /// Archive to export
        archive: PathBuf,

        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Indent the output
        #[arg(long)]
        pretty: bool,
    },
}

fn init_logging(debug: bool, verbose: bool, config: &Config) {
    let level = if debug {
        Level::DEBUG.to_string()
    } else if verbose {
        Level::INFO.to_string()
    } else {
        config.logging.level.clone()
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match config.logging.format.as_str() {
        "json" => builder.json().init(),
        "compact" => builder.compact().init(),
        _ => builder.pretty().init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, source) = load_config(cli.config.as_deref())?;
    init_logging(cli.debug, cli.verbose, &config);

    info!("defgraph v{} starting...", env!("CARGO_PKG_VERSION"));
    source.log();

    match cli.command {
        Commands::Analyze {
            official,
            include,
            output,
        } => {
            cli::analyze::analyze_modules(official, include, output, &config).await?;
        }

        Commands::Export {
            format: ExportFormat::Json {
                archive,
                output,
                pretty,
            },
        } => {
            cli::export::export_json(archive, output, pretty)?;
        }

        Commands::Stats { archive } => {
            let archive = archive.unwrap_or_else(|| config.output.archive.clone());
            cli::stats::show_stats(archive, cli.verbose)?;
        }
    }

    Ok(())
}
