use anyhow::{bail, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use tracing::{info, warn};

use defgraph::analyzer::{Analyzer, ModuleSource};
use defgraph::archive::Archive;
use defgraph::config::Config;
use defgraph::graph::Severity;

pub async fn analyze_modules(
    official: Vec<PathBuf>,
    include: Vec<PathBuf>,
    output: Option<PathBuf>,
    config: &Config,
) -> Result<()> {
    let sources: Vec<ModuleSource> = official
        .into_iter()
        .map(|path| ModuleSource::new(path, true))
        .chain(include.into_iter().map(|path| ModuleSource::new(path, false)))
        .collect();

    if sources.is_empty() {
        bail!("No modules to analyze; pass --official or --include");
    }
    for source in &sources {
        if !source.path.is_dir() {
            bail!("Module directory not found: {}", source.path.display());
        }
    }

    // Open the archive first so an unwritable destination fails before any work
    let archive_path = output.unwrap_or_else(|| config.output.archive.clone());
    let archive = Archive::open(&archive_path)?;

    println!("Definition Graph Builder v{}", env!("CARGO_PKG_VERSION"));
    println!("Modules: {}", sources.len());
    println!("Archive: {}", archive_path.display());

    let progress = ProgressBar::new(0);
    progress.set_style(
        ProgressStyle::with_template("{spinner} [{elapsed_precise}] {bar:40} {pos}/{len} {wide_msg}")?
            .progress_chars("=> "),
    );

    let analyzer = Analyzer::new(config).with_progress(progress.clone());
    let stop = analyzer.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing resources already in flight");
            stop.store(true, Ordering::SeqCst);
        }
    });

    let (graph, summary) = analyzer.analyze(&sources).await;
    progress.finish_and_clear();

    archive.save(&graph)?;
    info!("Archived analysis to {}", archive_path.display());

    let counts = graph.counts();
    println!("\nAnalysis {}", if summary.cancelled { "interrupted" } else { "complete" });
    println!("  Resources: {} ({} failed)", summary.resources, summary.failed);
    println!("  Definitions: {}", counts.definitions);
    println!("  Classes: {}", counts.classes);
    println!("  Tags: {}", counts.tags);
    println!("  Relationships: {}", counts.relationships);
    println!("  Examples: {}", counts.examples);
    println!(
        "  Issues: {} errors, {} warnings",
        graph.issues_with(Severity::Error).count(),
        graph.issues_with(Severity::Warning).count()
    );

    Ok(())
}
