use anyhow::{bail, Result};
use std::path::{Path, PathBuf};

use defgraph::archive::Archive;

const TOP_TAGS: usize = 10;

pub fn show_stats(archive_path: PathBuf, verbose: bool) -> Result<()> {
    if !archive_path.exists() {
        bail!("Archive not found: {}", archive_path.display());
    }

    let archive = Archive::open(&archive_path)?;
    let counts = archive.counts()?;

    println!("Definition Graph Statistics v{}", env!("CARGO_PKG_VERSION"));
    println!("Archive: {}", archive_path.display());
    match archive.analyzed_at()? {
        Some(time) => println!("Analyzed: {}", time.format("%Y-%m-%d %H:%M:%S UTC")),
        None => println!("Analyzed: never"),
    }

    println!("\nGraph Statistics:");
    println!("  Modules: {}", counts.modules);
    println!("  Resources: {}", counts.resources);
    println!("  Classes: {}", counts.classes);
    println!("  Definitions: {}", counts.definitions);
    println!("  Tags: {}", counts.tags);
    println!("  Attributes: {}", counts.attributes);
    println!("  Relationships: {}", counts.relationships);
    println!("  Examples: {}", counts.examples);
    println!("  Tag usage: {}", counts.tag_usage);
    println!("  Attribute usage: {}", counts.attribute_usage);
    println!("  Issues: {}", counts.issues);
    println!("  Archive size: {:.2} MB", get_db_size(&archive_path)?);

    if verbose {
        println!("\nDetailed Statistics:");

        let issues = archive.issues_by_severity()?;
        if !issues.is_empty() {
            println!("  Issues by severity:");
            for (severity, count) in issues {
                println!("    {}: {}", severity, count);
            }
        }

        let tags = archive.top_tags(TOP_TAGS)?;
        if !tags.is_empty() {
            println!("  Most used tags:");
            for (tag, uses) in tags {
                println!("    {}: {}", tag, uses);
            }
        }
    }

    Ok(())
}

fn get_db_size(path: &Path) -> Result<f64> {
    let metadata = std::fs::metadata(path)?;
    Ok(metadata.len() as f64 / (1024.0 * 1024.0))
}
