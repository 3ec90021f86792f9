use anyhow::{bail, Context, Result};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use tracing::info;

use defgraph::archive::Archive;
use defgraph::export::ExportDocument;

pub fn export_json(archive_path: PathBuf, output: Option<PathBuf>, pretty: bool) -> Result<()> {
    if !archive_path.exists() {
        bail!("Archive not found: {}", archive_path.display());
    }

    let graph = Archive::open(&archive_path)?.load()?;
    let document = ExportDocument::from_graph(&graph);

    match output {
        Some(path) => {
            let file = File::create(&path).with_context(|| format!("Failed to create {}", path.display()))?;
            let mut writer = BufWriter::new(file);
            document.write(&mut writer, pretty)?;
            writer.flush()?;
            info!("Exported {} definitions to {}", document.size.definitions, path.display());
        }
        None => {
            let stdout = io::stdout();
            let mut writer = stdout.lock();
            document.write(&mut writer, pretty)?;
            writeln!(writer)?;
        }
    }

    Ok(())
}
