use anyhow::{Context, Result, anyhow};
use std::fs::File;
use std::path::{Path, PathBuf};
use zip::CompressionMethod;
use zip::write::{FileOptions, ZipWriter};

/// One file to place in a bundle, stored under `name`
#[derive(Debug, Clone)]
pub struct BundleEntry {
    pub name: String,
    pub source: PathBuf,
}

/// Writes a deflated ZIP archive at `archive` containing `entries`
pub async fn write_bundle(archive: &Path, entries: Vec<BundleEntry>) -> Result<()> {
    let archive = archive.to_path_buf();
    tokio::task::spawn_blocking(move || write_bundle_blocking(&archive, &entries))
        .await
        .map_err(|e| anyhow!("Bundle task failed: {}", e))?
}

fn write_bundle_blocking(archive: &Path, entries: &[BundleEntry]) -> Result<()> {
    let file = File::create(archive)
        .with_context(|| format!("Failed to create {}", archive.display()))?;
    let mut zip = ZipWriter::new(file);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    for entry in entries {
        zip.start_file(entry.name.as_str(), options)
            .with_context(|| format!("Failed to create ZIP entry {}", entry.name))?;
        let mut source = File::open(&entry.source)
            .with_context(|| format!("Failed to open {}", entry.source.display()))?;
        std::io::copy(&mut source, &mut zip)
            .with_context(|| format!("Failed to write ZIP entry {}", entry.name))?;
    }

    zip.finish().context("Failed to finalize ZIP")?;
    Ok(())
}
