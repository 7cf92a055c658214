use std::path::PathBuf;
use std::time::{Duration, SystemTime};
use tokio::sync::watch;
use tokio::time::sleep;
use uuid::Uuid;

const OUTPUT_DIR_SUFFIX: &str = "_output";

/// Periodically sweeps the scratch directory for entries that per-request
/// cleanup missed (crashes, failed deletes, aborted uploads).
pub struct ScratchJanitor {
    root: PathBuf,
    interval: Duration,
    max_age: Duration,
    shutdown: watch::Receiver<bool>,
}

impl ScratchJanitor {
    pub fn new(
        root: PathBuf,
        interval: Duration,
        max_age: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            root,
            interval,
            max_age,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        tracing::info!(
            "🧹 Scratch janitor started (every {:?}, max age {:?})",
            self.interval,
            self.max_age
        );

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    tracing::info!("🛑 Scratch janitor shutting down");
                    break;
                }
                _ = sleep(self.interval) => {
                    let removed = sweep(&self.root, self.max_age).await;
                    if removed > 0 {
                        tracing::info!("🧹 Janitor removed {} stale scratch entries", removed);
                    }
                }
            }
        }
    }
}

/// Whether `name` follows the scratch layout: `<uuid>.<ext>` for inputs and
/// `<uuid>.<ext>_output` for converter output directories
fn is_scratch_entry(name: &str, is_dir: bool) -> bool {
    let Some((stem, rest)) = name.split_once('.') else {
        return false;
    };
    if Uuid::parse_str(stem).is_err() {
        return false;
    }
    match rest.strip_suffix(OUTPUT_DIR_SUFFIX) {
        Some(ext) => is_dir && !ext.is_empty(),
        None => !is_dir && !rest.is_empty(),
    }
}

/// Removes scratch entries directly under `root` last modified more than
/// `max_age` ago. Anything not named like a scratch entry is left alone.
/// Returns the number of entries removed.
pub async fn sweep(root: &std::path::Path, max_age: Duration) -> usize {
    let mut entries = match tokio::fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("Janitor cannot read {}: {}", root.display(), e);
            return 0;
        }
    };

    let now = SystemTime::now();
    let mut removed = 0;

    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("Janitor failed listing {}: {}", root.display(), e);
                break;
            }
        };

        let metadata = match entry.metadata().await {
            Ok(metadata) => metadata,
            Err(_) => continue,
        };

        let name = entry.file_name();
        if !is_scratch_entry(&name.to_string_lossy(), metadata.is_dir()) {
            continue;
        }

        let age = metadata
            .modified()
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .unwrap_or_default();
        if age < max_age {
            continue;
        }

        let path = entry.path();
        let result = if metadata.is_dir() {
            tokio::fs::remove_dir_all(&path).await
        } else {
            tokio::fs::remove_file(&path).await
        };

        match result {
            Ok(()) => {
                tracing::debug!("Janitor removed {}", path.display());
                removed += 1;
            }
            Err(e) => tracing::debug!("Janitor could not remove {}: {}", path.display(), e),
        }
    }

    removed
}
