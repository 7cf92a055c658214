use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, error, info};

use crate::config::AppConfig;

/// Every way a conversion can fail. The handler reports all of them as one
/// "conversion failed" error, carrying the cause and any captured tool output.
#[derive(Error, Debug)]
pub enum ConversionError {
    #[error("failed to create output directory {}: {source}", .path.display())]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}, output: {output}")]
    Failed {
        program: String,
        status: String,
        output: String,
    },

    #[error("{program} did not finish within {}s", .timeout.as_secs())]
    TimedOut { program: String, timeout: Duration },

    #[error("output not produced: {}", .path.display())]
    OutputNotProduced { path: PathBuf },
}

/// Boundary around the external conversion tool
#[async_trait]
pub trait Converter: Send + Sync {
    /// Convert `input` and return the path of the produced file
    async fn convert(&self, input: &Path) -> Result<PathBuf, ConversionError>;

    /// Extension of the files this converter produces
    fn output_extension(&self) -> &str;
}

/// Runs `<bin> --headless --convert-to <format> --outdir <dir> <input>`
pub struct LibreOfficeConverter {
    program: String,
    target_format: String,
    output_extension: String,
    work_dir: PathBuf,
    timeout: Duration,
}

impl LibreOfficeConverter {
    pub fn new(
        program: impl Into<String>,
        target_format: impl Into<String>,
        work_dir: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Self {
        let target_format = target_format.into();
        let output_extension = target_format
            .split(':')
            .next()
            .unwrap_or(&target_format)
            .to_string();

        Self {
            program: program.into(),
            target_format,
            output_extension,
            work_dir: work_dir.into(),
            timeout,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.converter_bin.clone(),
            config.target_format.clone(),
            config.temp_dir.clone(),
            config.conversion_timeout,
        )
    }

    /// Output directory and expected output file for `input`
    pub fn output_paths(&self, input: &Path) -> (PathBuf, PathBuf) {
        let base_name = input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        let output_dir = self.work_dir.join(format!("{}_output", base_name));
        let output_file = output_dir.join(format!("{}.{}", stem, self.output_extension));
        (output_dir, output_file)
    }

    async fn run(&self, input: &Path, output_dir: &Path) -> Result<(), ConversionError> {
        let child = Command::new(&self.program)
            .arg("--headless")
            .arg("--convert-to")
            .arg(&self.target_format)
            .arg("--outdir")
            .arg(output_dir)
            .arg(input)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ConversionError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        // Dropping the wait future on timeout drops the child, which kills it
        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| ConversionError::TimedOut {
                program: self.program.clone(),
                timeout: self.timeout,
            })?
            .map_err(|source| ConversionError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        let combined = combined.trim().to_string();

        if !output.status.success() {
            return Err(ConversionError::Failed {
                program: self.program.clone(),
                status: output.status.to_string(),
                output: combined,
            });
        }

        debug!("{} output: {}", self.program, combined);
        Ok(())
    }
}

#[async_trait]
impl Converter for LibreOfficeConverter {
    async fn convert(&self, input: &Path) -> Result<PathBuf, ConversionError> {
        let (output_dir, output_file) = self.output_paths(input);

        tokio::fs::create_dir_all(&output_dir)
            .await
            .map_err(|source| ConversionError::OutputDir {
                path: output_dir.clone(),
                source,
            })?;

        let started = Instant::now();
        info!("🔄 Converting {} to {}", input.display(), self.target_format);

        let mut result = self.run(input, &output_dir).await;
        if result.is_ok() && !tokio::fs::try_exists(&output_file).await.unwrap_or(false) {
            result = Err(ConversionError::OutputNotProduced {
                path: output_file.clone(),
            });
        }

        if let Err(e) = result {
            error!("Conversion of {} failed: {}", input.display(), e);
            if let Err(cleanup_err) = tokio::fs::remove_dir_all(&output_dir).await {
                debug!(
                    "Could not remove {}: {}",
                    output_dir.display(),
                    cleanup_err
                );
            }
            return Err(e);
        }

        info!(
            "✅ Converted {} in {:?}",
            input.display(),
            started.elapsed()
        );
        Ok(output_file)
    }

    fn output_extension(&self) -> &str {
        &self.output_extension
    }
}
