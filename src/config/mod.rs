use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid {key}={value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Service configuration, built once at startup and shared through `AppState`
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Listen port (default: 8080)
    pub port: u16,

    /// Scratch directory for uploads and converter output (default: /tmp/docx2pdf)
    pub temp_dir: PathBuf,

    /// Maximum upload size in bytes (default: 10 MB)
    pub max_file_size: usize,

    /// External conversion tool (default: "libreoffice")
    pub converter_bin: String,

    /// Value passed to `--convert-to` (default: "pdf")
    pub target_format: String,

    /// Accepted upload extension, without the leading dot (default: "docx")
    pub input_extension: String,

    /// Deadline for one converter run (default: 120 s)
    pub conversion_timeout: Duration,

    /// When set, `/api/v1/*` requires a matching `X-API-Token` header
    pub api_token: Option<String>,

    /// Janitor sweep interval, zero disables the janitor (default: 600 s)
    pub janitor_interval: Duration,

    /// Scratch entries older than this are swept (default: 3600 s)
    pub scratch_max_age: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            temp_dir: PathBuf::from("/tmp/docx2pdf"),
            max_file_size: 10 * 1024 * 1024, // 10 MB
            converter_bin: "libreoffice".to_string(),
            target_format: "pdf".to_string(),
            input_extension: "docx".to_string(),
            conversion_timeout: Duration::from_secs(120),
            api_token: None,
            janitor_interval: Duration::from_secs(600),
            scratch_max_age: Duration::from_secs(3600),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup, falling back to defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let default = Self::default();

        let input_extension = lookup("INPUT_EXTENSION")
            .map(|v| v.trim().trim_start_matches('.').to_string())
            .unwrap_or(default.input_extension);
        if input_extension.is_empty() {
            return Err(ConfigError::Invalid {
                key: "INPUT_EXTENSION",
                value: input_extension,
                reason: "extension cannot be empty".to_string(),
            });
        }

        let target_format = lookup("CONVERT_TO").unwrap_or(default.target_format);
        if target_format.split(':').next().unwrap_or("").is_empty() {
            return Err(ConfigError::Invalid {
                key: "CONVERT_TO",
                value: target_format,
                reason: "target format cannot be empty".to_string(),
            });
        }

        let config = Self {
            port: parse_or(&lookup, "PORT", default.port)?,
            temp_dir: lookup("TEMP_DIR")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
                .unwrap_or(default.temp_dir),
            max_file_size: parse_or(&lookup, "MAX_FILE_SIZE", default.max_file_size)?,
            converter_bin: lookup("CONVERTER_BIN")
                .filter(|v| !v.is_empty())
                .unwrap_or(default.converter_bin),
            target_format,
            input_extension,
            conversion_timeout: seconds_or(
                &lookup,
                "CONVERSION_TIMEOUT_SECS",
                default.conversion_timeout,
            )?,
            api_token: lookup("API_TOKEN").filter(|v| !v.is_empty()),
            janitor_interval: seconds_or(&lookup, "JANITOR_INTERVAL_SECS", default.janitor_interval)?,
            scratch_max_age: seconds_or(&lookup, "SCRATCH_MAX_AGE_SECS", default.scratch_max_age)?,
        };

        // A running conversion must never look stale to the janitor
        if !config.janitor_interval.is_zero()
            && config.scratch_max_age <= config.conversion_timeout
        {
            return Err(ConfigError::Invalid {
                key: "SCRATCH_MAX_AGE_SECS",
                value: config.scratch_max_age.as_secs().to_string(),
                reason: format!(
                    "must be longer than CONVERSION_TIMEOUT_SECS ({})",
                    config.conversion_timeout.as_secs()
                ),
            });
        }

        Ok(config)
    }

    /// Extension of the converted output, e.g. `pdf` for `pdf:writer_pdf_Export`
    pub fn output_extension(&self) -> &str {
        self.target_format
            .split(':')
            .next()
            .unwrap_or(&self.target_format)
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(value) => match value.trim().parse::<T>() {
            Ok(parsed) => Ok(parsed),
            Err(e) => Err(ConfigError::Invalid {
                key,
                reason: e.to_string(),
                value,
            }),
        },
        None => Ok(default),
    }
}

fn seconds_or<F>(lookup: &F, key: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    parse_or(lookup, key, default.as_secs()).map(Duration::from_secs)
}
