use std::path::{Path, PathBuf};

use facegate_core::{MatchPolicy, DEFAULT_MATCH_THRESHOLD};
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid configuration file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Daemon configuration: optional TOML file, then `FACEGATE_*` environment overrides.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Path to the identity store file.
    pub store_path: PathBuf,
    /// Maximum Euclidean distance for a positive match.
    pub match_threshold: f32,
    /// Tie-break among several identities within the threshold.
    pub match_policy: MatchPolicy,
    /// External helper that detects and encodes faces.
    pub extractor_program: PathBuf,
    /// Arguments passed before the image path.
    pub extractor_args: Vec<String>,
    /// Upper bound on one extraction request.
    pub extract_timeout_secs: u64,
}

/// Keys accepted in the TOML file. All optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    store_path: Option<PathBuf>,
    match_threshold: Option<f32>,
    match_policy: Option<MatchPolicy>,
    extractor_program: Option<PathBuf>,
    extractor_args: Option<Vec<String>>,
    extract_timeout_secs: Option<u64>,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration using `lookup` for environment variables.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let file = match lookup("FACEGATE_CONFIG") {
            Some(path) => read_file(Path::new(&path))?,
            None => FileConfig::default(),
        };

        let store_path = lookup("FACEGATE_STORE_PATH")
            .map(PathBuf::from)
            .or(file.store_path)
            .unwrap_or_else(|| default_data_dir(&lookup).join("identities.fgid"));

        let config = Self {
            store_path,
            match_threshold: env_parse(&lookup, "FACEGATE_MATCH_THRESHOLD")
                .or(file.match_threshold)
                .unwrap_or(DEFAULT_MATCH_THRESHOLD),
            match_policy: env_parse(&lookup, "FACEGATE_MATCH_POLICY")
                .or(file.match_policy)
                .unwrap_or_default(),
            extractor_program: lookup("FACEGATE_EXTRACTOR")
                .map(PathBuf::from)
                .or(file.extractor_program)
                .unwrap_or_else(|| PathBuf::from("facegate-extract")),
            extractor_args: file.extractor_args.unwrap_or_default(),
            extract_timeout_secs: env_parse(&lookup, "FACEGATE_EXTRACT_TIMEOUT_SECS")
                .or(file.extract_timeout_secs)
                .unwrap_or(10),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.match_threshold.is_finite() || self.match_threshold <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "match_threshold must be a positive number, got {}",
                self.match_threshold
            )));
        }
        if self.extract_timeout_secs == 0 {
            return Err(ConfigError::Invalid("extract_timeout_secs must be at least 1".into()));
        }
        Ok(())
    }
}

fn read_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn default_data_dir(lookup: &impl Fn(&str) -> Option<String>) -> PathBuf {
    lookup("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let home = lookup("HOME").unwrap_or_else(|| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facegate")
}

/// Parse an environment value; unparseable values fall through to the next layer.
fn env_parse<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable environment value");
            None
        }
    }
}
