use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;
const DEFAULT_COOLDOWN_SECS: u64 = 60;
const DEFAULT_EXTRACTOR_URL: &str = "http://127.0.0.1:8500/embed";
const DEFAULT_EXTRACTOR_TIMEOUT_SECS: u64 = 10;
const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Daemon configuration.
///
/// Built from defaults, then an optional TOML file named by `MUSTER_CONFIG`,
/// then `MUSTER_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Maximum Euclidean distance for a positive match (lower = stricter).
    pub match_threshold: f32,
    /// Minimum seconds between two recorded marks for the same identity.
    pub cooldown_secs: u64,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// HTTP listen address.
    pub bind: SocketAddr,
    /// Endpoint of the face embedding sidecar.
    pub extractor_url: String,
    pub extractor_timeout_secs: u64,
    /// Upper bound on request bodies (image uploads).
    pub max_upload_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            cooldown_secs: DEFAULT_COOLDOWN_SECS,
            db_path: default_db_path(),
            bind: SocketAddr::from(([127, 0, 0, 1], 8000)),
            extractor_url: DEFAULT_EXTRACTOR_URL.to_string(),
            extractor_timeout_secs: DEFAULT_EXTRACTOR_TIMEOUT_SECS,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

impl Config {
    /// Load configuration from the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let base = match std::env::var("MUSTER_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        Ok(base.with_overrides(|key| std::env::var(key).ok()))
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(config.sanitized())
    }

    /// Apply `MUSTER_*` overrides resolved through `lookup`.
    ///
    /// Unparsable values are ignored with a warning.
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = parsed(&lookup, "MUSTER_MATCH_THRESHOLD") {
            self.match_threshold = v;
        }
        if let Some(v) = parsed(&lookup, "MUSTER_COOLDOWN_SECS") {
            self.cooldown_secs = v;
        }
        if let Some(v) = lookup("MUSTER_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        if let Some(v) = parsed(&lookup, "MUSTER_BIND") {
            self.bind = v;
        }
        if let Some(v) = lookup("MUSTER_EXTRACTOR_URL") {
            self.extractor_url = v;
        }
        if let Some(v) = parsed(&lookup, "MUSTER_EXTRACTOR_TIMEOUT_SECS") {
            self.extractor_timeout_secs = v;
        }
        if let Some(v) = parsed(&lookup, "MUSTER_MAX_UPLOAD_BYTES") {
            self.max_upload_bytes = v;
        }
        self.sanitized()
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn extractor_timeout(&self) -> Duration {
        Duration::from_secs(self.extractor_timeout_secs)
    }

    fn sanitized(mut self) -> Self {
        if !self.match_threshold.is_finite() || self.match_threshold < 0.0 {
            tracing::warn!(
                value = self.match_threshold,
                default = DEFAULT_MATCH_THRESHOLD,
                "invalid match threshold; using default"
            );
            self.match_threshold = DEFAULT_MATCH_THRESHOLD;
        }
        self
    }
}

fn parsed<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable config value");
            None
        }
    }
}

/// `$XDG_DATA_HOME/muster/attendance.db`, falling back to `~/.local/share`.
fn default_db_path() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("muster")
        .join("attendance.db")
}
