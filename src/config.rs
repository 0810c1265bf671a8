/// TOML configuration with sensible defaults.
/// Only the list of sources is required; everything else has a default.

use crate::discovery;
use crate::error::ConfigError;
use crate::session::SessionSettings;

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Where a resource with no checkpoint starts being read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartPosition {
    Beginning,
    #[default]
    End,
}

impl std::fmt::Display for StartPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StartPosition::Beginning => f.write_str("beginning"),
            StartPosition::End => f.write_str("end"),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Seconds between polls, also the retry delay after a connection failure.
    pub interval_s: u64,
    pub start_position: StartPosition,
    /// Upper bound on a single range request.
    pub max_request_bytes: u64,
    /// Bound on every probe, fetch and listing call.
    pub timeout_s: u64,
    /// Directory for default-named checkpoint files.
    pub checkpoint_dir: Option<PathBuf>,
    /// Treat end of resource as the terminator of a final unterminated line.
    pub emit_unterminated_tail: bool,
    /// Value for the `host` field of records (defaults to the machine hostname).
    pub host: Option<String>,
    /// Extra request headers (e.g. `Authorization`), sent verbatim.
    pub headers: BTreeMap<String, String>,
    pub sources: Vec<SourceConfig>,
}

/// One `[[sources]]` entry. The last path segment of `url` may be a glob.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub url: String,
    #[serde(default)]
    pub start_position: Option<StartPosition>,
    #[serde(default)]
    pub checkpoint_path: Option<PathBuf>,
}

impl SourceConfig {
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            start_position: None,
            checkpoint_path: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interval_s: 10,
            start_position: StartPosition::End,
            max_request_bytes: 1024 * 1024, // 1 MiB
            timeout_s: 30,
            checkpoint_dir: None,
            emit_unterminated_tail: false,
            host: None,
            headers: BTreeMap::new(),
            sources: Vec::new(),
        }
    }
}

impl Config {
    /// Load config from `path`, or from the default location when `None`.
    /// A missing default file yields defaults; an explicit path must exist.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (config_path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (config_file_path(), false),
        };
        match std::fs::read_to_string(&config_path) {
            Ok(contents) => {
                let config = Self::parse(&contents).map_err(|source| ConfigError::Parse {
                    path: config_path.clone(),
                    source,
                })?;
                log::info!("Loaded config from {}", config_path.display());
                Ok(config)
            }
            Err(e) if !explicit && e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("No config file found at {}. Using defaults.", config_path.display());
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Read {
                path: config_path,
                source,
            }),
        }
    }

    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Reject anything that would only fail once sessions are running.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_s == 0 {
            return Err(ConfigError::Invalid("interval_s must be greater than 0".into()));
        }
        if self.max_request_bytes == 0 {
            return Err(ConfigError::Invalid("max_request_bytes must be greater than 0".into()));
        }
        if self.timeout_s == 0 {
            return Err(ConfigError::Invalid("timeout_s must be greater than 0".into()));
        }
        if self.sources.is_empty() {
            return Err(ConfigError::Invalid(
                "no sources configured (add a [[sources]] entry or pass --url)".into(),
            ));
        }
        for source in &self.sources {
            if !(source.url.starts_with("http://") || source.url.starts_with("https://")) {
                return Err(ConfigError::Invalid(format!(
                    "source url must be http:// or https://, got {:?}",
                    source.url
                )));
            }
            if source.checkpoint_path.is_some() && discovery::is_pattern(&source.url) {
                return Err(ConfigError::Invalid(format!(
                    "checkpoint_path cannot be shared by every match of pattern {}",
                    source.url
                )));
            }
        }
        for (name, value) in &self.headers {
            if ureq::http::HeaderName::from_bytes(name.as_bytes()).is_err() {
                return Err(ConfigError::Invalid(format!("invalid header name {name:?}")));
            }
            if ureq::http::HeaderValue::from_str(value).is_err() {
                return Err(ConfigError::Invalid(format!("invalid value for header {name}")));
            }
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.interval_s)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_s)
    }

    pub fn checkpoint_dir(&self) -> PathBuf {
        self.checkpoint_dir.clone().unwrap_or_else(default_checkpoint_dir)
    }

    /// Resolve process-wide values once; sessions get their own copy.
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            poll_interval: self.poll_interval(),
            max_window_bytes: self.max_request_bytes,
            emit_unterminated_tail: self.emit_unterminated_tail,
            host: self.host.clone().unwrap_or_else(local_hostname),
        }
    }
}

fn local_hostname() -> String {
    match hostname::get() {
        Ok(name) => name.to_string_lossy().into_owned(),
        Err(e) => {
            log::warn!("Cannot resolve hostname ({e}), using \"localhost\"");
            "localhost".into()
        }
    }
}

fn config_file_path() -> PathBuf {
    match dirs::config_dir() {
        Some(dir) => dir.join("httptail").join("config.toml"),
        None => PathBuf::from("httptail.toml"),
    }
}

fn default_checkpoint_dir() -> PathBuf {
    match dirs::data_local_dir() {
        Some(dir) => dir.join("httptail").join("checkpoints"),
        None => PathBuf::from(".httptail").join("checkpoints"),
    }
}
