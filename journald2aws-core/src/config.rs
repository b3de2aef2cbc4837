//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/journald2aws/config.toml` unless a
//! file is given explicitly. Files ending in `.json` are read as JSON, anything
//! else as TOML. Every key is optional except `aws_log_stream_name`.
//!
//! Credentials may come from the file or from `AWS_ACCESS_KEY_ID` /
//! `AWS_SECRET_ACCESS_KEY`; the file wins when both are set.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::aws::Credentials;
use crate::error::{Error, Result};
use crate::poster::DEFAULT_RECV_TIMEOUT;

pub const ENV_ACCESS_KEY_ID: &str = "AWS_ACCESS_KEY_ID";
pub const ENV_SECRET_ACCESS_KEY: &str = "AWS_SECRET_ACCESS_KEY";

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Expand a leading `~` to the home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => home_dir().join(rest),
        Err(_) => path.to_path_buf(),
    }
}

/// A string that never shows up in `Debug` output
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

/// Main configuration struct
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Single-instance lock file
    #[serde(default)]
    pub pid_file: Option<PathBuf>,

    /// Where the last shipped journal cursor is kept
    #[serde(default)]
    pub cursor_file: Option<PathBuf>,

    /// Stop after this many seconds
    #[serde(default)]
    pub runtime_limit: Option<f64>,

    /// Seconds a worker may go without a heartbeat before shutdown
    #[serde(default = "default_heartbeat_age_limit")]
    pub heartbeat_age_limit: f64,

    #[serde(default = "default_log_group_name")]
    pub aws_log_group_name: String,

    /// Required
    #[serde(default)]
    pub aws_log_stream_name: Option<String>,

    #[serde(default)]
    pub aws_access_key_id: Option<String>,

    #[serde(default)]
    pub aws_secret_access_key: Option<Secret>,

    #[serde(default = "default_region_name")]
    pub aws_region_name: String,

    /// Build posts but do not send them
    #[serde(default)]
    pub aws_dry_run: bool,

    /// Endpoint override (defaults to the regional CloudWatch Logs endpoint)
    #[serde(default)]
    pub aws_url: Option<String>,

    /// HTTP request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub aws_request_timeout_secs: u64,

    /// Base journalctl argv (defaults to `["journalctl"]`)
    #[serde(default)]
    pub journalctl_cmd: Option<Vec<String>>,

    #[serde(default)]
    pub journalctl_after_cursor: Option<String>,

    #[serde(default)]
    pub journalctl_since: Option<String>,

    /// Run journalctl through `sh -c`
    #[serde(default)]
    pub journalctl_shell_wrap: bool,

    /// Bytes per stdout read
    #[serde(default = "default_read_size")]
    pub journalctl_read_size: usize,

    /// Seconds to sleep when journalctl has nothing to read
    #[serde(default = "default_journalctl_sleep")]
    pub journalctl_sleep_secs: f64,

    /// Batches buffered between tailer and poster
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,

    /// Seconds to wait for workers at shutdown
    #[serde(default = "default_join_timeout")]
    pub join_timeout_secs: f64,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pid_file: None,
            cursor_file: None,
            runtime_limit: None,
            heartbeat_age_limit: default_heartbeat_age_limit(),
            aws_log_group_name: default_log_group_name(),
            aws_log_stream_name: None,
            aws_access_key_id: None,
            aws_secret_access_key: None,
            aws_region_name: default_region_name(),
            aws_dry_run: false,
            aws_url: None,
            aws_request_timeout_secs: default_request_timeout(),
            journalctl_cmd: None,
            journalctl_after_cursor: None,
            journalctl_since: None,
            journalctl_shell_wrap: false,
            journalctl_read_size: default_read_size(),
            journalctl_sleep_secs: default_journalctl_sleep(),
            queue_size: default_queue_size(),
            join_timeout_secs: default_join_timeout(),
            logging: LoggingConfig::default(),
        }
    }
}

fn default_heartbeat_age_limit() -> f64 {
    60.
}

fn default_log_group_name() -> String {
    "omlish".to_string()
}

fn default_region_name() -> String {
    "us-west-1".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_read_size() -> usize {
    0x4000
}

fn default_journalctl_sleep() -> f64 {
    1.
}

fn default_queue_size() -> usize {
    64
}

fn default_join_timeout() -> f64 {
    10.
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Also write a daily-rotated log file here
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn secs(name: &str, value: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(value)
        .map_err(|_| Error::Config(format!("{} must be a non-negative number of seconds, got {}", name, value)))
}

impl Config {
    /// Load `path`, or the default config file if `None`.
    ///
    /// A missing default file yields the defaults; a missing explicit file is
    /// an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match Self::resolve_path(path) {
            Some(path) => Self::load_from(&path),
            None => Ok(Config::default()),
        }
    }

    /// The file [`Config::load`] reads, or `None` when it falls back to defaults.
    pub fn resolve_path(path: Option<&Path>) -> Option<PathBuf> {
        match path {
            Some(path) => Some(expand_tilde(path)),
            None => Some(Self::config_path()).filter(|p| p.exists()),
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let mut config: Config = if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::from_str(&content)
                .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?
        } else {
            toml::from_str(&content)
                .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?
        };

        config.expand_paths();
        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/journald2aws/config.toml` (~/.config/journald2aws/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("journald2aws").join("config.toml")
    }

    fn expand_paths(&mut self) {
        for p in [&mut self.pid_file, &mut self.cursor_file, &mut self.logging.file]
            .into_iter()
            .flatten()
        {
            *p = expand_tilde(p);
        }
    }

    /// Fill missing credentials from the process environment.
    pub fn with_env_credentials(self) -> Self {
        self.with_credentials_from(|k| std::env::var(k).ok())
    }

    /// Fill missing credentials using `lookup` for the environment variables.
    pub fn with_credentials_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if self.aws_access_key_id.is_none() {
            self.aws_access_key_id = lookup(ENV_ACCESS_KEY_ID).filter(|s| !s.is_empty());
        }
        if self.aws_secret_access_key.is_none() {
            self.aws_secret_access_key = lookup(ENV_SECRET_ACCESS_KEY)
                .filter(|s| !s.is_empty())
                .map(Secret::new);
        }
        self
    }

    /// Signing credentials, when both halves are present.
    pub fn credentials(&self) -> Option<Credentials> {
        match (&self.aws_access_key_id, &self.aws_secret_access_key) {
            (Some(id), Some(secret)) => Some(Credentials::new(id.as_str(), secret.expose())),
            _ => None,
        }
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.aws_log_stream_name.as_deref().unwrap_or("").is_empty() {
            return Err(Error::Config("aws_log_stream_name is required".to_string()));
        }
        if self.aws_log_group_name.is_empty() {
            return Err(Error::Config("aws_log_group_name must not be empty".to_string()));
        }
        if self.aws_region_name.is_empty() {
            return Err(Error::Config("aws_region_name must not be empty".to_string()));
        }
        if !self.aws_dry_run && self.credentials().is_none() {
            return Err(Error::Config(format!(
                "AWS credentials are required unless aws_dry_run is set (set aws_access_key_id/aws_secret_access_key or {}/{})",
                ENV_ACCESS_KEY_ID, ENV_SECRET_ACCESS_KEY
            )));
        }
        if matches!(&self.journalctl_cmd, Some(cmd) if cmd.is_empty()) {
            return Err(Error::Config("journalctl_cmd must not be empty".to_string()));
        }
        if self.journalctl_read_size == 0 {
            return Err(Error::Config("journalctl_read_size must be positive".to_string()));
        }
        if self.queue_size == 0 {
            return Err(Error::Config("queue_size must be positive".to_string()));
        }
        if self.aws_request_timeout_secs == 0 {
            return Err(Error::Config("aws_request_timeout_secs must be positive".to_string()));
        }

        // Every worker must be able to beat within the limit.
        let heartbeat_age_limit = self.heartbeat_age_limit()?;
        if self.request_timeout() >= heartbeat_age_limit {
            return Err(Error::Config(format!(
                "aws_request_timeout_secs ({}) must be below heartbeat_age_limit ({})",
                self.aws_request_timeout_secs, self.heartbeat_age_limit
            )));
        }
        if DEFAULT_RECV_TIMEOUT >= heartbeat_age_limit {
            return Err(Error::Config(format!(
                "heartbeat_age_limit ({}) must exceed the poster's {:?} queue wait",
                self.heartbeat_age_limit, DEFAULT_RECV_TIMEOUT
            )));
        }

        self.journalctl_sleep()?;
        self.join_timeout()?;
        self.runtime_limit()?;
        Ok(())
    }

    pub fn heartbeat_age_limit(&self) -> Result<Duration> {
        secs("heartbeat_age_limit", self.heartbeat_age_limit)
    }

    pub fn journalctl_sleep(&self) -> Result<Duration> {
        secs("journalctl_sleep_secs", self.journalctl_sleep_secs)
    }

    pub fn join_timeout(&self) -> Result<Duration> {
        secs("join_timeout_secs", self.join_timeout_secs)
    }

    pub fn runtime_limit(&self) -> Result<Option<Duration>> {
        self.runtime_limit
            .map(|v| secs("runtime_limit", v))
            .transpose()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.aws_request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn valid() -> Config {
        Config {
            aws_log_stream_name: Some("host-1".to_string()),
            aws_dry_run: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.aws_log_group_name, "omlish");
        assert_eq!(config.aws_region_name, "us-west-1");
        assert_eq!(config.heartbeat_age_limit, 60.);
        assert_eq!(config.queue_size, 64);
        assert_eq!(config.journalctl_read_size, 16384);
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_toml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
pid_file = "/run/j2a.pid"
cursor_file = "/var/lib/j2a/cursor"
runtime_limit = 3600
aws_log_stream_name = "host-1"
aws_region_name = "eu-west-1"
journalctl_cmd = ["journalctl", "-u", "nginx"]

[logging]
level = "debug"
"#,
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.pid_file, Some(PathBuf::from("/run/j2a.pid")));
        assert_eq!(config.runtime_limit().unwrap(), Some(Duration::from_secs(3600)));
        assert_eq!(config.aws_log_stream_name.as_deref(), Some("host-1"));
        assert_eq!(config.aws_region_name, "eu-west-1");
        assert_eq!(config.journalctl_cmd.as_ref().unwrap().len(), 3);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.aws_log_group_name, "omlish");
    }

    #[test]
    fn test_parse_json_by_extension() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"aws_log_stream_name": "host-2", "aws_dry_run": true, "journalctl_since": "today"}"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.aws_log_stream_name.as_deref(), Some("host-2"));
        assert_eq!(config.journalctl_since.as_deref(), Some("today"));
        config.validate().unwrap();
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let dir = TempDir::new().unwrap();
        let err = Config::load(Some(&dir.path().join("nope.toml"))).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_tilde_expansion() {
        let expanded = expand_tilde(Path::new("~/cursor"));
        assert!(!expanded.starts_with("~"));
        assert!(expanded.ends_with("cursor"));
        assert_eq!(expand_tilde(Path::new("/abs/x")), PathBuf::from("/abs/x"));
    }

    #[test]
    fn test_env_credentials_fill_missing_only() {
        let env = |k: &str| match k {
            ENV_ACCESS_KEY_ID => Some("ENVKEY".to_string()),
            ENV_SECRET_ACCESS_KEY => Some("envsecret".to_string()),
            _ => None,
        };

        let config = Config::default().with_credentials_from(env);
        let creds = config.credentials().unwrap();
        assert_eq!(creds.access_key_id, "ENVKEY");
        assert_eq!(creds.secret_access_key, "envsecret");

        let config = Config {
            aws_access_key_id: Some("FILEKEY".to_string()),
            ..Default::default()
        }
        .with_credentials_from(env);
        assert_eq!(config.credentials().unwrap().access_key_id, "FILEKEY");
    }

    #[test]
    fn test_credentials_required_unless_dry_run() {
        let mut config = valid();
        config.validate().unwrap();

        config.aws_dry_run = false;
        assert!(config.validate().is_err());

        config.aws_access_key_id = Some("AKID".to_string());
        config.aws_secret_access_key = Some(Secret::new("secret"));
        config.validate().unwrap();
    }

    #[test]
    fn test_rejects_bad_values() {
        let mut config = valid();
        config.heartbeat_age_limit = -1.;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.queue_size = 0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.journalctl_cmd = Some(vec![]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_timeouts_must_fit_heartbeat_limit() {
        let mut config = valid();
        config.heartbeat_age_limit = 2.;
        assert!(config.validate().is_err(), "30s request timeout exceeds 2s limit");

        config.aws_request_timeout_secs = 2;
        assert!(config.validate().is_err());

        config.aws_request_timeout_secs = 1;
        config.validate().unwrap();

        config.heartbeat_age_limit = 1.;
        config.aws_request_timeout_secs = 1;
        assert!(config.validate().is_err());

        // The tailer beats while it sleeps, so a long sleep is fine.
        let mut config = valid();
        config.heartbeat_age_limit = 2.;
        config.aws_request_timeout_secs = 1;
        config.journalctl_sleep_secs = 5.;
        config.validate().unwrap();
    }

    #[test]
    fn test_resolve_path() {
        let dir = TempDir::new().unwrap();
        let explicit = dir.path().join("missing.toml");
        assert_eq!(Config::resolve_path(Some(&explicit)), Some(explicit.clone()));

        let resolved = Config::resolve_path(Some(Path::new("~/j2a.toml"))).unwrap();
        assert!(!resolved.starts_with("~"));
        assert!(resolved.ends_with("j2a.toml"));
    }

    #[test]
    fn test_secret_not_in_debug() {
        let config = Config {
            aws_secret_access_key: Some(Secret::new("hunter2")),
            ..Default::default()
        };
        assert!(!format!("{:?}", config).contains("hunter2"));
    }
}
