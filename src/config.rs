use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Longest accepted sync interval, one year.
const MAX_INTERVAL_SECS: u64 = 365 * 24 * 60 * 60;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub sync: SyncConfig,
  #[serde(default)]
  pub storage: StorageConfig,
  #[serde(default)]
  pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Base URL of the remote service (e.g., "https://api.example.com/v1")
  pub url: String,
  /// Per-request timeout; a request exceeding it counts as a connectivity failure
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
  /// Endpoint probed to decide whether the service is reachable
  #[serde(default = "default_health_endpoint")]
  pub health_endpoint: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
  #[serde(default = "default_interval_secs")]
  pub interval_secs: u64,
  /// How often the status line is refreshed in `run` mode
  #[serde(default = "default_status_poll_secs")]
  pub status_poll_secs: u64,
  #[serde(default = "default_probe_interval_secs")]
  pub probe_interval_secs: u64,
  /// Attempts allowed for a queued request failing with a server error
  #[serde(default = "default_max_attempts")]
  pub max_attempts: u32,
  /// Resources refreshed after every drain. Names ("dashboard", "trips",
  /// "profile") or extra endpoints starting with '/'.
  #[serde(default = "default_resources")]
  pub resources: Vec<String>,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      interval_secs: default_interval_secs(),
      status_poll_secs: default_status_poll_secs(),
      probe_interval_secs: default_probe_interval_secs(),
      max_attempts: default_max_attempts(),
      resources: default_resources(),
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
  /// Database path (default: $XDG_DATA_HOME/roadbook/roadbook.db)
  pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogConfig {
  /// Directory for rolling log files (default: $XDG_DATA_HOME/roadbook/logs)
  pub directory: Option<PathBuf>,
}

fn default_timeout_secs() -> u64 {
  15
}

fn default_health_endpoint() -> String {
  "/health".to_string()
}

fn default_interval_secs() -> u64 {
  5 * 60
}

fn default_status_poll_secs() -> u64 {
  5
}

fn default_probe_interval_secs() -> u64 {
  30
}

fn default_max_attempts() -> u32 {
  5
}

fn default_resources() -> Vec<String> {
  vec![
    "dashboard".to_string(),
    "trips".to_string(),
    "profile".to_string(),
  ]
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./roadbook.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/roadbook/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/roadbook/config.yaml\n\
                 with at least an `api.url` entry."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("roadbook.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("roadbook").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    if config.api.timeout_secs == 0 {
      return Err(eyre!("api.timeout_secs must be greater than zero"));
    }
    if config.sync.interval_secs == 0 {
      return Err(eyre!("sync.interval_secs must be greater than zero"));
    }
    if config.sync.interval_secs > MAX_INTERVAL_SECS {
      return Err(eyre!(
        "sync.interval_secs must be at most {} (one year)",
        MAX_INTERVAL_SECS
      ));
    }
    Ok(config)
  }

  pub fn request_timeout(&self) -> Duration {
    Duration::from_secs(self.api.timeout_secs)
  }

  pub fn sync_interval(&self) -> Duration {
    Duration::from_secs(self.sync.interval_secs)
  }

  pub fn status_poll_interval(&self) -> Duration {
    Duration::from_secs(self.sync.status_poll_secs.max(1))
  }

  pub fn probe_interval(&self) -> Duration {
    Duration::from_secs(self.sync.probe_interval_secs.max(1))
  }

  /// Directory for application data (database, logs).
  pub fn data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("roadbook"))
  }

  /// Get the API token from environment variables.
  ///
  /// Checks ROADBOOK_TOKEN first, then ROADBOOK_API_TOKEN as fallback.
  /// Anonymous use (e.g. registering an account) needs no token.
  pub fn get_api_token() -> Option<String> {
    std::env::var("ROADBOOK_TOKEN")
      .or_else(|_| std::env::var("ROADBOOK_API_TOKEN"))
      .ok()
      .filter(|t| !t.trim().is_empty())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_minimal_config_uses_defaults() {
    let config = Config::parse("api:\n  url: https://api.example.com\n").unwrap();

    assert_eq!(config.request_timeout(), Duration::from_secs(15));
    assert_eq!(config.sync_interval(), Duration::from_secs(300));
    assert_eq!(config.status_poll_interval(), Duration::from_secs(5));
    assert_eq!(config.sync.max_attempts, 5);
    assert_eq!(config.sync.resources, vec!["dashboard", "trips", "profile"]);
    assert_eq!(config.api.health_endpoint, "/health");
    assert!(config.storage.path.is_none());
  }

  #[test]
  fn test_overrides() {
    let yaml = r#"
api:
  url: https://api.example.com
  timeout_secs: 3
sync:
  interval_secs: 60
  resources: [trips, /vehicles]
storage:
  path: /tmp/roadbook-test.db
"#;
    let config = Config::parse(yaml).unwrap();

    assert_eq!(config.request_timeout(), Duration::from_secs(3));
    assert_eq!(config.sync_interval(), Duration::from_secs(60));
    assert_eq!(config.sync.resources, vec!["trips", "/vehicles"]);
    assert_eq!(
      config.storage.path.as_deref(),
      Some(Path::new("/tmp/roadbook-test.db"))
    );
  }

  #[test]
  fn test_zero_timeout_rejected() {
    let yaml = "api:\n  url: https://api.example.com\n  timeout_secs: 0\n";
    assert!(Config::parse(yaml).is_err());
  }

  #[test]
  fn test_interval_bounds() {
    let yaml = |secs: &str| format!("api:\n  url: https://api.example.com\nsync:\n  interval_secs: {}\n", secs);

    assert!(Config::parse(&yaml("0")).is_err());
    assert!(Config::parse(&yaml("18446744073709551615")).is_err());
    assert!(Config::parse(&yaml("31536001")).is_err());

    let config = Config::parse(&yaml("31536000")).unwrap();
    assert_eq!(config.sync_interval(), Duration::from_secs(31_536_000));
  }

  #[test]
  fn test_missing_api_section_rejected() {
    assert!(Config::parse("sync:\n  interval_secs: 10\n").is_err());
  }
}
