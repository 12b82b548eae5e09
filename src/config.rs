use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8080/api/focaccias";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub logging: LoggingConfig,
  #[serde(default)]
  pub status: StatusConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
  /// Catalog endpoint, e.g. "https://example.com/api/focaccias"
  pub base_url: String,
  /// Foreground requests slower than this fall back to cached data
  pub timeout_secs: u64,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      base_url: DEFAULT_BASE_URL.to_string(),
      timeout_secs: 10,
    }
  }
}

impl ApiConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// When false, nothing is persisted and only the in-memory tier is used
  pub enabled: bool,
  pub ttl_minutes: i64,
  /// Database location (defaults to $XDG_DATA_HOME/crosti/cache.db)
  pub path: Option<PathBuf>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      ttl_minutes: 15,
      path: None,
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
  /// Write logs to this file instead of stderr
  pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
  /// How long the status banner stays up after a change
  pub banner_secs: u64,
}

impl Default for StatusConfig {
  fn default() -> Self {
    Self { banner_secs: 5 }
  }
}

impl StatusConfig {
  pub fn banner_duration(&self) -> Duration {
    Duration::from_secs(self.banner_secs)
  }
}

impl Config {
  /// Load configuration from file, then apply environment overrides.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./crosti.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/crosti/config.yaml
  ///
  /// Without a file the defaults are used.
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

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Config::default(),
    };

    Ok(config.with_env_overrides(|name| std::env::var(name).ok()))
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("crosti.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("crosti").join("config.yaml");
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
    // An empty file parses as YAML null
    if contents.trim().is_empty() {
      return Ok(Config::default());
    }
    let config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;
    Ok(config)
  }

  /// Apply CROSTI_BASE_URL, looked up through `lookup`.
  fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
    if let Some(url) = lookup("CROSTI_BASE_URL").filter(|u| !u.trim().is_empty()) {
      self.api.base_url = url;
    }
    self
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  #[test]
  fn test_defaults() {
    let config = Config::parse("").unwrap();
    assert_eq!(config.api.base_url, DEFAULT_BASE_URL);
    assert_eq!(config.api.timeout(), Duration::from_secs(10));
    assert!(config.cache.enabled);
    assert_eq!(config.cache.ttl_minutes, 15);
    assert_eq!(config.status.banner_duration(), Duration::from_secs(5));
  }

  #[test]
  fn test_partial_file_keeps_other_defaults() {
    let config = Config::parse(
      "api:\n  base_url: https://crosti.example/api/focaccias\ncache:\n  enabled: false\n",
    )
    .unwrap();
    assert_eq!(config.api.base_url, "https://crosti.example/api/focaccias");
    assert_eq!(config.api.timeout_secs, 10);
    assert!(!config.cache.enabled);
    assert_eq!(config.cache.ttl_minutes, 15);
  }

  #[test]
  fn test_env_override_wins() {
    let config = Config::default().with_env_overrides(|name| {
      (name == "CROSTI_BASE_URL").then(|| "https://env.example/api".to_string())
    });
    assert_eq!(config.api.base_url, "https://env.example/api");

    let config = Config::default().with_env_overrides(|_| Some("  ".to_string()));
    assert_eq!(config.api.base_url, DEFAULT_BASE_URL);
  }

  #[test]
  fn test_load_explicit_path() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "status:\n  banner_secs: 2").unwrap();

    let config = Config::load_from_path(file.path()).unwrap();
    assert_eq!(config.status.banner_secs, 2);
  }

  #[test]
  fn test_missing_explicit_path_is_an_error() {
    let err = Config::load(Some(Path::new("/nonexistent/crosti.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
  }
}
