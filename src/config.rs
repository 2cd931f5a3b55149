use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Base URL of the application whose requests are intercepted; `--origin` may supply it
  #[serde(default)]
  pub origin: String,
  #[serde(default)]
  pub cache: CacheConfig,
  /// Paths fetched into the cache at install, bump `cache.name` when this changes
  #[serde(default = "default_manifest")]
  pub manifest: Vec<String>,
  /// Activate a new generation without waiting for existing clients to detach
  #[serde(default = "default_true")]
  pub skip_waiting: bool,
  /// Route served from cache when a document request fails
  #[serde(default = "default_root_path")]
  pub root_path: String,
  /// Image served from cache when an image request fails
  #[serde(default = "default_icon")]
  pub placeholder_icon: String,
  #[serde(default)]
  pub notifications: NotificationSettings,
  #[serde(default)]
  pub poll: PollConfig,
  #[serde(default = "default_subscribe_path")]
  pub subscribe_path: String,
  #[serde(default = "default_request_timeout_ms")]
  pub request_timeout_ms: u64,
  /// Directory for rolling log files (stderr only when unset)
  pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Generation tag; exactly one generation is current
  pub name: String,
  pub max_items: usize,
  /// SQLite file (defaults to $XDG_DATA_HOME/offline-agent/cache.db)
  pub path: Option<PathBuf>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      name: "app-cache-v2".to_string(),
      max_items: 50,
      path: None,
    }
  }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NotificationSettings {
  pub default_title: String,
  pub default_body: String,
  pub icon: String,
  pub badge: String,
  pub tag: String,
}

impl Default for NotificationSettings {
  fn default() -> Self {
    Self {
      default_title: "app".to_string(),
      default_body: "new event".to_string(),
      icon: default_icon(),
      badge: default_icon(),
      tag: "new-order".to_string(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollConfig {
  pub enabled: bool,
  pub endpoint: String,
  pub interval_ms: u64,
}

impl Default for PollConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      endpoint: "/api/pedidos/activos".to_string(),
      interval_ms: 10_000,
    }
  }
}

fn default_manifest() -> Vec<String> {
  ["/", "/style.css", "/icon-192.png", "/icon-512.png"]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_true() -> bool {
  true
}

fn default_root_path() -> String {
  "/".to_string()
}

fn default_icon() -> String {
  "/icon-192.png".to_string()
}

fn default_subscribe_path() -> String {
  "/subscribe".to_string()
}

fn default_request_timeout_ms() -> u64 {
  10_000
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./offline-agent.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/offline-agent/config.yaml
  ///
  /// With no file at all, `origin` alone is enough to run with defaults.
  pub fn load(explicit_path: Option<&Path>, origin: Option<&str>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let mut config = match (path, origin) {
      (Some(p), _) => Self::load_from_path(&p)?,
      (None, Some(origin)) => Self::for_origin(origin),
      (None, None) => {
        return Err(eyre!(
          "No configuration file found. Create one at ~/.config/offline-agent/config.yaml\n\
                 or pass --origin."
        ))
      }
    };

    if let Some(origin) = origin {
      config.origin = origin.to_string();
    }
    config.validate()?;

    Ok(config)
  }

  /// Default configuration for the application at `origin`.
  pub fn for_origin(origin: &str) -> Self {
    Self {
      origin: origin.to_string(),
      cache: CacheConfig::default(),
      manifest: default_manifest(),
      skip_waiting: true,
      root_path: default_root_path(),
      placeholder_icon: default_icon(),
      notifications: NotificationSettings::default(),
      poll: PollConfig::default(),
      subscribe_path: default_subscribe_path(),
      request_timeout_ms: default_request_timeout_ms(),
      log_dir: None,
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("offline-agent.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("offline-agent").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;
    config.validate()?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    if self.origin.trim().is_empty() {
      return Err(eyre!("origin is required: set it in the config file or pass --origin"));
    }
    self.origin_url()?;
    if self.cache.name.trim().is_empty() {
      return Err(eyre!("cache.name must not be empty"));
    }
    if self.cache.max_items == 0 {
      return Err(eyre!("cache.max_items must be at least 1"));
    }
    if self.poll.interval_ms == 0 {
      return Err(eyre!("poll.interval_ms must be at least 1"));
    }
    for path in &self.manifest {
      self.resolve(path)?;
    }
    Ok(())
  }

  pub fn origin_url(&self) -> Result<Url> {
    Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin '{}': {}", self.origin, e))
  }

  /// Resolve a root-relative path against the origin.
  pub fn resolve(&self, path: &str) -> Result<Url> {
    self
      .origin_url()?
      .join(path)
      .map_err(|e| eyre!("Invalid path '{}': {}", path, e))
  }

  pub fn manifest_urls(&self) -> Result<Vec<Url>> {
    self.manifest.iter().map(|p| self.resolve(p)).collect()
  }

  pub fn poll_interval(&self) -> Duration {
    Duration::from_millis(self.poll.interval_ms)
  }

  pub fn request_timeout(&self) -> Duration {
    Duration::from_millis(self.request_timeout_ms)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_minimal_config_uses_defaults() {
    let config = Config::from_yaml("origin: http://localhost:5000\n").unwrap();
    assert_eq!(config.cache.name, "app-cache-v2");
    assert_eq!(config.cache.max_items, 50);
    assert_eq!(config.manifest.len(), 4);
    assert!(config.skip_waiting);
    assert_eq!(config.poll_interval(), Duration::from_secs(10));
    assert_eq!(config.poll.endpoint, "/api/pedidos/activos");
    assert_eq!(config.notifications.tag, "new-order");
    assert_eq!(config.subscribe_path, "/subscribe");
  }

  #[test]
  fn test_partial_sections_keep_remaining_defaults() {
    let config = Config::from_yaml(
      "origin: http://localhost:5000\n\
       cache:\n  name: resto-cache-v3\n\
       notifications:\n  default_title: Restaurante\n",
    )
    .unwrap();
    assert_eq!(config.cache.name, "resto-cache-v3");
    assert_eq!(config.cache.max_items, 50);
    assert_eq!(config.notifications.default_title, "Restaurante");
    assert_eq!(config.notifications.default_body, "new event");
  }

  #[test]
  fn test_manifest_resolves_against_origin() {
    let config = Config::from_yaml(
      "origin: http://localhost:5000/\nmanifest: [\"/\", \"/static/style.css\"]\n",
    )
    .unwrap();
    let urls: Vec<String> = config
      .manifest_urls()
      .unwrap()
      .iter()
      .map(|u| u.to_string())
      .collect();
    assert_eq!(
      urls,
      vec!["http://localhost:5000/", "http://localhost:5000/static/style.css"]
    );
  }

  #[test]
  fn test_invalid_values_are_rejected() {
    assert!(Config::from_yaml("origin: not a url\n").is_err());
    assert!(Config::from_yaml("origin: http://localhost\ncache:\n  max_items: 0\n").is_err());
    assert!(Config::from_yaml("cache:\n  name: x\n").is_err());
  }

  #[test]
  fn test_load_explicit_path_with_origin_override() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("agent.yaml");
    std::fs::write(&path, "origin: http://localhost:5000\n").unwrap();

    let config = Config::load(Some(&path), Some("http://127.0.0.1:8080")).unwrap();
    assert_eq!(config.origin, "http://127.0.0.1:8080");

    let missing = dir.path().join("missing.yaml");
    assert!(Config::load(Some(&missing), None).is_err());
  }

  #[test]
  fn test_origin_can_come_from_command_line_only() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("agent.yaml");
    std::fs::write(&path, "cache:\n  name: resto-cache-v3\n").unwrap();

    let config = Config::load(Some(&path), Some("http://127.0.0.1:8080")).unwrap();
    assert_eq!(config.origin, "http://127.0.0.1:8080");
    assert_eq!(config.cache.name, "resto-cache-v3");

    let err = Config::load(Some(&path), None).unwrap_err();
    assert!(err.to_string().contains("origin is required"));
  }

  #[test]
  fn test_missing_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing.yaml");
    assert!(Config::load(Some(&missing), None).is_err());
  }
}
