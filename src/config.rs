use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Agent configuration.
///
/// Every field has a default, so the agent runs without a config file; a
/// deployment overrides what it needs (most commonly `backend_url` and the
/// partition versions).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
  /// Origin the agent fronts; relative request URLs resolve against it
  pub backend_url: String,

  /// Logical partition base names; full names carry the version suffix
  pub static_partition: String,
  pub api_partition: String,

  /// Bumping a version is the sole mechanism to evict that partition's data
  pub static_version: String,
  pub api_version: String,

  /// Absolute paths fetched verbatim into the static partition at install
  pub install_manifest: Vec<String>,

  /// Path prefixes classified as API data; must track the backend URL scheme
  pub api_prefixes: Vec<String>,

  /// Cached document served when an offline navigation has no fresher answer
  pub root_document: String,

  /// Named sync triggers and the endpoint prefixes they drain
  pub sync_routes: Vec<SyncRoute>,

  /// Trigger for failed mutations matching no configured route
  pub default_trigger: String,

  /// When set, a mutation failing this many replays is evicted from the
  /// queue. Unset means indefinite retry.
  pub max_replay_attempts: Option<u32>,

  /// Seconds between connectivity probes driving the sync loop
  pub sync_interval_secs: u64,

  /// Override for the store location (default: XDG data dir)
  pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncRoute {
  pub trigger: String,
  pub prefix: String,
}

impl Default for AgentConfig {
  fn default() -> Self {
    Self {
      backend_url: "http://localhost:8000".to_string(),
      static_partition: "static".to_string(),
      api_partition: "api".to_string(),
      static_version: "1.2.0".to_string(),
      api_version: "1.0.0".to_string(),
      install_manifest: vec![
        "/".to_string(),
        "/index.html".to_string(),
        "/app.js".to_string(),
        "/styles.css".to_string(),
        "/icons/icon-192.png".to_string(),
        "/icons/icon-512.png".to_string(),
        "/img/sample-plate.jpg".to_string(),
      ],
      api_prefixes: vec![
        "/api/user-profile".to_string(),
        "/api/meal-plan".to_string(),
        "/api/consumption".to_string(),
        "/api/chat".to_string(),
        "/api/admin".to_string(),
        "/api/recipe".to_string(),
        "/api/shopping-list".to_string(),
      ],
      root_document: "/".to_string(),
      sync_routes: vec![
        SyncRoute {
          trigger: "sync-consumption-logs".to_string(),
          prefix: "/api/consumption".to_string(),
        },
        SyncRoute {
          trigger: "sync-meal-plans".to_string(),
          prefix: "/api/meal-plan".to_string(),
        },
      ],
      default_trigger: "sync-pending".to_string(),
      max_replay_attempts: None,
      sync_interval_secs: 30,
      data_dir: None,
    }
  }
}

impl AgentConfig {
  /// Load configuration.
  ///
  /// Search order:
  /// 1. Explicit path if provided (an error if missing)
  /// 2. ./platesync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/platesync/config.yaml
  /// 4. Built-in defaults
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
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("platesync.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("platesync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: AgentConfig = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  /// Path of the store database.
  pub fn store_path(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.data_dir {
      return Ok(dir.join("agent.db"));
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("platesync").join("agent.db"))
  }

  /// Full name of the live static partition, e.g. "static-v1.2.0".
  pub fn static_partition_name(&self) -> String {
    format!("{}-v{}", self.static_partition, self.static_version)
  }

  /// Full name of the live API partition, e.g. "api-v1.0.0".
  pub fn api_partition_name(&self) -> String {
    format!("{}-v{}", self.api_partition, self.api_version)
  }

  /// The two partitions expected by the current versions; anything else is
  /// garbage-collected at activation.
  pub fn expected_partitions(&self) -> [String; 2] {
    [self.static_partition_name(), self.api_partition_name()]
  }

  /// Sync trigger for a failed mutation against the given path.
  pub fn trigger_for(&self, path: &str) -> &str {
    self
      .sync_routes
      .iter()
      .find(|route| path.starts_with(&route.prefix))
      .map(|route| route.trigger.as_str())
      .unwrap_or(&self.default_trigger)
  }

  /// All trigger names the host may dispatch, default trigger included.
  pub fn trigger_names(&self) -> Vec<&str> {
    let mut names: Vec<&str> = self.sync_routes.iter().map(|r| r.trigger.as_str()).collect();
    names.push(&self.default_trigger);
    names
  }
}
