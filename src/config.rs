use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub upstream: UpstreamConfig,
  /// Address the proxy listens on
  #[serde(default = "default_listen")]
  pub listen: String,
  /// Overrides the platform data directory for the local store
  pub data_dir: Option<PathBuf>,
  /// Shell paths seeded into the asset cache at install, resolved against
  /// the site origin
  #[serde(default = "default_precache")]
  pub precache: Vec<String>,
  /// Map-tile hosts excluded from caching and mirroring
  #[serde(default = "default_excluded_hosts")]
  pub excluded_hosts: Vec<String>,
  /// Path of the restaurant detail page, cached under its canonical form
  #[serde(default = "default_shell_path")]
  pub shell_path: String,
  /// How often the background-sync trigger checks the offline queues
  #[serde(default = "default_sync_interval")]
  pub sync_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
  /// The reviews REST API
  #[serde(default = "default_api_url")]
  pub api_url: Url,
  /// The origin serving the page and its static assets
  #[serde(default = "default_site_url")]
  pub site_url: Url,
}

impl Default for UpstreamConfig {
  fn default() -> Self {
    Self {
      api_url: default_api_url(),
      site_url: default_site_url(),
    }
  }
}

impl Default for Config {
  fn default() -> Self {
    Self {
      upstream: UpstreamConfig::default(),
      listen: default_listen(),
      data_dir: None,
      precache: default_precache(),
      excluded_hosts: default_excluded_hosts(),
      shell_path: default_shell_path(),
      sync_interval_secs: default_sync_interval(),
    }
  }
}

fn default_api_url() -> Url {
  Url::parse("http://localhost:1337").expect("static URL")
}

fn default_site_url() -> Url {
  Url::parse("http://localhost:8000").expect("static URL")
}

fn default_listen() -> String {
  "127.0.0.1:8880".to_string()
}

fn default_precache() -> Vec<String> {
  [
    "/",
    "/restaurant.html",
    "/css/styles.css",
    "/js/main.js",
    "/js/restaurant_info.js",
    "/img/icons/icons-192.png",
    "/img/icons/icons-512.png",
    "/manifest.json",
  ]
  .into_iter()
  .map(String::from)
  .collect()
}

fn default_excluded_hosts() -> Vec<String> {
  vec!["api.tiles.mapbox.com".to_string()]
}

fn default_shell_path() -> String {
  "/restaurant.html".to_string()
}

fn default_sync_interval() -> u64 {
  30
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./larder.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/larder/config.yaml
  ///
  /// With no file anywhere, the defaults target a local dev setup
  /// (API on :1337, site on :8000).
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
    // Check current directory
    let local = PathBuf::from("larder.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("larder").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  /// Where the local store lives.
  pub fn db_path(&self) -> Result<PathBuf> {
    let data_dir = match &self.data_dir {
      Some(dir) => dir.clone(),
      None => dirs::data_dir()
        .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
        .ok_or_else(|| eyre!("Could not determine data directory"))?
        .join("larder"),
    };

    Ok(data_dir.join("cache.db"))
  }

  /// The precache list resolved against the site origin.
  pub fn precache_urls(&self) -> Result<Vec<Url>> {
    self
      .precache
      .iter()
      .map(|path| {
        self
          .upstream
          .site_url
          .join(path)
          .map_err(|e| eyre!("Invalid precache path {}: {}", path, e))
      })
      .collect()
  }
}
