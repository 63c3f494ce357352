//! Configuration management for filegate
//!
//! Handles loading configuration from ~/.config/filegate/config.toml, plus the
//! environment overrides read once at startup.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::files::BaseRoot;
use crate::server::gate::{IpAllowList, Ipv4Range, TrustedProxies};

/// Configuration file name
const CONFIG_FILE: &str = "config.toml";

/// Application name for config directory
const APP_NAME: &str = "filegate";

/// Environment variable overriding the base root
pub const ENV_FILE_DIRECTORY: &str = "FILE_DIRECTORY";

/// Environment variable overriding the public base URL
pub const ENV_PUBLIC_BASE_URL: &str = "PUBLIC_BASE_URL";

/// Link registry file name inside the data directory
pub const LINKS_FILE: &str = "public-links.json";

/// Suspicious request log file name inside the data directory
pub const SUSPICIOUS_LOG_FILE: &str = "suspicious-ips.list";

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("base_root is not set (use --root, FILE_DIRECTORY or the config file)")]
    MissingBaseRoot,

    #[error("Invalid base root: {0}")]
    InvalidBaseRoot(String),
}

/// Result type for config operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Inclusive IPv4 range admitted to private routes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct IpRangeConfig {
    pub start: Ipv4Addr,
    pub end: Ipv4Addr,
}

impl Default for IpRangeConfig {
    fn default() -> Self {
        Self {
            start: Ipv4Addr::new(192, 168, 2, 1),
            end: Ipv4Addr::new(192, 168, 2, 255),
        }
    }
}

/// Path prefixes reachable without passing the IP check
pub fn default_public_prefixes() -> Vec<String> {
    ["/media-gallery/", "/download/", "/thumbnails/", "/static/", "/api/"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Directory every file operation is confined to
    pub base_root: Option<PathBuf>,

    /// Public URL prefix used when building share links
    pub public_base_url: Option<String>,

    /// Directory holding the link registry, ledgers and suspicious log
    pub data_dir: PathBuf,

    /// Port for the web server
    pub port: u16,

    /// Address to bind
    pub bind: IpAddr,

    /// IPs admitted to private routes
    pub whitelist: Vec<IpAddr>,

    /// Range admitted to private routes
    pub ip_range: Option<IpRangeConfig>,

    /// Peers whose X-Real-IP / X-Forwarded-For headers are believed
    pub trusted_proxies: Vec<IpAddr>,

    /// Path prefixes exempt from the IP check
    pub public_prefixes: Vec<String>,

    /// Where suspicious requests are appended (default: data_dir/suspicious-ips.list)
    pub suspicious_log: Option<PathBuf>,

    /// Seconds between suspicious log flushes
    pub flush_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_root: None,
            public_base_url: None,
            data_dir: PathBuf::from("."),
            port: 3000,
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            whitelist: Vec::new(),
            ip_range: Some(IpRangeConfig::default()),
            trusted_proxies: vec![
                IpAddr::V4(Ipv4Addr::LOCALHOST),
                IpAddr::V6(Ipv6Addr::LOCALHOST),
            ],
            public_prefixes: default_public_prefixes(),
            suspicious_log: None,
            flush_interval_secs: 300,
        }
    }
}

impl Config {
    /// Create a configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the config file path
    ///
    /// Returns ~/.config/filegate/config.toml on Linux
    pub fn config_path() -> ConfigResult<PathBuf> {
        Ok(Self::config_dir()?.join(CONFIG_FILE))
    }

    /// Get the config directory path
    pub fn config_dir() -> ConfigResult<PathBuf> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(config_dir.join(APP_NAME))
    }

    /// Load configuration from the default location
    ///
    /// Returns default config if file doesn't exist
    pub fn load() -> ConfigResult<Self> {
        let path = Self::config_path()?;
        Self::load_from(&path)
    }

    /// Load configuration from a specific file, defaulting when it is absent
    pub fn load_from(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Apply `FILE_DIRECTORY` / `PUBLIC_BASE_URL` from the process environment
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary lookup (empty values are ignored)
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(ENV_FILE_DIRECTORY).filter(|v| !v.is_empty()) {
            self.base_root = Some(PathBuf::from(dir));
        }
        if let Some(url) = lookup(ENV_PUBLIC_BASE_URL).filter(|v| !v.is_empty()) {
            self.public_base_url = Some(url);
        }
    }

    /// The base root, made absolute against the working directory if needed
    pub fn base_root(&self) -> ConfigResult<BaseRoot> {
        let root = self.base_root.as_ref().ok_or(ConfigError::MissingBaseRoot)?;
        let root = if root.is_absolute() {
            root.clone()
        } else {
            std::env::current_dir()?.join(root)
        };
        BaseRoot::new(&root).map_err(|e| ConfigError::InvalidBaseRoot(e.to_string()))
    }

    /// Public base URL for share links, falling back to the local address
    pub fn effective_public_base_url(&self) -> String {
        match &self.public_base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("http://localhost:{}", self.port),
        }
    }

    /// Path of the link registry file
    pub fn links_file(&self) -> PathBuf {
        self.data_dir.join(LINKS_FILE)
    }

    /// Path of the suspicious request log
    pub fn suspicious_log_path(&self) -> PathBuf {
        self.suspicious_log
            .clone()
            .unwrap_or_else(|| self.data_dir.join(SUSPICIOUS_LOG_FILE))
    }

    /// Interval between suspicious log flushes (at least one second)
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs.max(1))
    }

    /// The IP allow list built from `whitelist` and `ip_range`
    pub fn allow_list(&self) -> IpAllowList {
        IpAllowList::new(
            self.whitelist.iter().copied(),
            self.ip_range.map(|r| Ipv4Range::new(r.start, r.end)),
        )
    }

    /// Proxies allowed to name the caller through forwarding headers
    pub fn trusted_proxies(&self) -> TrustedProxies {
        TrustedProxies::new(self.trusted_proxies.iter().copied())
    }
}

/// Format the configuration for display
pub fn format_config(config: &Config) -> String {
    let mut lines = Vec::new();

    lines.push("Current configuration:".to_string());
    lines.push(String::new());

    match &config.base_root {
        Some(root) => lines.push(format!("  base_root = \"{}\"", root.display())),
        None => lines.push("  base_root = (not set)".to_string()),
    }
    lines.push(format!(
        "  public_base_url = \"{}\"",
        config.effective_public_base_url()
    ));
    lines.push(format!("  data_dir = \"{}\"", config.data_dir.display()));
    lines.push(format!("  bind = {}:{}", config.bind, config.port));

    if config.whitelist.is_empty() {
        lines.push("  whitelist = (empty)".to_string());
    } else {
        lines.push("  whitelist =".to_string());
        for ip in &config.whitelist {
            lines.push(format!("    - {}", ip));
        }
    }

    match config.ip_range {
        Some(range) => lines.push(format!("  ip_range = {} to {}", range.start, range.end)),
        None => lines.push("  ip_range = (none)".to_string()),
    }

    if config.trusted_proxies.is_empty() {
        lines.push("  trusted_proxies = (none, proxy headers ignored)".to_string());
    } else {
        let proxies: Vec<String> = config.trusted_proxies.iter().map(|ip| ip.to_string()).collect();
        lines.push(format!("  trusted_proxies = {}", proxies.join(", ")));
    }

    lines.push("  public_prefixes =".to_string());
    for prefix in &config.public_prefixes {
        lines.push(format!("    - {}", prefix));
    }

    lines.push(format!(
        "  suspicious_log = \"{}\" (flushed every {}s)",
        config.suspicious_log_path().display(),
        config.flush_interval().as_secs()
    ));

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.base_root.is_none());
        assert!(config.public_base_url.is_none());
        assert_eq!(config.port, 3000);
        assert_eq!(config.flush_interval(), Duration::from_secs(300));
        assert_eq!(config.ip_range, Some(IpRangeConfig::default()));
        assert!(config.public_prefixes.contains(&"/api/".to_string()));
    }

    #[test]
    fn test_config_deserialize_partial() {
        let toml_str = r#"
            base_root = "/srv/media"
            whitelist = ["86.92.129.223", "10.1.1.1"]
            port = 8080
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.base_root, Some(PathBuf::from("/srv/media")));
        assert_eq!(config.whitelist.len(), 2);
        assert_eq!(config.port, 8080);
        assert_eq!(config.public_prefixes, default_public_prefixes());
    }

    #[test]
    fn test_config_deserialize_empty() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_config_deserialize_ip_range() {
        let toml_str = r#"
            [ip_range]
            start = "10.0.0.1"
            end = "10.0.0.50"
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        let range = config.ip_range.unwrap();
        assert_eq!(range.start, Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(range.end, Ipv4Addr::new(10, 0, 0, 50));
    }

    #[test]
    fn test_config_rejects_bad_ip() {
        let result: Result<Config, _> = toml::from_str(r#"whitelist = ["not-an-ip"]"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_config_serialize_roundtrip() {
        let mut config = Config::new();
        config.base_root = Some(PathBuf::from("/srv/media"));
        config.whitelist = vec!["1.2.3.4".parse().unwrap()];

        let toml_str = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_FILE_DIRECTORY, "/data/files"),
            (ENV_PUBLIC_BASE_URL, "https://files.example.com/"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::new();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.base_root, Some(PathBuf::from("/data/files")));
        assert_eq!(
            config.effective_public_base_url(),
            "https://files.example.com"
        );
    }

    #[test]
    fn test_empty_env_values_ignored() {
        let mut config = Config::new();
        config.base_root = Some(PathBuf::from("/keep"));
        config.apply_overrides(|_| Some(String::new()));
        assert_eq!(config.base_root, Some(PathBuf::from("/keep")));
    }

    #[test]
    fn test_base_root_missing() {
        let config = Config::new();
        assert!(matches!(config.base_root(), Err(ConfigError::MissingBaseRoot)));
    }

    #[test]
    fn test_base_root_relative_made_absolute() {
        let mut config = Config::new();
        config.base_root = Some(PathBuf::from("media"));
        let root = config.base_root().unwrap();
        assert!(root.path().is_absolute());
        assert!(root.path().ends_with("media"));
    }

    #[test]
    fn test_default_public_base_url_uses_port() {
        let mut config = Config::new();
        config.port = 4000;
        assert_eq!(config.effective_public_base_url(), "http://localhost:4000");
    }

    #[test]
    fn test_data_paths() {
        let mut config = Config::new();
        config.data_dir = PathBuf::from("/var/lib/filegate");
        assert_eq!(
            config.links_file(),
            PathBuf::from("/var/lib/filegate/public-links.json")
        );
        assert_eq!(
            config.suspicious_log_path(),
            PathBuf::from("/var/lib/filegate/suspicious-ips.list")
        );

        config.suspicious_log = Some(PathBuf::from("/var/log/probes.list"));
        assert_eq!(
            config.suspicious_log_path(),
            PathBuf::from("/var/log/probes.list")
        );
    }

    #[test]
    fn test_allow_list_from_config() {
        let mut config = Config::new();
        config.whitelist = vec!["8.8.8.8".parse().unwrap()];
        let allow = config.allow_list();
        assert!(allow.is_allowed("8.8.8.8".parse().unwrap()));
        assert!(allow.is_allowed("192.168.2.20".parse().unwrap()));
        assert!(!allow.is_allowed("192.168.1.20".parse().unwrap()));
    }

    #[test]
    fn test_trusted_proxies_from_config() {
        let config = Config::new();
        assert!(config.trusted_proxies().contains(IpAddr::V4(Ipv4Addr::LOCALHOST)));

        let config: Config = toml::from_str(r#"trusted_proxies = ["10.0.0.2"]"#).unwrap();
        let trusted = config.trusted_proxies();
        assert!(trusted.contains("10.0.0.2".parse().unwrap()));
        assert!(!trusted.contains(IpAddr::V4(Ipv4Addr::LOCALHOST)));
    }

    #[test]
    fn test_format_config() {
        let mut config = Config::new();
        config.base_root = Some(PathBuf::from("/srv/media"));
        let output = format_config(&config);

        assert!(output.contains("base_root = \"/srv/media\""));
        assert!(output.contains("whitelist = (empty)"));
        assert!(output.contains("ip_range = 192.168.2.1 to 192.168.2.255"));
        assert!(output.contains("trusted_proxies = 127.0.0.1, ::1"));
        assert!(output.contains("/download/"));
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        fs::write(&config_path, "port = 9000\nflush_interval_secs = 60\n").unwrap();

        let loaded = Config::load_from(&config_path).unwrap();
        assert_eq!(loaded.port, 9000);
        assert_eq!(loaded.flush_interval(), Duration::from_secs(60));
    }

    #[test]
    fn test_load_from_missing_file_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let loaded = Config::load_from(&temp_dir.path().join("nope.toml")).unwrap();
        assert_eq!(loaded, Config::default());
    }

    #[test]
    fn test_config_path() {
        if let Ok(path) = Config::config_path() {
            assert!(path.to_string_lossy().contains("filegate"));
            assert!(path.to_string_lossy().contains("config.toml"));
        }
    }
}
