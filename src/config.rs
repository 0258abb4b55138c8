//! Settings file consumed by the probing engine

use crate::proxy::cache::DEFAULT_CACHE_FILE;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default settings file name
pub const DEFAULT_CONFIG_FILE: &str = "config.json";

/// Default number of pipelines in flight
pub const DEFAULT_MAX_WORKERS: usize = 50;

/// Default per-request timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 8;

/// Default geo/ISP lookup endpoint, queried as `<endpoint>/<host>`
pub const DEFAULT_GEO_ENDPOINT: &str = "http://ip-api.com/json";

/// Default endpoint fetched through a relay to inspect disclosure headers
pub const DEFAULT_REFLECTOR_URL: &str = "http://httpbin.org/ip";

fn default_test_urls() -> Vec<String> {
    [
        "http://www.google.com",
        "http://www.cloudflare.com",
        "http://www.github.com",
        "https://httpbin.org/ip",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// Engine settings; every key is optional in the file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Maximum pipelines in flight
    pub max_workers: usize,
    /// Per-request timeout in seconds
    pub timeout: u64,
    /// Forwarding probe URLs, tried in order
    pub test_urls: Vec<String>,
    /// Try the https:// test URLs when every http:// one failed
    pub test_https: bool,
    /// Only read by the notification front end
    pub enable_sound: bool,
    pub cache_file: PathBuf,
    pub geo_endpoint: String,
    pub reflector_url: String,
    /// Offline MaxMind database; replaces the HTTP geo lookup when set
    pub mmdb_path: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_workers: DEFAULT_MAX_WORKERS,
            timeout: DEFAULT_TIMEOUT_SECS,
            test_urls: default_test_urls(),
            test_https: true,
            enable_sound: true,
            cache_file: PathBuf::from(DEFAULT_CACHE_FILE),
            geo_endpoint: DEFAULT_GEO_ENDPOINT.to_string(),
            reflector_url: DEFAULT_REFLECTOR_URL.to_string(),
            mmdb_path: None,
        }
    }
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load settings, falling back to defaults when the file is absent
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no settings file, using defaults");
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        let settings: Self = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("invalid settings file {}: {}", path.display(), e))?;
        tracing::info!(path = %path.display(), "settings loaded");
        Ok(settings)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        tracing::info!(path = %path.display(), "settings saved");
        Ok(())
    }

    /// Worker budget, never below one
    pub fn max_workers(&self) -> usize {
        self.max_workers.max(1)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    /// Plain-HTTP test URLs in configured order
    pub fn http_urls(&self) -> impl Iterator<Item = &str> {
        self.test_urls
            .iter()
            .map(String::as_str)
            .filter(|url| url.starts_with("http://"))
    }

    /// HTTPS test URLs in configured order
    pub fn https_urls(&self) -> impl Iterator<Item = &str> {
        self.test_urls
            .iter()
            .map(String::as_str)
            .filter(|url| url.starts_with("https://"))
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = secs;
        self
    }

    pub fn with_test_urls(mut self, urls: Vec<String>) -> Self {
        self.test_urls = urls;
        self
    }

    pub fn with_test_https(mut self, enabled: bool) -> Self {
        self.test_https = enabled;
        self
    }

    pub fn with_cache_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.cache_file = path.into();
        self
    }

    pub fn with_geo_endpoint(mut self, endpoint: String) -> Self {
        self.geo_endpoint = endpoint;
        self
    }

    pub fn with_reflector_url(mut self, url: String) -> Self {
        self.reflector_url = url;
        self
    }

    pub fn with_mmdb_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.mmdb_path = Some(path.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_default() {
        let settings = Settings::default();
        assert_eq!(settings.max_workers, DEFAULT_MAX_WORKERS);
        assert_eq!(settings.request_timeout(), Duration::from_secs(DEFAULT_TIMEOUT_SECS));
        assert!(settings.test_https);
        assert_eq!(settings.http_urls().count(), 3);
        assert_eq!(settings.https_urls().collect::<Vec<_>>(), vec!["https://httpbin.org/ip"]);
    }

    #[test]
    fn test_settings_builder() {
        let settings = Settings::new()
            .with_max_workers(0)
            .with_timeout(3)
            .with_test_https(false)
            .with_test_urls(vec!["https://a.test".into(), "http://b.test".into()]);

        assert_eq!(settings.max_workers(), 1);
        assert_eq!(settings.timeout, 3);
        assert!(!settings.test_https);
        assert_eq!(settings.http_urls().collect::<Vec<_>>(), vec!["http://b.test"]);
    }

    #[test]
    fn test_partial_file_merges_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "max_workers": 7, "test_https": false }"#).unwrap();

        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.max_workers, 7);
        assert!(!settings.test_https);
        assert_eq!(settings.timeout, DEFAULT_TIMEOUT_SECS);
        assert_eq!(settings.test_urls, default_test_urls());
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(dir.path().join("absent.json")).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(Settings::load(&path).is_err());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let settings = Settings::new().with_max_workers(12).with_mmdb_path("geo.mmdb");

        settings.save(&path).unwrap();
        assert_eq!(Settings::load(&path).unwrap(), settings);
    }
}
