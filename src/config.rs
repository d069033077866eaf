//! Configuration: loaded from a YAML file, defaults filled in per-field so a
//! mostly-empty file is still a valid configuration.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub endpoint: EndpointConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub stats: StatsConfig,
    #[serde(default)]
    pub general: GeneralConfig,
}

impl Config {
    /// Loads and parses the YAML file at `path`. Any failure here is
    /// treated as a fatal startup error by the caller.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        Ok(config)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EndpointConfig {
    pub port: u16,
    #[serde(default)]
    pub multicore: bool,
    #[serde(default)]
    pub reuseport: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StoreConfig {
    pub driver: String,
    pub hosts: Vec<String>,
    pub port: u16,
    pub keyspace: String,
    pub table: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub resolution: String,
    pub retention: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            driver: "devnull".to_string(),
            hosts: Vec::new(),
            port: 9042,
            keyspace: "carbon".to_string(),
            table: "metrics".to_string(),
            username: None,
            password: None,
            resolution: "60s".to_string(),
            retention: "24h".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct IndexConfig {
    pub driver: String,
    pub addresses: Vec<String>,
    pub name: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub insecure: bool,
    pub region: Option<String>,
    pub sigv4: bool,
    pub flush: FlushConfig,
    pub cache: CacheConfig,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            driver: "devnull".to_string(),
            addresses: Vec::new(),
            name: "metrics".to_string(),
            username: None,
            password: None,
            insecure: false,
            region: None,
            sigv4: false,
            flush: FlushConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FlushConfig {
    pub bytes: usize,
    pub interval: String,
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            bytes: 5 * 1024 * 1024,
            interval: "5m".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CacheConfig {
    pub size: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { size: 1_000_000 }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StatsConfig {
    pub path: String,
    pub interval: String,
    pub log: bool,
    pub segment: i32,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            path: "carbon.writer".to_string(),
            interval: "60s".to_string(),
            log: false,
            segment: 0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GeneralConfig {
    pub level: String,
    pub profiler: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            profiler: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn minimal_config_fills_in_defaults() {
        let yaml = "endpoint:\n  port: 2003\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.endpoint.port, 2003);
        assert!(!config.endpoint.multicore);
        assert_eq!(config.store.driver, "devnull");
        assert_eq!(config.index.flush.interval, "5m");
        assert_eq!(config.index.cache.size, 1_000_000);
        assert_eq!(config.stats.interval, "60s");
        assert_eq!(config.general.level, "info");
    }

    #[test]
    fn load_reads_file_from_disk() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "endpoint:\n  port: 2003\n  multicore: true").unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.endpoint.port, 2003);
        assert!(config.endpoint.multicore);
    }

    #[test]
    fn missing_file_is_an_error() {
        let result = Config::load(Path::new("/nonexistent/config.yaml"));
        assert!(result.is_err());
    }
}
