//! Configuration for LetheCache

use serde::Deserialize;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub cache: CacheConfig,
    pub crawler: CrawlerConfig,
    pub metrics: MetricsConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to listen on
    pub listen_addr: String,

    /// Maximum number of concurrent connections
    pub max_connections: usize,

    /// Read buffer size per connection (bytes)
    pub read_buffer_size: usize,

    /// Write buffer size per connection (bytes)
    pub write_buffer_size: usize,

    /// Number of Tokio worker threads (0 = number of CPUs)
    pub worker_threads: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:11211".to_string(),
            max_connections: 10000,
            read_buffer_size: 8192,
            write_buffer_size: 8192,
            worker_threads: 0,
        }
    }
}

/// Cache engine configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum bytes of item payload the cache may hold
    pub capacity_bytes: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity_bytes: 64 * 1024 * 1024, // 64MB
        }
    }
}

/// LRU crawler configuration (startup defaults; tunable at runtime via
/// the `lru_crawler` protocol command)
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    /// Start with the crawler enabled
    pub enabled: bool,

    /// Items scanned per pass
    pub items_per_run: u32,

    /// Sleep between passes, microseconds (0..=1_000_000)
    pub sleep_us: u64,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            items_per_run: 100,
            sleep_us: 100_000,
        }
    }
}

/// Metrics and health check configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Enable the HTTP health/metrics sidecar
    pub enabled: bool,

    /// Address for the metrics/health HTTP server
    pub listen_addr: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_addr: "127.0.0.1:9090".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> crate::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| crate::LetheError::Config(format!("Failed to read config file: {e}")))?;

        toml::from_str(&contents)
            .map_err(|e| crate::LetheError::Config(format!("Failed to parse config: {e}")))
    }

    /// Load configuration from environment variables or use defaults
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("LETHECACHE_LISTEN_ADDR") {
            config.server.listen_addr = addr;
        }

        if let Ok(max_conn) = std::env::var("LETHECACHE_MAX_CONNECTIONS")
            && let Ok(n) = max_conn.parse()
        {
            config.server.max_connections = n;
        }

        if let Ok(capacity) = std::env::var("LETHECACHE_CAPACITY_BYTES")
            && let Ok(n) = capacity.parse()
        {
            config.cache.capacity_bytes = n;
        }

        if let Ok(enabled) = std::env::var("LETHECACHE_CRAWLER_ENABLED") {
            config.crawler.enabled = enabled.to_lowercase() == "true" || enabled == "1";
        }

        if let Ok(addr) = std::env::var("LETHECACHE_METRICS_ADDR") {
            config.metrics.listen_addr = addr;
        }

        if let Ok(enabled) = std::env::var("LETHECACHE_METRICS_ENABLED") {
            config.metrics.enabled = enabled.to_lowercase() == "true" || enabled == "1";
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.listen_addr, "127.0.0.1:11211");
        assert_eq!(config.cache.capacity_bytes, 64 * 1024 * 1024);
        assert!(!config.crawler.enabled);
        assert!(config.crawler.items_per_run > 0);
    }

    #[test]
    fn test_parse_toml() {
        let toml = r#"
            [server]
            listen_addr = "0.0.0.0:11311"

            [cache]
            capacity_bytes = 1048576

            [crawler]
            enabled = true
            items_per_run = 50
            sleep_us = 1000
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.listen_addr, "0.0.0.0:11311");
        assert_eq!(config.cache.capacity_bytes, 1_048_576);
        assert!(config.crawler.enabled);
        assert_eq!(config.crawler.items_per_run, 50);
        assert_eq!(config.crawler.sleep_us, 1000);
        // Untouched section keeps defaults
        assert!(config.metrics.enabled);
    }
}
