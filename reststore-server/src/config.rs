use reststore_core::{RestStoreError, Result, StorageConfig};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub sweeper: SweeperConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Path under which the resource tree is served.
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(default)]
    pub backend: StoreBackend,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            prefix: default_prefix(),
            backend: StoreBackend::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Redis,
    /// In-process store, contents are lost on restart.
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweeperConfig {
    #[serde(default = "default_sweeper_enabled")]
    pub enabled: bool,
    #[serde(default = "default_sweeper_interval_secs")]
    pub interval_secs: u64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            enabled: default_sweeper_enabled(),
            interval_secs: default_sweeper_interval_secs(),
        }
    }
}

fn default_bind_addr() -> String {
    "127.0.0.1:8989".to_string()
}

fn default_prefix() -> String {
    "/".to_string()
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_sweeper_enabled() -> bool {
    true
}

fn default_sweeper_interval_secs() -> u64 {
    60
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::with_name(path))
            .add_source(::config::Environment::with_prefix("RESTSTORE").separator("__"))
            .build()
            .map_err(|e| RestStoreError::Config(e.to_string()))?;

        let config: Config = settings
            .try_deserialize()
            .map_err(|e| RestStoreError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !self.server.prefix.starts_with('/') {
            return Err(RestStoreError::Config(format!(
                "server.prefix must start with '/': {}",
                self.server.prefix
            )));
        }
        if self.sweeper.enabled && self.sweeper.interval_secs == 0 {
            return Err(RestStoreError::Config(
                "sweeper.interval_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Prefix without its trailing slash, empty for the root.
    pub fn route_prefix(&self) -> &str {
        self.server.prefix.trim_end_matches('/')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_yaml(yaml: &str) -> Config {
        ::config::Config::builder()
            .add_source(::config::File::from_str(yaml, ::config::FileFormat::Yaml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn empty_file_yields_defaults() {
        let config = from_yaml("{}");
        assert_eq!(config.server.bind_addr, "127.0.0.1:8989");
        assert_eq!(config.server.backend, StoreBackend::Redis);
        assert_eq!(config.storage.cleanup_bulk_size, 200);
        assert_eq!(config.storage.resources_prefix, "rest-storage:resources");
        assert!(config.sweeper.enabled);
        assert_eq!(config.sweeper.interval_secs, 60);
        assert_eq!(config.route_prefix(), "");
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = from_yaml(
            r#"
server:
  prefix: /storage/
  backend: memory
storage:
  cleanup_bulk_size: 50
sweeper:
  enabled: false
"#,
        );
        assert_eq!(config.server.backend, StoreBackend::Memory);
        assert_eq!(config.route_prefix(), "/storage");
        assert_eq!(config.storage.cleanup_bulk_size, 50);
        assert_eq!(config.storage.lock_prefix, "rest-storage:lock");
        assert!(!config.sweeper.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_relative_prefix() {
        let mut config = Config::default();
        config.server.prefix = "storage".to_string();
        assert!(config.validate().is_err());
    }
}
