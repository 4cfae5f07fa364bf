use serde::{Deserialize, Serialize};

/// Knobs of the storage engine. Every field has a default so a partial
/// `storage` section in the server config is enough.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_resources_prefix")]
    pub resources_prefix: String,
    #[serde(default = "default_collections_prefix")]
    pub collections_prefix: String,
    #[serde(default = "default_expirable_prefix")]
    pub expirable_prefix: String,
    #[serde(default = "default_lock_prefix")]
    pub lock_prefix: String,
    #[serde(default = "default_delta_resources_prefix")]
    pub delta_resources_prefix: String,
    #[serde(default = "default_delta_etags_prefix")]
    pub delta_etags_prefix: String,
    #[serde(default = "default_cleanup_bulk_size")]
    pub cleanup_bulk_size: u64,
    #[serde(default = "default_resource_cleanup_amount")]
    pub resource_cleanup_amount: u64,
    #[serde(default = "default_script_reload_retries")]
    pub script_reload_retries: usize,
    #[serde(default = "default_lock_expire_secs")]
    pub default_lock_expire_secs: u64,
    #[serde(default = "default_compression_workers")]
    pub compression_workers: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            resources_prefix: default_resources_prefix(),
            collections_prefix: default_collections_prefix(),
            expirable_prefix: default_expirable_prefix(),
            lock_prefix: default_lock_prefix(),
            delta_resources_prefix: default_delta_resources_prefix(),
            delta_etags_prefix: default_delta_etags_prefix(),
            cleanup_bulk_size: default_cleanup_bulk_size(),
            resource_cleanup_amount: default_resource_cleanup_amount(),
            script_reload_retries: default_script_reload_retries(),
            default_lock_expire_secs: default_lock_expire_secs(),
            compression_workers: default_compression_workers(),
        }
    }
}

impl StorageConfig {
    /// Leading script arguments shared by every operation: the six key
    /// namespaces in the order the scripts read them.
    pub fn namespace_args(&self) -> [&str; 6] {
        [
            self.resources_prefix.as_str(),
            self.collections_prefix.as_str(),
            self.expirable_prefix.as_str(),
            self.lock_prefix.as_str(),
            self.delta_resources_prefix.as_str(),
            self.delta_etags_prefix.as_str(),
        ]
    }
}

fn default_resources_prefix() -> String {
    "rest-storage:resources".to_string()
}

fn default_collections_prefix() -> String {
    "rest-storage:collections".to_string()
}

fn default_expirable_prefix() -> String {
    "rest-storage:expirable".to_string()
}

fn default_lock_prefix() -> String {
    "rest-storage:lock".to_string()
}

fn default_delta_resources_prefix() -> String {
    "delta:resources".to_string()
}

fn default_delta_etags_prefix() -> String {
    "delta:etags".to_string()
}

fn default_cleanup_bulk_size() -> u64 {
    200
}

fn default_resource_cleanup_amount() -> u64 {
    100_000
}

fn default_script_reload_retries() -> usize {
    10
}

fn default_lock_expire_secs() -> u64 {
    300
}

fn default_compression_workers() -> usize {
    4
}
