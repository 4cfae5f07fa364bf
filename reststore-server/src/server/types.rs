use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub(crate) struct ErrorResponse {
    pub(crate) error: String,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ResourceQuery {
    #[serde(default)]
    pub(crate) offset: Option<i64>,
    #[serde(default)]
    pub(crate) limit: Option<i64>,
    #[serde(default)]
    pub(crate) merge: bool,
    #[serde(default, rename = "storageExpand")]
    pub(crate) storage_expand: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ExpandRequest {
    #[serde(rename = "subResources")]
    pub(crate) sub_resources: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CleanupQuery {
    #[serde(default, rename = "cleanupResourcesAmount")]
    pub(crate) cleanup_resources_amount: Option<u64>,
}

#[derive(Debug, Serialize)]
pub(crate) struct CleanupResponse {
    #[serde(rename = "cleanedResources")]
    pub(crate) cleaned_resources: u64,
    #[serde(rename = "expiredResourcesLeft")]
    pub(crate) expired_resources_left: u64,
}
