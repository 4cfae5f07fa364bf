use crate::clock::Clock;
use crate::compression::CompressionPool;
use crate::config::StorageConfig;
use crate::lock::{LockManager, LockOutcome, LockRequest};
use crate::operations::{
    DeleteResourceOperation, DeleteResourceOperationOutcome, DeleteResourceOperationRequest,
    ExpandResourcesOperation, ExpandResourcesOperationOutcome, ExpandResourcesOperationRequest,
    GetResourceOperation, GetResourceOperationOutcome, GetResourceOperationRequest,
    PutResourceOperation, PutResourceOperationOutcome, PutResourceOperationRequest,
};
use crate::path_codec::{normalize_path, reserved_segment};
use crate::scripts::{ScriptManager, VerbosityProbe};
use crate::store::ScriptStore;
use crate::sweeper::{CleanupReport, ExpirationSweeper};
use crate::types::{CollectionEntry, ListWindow, StoredResource};
use crate::Result;
use bytes::Bytes;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StructuralConflict {
    /// The target path is a collection.
    ExistingCollection,
    /// An ancestor of the target path is a resource.
    ExistingResource(String),
}

/// Everything a storage call can end in short of a backend failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageOutcome {
    Resource(StoredResource),
    Collection(Vec<CollectionEntry>),
    Expanded { payload: Bytes, etag: String },
    Stored { etag: String },
    Deleted,
    Cleaned(CleanupReport),
    NotFound,
    NotModified,
    Conflict(StructuralConflict),
    LockConflict,
    /// A foreign SILENT lock swallowed the write; callers report success.
    LockIgnored,
    Invalid(String),
    CompressionError(String),
    CompressionNotSupported,
}

impl From<LockOutcome> for StorageOutcome {
    fn from(outcome: LockOutcome) -> Self {
        match outcome {
            LockOutcome::Conflict => StorageOutcome::LockConflict,
            LockOutcome::Ignored => StorageOutcome::LockIgnored,
        }
    }
}

/// Public entry point of the engine. `Err` is reserved for the backing
/// store being unusable.
pub struct RestStorage {
    config: Arc<StorageConfig>,
    locks: Arc<LockManager>,
    sweeper: Arc<ExpirationSweeper>,
    get_operation: GetResourceOperation,
    put_operation: PutResourceOperation,
    delete_operation: DeleteResourceOperation,
    expand_operation: ExpandResourcesOperation,
}

impl RestStorage {
    pub fn new(store: Arc<dyn ScriptStore>, config: StorageConfig, clock: Arc<dyn Clock>) -> Self {
        let scripts = ScriptManager::new(store, config.script_reload_retries);
        Self::with_scripts(scripts, config, clock)
    }

    pub fn with_verbosity(
        store: Arc<dyn ScriptStore>,
        config: StorageConfig,
        clock: Arc<dyn Clock>,
        verbosity: Arc<dyn VerbosityProbe>,
    ) -> Self {
        let scripts =
            ScriptManager::new(store, config.script_reload_retries).with_verbosity(verbosity);
        Self::with_scripts(scripts, config, clock)
    }

    fn with_scripts(scripts: ScriptManager, config: StorageConfig, clock: Arc<dyn Clock>) -> Self {
        let scripts = Arc::new(scripts);
        let config = Arc::new(config);
        let compression = Arc::new(CompressionPool::new(config.compression_workers));
        let locks = Arc::new(LockManager::new(
            scripts.clone(),
            config.clone(),
            clock.clone(),
        ));

        Self {
            get_operation: GetResourceOperation::new(
                scripts.clone(),
                config.clone(),
                clock.clone(),
                compression.clone(),
            ),
            put_operation: PutResourceOperation::new(
                scripts.clone(),
                locks.clone(),
                config.clone(),
                clock.clone(),
                compression,
            ),
            delete_operation: DeleteResourceOperation::new(
                scripts.clone(),
                config.clone(),
                clock.clone(),
            ),
            expand_operation: ExpandResourcesOperation::new(
                scripts.clone(),
                config.clone(),
                clock.clone(),
            ),
            sweeper: Arc::new(ExpirationSweeper::new(scripts, config.clone(), clock)),
            locks,
            config,
        }
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn locks(&self) -> &Arc<LockManager> {
        &self.locks
    }

    pub fn sweeper(&self) -> &Arc<ExpirationSweeper> {
        &self.sweeper
    }

    pub async fn get(
        &self,
        path: &str,
        etag: Option<String>,
        window: ListWindow,
    ) -> Result<StorageOutcome> {
        let path = normalize_path(path);
        if let Some(outcome) = reserved_path(&path) {
            return Ok(outcome);
        }
        let outcome = self
            .get_operation
            .run(GetResourceOperationRequest {
                path: path.clone(),
                etag,
                window,
            })
            .await?;

        tracing::debug!("get path={} outcome={}", path, outcome_label(&outcome));
        Ok(match outcome {
            GetResourceOperationOutcome::Resource(resource) => StorageOutcome::Resource(resource),
            GetResourceOperationOutcome::Collection(entries) => StorageOutcome::Collection(entries),
            GetResourceOperationOutcome::NotModified => StorageOutcome::NotModified,
            GetResourceOperationOutcome::NotFound => StorageOutcome::NotFound,
            GetResourceOperationOutcome::CompressionError(message) => {
                StorageOutcome::CompressionError(message)
            }
        })
    }

    pub async fn put(&self, mut request: PutResourceOperationRequest) -> Result<StorageOutcome> {
        request.path = normalize_path(&request.path);
        if let Some(outcome) = reserved_path(&request.path) {
            return Ok(outcome);
        }
        let path = request.path.clone();
        let outcome = self.put_operation.run(request).await?;

        tracing::debug!("put path={} outcome={:?}", path, outcome);
        Ok(match outcome {
            PutResourceOperationOutcome::Stored { etag } => StorageOutcome::Stored { etag },
            PutResourceOperationOutcome::NotModified => StorageOutcome::NotModified,
            PutResourceOperationOutcome::ExistingCollection => {
                StorageOutcome::Conflict(StructuralConflict::ExistingCollection)
            }
            PutResourceOperationOutcome::ExistingResource { path } => {
                StorageOutcome::Conflict(StructuralConflict::ExistingResource(path))
            }
            PutResourceOperationOutcome::Locked(lock) => lock.into(),
            PutResourceOperationOutcome::Invalid(message) => StorageOutcome::Invalid(message),
        })
    }

    pub async fn delete(&self, path: &str, lock: Option<LockRequest>) -> Result<StorageOutcome> {
        let path = normalize_path(path);
        if let Some(outcome) = reserved_path(&path) {
            return Ok(outcome);
        }
        let outcome = self
            .delete_operation
            .run(DeleteResourceOperationRequest {
                path: path.clone(),
                lock,
            })
            .await?;

        tracing::debug!("delete path={} outcome={:?}", path, outcome);
        Ok(match outcome {
            DeleteResourceOperationOutcome::Deleted => StorageOutcome::Deleted,
            DeleteResourceOperationOutcome::NotFound => StorageOutcome::NotFound,
            DeleteResourceOperationOutcome::Locked(lock) => lock.into(),
        })
    }

    pub async fn expand(
        &self,
        path: &str,
        etag: Option<String>,
        sub_resources: Vec<String>,
    ) -> Result<StorageOutcome> {
        let path = normalize_path(path);
        if let Some(outcome) = reserved_path(&path) {
            return Ok(outcome);
        }
        let outcome = self
            .expand_operation
            .run(ExpandResourcesOperationRequest {
                path: path.clone(),
                etag,
                sub_resources,
            })
            .await?;

        Ok(match outcome {
            ExpandResourcesOperationOutcome::Expanded { payload, etag } => {
                tracing::debug!("expand path={} etag={}", path, etag);
                StorageOutcome::Expanded { payload, etag }
            }
            ExpandResourcesOperationOutcome::NotModified => StorageOutcome::NotModified,
            ExpandResourcesOperationOutcome::NotFound => StorageOutcome::NotFound,
            ExpandResourcesOperationOutcome::Invalid(message) => StorageOutcome::Invalid(message),
            ExpandResourcesOperationOutcome::CompressionNotSupported => {
                StorageOutcome::CompressionNotSupported
            }
        })
    }

    /// Sweeps up to `amount` expired resources, the configured amount when
    /// `None`.
    pub async fn cleanup(&self, amount: Option<u64>) -> Result<StorageOutcome> {
        let amount = amount.unwrap_or(self.config.resource_cleanup_amount);
        let report = self
            .sweeper
            .cleanup(amount, self.config.cleanup_bulk_size)
            .await?;
        Ok(StorageOutcome::Cleaned(report))
    }
}

fn reserved_path(path: &str) -> Option<StorageOutcome> {
    reserved_segment(path).map(|segment| {
        StorageOutcome::Invalid(format!("reserved character in path segment {}", segment))
    })
}

fn outcome_label(outcome: &GetResourceOperationOutcome) -> &'static str {
    match outcome {
        GetResourceOperationOutcome::Resource(_) => "resource",
        GetResourceOperationOutcome::Collection(_) => "collection",
        GetResourceOperationOutcome::NotModified => "not_modified",
        GetResourceOperationOutcome::NotFound => "not_found",
        GetResourceOperationOutcome::CompressionError(_) => "compression_error",
    }
}
