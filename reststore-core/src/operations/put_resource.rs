use crate::clock::Clock;
use crate::compression::CompressionPool;
use crate::config::StorageConfig;
use crate::lock::{LockManager, LockOutcome, LockRequest};
use crate::path_codec::{decode_key, encode_path};
use crate::scripts::{ScriptCall, ScriptKind, ScriptManager};
use crate::types::{Expiry, NEVER_EXPIRE};
use crate::{RestStoreError, Result};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct PutResourceOperation {
    scripts: Arc<ScriptManager>,
    locks: Arc<LockManager>,
    config: Arc<StorageConfig>,
    clock: Arc<dyn Clock>,
    compression: Arc<CompressionPool>,
}

#[derive(Debug, Clone)]
pub struct PutResourceOperationRequest {
    pub path: String,
    pub content: Bytes,
    /// Generated when absent.
    pub etag: Option<String>,
    pub merge: bool,
    /// `None` stores the resource without expiry.
    pub expire_after: Option<Duration>,
    /// Gzip the content before it is stored.
    pub compress: bool,
    pub lock: Option<LockRequest>,
}

impl PutResourceOperationRequest {
    pub fn new(path: impl Into<String>, content: impl Into<Bytes>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
            etag: None,
            merge: false,
            expire_after: None,
            compress: false,
            lock: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutResourceOperationOutcome {
    Stored { etag: String },
    NotModified,
    ExistingCollection,
    ExistingResource { path: String },
    Locked(LockOutcome),
    Invalid(String),
}

impl PutResourceOperation {
    pub fn new(
        scripts: Arc<ScriptManager>,
        locks: Arc<LockManager>,
        config: Arc<StorageConfig>,
        clock: Arc<dyn Clock>,
        compression: Arc<CompressionPool>,
    ) -> Self {
        Self {
            scripts,
            locks,
            config,
            clock,
            compression,
        }
    }

    pub async fn run(
        &self,
        request: PutResourceOperationRequest,
    ) -> Result<PutResourceOperationOutcome> {
        let PutResourceOperationRequest {
            path,
            content,
            etag,
            merge,
            expire_after,
            compress,
            lock,
        } = request;

        let key = encode_path(&path);
        if key.is_empty() {
            return Ok(PutResourceOperationOutcome::Invalid(
                "cannot store a resource at the root".to_string(),
            ));
        }
        if merge && compress {
            return Ok(PutResourceOperationOutcome::Invalid(
                "merge is not supported for compressed content".to_string(),
            ));
        }

        let content = if compress {
            self.compression.compress(content).await?
        } else {
            content
        };
        let etag = etag
            .filter(|etag| !etag.is_empty())
            .unwrap_or_else(|| ulid::Ulid::new().to_string());

        let now = self.clock.now_millis();
        let expiry = Expiry::after(now, expire_after);
        let lock_args = self.locks.lock_args(lock.as_ref(), now);

        let call = ScriptCall::new(ScriptKind::Put, &self.config, now)
            .key(key)
            .arg(if merge { "true" } else { "false" })
            .arg(expiry.score().to_string())
            .arg(NEVER_EXPIRE.to_string())
            .arg(&content)
            .arg(&etag)
            .arg(if compress { "true" } else { "false" })
            .arg(&lock_args.owner)
            .arg(lock_args.mode)
            .arg(lock_args.expire_at.to_string());

        let reply = self.scripts.execute(&call).await?;
        let text = reply
            .as_text()
            .ok_or_else(|| RestStoreError::UnexpectedReply(reply.describe()))?;

        let outcome = match text {
            "OK" => PutResourceOperationOutcome::Stored { etag },
            "notModified" => PutResourceOperationOutcome::NotModified,
            "existingCollection" => PutResourceOperationOutcome::ExistingCollection,
            "invalidMerge" => PutResourceOperationOutcome::Invalid(
                "merge needs json objects on both sides".to_string(),
            ),
            other => {
                if let Some(ancestor) = other.strip_prefix("existingResource ") {
                    PutResourceOperationOutcome::ExistingResource {
                        path: decode_key(ancestor),
                    }
                } else if let Some(lock) = LockOutcome::from_reply(other) {
                    tracing::debug!("put hit foreign lock path={} outcome={:?}", path, lock);
                    PutResourceOperationOutcome::Locked(lock)
                } else {
                    return Err(RestStoreError::UnexpectedReply(format!("put reply: {}", other)));
                }
            }
        };

        Ok(outcome)
    }
}
