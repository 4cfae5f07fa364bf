use crate::clock::Clock;
use crate::config::StorageConfig;
use crate::lock::{LockOutcome, LockRequest};
use crate::path_codec::encode_path;
use crate::scripts::{ScriptCall, ScriptKind, ScriptManager};
use crate::{RestStoreError, Result};
use std::sync::Arc;

#[derive(Clone)]
pub struct DeleteResourceOperation {
    scripts: Arc<ScriptManager>,
    config: Arc<StorageConfig>,
    clock: Arc<dyn Clock>,
}

#[derive(Debug, Clone)]
pub struct DeleteResourceOperationRequest {
    pub path: String,
    pub lock: Option<LockRequest>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteResourceOperationOutcome {
    Deleted,
    NotFound,
    Locked(LockOutcome),
}

impl DeleteResourceOperation {
    pub fn new(
        scripts: Arc<ScriptManager>,
        config: Arc<StorageConfig>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            scripts,
            config,
            clock,
        }
    }

    pub async fn run(
        &self,
        request: DeleteResourceOperationRequest,
    ) -> Result<DeleteResourceOperationOutcome> {
        let owner = request
            .lock
            .as_ref()
            .map(|lock| lock.owner.as_str())
            .unwrap_or_default();

        let call = ScriptCall::new(ScriptKind::Delete, &self.config, self.clock.now_millis())
            .key(encode_path(&request.path))
            .arg(owner);

        let reply = self.scripts.execute(&call).await?;
        match reply.as_text() {
            Some("deleted") => Ok(DeleteResourceOperationOutcome::Deleted),
            Some("notFound") => Ok(DeleteResourceOperationOutcome::NotFound),
            Some(other) => match LockOutcome::from_reply(other) {
                Some(lock) => {
                    tracing::debug!(
                        "delete hit foreign lock path={} outcome={:?}",
                        request.path,
                        lock
                    );
                    Ok(DeleteResourceOperationOutcome::Locked(lock))
                }
                None => Err(RestStoreError::UnexpectedReply(format!(
                    "delete reply: {}",
                    other
                ))),
            },
            None => Err(RestStoreError::UnexpectedReply(reply.describe())),
        }
    }
}
