use crate::clock::Clock;
use crate::compression::CompressionPool;
use crate::config::StorageConfig;
use crate::path_codec::{decode_segment, encode_path, KEY_DELIMITER};
use crate::scripts::{ScriptCall, ScriptKind, ScriptManager};
use crate::store::ScriptReply;
use crate::types::{sort_entries, CollectionEntry, ListWindow, StoredResource};
use crate::{RestStoreError, Result};
use bytes::Bytes;
use std::sync::Arc;

#[derive(Clone)]
pub struct GetResourceOperation {
    scripts: Arc<ScriptManager>,
    config: Arc<StorageConfig>,
    clock: Arc<dyn Clock>,
    compression: Arc<CompressionPool>,
}

#[derive(Debug, Clone)]
pub struct GetResourceOperationRequest {
    pub path: String,
    pub etag: Option<String>,
    pub window: ListWindow,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GetResourceOperationOutcome {
    Resource(StoredResource),
    Collection(Vec<CollectionEntry>),
    NotModified,
    NotFound,
    CompressionError(String),
}

impl GetResourceOperation {
    pub fn new(
        scripts: Arc<ScriptManager>,
        config: Arc<StorageConfig>,
        clock: Arc<dyn Clock>,
        compression: Arc<CompressionPool>,
    ) -> Self {
        Self {
            scripts,
            config,
            clock,
            compression,
        }
    }

    pub async fn run(
        &self,
        request: GetResourceOperationRequest,
    ) -> Result<GetResourceOperationOutcome> {
        let GetResourceOperationRequest { path, etag, window } = request;

        let call = ScriptCall::new(ScriptKind::Get, &self.config, self.clock.now_millis())
            .key(encode_path(&path))
            .arg(etag.unwrap_or_default());
        let reply = self.scripts.execute(&call).await?;

        match reply {
            ScriptReply::Array(items) => self.decode_node(&path, items, window).await,
            other => match other.as_text() {
                Some("notFound") => Ok(GetResourceOperationOutcome::NotFound),
                Some("notModified") => Ok(GetResourceOperationOutcome::NotModified),
                _ => Err(RestStoreError::UnexpectedReply(other.describe())),
            },
        }
    }

    async fn decode_node(
        &self,
        path: &str,
        items: Vec<ScriptReply>,
        window: ListWindow,
    ) -> Result<GetResourceOperationOutcome> {
        let mut items = items.into_iter();
        let node_type = items.next().and_then(ScriptReply::into_text);

        match node_type.as_deref() {
            Some("TYPE_RESOURCE") => {
                let content = items.next().and_then(ScriptReply::into_bytes);
                let etag = items.next().and_then(ScriptReply::into_text);
                let compressed = items.next().and_then(ScriptReply::into_text);
                let (Some(content), Some(etag), Some(compressed)) = (content, etag, compressed)
                else {
                    return Err(RestStoreError::UnexpectedReply(
                        "incomplete resource reply".to_string(),
                    ));
                };

                let content = if compressed == "1" {
                    match self.compression.decompress(Bytes::from(content)).await {
                        Ok(content) => content,
                        Err(error) => {
                            tracing::warn!(
                                "stored content failed to decompress path={} error={}",
                                path,
                                error
                            );
                            return Ok(GetResourceOperationOutcome::CompressionError(
                                error.to_string(),
                            ));
                        }
                    }
                } else {
                    Bytes::from(content)
                };

                Ok(GetResourceOperationOutcome::Resource(StoredResource {
                    content,
                    etag,
                }))
            }
            Some("TYPE_COLLECTION") => {
                let mut entries = Vec::new();
                for item in items {
                    let name = item.into_text().ok_or_else(|| {
                        RestStoreError::UnexpectedReply("non-text collection member".to_string())
                    })?;
                    entries.push(decode_member(&name));
                }
                sort_entries(&mut entries);
                Ok(GetResourceOperationOutcome::Collection(window.apply(entries)))
            }
            other => Err(RestStoreError::UnexpectedReply(format!(
                "unknown node type {:?}",
                other
            ))),
        }
    }
}

/// Collection members come back encoded; sub-collections end with the key
/// delimiter.
pub(crate) fn decode_member(name: &str) -> CollectionEntry {
    match name.strip_suffix(KEY_DELIMITER) {
        Some(collection) => CollectionEntry::collection(decode_segment(collection)),
        None => CollectionEntry::resource(decode_segment(name)),
    }
}
