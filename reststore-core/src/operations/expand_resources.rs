use super::get_resource::decode_member;
use crate::clock::Clock;
use crate::config::StorageConfig;
use crate::path_codec::{decode_segment, encode_path, encode_segment, is_reserved, KEY_DELIMITER};
use crate::scripts::{ScriptCall, ScriptKind, ScriptManager};
use crate::store::ScriptReply;
use crate::{RestStoreError, Result};
use bytes::Bytes;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::sync::Arc;

#[derive(Clone)]
pub struct ExpandResourcesOperation {
    scripts: Arc<ScriptManager>,
    config: Arc<StorageConfig>,
    clock: Arc<dyn Clock>,
}

#[derive(Debug, Clone)]
pub struct ExpandResourcesOperationRequest {
    pub path: String,
    pub etag: Option<String>,
    /// Child names; a trailing `/` asks for a sub-collection listing.
    pub sub_resources: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpandResourcesOperationOutcome {
    Expanded { payload: Bytes, etag: String },
    NotModified,
    NotFound,
    Invalid(String),
    CompressionNotSupported,
}

impl ExpandResourcesOperation {
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
        request: ExpandResourcesOperationRequest,
    ) -> Result<ExpandResourcesOperationOutcome> {
        let ExpandResourcesOperationRequest {
            path,
            etag,
            sub_resources,
        } = request;

        let mut call = ScriptCall::new(ScriptKind::Expand, &self.config, self.clock.now_millis())
            .key(encode_path(&path));
        for name in &sub_resources {
            match script_name(name) {
                Some(encoded) => call = call.arg(encoded),
                None => {
                    return Ok(ExpandResourcesOperationOutcome::Invalid(format!(
                        "invalid sub resource name '{}'",
                        name
                    )))
                }
            }
        }

        let reply = self.scripts.execute(&call).await?;
        let entries = match reply {
            ScriptReply::Array(entries) => entries,
            other => {
                return match other.as_text() {
                    Some("notFound") => Ok(ExpandResourcesOperationOutcome::NotFound),
                    Some("compressionNotSupported") => {
                        Ok(ExpandResourcesOperationOutcome::CompressionNotSupported)
                    }
                    _ => Err(RestStoreError::UnexpectedReply(other.describe())),
                }
            }
        };

        let payload = match assemble(entries)? {
            Assembly::Payload(payload) => payload,
            Assembly::Invalid(message) => {
                return Ok(ExpandResourcesOperationOutcome::Invalid(message))
            }
        };
        let serialized = serde_json::to_vec(&Value::Object(payload))?;
        let computed = hex::encode(Sha256::digest(&serialized));

        if etag.as_deref() == Some(computed.as_str()) {
            return Ok(ExpandResourcesOperationOutcome::NotModified);
        }

        Ok(ExpandResourcesOperationOutcome::Expanded {
            payload: Bytes::from(serialized),
            etag: computed,
        })
    }
}

/// Encoded name as passed to the script, `None` for unusable input.
fn script_name(name: &str) -> Option<String> {
    let (bare, collection) = match name.strip_suffix('/') {
        Some(bare) => (bare, true),
        None => (name, false),
    };
    if bare.is_empty() || bare.contains('/') || bare == ".." || is_reserved(bare) {
        return None;
    }
    let mut encoded = encode_segment(bare);
    if collection {
        encoded.push(KEY_DELIMITER);
    }
    Some(encoded)
}

enum Assembly {
    Payload(Map<String, Value>),
    Invalid(String),
}

/// Builds the name-keyed payload. The map keeps its keys sorted, so the
/// serialization does not depend on the order names were requested in.
fn assemble(entries: Vec<ScriptReply>) -> Result<Assembly> {
    let mut payload = Map::new();

    for entry in entries {
        let mut fields = entry
            .into_array()
            .ok_or_else(|| RestStoreError::UnexpectedReply("expand entry".to_string()))?
            .into_iter();
        let name = fields.next().and_then(ScriptReply::into_text);
        let kind = fields.next().and_then(ScriptReply::into_text);
        let (Some(name), Some(kind)) = (name, kind) else {
            return Err(RestStoreError::UnexpectedReply(
                "incomplete expand entry".to_string(),
            ));
        };
        let name = decode_segment(&name);

        match kind.as_str() {
            "resource" => {
                let content = fields.next().and_then(ScriptReply::into_bytes).unwrap_or_default();
                match serde_json::from_slice::<Value>(&content) {
                    Ok(value) => {
                        payload.insert(name, value);
                    }
                    Err(_) => {
                        return Ok(Assembly::Invalid(format!(
                            "Error decoding invalid json resource '{}'",
                            name
                        )))
                    }
                }
            }
            "collection" => {
                let mut children = Vec::new();
                for child in fields {
                    let child = child.into_text().ok_or_else(|| {
                        RestStoreError::UnexpectedReply("non-text expand child".to_string())
                    })?;
                    children.push(decode_member(&child).display_name());
                }
                children.sort();
                payload.insert(
                    name,
                    Value::Array(children.into_iter().map(Value::String).collect()),
                );
            }
            other => {
                return Err(RestStoreError::UnexpectedReply(format!(
                    "expand entry kind {}",
                    other
                )))
            }
        }
    }

    Ok(Assembly::Payload(payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_names_mark_collections() {
        assert_eq!(script_name("item"), Some("item".to_string()));
        assert_eq!(script_name("sub/"), Some("sub:".to_string()));
        assert_eq!(script_name("a:b"), Some("a§b".to_string()));
        assert_eq!(script_name("a/b"), None);
        assert_eq!(script_name("/"), None);
        assert_eq!(script_name("a§b"), None);
    }

    #[test]
    fn payload_keys_are_ordered() {
        let entries = vec![
            ScriptReply::Array(vec![
                ScriptReply::bulk("zeta"),
                ScriptReply::bulk("resource"),
                ScriptReply::bulk(r#"{"v":1}"#),
            ]),
            ScriptReply::Array(vec![
                ScriptReply::bulk("alpha"),
                ScriptReply::bulk("collection"),
                ScriptReply::bulk("y"),
                ScriptReply::bulk("x:"),
            ]),
        ];
        let Assembly::Payload(payload) = assemble(entries).unwrap() else {
            panic!("expected payload");
        };
        let serialized = serde_json::to_string(&Value::Object(payload)).unwrap();
        assert_eq!(serialized, r#"{"alpha":["x/","y"],"zeta":{"v":1}}"#);
    }

    #[test]
    fn malformed_resource_is_invalid() {
        let entries = vec![ScriptReply::Array(vec![
            ScriptReply::bulk("broken"),
            ScriptReply::bulk("resource"),
            ScriptReply::bulk("{not json"),
        ])];
        assert!(matches!(assemble(entries).unwrap(), Assembly::Invalid(_)));
    }
}
