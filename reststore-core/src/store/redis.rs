use crate::error::{RestStoreError, Result};
use crate::scripts::ComposedScript;
use crate::store::{ScriptReply, ScriptStore};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, ErrorKind, Value};

/// Script store on a Redis server, addressed through `EVALSHA`.
pub struct RedisScriptStore {
    conn: MultiplexedConnection,
}

impl RedisScriptStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = Client::open(url)
            .map_err(|e| RestStoreError::Config(format!("Failed to connect to Redis: {}", e)))?;

        let mut conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| RestStoreError::Config(format!("Failed to connect to Redis: {}", e)))?;

        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| RestStoreError::Config(format!("Redis ping failed: {}", e)))?;

        Ok(Self { conn })
    }
}

#[async_trait]
impl ScriptStore for RedisScriptStore {
    async fn load_script(&self, script: &ComposedScript) -> Result<String> {
        let mut conn = self.conn.clone();
        let sha: String = redis::cmd("SCRIPT")
            .arg("LOAD")
            .arg(script.body.as_str())
            .query_async(&mut conn)
            .await?;

        tracing::debug!(
            "loaded script kind={} variant={:?} sha={}",
            script.kind,
            script.variant,
            sha
        );
        Ok(sha)
    }

    async fn eval_script(
        &self,
        handle: &str,
        keys: &[String],
        args: &[Vec<u8>],
    ) -> Result<ScriptReply> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("EVALSHA");
        cmd.arg(handle).arg(keys.len());
        for key in keys {
            cmd.arg(key.as_str());
        }
        for arg in args {
            cmd.arg(arg.as_slice());
        }

        let result: redis::RedisResult<Value> = cmd.query_async(&mut conn).await;
        match result {
            Ok(value) => Ok(reply_from_value(value)),
            Err(error) if error.kind() == ErrorKind::NoScriptError => {
                Err(RestStoreError::ScriptUnavailable(handle.to_string()))
            }
            Err(error) => Err(RestStoreError::Redis(error)),
        }
    }

    async fn count_by_score(&self, key: &str, min: i64, max: i64) -> Result<u64> {
        let mut conn = self.conn.clone();
        let count: u64 = conn.zcount(key, min, max).await?;
        Ok(count)
    }
}

fn reply_from_value(value: Value) -> ScriptReply {
    match value {
        Value::Nil => ScriptReply::Nil,
        Value::Int(value) => ScriptReply::Int(value),
        Value::BulkString(bytes) => ScriptReply::Bulk(bytes),
        Value::SimpleString(status) => ScriptReply::Status(status),
        Value::Okay => ScriptReply::Status("OK".to_string()),
        Value::Array(items) => ScriptReply::Array(items.into_iter().map(reply_from_value).collect()),
        other => ScriptReply::Status(format!("{:?}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::config::StorageConfig;
    use crate::operations::PutResourceOperationRequest;
    use crate::storage::{RestStorage, StorageOutcome};
    use crate::types::ListWindow;
    use std::sync::Arc;

    fn test_redis_url() -> Option<String> {
        std::env::var("RESTSTORE_TEST_REDIS_URL").ok()
    }

    #[test]
    fn converts_nested_values() {
        let reply = reply_from_value(Value::Array(vec![
            Value::BulkString(b"TYPE_COLLECTION".to_vec()),
            Value::Int(3),
            Value::Okay,
            Value::Nil,
        ]));
        assert_eq!(
            reply,
            ScriptReply::Array(vec![
                ScriptReply::bulk("TYPE_COLLECTION"),
                ScriptReply::Int(3),
                ScriptReply::Status("OK".to_string()),
                ScriptReply::Nil,
            ])
        );
    }

    #[tokio::test]
    async fn round_trips_against_a_live_server() {
        let Some(url) = test_redis_url() else {
            return;
        };
        let store = Arc::new(RedisScriptStore::connect(&url).await.unwrap());
        let config = StorageConfig {
            resources_prefix: "reststore-test:resources".to_string(),
            collections_prefix: "reststore-test:collections".to_string(),
            expirable_prefix: "reststore-test:expirable".to_string(),
            lock_prefix: "reststore-test:lock".to_string(),
            delta_resources_prefix: "reststore-test:delta:resources".to_string(),
            delta_etags_prefix: "reststore-test:delta:etags".to_string(),
            ..StorageConfig::default()
        };
        let storage = RestStorage::new(store, config, Arc::new(SystemClock));

        let put = storage
            .put(PutResourceOperationRequest::new("/smoke/doc", r#"{"ok":true}"#))
            .await
            .unwrap();
        assert!(matches!(put, StorageOutcome::Stored { .. }));

        let listing = storage
            .get("/smoke", None, ListWindow::default())
            .await
            .unwrap();
        assert!(matches!(listing, StorageOutcome::Collection(ref entries) if entries.len() == 1));

        let deleted = storage.delete("/smoke", None).await.unwrap();
        assert_eq!(deleted, StorageOutcome::Deleted);
    }
}
