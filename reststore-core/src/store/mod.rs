pub mod memory;
pub mod redis;

pub use self::memory::MemoryScriptStore;
pub use self::redis::RedisScriptStore;

use crate::error::Result;
use crate::scripts::ComposedScript;
use async_trait::async_trait;

/// Backing store able to run loaded scripts atomically.
///
/// `eval_script` must answer `RestStoreError::ScriptUnavailable` when the
/// handle is unknown to the store so the caller can reload and retry.
#[async_trait]
pub trait ScriptStore: Send + Sync {
    /// Loads the body and returns the handle to invoke it with.
    async fn load_script(&self, script: &ComposedScript) -> Result<String>;

    async fn eval_script(
        &self,
        handle: &str,
        keys: &[String],
        args: &[Vec<u8>],
    ) -> Result<ScriptReply>;

    /// Members of a sorted set with `min <= score <= max`.
    async fn count_by_score(&self, key: &str, min: i64, max: i64) -> Result<u64>;
}

/// Store-neutral shape of a script reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptReply {
    Nil,
    Int(i64),
    Bulk(Vec<u8>),
    Status(String),
    Array(Vec<ScriptReply>),
}

impl ScriptReply {
    pub fn bulk(value: impl Into<Vec<u8>>) -> Self {
        ScriptReply::Bulk(value.into())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ScriptReply::Bulk(bytes) => std::str::from_utf8(bytes).ok(),
            ScriptReply::Status(status) => Some(status.as_str()),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ScriptReply::Int(value) => Some(*value),
            other => other.as_text().and_then(|text| text.parse().ok()),
        }
    }

    pub fn into_bytes(self) -> Option<Vec<u8>> {
        match self {
            ScriptReply::Bulk(bytes) => Some(bytes),
            ScriptReply::Status(status) => Some(status.into_bytes()),
            _ => None,
        }
    }

    pub fn into_text(self) -> Option<String> {
        self.into_bytes()
            .and_then(|bytes| String::from_utf8(bytes).ok())
    }

    pub fn into_array(self) -> Option<Vec<ScriptReply>> {
        match self {
            ScriptReply::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            ScriptReply::Nil => "nil".to_string(),
            ScriptReply::Int(value) => format!("int({})", value),
            ScriptReply::Bulk(bytes) => format!("bulk({} bytes)", bytes.len()),
            ScriptReply::Status(status) => format!("status({})", status),
            ScriptReply::Array(items) => format!("array({} items)", items.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_accessors() {
        assert_eq!(ScriptReply::bulk("OK").as_text(), Some("OK"));
        assert_eq!(ScriptReply::Status("OK".into()).as_text(), Some("OK"));
        assert_eq!(ScriptReply::Int(7).as_int(), Some(7));
        assert_eq!(ScriptReply::bulk("12").as_int(), Some(12));
        assert_eq!(ScriptReply::Nil.as_text(), None);
        assert_eq!(ScriptReply::bulk(vec![0xff, 0xfe]).as_text(), None);
        assert_eq!(
            ScriptReply::Array(vec![ScriptReply::Nil]).into_array(),
            Some(vec![ScriptReply::Nil])
        );
    }
}
