//! In-process script store. Every script runs to completion under one
//! global lock, which gives the same atomicity Redis gives a Lua script.

mod keyspace;
mod procedures;

use self::keyspace::Keyspace;
use self::procedures::Procedure;
use crate::error::{RestStoreError, Result};
use crate::scripts::{ComposedScript, ScriptKind, ScriptVariant};
use crate::store::{ScriptReply, ScriptStore};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

#[derive(Default)]
struct MemoryState {
    keyspace: Keyspace,
    scripts: HashMap<String, (ScriptKind, ScriptVariant)>,
}

#[derive(Default)]
pub struct MemoryScriptStore {
    state: Mutex<MemoryState>,
}

impl MemoryScriptStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets every loaded script, like `SCRIPT FLUSH`.
    pub async fn flush_scripts(&self) {
        self.state.lock().await.scripts.clear();
    }

    pub async fn contains_key(&self, key: &str) -> bool {
        self.state.lock().await.keyspace.exists(key)
    }

    pub async fn score(&self, key: &str, member: &str) -> Option<i64> {
        self.state.lock().await.keyspace.zscore(key, member)
    }
}

#[async_trait]
impl ScriptStore for MemoryScriptStore {
    async fn load_script(&self, script: &ComposedScript) -> Result<String> {
        let mut state = self.state.lock().await;
        state
            .scripts
            .insert(script.fingerprint.clone(), (script.kind, script.variant));
        tracing::debug!(
            "loaded script kind={} variant={:?} sha={}",
            script.kind,
            script.variant,
            script.fingerprint
        );
        Ok(script.fingerprint.clone())
    }

    async fn eval_script(
        &self,
        handle: &str,
        keys: &[String],
        args: &[Vec<u8>],
    ) -> Result<ScriptReply> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let Some((kind, variant)) = state.scripts.get(handle).copied() else {
            return Err(RestStoreError::ScriptUnavailable(handle.to_string()));
        };

        let verbose = variant == ScriptVariant::Verbose;
        let mut procedure = Procedure::new(&mut state.keyspace, args, verbose)?;
        procedure.run(kind, keys, args)
    }

    async fn count_by_score(&self, key: &str, min: i64, max: i64) -> Result<u64> {
        let state = self.state.lock().await;
        Ok(state.keyspace.zcount_between(key, min, max) as u64)
    }
}
