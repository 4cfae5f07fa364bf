use super::{ComposedScript, ScriptCall, ScriptKind, ScriptVariant};
use crate::error::{RestStoreError, Result};
use crate::store::{ScriptReply, ScriptStore};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Decides which logging variant of the scripts should be loaded.
pub trait VerbosityProbe: Send + Sync {
    fn verbose(&self) -> bool;
}

/// Verbose scripts whenever TRACE is enabled for `reststore::scripts`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingVerbosity;

impl VerbosityProbe for TracingVerbosity {
    fn verbose(&self) -> bool {
        tracing::enabled!(target: "reststore::scripts", tracing::Level::TRACE)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptHandle {
    pub kind: ScriptKind,
    pub variant: ScriptVariant,
    pub sha: String,
}

#[derive(Default)]
struct ScriptCache {
    composed: HashMap<(ScriptKind, ScriptVariant), Arc<ComposedScript>>,
    loaded: HashMap<ScriptKind, ScriptHandle>,
}

impl ScriptCache {
    fn composed(&mut self, kind: ScriptKind, variant: ScriptVariant) -> Arc<ComposedScript> {
        self.composed
            .entry((kind, variant))
            .or_insert_with(|| Arc::new(ComposedScript::compose(kind, variant)))
            .clone()
    }
}

/// Keeps the operation scripts loaded in the backing store.
///
/// The last loaded variant per kind is cached, so a steady-state call costs
/// one map lookup. A NOSCRIPT answer triggers a reload and a retry, at most
/// `max_reloads` times per call.
pub struct ScriptManager {
    store: Arc<dyn ScriptStore>,
    verbosity: Arc<dyn VerbosityProbe>,
    max_reloads: usize,
    cache: Mutex<ScriptCache>,
}

impl ScriptManager {
    pub fn new(store: Arc<dyn ScriptStore>, max_reloads: usize) -> Self {
        Self {
            store,
            verbosity: Arc::new(TracingVerbosity),
            max_reloads,
            cache: Mutex::new(ScriptCache::default()),
        }
    }

    pub fn with_verbosity(mut self, verbosity: Arc<dyn VerbosityProbe>) -> Self {
        self.verbosity = verbosity;
        self
    }

    pub fn store(&self) -> &Arc<dyn ScriptStore> {
        &self.store
    }

    pub async fn ensure_loaded(&self, kind: ScriptKind) -> Result<ScriptHandle> {
        let variant = ScriptVariant::from_verbose(self.verbosity.verbose());
        let mut cache = self.cache.lock().await;
        if let Some(handle) = cache.loaded.get(&kind) {
            if handle.variant == variant {
                return Ok(handle.clone());
            }
            tracing::info!(
                "script verbosity changed, recomposing kind={} variant={:?}",
                kind,
                variant
            );
        }
        self.load(&mut cache, kind, variant).await
    }

    pub async fn execute(&self, call: &ScriptCall) -> Result<ScriptReply> {
        let mut handle = self.ensure_loaded(call.kind).await?;
        let mut reloads = 0;

        loop {
            match self
                .store
                .eval_script(&handle.sha, &call.keys, &call.args)
                .await
            {
                Ok(reply) => return Ok(reply),
                Err(RestStoreError::ScriptUnavailable(_)) => {
                    if reloads >= self.max_reloads {
                        tracing::error!(
                            "script still missing after reloads kind={} reloads={}",
                            call.kind,
                            reloads
                        );
                        return Err(RestStoreError::BackendUnavailable(format!(
                            "script {} missing after {} reloads",
                            call.kind, reloads
                        )));
                    }
                    reloads += 1;
                    tracing::warn!(
                        "script missing in backing store, reloading kind={} attempt={}",
                        call.kind,
                        reloads
                    );
                    let mut cache = self.cache.lock().await;
                    handle = self.load(&mut cache, call.kind, handle.variant).await?;
                }
                Err(error) => {
                    tracing::error!("script failed kind={} error={}", call.kind, error);
                    return Err(RestStoreError::BackendUnavailable(error.to_string()));
                }
            }
        }
    }

    async fn load(
        &self,
        cache: &mut ScriptCache,
        kind: ScriptKind,
        variant: ScriptVariant,
    ) -> Result<ScriptHandle> {
        let script = cache.composed(kind, variant);
        let sha = self.store.load_script(&script).await.map_err(|error| {
            tracing::error!("failed to load script kind={} error={}", kind, error);
            RestStoreError::BackendUnavailable(error.to_string())
        })?;

        let handle = ScriptHandle { kind, variant, sha };
        cache.loaded.insert(kind, handle.clone());
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::store::MemoryScriptStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct Switch(AtomicBool);

    impl VerbosityProbe for Switch {
        fn verbose(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    /// Loads succeed but every evaluation answers NOSCRIPT.
    #[derive(Default)]
    struct AmnesicStore {
        loads: AtomicUsize,
        evals: AtomicUsize,
    }

    #[async_trait]
    impl ScriptStore for AmnesicStore {
        async fn load_script(&self, script: &ComposedScript) -> Result<String> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(script.fingerprint.clone())
        }

        async fn eval_script(
            &self,
            handle: &str,
            _keys: &[String],
            _args: &[Vec<u8>],
        ) -> Result<ScriptReply> {
            self.evals.fetch_add(1, Ordering::SeqCst);
            Err(RestStoreError::ScriptUnavailable(handle.to_string()))
        }

        async fn count_by_score(&self, _key: &str, _min: i64, _max: i64) -> Result<u64> {
            Ok(0)
        }
    }

    fn get_call() -> ScriptCall {
        ScriptCall::new(ScriptKind::Get, &StorageConfig::default(), 1)
            .key(":a")
            .arg("")
    }

    #[tokio::test]
    async fn steady_state_reuses_cached_handle() {
        let store = Arc::new(MemoryScriptStore::new());
        let manager = ScriptManager::new(store, 10);

        let first = manager.ensure_loaded(ScriptKind::Put).await.unwrap();
        let second = manager.ensure_loaded(ScriptKind::Put).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn recovers_from_flushed_script_cache() {
        let store = Arc::new(MemoryScriptStore::new());
        let manager = ScriptManager::new(store.clone(), 10);

        let reply = manager.execute(&get_call()).await.unwrap();
        assert_eq!(reply.as_text(), Some("notFound"));

        store.flush_scripts().await;
        let reply = manager.execute(&get_call()).await.unwrap();
        assert_eq!(reply.as_text(), Some("notFound"));
    }

    #[tokio::test]
    async fn gives_up_after_bounded_reloads() {
        let store = Arc::new(AmnesicStore::default());
        let manager = ScriptManager::new(store.clone(), 10);

        let error = manager.execute(&get_call()).await.unwrap_err();
        assert!(matches!(error, RestStoreError::BackendUnavailable(_)));
        // initial load plus ten reloads, one evaluation each
        assert_eq!(store.loads.load(Ordering::SeqCst), 11);
        assert_eq!(store.evals.load(Ordering::SeqCst), 11);
    }

    #[tokio::test]
    async fn verbosity_change_loads_other_variant() {
        let store = Arc::new(MemoryScriptStore::new());
        let switch = Arc::new(Switch(AtomicBool::new(false)));
        let manager = ScriptManager::new(store, 10).with_verbosity(switch.clone());

        let quiet = manager.ensure_loaded(ScriptKind::Delete).await.unwrap();
        assert_eq!(quiet.variant, ScriptVariant::Quiet);

        switch.0.store(true, Ordering::SeqCst);
        let verbose = manager.ensure_loaded(ScriptKind::Delete).await.unwrap();
        assert_eq!(verbose.variant, ScriptVariant::Verbose);
        assert_ne!(quiet.sha, verbose.sha);

        let reply = manager.execute(&get_call()).await.unwrap();
        assert_eq!(reply.as_text(), Some("notFound"));
    }
}
