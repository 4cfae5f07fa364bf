//! Reststore Core - hierarchical JSON document store on top of Redis
//! sorted sets and hashes, driven by server-side scripts.

pub mod clock;
pub mod compression;
pub mod config;
pub mod error;
pub mod lock;
pub mod operations;
pub mod path_codec;
pub mod scripts;
pub mod storage;
pub mod store;
pub mod sweeper;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use compression::CompressionPool;
pub use config::StorageConfig;
pub use error::{RestStoreError, Result};
pub use lock::{LockManager, LockMode, LockOutcome, LockRequest, LockStatus};
pub use operations::*;
pub use path_codec::{decode_key, encode_path, normalize_path};
pub use scripts::{ScriptKind, ScriptManager, ScriptVariant, TracingVerbosity, VerbosityProbe};
pub use storage::{RestStorage, StorageOutcome, StructuralConflict};
pub use store::{MemoryScriptStore, RedisScriptStore, ScriptReply, ScriptStore};
pub use sweeper::{CleanupReport, ExpirationSweeper};
pub use types::{
    CollectionEntry, EntryKind, Expiry, ListWindow, StoredResource, NEVER_EXPIRE,
};
