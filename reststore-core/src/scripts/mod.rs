//! Atomic operation scripts and their lifecycle against the backing store.

mod manager;

pub use manager::{ScriptHandle, ScriptManager, TracingVerbosity, VerbosityProbe};

use crate::config::StorageConfig;
use sha2::{Digest, Sha256};
use std::fmt;

const COMMON_PRELUDE: &str = include_str!("lua/common.lua");
const NOTICE_LOG_MARKER: &str = "redis.log(redis.LOG_NOTICE,";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScriptKind {
    Get,
    Put,
    Delete,
    Expand,
    Cleanup,
    Lock,
}

impl ScriptKind {
    pub const ALL: [ScriptKind; 6] = [
        ScriptKind::Get,
        ScriptKind::Put,
        ScriptKind::Delete,
        ScriptKind::Expand,
        ScriptKind::Cleanup,
        ScriptKind::Lock,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ScriptKind::Get => "get",
            ScriptKind::Put => "put",
            ScriptKind::Delete => "del",
            ScriptKind::Expand => "expand",
            ScriptKind::Cleanup => "cleanup",
            ScriptKind::Lock => "lock",
        }
    }

    fn body(&self) -> &'static str {
        match self {
            ScriptKind::Get => include_str!("lua/get.lua"),
            ScriptKind::Put => include_str!("lua/put.lua"),
            ScriptKind::Delete => include_str!("lua/del.lua"),
            ScriptKind::Expand => include_str!("lua/expand.lua"),
            ScriptKind::Cleanup => include_str!("lua/cleanup.lua"),
            ScriptKind::Lock => include_str!("lua/lock.lua"),
        }
    }
}

impl fmt::Display for ScriptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Logging flavour of a script body. The quiet variant has every
/// NOTICE-level `redis.log` line stripped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScriptVariant {
    Verbose,
    Quiet,
}

impl ScriptVariant {
    pub fn from_verbose(verbose: bool) -> Self {
        if verbose {
            ScriptVariant::Verbose
        } else {
            ScriptVariant::Quiet
        }
    }
}

/// A complete script body ready to be loaded, with a sha256 fingerprint of
/// its text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedScript {
    pub kind: ScriptKind,
    pub variant: ScriptVariant,
    pub body: String,
    pub fingerprint: String,
}

impl ComposedScript {
    pub fn compose(kind: ScriptKind, variant: ScriptVariant) -> Self {
        let source_len = COMMON_PRELUDE.len() + kind.body().len() + 1;
        let mut body = String::with_capacity(source_len);
        for line in COMMON_PRELUDE.lines().chain(kind.body().lines()) {
            if variant == ScriptVariant::Quiet && line.contains(NOTICE_LOG_MARKER) {
                continue;
            }
            body.push_str(line);
            body.push('\n');
        }

        let fingerprint = hex::encode(Sha256::digest(body.as_bytes()));
        Self {
            kind,
            variant,
            body,
            fingerprint,
        }
    }
}

/// Keys and arguments of one script invocation. The namespace prefixes and
/// the clock reading always lead the argument list.
#[derive(Debug, Clone)]
pub struct ScriptCall {
    pub kind: ScriptKind,
    pub keys: Vec<String>,
    pub args: Vec<Vec<u8>>,
}

impl ScriptCall {
    pub fn new(kind: ScriptKind, config: &StorageConfig, now: i64) -> Self {
        let mut args: Vec<Vec<u8>> = config
            .namespace_args()
            .iter()
            .map(|prefix| prefix.as_bytes().to_vec())
            .collect();
        args.push(now.to_string().into_bytes());
        Self {
            kind,
            keys: Vec::new(),
            args,
        }
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.keys.push(key.into());
        self
    }

    pub fn arg(mut self, value: impl AsRef<[u8]>) -> Self {
        self.args.push(value.as_ref().to_vec());
        self
    }
}
