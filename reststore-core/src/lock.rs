//! Advisory, owner-tagged, self-expiring locks on exact paths.

use crate::clock::Clock;
use crate::config::StorageConfig;
use crate::error::{RestStoreError, Result};
use crate::path_codec::encode_path;
use crate::scripts::{ScriptCall, ScriptKind, ScriptManager};
use crate::types::duration_millis;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockMode {
    /// Competing writes are dropped but reported as successful.
    #[default]
    Silent,
    /// Competing writes fail with a conflict.
    Reject,
}

impl LockMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockMode::Silent => "silent",
            LockMode::Reject => "reject",
        }
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LockMode {
    type Err = RestStoreError;

    fn from_str(value: &str) -> Result<Self> {
        if value.eq_ignore_ascii_case("silent") {
            Ok(LockMode::Silent)
        } else if value.eq_ignore_ascii_case("reject") {
            Ok(LockMode::Reject)
        } else {
            Err(RestStoreError::InvalidRequest(format!(
                "unknown lock mode: {}",
                value
            )))
        }
    }
}

/// Lock the caller holds or wants to take along with a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRequest {
    pub owner: String,
    pub mode: LockMode,
    /// Falls back to the configured default lock lifetime.
    pub expire_after: Option<Duration>,
}

impl LockRequest {
    pub fn new(owner: impl Into<String>, mode: LockMode) -> Self {
        Self {
            owner: owner.into(),
            mode,
            expire_after: None,
        }
    }

    pub fn expire_after(mut self, ttl: Duration) -> Self {
        self.expire_after = Some(ttl);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockStatus {
    Unlocked,
    OwnedBy(String),
    HeldBy { owner: String, mode: LockMode },
}

/// What a write or delete ran into when a foreign lock guarded its path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    Conflict,
    Ignored,
}

impl LockOutcome {
    /// Maps the lock-mode text a Put/Delete script answers with.
    pub(crate) fn from_reply(reply: &str) -> Option<Self> {
        match LockMode::from_str(reply).ok()? {
            LockMode::Reject => Some(LockOutcome::Conflict),
            LockMode::Silent => Some(LockOutcome::Ignored),
        }
    }
}

/// Script arguments describing the lock to write with a Put.
pub(crate) struct LockArgs {
    pub owner: String,
    pub mode: &'static str,
    pub expire_at: i64,
}

pub struct LockManager {
    scripts: Arc<ScriptManager>,
    config: Arc<StorageConfig>,
    clock: Arc<dyn Clock>,
}

impl LockManager {
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

    pub(crate) fn lock_args(&self, lock: Option<&LockRequest>, now: i64) -> LockArgs {
        match lock {
            Some(lock) => LockArgs {
                owner: lock.owner.clone(),
                mode: lock.mode.as_str(),
                expire_at: self.expire_at(lock, now),
            },
            None => LockArgs {
                owner: String::new(),
                mode: LockMode::Silent.as_str(),
                expire_at: now,
            },
        }
    }

    fn expire_at(&self, lock: &LockRequest, now: i64) -> i64 {
        let ttl = lock
            .expire_after
            .unwrap_or_else(|| Duration::from_secs(self.config.default_lock_expire_secs));
        now.saturating_add(duration_millis(ttl))
    }

    pub async fn check(&self, path: &str, owner: &str) -> Result<LockStatus> {
        self.run(path, "check", owner, LockMode::Silent, 0).await
    }

    /// Takes or refreshes the lock; a live lock of another owner is left
    /// untouched and reported as `HeldBy`.
    pub async fn acquire(&self, path: &str, request: &LockRequest) -> Result<LockStatus> {
        let now = self.clock.now_millis();
        let expire_at = self.expire_at(request, now);
        self.run(path, "set", &request.owner, request.mode, expire_at)
            .await
    }

    /// Drops the lock unless another owner holds it.
    pub async fn release(&self, path: &str, owner: &str) -> Result<LockStatus> {
        self.run(path, "clear", owner, LockMode::Silent, 0).await
    }

    async fn run(
        &self,
        path: &str,
        action: &str,
        owner: &str,
        mode: LockMode,
        expire_at: i64,
    ) -> Result<LockStatus> {
        let call = ScriptCall::new(ScriptKind::Lock, &self.config, self.clock.now_millis())
            .key(encode_path(path))
            .arg(action)
            .arg(owner)
            .arg(mode.as_str())
            .arg(expire_at.to_string());

        let reply = self.scripts.execute(&call).await?;
        let text = reply
            .as_text()
            .ok_or_else(|| RestStoreError::UnexpectedReply(reply.describe()))?;
        parse_status(text, owner)
    }
}

fn parse_status(text: &str, owner: &str) -> Result<LockStatus> {
    match text {
        "unlocked" => Ok(LockStatus::Unlocked),
        "owned" => Ok(LockStatus::OwnedBy(owner.to_string())),
        other => {
            let mut parts = other.splitn(3, ' ');
            match (parts.next(), parts.next(), parts.next()) {
                (Some("held"), Some(mode), Some(holder)) => Ok(LockStatus::HeldBy {
                    owner: holder.to_string(),
                    mode: mode.parse()?,
                }),
                _ => Err(RestStoreError::UnexpectedReply(format!(
                    "lock reply: {}",
                    other
                ))),
            }
        }
    }
}
