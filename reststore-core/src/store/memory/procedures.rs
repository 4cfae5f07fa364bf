//! Rust renditions of the Lua operation scripts, run against a [`Keyspace`]
//! while the store's global lock is held. Argument positions follow the
//! Lua `ARGV` numbering.

use super::keyspace::Keyspace;
use crate::error::{RestStoreError, Result};
use crate::scripts::ScriptKind;
use crate::store::ScriptReply;

struct Namespace {
    res: String,
    col: String,
    expirable: String,
    lock: String,
    delta_res: String,
    delta_etags: String,
}

impl Namespace {
    fn res(&self, key: &str) -> String {
        format!("{}{}", self.res, key)
    }

    fn col(&self, key: &str) -> String {
        format!("{}{}", self.col, key)
    }

    fn lock(&self, key: &str) -> String {
        format!("{}{}", self.lock, key)
    }

    fn delta_res(&self, key: &str) -> String {
        format!("{}{}", self.delta_res, key)
    }

    fn delta_etags(&self, key: &str) -> String {
        format!("{}{}", self.delta_etags, key)
    }
}

pub(super) struct Procedure<'a> {
    space: &'a mut Keyspace,
    ns: Namespace,
    now: i64,
    verbose: bool,
}

fn argv(args: &[Vec<u8>], index: usize) -> Result<&[u8]> {
    args.get(index - 1)
        .map(Vec::as_slice)
        .ok_or_else(|| RestStoreError::InvalidRequest(format!("missing ARGV[{}]", index)))
}

fn argv_text(args: &[Vec<u8>], index: usize) -> Result<String> {
    let value = argv(args, index)?;
    String::from_utf8(value.to_vec())
        .map_err(|_| RestStoreError::InvalidRequest(format!("ARGV[{}] is not utf-8", index)))
}

fn argv_int(args: &[Vec<u8>], index: usize) -> Result<i64> {
    argv_text(args, index)?
        .parse()
        .map_err(|_| RestStoreError::InvalidRequest(format!("ARGV[{}] is not a number", index)))
}

fn split_key(key: &str) -> Option<(String, String)> {
    key.rsplit_once(':')
        .map(|(parent, name)| (parent.to_string(), name.to_string()))
}

fn merge_json(old: &[u8], new: &[u8]) -> Option<Vec<u8>> {
    let mut merged: serde_json::Value = serde_json::from_slice(old).ok()?;
    let update: serde_json::Value = serde_json::from_slice(new).ok()?;
    let (Some(target), serde_json::Value::Object(fields)) = (merged.as_object_mut(), update)
    else {
        return None;
    };
    for (field, value) in fields {
        target.insert(field, value);
    }
    serde_json::to_vec(&merged).ok()
}

impl<'a> Procedure<'a> {
    pub(super) fn new(space: &'a mut Keyspace, args: &[Vec<u8>], verbose: bool) -> Result<Self> {
        let ns = Namespace {
            res: argv_text(args, 1)?,
            col: argv_text(args, 2)?,
            expirable: argv_text(args, 3)?,
            lock: argv_text(args, 4)?,
            delta_res: argv_text(args, 5)?,
            delta_etags: argv_text(args, 6)?,
        };
        let now = argv_int(args, 7)?;
        space.expire_due(now);
        Ok(Self {
            space,
            ns,
            now,
            verbose,
        })
    }

    pub(super) fn run(
        &mut self,
        kind: ScriptKind,
        keys: &[String],
        args: &[Vec<u8>],
    ) -> Result<ScriptReply> {
        let key = keys.first().map(String::as_str).unwrap_or_default();
        match kind {
            ScriptKind::Get => self.get(key, args),
            ScriptKind::Put => self.put(key, args),
            ScriptKind::Delete => self.delete(key, args),
            ScriptKind::Expand => self.expand(key, args),
            ScriptKind::Cleanup => self.cleanup(args),
            ScriptKind::Lock => self.lock(key, args),
        }
    }

    fn notice(&self, message: impl FnOnce() -> String) {
        if self.verbose {
            tracing::trace!(target: "reststore::scripts", "{}", message());
        }
    }

    fn live_count(&self, col_key: &str) -> usize {
        self.space.zcount_above(col_key, self.now)
    }

    fn resource_live(&self, key: &str) -> bool {
        if !self.space.exists(&self.ns.res(key)) {
            return false;
        }
        let Some((parent, name)) = split_key(key) else {
            return false;
        };
        self.space
            .zscore(&self.ns.col(&parent), &name)
            .is_some_and(|score| score > self.now)
    }

    /// A collection is live while some resource below it is live. Scores on
    /// intermediate entries are only raised, so they can outlast the leaves.
    fn collection_live(&self, key: &str) -> bool {
        self.space
            .zrange_by_score(&self.ns.col(key), self.now, true, i64::MAX, None)
            .into_iter()
            .any(|name| {
                let child = format!("{}:{}", key, name);
                self.space.exists(&self.ns.res(&child)) || self.collection_live(&child)
            })
    }

    fn live_children(&self, key: &str) -> Vec<String> {
        let members = self
            .space
            .zrange_by_score(&self.ns.col(key), self.now, true, i64::MAX, None);
        let mut children = Vec::with_capacity(members.len());
        for name in members {
            let child = format!("{}:{}", key, name);
            if self.space.exists(&self.ns.res(&child)) {
                children.push(name);
            } else if self.collection_live(&child) {
                children.push(format!("{}:", name));
            }
        }
        children
    }

    fn foreign_lock_mode(&self, key: &str, owner: &str) -> Option<String> {
        let lock_key = self.ns.lock(key);
        let holder = self.space.hget_text(&lock_key, "owner")?;
        let expire_at = self
            .space
            .hget_text(&lock_key, "expireAt")
            .and_then(|value| value.parse::<i64>().ok());
        if expire_at.is_some_and(|expire_at| expire_at <= self.now) {
            return None;
        }
        if holder == owner {
            return None;
        }
        Some(
            self.space
                .hget_text(&lock_key, "mode")
                .unwrap_or_else(|| "silent".to_string()),
        )
    }

    fn drop_resource(&mut self, key: &str) {
        self.space.del(&self.ns.res(key));
        self.space.zrem(&self.ns.expirable, key);
        self.space.del(&self.ns.delta_res(key));
        self.space.del(&self.ns.delta_etags(key));
    }

    fn drop_subtree(&mut self, key: &str) {
        let col_key = self.ns.col(key);
        for name in self.space.zmembers(&col_key) {
            let child = format!("{}:{}", key, name);
            if self.space.exists(&self.ns.res(&child)) {
                self.drop_resource(&child);
                self.space.del(&self.ns.lock(&child));
            }
            if self.space.exists(&self.ns.col(&child)) {
                self.drop_subtree(&child);
            }
        }
        self.space.del(&col_key);
    }

    fn detach(&mut self, key: &str) {
        let Some((parent, name)) = split_key(key) else {
            return;
        };
        if !self.space.zrem(&self.ns.col(&parent), &name) {
            return;
        }
        let mut current = parent;
        while let Some((up, up_name)) = split_key(&current) {
            let col_key = self.ns.col(&current);
            if self.live_count(&col_key) == 0 {
                self.space.del(&col_key);
                if !self.space.zrem(&self.ns.col(&up), &up_name) {
                    return;
                }
            } else if let Some(top) = self.space.zmax_score(&col_key) {
                self.space.zadd_existing(&self.ns.col(&up), top, &up_name);
            }
            current = up;
        }
    }

    fn get(&mut self, key: &str, args: &[Vec<u8>]) -> Result<ScriptReply> {
        let etag = argv_text(args, 8)?;

        if self.resource_live(key) {
            let res_key = self.ns.res(key);
            let stored_etag = self.space.hget_text(&res_key, "etag").unwrap_or_default();
            if !etag.is_empty() && stored_etag == etag {
                self.notice(|| format!("get: not modified {}", key));
                return Ok(ScriptReply::bulk("notModified"));
            }
            let content = self.space.hget(&res_key, "resource").unwrap_or_default().to_vec();
            let compressed = if self.space.hget(&res_key, "compressed").is_some() {
                "1"
            } else {
                "0"
            };
            self.notice(|| format!("get: resource {}", key));
            return Ok(ScriptReply::Array(vec![
                ScriptReply::bulk("TYPE_RESOURCE"),
                ScriptReply::Bulk(content),
                ScriptReply::bulk(stored_etag),
                ScriptReply::bulk(compressed),
            ]));
        }

        if !self.space.exists(&self.ns.res(key)) {
            let children = self.live_children(key);
            if !children.is_empty() {
                self.notice(|| format!("get: collection {} children={}", key, children.len()));
                let mut reply = Vec::with_capacity(children.len() + 1);
                reply.push(ScriptReply::bulk("TYPE_COLLECTION"));
                reply.extend(children.into_iter().map(ScriptReply::bulk));
                return Ok(ScriptReply::Array(reply));
            }
        }

        self.notice(|| format!("get: not found {}", key));
        Ok(ScriptReply::bulk("notFound"))
    }

    fn put(&mut self, key: &str, args: &[Vec<u8>]) -> Result<ScriptReply> {
        let merge = argv_text(args, 8)?;
        let expire_at = argv_int(args, 9)?;
        let content = argv(args, 11)?.to_vec();
        let etag = argv_text(args, 12)?;
        let compressed = argv_text(args, 13)?;
        let lock_owner = argv_text(args, 14)?;
        let lock_mode = argv_text(args, 15)?;
        let lock_expire_at = argv_int(args, 16)?;
        let never = argv_int(args, 10)?;

        let segments: Vec<&str> = key.split(':').filter(|s| !s.is_empty()).collect();
        let mut ancestor = String::new();
        for segment in segments.iter().take(segments.len().saturating_sub(1)) {
            ancestor.push(':');
            ancestor.push_str(segment);
            if self.space.exists(&self.ns.res(&ancestor)) {
                if self.resource_live(&ancestor) {
                    self.notice(|| format!("put: ancestor is a resource {}", ancestor));
                    return Ok(ScriptReply::bulk(format!("existingResource {}", ancestor)));
                }
                self.drop_resource(&ancestor);
            }
        }

        let col_key = self.ns.col(key);
        if self.space.exists(&col_key) {
            if self.collection_live(key) {
                self.notice(|| format!("put: path is a collection {}", key));
                return Ok(ScriptReply::bulk("existingCollection"));
            }
            self.drop_subtree(key);
        }

        if let Some(mode) = self.foreign_lock_mode(key, &lock_owner) {
            self.notice(|| format!("put: locked {} mode={}", key, mode));
            return Ok(ScriptReply::bulk(mode));
        }

        let res_key = self.ns.res(key);
        let live = self.resource_live(key);
        if live {
            let stored_etag = self.space.hget_text(&res_key, "etag");
            let stored_compressed = if self.space.hget(&res_key, "compressed").is_some() {
                "true"
            } else {
                "false"
            };
            if stored_etag.as_deref() == Some(etag.as_str()) && stored_compressed == compressed {
                self.notice(|| format!("put: not modified {}", key));
                return Ok(ScriptReply::bulk("notModified"));
            }
        }

        let content = if merge == "true" && live {
            let stored = self.space.hget(&res_key, "resource").unwrap_or_default();
            match merge_json(stored, &content) {
                Some(merged) => merged,
                None => return Ok(ScriptReply::bulk("invalidMerge")),
            }
        } else {
            content
        };

        self.space.hset(&res_key, "resource", content);
        self.space.hset(&res_key, "etag", etag.as_str());
        if compressed == "true" {
            self.space.hset(&res_key, "compressed", "1");
        } else {
            self.space.hdel(&res_key, "compressed");
        }

        if expire_at == never {
            self.space.zrem(&self.ns.expirable, key);
        } else {
            self.space.zadd(&self.ns.expirable, expire_at, key);
        }

        if let Some((parent, name)) = split_key(key) {
            self.space.zadd(&self.ns.col(&parent), expire_at, &name);
            let mut current = parent;
            while let Some((up, up_name)) = split_key(&current) {
                let up_key = self.ns.col(&up);
                let raise = self
                    .space
                    .zscore(&up_key, &up_name)
                    .map_or(true, |score| score < expire_at);
                if raise {
                    self.space.zadd(&up_key, expire_at, &up_name);
                }
                current = up;
            }
        }

        if !lock_owner.is_empty() {
            let lock_key = self.ns.lock(key);
            self.space.hset(&lock_key, "owner", lock_owner.as_str());
            self.space.hset(&lock_key, "mode", lock_mode.as_str());
            self.space
                .hset(&lock_key, "expireAt", lock_expire_at.to_string());
            self.space.expire_at(&lock_key, lock_expire_at);
        }

        self.notice(|| format!("put: stored {} etag={}", key, etag));
        Ok(ScriptReply::bulk("OK"))
    }

    fn delete(&mut self, key: &str, args: &[Vec<u8>]) -> Result<ScriptReply> {
        let lock_owner = argv_text(args, 8)?;

        if self.resource_live(key) {
            if let Some(mode) = self.foreign_lock_mode(key, &lock_owner) {
                self.notice(|| format!("del: locked {} mode={}", key, mode));
                return Ok(ScriptReply::bulk(mode));
            }
            self.drop_resource(key);
            self.space.del(&self.ns.lock(key));
            self.detach(key);
            self.notice(|| format!("del: resource {}", key));
            return Ok(ScriptReply::bulk("deleted"));
        }

        if !self.space.exists(&self.ns.res(key)) && self.collection_live(key) {
            self.drop_subtree(key);
            self.space.del(&self.ns.lock(key));
            self.detach(key);
            self.notice(|| format!("del: collection {}", key));
            return Ok(ScriptReply::bulk("deleted"));
        }

        Ok(ScriptReply::bulk("notFound"))
    }

    fn expand(&mut self, key: &str, args: &[Vec<u8>]) -> Result<ScriptReply> {
        let mut results = Vec::new();

        for index in 8..=args.len() {
            let name = argv_text(args, index)?;
            if let Some(sub) = name.strip_suffix(':') {
                let child = format!("{}:{}", key, sub);
                if self.space.exists(&self.ns.res(&child)) {
                    continue;
                }
                let children = self.live_children(&child);
                if !children.is_empty() {
                    let mut entry = Vec::with_capacity(children.len() + 2);
                    entry.push(ScriptReply::bulk(sub));
                    entry.push(ScriptReply::bulk("collection"));
                    entry.extend(children.into_iter().map(ScriptReply::bulk));
                    results.push(ScriptReply::Array(entry));
                }
            } else {
                let child = format!("{}:{}", key, name);
                if self.resource_live(&child) {
                    let res_key = self.ns.res(&child);
                    if self.space.hget(&res_key, "compressed").is_some() {
                        self.notice(|| format!("expand: compressed resource {}", child));
                        return Ok(ScriptReply::bulk("compressionNotSupported"));
                    }
                    let content = self.space.hget(&res_key, "resource").unwrap_or_default().to_vec();
                    results.push(ScriptReply::Array(vec![
                        ScriptReply::bulk(name),
                        ScriptReply::bulk("resource"),
                        ScriptReply::Bulk(content),
                    ]));
                }
            }
        }

        self.notice(|| format!("expand: {} resolved={}", key, results.len()));
        if results.is_empty() {
            return Ok(ScriptReply::bulk("notFound"));
        }
        Ok(ScriptReply::Array(results))
    }

    fn cleanup(&mut self, args: &[Vec<u8>]) -> Result<ScriptReply> {
        let bulk_size = usize::try_from(argv_int(args, 8)?).unwrap_or(0);
        let expired =
            self.space
                .zrange_by_score(&self.ns.expirable, 0, false, self.now, Some(bulk_size));

        let mut cleaned = 0;
        for key in expired {
            self.drop_resource(&key);
            self.detach(&key);
            cleaned += 1;
        }

        self.notice(|| format!("cleanup: cleaned={}", cleaned));
        Ok(ScriptReply::Int(cleaned))
    }

    fn lock(&mut self, key: &str, args: &[Vec<u8>]) -> Result<ScriptReply> {
        let action = argv_text(args, 8)?;
        let owner = argv_text(args, 9)?;
        let mode = argv_text(args, 10)?;
        let expire_at = argv_int(args, 11)?;
        let lock_key = self.ns.lock(key);

        let holder = self.space.hget_text(&lock_key, "owner");
        let held = holder.is_some()
            && !self
                .space
                .hget_text(&lock_key, "expireAt")
                .and_then(|value| value.parse::<i64>().ok())
                .is_some_and(|deadline| deadline <= self.now);

        if let Some(holder) = holder.filter(|holder| held && *holder != owner) {
            let held_mode = self
                .space
                .hget_text(&lock_key, "mode")
                .unwrap_or_else(|| "silent".to_string());
            return Ok(ScriptReply::bulk(format!("held {} {}", held_mode, holder)));
        }

        match action.as_str() {
            "set" => {
                self.space.hset(&lock_key, "owner", owner.as_str());
                self.space.hset(&lock_key, "mode", mode.as_str());
                self.space.hset(&lock_key, "expireAt", expire_at.to_string());
                self.space.expire_at(&lock_key, expire_at);
                self.notice(|| format!("lock: set {} owner={}", key, owner));
                Ok(ScriptReply::bulk("owned"))
            }
            "clear" => {
                self.space.del(&lock_key);
                self.notice(|| format!("lock: cleared {}", key));
                Ok(ScriptReply::bulk("unlocked"))
            }
            _ if held => Ok(ScriptReply::bulk("owned")),
            _ => Ok(ScriptReply::bulk("unlocked")),
        }
    }
}
