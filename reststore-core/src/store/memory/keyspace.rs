use std::collections::HashMap;

/// Minimal data-structure server state: hashes, sorted sets and per-key
/// deadlines. Empty collections disappear the way Redis drops empty keys.
#[derive(Debug, Default)]
pub(crate) struct Keyspace {
    hashes: HashMap<String, HashMap<String, Vec<u8>>>,
    sorted_sets: HashMap<String, SortedSet>,
    deadlines: HashMap<String, i64>,
}

#[derive(Debug, Default)]
pub(crate) struct SortedSet {
    scores: HashMap<String, i64>,
}

impl SortedSet {
    fn ordered(&self) -> Vec<(&String, i64)> {
        let mut entries: Vec<(&String, i64)> = self
            .scores
            .iter()
            .map(|(member, score)| (member, *score))
            .collect();
        entries.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(b.0)));
        entries
    }
}

impl Keyspace {
    /// Drops keys whose deadline has passed.
    pub(crate) fn expire_due(&mut self, now: i64) {
        let due: Vec<String> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(key, _)| key.clone())
            .collect();
        for key in due {
            self.del(&key);
        }
    }

    pub(crate) fn exists(&self, key: &str) -> bool {
        self.hashes.contains_key(key) || self.sorted_sets.contains_key(key)
    }

    pub(crate) fn del(&mut self, key: &str) {
        self.hashes.remove(key);
        self.sorted_sets.remove(key);
        self.deadlines.remove(key);
    }

    pub(crate) fn expire_at(&mut self, key: &str, deadline: i64) {
        if self.exists(key) {
            self.deadlines.insert(key.to_string(), deadline);
        }
    }

    pub(crate) fn hget(&self, key: &str, field: &str) -> Option<&[u8]> {
        self.hashes
            .get(key)
            .and_then(|hash| hash.get(field))
            .map(Vec::as_slice)
    }

    pub(crate) fn hget_text(&self, key: &str, field: &str) -> Option<String> {
        self.hget(key, field)
            .map(|value| String::from_utf8_lossy(value).into_owned())
    }

    pub(crate) fn hset(&mut self, key: &str, field: &str, value: impl Into<Vec<u8>>) {
        self.hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.into());
    }

    pub(crate) fn hdel(&mut self, key: &str, field: &str) {
        if let Some(hash) = self.hashes.get_mut(key) {
            hash.remove(field);
            if hash.is_empty() {
                self.del(key);
            }
        }
    }

    pub(crate) fn zadd(&mut self, key: &str, score: i64, member: &str) {
        self.sorted_sets
            .entry(key.to_string())
            .or_default()
            .scores
            .insert(member.to_string(), score);
    }

    /// `ZADD XX`: only updates members that are already present.
    pub(crate) fn zadd_existing(&mut self, key: &str, score: i64, member: &str) {
        if let Some(set) = self.sorted_sets.get_mut(key) {
            if let Some(current) = set.scores.get_mut(member) {
                *current = score;
            }
        }
    }

    pub(crate) fn zrem(&mut self, key: &str, member: &str) -> bool {
        let Some(set) = self.sorted_sets.get_mut(key) else {
            return false;
        };
        let removed = set.scores.remove(member).is_some();
        if set.scores.is_empty() {
            self.del(key);
        }
        removed
    }

    pub(crate) fn zscore(&self, key: &str, member: &str) -> Option<i64> {
        self.sorted_sets
            .get(key)
            .and_then(|set| set.scores.get(member).copied())
    }

    /// Members with a score strictly above `min`.
    pub(crate) fn zcount_above(&self, key: &str, min: i64) -> usize {
        self.sorted_sets
            .get(key)
            .map(|set| set.scores.values().filter(|score| **score > min).count())
            .unwrap_or(0)
    }

    pub(crate) fn zcount_between(&self, key: &str, min: i64, max: i64) -> usize {
        self.sorted_sets
            .get(key)
            .map(|set| {
                set.scores
                    .values()
                    .filter(|score| **score >= min && **score <= max)
                    .count()
            })
            .unwrap_or(0)
    }

    /// Members in score order, `min < score` when `exclusive_min`.
    pub(crate) fn zrange_by_score(
        &self,
        key: &str,
        min: i64,
        exclusive_min: bool,
        max: i64,
        limit: Option<usize>,
    ) -> Vec<String> {
        let Some(set) = self.sorted_sets.get(key) else {
            return Vec::new();
        };
        set.ordered()
            .into_iter()
            .filter(|(_, score)| {
                let above = if exclusive_min {
                    *score > min
                } else {
                    *score >= min
                };
                above && *score <= max
            })
            .take(limit.unwrap_or(usize::MAX))
            .map(|(member, _)| member.clone())
            .collect()
    }

    pub(crate) fn zmembers(&self, key: &str) -> Vec<String> {
        self.sorted_sets
            .get(key)
            .map(|set| {
                set.ordered()
                    .into_iter()
                    .map(|(member, _)| member.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub(crate) fn zmax_score(&self, key: &str) -> Option<i64> {
        self.sorted_sets
            .get(key)
            .and_then(|set| set.ordered().last().map(|(_, score)| *score))
    }
}
