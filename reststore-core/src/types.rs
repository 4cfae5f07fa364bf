use bytes::Bytes;
use std::time::Duration;

/// Score of resources that never expire. Sorts above any real timestamp.
pub const NEVER_EXPIRE: i64 = 9_999_999_999_999;

/// Milliseconds in `duration`, saturating at `i64::MAX`.
pub fn duration_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    Never,
    At(i64),
}

impl Expiry {
    pub fn after(now_millis: i64, ttl: Option<Duration>) -> Self {
        match ttl {
            Some(ttl) => Expiry::At(now_millis.saturating_add(duration_millis(ttl))),
            None => Expiry::Never,
        }
    }

    pub fn score(&self) -> i64 {
        match self {
            Expiry::Never => NEVER_EXPIRE,
            Expiry::At(millis) => (*millis).min(NEVER_EXPIRE),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EntryKind {
    Collection,
    Resource,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionEntry {
    pub name: String,
    pub kind: EntryKind,
}

impl CollectionEntry {
    pub fn collection(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::Collection,
        }
    }

    pub fn resource(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::Resource,
        }
    }

    /// Name as shown to clients: sub-collections end with `/`.
    pub fn display_name(&self) -> String {
        match self.kind {
            EntryKind::Collection => format!("{}/", self.name),
            EntryKind::Resource => self.name.clone(),
        }
    }
}

/// Sub-collections first, each group in lexicographic order.
pub fn sort_entries(entries: &mut [CollectionEntry]) {
    entries.sort_by(|a, b| a.kind.cmp(&b.kind).then_with(|| a.name.cmp(&b.name)));
}

/// Offset/limit applied to a sorted listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListWindow {
    pub offset: i64,
    pub limit: i64,
}

impl Default for ListWindow {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: -1,
        }
    }
}

impl ListWindow {
    pub fn new(offset: i64, limit: i64) -> Self {
        Self { offset, limit }
    }

    /// A window reaching past the end of the listing yields the whole
    /// listing.
    pub fn apply<T>(&self, items: Vec<T>) -> Vec<T> {
        let len = items.len();
        let offset = self.offset.max(0) as usize;
        let limit = self.limit.max(-1);

        if offset >= len {
            return items;
        }
        if limit == -1 {
            return items.into_iter().skip(offset).collect();
        }
        let limit = limit as usize;
        if offset + limit > len {
            return items;
        }
        items.into_iter().skip(offset).take(limit).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredResource {
    pub content: Bytes,
    pub etag: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(entries: &[CollectionEntry]) -> Vec<String> {
        entries.iter().map(CollectionEntry::display_name).collect()
    }

    #[test]
    fn huge_ttl_saturates_to_never_expire() {
        let now = 1_700_000_000_000;
        let expiry = Expiry::after(now, Some(Duration::from_secs(18_446_744_073_709_551)));
        assert_eq!(expiry, Expiry::At(i64::MAX));
        assert_eq!(expiry.score(), NEVER_EXPIRE);
        assert_eq!(
            Expiry::after(now, Some(Duration::from_secs(60))).score(),
            now + 60_000
        );
    }

    #[test]
    fn collections_sort_before_resources() {
        let mut entries = vec![
            CollectionEntry::resource("b"),
            CollectionEntry::collection("z"),
            CollectionEntry::resource("a"),
            CollectionEntry::collection("c"),
        ];
        sort_entries(&mut entries);
        assert_eq!(names(&entries), vec!["c/", "z/", "a", "b"]);
    }

    #[test]
    fn window_selects_slice() {
        let items = vec![1, 2, 3, 4, 5];
        assert_eq!(ListWindow::new(1, 2).apply(items.clone()), vec![2, 3]);
        assert_eq!(ListWindow::new(2, -1).apply(items.clone()), vec![3, 4, 5]);
        assert_eq!(ListWindow::new(0, 0).apply(items.clone()), Vec::<i32>::new());
    }

    #[test]
    fn window_clamps_and_falls_back() {
        let items = vec![1, 2, 3];
        assert_eq!(ListWindow::new(-4, 2).apply(items.clone()), vec![1, 2]);
        assert_eq!(ListWindow::new(1, -7).apply(items.clone()), vec![2, 3]);
        assert_eq!(ListWindow::new(2, 5).apply(items.clone()), vec![1, 2, 3]);
        assert_eq!(ListWindow::new(9, 1).apply(items.clone()), vec![1, 2, 3]);
    }

    #[test]
    fn expiry_scores() {
        assert_eq!(Expiry::Never.score(), NEVER_EXPIRE);
        assert_eq!(
            Expiry::after(1_000, Some(Duration::from_secs(2))),
            Expiry::At(3_000)
        );
        assert_eq!(Expiry::after(1_000, None), Expiry::Never);
    }
}
