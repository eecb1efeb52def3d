//! In-memory entity store for fast, deterministic testing.
//!
//! [`InMemoryEntityStore`] implements the full `EntityStore` contract, including
//! transactions with optimistic validation: a commit fails with
//! `StoreError::Conflict` when any document or prefix range the transaction read
//! changed in the meantime. That is the same guarantee a SERIALIZABLE database
//! gives, so the engine's capacity and uniqueness invariants can be exercised
//! under real concurrency without a database.
//!
//! Faults can be injected to drive the retry paths:
//!
//! - [`InMemoryEntityStore::with_latency`]: sleep before every operation so
//!   concurrent transactions interleave
//! - [`InMemoryEntityStore::fail_next_commits`]: force commit conflicts
//! - [`InMemoryEntityStore::set_unavailable`]: fail every call

use matchbook_core::store::{
    Document, DocumentKey, EntityStore, StoreError, StoreFuture, StoreTransaction, Version,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Clone, Debug)]
struct Stored {
    version: Version,
    body: serde_json::Value,
}

#[derive(Debug, Default)]
struct Inner {
    docs: BTreeMap<DocumentKey, Stored>,
    forced_conflicts: usize,
    unavailable: bool,
    commits: u64,
    conflicts: u64,
}

impl Inner {
    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable {
            return Err(StoreError::Unavailable("in-memory store offline".into()));
        }
        Ok(())
    }

    fn version_of(&self, key: &DocumentKey) -> Version {
        self.docs.get(key).map_or(Version::INITIAL, |s| s.version)
    }

    fn range(&self, collection: &str, id_prefix: &str) -> Vec<Document> {
        self.docs
            .range(DocumentKey::new(collection, id_prefix)..)
            .take_while(|(k, _)| k.collection() == collection && k.id().starts_with(id_prefix))
            .map(|(k, s)| Document {
                key: k.clone(),
                version: s.version,
                body: s.body.clone(),
            })
            .collect()
    }

    fn range_versions(&self, collection: &str, id_prefix: &str) -> Vec<(String, Version)> {
        self.docs
            .range(DocumentKey::new(collection, id_prefix)..)
            .take_while(|(k, _)| k.collection() == collection && k.id().starts_with(id_prefix))
            .map(|(k, s)| (k.id().to_string(), s.version))
            .collect()
    }
}

/// In-memory `EntityStore` with optimistic transactions.
///
/// Cloning is cheap and clones share the same data.
///
/// # Example
///
/// ```
/// use matchbook_core::store::{DocumentKey, EntityStore};
/// use matchbook_testing::InMemoryEntityStore;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryEntityStore::new();
/// let key = DocumentKey::new("matches", "m-1");
///
/// store.insert(&key, serde_json::json!({"name": "Friday"})).await?;
/// assert!(store.get(&key).await?.is_some());
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryEntityStore {
    inner: Arc<Mutex<Inner>>,
    latency: Option<Duration>,
}

impl InMemoryEntityStore {
    /// Create a new empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep for `latency` before every store operation.
    ///
    /// Concurrent transactions then overlap reliably, which turns capacity races
    /// into genuine commit conflicts.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Make the next `n` commits fail with `StoreError::Conflict`.
    pub fn fail_next_commits(&self, n: usize) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.forced_conflicts = n;
        }
    }

    /// Take the store offline (`true`) or bring it back (`false`).
    pub fn set_unavailable(&self, unavailable: bool) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.unavailable = unavailable;
        }
    }

    /// Number of successful commits.
    #[must_use]
    pub fn commit_count(&self) -> u64 {
        self.inner.lock().map_or(0, |inner| inner.commits)
    }

    /// Number of commits rejected with a conflict (forced or detected).
    #[must_use]
    pub fn conflict_count(&self) -> u64 {
        self.inner.lock().map_or(0, |inner| inner.conflicts)
    }

    /// Number of documents whose id starts with `id_prefix` in `collection`.
    #[must_use]
    pub fn count(&self, collection: &str, id_prefix: &str) -> usize {
        self.inner
            .lock()
            .map_or(0, |inner| inner.range_versions(collection, id_prefix).len())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        lock(&self.inner)
    }

    async fn pause(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

fn lock(inner: &Mutex<Inner>) -> Result<MutexGuard<'_, Inner>, StoreError> {
    inner
        .lock()
        .map_err(|_| StoreError::Unavailable("in-memory store lock poisoned".into()))
}

impl EntityStore for InMemoryEntityStore {
    fn get<'a>(&'a self, key: &'a DocumentKey) -> StoreFuture<'a, Option<Document>> {
        Box::pin(async move {
            self.pause().await;
            let inner = self.lock()?;
            inner.check_available()?;
            Ok(inner.docs.get(key).map(|s| Document {
                key: key.clone(),
                version: s.version,
                body: s.body.clone(),
            }))
        })
    }

    fn scan<'a>(&'a self, collection: &'a str, id_prefix: &'a str) -> StoreFuture<'a, Vec<Document>> {
        Box::pin(async move {
            self.pause().await;
            let inner = self.lock()?;
            inner.check_available()?;
            Ok(inner.range(collection, id_prefix))
        })
    }

    fn insert<'a>(&'a self, key: &'a DocumentKey, body: serde_json::Value) -> StoreFuture<'a, Version> {
        Box::pin(async move {
            self.pause().await;
            let mut inner = self.lock()?;
            inner.check_available()?;
            if inner.docs.contains_key(key) {
                return Err(StoreError::AlreadyExists(key.clone()));
            }
            let version = Version::INITIAL.next();
            inner.docs.insert(key.clone(), Stored { version, body });
            Ok(version)
        })
    }

    fn put<'a>(&'a self, key: &'a DocumentKey, body: serde_json::Value) -> StoreFuture<'a, Version> {
        Box::pin(async move {
            self.pause().await;
            let mut inner = self.lock()?;
            inner.check_available()?;
            let version = inner.version_of(key).next();
            inner.docs.insert(key.clone(), Stored { version, body });
            Ok(version)
        })
    }

    fn compare_and_swap<'a>(
        &'a self,
        key: &'a DocumentKey,
        expected: Version,
        body: serde_json::Value,
    ) -> StoreFuture<'a, Version> {
        Box::pin(async move {
            self.pause().await;
            let mut inner = self.lock()?;
            inner.check_available()?;
            let Some(stored) = inner.docs.get_mut(key) else {
                return Err(StoreError::NotFound(key.clone()));
            };
            if stored.version != expected {
                return Err(StoreError::VersionConflict {
                    key: key.clone(),
                    expected,
                    actual: stored.version,
                });
            }
            stored.version = expected.next();
            stored.body = body;
            Ok(stored.version)
        })
    }

    fn begin(&self) -> StoreFuture<'_, Box<dyn StoreTransaction>> {
        Box::pin(async move {
            self.pause().await;
            self.lock()?.check_available()?;
            let tx: Box<dyn StoreTransaction> = Box::new(InMemoryTransaction {
                inner: Arc::clone(&self.inner),
                latency: self.latency,
                reads: HashMap::new(),
                ranges: Vec::new(),
                writes: BTreeMap::new(),
            });
            Ok(tx)
        })
    }
}

/// Pending write: `Some` replaces the document, `None` deletes it.
type PendingWrite = Option<(Version, serde_json::Value)>;

struct ObservedRange {
    collection: String,
    id_prefix: String,
    versions: Vec<(String, Version)>,
}

struct InMemoryTransaction {
    inner: Arc<Mutex<Inner>>,
    latency: Option<Duration>,
    /// First observed version of every key read (`INITIAL` when absent)
    reads: HashMap<DocumentKey, Version>,
    ranges: Vec<ObservedRange>,
    writes: BTreeMap<DocumentKey, PendingWrite>,
}

impl InMemoryTransaction {
    async fn pause(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    /// Version visible to this transaction, recording committed reads.
    fn visible_version(&mut self, key: &DocumentKey) -> Result<Option<Version>, StoreError> {
        if let Some(pending) = self.writes.get(key) {
            return Ok(pending.as_ref().map(|(v, _)| *v));
        }
        let committed = {
            let inner = lock(&self.inner)?;
            inner.check_available()?;
            inner.docs.get(key).map(|s| s.version)
        };
        self.reads
            .entry(key.clone())
            .or_insert(committed.unwrap_or(Version::INITIAL));
        Ok(committed)
    }
}

impl StoreTransaction for InMemoryTransaction {
    fn get<'a>(&'a mut self, key: &'a DocumentKey) -> StoreFuture<'a, Option<Document>> {
        Box::pin(async move {
            self.pause().await;
            if let Some(pending) = self.writes.get(key) {
                return Ok(pending.as_ref().map(|(version, body)| Document {
                    key: key.clone(),
                    version: *version,
                    body: body.clone(),
                }));
            }
            let committed = {
                let inner = lock(&self.inner)?;
                inner.check_available()?;
                inner.docs.get(key).cloned()
            };
            self.reads.entry(key.clone()).or_insert(
                committed
                    .as_ref()
                    .map_or(Version::INITIAL, |s| s.version),
            );
            Ok(committed.map(|s| Document {
                key: key.clone(),
                version: s.version,
                body: s.body,
            }))
        })
    }

    fn scan<'a>(
        &'a mut self,
        collection: &'a str,
        id_prefix: &'a str,
    ) -> StoreFuture<'a, Vec<Document>> {
        Box::pin(async move {
            self.pause().await;
            let committed = {
                let inner = lock(&self.inner)?;
                inner.check_available()?;
                inner.range(collection, id_prefix)
            };
            self.ranges.push(ObservedRange {
                collection: collection.to_string(),
                id_prefix: id_prefix.to_string(),
                versions: committed
                    .iter()
                    .map(|d| (d.key.id().to_string(), d.version))
                    .collect(),
            });

            let mut merged: BTreeMap<DocumentKey, Document> =
                committed.into_iter().map(|d| (d.key.clone(), d)).collect();
            for (key, pending) in &self.writes {
                if key.collection() != collection || !key.id().starts_with(id_prefix) {
                    continue;
                }
                match pending {
                    Some((version, body)) => {
                        merged.insert(
                            key.clone(),
                            Document {
                                key: key.clone(),
                                version: *version,
                                body: body.clone(),
                            },
                        );
                    }
                    None => {
                        merged.remove(key);
                    }
                }
            }
            Ok(merged.into_values().collect())
        })
    }

    fn insert<'a>(&'a mut self, key: &'a DocumentKey, body: serde_json::Value) -> StoreFuture<'a, Version> {
        Box::pin(async move {
            self.pause().await;
            if self.visible_version(key)?.is_some() {
                return Err(StoreError::AlreadyExists(key.clone()));
            }
            let base = self.reads.get(key).copied().unwrap_or(Version::INITIAL);
            let version = base.next();
            self.writes.insert(key.clone(), Some((version, body)));
            Ok(version)
        })
    }

    fn update<'a>(
        &'a mut self,
        key: &'a DocumentKey,
        expected: Version,
        body: serde_json::Value,
    ) -> StoreFuture<'a, Version> {
        Box::pin(async move {
            self.pause().await;
            let Some(actual) = self.visible_version(key)? else {
                return Err(StoreError::NotFound(key.clone()));
            };
            if actual != expected {
                return Err(StoreError::VersionConflict {
                    key: key.clone(),
                    expected,
                    actual,
                });
            }
            let version = expected.next();
            self.writes.insert(key.clone(), Some((version, body)));
            Ok(version)
        })
    }

    fn delete<'a>(&'a mut self, key: &'a DocumentKey, expected: Version) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.pause().await;
            let Some(actual) = self.visible_version(key)? else {
                return Err(StoreError::NotFound(key.clone()));
            };
            if actual != expected {
                return Err(StoreError::VersionConflict {
                    key: key.clone(),
                    expected,
                    actual,
                });
            }
            self.writes.insert(key.clone(), None);
            Ok(())
        })
    }

    fn commit(self: Box<Self>) -> StoreFuture<'static, ()> {
        let Self {
            inner: shared,
            latency,
            reads,
            ranges,
            writes,
        } = *self;
        Box::pin(async move {
            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }
            let mut inner = lock(&shared)?;
            inner.check_available()?;

            if inner.forced_conflicts > 0 {
                inner.forced_conflicts -= 1;
                inner.conflicts += 1;
                return Err(StoreError::Conflict("injected commit conflict".into()));
            }

            for (key, observed) in &reads {
                if inner.version_of(key) != *observed {
                    inner.conflicts += 1;
                    return Err(StoreError::Conflict(format!("{key} changed since read")));
                }
            }
            for range in &ranges {
                if inner.range_versions(&range.collection, &range.id_prefix) != range.versions {
                    inner.conflicts += 1;
                    return Err(StoreError::Conflict(format!(
                        "range {}/{}* changed since read",
                        range.collection, range.id_prefix
                    )));
                }
            }

            for (key, pending) in writes {
                match pending {
                    Some((version, body)) => {
                        inner.docs.insert(key, Stored { version, body });
                    }
                    None => {
                        inner.docs.remove(&key);
                    }
                }
            }
            inner.commits += 1;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key(id: &str) -> DocumentKey {
        DocumentKey::new("memberships", id)
    }

    #[tokio::test]
    async fn insert_rejects_duplicates() {
        let store = InMemoryEntityStore::new();
        assert_eq!(store.insert(&key("m/a"), json!({})).await, Ok(Version::new(1)));
        assert_eq!(
            store.insert(&key("m/a"), json!({})).await,
            Err(StoreError::AlreadyExists(key("m/a")))
        );
    }

    #[tokio::test]
    async fn compare_and_swap_checks_version() {
        let store = InMemoryEntityStore::new();
        let v1 = store.insert(&key("m/a"), json!({"n": 1})).await.unwrap();
        let v2 = store.compare_and_swap(&key("m/a"), v1, json!({"n": 2})).await.unwrap();
        assert_eq!(v2, Version::new(2));

        let stale = store.compare_and_swap(&key("m/a"), v1, json!({"n": 3})).await;
        assert!(matches!(stale, Err(StoreError::VersionConflict { .. })));
    }

    #[tokio::test]
    async fn scan_is_prefix_bounded_and_ordered() {
        let store = InMemoryEntityStore::new();
        store.insert(&key("m1/b"), json!({})).await.unwrap();
        store.insert(&key("m1/a"), json!({})).await.unwrap();
        store.insert(&key("m2/a"), json!({})).await.unwrap();
        store
            .insert(&DocumentKey::new("matches", "m1"), json!({}))
            .await
            .unwrap();

        let docs = store.scan("memberships", "m1/").await.unwrap();
        let ids: Vec<_> = docs.iter().map(|d| d.key.id().to_string()).collect();
        assert_eq!(ids, vec!["m1/a", "m1/b"]);
        assert_eq!(store.scan("memberships", "").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn transaction_reads_its_own_writes() {
        let store = InMemoryEntityStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.insert(&key("m/a"), json!({"x": 1})).await.unwrap();

        assert!(tx.get(&key("m/a")).await.unwrap().is_some());
        assert_eq!(tx.scan("memberships", "m/").await.unwrap().len(), 1);
        assert!(store.get(&key("m/a")).await.unwrap().is_none());

        tx.commit().await.unwrap();
        assert!(store.get(&key("m/a")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn concurrent_insert_into_scanned_range_conflicts() {
        let store = InMemoryEntityStore::new();

        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();
        assert!(first.scan("memberships", "m/").await.unwrap().is_empty());
        assert!(second.scan("memberships", "m/").await.unwrap().is_empty());

        first.insert(&key("m/a"), json!({})).await.unwrap();
        second.insert(&key("m/b"), json!({})).await.unwrap();

        first.commit().await.unwrap();
        let result = second.commit().await;
        assert!(matches!(result, Err(StoreError::Conflict(_))));
        assert_eq!(store.count("memberships", "m/"), 1);
        assert_eq!(store.conflict_count(), 1);
    }

    #[tokio::test]
    async fn concurrent_update_of_read_document_conflicts() {
        let store = InMemoryEntityStore::new();
        let doc = DocumentKey::new("matches", "m");
        store.insert(&doc, json!({"status": "Open"})).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let read = tx.get(&doc).await.unwrap().unwrap();
        tx.insert(&key("m/a"), json!({})).await.unwrap();
        store
            .compare_and_swap(&doc, read.version, json!({"status": "Cancelled"}))
            .await
            .unwrap();

        // The stale version is visible to later writes in the same transaction
        let stale = tx.update(&doc, read.version, json!({"status": "Full"})).await;
        assert!(matches!(stale, Err(StoreError::VersionConflict { .. })));

        assert!(matches!(tx.commit().await, Err(StoreError::Conflict(_))));
        let stored = store.get(&doc).await.unwrap().unwrap();
        assert_eq!(stored.body["status"], "Cancelled");
        assert_eq!(store.count("memberships", ""), 0);
    }

    #[tokio::test]
    async fn delete_removes_document_on_commit() {
        let store = InMemoryEntityStore::new();
        let v = store.insert(&key("u"), json!({})).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.delete(&key("u"), v).await.unwrap();
        assert!(tx.get(&key("u")).await.unwrap().is_none());
        tx.commit().await.unwrap();

        assert!(store.get(&key("u")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn dropped_transaction_writes_nothing() {
        let store = InMemoryEntityStore::new();
        {
            let mut tx = store.begin().await.unwrap();
            tx.insert(&key("m/a"), json!({})).await.unwrap();
        }
        assert_eq!(store.count("memberships", ""), 0);
    }

    #[tokio::test]
    async fn injected_faults() {
        let store = InMemoryEntityStore::new();
        store.fail_next_commits(1);

        let tx = store.begin().await.unwrap();
        assert!(matches!(tx.commit().await, Err(StoreError::Conflict(_))));
        let tx = store.begin().await.unwrap();
        assert!(tx.commit().await.is_ok());

        store.set_unavailable(true);
        assert!(matches!(
            store.get(&key("x")).await,
            Err(StoreError::Unavailable(_))
        ));
        store.set_unavailable(false);
        assert!(store.get(&key("x")).await.is_ok());
    }
}
