//! Entity store contract consumed by the reservation engine.
//!
//! The engine never owns storage. It talks to an abstract document store keyed by
//! collection + id, where every document carries a monotonic [`Version`] used for
//! optimistic concurrency control.
//!
//! # Design
//!
//! The contract has two layers:
//!
//! - [`EntityStore`]: single-document operations (get, scan, conditional insert,
//!   unconditional put, compare-and-swap) plus [`EntityStore::begin`]
//! - [`StoreTransaction`]: a read-modify-write scope over several documents that
//!   either commits atomically or fails with [`StoreError::Conflict`]
//!
//! A transaction must detect any change to a document *or prefix range* it read
//! between the read and the commit. Counting the membership rows of a match is a
//! prefix scan, so "count, compare, insert" inside one transaction cannot admit
//! more members than the capacity allows.
//!
//! # Implementations
//!
//! - `PostgresEntityStore` (in `matchbook-postgres`): SERIALIZABLE transactions
//! - `InMemoryEntityStore` (in `matchbook-testing`): fast, deterministic tests
//!
//! # Example
//!
//! ```no_run
//! use matchbook_core::store::{DocumentKey, EntityStore, StoreError};
//!
//! async fn example(store: &dyn EntityStore) -> Result<(), StoreError> {
//!     let key = DocumentKey::new("matches", "m-1");
//!
//!     let mut tx = store.begin().await?;
//!     if let Some(doc) = tx.get(&key).await? {
//!         tx.update(&key, doc.version, serde_json::json!({"status": "Full"})).await?;
//!     }
//!     tx.commit().await?;
//!     Ok(())
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Boxed future returned by store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Address of a document: collection name plus id within that collection.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocumentKey {
    collection: String,
    id: String,
}

impl DocumentKey {
    /// Create a key for `id` inside `collection`.
    ///
    /// # Examples
    ///
    /// ```
    /// use matchbook_core::store::DocumentKey;
    ///
    /// let key = DocumentKey::new("matches", "abc");
    /// assert_eq!(key.collection(), "matches");
    /// assert_eq!(key.id(), "abc");
    /// ```
    #[must_use]
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
        }
    }

    /// The collection this document lives in.
    #[must_use]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// The id of the document within its collection.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

/// Document version number for optimistic concurrency control.
///
/// The first write of a document produces version 1; every successful update
/// increments it by one. [`Version::INITIAL`] (0) means "never written".
///
/// # Examples
///
/// ```
/// use matchbook_core::store::Version;
///
/// let v1 = Version::INITIAL.next();
/// assert_eq!(v1, Version::new(1));
/// assert_eq!(v1.value(), 1);
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version(u64);

impl Version {
    /// Version of a document that does not exist yet.
    pub const INITIAL: Self = Self(0);

    /// Create a new `Version` with the given value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the version number.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Get the next version (current + 1).
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Version {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// A stored document: key, current version and JSON body.
#[derive(Clone, Debug, PartialEq)]
pub struct Document {
    /// Where the document lives.
    pub key: DocumentKey,
    /// Version of the stored body.
    pub version: Version,
    /// The document body.
    pub body: serde_json::Value,
}

/// Errors that can occur during entity store operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A conditional insert found the key already present.
    ///
    /// This is a genuine duplicate, not a race: retrying the same insert will fail
    /// the same way.
    #[error("Document already exists: {0}")]
    AlreadyExists(DocumentKey),

    /// Optimistic concurrency conflict on a single document.
    #[error("Version conflict on {key}: expected version {expected}, found {actual}")]
    VersionConflict {
        /// The document where the conflict occurred.
        key: DocumentKey,
        /// The version the caller expected.
        expected: Version,
        /// The version actually stored (`0` if the document is gone).
        actual: Version,
    },

    /// The document addressed by a conditional write does not exist.
    #[error("Document not found: {0}")]
    NotFound(DocumentKey),

    /// A transaction could not commit because something it read was changed by
    /// a concurrent writer.
    #[error("Transaction conflict: {0}")]
    Conflict(String),

    /// The store could not be reached or failed internally.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A document body could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Whether the error is a concurrency signal that a fresh attempt may resolve.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_) | Self::VersionConflict { .. })
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Abstract transactional document store.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; the engine shares one store across all
/// request handlers through `Arc<dyn EntityStore>`.
///
/// # Dyn Compatibility
///
/// Methods return [`StoreFuture`] instead of using `async fn` so the trait can be
/// used as a trait object.
pub trait EntityStore: Send + Sync {
    /// Read one document.
    ///
    /// Returns `Ok(None)` when the document does not exist.
    ///
    /// # Errors
    ///
    /// - `Unavailable`: store unreachable
    fn get<'a>(&'a self, key: &'a DocumentKey) -> StoreFuture<'a, Option<Document>>;

    /// Read every document of `collection` whose id starts with `id_prefix`,
    /// ordered by id. An empty prefix returns the whole collection.
    ///
    /// # Errors
    ///
    /// - `Unavailable`: store unreachable
    fn scan<'a>(&'a self, collection: &'a str, id_prefix: &'a str) -> StoreFuture<'a, Vec<Document>>;

    /// Insert a document that must not exist yet.
    ///
    /// Returns the version of the new document (always 1).
    ///
    /// # Errors
    ///
    /// - `AlreadyExists`: the key is taken
    /// - `Unavailable`: store unreachable
    fn insert<'a>(&'a self, key: &'a DocumentKey, body: serde_json::Value) -> StoreFuture<'a, Version>;

    /// Write a document unconditionally, creating or replacing it.
    ///
    /// # Errors
    ///
    /// - `Unavailable`: store unreachable
    fn put<'a>(&'a self, key: &'a DocumentKey, body: serde_json::Value) -> StoreFuture<'a, Version>;

    /// Replace a document only if its stored version equals `expected`.
    ///
    /// Returns the new version.
    ///
    /// # Errors
    ///
    /// - `VersionConflict`: stored version differs from `expected`
    /// - `NotFound`: document does not exist
    /// - `Unavailable`: store unreachable
    fn compare_and_swap<'a>(
        &'a self,
        key: &'a DocumentKey,
        expected: Version,
        body: serde_json::Value,
    ) -> StoreFuture<'a, Version>;

    /// Start a read-modify-write transaction.
    ///
    /// # Errors
    ///
    /// - `Unavailable`: store unreachable
    fn begin(&self) -> StoreFuture<'_, Box<dyn StoreTransaction>>;
}

/// A transactional read-modify-write scope.
///
/// Reads observe committed data plus this transaction's own pending writes. Writes
/// become visible to others only when [`StoreTransaction::commit`] succeeds.
/// Dropping the transaction without committing discards every pending write.
pub trait StoreTransaction: Send {
    /// Read one document and record it for conflict detection.
    ///
    /// # Errors
    ///
    /// - `Unavailable`: store unreachable
    fn get<'a>(&'a mut self, key: &'a DocumentKey) -> StoreFuture<'a, Option<Document>>;

    /// Read a prefix range and record it for conflict detection, so a concurrent
    /// insert into the range makes this transaction fail to commit.
    ///
    /// # Errors
    ///
    /// - `Unavailable`: store unreachable
    fn scan<'a>(
        &'a mut self,
        collection: &'a str,
        id_prefix: &'a str,
    ) -> StoreFuture<'a, Vec<Document>>;

    /// Insert a document that must not exist.
    ///
    /// # Errors
    ///
    /// - `AlreadyExists`: the key is visible to this transaction
    /// - `Unavailable`: store unreachable
    fn insert<'a>(&'a mut self, key: &'a DocumentKey, body: serde_json::Value) -> StoreFuture<'a, Version>;

    /// Replace a document whose version must equal `expected`.
    ///
    /// # Errors
    ///
    /// - `VersionConflict`: visible version differs from `expected`
    /// - `NotFound`: document does not exist
    /// - `Unavailable`: store unreachable
    fn update<'a>(
        &'a mut self,
        key: &'a DocumentKey,
        expected: Version,
        body: serde_json::Value,
    ) -> StoreFuture<'a, Version>;

    /// Delete a document whose version must equal `expected`.
    ///
    /// # Errors
    ///
    /// - `VersionConflict`: visible version differs from `expected`
    /// - `NotFound`: document does not exist
    /// - `Unavailable`: store unreachable
    fn delete<'a>(&'a mut self, key: &'a DocumentKey, expected: Version) -> StoreFuture<'a, ()>;

    /// Atomically apply every pending write.
    ///
    /// # Errors
    ///
    /// - `Conflict`: a document or range read by this transaction changed
    /// - `Unavailable`: store unreachable
    fn commit(self: Box<Self>) -> StoreFuture<'static, ()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_conflict_error_display() {
        let error = StoreError::VersionConflict {
            key: DocumentKey::new("matches", "m-1"),
            expected: Version::new(5),
            actual: Version::new(7),
        };

        let display = format!("{error}");
        assert!(display.contains("matches/m-1"));
        assert!(display.contains("expected version 5"));
        assert!(display.contains("found 7"));
    }

    #[test]
    fn only_concurrency_signals_are_retryable() {
        let key = DocumentKey::new("memberships", "m/u");
        assert!(StoreError::Conflict("range changed".into()).is_retryable());
        assert!(
            StoreError::VersionConflict {
                key: key.clone(),
                expected: Version::new(1),
                actual: Version::new(2),
            }
            .is_retryable()
        );
        assert!(!StoreError::AlreadyExists(key.clone()).is_retryable());
        assert!(!StoreError::NotFound(key).is_retryable());
        assert!(!StoreError::Unavailable("down".into()).is_retryable());
    }

    #[test]
    fn version_ordering_and_next() {
        assert!(Version::INITIAL < Version::new(1));
        assert_eq!(Version::new(41).next(), Version::new(42));
        assert_eq!(format!("{}", Version::new(3)), "3");
    }
}
