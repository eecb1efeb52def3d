//! Collaborators injected into the engine.
//!
//! All external dependencies other than the entity store are abstracted behind
//! traits so production wiring and tests can swap them.

use crate::store::StoreFuture;
use crate::types::{FieldId, FieldSummary};
use chrono::{DateTime, Utc};

/// Clock trait - abstracts time operations for testability
///
/// # Examples
///
/// ```ignore
/// // Production - uses system clock
/// let clock = SystemClock;
///
/// // Test - fixed time for deterministic tests
/// let clock = matchbook_testing::test_clock();
/// ```
pub trait Clock: Send + Sync {
    /// Get the current time
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Read access to the external field catalogue.
///
/// Fields are not owned by the engine; it only needs their display data.
pub trait FieldDirectory: Send + Sync {
    /// Look up a field. Returns `Ok(None)` when the field is unknown.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Unavailable` when the catalogue cannot be reached.
    fn field_summary<'a>(&'a self, field_id: &'a FieldId) -> StoreFuture<'a, Option<FieldSummary>>;
}
