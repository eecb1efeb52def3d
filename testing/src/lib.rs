//! # Matchbook Testing
//!
//! Testing utilities and helpers for the Matchbook reservation engine.
//!
//! This crate provides:
//! - [`InMemoryEntityStore`]: the full store contract with optimistic transactions
//!   and fault injection
//! - [`InMemoryFieldDirectory`]: a field catalogue with sample fields
//! - Deterministic clocks ([`FixedClock`], [`ManualClock`])
//! - [`init_tracing`] and input fixtures
//!
//! ## Example
//!
//! ```ignore
//! use matchbook_testing::{InMemoryEntityStore, InMemoryFieldDirectory, test_clock};
//!
//! #[tokio::test]
//! async fn join_flow() {
//!     let store = Arc::new(InMemoryEntityStore::new());
//!     let engine = Engine::new(store, Arc::new(InMemoryFieldDirectory::with_sample_fields()),
//!         Arc::new(test_clock()), EngineConfig::default());
//!     // ...
//! }
//! ```

use chrono::{DateTime, Utc};
use matchbook_core::environment::Clock;

mod directory_mocks;
mod store_mocks;

pub use directory_mocks::{InMemoryFieldDirectory, sample_fields};
pub use store_mocks::InMemoryEntityStore;

/// Mock implementations for testing.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::{Arc, Mutex};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use matchbook_testing::mocks::FixedClock;
    /// use matchbook_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that only moves when told to.
    ///
    /// Clones share the same time, so a test can keep a handle and advance the
    /// clock the engine reads.
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<Mutex<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Create a clock starting at `time`
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(Mutex::new(time)),
            }
        }

        /// Move the clock forward.
        pub fn advance(&self, by: chrono::Duration) {
            if let Ok(mut time) = self.time.lock() {
                *time += by;
            }
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
                .lock()
                .map_or_else(|poisoned| *poisoned.into_inner(), |time| *time)
        }
    }

    /// The instant every deterministic test starts at (2025-01-01 00:00:00 UTC).
    #[must_use]
    pub fn epoch() -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_735_689_600, 0).unwrap_or_default()
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(epoch())
    }
}

/// Input fixtures.
pub mod fixtures {
    use chrono::{DateTime, Duration, Utc};
    use matchbook_core::types::{FieldId, NewMatch, Role, RoleRequestSubmission, UserId};

    /// A match on `field_001` kicking off one day after `now`.
    #[must_use]
    pub fn new_match(now: DateTime<Utc>, max_participants: u32) -> NewMatch {
        NewMatch {
            field_id: FieldId::new("field_001"),
            name: "Friday Night League".into(),
            scheduled_at: now + Duration::days(1),
            description: "Competitive 11v11 match. All skill levels welcome!".into(),
            max_participants,
        }
    }

    /// A player asking to become an organizer.
    #[must_use]
    pub fn organizer_request(user_id: &str) -> RoleRequestSubmission {
        RoleRequestSubmission {
            user_id: UserId::new(user_id),
            current_role: Role::Player,
            requested_role: Role::Organizer,
            reason: "I have experience organizing football events.".into(),
        }
    }
}

/// Install a `tracing` subscriber for tests, filtered by `RUST_LOG` (default
/// `warn`). Safe to call from every test; only the first call installs.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

// Re-export commonly used items
pub use mocks::{FixedClock, ManualClock, test_clock};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        let time1 = clock.now();
        let time2 = clock.now();
        assert_eq!(time1, time2);
        assert_eq!(time1.to_rfc3339(), "2025-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new(mocks::epoch());
        let handle = clock.clone();
        handle.advance(chrono::Duration::minutes(5));
        assert_eq!(clock.now(), mocks::epoch() + chrono::Duration::minutes(5));
    }
}
