//! # Matchbook Runtime
//!
//! The services of the match reservation engine, built on the contracts in
//! `matchbook-core`.
//!
//! ## Core Components
//!
//! - **[`MatchRepository`]**: typed documents over an `EntityStore`
//! - **[`ReservationCoordinator`]**: the only writer of participation state
//! - **[`MatchListingService`]**: available and joined matches
//! - **[`RoleRequestWorkflow`]**: `Pending → Approved | Rejected`
//! - **[`TransactionRunner`]**: bounded retry with jitter plus an overall deadline
//!
//! [`Engine`] wires them over one store, field directory and clock.
//!
//! ## Example
//!
//! ```ignore
//! use matchbook_runtime::{Engine, EngineConfig};
//!
//! let engine = Engine::new(store, fields, Arc::new(SystemClock), EngineConfig::from_env());
//!
//! let created = engine.coordinator().create_match(draft).await?;
//! engine.coordinator().join_match(&user_id, created.id).await?;
//! let open = engine.listing().list_available_matches().await?;
//! ```

use matchbook_core::environment::{Clock, FieldDirectory};
use matchbook_core::store::EntityStore;
use std::sync::Arc;

/// Engine configuration from the environment
pub mod config;

/// Match creation, joins and lifecycle transitions
pub mod coordinator;

/// Read-side listings
pub mod listing;

/// Prometheus metrics for observability
pub mod metrics;

/// Typed document access
pub mod repository;

/// Retry logic with jittered exponential backoff
pub mod retry;

/// Role request state machine
pub mod role_requests;

/// Retry budget and deadline around store transactions
pub mod transaction;

pub use config::EngineConfig;
pub use coordinator::ReservationCoordinator;
pub use listing::MatchListingService;
pub use repository::{MatchRepository, MatchTransaction};
pub use retry::{RetryError, RetryPolicy};
pub use role_requests::RoleRequestWorkflow;
pub use transaction::TransactionRunner;

/// The engine services wired over one set of collaborators.
///
/// Cloning is cheap; clones share the same store.
#[derive(Clone)]
pub struct Engine {
    repository: Arc<MatchRepository>,
    coordinator: ReservationCoordinator,
    listing: MatchListingService,
    role_requests: RoleRequestWorkflow,
}

impl Engine {
    /// Wire the engine.
    #[must_use]
    pub fn new(
        store: Arc<dyn EntityStore>,
        fields: Arc<dyn FieldDirectory>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        let repository = Arc::new(MatchRepository::new(store, clock));
        let runner = TransactionRunner::from_config(&config);
        tracing::debug!(
            max_attempts = runner.policy().max_attempts,
            deadline_ms = config.operation_deadline_ms,
            "Engine configured"
        );
        Self {
            coordinator: ReservationCoordinator::new(
                Arc::clone(&repository),
                Arc::clone(&fields),
                runner.clone(),
            ),
            listing: MatchListingService::new(Arc::clone(&repository), fields),
            role_requests: RoleRequestWorkflow::new(Arc::clone(&repository), runner),
            repository,
        }
    }

    /// Typed store access.
    #[must_use]
    pub fn repository(&self) -> &MatchRepository {
        &self.repository
    }

    /// Create and join matches.
    #[must_use]
    pub const fn coordinator(&self) -> &ReservationCoordinator {
        &self.coordinator
    }

    /// List matches.
    #[must_use]
    pub const fn listing(&self) -> &MatchListingService {
        &self.listing
    }

    /// Submit and resolve role requests.
    #[must_use]
    pub const fn role_requests(&self) -> &RoleRequestWorkflow {
        &self.role_requests
    }
}
