//! # Matchbook Core
//!
//! Core traits and types for the match reservation engine.
//!
//! Organizers create matches on a field with a fixed capacity, players join until
//! the capacity is reached, and users may ask an administrator for a different
//! role. This crate holds the pieces every other crate agrees on:
//!
//! - **Types**: matches, memberships, role requests and their identifiers
//! - **Store contract**: [`store::EntityStore`] and [`store::StoreTransaction`],
//!   an abstract document store with optimistic concurrency
//! - **Errors**: the [`error::ReservationError`] taxonomy with a stable
//!   [`error::ErrorKind`]
//! - **Capacity policy**: the pure admission rule
//! - **Environment**: the [`environment::Clock`] and
//!   [`environment::FieldDirectory`] collaborators
//!
//! ## Invariants
//!
//! - A match never has more memberships than `max_participants`
//! - A `(user, match)` pair has at most one membership
//! - A match is `Full` exactly when its membership count equals its capacity
//!   (unless cancelled or completed)
//! - Role requests move only from `Pending` to `Approved` or `Rejected`
//!
//! The runtime crate enforces these through store transactions; nothing here
//! performs I/O.

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};

pub mod capacity;
pub mod environment;
pub mod error;
pub mod store;
pub mod types;

pub use capacity::CapacityPolicy;
pub use error::{ErrorKind, ReservationError, Result};
