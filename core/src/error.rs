//! Error taxonomy of the reservation engine.
//!
//! Every failure carries a machine-readable [`ErrorKind`] so callers can branch on
//! the outcome without inspecting free-text messages.

use crate::store::{DocumentKey, StoreError, Version};
use crate::types::{MatchId, UserId};
use thiserror::Error;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, ReservationError>;

/// Errors surfaced by the reservation engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReservationError {
    /// Malformed input. Not retried.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A referenced entity does not exist. Not retried.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of entity (`"match"`, `"field"`, `"role request"`)
        entity: &'static str,
        /// Identifier that was looked up
        id: String,
    },

    /// The operation is not valid for the entity's current state. Not retried.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The match has no free slot. Safe to re-attempt later.
    #[error("Match {match_id} is at capacity ({max_participants} participants)")]
    CapacityExceeded {
        /// The full match
        match_id: MatchId,
        /// Its capacity
        max_participants: u32,
    },

    /// The user is already a member of the match; nothing was counted twice.
    #[error("User {user_id} already joined match {match_id}")]
    AlreadyJoined {
        /// The user
        user_id: UserId,
        /// The match
        match_id: MatchId,
    },

    /// A conditional insert hit an existing key (genuine duplicate).
    #[error("Conflict: {0} already exists")]
    Conflict(DocumentKey),

    /// Optimistic update lost against a concurrent writer. Retried internally.
    #[error("Version conflict on {key}: expected {expected}, found {actual}")]
    VersionConflict {
        /// Document that changed
        key: DocumentKey,
        /// Version the caller read
        expected: Version,
        /// Version now stored
        actual: Version,
    },

    /// The store rejected a commit because a concurrent transaction changed
    /// something this one read. Retried internally.
    #[error("Transaction conflict: {0}")]
    TransactionConflict(String),

    /// Retries or deadline exhausted, or the store is unavailable.
    #[error("Transient failure after {attempts} attempt(s): {reason}")]
    TransientFailure {
        /// Attempts made before giving up
        attempts: u32,
        /// Last underlying cause
        reason: String,
    },

    /// A stored document does not decode or violates a schema invariant.
    #[error("Corrupted document: {0}")]
    Corrupted(String),
}

/// Machine-readable classification of a [`ReservationError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See [`ReservationError::Validation`]
    Validation,
    /// See [`ReservationError::NotFound`]
    NotFound,
    /// See [`ReservationError::InvalidState`]
    InvalidState,
    /// See [`ReservationError::CapacityExceeded`]
    CapacityExceeded,
    /// See [`ReservationError::AlreadyJoined`]
    AlreadyJoined,
    /// See [`ReservationError::Conflict`] and [`ReservationError::TransactionConflict`]
    Conflict,
    /// See [`ReservationError::VersionConflict`]
    VersionConflict,
    /// See [`ReservationError::TransientFailure`]
    TransientFailure,
    /// See [`ReservationError::Corrupted`]
    Corrupted,
}

impl ReservationError {
    /// Shorthand for a missing entity.
    #[must_use]
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Classification of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::InvalidState(_) => ErrorKind::InvalidState,
            Self::CapacityExceeded { .. } => ErrorKind::CapacityExceeded,
            Self::AlreadyJoined { .. } => ErrorKind::AlreadyJoined,
            Self::Conflict(_) | Self::TransactionConflict(_) => ErrorKind::Conflict,
            Self::VersionConflict { .. } => ErrorKind::VersionConflict,
            Self::TransientFailure { .. } => ErrorKind::TransientFailure,
            Self::Corrupted(_) => ErrorKind::Corrupted,
        }
    }

    /// Whether the coordinator should re-run the whole transaction.
    ///
    /// Only storage races qualify. A duplicate insert ([`Self::Conflict`]) is not
    /// retryable: the same insert would fail the same way.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransactionConflict(_) | Self::VersionConflict { .. }
        )
    }
}

impl From<StoreError> for ReservationError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::AlreadyExists(key) => Self::Conflict(key),
            StoreError::VersionConflict {
                key,
                expected,
                actual,
            } => Self::VersionConflict {
                key,
                expected,
                actual,
            },
            StoreError::NotFound(key) => Self::NotFound {
                entity: "document",
                id: key.to_string(),
            },
            StoreError::Conflict(reason) => Self::TransactionConflict(reason),
            StoreError::Unavailable(reason) => Self::TransientFailure {
                attempts: 1,
                reason,
            },
            StoreError::Serialization(reason) => Self::Corrupted(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_map_to_engine_taxonomy() {
        let key = DocumentKey::new("memberships", "m/u");

        assert_eq!(
            ReservationError::from(StoreError::AlreadyExists(key.clone())).kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            ReservationError::from(StoreError::Conflict("range".into())).kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            ReservationError::from(StoreError::Unavailable("down".into())).kind(),
            ErrorKind::TransientFailure
        );
        assert_eq!(
            ReservationError::from(StoreError::Serialization("bad".into())).kind(),
            ErrorKind::Corrupted
        );
        assert_eq!(
            ReservationError::from(StoreError::NotFound(key)).kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn duplicate_insert_is_not_retryable_but_races_are() {
        let key = DocumentKey::new("memberships", "m/u");
        assert!(!ReservationError::Conflict(key.clone()).is_retryable());
        assert!(ReservationError::TransactionConflict("x".into()).is_retryable());
        assert!(
            ReservationError::VersionConflict {
                key,
                expected: Version::new(1),
                actual: Version::new(2),
            }
            .is_retryable()
        );
        assert!(
            !ReservationError::CapacityExceeded {
                match_id: MatchId::new(),
                max_participants: 2,
            }
            .is_retryable()
        );
    }

    #[test]
    fn not_found_display_names_entity() {
        let err = ReservationError::not_found("field", "field_009");
        assert_eq!(err.to_string(), "field not found: field_009");
    }
}
