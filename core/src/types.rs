//! Domain types for the match reservation engine.
//!
//! Matches, memberships and role requests, plus the identifiers and enums they
//! are built from. These are plain data: every invariant that spans more than
//! one value is enforced by the runtime crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use crate::store::Version;

// ============================================================================
// Identifiers
// ============================================================================

/// Error returned when parsing an identifier from external input fails.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid identifier: {0}")]
pub struct ParseIdError(String);

/// Unique identifier for a match
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MatchId(Uuid);

impl MatchId {
    /// Creates a new random `MatchId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `MatchId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for MatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MatchId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| ParseIdError(format!("match id {s:?}: {e}")))
    }
}

/// Unique identifier for a role request
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoleRequestId(Uuid);

impl RoleRequestId {
    /// Creates a new random `RoleRequestId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `RoleRequestId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for RoleRequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RoleRequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RoleRequestId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| ParseIdError(format!("role request id {s:?}: {e}")))
    }
}

/// Stable user identifier supplied by the external identity provider.
///
/// Opaque to the engine. Use `FromStr` for untrusted input (rejects empty ids) and
/// `new()` for ids that already passed through the identity layer.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    /// Create a `UserId` from a trusted string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the user id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the id is empty or whitespace only.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Err(ParseIdError("User ID cannot be empty".to_string()));
        }
        Ok(Self(s.to_string()))
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Reference to a field owned by the external field catalogue.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldId(String);

impl FieldId {
    /// Create a `FieldId` from a string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the field id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for FieldId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ============================================================================
// Match
// ============================================================================

/// Lifecycle status of a match.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatchStatus {
    /// Accepting joins
    Open,
    /// Membership count equals capacity
    Full,
    /// Called off by the organizer
    Cancelled,
    /// Played
    Completed,
}

impl MatchStatus {
    /// Whether the status is terminal (no joins, no further transitions).
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Cancelled | Self::Completed)
    }
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Open => "Open",
            Self::Full => "Full",
            Self::Cancelled => "Cancelled",
            Self::Completed => "Completed",
        };
        f.write_str(s)
    }
}

/// Input for creating a match.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMatch {
    /// Field the match is played on
    pub field_id: FieldId,
    /// Display name
    pub name: String,
    /// Scheduled kick-off
    pub scheduled_at: DateTime<Utc>,
    /// Free-text description
    pub description: String,
    /// Capacity; must be positive
    pub max_participants: u32,
}

/// A scheduled, capacity-bounded match.
///
/// `version` mirrors the version of the stored document and is the token used for
/// optimistic status updates. It is not part of the stored body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Match {
    /// Unique match id
    pub id: MatchId,
    /// Field the match is played on
    pub field_id: FieldId,
    /// Display name
    pub name: String,
    /// Scheduled kick-off
    pub scheduled_at: DateTime<Utc>,
    /// Free-text description
    pub description: String,
    /// Capacity, immutable after creation
    pub max_participants: u32,
    /// Current lifecycle status
    pub status: MatchStatus,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last status change
    pub updated_at: DateTime<Utc>,
    /// Optimistic concurrency token
    #[serde(skip, default = "initial_version")]
    pub version: Version,
}

const fn initial_version() -> Version {
    Version::INITIAL
}

// ============================================================================
// Membership
// ============================================================================

/// Role label attached to a membership.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MembershipRole {
    /// Regular participant
    #[default]
    Player,
    /// The organizer taking part in their own match
    Organizer,
}

/// One user's participation in one match. Unique per `(user_id, match_id)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchMembership {
    /// Participant
    pub user_id: UserId,
    /// Joined match
    pub match_id: MatchId,
    /// When the join committed
    pub joined_at: DateTime<Utc>,
    /// Role label
    pub role: MembershipRole,
}

// ============================================================================
// Field
// ============================================================================

/// Minimal display data for a field, read from the field catalogue.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSummary {
    /// Field id
    pub id: FieldId,
    /// Display name
    pub name: String,
    /// Street address
    pub address: String,
}

/// A match as shown in the "available matches" listing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailableMatch {
    /// The match
    #[serde(rename = "match")]
    pub match_: Match,
    /// Field display data, `None` when the field is no longer catalogued
    pub field: Option<FieldSummary>,
}

/// A match the user has joined, as shown in "my matches".
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinedMatch {
    /// The match
    #[serde(rename = "match")]
    pub match_: Match,
    /// Field display data, `None` when the field is no longer catalogued
    pub field: Option<FieldSummary>,
    /// When the user joined
    pub joined_at: DateTime<Utc>,
    /// Role label of the membership
    pub role: MembershipRole,
}

// ============================================================================
// Role requests
// ============================================================================

/// Roles a user can hold.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Joins matches
    Player,
    /// Creates matches
    Organizer,
    /// Resolves role requests
    Admin,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Player => "Player",
            Self::Organizer => "Organizer",
            Self::Admin => "Admin",
        };
        f.write_str(s)
    }
}

/// Status of a role request. Transitions only `Pending → Approved | Rejected`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoleRequestStatus {
    /// Awaiting an administrator
    Pending,
    /// Granted
    Approved,
    /// Refused
    Rejected,
}

impl fmt::Display for RoleRequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "Pending",
            Self::Approved => "Approved",
            Self::Rejected => "Rejected",
        };
        f.write_str(s)
    }
}

/// An administrator's decision on a pending request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    /// Grant the requested role
    Approve,
    /// Refuse the requested role
    Reject,
}

impl Decision {
    /// Terminal status this decision leads to.
    #[must_use]
    pub const fn resulting_status(self) -> RoleRequestStatus {
        match self {
            Self::Approve => RoleRequestStatus::Approved,
            Self::Reject => RoleRequestStatus::Rejected,
        }
    }
}

/// Input for submitting a role request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRequestSubmission {
    /// Requesting user
    pub user_id: UserId,
    /// Role the user holds today, as reported by the identity provider
    pub current_role: Role,
    /// Role the user asks for
    pub requested_role: Role,
    /// Justification shown to the administrator
    pub reason: String,
}

/// A user's petition to change role.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRequest {
    /// Request id
    pub id: RoleRequestId,
    /// Requesting user
    pub user_id: UserId,
    /// Role the user asks for
    pub requested_role: Role,
    /// Role held at submission time
    pub current_role: Role,
    /// Justification
    pub reason: String,
    /// Current status
    pub status: RoleRequestStatus,
    /// Administrator who resolved the request
    pub resolver_id: Option<UserId>,
    /// Submission time
    pub created_at: DateTime<Utc>,
    /// Last change
    pub updated_at: DateTime<Utc>,
    /// Resolution time
    pub resolved_at: Option<DateTime<Utc>>,
}
