//! Typed access to matches, memberships and role requests over an [`EntityStore`].
//!
//! [`MatchRepository`] owns the document layout: which collection an entity lives
//! in, how its id is derived and how its body is encoded. Writes that must be
//! atomic with other writes go through a [`MatchTransaction`] obtained from
//! [`MatchRepository::begin`].
//!
//! # Layout
//!
//! | collection              | id                      | body              |
//! |-------------------------|-------------------------|-------------------|
//! | `matches`               | match id                | [`Match`]         |
//! | `memberships`           | `{match_id}/{user_id}`  | [`MatchMembership`] |
//! | `user_memberships`      | `{user_id}/{match_id}`  | [`MatchMembership`] |
//! | `role_requests`         | request id              | [`RoleRequest`]   |
//! | `pending_role_requests` | user id                 | [`PendingMarker`] |
//!
//! Membership ids are prefixed by the match id, so the membership set of one
//! match is a single prefix range and the primary key enforces pair uniqueness.
//! `user_memberships` mirrors every membership keyed by user first, written in
//! the same transaction, so "my matches" is one prefix range too.

use chrono::{DateTime, Utc};
use matchbook_core::environment::Clock;
use matchbook_core::store::{Document, DocumentKey, EntityStore, StoreError, StoreTransaction, Version};
use matchbook_core::types::{
    Match, MatchId, MatchMembership, MatchStatus, NewMatch, RoleRequest, RoleRequestId, UserId,
};
use matchbook_core::{ReservationError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Collection names.
pub mod collections {
    /// Match documents
    pub const MATCHES: &str = "matches";
    /// Membership documents, id `{match_id}/{user_id}`
    pub const MEMBERSHIPS: &str = "memberships";
    /// Per-user copy of each membership, id `{user_id}/{match_id}`
    pub const USER_MEMBERSHIPS: &str = "user_memberships";
    /// Role request documents
    pub const ROLE_REQUESTS: &str = "role_requests";
    /// One marker per user with a Pending request, id = user id
    pub const PENDING_ROLE_REQUESTS: &str = "pending_role_requests";
}

fn match_key(id: MatchId) -> DocumentKey {
    DocumentKey::new(collections::MATCHES, id.to_string())
}

fn membership_prefix(match_id: MatchId) -> String {
    format!("{match_id}/")
}

fn membership_key(match_id: MatchId, user_id: &UserId) -> DocumentKey {
    DocumentKey::new(
        collections::MEMBERSHIPS,
        format!("{}{user_id}", membership_prefix(match_id)),
    )
}

fn user_membership_prefix(user_id: &UserId) -> String {
    format!("{user_id}/")
}

fn user_membership_key(user_id: &UserId, match_id: MatchId) -> DocumentKey {
    DocumentKey::new(
        collections::USER_MEMBERSHIPS,
        format!("{}{match_id}", user_membership_prefix(user_id)),
    )
}

fn role_request_key(id: RoleRequestId) -> DocumentKey {
    DocumentKey::new(collections::ROLE_REQUESTS, id.to_string())
}

fn pending_marker_key(user_id: &UserId) -> DocumentKey {
    DocumentKey::new(collections::PENDING_ROLE_REQUESTS, user_id.as_str())
}

/// Body of a `pending_role_requests` document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingMarker {
    /// The Pending request owned by the user
    pub request_id: RoleRequestId,
}

fn encode<T: Serialize>(value: &T) -> Result<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| ReservationError::from(StoreError::from(e)))
}

fn decode<T: DeserializeOwned>(doc: &Document) -> Result<T> {
    serde_json::from_value(doc.body.clone())
        .map_err(|e| ReservationError::Corrupted(format!("{}: {e}", doc.key)))
}

/// Decode a match document and check the invariants every stored match holds.
fn decode_match(doc: &Document) -> Result<Match> {
    let mut m: Match = decode(doc)?;
    if m.id.to_string() != doc.key.id() {
        return Err(ReservationError::Corrupted(format!(
            "{}: body carries id {}",
            doc.key, m.id
        )));
    }
    if m.max_participants == 0 {
        return Err(ReservationError::Corrupted(format!(
            "{}: max_participants is zero",
            doc.key
        )));
    }
    m.version = doc.version;
    Ok(m)
}

fn decode_role_request(doc: &Document) -> Result<RoleRequest> {
    let request: RoleRequest = decode(doc)?;
    if request.id.to_string() != doc.key.id() {
        return Err(ReservationError::Corrupted(format!(
            "{}: body carries id {}",
            doc.key, request.id
        )));
    }
    Ok(request)
}

fn count_of(docs: &[Document]) -> Result<u32> {
    u32::try_from(docs.len())
        .map_err(|_| ReservationError::Corrupted("membership count overflows u32".into()))
}

/// Typed repository over an [`EntityStore`].
#[derive(Clone)]
pub struct MatchRepository {
    store: Arc<dyn EntityStore>,
    clock: Arc<dyn Clock>,
}

impl MatchRepository {
    /// Create a repository over `store`, stamping writes with `clock`.
    #[must_use]
    pub fn new(store: Arc<dyn EntityStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Current time according to the repository's clock.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Check a [`NewMatch`] against the creation rules.
    ///
    /// # Errors
    ///
    /// `Validation` when `max_participants` is zero, the name is blank or the
    /// kick-off lies before `now`.
    pub fn validate_new_match(draft: &NewMatch, now: DateTime<Utc>) -> Result<()> {
        if draft.max_participants == 0 {
            return Err(ReservationError::Validation(
                "max_participants must be positive".into(),
            ));
        }
        if draft.name.trim().is_empty() {
            return Err(ReservationError::Validation("match name cannot be empty".into()));
        }
        if draft.scheduled_at < now {
            return Err(ReservationError::Validation(format!(
                "scheduled time {} is in the past",
                draft.scheduled_at.to_rfc3339()
            )));
        }
        Ok(())
    }

    /// Create a match in status `Open` with no members.
    ///
    /// # Errors
    ///
    /// `Validation` (see [`Self::validate_new_match`]), or a store failure.
    pub async fn create_match(&self, draft: NewMatch) -> Result<Match> {
        let now = self.now();
        Self::validate_new_match(&draft, now)?;

        let mut created = Match {
            id: MatchId::new(),
            field_id: draft.field_id,
            name: draft.name.trim().to_string(),
            scheduled_at: draft.scheduled_at,
            description: draft.description,
            max_participants: draft.max_participants,
            status: MatchStatus::Open,
            created_at: now,
            updated_at: now,
            version: Version::INITIAL,
        };
        let key = match_key(created.id);
        created.version = self.store.insert(&key, encode(&created)?).await?;
        Ok(created)
    }

    /// Read a match.
    ///
    /// # Errors
    ///
    /// `NotFound` when the match does not exist.
    pub async fn get_match(&self, match_id: MatchId) -> Result<Match> {
        let key = match_key(match_id);
        match self.store.get(&key).await? {
            Some(doc) => decode_match(&doc),
            None => Err(ReservationError::not_found("match", match_id)),
        }
    }

    /// Every stored match, in id order.
    ///
    /// # Errors
    ///
    /// Store failures, or `Corrupted` for an undecodable document.
    pub async fn list_matches(&self) -> Result<Vec<Match>> {
        let docs = self.store.scan(collections::MATCHES, "").await?;
        docs.iter().map(decode_match).collect()
    }

    /// Point-in-time membership count of a match, outside any transaction.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub async fn count_memberships(&self, match_id: MatchId) -> Result<u32> {
        let prefix = membership_prefix(match_id);
        let docs = self.store.scan(collections::MEMBERSHIPS, &prefix).await?;
        count_of(&docs)
    }

    /// Every membership held by `user_id`, read from the per-user index.
    ///
    /// # Errors
    ///
    /// Store failures, or `Corrupted` for an undecodable document.
    pub async fn list_memberships_for_user(&self, user_id: &UserId) -> Result<Vec<MatchMembership>> {
        let prefix = user_membership_prefix(user_id);
        let docs = self.store.scan(collections::USER_MEMBERSHIPS, &prefix).await?;
        let mut memberships = Vec::with_capacity(docs.len());
        for doc in &docs {
            let membership: MatchMembership = decode(doc)?;
            // A user id containing '/' can share the prefix of a shorter one.
            if &membership.user_id == user_id {
                memberships.push(membership);
            }
        }
        Ok(memberships)
    }

    /// Read a role request.
    ///
    /// # Errors
    ///
    /// `NotFound` when the request does not exist.
    pub async fn get_role_request(&self, id: RoleRequestId) -> Result<RoleRequest> {
        let key = role_request_key(id);
        match self.store.get(&key).await? {
            Some(doc) => decode_role_request(&doc),
            None => Err(ReservationError::not_found("role request", id)),
        }
    }

    /// Every stored role request.
    ///
    /// # Errors
    ///
    /// Store failures, or `Corrupted` for an undecodable document.
    pub async fn list_role_requests(&self) -> Result<Vec<RoleRequest>> {
        let docs = self.store.scan(collections::ROLE_REQUESTS, "").await?;
        docs.iter().map(decode_role_request).collect()
    }

    /// Start a unit of work.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub async fn begin(&self) -> Result<MatchTransaction> {
        let tx = self.store.begin().await?;
        Ok(MatchTransaction { tx })
    }
}

/// Typed view of one store transaction.
///
/// Dropping it without [`Self::commit`] discards every write.
pub struct MatchTransaction {
    tx: Box<dyn StoreTransaction>,
}

impl MatchTransaction {
    /// Read a match and record it for conflict detection.
    ///
    /// # Errors
    ///
    /// `NotFound` when the match does not exist.
    pub async fn get_match(&mut self, match_id: MatchId) -> Result<Match> {
        let key = match_key(match_id);
        match self.tx.get(&key).await? {
            Some(doc) => decode_match(&doc),
            None => Err(ReservationError::not_found("match", match_id)),
        }
    }

    /// Memberships of a match. The whole range is recorded, so a concurrent
    /// join makes this transaction fail to commit.
    ///
    /// # Errors
    ///
    /// Store failures, or `Corrupted` for an undecodable document.
    pub async fn memberships(&mut self, match_id: MatchId) -> Result<Vec<MatchMembership>> {
        let prefix = membership_prefix(match_id);
        let docs = self.tx.scan(collections::MEMBERSHIPS, &prefix).await?;
        docs.iter().map(decode).collect()
    }

    /// Membership count of a match, read inside the transaction.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub async fn count_memberships(&mut self, match_id: MatchId) -> Result<u32> {
        let prefix = membership_prefix(match_id);
        let docs = self.tx.scan(collections::MEMBERSHIPS, &prefix).await?;
        count_of(&docs)
    }

    /// Insert a membership that must not exist, plus its per-user index entry.
    ///
    /// # Errors
    ///
    /// `Conflict` when the `(user_id, match_id)` pair already exists.
    pub async fn insert_membership(&mut self, membership: &MatchMembership) -> Result<()> {
        let body = encode(membership)?;
        let key = membership_key(membership.match_id, &membership.user_id);
        self.tx.insert(&key, body.clone()).await?;
        let index_key = user_membership_key(&membership.user_id, membership.match_id);
        self.tx.insert(&index_key, body).await?;
        Ok(())
    }

    /// Set a match's status if its version is still `expected`.
    ///
    /// Returns the new version.
    ///
    /// # Errors
    ///
    /// `VersionConflict` when the match changed since `expected` was read,
    /// `NotFound` when it does not exist.
    pub async fn update_match_status(
        &mut self,
        match_id: MatchId,
        expected: Version,
        new_status: MatchStatus,
        now: DateTime<Utc>,
    ) -> Result<Version> {
        let key = match_key(match_id);
        let Some(doc) = self.tx.get(&key).await? else {
            return Err(ReservationError::not_found("match", match_id));
        };
        if doc.version != expected {
            return Err(ReservationError::VersionConflict {
                key,
                expected,
                actual: doc.version,
            });
        }
        let mut updated = decode_match(&doc)?;
        updated.status = new_status;
        updated.updated_at = now;
        let version = self.tx.update(&key, expected, encode(&updated)?).await?;
        Ok(version)
    }

    /// Read a role request together with its version.
    ///
    /// # Errors
    ///
    /// `NotFound` when the request does not exist.
    pub async fn get_role_request(&mut self, id: RoleRequestId) -> Result<(RoleRequest, Version)> {
        let key = role_request_key(id);
        match self.tx.get(&key).await? {
            Some(doc) => Ok((decode_role_request(&doc)?, doc.version)),
            None => Err(ReservationError::not_found("role request", id)),
        }
    }

    /// Insert a new role request.
    ///
    /// # Errors
    ///
    /// `Conflict` if the id is taken.
    pub async fn insert_role_request(&mut self, request: &RoleRequest) -> Result<()> {
        let key = role_request_key(request.id);
        self.tx.insert(&key, encode(request)?).await?;
        Ok(())
    }

    /// Replace a role request whose version must still be `expected`.
    ///
    /// # Errors
    ///
    /// `VersionConflict` when the request changed concurrently.
    pub async fn update_role_request(&mut self, request: &RoleRequest, expected: Version) -> Result<Version> {
        let key = role_request_key(request.id);
        let version = self.tx.update(&key, expected, encode(request)?).await?;
        Ok(version)
    }

    /// Claim the single Pending slot of `user_id` for `request_id`.
    ///
    /// # Errors
    ///
    /// `Conflict` when the user already has a Pending request.
    pub async fn claim_pending_marker(&mut self, user_id: &UserId, request_id: RoleRequestId) -> Result<()> {
        let key = pending_marker_key(user_id);
        self.tx.insert(&key, encode(&PendingMarker { request_id })?).await?;
        Ok(())
    }

    /// Free the Pending slot of `user_id` if it is held by `request_id`.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub async fn release_pending_marker(&mut self, user_id: &UserId, request_id: RoleRequestId) -> Result<()> {
        let key = pending_marker_key(user_id);
        let Some(doc) = self.tx.get(&key).await? else {
            return Ok(());
        };
        let marker: PendingMarker = decode(&doc)?;
        if marker.request_id == request_id {
            self.tx.delete(&key, doc.version).await?;
        }
        Ok(())
    }

    /// Commit every write atomically.
    ///
    /// # Errors
    ///
    /// `TransactionConflict` when something read by this transaction changed.
    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
