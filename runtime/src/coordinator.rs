//! The single writer of match participation state.
//!
//! [`ReservationCoordinator`] runs match creation, joins and lifecycle transitions.
//! A join reads the match and its membership range, decides with
//! [`CapacityPolicy`], inserts the membership and flips the status to `Full` when
//! the last slot is taken, all inside one store transaction. A concurrent writer
//! invalidates the transaction at commit; the [`TransactionRunner`] then re-runs
//! it from a fresh read, where the loser of a last-slot race sees the match full.

use crate::metrics::{JoinMetrics, MatchMetrics, TransactionMetrics};
use crate::repository::MatchRepository;
use crate::transaction::TransactionRunner;
use matchbook_core::environment::FieldDirectory;
use matchbook_core::types::{Match, MatchId, MatchMembership, MatchStatus, MembershipRole, NewMatch, UserId};
use matchbook_core::{CapacityPolicy, ReservationError, Result};
use std::sync::Arc;
use std::time::Instant;

/// Orchestrates the atomic create and join operations.
#[derive(Clone)]
pub struct ReservationCoordinator {
    repository: Arc<MatchRepository>,
    fields: Arc<dyn FieldDirectory>,
    runner: TransactionRunner,
}

impl ReservationCoordinator {
    /// Create a coordinator.
    #[must_use]
    pub fn new(
        repository: Arc<MatchRepository>,
        fields: Arc<dyn FieldDirectory>,
        runner: TransactionRunner,
    ) -> Self {
        Self {
            repository,
            fields,
            runner,
        }
    }

    /// Create a match on an existing field.
    ///
    /// # Errors
    ///
    /// - `Validation`: capacity zero, blank name or kick-off in the past
    /// - `NotFound`: the field is not catalogued
    /// - `TransientFailure`: the store or the field catalogue is unavailable
    pub async fn create_match(&self, draft: NewMatch) -> Result<Match> {
        let started = Instant::now();
        MatchRepository::validate_new_match(&draft, self.repository.now())?;

        if self.fields.field_summary(&draft.field_id).await?.is_none() {
            tracing::debug!(field_id = %draft.field_id, "Match creation rejected: unknown field");
            return Err(ReservationError::not_found("field", &draft.field_id));
        }

        let repository = &self.repository;
        let created = self
            .runner
            .run("create_match", || repository.create_match(draft.clone()))
            .await?;

        TransactionMetrics::record_duration("create_match", started.elapsed());
        tracing::info!(
            match_id = %created.id,
            field_id = %created.field_id,
            max_participants = created.max_participants,
            "Match created"
        );
        Ok(created)
    }

    /// Join a match as a player.
    ///
    /// # Errors
    ///
    /// - `Validation`: blank user id
    /// - `NotFound`: no such match
    /// - `InvalidState`: the match is cancelled or completed
    /// - `CapacityExceeded`: no free slot
    /// - `AlreadyJoined`: the user is already a member; nothing changed
    /// - `TransientFailure`: retries or deadline exhausted, or store unavailable
    pub async fn join_match(&self, user_id: &UserId, match_id: MatchId) -> Result<MatchMembership> {
        self.join_match_as(user_id, match_id, MembershipRole::Player).await
    }

    /// Join a match with an explicit membership role.
    ///
    /// # Errors
    ///
    /// Same as [`Self::join_match`].
    pub async fn join_match_as(
        &self,
        user_id: &UserId,
        match_id: MatchId,
        role: MembershipRole,
    ) -> Result<MatchMembership> {
        if user_id.is_blank() {
            tracing::debug!(%match_id, "Join rejected: blank user id");
            return Err(ReservationError::Validation("user id cannot be empty".into()));
        }

        let started = Instant::now();
        let result = self
            .runner
            .run("join_match", || self.try_join(user_id, match_id, role))
            .await;
        JoinMetrics::record(result.as_ref().err(), started.elapsed());

        match &result {
            Ok(membership) => tracing::info!(
                %user_id,
                %match_id,
                role = ?membership.role,
                "User joined match"
            ),
            Err(err @ (ReservationError::CapacityExceeded { .. } | ReservationError::AlreadyJoined { .. })) => {
                tracing::debug!(%user_id, %match_id, error = %err, "Join rejected");
            }
            Err(err) => tracing::debug!(%user_id, %match_id, error = %err, "Join failed"),
        }
        result
    }

    /// One attempt of the join protocol.
    async fn try_join(
        &self,
        user_id: &UserId,
        match_id: MatchId,
        role: MembershipRole,
    ) -> Result<MatchMembership> {
        let mut tx = self.repository.begin().await?;

        let current = tx.get_match(match_id).await?;
        if current.status.is_terminal() {
            return Err(ReservationError::InvalidState(format!(
                "match {match_id} is {}",
                current.status
            )));
        }

        let members = tx.memberships(match_id).await?;
        if members.iter().any(|m| &m.user_id == user_id) {
            return Err(ReservationError::AlreadyJoined {
                user_id: user_id.clone(),
                match_id,
            });
        }
        let count = u32::try_from(members.len())
            .map_err(|_| ReservationError::Corrupted(format!("match {match_id} membership overflow")))?;
        if !CapacityPolicy::admit_join(count, current.max_participants) {
            return Err(ReservationError::CapacityExceeded {
                match_id,
                max_participants: current.max_participants,
            });
        }

        let now = self.repository.now();
        let membership = MatchMembership {
            user_id: user_id.clone(),
            match_id,
            joined_at: now,
            role,
        };
        tx.insert_membership(&membership).await.map_err(|err| match err {
            ReservationError::Conflict(_) => ReservationError::AlreadyJoined {
                user_id: user_id.clone(),
                match_id,
            },
            other => other,
        })?;

        if CapacityPolicy::fills_match(count, current.max_participants) {
            tx.update_match_status(match_id, current.version, MatchStatus::Full, now)
                .await?;
        }

        tx.commit().await?;
        let remaining = CapacityPolicy::remaining(count + 1, current.max_participants);
        if remaining == 0 {
            tracing::info!(%match_id, max_participants = current.max_participants, "Match is now full");
        } else {
            tracing::debug!(%match_id, remaining, "Slot taken");
        }
        Ok(membership)
    }

    /// Call off a match. Valid from `Open` or `Full`.
    ///
    /// # Errors
    ///
    /// - `NotFound`: no such match
    /// - `InvalidState`: the match is already cancelled or completed
    /// - `TransientFailure`: retries or deadline exhausted, or store unavailable
    pub async fn cancel_match(&self, match_id: MatchId) -> Result<Match> {
        self.transition(match_id, MatchStatus::Cancelled, "cancel_match", "cancelled")
            .await
    }

    /// Mark a match as played. Valid from `Open` or `Full`.
    ///
    /// # Errors
    ///
    /// Same as [`Self::cancel_match`].
    pub async fn complete_match(&self, match_id: MatchId) -> Result<Match> {
        self.transition(match_id, MatchStatus::Completed, "complete_match", "completed")
            .await
    }

    async fn transition(
        &self,
        match_id: MatchId,
        target: MatchStatus,
        operation: &'static str,
        label: &'static str,
    ) -> Result<Match> {
        let started = Instant::now();

        let updated = self
            .runner
            .run(operation, || self.try_transition(match_id, target))
            .await?;

        TransactionMetrics::record_duration(operation, started.elapsed());
        MatchMetrics::record_transition(label);
        tracing::info!(%match_id, status = %updated.status, "Match status changed");
        Ok(updated)
    }

    async fn try_transition(&self, match_id: MatchId, target: MatchStatus) -> Result<Match> {
        let mut tx = self.repository.begin().await?;
        let mut current = tx.get_match(match_id).await?;
        if current.status.is_terminal() {
            return Err(ReservationError::InvalidState(format!(
                "match {match_id} is already {}",
                current.status
            )));
        }

        let now = self.repository.now();
        let version = tx
            .update_match_status(match_id, current.version, target, now)
            .await?;
        tx.commit().await?;

        current.status = target;
        current.updated_at = now;
        current.version = version;
        Ok(current)
    }
}
