//! Role upgrade requests: `Pending → Approved | Rejected`.
//!
//! At most one Pending request exists per user. The rule is enforced by a
//! marker document keyed by user id, inserted in the same transaction as the
//! request and deleted in the same transaction as its resolution, so a second
//! concurrent submission fails on the marker's primary key rather than on an
//! application-side check.

use crate::metrics::{RoleRequestMetrics, TransactionMetrics};
use crate::repository::MatchRepository;
use crate::transaction::TransactionRunner;
use matchbook_core::types::{
    Decision, RoleRequest, RoleRequestId, RoleRequestStatus, RoleRequestSubmission, UserId,
};
use matchbook_core::{ReservationError, Result};
use std::sync::Arc;
use std::time::Instant;

/// State machine governing role requests.
#[derive(Clone)]
pub struct RoleRequestWorkflow {
    repository: Arc<MatchRepository>,
    runner: TransactionRunner,
}

impl RoleRequestWorkflow {
    /// Create a workflow.
    #[must_use]
    pub fn new(repository: Arc<MatchRepository>, runner: TransactionRunner) -> Self {
        Self { repository, runner }
    }

    /// Submit a Pending request.
    ///
    /// # Errors
    ///
    /// - `Validation`: blank user id or reason, requested role equals the
    ///   current role, or the user already has a Pending request
    /// - `TransientFailure`: retries or deadline exhausted, or store unavailable
    pub async fn submit_request(&self, submission: RoleRequestSubmission) -> Result<RoleRequest> {
        validate_submission(&submission)?;
        let started = Instant::now();

        let request = self
            .runner
            .run("submit_role_request", || self.try_submit(&submission))
            .await?;

        TransactionMetrics::record_duration("submit_role_request", started.elapsed());
        RoleRequestMetrics::record_transition("submitted");
        tracing::info!(
            request_id = %request.id,
            user_id = %request.user_id,
            requested_role = %request.requested_role,
            "Role request submitted"
        );
        Ok(request)
    }

    async fn try_submit(&self, submission: &RoleRequestSubmission) -> Result<RoleRequest> {
        let now = self.repository.now();
        let request = RoleRequest {
            id: RoleRequestId::new(),
            user_id: submission.user_id.clone(),
            requested_role: submission.requested_role,
            current_role: submission.current_role,
            reason: submission.reason.trim().to_string(),
            status: RoleRequestStatus::Pending,
            resolver_id: None,
            created_at: now,
            updated_at: now,
            resolved_at: None,
        };

        let mut tx = self.repository.begin().await?;
        tx.claim_pending_marker(&request.user_id, request.id)
            .await
            .map_err(|err| match err {
                ReservationError::Conflict(_) => {
                    tracing::debug!(user_id = %request.user_id, "Duplicate pending role request");
                    ReservationError::Validation(format!(
                        "user {} already has a pending role request",
                        request.user_id
                    ))
                }
                other => other,
            })?;
        tx.insert_role_request(&request).await?;
        tx.commit().await?;
        Ok(request)
    }

    /// Approve or reject a Pending request.
    ///
    /// # Errors
    ///
    /// - `NotFound`: no such request
    /// - `InvalidState`: the request is already resolved
    /// - `TransientFailure`: retries or deadline exhausted, or store unavailable
    pub async fn resolve_request(
        &self,
        request_id: RoleRequestId,
        decision: Decision,
        resolver_id: &UserId,
    ) -> Result<RoleRequest> {
        let started = Instant::now();
        let resolved = self
            .runner
            .run("resolve_role_request", || {
                self.try_resolve(request_id, decision, resolver_id)
            })
            .await?;

        TransactionMetrics::record_duration("resolve_role_request", started.elapsed());
        RoleRequestMetrics::record_transition(match decision {
            Decision::Approve => "approved",
            Decision::Reject => "rejected",
        });
        tracing::info!(
            %request_id,
            status = %resolved.status,
            %resolver_id,
            "Role request resolved"
        );
        Ok(resolved)
    }

    async fn try_resolve(
        &self,
        request_id: RoleRequestId,
        decision: Decision,
        resolver_id: &UserId,
    ) -> Result<RoleRequest> {
        let mut tx = self.repository.begin().await?;
        let (mut request, version) = tx.get_role_request(request_id).await?;
        if request.status != RoleRequestStatus::Pending {
            tracing::debug!(%request_id, status = %request.status, "Role request already resolved");
            return Err(ReservationError::InvalidState(format!(
                "role request {request_id} is already {}",
                request.status
            )));
        }

        let now = self.repository.now();
        request.status = decision.resulting_status();
        request.resolver_id = Some(resolver_id.clone());
        request.updated_at = now;
        request.resolved_at = Some(now);

        tx.update_role_request(&request, version).await?;
        tx.release_pending_marker(&request.user_id, request.id).await?;
        tx.commit().await?;
        Ok(request)
    }

    /// Read one request.
    ///
    /// # Errors
    ///
    /// `NotFound` when the request does not exist.
    pub async fn get_request(&self, request_id: RoleRequestId) -> Result<RoleRequest> {
        self.repository.get_role_request(request_id).await
    }

    /// Pending requests, oldest first.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub async fn list_pending_requests(&self) -> Result<Vec<RoleRequest>> {
        let mut pending: Vec<_> = self
            .repository
            .list_role_requests()
            .await?
            .into_iter()
            .filter(|r| r.status == RoleRequestStatus::Pending)
            .collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(pending)
    }
}

fn validate_submission(submission: &RoleRequestSubmission) -> Result<()> {
    if submission.user_id.is_blank() {
        return Err(ReservationError::Validation("user id cannot be empty".into()));
    }
    if submission.reason.trim().is_empty() {
        return Err(ReservationError::Validation("reason cannot be empty".into()));
    }
    if submission.requested_role == submission.current_role {
        return Err(ReservationError::Validation(format!(
            "user already holds role {}",
            submission.current_role
        )));
    }
    Ok(())
}
