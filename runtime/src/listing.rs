//! Read-side queries over matches and memberships.
//!
//! Listings read outside any transaction and may lag the write path: a match that
//! just filled can still show up as available for a moment. The capacity
//! invariant is unaffected, since joins re-check inside their own transaction.

use crate::repository::MatchRepository;
use matchbook_core::Result;
use matchbook_core::environment::FieldDirectory;
use matchbook_core::types::{AvailableMatch, FieldId, FieldSummary, JoinedMatch, MatchStatus, UserId};
use std::collections::HashMap;
use std::sync::Arc;

/// Available-matches and my-matches queries.
#[derive(Clone)]
pub struct MatchListingService {
    repository: Arc<MatchRepository>,
    fields: Arc<dyn FieldDirectory>,
}

impl MatchListingService {
    /// Create a listing service.
    #[must_use]
    pub fn new(repository: Arc<MatchRepository>, fields: Arc<dyn FieldDirectory>) -> Self {
        Self { repository, fields }
    }

    /// Open matches, earliest kick-off first, with field display data.
    ///
    /// # Errors
    ///
    /// Store failures. A field that cannot be resolved yields `field: None`
    /// rather than an error.
    pub async fn list_available_matches(&self) -> Result<Vec<AvailableMatch>> {
        let mut open: Vec<_> = self
            .repository
            .list_matches()
            .await?
            .into_iter()
            .filter(|m| m.status == MatchStatus::Open)
            .collect();
        open.sort_by(|a, b| {
            a.scheduled_at
                .cmp(&b.scheduled_at)
                .then_with(|| a.id.cmp(&b.id))
        });

        let mut fields = FieldCache::default();
        let mut listed = Vec::with_capacity(open.len());
        for m in open {
            let field = fields.resolve(self.fields.as_ref(), &m.field_id).await;
            listed.push(AvailableMatch { match_: m, field });
        }
        Ok(listed)
    }

    /// Matches `user_id` has joined, most recent join first.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub async fn list_joined_matches(&self, user_id: &UserId) -> Result<Vec<JoinedMatch>> {
        let mut memberships = self.repository.list_memberships_for_user(user_id).await?;
        memberships.sort_by(|a, b| b.joined_at.cmp(&a.joined_at));

        let mut fields = FieldCache::default();
        let mut joined = Vec::with_capacity(memberships.len());
        for membership in memberships {
            let m = self.repository.get_match(membership.match_id).await?;
            let field = fields.resolve(self.fields.as_ref(), &m.field_id).await;
            joined.push(JoinedMatch {
                match_: m,
                field,
                joined_at: membership.joined_at,
                role: membership.role,
            });
        }
        Ok(joined)
    }
}

/// Per-call memo of field lookups; many matches share a field.
#[derive(Default)]
struct FieldCache {
    seen: HashMap<FieldId, Option<FieldSummary>>,
}

impl FieldCache {
    async fn resolve(&mut self, directory: &dyn FieldDirectory, field_id: &FieldId) -> Option<FieldSummary> {
        if let Some(cached) = self.seen.get(field_id) {
            return cached.clone();
        }
        let summary = match directory.field_summary(field_id).await {
            Ok(summary) => summary,
            Err(err) => {
                tracing::warn!(%field_id, error = %err, "Field lookup failed, listing without field data");
                None
            }
        };
        self.seen.insert(field_id.clone(), summary.clone());
        summary
    }
}
