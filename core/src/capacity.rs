//! Capacity admission policy.
//!
//! Pure decision logic kept apart from storage so it can be tested exhaustively
//! and the coordinator's retry loop can be reasoned about independently.

/// Decides whether a match can take one more participant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CapacityPolicy;

impl CapacityPolicy {
    /// Admit a join when `current_count < max_participants`.
    ///
    /// # Examples
    ///
    /// ```
    /// use matchbook_core::capacity::CapacityPolicy;
    ///
    /// assert!(CapacityPolicy::admit_join(1, 2));
    /// assert!(!CapacityPolicy::admit_join(2, 2));
    /// ```
    #[must_use]
    pub const fn admit_join(current_count: u32, max_participants: u32) -> bool {
        current_count < max_participants
    }

    /// Whether admitting one more participant fills the match.
    #[must_use]
    pub const fn fills_match(current_count: u32, max_participants: u32) -> bool {
        current_count.saturating_add(1) == max_participants
    }

    /// Free slots left, never negative.
    #[must_use]
    pub const fn remaining(current_count: u32, max_participants: u32) -> u32 {
        max_participants.saturating_sub(current_count)
    }
}
