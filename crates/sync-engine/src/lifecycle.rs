//! Per-record lifecycle transitions.
//!
//! A pass looks at a record's [`LifecycleState`] and at whether the operator's
//! table still holds a row with the same key, and moves the record exactly one
//! step.

use database::LifecycleState;

/// What happens to a record whose counterpart row is present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchedTransition {
    /// Table values win; the record stays (or becomes) `Active`.
    AdoptExternal,
    /// Record values win and overwrite the row; confirmed after the write.
    Push,
    /// The row is left out of the write-back; the record waits for its purge.
    Withhold,
    /// The record is deleted; the row is kept as typed.
    Purge,
}

/// What happens to a record with no counterpart row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnmatchedTransition {
    /// Not yet in the table: append it; confirmed after the write.
    Push,
    /// Gone from the table: delete the record.
    Purge,
}

/// Transition for a record whose row is present.
pub fn when_matched(state: LifecycleState) -> MatchedTransition {
    match state {
        LifecycleState::Active => MatchedTransition::AdoptExternal,
        LifecycleState::PendingPush => MatchedTransition::Push,
        LifecycleState::DeletedLocally => MatchedTransition::Withhold,
        LifecycleState::DeletedExternally => MatchedTransition::Purge,
    }
}

/// Transition for a record whose row is absent.
pub fn when_unmatched(state: LifecycleState) -> UnmatchedTransition {
    match state {
        LifecycleState::PendingPush => UnmatchedTransition::Push,
        LifecycleState::Active
        | LifecycleState::DeletedLocally
        | LifecycleState::DeletedExternally => UnmatchedTransition::Purge,
    }
}

/// Tag carried by a record on its way out.
pub fn purge_state(state: LifecycleState) -> LifecycleState {
    match state {
        LifecycleState::Active => LifecycleState::DeletedExternally,
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matched_transitions() {
        assert_eq!(when_matched(LifecycleState::Active), MatchedTransition::AdoptExternal);
        assert_eq!(when_matched(LifecycleState::PendingPush), MatchedTransition::Push);
        assert_eq!(when_matched(LifecycleState::DeletedLocally), MatchedTransition::Withhold);
        assert_eq!(when_matched(LifecycleState::DeletedExternally), MatchedTransition::Purge);
    }

    #[test]
    fn test_unmatched_transitions() {
        assert_eq!(when_unmatched(LifecycleState::PendingPush), UnmatchedTransition::Push);
        assert_eq!(when_unmatched(LifecycleState::Active), UnmatchedTransition::Purge);
        assert_eq!(when_unmatched(LifecycleState::DeletedLocally), UnmatchedTransition::Purge);
        assert_eq!(when_unmatched(LifecycleState::DeletedExternally), UnmatchedTransition::Purge);
    }

    #[test]
    fn test_purge_state() {
        assert_eq!(purge_state(LifecycleState::Active), LifecycleState::DeletedExternally);
        assert_eq!(purge_state(LifecycleState::DeletedLocally), LifecycleState::DeletedLocally);
    }
}
