//! Generic two-way merge of one entity kind.
//!
//! The merge is pure: it looks at an internal snapshot, an external snapshot
//! and the owner index, and decides what to write on each side. Nothing is
//! applied here; see [`crate::commit`] and [`crate::orchestrator`].

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::anomaly::{Anomaly, AnomalyKind};
use crate::error::SyncError;
use crate::keys::RecordKey;
use crate::kinds::{sort_rows, SyncKind};
use crate::lifecycle::{purge_state, when_matched, when_unmatched, MatchedTransition, UnmatchedTransition};
use crate::owners::OwnerIndex;
use crate::row::Row;

/// Outcome of merging one entity kind.
#[derive(Debug, Clone)]
pub struct MergeResult<R> {
    /// New records materialised from table rows (tag `Active`).
    pub inserts: Vec<R>,
    /// Existing records that adopted table values.
    pub updates: Vec<R>,
    /// Records to purge, tagged with the state they leave in.
    pub deletes: Vec<R>,
    /// `PendingPush` records written to the table, to confirm after the write.
    pub confirms: Vec<R>,
    /// Full table content to write back, in display order.
    pub rows_out: Vec<Row>,
    /// Records held back this pass.
    pub anomalies: Vec<Anomaly>,
    /// Whether `rows_out` differs from the table as read.
    pub external_dirty: bool,
}

impl<R> Default for MergeResult<R> {
    fn default() -> Self {
        Self {
            inserts: Vec::new(),
            updates: Vec::new(),
            deletes: Vec::new(),
            confirms: Vec::new(),
            rows_out: Vec::new(),
            anomalies: Vec::new(),
            external_dirty: false,
        }
    }
}

impl<R> MergeResult<R> {
    /// Internal mutations to commit (confirms happen after the table write).
    pub fn internal_changes(&self) -> usize {
        self.inserts.len() + self.updates.len() + self.deletes.len()
    }

    /// True when neither side needs touching.
    pub fn is_noop(&self) -> bool {
        self.internal_changes() == 0 && self.confirms.is_empty() && !self.external_dirty
    }
}

/// Merge an internal and an external snapshot of kind `K`.
///
/// Record-level problems become anomalies: the row is written back as typed
/// and the internal record with the same key is left alone, so the next pass
/// retries once the operator fixes it. Two internal records with one key is
/// an invariant violation and fails the merge.
pub fn merge<K: SyncKind>(
    internal: Vec<K::Record>,
    external: Vec<Row>,
    owners: &OwnerIndex,
) -> Result<MergeResult<K::Record>, SyncError> {
    let mut internal_by_key: BTreeMap<RecordKey, K::Record> = BTreeMap::new();
    for record in internal {
        let key = K::record_key(&record);
        if internal_by_key.contains_key(&key) {
            return Err(SyncError::DuplicateKey {
                domain: K::DOMAIN,
                key: key.to_string(),
            });
        }
        internal_by_key.insert(key, record);
    }

    let mut external_by_key: BTreeMap<RecordKey, Vec<usize>> = BTreeMap::new();
    for (idx, row) in external.iter().enumerate() {
        external_by_key.entry(K::row_key(row)).or_default().push(idx);
    }
    let cross_row = K::cross_row_anomalies(&external);

    let mut result = MergeResult::default();
    let mut held: BTreeSet<RecordKey> = BTreeSet::new();

    for (key, positions) in &external_by_key {
        let kind = if positions.len() > 1 {
            Some(AnomalyKind::DuplicateRow {
                count: positions.len(),
            })
        } else {
            cross_row.get(&positions[0]).cloned()
        };
        if let Some(kind) = kind {
            hold::<K>(&mut result, &mut held, key, kind, positions, &external);
            continue;
        }

        let row = &external[positions[0]];
        let incoming = match K::construct(row, owners) {
            Ok(incoming) => incoming,
            Err(kind) => {
                hold::<K>(&mut result, &mut held, key, kind, positions, &external);
                continue;
            }
        };

        let Some(mut record) = internal_by_key.remove(key) else {
            let mut out = row.clone();
            K::copy_record_fields(&mut out, &incoming);
            result.rows_out.push(out);
            result.inserts.push(incoming);
            continue;
        };

        match when_matched(K::state(&record)) {
            MatchedTransition::AdoptExternal => {
                let changed = K::adopt_fields(&mut record, &incoming);
                let mut out = row.clone();
                K::copy_record_fields(&mut out, &record);
                result.rows_out.push(out);
                if changed {
                    result.updates.push(record);
                }
            }
            MatchedTransition::Push => {
                let mut out = row.clone();
                K::copy_record_fields(&mut out, &record);
                result.rows_out.push(out);
                result.confirms.push(record);
            }
            MatchedTransition::Withhold => {
                debug!("[{}] withholding {} until purge", K::DOMAIN, key);
            }
            MatchedTransition::Purge => {
                result.rows_out.push(row.clone());
                result.deletes.push(record);
            }
        }
    }

    for (key, mut record) in internal_by_key {
        if held.contains(&key) {
            continue;
        }
        if let Some(owner) = K::record_owner(&record) {
            if owners.is_purged(owner) {
                // The account purge cascades to the record.
                debug!("[{}] skipping {}: owner '{}' is purged", K::DOMAIN, key, owner);
                continue;
            }
            if !owners.contains(owner) {
                let kind = AnomalyKind::UnknownOwner {
                    handle: owner.to_string(),
                };
                result.anomalies.push(Anomaly::new(K::DOMAIN, key, kind));
                continue;
            }
        }

        let state = K::state(&record);
        match when_unmatched(state) {
            UnmatchedTransition::Push => {
                let mut out = Row::new();
                K::copy_record_fields(&mut out, &record);
                result.rows_out.push(out);
                result.confirms.push(record);
            }
            UnmatchedTransition::Purge => {
                K::set_state(&mut record, purge_state(state));
                result.deletes.push(record);
            }
        }
    }

    let mut rows_in = external;
    sort_rows::<K>(&mut rows_in);
    sort_rows::<K>(&mut result.rows_out);
    result.external_dirty = result.rows_out != rows_in;

    Ok(result)
}

fn hold<K: SyncKind>(
    result: &mut MergeResult<K::Record>,
    held: &mut BTreeSet<RecordKey>,
    key: &RecordKey,
    kind: AnomalyKind,
    positions: &[usize],
    external: &[Row],
) {
    result
        .anomalies
        .push(Anomaly::new(K::DOMAIN, key.clone(), kind));
    result
        .rows_out
        .extend(positions.iter().map(|&idx| external[idx].clone()));
    held.insert(key.clone());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinds::accounts::{HANDLE, NAME, ROLES, SECRET};
    use crate::kinds::{events, templates, Accounts, Events, Templates};
    use chrono::NaiveDate;
    use database::{Account, DatedEvent, LifecycleState, Modality, RecurringTemplate};

    fn account(handle: &str, state: LifecycleState) -> Account {
        let mut account = Account::new(handle, format!("{} Name", handle));
        account.id = handle.len() as i64;
        account.state = state;
        account
    }

    fn account_row(handle: &str) -> Row {
        Row::new()
            .with(HANDLE, handle)
            .with(NAME, format!("{} Name", handle))
            .with(SECRET, "")
            .with("chat_id", "")
            .with(ROLES, "")
    }

    fn owners() -> OwnerIndex {
        OwnerIndex::from_accounts(vec![
            account("alice", LifecycleState::Active),
            account("bob", LifecycleState::Active),
        ])
    }

    fn template(owner: &str, weekday: i64, state: LifecycleState) -> RecurringTemplate {
        RecurringTemplate {
            id: weekday + 100,
            account_id: owner.len() as i64,
            owner_handle: owner.to_string(),
            weekday,
            start_time: "10:00".to_string(),
            end_time: "11:00".to_string(),
            modality: Modality::Online,
            state,
            revision: 1,
        }
    }

    fn template_row(owner: &str, weekday: i64, modality: &str) -> Row {
        Row::new()
            .with(templates::OWNER, owner)
            .with(templates::WEEKDAY, weekday.to_string())
            .with(templates::START, "10:00")
            .with(templates::END, "11:00")
            .with(templates::MODALITY, modality)
    }

    fn event(owner: &str, day: u32, state: LifecycleState) -> DatedEvent {
        DatedEvent {
            id: day as i64,
            account_id: owner.len() as i64,
            owner_handle: owner.to_string(),
            starts_at: NaiveDate::from_ymd_opt(2024, 3, day)
                .unwrap()
                .and_hms_opt(10, 0, 0)
                .unwrap(),
            start_time: "10:00".to_string(),
            end_time: "11:00".to_string(),
            modality: Modality::Online,
            calendar_event_id: None,
            state,
            revision: 1,
        }
    }

    fn event_row(owner: &str, day: u32) -> Row {
        Row::new()
            .with(events::OWNER, owner)
            .with(events::STARTS_AT, format!("2024-03-{:02}T10:00", day))
            .with(events::START, "10:00")
            .with(events::END, "11:00")
            .with(events::MODALITY, "online")
    }

    #[test]
    fn test_in_sync_snapshot_is_noop() {
        let internal = vec![
            template("alice", 1, LifecycleState::Active),
            template("bob", 2, LifecycleState::Active),
        ];
        let external = vec![template_row("bob", 2, "online"), template_row("alice", 1, "online")];

        let result = merge::<Templates>(internal, external, &owners()).unwrap();

        assert!(result.is_noop());
        assert_eq!(result.rows_out.len(), 2);
        assert!(result.anomalies.is_empty());
    }

    #[test]
    fn test_active_record_adopts_table_edit() {
        let internal = vec![template("alice", 1, LifecycleState::Active)];
        let external = vec![template_row("alice", 1, "offline")];

        let result = merge::<Templates>(internal, external, &owners()).unwrap();

        assert_eq!(result.updates.len(), 1);
        assert_eq!(result.updates[0].modality, Modality::Offline);
        assert_eq!(result.updates[0].state, LifecycleState::Active);
        assert!(!result.external_dirty);
    }

    #[test]
    fn test_pending_push_wins_divergent_edit() {
        let mut record = template("alice", 1, LifecycleState::PendingPush);
        record.modality = Modality::Rental;
        let external = vec![template_row("alice", 1, "offline")];

        let result = merge::<Templates>(vec![record], external, &owners()).unwrap();

        assert!(result.updates.is_empty());
        assert_eq!(result.confirms.len(), 1);
        assert_eq!(result.confirms[0].modality, Modality::Rental);
        assert_eq!(result.rows_out[0].get(templates::MODALITY), "rental");
        assert!(result.external_dirty);
    }

    #[test]
    fn test_new_pending_record_is_appended() {
        let internal = vec![event("alice", 4, LifecycleState::PendingPush)];

        let result = merge::<Events>(internal, Vec::new(), &owners()).unwrap();

        assert_eq!(result.confirms.len(), 1);
        assert_eq!(result.rows_out, vec![event_row("alice", 4)]);
        assert!(result.external_dirty);
    }

    #[test]
    fn test_row_removed_externally_purges_record() {
        let internal = vec![
            event("bob", 2, LifecycleState::Active),
            event("alice", 3, LifecycleState::Active),
        ];
        let external = vec![event_row("alice", 3)];

        let result = merge::<Events>(internal, external, &owners()).unwrap();

        assert_eq!(result.deletes.len(), 1);
        assert_eq!(result.deletes[0].owner_handle, "bob");
        assert_eq!(result.deletes[0].state, LifecycleState::DeletedExternally);
        assert!(result.anomalies.is_empty());
        assert!(!result.external_dirty);
    }

    #[test]
    fn test_local_delete_withholds_then_purges() {
        let internal = vec![event("alice", 3, LifecycleState::DeletedLocally)];

        let first = merge::<Events>(internal.clone(), vec![event_row("alice", 3)], &owners()).unwrap();
        assert!(first.rows_out.is_empty());
        assert!(first.deletes.is_empty());
        assert!(first.external_dirty);

        let second = merge::<Events>(internal, Vec::new(), &owners()).unwrap();
        assert_eq!(second.deletes.len(), 1);
        assert_eq!(second.deletes[0].state, LifecycleState::DeletedLocally);
        assert!(!second.external_dirty);
    }

    #[test]
    fn test_deleted_externally_with_row_back_is_purged_row_kept() {
        let internal = vec![event("alice", 3, LifecycleState::DeletedExternally)];
        let external = vec![event_row("alice", 3)];

        let result = merge::<Events>(internal, external.clone(), &owners()).unwrap();

        assert_eq!(result.deletes.len(), 1);
        assert_eq!(result.rows_out, external);
    }

    #[test]
    fn test_new_row_is_materialised() {
        let external = vec![template_row("bob", 4, "offline")];

        let result = merge::<Templates>(Vec::new(), external, &owners()).unwrap();

        assert_eq!(result.inserts.len(), 1);
        assert_eq!(result.inserts[0].owner_handle, "bob");
        assert_eq!(result.inserts[0].state, LifecycleState::Active);
    }

    #[test]
    fn test_unknown_owner_is_contained() {
        let external = vec![template_row("alcie", 1, "online"), template_row("bob", 2, "online")];

        let result = merge::<Templates>(Vec::new(), external, &owners()).unwrap();

        assert_eq!(result.anomalies.len(), 1);
        assert_eq!(
            result.anomalies[0].kind,
            AnomalyKind::UnknownOwner {
                handle: "alcie".to_string()
            }
        );
        assert_eq!(result.inserts.len(), 1);
        assert_eq!(result.inserts[0].owner_handle, "bob");
        // The row stays in the table for the operator to fix.
        assert_eq!(result.rows_out.len(), 2);
    }

    #[test]
    fn test_schedule_of_purged_owner_is_skipped() {
        let bob = account("bob", LifecycleState::Active);
        let accounts = merge::<Accounts>(
            vec![account("alice", LifecycleState::Active), bob],
            vec![account_row("alice")],
            &OwnerIndex::default(),
        )
        .unwrap();
        let owners = OwnerIndex::after_merge(
            vec![
                account("alice", LifecycleState::Active),
                account("bob", LifecycleState::Active),
            ],
            &accounts,
        );
        let internal = vec![
            template("bob", 1, LifecycleState::Active),
            template("bob", 2, LifecycleState::PendingPush),
        ];

        let result = merge::<Templates>(internal, Vec::new(), &owners).unwrap();

        assert!(result.anomalies.is_empty());
        assert!(result.deletes.is_empty());
        assert!(result.confirms.is_empty());
        assert!(result.rows_out.is_empty());
    }

    #[test]
    fn test_record_with_missing_owner_is_reported() {
        let internal = vec![
            event("carol", 5, LifecycleState::PendingPush),
            event("alice", 6, LifecycleState::PendingPush),
        ];

        let result = merge::<Events>(internal, Vec::new(), &owners()).unwrap();

        assert_eq!(result.anomalies.len(), 1);
        assert_eq!(
            result.anomalies[0].kind,
            AnomalyKind::UnknownOwner {
                handle: "carol".to_string()
            }
        );
        assert_eq!(result.confirms.len(), 1);
        assert_eq!(result.confirms[0].owner_handle, "alice");
        assert_eq!(result.rows_out.len(), 1);
        assert!(result.deletes.is_empty());
    }

    #[test]
    fn test_malformed_row_holds_internal_counterpart() {
        let internal = vec![template("alice", 1, LifecycleState::Active)];
        let external = vec![template_row("alice", 1, "telepathy")];

        let result = merge::<Templates>(internal, external.clone(), &owners()).unwrap();

        assert_eq!(result.anomalies.len(), 1);
        assert!(result.deletes.is_empty() && result.updates.is_empty());
        assert_eq!(result.rows_out, external);
    }

    #[test]
    fn test_duplicate_rows_are_anomalies() {
        let external = vec![template_row("alice", 1, "online"), template_row("alice", 1, "offline")];

        let result = merge::<Templates>(Vec::new(), external, &owners()).unwrap();

        assert_eq!(result.anomalies.len(), 1);
        assert_eq!(result.anomalies[0].kind, AnomalyKind::DuplicateRow { count: 2 });
        assert!(result.inserts.is_empty());
        assert_eq!(result.rows_out.len(), 2);
    }

    #[test]
    fn test_duplicate_internal_key_is_fatal() {
        let internal = vec![
            template("alice", 1, LifecycleState::Active),
            template("alice", 1, LifecycleState::PendingPush),
        ];

        let result = merge::<Templates>(internal, Vec::new(), &owners());

        assert!(matches!(result, Err(SyncError::DuplicateKey { .. })));
    }

    #[test]
    fn test_shared_secret_blocks_both_accounts() {
        let internal = vec![account("alice", LifecycleState::Active)];
        let external = vec![
            account_row("alice").with(SECRET, "s3cret"),
            account_row("carol").with(SECRET, "s3cret"),
            account_row("dave"),
        ];

        let result = merge::<Accounts>(internal, external, &OwnerIndex::default()).unwrap();

        assert_eq!(result.anomalies.len(), 2);
        assert!(result.updates.is_empty());
        assert_eq!(result.inserts.len(), 1);
        assert_eq!(result.inserts[0].handle, "dave");
    }

    #[test]
    fn test_rows_out_in_display_order() {
        let internal = vec![
            event("bob", 9, LifecycleState::PendingPush),
            event("alice", 2, LifecycleState::PendingPush),
        ];
        let external = vec![event_row("bob", 5)];

        let result = merge::<Events>(internal, external, &owners()).unwrap();

        let order: Vec<&str> = result.rows_out.iter().map(|r| r.get(events::STARTS_AT)).collect();
        assert_eq!(order, vec!["2024-03-02T10:00", "2024-03-05T10:00", "2024-03-09T10:00"]);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let internal = vec![
            template("alice", 1, LifecycleState::PendingPush),
            template("bob", 2, LifecycleState::Active),
        ];
        let external = vec![template_row("bob", 2, "online"), template_row("bob", 5, "offline")];

        let first = merge::<Templates>(internal, external, &owners()).unwrap();

        // State as it is after commit, write and confirm.
        let mut settled: Vec<RecurringTemplate> = first.confirms.clone();
        for record in &mut settled {
            record.state = LifecycleState::Active;
        }
        settled.extend(first.inserts.clone());
        settled.push(template("bob", 2, LifecycleState::Active));

        let second = merge::<Templates>(settled, first.rows_out.clone(), &owners()).unwrap();
        assert!(second.is_noop());
        assert_eq!(second.rows_out, first.rows_out);
    }
}
