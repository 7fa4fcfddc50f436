//! History ledger: read side of the append-only transition log.
//!
//! Appends happen inside the transition engine's snapshots; this module only
//! reads, orders and replays what was committed.

use std::sync::Arc;

use gatehouse_core::machine::{ReplayError, ReplayStep, Replayed};
use gatehouse_core::{GateError, StateMachine, TransitionRecord, Variant};
use gatehouse_storage::{GateStorage, StorageError};
use serde::Serialize;

use crate::records::{from_ledger, from_record, storage_err};

/// Upper bound on one page of the change feed.
pub const MAX_CHANGES: usize = 1000;

/// One entity's history, with its replay verdict.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct History {
    pub entity_id: String,
    pub history: Vec<TransitionRecord>,
    pub consistent: bool,
}

/// A page of the global change feed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeFeed {
    pub changes: Vec<TransitionRecord>,
    /// Pass as `since` to fetch the following page.
    pub next: u64,
}

/// Outcome of folding an entity's history through its machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Consistency {
    /// Replay ends where the stored entity is (or the entity was deleted and
    /// the history is a legal path).
    Consistent(Replayed),
    /// Every step is legal but the replayed end differs from the stored one.
    Diverged {
        replayed: Replayed,
        status: String,
        blocked: bool,
    },
    /// Some step is not a legal move from where the previous one ended.
    Broken(ReplayError),
}

impl Consistency {
    pub fn is_consistent(&self) -> bool {
        matches!(self, Consistency::Consistent(_))
    }
}

pub struct HistoryLedger<S> {
    storage: Arc<S>,
}

impl<S: GateStorage> HistoryLedger<S> {
    pub fn new(storage: Arc<S>) -> Self {
        HistoryLedger { storage }
    }

    /// History of one entity, ascending by timestamp; ties keep insertion order.
    ///
    /// Deleted entities keep their history. An id with neither an entity nor
    /// history is `NotFound`.
    pub async fn query(&self, entity_id: &str) -> Result<Vec<TransitionRecord>, GateError> {
        let records = self
            .storage
            .list_ledger(entity_id)
            .await
            .map_err(storage_err)?;
        if records.is_empty() {
            // Distinguish "no transitions yet" from "no such entity".
            self.storage
                .get_entity(entity_id)
                .await
                .map_err(storage_err)?;
        }
        let mut history = records
            .into_iter()
            .map(from_ledger)
            .collect::<Result<Vec<_>, _>>()?;
        history.sort_by_key(|r| (r.timestamp, r.seq));
        Ok(history)
    }

    /// Replay an entity's history and compare it with the stored entity.
    pub async fn replay(&self, entity_id: &str) -> Result<Consistency, GateError> {
        let history = self.query(entity_id).await?;
        self.verdict(entity_id, &history).await
    }

    /// History plus its replay verdict, as served to clients.
    pub async fn history(&self, entity_id: &str) -> Result<History, GateError> {
        let history = self.query(entity_id).await?;
        let consistency = self.verdict(entity_id, &history).await?;
        if !consistency.is_consistent() {
            tracing::warn!(entity_id, ?consistency, "history does not replay to stored state");
        }
        Ok(History {
            entity_id: entity_id.to_string(),
            history,
            consistent: consistency.is_consistent(),
        })
    }

    async fn verdict(
        &self,
        entity_id: &str,
        history: &[TransitionRecord],
    ) -> Result<Consistency, GateError> {
        let stored = match self.storage.get_entity(entity_id).await {
            Ok(rec) => Some(from_record(rec)?),
            Err(StorageError::EntityNotFound { .. }) => None,
            Err(e) => return Err(storage_err(e)),
        };
        let variant = match (&stored, history.first()) {
            (Some(entity), _) => entity.variant,
            (None, Some(first)) => first.variant,
            (None, None) => {
                return Err(GateError::not_found(format!("no entity with id {entity_id}")))
            }
        };
        let stored = stored.as_ref().map(|e| (e.status.as_str(), e.blocked));
        Ok(check_history(variant, history, stored))
    }

    /// Committed transitions after `since`, in commit order.
    ///
    /// `limit` 0 or above [`MAX_CHANGES`] is clamped to `MAX_CHANGES`.
    pub async fn changes_since(&self, since: u64, limit: usize) -> Result<ChangeFeed, GateError> {
        let limit = if limit == 0 { MAX_CHANGES } else { limit.min(MAX_CHANGES) };
        let records = self
            .storage
            .ledger_since(since, limit)
            .await
            .map_err(storage_err)?;
        let changes = records
            .into_iter()
            .map(from_ledger)
            .collect::<Result<Vec<_>, _>>()?;
        let next = changes.last().map_or(since, |r| r.seq);
        Ok(ChangeFeed { changes, next })
    }
}

/// Fold `history` through the machine of `variant` and compare the result
/// with `stored` (status, blocked), if the entity still exists.
pub fn check_history(
    variant: Variant,
    history: &[TransitionRecord],
    stored: Option<(&str, bool)>,
) -> Consistency {
    let steps = history.iter().map(|r| ReplayStep {
        action: r.action,
        from: &r.from_status,
        to: &r.to_status,
    });
    match StateMachine::of(variant).replay(steps) {
        Err(e) => Consistency::Broken(e),
        Ok(replayed) => match stored {
            Some((status, blocked)) if replayed.status != status || replayed.blocked != blocked => {
                Consistency::Diverged {
                    replayed,
                    status: status.to_string(),
                    blocked,
                }
            }
            _ => Consistency::Consistent(replayed),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatehouse_core::{Action, Role};
    use time::macros::datetime;

    fn rec(seq: u64, action: Action, from: &str, to: &str) -> TransitionRecord {
        TransitionRecord {
            seq,
            entity_id: "s1".into(),
            variant: Variant::Staff,
            action,
            from_status: from.into(),
            to_status: to.into(),
            actor: "Gate 1".into(),
            actor_role: Role::Security,
            timestamp: datetime!(2026-10-16 09:00 UTC),
            notes: None,
            action_taken: None,
        }
    }

    #[test]
    fn staff_history_with_block_replays() {
        let history = vec![
            rec(1, Action::Entry, "outside", "inside"),
            rec(2, Action::Block, "inside", "inside"),
            rec(3, Action::Unblock, "inside", "inside"),
            rec(4, Action::Exit, "inside", "outside"),
        ];
        let c = check_history(Variant::Staff, &history, Some(("outside", false)));
        assert!(c.is_consistent(), "{c:?}");
    }

    #[test]
    fn stored_status_mismatch_diverges() {
        let history = vec![rec(1, Action::Entry, "outside", "inside")];
        let c = check_history(Variant::Staff, &history, Some(("outside", false)));
        assert!(matches!(c, Consistency::Diverged { .. }));
    }

    #[test]
    fn skipped_step_is_broken() {
        let history = vec![
            rec(1, Action::Entry, "outside", "inside"),
            rec(2, Action::Entry, "outside", "inside"),
        ];
        let c = check_history(Variant::Staff, &history, None);
        match c {
            Consistency::Broken(e) => assert_eq!(e.index, 1),
            other => panic!("expected Broken, got {other:?}"),
        }
    }
}
