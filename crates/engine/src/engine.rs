//! Transition engine: moves one entity along one edge of its machine.
//!
//! A transition runs inside a single storage snapshot. The entity is read
//! with its lock held, checked against the machine and the actor's role,
//! rewritten, and its ledger entry appended; then the snapshot commits. Any
//! failure aborts the snapshot, leaving entity and ledger untouched.

use std::sync::Arc;
use std::time::Duration;

use gatehouse_core::machine::MIN_ACTION_TAKEN_LEN;
use gatehouse_core::{
    Action, Actor, GateError, Operation, Stamp, StateMachine, TrackedEntity, TransitionRecord,
    Transit,
};
use gatehouse_storage::GateStorage;
use serde::Deserialize;
use time::OffsetDateTime;

use crate::records::{abort, from_record, now, storage_err, to_ledger, to_record};

/// A caller-specified transition.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionRequest {
    pub action: Action,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub action_taken: Option<String>,
}

impl TransitionRequest {
    pub fn new(action: Action) -> Self {
        TransitionRequest {
            action,
            notes: None,
            action_taken: None,
        }
    }
}

/// The committed outcome of a transition.
#[derive(Debug, Clone, PartialEq)]
pub struct Applied {
    pub entity: TrackedEntity,
    pub record: TransitionRecord,
}

/// Which edge to take.
#[derive(Debug, Clone, Copy)]
enum Choice {
    Explicit(Action),
    /// The single inferred edge of the current status.
    Inferred,
    /// A gate scan: the inferred edge, provided the entity is still at
    /// `seen_version` and has not crossed the gate within `rescan_window`.
    Scan {
        seen_version: i64,
        rescan_window: Duration,
    },
}

pub struct TransitionEngine<S> {
    storage: Arc<S>,
}

impl<S: GateStorage> TransitionEngine<S> {
    pub fn new(storage: Arc<S>) -> Self {
        TransitionEngine { storage }
    }

    /// Apply a caller-specified edge (approve, deny, explicit resolve, block...).
    pub async fn transition(
        &self,
        actor: &Actor,
        entity_id: &str,
        request: TransitionRequest,
    ) -> Result<Applied, GateError> {
        self.run(
            actor,
            entity_id,
            Choice::Explicit(request.action),
            request.notes,
            request.action_taken,
        )
        .await
    }

    /// Apply the inferred edge of the entity's current status.
    ///
    /// Emergency alerts advancing without action text record the default
    /// quick-update text.
    pub async fn advance(
        &self,
        actor: &Actor,
        entity_id: &str,
        notes: Option<String>,
    ) -> Result<Applied, GateError> {
        self.run(
            actor,
            entity_id,
            Choice::Inferred,
            notes,
            None,
        )
        .await
    }

    /// Apply the inferred edge for a credential scanned at the gate.
    ///
    /// The entity must still be at `seen_version`, the version the scan
    /// resolved, and its last entry or exit must be at least `rescan_window`
    /// old. Either check failing means another scan already moved it, and
    /// this one fails with `IllegalTransition`. Both checks run under the
    /// entity lock, so of two simultaneous scans exactly one applies.
    pub async fn scan(
        &self,
        actor: &Actor,
        entity_id: &str,
        seen_version: i64,
        rescan_window: Duration,
    ) -> Result<Applied, GateError> {
        self.run(
            actor,
            entity_id,
            Choice::Scan {
                seen_version,
                rescan_window,
            },
            None,
            None,
        )
        .await
    }

    async fn run(
        &self,
        actor: &Actor,
        entity_id: &str,
        choice: Choice,
        notes: Option<String>,
        action_taken: Option<String>,
    ) -> Result<Applied, GateError> {
        let storage = &*self.storage;
        let mut snapshot = storage.begin_snapshot().await.map_err(storage_err)?;

        let staged = self
            .stage(&mut snapshot, actor, entity_id, choice, notes, action_taken)
            .await;
        let mut applied = match staged {
            Ok(applied) => applied,
            Err(e) => {
                abort(storage, snapshot, entity_id).await;
                tracing::debug!(entity_id, error = %e, "transition rejected");
                return Err(e);
            }
        };

        let seqs = storage
            .commit_snapshot(snapshot)
            .await
            .map_err(storage_err)?;
        if let Some(seq) = seqs.first() {
            applied.record.seq = *seq;
        }

        tracing::info!(
            entity_id,
            variant = %applied.entity.variant,
            action = %applied.record.action,
            from = %applied.record.from_status,
            to = %applied.record.to_status,
            actor = %actor.name,
            "transition applied"
        );
        Ok(applied)
    }

    async fn stage(
        &self,
        snapshot: &mut S::Snapshot,
        actor: &Actor,
        entity_id: &str,
        choice: Choice,
        notes: Option<String>,
        action_taken: Option<String>,
    ) -> Result<Applied, GateError> {
        let storage = &*self.storage;
        let current = storage
            .get_entity_for_update(snapshot, entity_id)
            .await
            .map_err(storage_err)?;
        let mut entity = from_record(current)?;
        let machine = entity.machine();
        let at = now();

        let (action, quick) = match choice {
            Choice::Explicit(action) => (action, false),
            Choice::Inferred => (inferred_action(&entity)?, true),
            Choice::Scan {
                seen_version,
                rescan_window,
            } => {
                let action = inferred_action(&entity)?;
                check_rescan(&entity, seen_version, rescan_window, at)?;
                (action, true)
            }
        };

        actor.authorize(Operation::Transition {
            variant: entity.variant,
            action,
            flat: entity.linked_flat(),
        })?;
        let transit = machine.check(&entity.id, &entity.status, entity.blocked, action)?;
        let action_taken = action_text(machine, action, action_taken, quick)?;

        let expected_version = entity.version;
        let record = apply_transit(&mut entity, &transit, actor, at, clean(notes), action_taken);
        entity.version = storage
            .update_entity(snapshot, to_record(&entity)?, expected_version)
            .await
            .map_err(storage_err)?;
        storage
            .append_ledger(snapshot, to_ledger(&record)?)
            .await
            .map_err(storage_err)?;

        Ok(Applied { entity, record })
    }
}

/// The action a bare scan takes from the entity's current status.
pub fn inferred_action(entity: &TrackedEntity) -> Result<Action, GateError> {
    let machine = entity.machine();
    if machine.is_terminal(&entity.status) {
        return Err(GateError::AlreadyTerminal {
            variant: entity.variant.to_string(),
            entity_id: entity.id.clone(),
            status: entity.status.clone(),
        });
    }
    let illegal = |reason: String| GateError::IllegalTransition {
        variant: entity.variant.to_string(),
        entity_id: entity.id.clone(),
        action: "scan".to_string(),
        reason,
    };
    if entity.blocked {
        return Err(illegal("staff member is blocked".to_string()));
    }
    match machine.inferred(&entity.status) {
        Some(edge) => Ok(edge.action),
        None => {
            let choices: Vec<&str> = machine
                .outgoing(&entity.status)
                .map(|e| e.action.as_str())
                .collect();
            Err(illegal(format!(
                "status {} needs an explicit action: {}",
                entity.status,
                choices.join(", ")
            )))
        }
    }
}

/// Reject a scan of an entity another scan has just moved.
fn check_rescan(
    entity: &TrackedEntity,
    seen_version: i64,
    rescan_window: Duration,
    at: OffsetDateTime,
) -> Result<(), GateError> {
    let already = |reason: String| GateError::IllegalTransition {
        variant: entity.variant.to_string(),
        entity_id: entity.id.clone(),
        action: "scan".to_string(),
        reason,
    };
    if entity.version != seen_version {
        return Err(already(format!(
            "already scanned, status is now {}",
            entity.status
        )));
    }
    let ts = &entity.timestamps;
    if let Some(last) = ts.last_entry_at.max(ts.last_exit_at) {
        let elapsed_ms = (at - last).whole_milliseconds();
        if elapsed_ms < rescan_window.as_millis() as i128 {
            return Err(already(format!(
                "already scanned {}ms ago, status is now {}",
                elapsed_ms.max(0),
                entity.status
            )));
        }
    }
    Ok(())
}

fn clean(text: Option<String>) -> Option<String> {
    text.map(|t| t.trim().to_string()).filter(|t| !t.is_empty())
}

/// Validate the action-taken payload of `action`.
fn action_text(
    machine: &StateMachine,
    action: Action,
    given: Option<String>,
    quick: bool,
) -> Result<Option<String>, GateError> {
    let given = clean(given);
    if given.is_some() && machine.default_action_taken(action).is_none() {
        return Err(GateError::validation(
            "actionTaken",
            format!("{} on {} takes no action text", action, machine.variant),
        ));
    }
    let text = match given {
        Some(t) => Some(t),
        None if quick => machine.default_action_taken(action).map(str::to_string),
        None => None,
    };
    if machine.requires_action_taken(action)
        && text
            .as_deref()
            .map_or(true, |t| t.chars().count() < MIN_ACTION_TAKEN_LEN)
    {
        return Err(GateError::validation(
            "actionTaken",
            format!(
                "describe the action taken in at least {} characters",
                MIN_ACTION_TAKEN_LEN
            ),
        ));
    }
    Ok(text)
}

/// Move `entity` along `transit` in memory and build its ledger entry.
///
/// The returned record's `seq` is 0 until storage assigns one at commit.
pub(crate) fn apply_transit(
    entity: &mut TrackedEntity,
    transit: &Transit,
    actor: &Actor,
    at: OffsetDateTime,
    notes: Option<String>,
    action_taken: Option<String>,
) -> TransitionRecord {
    let ts = &mut entity.timestamps;
    match transit.stamp {
        Stamp::Entry => ts.last_entry_at = Some(at),
        Stamp::Exit => ts.last_exit_at = Some(at),
        Stamp::None => {}
    }
    if transit.to != transit.from {
        ts.status_changed_at = at;
    }
    ts.updated_at = at;
    entity.status = transit.to.to_string();
    entity.blocked = transit.blocked;
    if let Some(text) = &action_taken {
        entity.subject.set_action_taken(text);
    }

    TransitionRecord {
        seq: 0,
        entity_id: entity.id.clone(),
        variant: entity.variant,
        action: transit.action,
        from_status: transit.from.to_string(),
        to_status: transit.to.to_string(),
        actor: actor.name.clone(),
        actor_role: actor.role,
        timestamp: at,
        notes,
        action_taken,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatehouse_core::subject::StaffSubject;
    use gatehouse_core::{SubjectInfo, Timestamps, Variant};
    use time::macros::datetime;

    fn emergency() -> &'static StateMachine {
        StateMachine::of(Variant::Emergency)
    }

    #[test]
    fn resolve_requires_five_characters() {
        let err = action_text(emergency(), Action::Resolve, Some(" ok ".into()), false)
            .unwrap_err();
        assert_eq!(err.kind(), "ValidationError");
        let err = action_text(emergency(), Action::Resolve, None, false).unwrap_err();
        assert_eq!(err.kind(), "ValidationError");
        let text = action_text(
            emergency(),
            Action::Resolve,
            Some("Fire brigade called".into()),
            false,
        )
        .unwrap();
        assert_eq!(text.as_deref(), Some("Fire brigade called"));
    }

    #[test]
    fn quick_update_uses_default_text() {
        let text = action_text(emergency(), Action::StartProcessing, None, true).unwrap();
        assert_eq!(text.as_deref(), Some("Started processing by security"));
        let text = action_text(emergency(), Action::Resolve, None, true).unwrap();
        assert_eq!(text.as_deref(), Some("Quickly resolved by security"));
    }

    fn staff_inside(entered: OffsetDateTime) -> TrackedEntity {
        let mut timestamps = Timestamps::at_creation(datetime!(2026-10-16 08:00 UTC), None);
        timestamps.last_entry_at = Some(entered);
        TrackedEntity {
            id: "s1".into(),
            variant: Variant::Staff,
            credential: Some("S-42".into()),
            status: "inside".into(),
            blocked: false,
            subject: SubjectInfo::Staff(StaffSubject {
                name: "Meena".into(),
                role: "staff".into(),
                other_role: None,
                flat_no: None,
            }),
            linked_resident: None,
            timestamps,
            version: 1,
        }
    }

    #[test]
    fn rescan_inside_window_is_refused() {
        let entered = datetime!(2026-10-16 09:00:00 UTC);
        let entity = staff_inside(entered);
        let at = datetime!(2026-10-16 09:00:01 UTC);

        let err = check_rescan(&entity, 1, Duration::from_secs(2), at).unwrap_err();
        assert_eq!(err.kind(), "IllegalTransition");
        assert!(err.to_string().contains("already scanned 1000ms ago"), "{err}");

        assert!(check_rescan(&entity, 1, Duration::from_millis(500), at).is_ok());
        assert!(check_rescan(&entity, 1, Duration::ZERO, entered).is_ok());
    }

    #[test]
    fn rescan_of_moved_entity_is_refused() {
        let entity = staff_inside(datetime!(2026-10-16 09:00 UTC));
        let later = datetime!(2026-10-16 10:00 UTC);
        let err = check_rescan(&entity, 0, Duration::ZERO, later).unwrap_err();
        assert_eq!(err.kind(), "IllegalTransition");
        assert!(err.to_string().contains("status is now inside"), "{err}");
    }

    #[test]
    fn action_text_rejected_outside_emergencies() {
        let staff = StateMachine::of(Variant::Staff);
        let err = action_text(staff, Action::Entry, Some("waved in".into()), false).unwrap_err();
        assert_eq!(err.kind(), "ValidationError");
        assert_eq!(action_text(staff, Action::Entry, None, true).unwrap(), None);
    }
}
