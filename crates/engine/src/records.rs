//! Conversion between domain snapshots and storage records.

use gatehouse_core::{
    Action, GateError, LinkedResident, Role, SubjectInfo, Timestamps, TrackedEntity,
    TransitionRecord, Variant,
};
use gatehouse_storage::{EntityRecord, GateStorage, LedgerRecord, StorageError};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

pub(crate) fn storage_err(e: StorageError) -> GateError {
    match e {
        StorageError::ConcurrentConflict { entity_id, .. } => GateError::Conflict { entity_id },
        StorageError::EntityNotFound { entity_id } => {
            GateError::not_found(format!("no entity with id {entity_id}"))
        }
        StorageError::CredentialTaken {
            variant,
            credential,
            holder,
        } => GateError::DuplicateCredential {
            variant,
            credential,
            holder,
        },
        StorageError::AlreadyExists { entity_id } => {
            GateError::Storage(format!("entity id {entity_id} collided"))
        }
        StorageError::Backend(msg) => GateError::Storage(msg),
    }
}

/// Roll back a snapshot whose staging failed. The staging error is what the
/// caller reports, so a failing abort is only logged.
pub(crate) async fn abort<S: GateStorage>(storage: &S, snapshot: S::Snapshot, entity_id: &str) {
    if let Err(e) = storage.abort_snapshot(snapshot).await {
        tracing::warn!(entity_id, error = %e, "snapshot abort failed");
    }
}

/// Current time, UTC.
pub(crate) fn now() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

fn fmt_ts(t: OffsetDateTime) -> Result<String, GateError> {
    t.format(&Rfc3339)
        .map_err(|e| GateError::Storage(format!("timestamp {t}: {e}")))
}

fn fmt_opt(t: Option<OffsetDateTime>) -> Result<Option<String>, GateError> {
    t.map(fmt_ts).transpose()
}

fn parse_ts(s: &str) -> Result<OffsetDateTime, GateError> {
    OffsetDateTime::parse(s, &Rfc3339)
        .map_err(|e| GateError::Storage(format!("stored timestamp '{s}': {e}")))
}

fn parse_opt(s: Option<&str>) -> Result<Option<OffsetDateTime>, GateError> {
    s.map(parse_ts).transpose()
}

fn corrupt(what: &str, e: GateError) -> GateError {
    GateError::Storage(format!("stored {what} is unreadable: {e}"))
}

pub(crate) fn to_record(entity: &TrackedEntity) -> Result<EntityRecord, GateError> {
    let ts = &entity.timestamps;
    Ok(EntityRecord {
        id: entity.id.clone(),
        variant: entity.variant.as_str().to_string(),
        credential: entity.credential.clone(),
        active: !entity.is_terminal(),
        status: entity.status.clone(),
        blocked: entity.blocked,
        subject: entity.subject.to_value(),
        linked_flat: entity.linked_resident.as_ref().map(|r| r.flat_no.clone()),
        linked_name: entity.linked_resident.as_ref().and_then(|r| r.name.clone()),
        created_at: fmt_ts(ts.created_at)?,
        expected_at: fmt_opt(ts.expected_at)?,
        last_entry_at: fmt_opt(ts.last_entry_at)?,
        last_exit_at: fmt_opt(ts.last_exit_at)?,
        status_changed_at: fmt_ts(ts.status_changed_at)?,
        updated_at: fmt_ts(ts.updated_at)?,
        version: entity.version,
    })
}

pub(crate) fn from_record(rec: EntityRecord) -> Result<TrackedEntity, GateError> {
    let variant: Variant = rec.variant.parse().map_err(|e| corrupt("variant", e))?;
    let subject = SubjectInfo::parse(variant, rec.subject).map_err(|e| corrupt("subject", e))?;
    let timestamps = Timestamps {
        created_at: parse_ts(&rec.created_at)?,
        expected_at: parse_opt(rec.expected_at.as_deref())?,
        last_entry_at: parse_opt(rec.last_entry_at.as_deref())?,
        last_exit_at: parse_opt(rec.last_exit_at.as_deref())?,
        status_changed_at: parse_ts(&rec.status_changed_at)?,
        updated_at: parse_ts(&rec.updated_at)?,
    };
    Ok(TrackedEntity {
        id: rec.id,
        variant,
        credential: rec.credential,
        status: rec.status,
        blocked: rec.blocked,
        subject,
        linked_resident: rec.linked_flat.map(|flat_no| LinkedResident {
            flat_no,
            name: rec.linked_name,
        }),
        timestamps,
        version: rec.version,
    })
}

pub(crate) fn to_ledger(t: &TransitionRecord) -> Result<LedgerRecord, GateError> {
    Ok(LedgerRecord {
        seq: t.seq,
        entity_id: t.entity_id.clone(),
        variant: t.variant.as_str().to_string(),
        action: t.action.as_str().to_string(),
        from_status: t.from_status.clone(),
        to_status: t.to_status.clone(),
        actor: t.actor.clone(),
        actor_role: t.actor_role.as_str().to_string(),
        recorded_at: fmt_ts(t.timestamp)?,
        notes: t.notes.clone(),
        action_taken: t.action_taken.clone(),
    })
}

pub(crate) fn from_ledger(r: LedgerRecord) -> Result<TransitionRecord, GateError> {
    let variant: Variant = r.variant.parse().map_err(|e| corrupt("variant", e))?;
    let action: Action = r.action.parse().map_err(|e| corrupt("action", e))?;
    let actor_role: Role = r.actor_role.parse().map_err(|e| corrupt("actor role", e))?;
    Ok(TransitionRecord {
        seq: r.seq,
        entity_id: r.entity_id,
        variant,
        action,
        from_status: r.from_status,
        to_status: r.to_status,
        actor: r.actor,
        actor_role,
        timestamp: parse_ts(&r.recorded_at)?,
        notes: r.notes,
        action_taken: r.action_taken,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatehouse_core::subject::VisitorSubject;
    use time::macros::datetime;

    fn visitor() -> TrackedEntity {
        let now = datetime!(2026-10-16 09:00 UTC);
        TrackedEntity {
            id: "v1".into(),
            variant: Variant::Visitor,
            credential: Some("VIS-ABCDEFGHJK".into()),
            status: "checked_out".into(),
            blocked: false,
            subject: SubjectInfo::Visitor(VisitorSubject {
                name: "Ravi".into(),
                phone: "9876543210".into(),
                flat_no: "B-202".into(),
                purpose: "Guest".into(),
                image_ref: None,
            }),
            linked_resident: Some(LinkedResident {
                flat_no: "B-202".into(),
                name: Some("Sharma".into()),
            }),
            timestamps: Timestamps::at_creation(now, None),
            version: 3,
        }
    }

    #[test]
    fn terminal_entity_stored_inactive() {
        let rec = to_record(&visitor()).unwrap();
        assert!(!rec.active);
        assert_eq!(rec.linked_name.as_deref(), Some("Sharma"));
        assert_eq!(rec.created_at, "2026-10-16T09:00:00Z");
    }

    #[test]
    fn record_reads_back_as_same_entity() {
        let entity = visitor();
        let back = from_record(to_record(&entity).unwrap()).unwrap();
        assert_eq!(back, entity);
    }

    #[test]
    fn corrupt_variant_is_storage_error() {
        let mut rec = to_record(&visitor()).unwrap();
        rec.variant = "spaceship".into();
        assert_eq!(from_record(rec).unwrap_err().kind(), "Storage");
    }

    #[test]
    fn credential_taken_maps_to_duplicate() {
        let err = storage_err(StorageError::CredentialTaken {
            variant: "delivery".into(),
            credential: "D-001".into(),
            holder: "d1".into(),
        });
        assert_eq!(err.kind(), "DuplicateCredential");
    }
}
