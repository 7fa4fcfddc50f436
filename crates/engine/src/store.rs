//! Credential store: the canonical record of every tracked entity.

use std::sync::Arc;

use gatehouse_core::credential::normalize;
use gatehouse_core::{
    Action, Actor, GateError, LinkedResident, Operation, Role, SubjectInfo, Timestamps,
    TrackedEntity, TransitionRecord, Variant,
};
use gatehouse_storage::GateStorage;
use serde::Deserialize;

use crate::codes;
use crate::directory::ResidentDirectory;
use crate::engine::apply_transit;
use crate::records::{abort, from_record, now, storage_err, to_ledger, to_record};

/// Attempts at drawing a generated credential before giving up.
const GENERATE_ATTEMPTS: usize = 3;

/// Payload of a create call.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NewEntity {
    pub variant: Variant,
    pub subject: serde_json::Value,
    #[serde(default)]
    pub credential: Option<String>,
}

/// A created entity, plus its approval when a resident pre-registered it.
#[derive(Debug, Clone, PartialEq)]
pub struct Created {
    pub entity: TrackedEntity,
    pub approval: Option<TransitionRecord>,
}

/// List filter. All criteria are optional and combine with AND.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct EntityFilter {
    #[serde(default)]
    pub variant: Option<Variant>,
    #[serde(default)]
    pub status: Option<String>,
    /// Only entities physically on the premises.
    #[serde(default)]
    pub inside: Option<bool>,
    /// Case-insensitive substring of the subject's name.
    #[serde(default)]
    pub q: Option<String>,
}

impl EntityFilter {
    fn matches(&self, entity: &TrackedEntity) -> bool {
        if let Some(inside) = self.inside {
            if entity.is_inside() != inside {
                return false;
            }
        }
        match self.q.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
            Some(q) => entity
                .subject
                .display_name()
                .to_lowercase()
                .contains(&q.to_lowercase()),
            None => true,
        }
    }
}

pub struct CredentialStore<S> {
    storage: Arc<S>,
    directory: Arc<dyn ResidentDirectory>,
}

impl<S: GateStorage> CredentialStore<S> {
    pub fn new(storage: Arc<S>, directory: Arc<dyn ResidentDirectory>) -> Self {
        CredentialStore { storage, directory }
    }

    /// Find the entity a presented credential belongs to.
    ///
    /// When only terminal holders exist the latest one is returned, so the
    /// caller sees why it can no longer move.
    pub async fn resolve(&self, variant: Variant, raw: &str) -> Result<TrackedEntity, GateError> {
        let credential = normalize(variant, raw)?;
        let found = self
            .storage
            .find_by_credential(variant.as_str(), &credential)
            .await
            .map_err(storage_err)?;
        match found {
            Some(rec) => from_record(rec),
            None => Err(GateError::not_found(unknown_credential(variant, &credential))),
        }
    }

    pub async fn get(&self, entity_id: &str) -> Result<TrackedEntity, GateError> {
        let rec = self
            .storage
            .get_entity(entity_id)
            .await
            .map_err(storage_err)?;
        from_record(rec)
    }

    /// Entities matching `filter`, newest first.
    pub async fn list(&self, filter: &EntityFilter) -> Result<Vec<TrackedEntity>, GateError> {
        let records = self
            .storage
            .list_entities(
                filter.variant.map(Variant::as_str),
                filter.status.as_deref(),
            )
            .await
            .map_err(storage_err)?;
        let mut out = Vec::with_capacity(records.len());
        for rec in records {
            let entity = from_record(rec)?;
            if filter.matches(&entity) {
                out.push(entity);
            }
        }
        Ok(out)
    }

    /// Register a new entity.
    ///
    /// A visitor registered by a resident is pre-approved: it is created and
    /// moved `pending -> granted` in the same snapshot, with its own ledger
    /// entry.
    pub async fn create(&self, actor: &Actor, new: NewEntity) -> Result<Created, GateError> {
        let variant = new.variant;
        let subject = SubjectInfo::parse(variant, new.subject)?;

        let flat = match (subject.linked_flat(), variant) {
            (Some(flat), _) => Some(flat.to_string()),
            (None, Variant::Emergency) => actor.flat_no.clone(),
            (None, _) => None,
        };
        actor.authorize(Operation::Create {
            variant,
            flat: flat.as_deref(),
        })?;

        let linked_resident = match &flat {
            Some(flat) => Some(self.directory.resolve(flat).await?),
            None => None,
        };

        let supplied = match (new.credential.as_deref(), variant.has_credential()) {
            (Some(_), false) => {
                return Err(GateError::validation(
                    "credential",
                    format!("{variant} entities carry no credential"),
                ))
            }
            (Some(raw), true) => Some(normalize(variant, raw)?),
            (None, _) => None,
        };
        if supplied.is_none() {
            match variant {
                Variant::Staff => {
                    return Err(GateError::validation("credential", "permanent ID is required"))
                }
                Variant::Vehicle => {
                    return Err(GateError::validation("credential", "vehicle number is required"))
                }
                _ => {}
            }
        }

        let preapprove = variant == Variant::Visitor && actor.role == Role::Resident;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let credential = supplied.clone().or_else(|| codes::generate(variant));
            let entity = new_entity(variant, credential, subject.clone(), linked_resident.clone());
            match self.insert(actor, entity, preapprove).await {
                Err(GateError::DuplicateCredential { .. })
                    if supplied.is_none() && attempt < GENERATE_ATTEMPTS =>
                {
                    tracing::debug!(%variant, attempt, "generated credential collided; drawing again");
                }
                Ok(created) => {
                    tracing::info!(
                        entity_id = %created.entity.id,
                        %variant,
                        status = %created.entity.status,
                        actor = %actor.name,
                        "entity created"
                    );
                    return Ok(created);
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn insert(
        &self,
        actor: &Actor,
        mut entity: TrackedEntity,
        preapprove: bool,
    ) -> Result<Created, GateError> {
        let storage = &*self.storage;
        let mut snapshot = storage.begin_snapshot().await.map_err(storage_err)?;

        let staged = self
            .stage_insert(&mut snapshot, actor, &mut entity, preapprove)
            .await;
        let mut approval = match staged {
            Ok(approval) => approval,
            Err(e) => {
                abort(storage, snapshot, &entity.id).await;
                return Err(e);
            }
        };
        let seqs = storage
            .commit_snapshot(snapshot)
            .await
            .map_err(storage_err)?;
        if let (Some(record), Some(seq)) = (approval.as_mut(), seqs.first()) {
            record.seq = *seq;
        }
        Ok(Created { entity, approval })
    }

    async fn stage_insert(
        &self,
        snapshot: &mut S::Snapshot,
        actor: &Actor,
        entity: &mut TrackedEntity,
        preapprove: bool,
    ) -> Result<Option<TransitionRecord>, GateError> {
        let storage = &*self.storage;
        storage
            .insert_entity(snapshot, to_record(entity)?)
            .await
            .map_err(storage_err)?;
        if !preapprove {
            return Ok(None);
        }

        let transit =
            entity
                .machine()
                .check(&entity.id, &entity.status, entity.blocked, Action::Approve)?;
        let at = entity.timestamps.created_at;
        let record = apply_transit(
            entity,
            &transit,
            actor,
            at,
            Some("pre-registered by resident".to_string()),
            None,
        );
        entity.version = storage
            .update_entity(snapshot, to_record(entity)?, 0)
            .await
            .map_err(storage_err)?;
        storage
            .append_ledger(snapshot, to_ledger(&record)?)
            .await
            .map_err(storage_err)?;
        Ok(Some(record))
    }

    /// Merge `patch` into the subject info of a non-terminal entity.
    pub async fn update(
        &self,
        actor: &Actor,
        entity_id: &str,
        patch: &serde_json::Value,
    ) -> Result<TrackedEntity, GateError> {
        let storage = &*self.storage;
        let mut snapshot = storage.begin_snapshot().await.map_err(storage_err)?;

        let entity = match self
            .stage_update(&mut snapshot, actor, entity_id, patch)
            .await
        {
            Ok(entity) => entity,
            Err(e) => {
                abort(storage, snapshot, entity_id).await;
                return Err(e);
            }
        };
        storage
            .commit_snapshot(snapshot)
            .await
            .map_err(storage_err)?;
        tracing::info!(entity_id, actor = %actor.name, "subject updated");
        Ok(entity)
    }

    async fn stage_update(
        &self,
        snapshot: &mut S::Snapshot,
        actor: &Actor,
        entity_id: &str,
        patch: &serde_json::Value,
    ) -> Result<TrackedEntity, GateError> {
        let storage = &*self.storage;
        let current = storage
            .get_entity_for_update(snapshot, entity_id)
            .await
            .map_err(storage_err)?;
        let mut entity = from_record(current)?;
        ensure_mutable(&entity)?;
        actor.authorize(Operation::Edit {
            variant: entity.variant,
            flat: entity.linked_flat(),
        })?;

        let subject = entity.subject.patched(patch)?;
        let new_flat = subject.linked_flat().map(str::to_string);
        // Moving an entity to another flat needs rights over the new flat too.
        if new_flat.as_deref() != entity.subject.linked_flat() {
            actor.authorize(Operation::Edit {
                variant: entity.variant,
                flat: new_flat.as_deref(),
            })?;
            entity.linked_resident = match new_flat {
                Some(flat) => Some(self.directory.resolve(&flat).await?),
                None => None,
            };
        }
        entity.timestamps.expected_at = subject.expected_at();
        entity.timestamps.updated_at = now();
        entity.subject = subject;

        let expected_version = entity.version;
        entity.version = storage
            .update_entity(snapshot, to_record(&entity)?, expected_version)
            .await
            .map_err(storage_err)?;
        Ok(entity)
    }

    /// Remove a non-terminal entity. Its ledger entries stay queryable.
    pub async fn delete(&self, actor: &Actor, entity_id: &str) -> Result<TrackedEntity, GateError> {
        let storage = &*self.storage;
        let mut snapshot = storage.begin_snapshot().await.map_err(storage_err)?;

        let entity = match self.stage_delete(&mut snapshot, actor, entity_id).await {
            Ok(entity) => entity,
            Err(e) => {
                abort(storage, snapshot, entity_id).await;
                return Err(e);
            }
        };
        storage
            .commit_snapshot(snapshot)
            .await
            .map_err(storage_err)?;
        tracing::info!(entity_id, actor = %actor.name, "entity deleted");
        Ok(entity)
    }

    async fn stage_delete(
        &self,
        snapshot: &mut S::Snapshot,
        actor: &Actor,
        entity_id: &str,
    ) -> Result<TrackedEntity, GateError> {
        let storage = &*self.storage;
        let current = storage
            .get_entity_for_update(snapshot, entity_id)
            .await
            .map_err(storage_err)?;
        let entity = from_record(current)?;
        ensure_mutable(&entity)?;
        actor.authorize(Operation::Edit {
            variant: entity.variant,
            flat: entity.linked_flat(),
        })?;
        storage
            .delete_entity(snapshot, entity_id, entity.version)
            .await
            .map_err(storage_err)?;
        Ok(entity)
    }
}

fn ensure_mutable(entity: &TrackedEntity) -> Result<(), GateError> {
    if entity.is_terminal() {
        return Err(GateError::AlreadyTerminal {
            variant: entity.variant.to_string(),
            entity_id: entity.id.clone(),
            status: entity.status.clone(),
        });
    }
    Ok(())
}

fn new_entity(
    variant: Variant,
    credential: Option<String>,
    subject: SubjectInfo,
    linked_resident: Option<LinkedResident>,
) -> TrackedEntity {
    let at = now();
    let expected_at = subject.expected_at();
    TrackedEntity {
        id: uuid::Uuid::new_v4().to_string(),
        variant,
        credential,
        status: gatehouse_core::StateMachine::of(variant).initial.to_string(),
        blocked: false,
        subject,
        linked_resident,
        timestamps: Timestamps::at_creation(at, expected_at),
        version: 0,
    }
}

fn unknown_credential(variant: Variant, credential: &str) -> String {
    match variant {
        Variant::Visitor => format!(
            "no visitor found for QR code {credential}; capture the visitor's details for approval"
        ),
        Variant::Delivery => format!("no delivery found with code {credential}"),
        Variant::Staff => format!("no staff member found with ID {credential}"),
        Variant::Vehicle => format!("no vehicle registered with number {credential}"),
        Variant::Emergency => format!("no alert found for {credential}"),
    }
}
