//! Verification gateway: the authenticated front door of the engine.
//!
//! Every call names its caller by token. The gateway authenticates it,
//! delegates to the store, engine or ledger, and hands committed
//! transitions to the notifier.

use std::sync::Arc;
use std::time::Duration;

use gatehouse_core::{Action, Actor, GateError, TrackedEntity, Variant};
use gatehouse_storage::GateStorage;
use serde::Serialize;

use crate::directory::ResidentDirectory;
use crate::engine::{Applied, TransitionEngine, TransitionRequest};
use crate::identity::{authenticate, IdentityProvider};
use crate::ledger::{ChangeFeed, History, HistoryLedger};
use crate::notify::{Notifier, TracingNotifier};
use crate::store::{CredentialStore, EntityFilter, NewEntity};

/// How long after an entry or exit a further scan of the same entity is
/// taken as a repeat of that scan.
pub const DEFAULT_RESCAN_WINDOW: Duration = Duration::from_secs(2);

/// An entity after a successful transition, with a line for the operator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Outcome {
    pub entity: TrackedEntity,
    pub message: String,
}

pub struct Gateway<S> {
    store: CredentialStore<S>,
    engine: TransitionEngine<S>,
    ledger: HistoryLedger<S>,
    identity: Arc<dyn IdentityProvider>,
    notifier: Arc<dyn Notifier>,
    rescan_window: Duration,
}

impl<S: GateStorage> Gateway<S> {
    pub fn new(
        storage: Arc<S>,
        identity: Arc<dyn IdentityProvider>,
        directory: Arc<dyn ResidentDirectory>,
    ) -> Self {
        Gateway {
            store: CredentialStore::new(storage.clone(), directory),
            engine: TransitionEngine::new(storage.clone()),
            ledger: HistoryLedger::new(storage),
            identity,
            notifier: Arc::new(TracingNotifier),
            rescan_window: DEFAULT_RESCAN_WINDOW,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// A zero window accepts back-to-back scans of one credential.
    pub fn with_rescan_window(mut self, window: Duration) -> Self {
        self.rescan_window = window;
        self
    }

    pub fn store(&self) -> &CredentialStore<S> {
        &self.store
    }

    pub fn engine(&self) -> &TransitionEngine<S> {
        &self.engine
    }

    pub fn ledger(&self) -> &HistoryLedger<S> {
        &self.ledger
    }

    pub async fn authenticate(&self, token: Option<&str>) -> Result<Actor, GateError> {
        authenticate(&*self.identity, token).await
    }

    /// A security operator presents a raw credential at the gate.
    ///
    /// The credential is normalized and resolved, and the single inferred
    /// edge of the entity's current status is applied. A scan that finds the
    /// entity moved since resolution, or moved through the gate within the
    /// rescan window, fails with `IllegalTransition`: of two guards scanning
    /// the same code at once, exactly one succeeds.
    pub async fn verify(
        &self,
        token: Option<&str>,
        raw_credential: &str,
        variant: Variant,
    ) -> Result<Outcome, GateError> {
        let actor = self.authenticate(token).await?;
        let entity = self.store.resolve(variant, raw_credential).await?;
        tracing::debug!(
            %variant,
            entity_id = %entity.id,
            status = %entity.status,
            "credential resolved"
        );
        let applied = self
            .engine
            .scan(&actor, &entity.id, entity.version, self.rescan_window)
            .await?;
        Ok(self.finish(applied))
    }

    /// Apply a caller-specified edge to an entity by id.
    pub async fn act(
        &self,
        token: Option<&str>,
        entity_id: &str,
        request: TransitionRequest,
    ) -> Result<Outcome, GateError> {
        let actor = self.authenticate(token).await?;
        let applied = self.engine.transition(&actor, entity_id, request).await?;
        Ok(self.finish(applied))
    }

    /// Apply the inferred edge to an entity by id: the emergency quick
    /// update, or a staff or vehicle movement picked from a list.
    pub async fn advance(
        &self,
        token: Option<&str>,
        entity_id: &str,
        notes: Option<String>,
    ) -> Result<Outcome, GateError> {
        let actor = self.authenticate(token).await?;
        let applied = self.engine.advance(&actor, entity_id, notes).await?;
        Ok(self.finish(applied))
    }

    pub async fn create(
        &self,
        token: Option<&str>,
        new: NewEntity,
    ) -> Result<TrackedEntity, GateError> {
        let actor = self.authenticate(token).await?;
        let created = self.store.create(&actor, new).await?;
        if let Some(approval) = &created.approval {
            self.notifier.notify(&created.entity, approval);
        }
        Ok(created.entity)
    }

    pub async fn update(
        &self,
        token: Option<&str>,
        entity_id: &str,
        patch: &serde_json::Value,
    ) -> Result<TrackedEntity, GateError> {
        let actor = self.authenticate(token).await?;
        self.store.update(&actor, entity_id, patch).await
    }

    pub async fn delete(
        &self,
        token: Option<&str>,
        entity_id: &str,
    ) -> Result<TrackedEntity, GateError> {
        let actor = self.authenticate(token).await?;
        self.store.delete(&actor, entity_id).await
    }

    pub async fn get(&self, token: Option<&str>, entity_id: &str) -> Result<TrackedEntity, GateError> {
        self.authenticate(token).await?;
        self.store.get(entity_id).await
    }

    pub async fn list(
        &self,
        token: Option<&str>,
        filter: &EntityFilter,
    ) -> Result<Vec<TrackedEntity>, GateError> {
        self.authenticate(token).await?;
        self.store.list(filter).await
    }

    pub async fn history(&self, token: Option<&str>, entity_id: &str) -> Result<History, GateError> {
        self.authenticate(token).await?;
        self.ledger.history(entity_id).await
    }

    pub async fn changes(
        &self,
        token: Option<&str>,
        since: u64,
        limit: usize,
    ) -> Result<ChangeFeed, GateError> {
        self.authenticate(token).await?;
        self.ledger.changes_since(since, limit).await
    }

    fn finish(&self, applied: Applied) -> Outcome {
        self.notifier.notify(&applied.entity, &applied.record);
        let message = outcome_message(&applied.entity, applied.record.action);
        Outcome {
            entity: applied.entity,
            message,
        }
    }
}

/// The line shown to the operator after `action` was applied to `entity`.
pub fn outcome_message(entity: &TrackedEntity, action: Action) -> String {
    let name = entity.subject.display_name();
    let credential = entity.credential.as_deref().unwrap_or(&entity.id);
    match (entity.variant, action) {
        (Variant::Delivery, Action::Entry) => {
            format!("Delivery {credential} approved for entry ({name})")
        }
        (Variant::Delivery, Action::Exit) => format!("Delivery {credential} completed; exit recorded"),
        (Variant::Visitor, Action::Approve) => format!("Visitor {name} approved"),
        (Variant::Visitor, Action::Deny) => format!("Visitor {name} denied"),
        (Variant::Visitor, Action::CheckIn) => format!("Visitor {name} checked in"),
        (Variant::Visitor, Action::CheckOut) => format!("Visitor {name} checked out"),
        (Variant::Staff, Action::Entry) => format!("{name} marked inside"),
        (Variant::Staff, Action::Exit) => format!("{name} marked outside"),
        (Variant::Staff, Action::Block) => format!("{name} blocked"),
        (Variant::Staff, Action::Unblock) => format!("{name} unblocked"),
        (Variant::Vehicle, Action::Entry) => format!("Vehicle {credential} entered"),
        (Variant::Vehicle, Action::Exit) => format!("Vehicle {credential} exited"),
        (Variant::Emergency, Action::StartProcessing) => {
            format!("{name} alert is now being processed")
        }
        (Variant::Emergency, Action::Resolve) => format!("{name} alert resolved"),
        (variant, action) => format!("{variant} {credential}: {action} recorded"),
    }
}
