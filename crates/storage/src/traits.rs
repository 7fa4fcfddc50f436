use async_trait::async_trait;

use crate::error::StorageError;
use crate::record::{EntityRecord, LedgerRecord};

/// The storage trait for gatehouse backends.
///
/// A `GateStorage` implementation provides transactional storage for entity
/// records and the append-only transition ledger.
///
/// ## Snapshot Semantics
///
/// All mutating operations take `&mut Self::Snapshot`, a type representing an
/// in-progress transaction. The lifecycle is:
///
/// 1. `begin_snapshot()` - start a transaction, returns a `Snapshot`
/// 2. Call mutating methods with `&mut snapshot`
/// 3. `commit_snapshot(snapshot)` - commit and consume the transaction
///    OR `abort_snapshot(snapshot)` - roll back and consume the transaction
///
/// If a `Snapshot` is dropped without committing, nothing it staged may
/// become visible.
///
/// ## Per-entity serialization
///
/// Reading an entity for update, updating it, deleting it or inserting it
/// takes an exclusive lock on that entity id, held until the snapshot is
/// committed or aborted. A second snapshot touching the same id waits.
/// Snapshots touching different ids never wait on each other.
///
/// ## OCC Conflict Detection
///
/// `update_entity` and `delete_entity` are conditional on
/// `version = expected_version`. A mismatch returns
/// `Err(StorageError::ConcurrentConflict { ... })`.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync + 'static` to be used in axum
/// application state and across async task boundaries.
#[async_trait]
pub trait GateStorage: Send + Sync + 'static {
    /// The snapshot (transaction) type used by this storage backend.
    type Snapshot: Send;

    // ── Snapshot lifecycle ────────────────────────────────────────────────────

    /// Begin a new snapshot (transaction).
    async fn begin_snapshot(&self) -> Result<Self::Snapshot, StorageError>;

    /// Commit a snapshot, making all mutations visible at once.
    ///
    /// Returns the sequence numbers assigned to the snapshot's ledger
    /// appends, in append order. Sequence numbers are dense and follow
    /// commit order, so a reader paging with `ledger_since` never skips an
    /// entry that commits later.
    ///
    /// Re-checks credential uniqueness across the whole store; returns
    /// `CredentialTaken` if a concurrent snapshot committed the same active
    /// credential first.
    async fn commit_snapshot(&self, snapshot: Self::Snapshot) -> Result<Vec<u64>, StorageError>;

    /// Abort (roll back) a snapshot, discarding all mutations.
    async fn abort_snapshot(&self, snapshot: Self::Snapshot) -> Result<(), StorageError>;

    // ── Entity operations (within snapshot) ──────────────────────────────────

    /// Insert a new entity record at version 0.
    ///
    /// Returns `AlreadyExists` if the id is taken and `CredentialTaken` if
    /// the record is active and another active record of the same variant
    /// holds its credential.
    async fn insert_entity(
        &self,
        snapshot: &mut Self::Snapshot,
        record: EntityRecord,
    ) -> Result<(), StorageError>;

    /// Read an entity, locking it for the rest of the snapshot.
    ///
    /// Sees this snapshot's own staged writes.
    async fn get_entity_for_update(
        &self,
        snapshot: &mut Self::Snapshot,
        entity_id: &str,
    ) -> Result<EntityRecord, StorageError>;

    /// Replace an entity record, conditional on `expected_version`.
    ///
    /// Returns the new version number (`expected_version + 1`).
    async fn update_entity(
        &self,
        snapshot: &mut Self::Snapshot,
        record: EntityRecord,
        expected_version: i64,
    ) -> Result<i64, StorageError>;

    /// Remove an entity record, conditional on `expected_version`.
    ///
    /// Ledger entries of the entity are kept.
    async fn delete_entity(
        &self,
        snapshot: &mut Self::Snapshot,
        entity_id: &str,
        expected_version: i64,
    ) -> Result<(), StorageError>;

    /// Append a ledger record. The entity must exist in the snapshot's view.
    ///
    /// Must be called in the SAME snapshot as the `update_entity` it
    /// describes: no status change without its history entry.
    async fn append_ledger(
        &self,
        snapshot: &mut Self::Snapshot,
        record: LedgerRecord,
    ) -> Result<(), StorageError>;

    // ── Query operations (committed state only) ──────────────────────────────

    /// Read an entity's committed record without locking.
    async fn get_entity(&self, entity_id: &str) -> Result<EntityRecord, StorageError>;

    /// Resolve a normalized credential of `variant`.
    ///
    /// Prefers the active holder; when only inactive holders exist, returns
    /// the most recently inserted one.
    async fn find_by_credential(
        &self,
        variant: &str,
        credential: &str,
    ) -> Result<Option<EntityRecord>, StorageError>;

    /// List entities, newest first, optionally filtered by variant and status.
    async fn list_entities(
        &self,
        variant: Option<&str>,
        status_filter: Option<&str>,
    ) -> Result<Vec<EntityRecord>, StorageError>;

    /// Ledger entries of one entity in insertion order.
    async fn list_ledger(&self, entity_id: &str) -> Result<Vec<LedgerRecord>, StorageError>;

    /// Ledger entries with `seq > after_seq`, in insertion order.
    ///
    /// - `limit`: maximum number of results (0 = no limit)
    async fn ledger_since(
        &self,
        after_seq: u64,
        limit: usize,
    ) -> Result<Vec<LedgerRecord>, StorageError>;
}
