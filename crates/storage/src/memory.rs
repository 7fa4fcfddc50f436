//! In-process `GateStorage` backend.
//!
//! Committed state lives behind one `RwLock`. Each entity id has its own
//! async mutex; a snapshot acquires it on first touch and keeps the owned
//! guard until commit or abort, so writers to the same entity queue up while
//! writers to different entities run in parallel. Writes are staged in the
//! snapshot and applied in one step under the write lock at commit.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::error::StorageError;
use crate::record::{EntityRecord, LedgerRecord};
use crate::traits::GateStorage;

struct Stored {
    /// Insertion index, for newest-first listing and credential tie-breaks.
    inserted: u64,
    record: EntityRecord,
}

#[derive(Default)]
struct Committed {
    entities: HashMap<String, Stored>,
    ledger: Vec<LedgerRecord>,
    next_insert: u64,
}

enum Write {
    Insert(EntityRecord),
    Update {
        record: EntityRecord,
        expected_version: i64,
    },
    Delete {
        entity_id: String,
        expected_version: i64,
    },
}

impl Write {
    fn entity_id(&self) -> &str {
        match self {
            Write::Insert(r) | Write::Update { record: r, .. } => &r.id,
            Write::Delete { entity_id, .. } => entity_id,
        }
    }
}

/// A transaction against [`MemoryStorage`].
pub struct MemorySnapshot {
    held: HashMap<String, OwnedMutexGuard<()>>,
    writes: Vec<Write>,
    ledger: Vec<LedgerRecord>,
}

/// Final staged state per touched id: `Some(record)` or `None` for deleted.
type Overlay = HashMap<String, Option<EntityRecord>>;

impl MemorySnapshot {
    /// The latest staged state of `entity_id`, if this snapshot wrote it.
    fn staged(&self, entity_id: &str) -> Option<Option<&EntityRecord>> {
        self.writes
            .iter()
            .rev()
            .find(|w| w.entity_id() == entity_id)
            .map(|w| match w {
                Write::Insert(r) | Write::Update { record: r, .. } => Some(r),
                Write::Delete { .. } => None,
            })
    }

    fn overlay(&self) -> Overlay {
        let mut overlay = Overlay::new();
        for w in &self.writes {
            match w {
                Write::Insert(r) | Write::Update { record: r, .. } => {
                    overlay.insert(r.id.clone(), Some(r.clone()));
                }
                Write::Delete { entity_id, .. } => {
                    overlay.insert(entity_id.clone(), None);
                }
            }
        }
        overlay
    }
}

/// An in-memory storage backend. Not durable; state lives for the process.
#[derive(Default)]
pub struct MemoryStorage {
    committed: RwLock<Committed>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    async fn lock_entity(&self, snapshot: &mut MemorySnapshot, entity_id: &str) {
        if snapshot.held.contains_key(entity_id) {
            return;
        }
        let lock = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(entity_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let guard = lock.lock_owned().await;
        snapshot.held.insert(entity_id.to_string(), guard);
    }

    /// Drop `held` guards, then forget every lock that no other snapshot
    /// holds or waits on. Clones of a lock are only taken under the `locks`
    /// mutex, so a strong count of 1 seen there means nobody else has it.
    async fn release(&self, held: HashMap<String, OwnedMutexGuard<()>>) {
        if held.is_empty() {
            return;
        }
        let ids: Vec<String> = held.keys().cloned().collect();
        drop(held);
        let mut locks = self.locks.lock().await;
        for id in ids {
            if locks.get(&id).is_some_and(|l| Arc::strong_count(l) == 1) {
                locks.remove(&id);
            }
        }
    }

    /// Apply staged writes and ledger entries to committed state in one step.
    async fn apply(
        &self,
        writes: Vec<Write>,
        ledger: Vec<LedgerRecord>,
    ) -> Result<Vec<u64>, StorageError> {
        let mut committed = self.committed.write().await;

        // Replay the staged writes against committed state before touching it.
        let mut overlay = Overlay::new();
        for w in &writes {
            let id = w.entity_id();
            let current = match overlay.get(id) {
                Some(staged) => staged.as_ref(),
                None => committed.entities.get(id).map(|s| &s.record),
            };
            match w {
                Write::Insert(r) => {
                    if current.is_some() {
                        return Err(StorageError::AlreadyExists {
                            entity_id: r.id.clone(),
                        });
                    }
                    overlay.insert(r.id.clone(), Some(r.clone()));
                }
                Write::Update {
                    record,
                    expected_version,
                } => {
                    check_version(current, id, *expected_version)?;
                    overlay.insert(record.id.clone(), Some(record.clone()));
                }
                Write::Delete {
                    entity_id,
                    expected_version,
                } => {
                    check_version(current, id, *expected_version)?;
                    overlay.insert(entity_id.clone(), None);
                }
            }
        }

        for record in overlay.values().flatten() {
            if let Some(holder) = credential_holder(&committed, &overlay, record) {
                return Err(credential_taken(record, holder));
            }
        }

        for (id, staged) in overlay {
            match staged {
                Some(record) => {
                    if let Some(existing) = committed.entities.get_mut(&id) {
                        existing.record = record;
                    } else {
                        committed.next_insert += 1;
                        let inserted = committed.next_insert;
                        committed.entities.insert(id, Stored { inserted, record });
                    }
                }
                None => {
                    committed.entities.remove(&id);
                }
            }
        }

        let mut assigned = Vec::with_capacity(ledger.len());
        for mut entry in ledger {
            entry.seq = committed.ledger.len() as u64 + 1;
            assigned.push(entry.seq);
            committed.ledger.push(entry);
        }

        Ok(assigned)
    }

    /// The entity as this snapshot sees it: its own writes over committed state.
    async fn current(&self, snapshot: &MemorySnapshot, entity_id: &str) -> Option<EntityRecord> {
        match snapshot.staged(entity_id) {
            Some(staged) => staged.cloned(),
            None => self
                .committed
                .read()
                .await
                .entities
                .get(entity_id)
                .map(|s| s.record.clone()),
        }
    }
}

/// Another active holder of `record`'s credential, looking through `overlay`.
fn credential_holder(
    committed: &Committed,
    overlay: &Overlay,
    record: &EntityRecord,
) -> Option<String> {
    let credential = record.credential.as_deref()?;
    if !record.active {
        return None;
    }
    let clashes = |other: &EntityRecord| {
        other.id != record.id
            && other.active
            && other.variant == record.variant
            && other.credential.as_deref() == Some(credential)
    };

    let staged = overlay.values().flatten().find(|r| clashes(*r));
    if let Some(r) = staged {
        return Some(r.id.clone());
    }
    committed
        .entities
        .values()
        .filter(|s| !overlay.contains_key(&s.record.id))
        .find(|s| clashes(&s.record))
        .map(|s| s.record.id.clone())
}

fn credential_taken(record: &EntityRecord, holder: String) -> StorageError {
    StorageError::CredentialTaken {
        variant: record.variant.clone(),
        credential: record.credential.clone().unwrap_or_default(),
        holder,
    }
}

#[async_trait]
impl GateStorage for MemoryStorage {
    type Snapshot = MemorySnapshot;

    async fn begin_snapshot(&self) -> Result<MemorySnapshot, StorageError> {
        Ok(MemorySnapshot {
            held: HashMap::new(),
            writes: Vec::new(),
            ledger: Vec::new(),
        })
    }

    async fn commit_snapshot(&self, snapshot: MemorySnapshot) -> Result<Vec<u64>, StorageError> {
        let MemorySnapshot {
            held,
            writes,
            ledger,
        } = snapshot;
        // Entity guards are released only after the write is visible.
        let result = self.apply(writes, ledger).await;
        self.release(held).await;
        result
    }

    async fn abort_snapshot(&self, snapshot: MemorySnapshot) -> Result<(), StorageError> {
        self.release(snapshot.held).await;
        Ok(())
    }

    async fn insert_entity(
        &self,
        snapshot: &mut MemorySnapshot,
        mut record: EntityRecord,
    ) -> Result<(), StorageError> {
        self.lock_entity(snapshot, &record.id).await;
        if self.current(snapshot, &record.id).await.is_some() {
            return Err(StorageError::AlreadyExists {
                entity_id: record.id,
            });
        }
        record.version = 0;
        {
            let committed = self.committed.read().await;
            if let Some(holder) = credential_holder(&committed, &snapshot.overlay(), &record) {
                return Err(credential_taken(&record, holder));
            }
        }
        snapshot.writes.push(Write::Insert(record));
        Ok(())
    }

    async fn get_entity_for_update(
        &self,
        snapshot: &mut MemorySnapshot,
        entity_id: &str,
    ) -> Result<EntityRecord, StorageError> {
        self.lock_entity(snapshot, entity_id).await;
        self.current(snapshot, entity_id)
            .await
            .ok_or_else(|| StorageError::EntityNotFound {
                entity_id: entity_id.to_string(),
            })
    }

    async fn update_entity(
        &self,
        snapshot: &mut MemorySnapshot,
        mut record: EntityRecord,
        expected_version: i64,
    ) -> Result<i64, StorageError> {
        self.lock_entity(snapshot, &record.id).await;
        let current = self.current(snapshot, &record.id).await;
        check_version(current.as_ref(), &record.id, expected_version)?;
        let new_version = expected_version + 1;
        record.version = new_version;
        snapshot.writes.push(Write::Update {
            record,
            expected_version,
        });
        Ok(new_version)
    }

    async fn delete_entity(
        &self,
        snapshot: &mut MemorySnapshot,
        entity_id: &str,
        expected_version: i64,
    ) -> Result<(), StorageError> {
        self.lock_entity(snapshot, entity_id).await;
        let current = self.current(snapshot, entity_id).await;
        check_version(current.as_ref(), entity_id, expected_version)?;
        snapshot.writes.push(Write::Delete {
            entity_id: entity_id.to_string(),
            expected_version,
        });
        Ok(())
    }

    async fn append_ledger(
        &self,
        snapshot: &mut MemorySnapshot,
        record: LedgerRecord,
    ) -> Result<(), StorageError> {
        if self.current(snapshot, &record.entity_id).await.is_none() {
            return Err(StorageError::EntityNotFound {
                entity_id: record.entity_id,
            });
        }
        snapshot.ledger.push(record);
        Ok(())
    }

    async fn get_entity(&self, entity_id: &str) -> Result<EntityRecord, StorageError> {
        self.committed
            .read()
            .await
            .entities
            .get(entity_id)
            .map(|s| s.record.clone())
            .ok_or_else(|| StorageError::EntityNotFound {
                entity_id: entity_id.to_string(),
            })
    }

    async fn find_by_credential(
        &self,
        variant: &str,
        credential: &str,
    ) -> Result<Option<EntityRecord>, StorageError> {
        let committed = self.committed.read().await;
        let best = committed
            .entities
            .values()
            .filter(|s| {
                s.record.variant == variant && s.record.credential.as_deref() == Some(credential)
            })
            .max_by_key(|s| (s.record.active, s.inserted));
        Ok(best.map(|s| s.record.clone()))
    }

    async fn list_entities(
        &self,
        variant: Option<&str>,
        status_filter: Option<&str>,
    ) -> Result<Vec<EntityRecord>, StorageError> {
        let committed = self.committed.read().await;
        let mut found: Vec<&Stored> = committed
            .entities
            .values()
            .filter(|s| variant.map_or(true, |v| s.record.variant == v))
            .filter(|s| status_filter.map_or(true, |st| s.record.status == st))
            .collect();
        found.sort_by(|a, b| b.inserted.cmp(&a.inserted));
        Ok(found.into_iter().map(|s| s.record.clone()).collect())
    }

    async fn list_ledger(&self, entity_id: &str) -> Result<Vec<LedgerRecord>, StorageError> {
        let committed = self.committed.read().await;
        Ok(committed
            .ledger
            .iter()
            .filter(|r| r.entity_id == entity_id)
            .cloned()
            .collect())
    }

    async fn ledger_since(
        &self,
        after_seq: u64,
        limit: usize,
    ) -> Result<Vec<LedgerRecord>, StorageError> {
        let committed = self.committed.read().await;
        // seq is 1-based and dense, so entry `after_seq` sits at index `after_seq`.
        let start = (after_seq as usize).min(committed.ledger.len());
        let tail = &committed.ledger[start..];
        let take = if limit == 0 { tail.len() } else { limit };
        Ok(tail.iter().take(take).cloned().collect())
    }
}

fn check_version(
    current: Option<&EntityRecord>,
    entity_id: &str,
    expected_version: i64,
) -> Result<(), StorageError> {
    match current {
        None => Err(StorageError::EntityNotFound {
            entity_id: entity_id.to_string(),
        }),
        Some(r) if r.version != expected_version => Err(StorageError::ConcurrentConflict {
            entity_id: entity_id.to_string(),
            expected_version,
        }),
        Some(_) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conformance::{make_entity, make_ledger};

    #[tokio::test]
    async fn own_writes_are_visible_inside_snapshot() {
        let storage = MemoryStorage::new();
        let mut snap = storage.begin_snapshot().await.unwrap();
        storage
            .insert_entity(&mut snap, make_entity("e1", "delivery", Some("D-1"), "pending"))
            .await
            .unwrap();
        let seen = storage.get_entity_for_update(&mut snap, "e1").await.unwrap();
        assert_eq!(seen.version, 0);
        assert!(storage.get_entity("e1").await.is_err());
        storage.commit_snapshot(snap).await.unwrap();
        assert!(storage.get_entity("e1").await.is_ok());
    }

    #[tokio::test]
    async fn ledger_seq_is_dense_across_commits() {
        let storage = MemoryStorage::new();
        for i in 0..3 {
            let id = format!("e{i}");
            let mut snap = storage.begin_snapshot().await.unwrap();
            storage
                .insert_entity(&mut snap, make_entity(&id, "staff", None, "outside"))
                .await
                .unwrap();
            storage
                .append_ledger(&mut snap, make_ledger(&id, "entry", "outside", "inside"))
                .await
                .unwrap();
            storage.commit_snapshot(snap).await.unwrap();
        }
        let all = storage.ledger_since(0, 0).await.unwrap();
        let seqs: Vec<u64> = all.iter().map(|r| r.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        let tail = storage.ledger_since(2, 0).await.unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].entity_id, "e2");
    }

    #[tokio::test]
    async fn entity_locks_are_forgotten_once_released() {
        let storage = MemoryStorage::new();
        let mut snap = storage.begin_snapshot().await.unwrap();
        storage
            .insert_entity(&mut snap, make_entity("e1", "staff", Some("S-1"), "outside"))
            .await
            .unwrap();
        storage.commit_snapshot(snap).await.unwrap();
        assert!(storage.locks.lock().await.is_empty());

        let mut held = storage.begin_snapshot().await.unwrap();
        let rec = storage.get_entity_for_update(&mut held, "e1").await.unwrap();
        assert_eq!(storage.locks.lock().await.len(), 1);
        storage.abort_snapshot(held).await.unwrap();
        assert!(storage.locks.lock().await.is_empty());

        let mut del = storage.begin_snapshot().await.unwrap();
        storage.delete_entity(&mut del, "e1", rec.version).await.unwrap();
        storage.commit_snapshot(del).await.unwrap();
        assert!(storage.locks.lock().await.is_empty());

        // A commit that fails still gives its locks back.
        let mut first = storage.begin_snapshot().await.unwrap();
        let mut second = storage.begin_snapshot().await.unwrap();
        storage
            .insert_entity(&mut first, make_entity("e2", "staff", Some("S-2"), "outside"))
            .await
            .unwrap();
        storage
            .insert_entity(&mut second, make_entity("e3", "staff", Some("S-2"), "outside"))
            .await
            .unwrap();
        storage.commit_snapshot(first).await.unwrap();
        assert!(storage.commit_snapshot(second).await.is_err());
        assert!(storage.locks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn dropped_snapshot_releases_lock() {
        let storage = MemoryStorage::new();
        let mut snap = storage.begin_snapshot().await.unwrap();
        storage
            .insert_entity(&mut snap, make_entity("e1", "vehicle", Some("MH12AB1234"), "outside"))
            .await
            .unwrap();
        storage.commit_snapshot(snap).await.unwrap();

        {
            let mut held = storage.begin_snapshot().await.unwrap();
            storage.get_entity_for_update(&mut held, "e1").await.unwrap();
        }

        let mut next = storage.begin_snapshot().await.unwrap();
        let r = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            storage.get_entity_for_update(&mut next, "e1"),
        )
        .await;
        assert!(r.is_ok(), "lock not released by dropped snapshot");
    }
}
