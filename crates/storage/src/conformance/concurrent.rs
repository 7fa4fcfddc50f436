use std::future::Future;
use std::sync::Arc;

use super::{make_entity, make_ledger, seed, TestResult};
use crate::{GateStorage, StorageError};

/// Number of concurrent tasks to spawn in each test.
const N: usize = 10;

pub(super) async fn run_concurrent_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: GateStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "concurrent",
            "blind_updates_exactly_one_wins",
            blind_updates_exactly_one_wins(factory).await,
        ),
        TestResult::from_result(
            "concurrent",
            "locked_read_modify_write_serializes",
            locked_read_modify_write_serializes(factory).await,
        ),
        TestResult::from_result(
            "concurrent",
            "same_credential_exactly_one_holder",
            same_credential_exactly_one_holder(factory).await,
        ),
        TestResult::from_result(
            "concurrent",
            "different_entities_all_succeed",
            different_entities_all_succeed(factory).await,
        ),
    ]
}

/// Tally task outcomes into (winners, losers).
async fn tally(
    handles: Vec<tokio::task::JoinHandle<Result<bool, StorageError>>>,
) -> Result<(usize, usize), String> {
    let mut winners = 0usize;
    let mut losers = 0usize;
    for handle in handles {
        let won = handle
            .await
            .map_err(|e| format!("task panic: {e}"))?
            .map_err(|e| format!("storage error: {e}"))?;
        if won {
            winners += 1;
        } else {
            losers += 1;
        }
    }
    Ok((winners, losers))
}

// ── Blind update: exactly one wins ──────────────────────────────────────────

/// N tasks each update the same entity from version 0 without reading it
/// first. Exactly one commit succeeds; the rest must get ConcurrentConflict.
async fn blind_updates_exactly_one_wins<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: GateStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);
    seed(&*storage, make_entity("s1", "staff", Some("S-1"), "outside")).await?;

    let mut handles = Vec::new();
    for i in 0..N {
        let s = storage.clone();
        handles.push(tokio::spawn(async move {
            let mut snap = s.begin_snapshot().await?;
            let mut record = make_entity("s1", "staff", Some("S-1"), "inside");
            record.updated_at = format!("2026-01-01T00:00:{i:02}Z");
            match s.update_entity(&mut snap, record, 0).await {
                Ok(_) => {
                    s.commit_snapshot(snap).await?;
                    Ok::<bool, StorageError>(true)
                }
                Err(StorageError::ConcurrentConflict { .. }) => {
                    s.abort_snapshot(snap).await?;
                    Ok(false)
                }
                Err(e) => {
                    let _ = s.abort_snapshot(snap).await;
                    Err(e)
                }
            }
        }));
    }

    let (winners, losers) = tally(handles).await?;
    if winners != 1 || losers != N - 1 {
        return Err(format!(
            "expected 1 winner and {} losers, got {winners} and {losers}",
            N - 1
        ));
    }
    let record = storage.get_entity("s1").await.map_err(|e| e.to_string())?;
    if record.version != 1 || record.status != "inside" {
        return Err(format!(
            "expected version 1/inside, got {}/{}",
            record.version, record.status
        ));
    }
    Ok(())
}

// ── Locked read-modify-write: all serialize ─────────────────────────────────

/// N tasks each lock the entity, read it, flip it and append a ledger entry.
/// Because the lock is held until commit every task sees its predecessor's
/// write, so all succeed and the ledger has no repeated transition.
async fn locked_read_modify_write_serializes<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: GateStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);
    seed(&*storage, make_entity("s1", "staff", Some("S-1"), "outside")).await?;

    let mut handles = Vec::new();
    for _ in 0..N {
        let s = storage.clone();
        handles.push(tokio::spawn(async move {
            let mut snap = s.begin_snapshot().await?;
            let mut record = s.get_entity_for_update(&mut snap, "s1").await?;
            let from = record.status.clone();
            let (to, action) = if from == "outside" {
                ("inside", "entry")
            } else {
                ("outside", "exit")
            };
            let expected = record.version;
            record.status = to.to_string();
            s.update_entity(&mut snap, record, expected).await?;
            s.append_ledger(&mut snap, make_ledger("s1", action, &from, to))
                .await?;
            s.commit_snapshot(snap).await?;
            Ok::<bool, StorageError>(true)
        }));
    }

    let (winners, _) = tally(handles).await?;
    if winners != N {
        return Err(format!("expected all {N} tasks to succeed, got {winners}"));
    }

    let ledger = storage.list_ledger("s1").await.map_err(|e| e.to_string())?;
    if ledger.len() != N {
        return Err(format!("expected {N} ledger entries, got {}", ledger.len()));
    }
    let mut status = "outside".to_string();
    for entry in &ledger {
        if entry.from_status != status {
            return Err(format!(
                "ledger seq {} starts from {} but entity was {}",
                entry.seq, entry.from_status, status
            ));
        }
        status = entry.to_status.clone();
    }
    let record = storage.get_entity("s1").await.map_err(|e| e.to_string())?;
    if record.status != status || record.version != N as i64 {
        return Err(format!(
            "final record {}/v{} disagrees with ledger {}/v{N}",
            record.status, record.version, status
        ));
    }
    Ok(())
}

// ── Same credential: exactly one holder ─────────────────────────────────────

/// N tasks each insert a different entity carrying the same credential.
/// Exactly one may commit.
async fn same_credential_exactly_one_holder<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: GateStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);

    let mut handles = Vec::new();
    for i in 0..N {
        let s = storage.clone();
        handles.push(tokio::spawn(async move {
            let mut snap = s.begin_snapshot().await?;
            let record = make_entity(&format!("d{i}"), "delivery", Some("D-77"), "pending");
            if let Err(e) = s.insert_entity(&mut snap, record).await {
                let _ = s.abort_snapshot(snap).await;
                return match e {
                    StorageError::CredentialTaken { .. } => Ok(false),
                    e => Err(e),
                };
            }
            match s.commit_snapshot(snap).await {
                Ok(_) => Ok::<bool, StorageError>(true),
                Err(StorageError::CredentialTaken { .. }) => Ok(false),
                Err(e) => Err(e),
            }
        }));
    }

    let (winners, _) = tally(handles).await?;
    if winners != 1 {
        return Err(format!("expected exactly 1 holder, got {winners}"));
    }
    let all = storage
        .list_entities(Some("delivery"), None)
        .await
        .map_err(|e| e.to_string())?;
    if all.len() != 1 {
        return Err(format!("expected 1 stored delivery, got {}", all.len()));
    }
    Ok(())
}

// ── Different entities: all succeed ─────────────────────────────────────────

/// N tasks each update a different entity. No false conflicts.
async fn different_entities_all_succeed<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: GateStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);
    for i in 0..N {
        let id = format!("v{i}");
        let plate = format!("MH12AB{i:04}");
        seed(&*storage, make_entity(&id, "vehicle", Some(&plate), "outside")).await?;
    }

    let mut handles = Vec::new();
    for i in 0..N {
        let s = storage.clone();
        handles.push(tokio::spawn(async move {
            let id = format!("v{i}");
            let mut snap = s.begin_snapshot().await?;
            let mut record = s.get_entity_for_update(&mut snap, &id).await?;
            record.status = "inside".into();
            s.update_entity(&mut snap, record, 0).await?;
            s.commit_snapshot(snap).await?;
            Ok::<bool, StorageError>(true)
        }));
    }

    let (winners, _) = tally(handles).await?;
    if winners != N {
        return Err(format!("expected {N} successful updates, got {winners}"));
    }
    for i in 0..N {
        let record = storage
            .get_entity(&format!("v{i}"))
            .await
            .map_err(|e| format!("get v{i}: {e}"))?;
        if record.status != "inside" || record.version != 1 {
            return Err(format!(
                "v{i}: expected inside/v1, got {}/v{}",
                record.status, record.version
            ));
        }
    }
    Ok(())
}
