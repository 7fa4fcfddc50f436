use std::future::Future;

use super::{make_entity, make_ledger, seed, TestResult};
use crate::{GateStorage, StorageError};

pub(super) async fn run_version_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: GateStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "version",
            "update_increments_version",
            update_increments_version(factory).await,
        ),
        TestResult::from_result(
            "version",
            "stale_update_returns_conflict",
            stale_update_returns_conflict(factory).await,
        ),
        TestResult::from_result(
            "version",
            "stale_delete_returns_conflict",
            stale_delete_returns_conflict(factory).await,
        ),
        TestResult::from_result(
            "version",
            "delete_keeps_ledger",
            delete_keeps_ledger(factory).await,
        ),
    ]
}

async fn bump<S: GateStorage>(s: &S, id: &str, expected: i64) -> Result<i64, StorageError> {
    let mut snap = s.begin_snapshot().await?;
    let mut rec = s.get_entity_for_update(&mut snap, id).await?;
    rec.updated_at = format!("2026-01-01T00:0{expected}:00Z");
    match s.update_entity(&mut snap, rec, expected).await {
        Ok(v) => {
            s.commit_snapshot(snap).await?;
            Ok(v)
        }
        Err(e) => {
            let _ = s.abort_snapshot(snap).await;
            Err(e)
        }
    }
}

async fn update_increments_version<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: GateStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed(&s, make_entity("s1", "staff", Some("S-1"), "outside")).await?;
    for expected in 0..3 {
        let v = bump(&s, "s1", expected).await.map_err(|e| e.to_string())?;
        if v != expected + 1 {
            return Err(format!("expected version {}, got {v}", expected + 1));
        }
    }
    let rec = s.get_entity("s1").await.map_err(|e| e.to_string())?;
    if rec.version != 3 {
        return Err(format!("stored version {} after 3 updates", rec.version));
    }
    Ok(())
}

async fn stale_update_returns_conflict<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: GateStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed(&s, make_entity("s1", "staff", Some("S-1"), "outside")).await?;
    bump(&s, "s1", 0).await.map_err(|e| e.to_string())?;

    match bump(&s, "s1", 0).await {
        Err(StorageError::ConcurrentConflict {
            entity_id,
            expected_version: 0,
        }) if entity_id == "s1" => Ok(()),
        other => Err(format!("expected ConcurrentConflict at 0, got {other:?}")),
    }
}

async fn stale_delete_returns_conflict<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: GateStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed(&s, make_entity("s1", "staff", Some("S-1"), "outside")).await?;
    bump(&s, "s1", 0).await.map_err(|e| e.to_string())?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let result = s.delete_entity(&mut snap, "s1", 0).await;
    let _ = s.abort_snapshot(snap).await;
    match result {
        Err(StorageError::ConcurrentConflict { .. }) => {}
        other => return Err(format!("expected ConcurrentConflict, got {other:?}")),
    }
    if s.get_entity("s1").await.is_err() {
        return Err("entity deleted despite conflict".into());
    }
    Ok(())
}

async fn delete_keeps_ledger<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: GateStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.insert_entity(&mut snap, make_entity("s1", "staff", Some("S-1"), "outside"))
        .await
        .map_err(|e| e.to_string())?;
    s.append_ledger(&mut snap, make_ledger("s1", "entry", "outside", "inside"))
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.delete_entity(&mut snap, "s1", 0)
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    if s.get_entity("s1").await.is_ok() {
        return Err("entity still present after delete".into());
    }
    let ledger = s.list_ledger("s1").await.map_err(|e| e.to_string())?;
    if ledger.len() != 1 {
        return Err(format!("expected 1 surviving ledger entry, got {}", ledger.len()));
    }
    Ok(())
}
