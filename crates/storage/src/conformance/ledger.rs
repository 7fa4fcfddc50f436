use std::future::Future;

use super::{make_entity, make_ledger, seed, TestResult};
use crate::{GateStorage, StorageError};

pub(super) async fn run_ledger_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: GateStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "ledger",
            "append_requires_entity",
            append_requires_entity(factory).await,
        ),
        TestResult::from_result(
            "ledger",
            "seq_assigned_in_commit_order",
            seq_assigned_in_commit_order(factory).await,
        ),
        TestResult::from_result(
            "ledger",
            "ledger_since_pages_with_limit",
            ledger_since_pages_with_limit(factory).await,
        ),
        TestResult::from_result(
            "ledger",
            "list_entities_filters_newest_first",
            list_entities_filters_newest_first(factory).await,
        ),
    ]
}

async fn append_requires_entity<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: GateStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let result = s
        .append_ledger(&mut snap, make_ledger("ghost", "entry", "outside", "inside"))
        .await;
    let _ = s.abort_snapshot(snap).await;
    match result {
        Err(StorageError::EntityNotFound { entity_id }) if entity_id == "ghost" => Ok(()),
        other => Err(format!("expected EntityNotFound, got {other:?}")),
    }
}

/// Writes `count` ledger entries for `id`, one snapshot each.
async fn append_many<S: GateStorage>(s: &S, id: &str, count: usize) -> Result<(), String> {
    for i in 0..count {
        let (from, to, action) = if i % 2 == 0 {
            ("outside", "inside", "entry")
        } else {
            ("inside", "outside", "exit")
        };
        let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
        s.append_ledger(&mut snap, make_ledger(id, action, from, to))
            .await
            .map_err(|e| e.to_string())?;
        s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;
    }
    Ok(())
}

async fn seq_assigned_in_commit_order<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: GateStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed(&s, make_entity("s1", "staff", Some("S-1"), "outside")).await?;
    seed(&s, make_entity("s2", "staff", Some("S-2"), "outside")).await?;
    append_many(&s, "s1", 2).await?;
    append_many(&s, "s2", 1).await?;

    let all = s.ledger_since(0, 0).await.map_err(|e| e.to_string())?;
    let seqs: Vec<u64> = all.iter().map(|r| r.seq).collect();
    if seqs != vec![1, 2, 3] {
        return Err(format!("expected seqs [1, 2, 3], got {seqs:?}"));
    }
    let own = s.list_ledger("s1").await.map_err(|e| e.to_string())?;
    let actions: Vec<&str> = own.iter().map(|r| r.action.as_str()).collect();
    if actions != ["entry", "exit"] {
        return Err(format!("expected [entry, exit] for s1, got {actions:?}"));
    }
    Ok(())
}

async fn ledger_since_pages_with_limit<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: GateStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed(&s, make_entity("s1", "staff", Some("S-1"), "outside")).await?;
    append_many(&s, "s1", 5).await?;

    let page = s.ledger_since(1, 2).await.map_err(|e| e.to_string())?;
    let seqs: Vec<u64> = page.iter().map(|r| r.seq).collect();
    if seqs != vec![2, 3] {
        return Err(format!("expected [2, 3], got {seqs:?}"));
    }
    let past_end = s.ledger_since(5, 10).await.map_err(|e| e.to_string())?;
    if !past_end.is_empty() {
        return Err(format!("expected empty page past end, got {}", past_end.len()));
    }
    Ok(())
}

async fn list_entities_filters_newest_first<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: GateStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed(&s, make_entity("s1", "staff", Some("S-1"), "outside")).await?;
    seed(&s, make_entity("s2", "staff", Some("S-2"), "inside")).await?;
    seed(&s, make_entity("s3", "staff", Some("S-3"), "outside")).await?;
    seed(&s, make_entity("d1", "delivery", Some("D-1"), "pending")).await?;

    let staff = s
        .list_entities(Some("staff"), None)
        .await
        .map_err(|e| e.to_string())?;
    let ids: Vec<&str> = staff.iter().map(|r| r.id.as_str()).collect();
    if ids != ["s3", "s2", "s1"] {
        return Err(format!("expected [s3, s2, s1], got {ids:?}"));
    }
    let outside = s
        .list_entities(Some("staff"), Some("outside"))
        .await
        .map_err(|e| e.to_string())?;
    if outside.len() != 2 {
        return Err(format!("expected 2 outside, got {}", outside.len()));
    }
    Ok(())
}
