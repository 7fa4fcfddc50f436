use std::future::Future;

use super::{make_entity, make_ledger, seed, TestResult};
use crate::{GateStorage, StorageError};

pub(super) async fn run_snapshot_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: GateStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "snapshot",
            "uncommitted_insert_invisible",
            uncommitted_insert_invisible(factory).await,
        ),
        TestResult::from_result(
            "snapshot",
            "aborted_update_discarded",
            aborted_update_discarded(factory).await,
        ),
        TestResult::from_result(
            "snapshot",
            "snapshot_reads_its_own_writes",
            snapshot_reads_its_own_writes(factory).await,
        ),
        TestResult::from_result(
            "snapshot",
            "update_and_ledger_commit_together",
            update_and_ledger_commit_together(factory).await,
        ),
        TestResult::from_result(
            "snapshot",
            "failed_commit_applies_nothing",
            failed_commit_applies_nothing(factory).await,
        ),
    ]
}

async fn uncommitted_insert_invisible<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: GateStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.insert_entity(&mut snap, make_entity("v1", "vehicle", Some("MH12AB1234"), "outside"))
        .await
        .map_err(|e| e.to_string())?;

    let seen = s.get_entity("v1").await;
    let by_cred = s
        .find_by_credential("vehicle", "MH12AB1234")
        .await
        .map_err(|e| e.to_string())?;
    let _ = s.abort_snapshot(snap).await;

    if !matches!(seen, Err(StorageError::EntityNotFound { .. })) {
        return Err(format!("uncommitted insert visible via get_entity: {seen:?}"));
    }
    if by_cred.is_some() {
        return Err("uncommitted insert visible via find_by_credential".into());
    }
    Ok(())
}

async fn aborted_update_discarded<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: GateStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed(&s, make_entity("s1", "staff", Some("S-1"), "outside")).await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let mut rec = s
        .get_entity_for_update(&mut snap, "s1")
        .await
        .map_err(|e| e.to_string())?;
    rec.status = "inside".into();
    s.update_entity(&mut snap, rec, 0)
        .await
        .map_err(|e| e.to_string())?;
    s.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    let rec = s.get_entity("s1").await.map_err(|e| e.to_string())?;
    if rec.status != "outside" || rec.version != 0 {
        return Err(format!(
            "aborted update leaked: status {} version {}",
            rec.status, rec.version
        ));
    }
    Ok(())
}

async fn snapshot_reads_its_own_writes<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: GateStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed(&s, make_entity("s1", "staff", Some("S-1"), "outside")).await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let mut rec = s
        .get_entity_for_update(&mut snap, "s1")
        .await
        .map_err(|e| e.to_string())?;
    rec.status = "inside".into();
    let v = s
        .update_entity(&mut snap, rec, 0)
        .await
        .map_err(|e| e.to_string())?;
    let again = s
        .get_entity_for_update(&mut snap, "s1")
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    if v != 1 || again.version != 1 || again.status != "inside" {
        return Err(format!(
            "expected own write at version 1/inside, got {}/{}",
            again.version, again.status
        ));
    }
    Ok(())
}

async fn update_and_ledger_commit_together<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: GateStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed(&s, make_entity("s1", "staff", Some("S-1"), "outside")).await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let mut rec = s
        .get_entity_for_update(&mut snap, "s1")
        .await
        .map_err(|e| e.to_string())?;
    rec.status = "inside".into();
    s.update_entity(&mut snap, rec, 0)
        .await
        .map_err(|e| e.to_string())?;
    s.append_ledger(&mut snap, make_ledger("s1", "entry", "outside", "inside"))
        .await
        .map_err(|e| e.to_string())?;

    let before = s.list_ledger("s1").await.map_err(|e| e.to_string())?;
    if !before.is_empty() {
        let _ = s.abort_snapshot(snap).await;
        return Err("ledger entry visible before commit".into());
    }
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let after = s.list_ledger("s1").await.map_err(|e| e.to_string())?;
    let rec = s.get_entity("s1").await.map_err(|e| e.to_string())?;
    if after.len() != 1 || rec.status != "inside" {
        return Err(format!(
            "expected 1 ledger entry and status inside, got {} and {}",
            after.len(),
            rec.status
        ));
    }
    Ok(())
}

/// A snapshot whose commit is rejected leaves no trace of any of its writes.
async fn failed_commit_applies_nothing<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: GateStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;

    // Two snapshots race for the same credential under different ids.
    let mut first = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let mut second = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.insert_entity(&mut first, make_entity("d1", "delivery", Some("D-9"), "pending"))
        .await
        .map_err(|e| e.to_string())?;
    s.insert_entity(&mut second, make_entity("d2", "delivery", Some("D-9"), "pending"))
        .await
        .map_err(|e| e.to_string())?;
    s.append_ledger(&mut second, make_ledger("d2", "entry", "pending", "approved"))
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(first).await.map_err(|e| e.to_string())?;

    match s.commit_snapshot(second).await {
        Err(StorageError::CredentialTaken { holder, .. }) if holder == "d1" => {}
        other => return Err(format!("expected CredentialTaken on commit, got {other:?}")),
    }
    if s.get_entity("d2").await.is_ok() {
        return Err("rejected insert became visible".into());
    }
    let ledger = s.ledger_since(0, 0).await.map_err(|e| e.to_string())?;
    if !ledger.is_empty() {
        return Err("rejected ledger entry became visible".into());
    }
    Ok(())
}
