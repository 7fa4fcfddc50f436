use std::future::Future;

use super::{make_entity, seed, TestResult};
use crate::{GateStorage, StorageError};

pub(super) async fn run_init_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: GateStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "init",
            "insert_creates_entity_at_version_0",
            insert_creates_entity_at_version_0(factory).await,
        ),
        TestResult::from_result(
            "init",
            "insert_duplicate_id_returns_already_exists",
            insert_duplicate_id_returns_already_exists(factory).await,
        ),
        TestResult::from_result(
            "init",
            "missing_entity_returns_not_found",
            missing_entity_returns_not_found(factory).await,
        ),
        TestResult::from_result(
            "init",
            "active_credential_is_unique_per_variant",
            active_credential_is_unique_per_variant(factory).await,
        ),
        TestResult::from_result(
            "init",
            "inactive_holder_frees_credential",
            inactive_holder_frees_credential(factory).await,
        ),
        TestResult::from_result(
            "init",
            "same_credential_in_other_variant_allowed",
            same_credential_in_other_variant_allowed(factory).await,
        ),
    ]
}

/// After insert + commit, the entity version must be 0 whatever the caller sent.
async fn insert_creates_entity_at_version_0<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: GateStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut record = make_entity("d1", "delivery", Some("D-001"), "pending");
    record.version = 7;
    seed(&s, record).await?;

    let rec = s.get_entity("d1").await.map_err(|e| e.to_string())?;
    if rec.version != 0 {
        return Err(format!("expected version 0, got {}", rec.version));
    }
    if rec.status != "pending" {
        return Err(format!("expected status \"pending\", got \"{}\"", rec.status));
    }
    Ok(())
}

async fn insert_duplicate_id_returns_already_exists<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: GateStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed(&s, make_entity("d1", "delivery", Some("D-001"), "pending")).await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let result = s
        .insert_entity(&mut snap, make_entity("d1", "delivery", Some("D-002"), "pending"))
        .await;
    let _ = s.abort_snapshot(snap).await;
    match result {
        Err(StorageError::AlreadyExists { entity_id }) if entity_id == "d1" => Ok(()),
        other => Err(format!("expected AlreadyExists for d1, got {other:?}")),
    }
}

async fn missing_entity_returns_not_found<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: GateStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    match s.get_entity("nope").await {
        Err(StorageError::EntityNotFound { entity_id }) if entity_id == "nope" => {}
        other => return Err(format!("get_entity: expected EntityNotFound, got {other:?}")),
    }
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let result = s.get_entity_for_update(&mut snap, "nope").await;
    let _ = s.abort_snapshot(snap).await;
    match result {
        Err(StorageError::EntityNotFound { .. }) => Ok(()),
        other => Err(format!(
            "get_entity_for_update: expected EntityNotFound, got {other:?}"
        )),
    }
}

async fn active_credential_is_unique_per_variant<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: GateStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed(&s, make_entity("s1", "staff", Some("S-42"), "outside")).await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let result = s
        .insert_entity(&mut snap, make_entity("s2", "staff", Some("S-42"), "outside"))
        .await;
    let _ = s.abort_snapshot(snap).await;
    match result {
        Err(StorageError::CredentialTaken { holder, .. }) if holder == "s1" => Ok(()),
        other => Err(format!("expected CredentialTaken held by s1, got {other:?}")),
    }
}

async fn inactive_holder_frees_credential<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: GateStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut done = make_entity("d1", "delivery", Some("D-001"), "completed");
    done.active = false;
    seed(&s, done).await?;
    seed(&s, make_entity("d2", "delivery", Some("D-001"), "pending")).await?;

    let found = s
        .find_by_credential("delivery", "D-001")
        .await
        .map_err(|e| e.to_string())?;
    match found {
        Some(r) if r.id == "d2" => Ok(()),
        other => Err(format!("expected active holder d2, got {other:?}")),
    }
}

async fn same_credential_in_other_variant_allowed<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: GateStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed(&s, make_entity("s1", "staff", Some("X-1"), "outside")).await?;
    seed(&s, make_entity("d1", "delivery", Some("X-1"), "pending")).await?;
    let all = s.list_entities(None, None).await.map_err(|e| e.to_string())?;
    if all.len() != 2 {
        return Err(format!("expected 2 entities, got {}", all.len()));
    }
    Ok(())
}
