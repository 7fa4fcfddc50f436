//! Conformance test suite for `GateStorage` implementations.
//!
//! A backend-agnostic suite that any `GateStorage` implementation can run to
//! verify correctness. The suite covers:
//!
//! - **Initialization**: entity insertion, duplicate ids, credential uniqueness
//! - **Snapshot isolation**: uncommitted writes invisible, aborts discard
//! - **Version validation / OCC**: stale versions rejected
//! - **Ledger**: append-only history, dense sequence numbers, change feed
//! - **Concurrency**: same-entity writers serialize, one credential holder wins
//!
//! # Usage
//!
//! Backend crates call [`run_conformance_suite`] with a factory function that
//! creates a fresh, empty storage instance for each test:
//!
//! ```ignore
//! use gatehouse_storage::conformance::run_conformance_suite;
//!
//! #[tokio::test]
//! async fn sqlite_conformance() {
//!     let report = run_conformance_suite(|| async { open_test_sqlite().await }).await;
//!     assert!(report.failed == 0, "{report}");
//! }
//! ```

mod concurrent;
mod init;
mod ledger;
mod snapshot;
mod version;

use std::fmt;
use std::future::Future;

use crate::record::{EntityRecord, LedgerRecord};
use crate::GateStorage;

/// Result of a single conformance test.
#[derive(Debug, Clone)]
pub struct TestResult {
    /// Test category (e.g. "init", "snapshot", "ledger").
    pub category: String,
    /// Test name (e.g. "insert_creates_entity_at_version_0").
    pub name: String,
    pub passed: bool,
    /// Error message if the test failed.
    pub message: Option<String>,
}

impl TestResult {
    fn from_result(category: &str, name: &str, result: Result<(), String>) -> Self {
        let (passed, message) = match result {
            Ok(()) => (true, None),
            Err(msg) => (false, Some(msg)),
        };
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed,
            message,
        }
    }
}

/// Aggregated report from a full conformance suite run.
#[derive(Debug, Clone)]
pub struct ConformanceReport {
    pub results: Vec<TestResult>,
    pub passed: usize,
    pub failed: usize,
    pub total: usize,
}

impl fmt::Display for ConformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Conformance: {}/{} passed ({} failed)",
            self.passed, self.total, self.failed
        )?;
        for r in self.results.iter().filter(|r| !r.passed) {
            writeln!(
                f,
                "  FAIL [{}/{}]: {}",
                r.category,
                r.name,
                r.message.as_deref().unwrap_or("(no message)")
            )?;
        }
        Ok(())
    }
}

/// Run the full conformance suite against a storage backend.
///
/// The `factory` function is called once per test to create a fresh, empty
/// storage instance.
pub async fn run_conformance_suite<S, F, Fut>(factory: F) -> ConformanceReport
where
    S: GateStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.extend(init::run_init_tests(&factory).await);
    results.extend(snapshot::run_snapshot_tests(&factory).await);
    results.extend(version::run_version_tests(&factory).await);
    results.extend(ledger::run_ledger_tests(&factory).await);
    results.extend(concurrent::run_concurrent_tests(&factory).await);

    let passed = results.iter().filter(|r| r.passed).count();
    let total = results.len();

    ConformanceReport {
        results,
        passed,
        failed: total - passed,
        total,
    }
}

// ── Helpers: record constructors with sensible defaults ──────────────────────

pub(crate) fn make_entity(
    id: &str,
    variant: &str,
    credential: Option<&str>,
    status: &str,
) -> EntityRecord {
    EntityRecord {
        id: id.to_string(),
        variant: variant.to_string(),
        credential: credential.map(str::to_string),
        active: true,
        status: status.to_string(),
        blocked: false,
        subject: serde_json::json!({"name": "test"}),
        linked_flat: Some("A-101".to_string()),
        linked_name: None,
        created_at: "2026-01-01T00:00:00Z".to_string(),
        expected_at: None,
        last_entry_at: None,
        last_exit_at: None,
        status_changed_at: "2026-01-01T00:00:00Z".to_string(),
        updated_at: "2026-01-01T00:00:00Z".to_string(),
        version: 0,
    }
}

pub(crate) fn make_ledger(entity_id: &str, action: &str, from: &str, to: &str) -> LedgerRecord {
    LedgerRecord {
        seq: 0,
        entity_id: entity_id.to_string(),
        variant: "staff".to_string(),
        action: action.to_string(),
        from_status: from.to_string(),
        to_status: to.to_string(),
        actor: "gate-1".to_string(),
        actor_role: "security".to_string(),
        recorded_at: "2026-01-01T00:05:00Z".to_string(),
        notes: None,
        action_taken: None,
    }
}

/// Insert `record` in its own committed snapshot.
async fn seed<S: GateStorage>(storage: &S, record: EntityRecord) -> Result<(), String> {
    let mut snap = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin: {e}"))?;
    storage
        .insert_entity(&mut snap, record)
        .await
        .map_err(|e| format!("insert: {e}"))?;
    storage
        .commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit seed: {e}"))?;
    Ok(())
}
