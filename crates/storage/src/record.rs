use serde::{Deserialize, Serialize};

/// The stored form of a tracked entity.
///
/// Timestamps are ISO 8601 / RFC 3339 strings. `subject` is the variant's
/// subject info as JSON; the storage layer never interprets it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub id: String,
    pub variant: String,
    /// Normalized credential. None for kinds addressed by id only.
    pub credential: Option<String>,
    /// False once the entity reaches a terminal status. Credential
    /// uniqueness is enforced among active records only.
    pub active: bool,
    pub status: String,
    pub blocked: bool,
    pub subject: serde_json::Value,
    pub linked_flat: Option<String>,
    pub linked_name: Option<String>,
    pub created_at: String,
    pub expected_at: Option<String>,
    pub last_entry_at: Option<String>,
    pub last_exit_at: Option<String>,
    pub status_changed_at: String,
    pub updated_at: String,
    pub version: i64,
}

/// One append-only history entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRecord {
    /// Global insertion sequence, assigned by the backend at commit.
    /// Ignored on append.
    pub seq: u64,
    pub entity_id: String,
    pub variant: String,
    pub action: String,
    pub from_status: String,
    pub to_status: String,
    pub actor: String,
    pub actor_role: String,
    /// ISO 8601 / RFC 3339 timestamp string.
    pub recorded_at: String,
    pub notes: Option<String>,
    pub action_taken: Option<String>,
}
