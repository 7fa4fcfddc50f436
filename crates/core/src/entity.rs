//! Entity snapshots and history entries as seen by callers.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::actor::Role;
use crate::machine::{presence, visitor, StateMachine};
use crate::subject::SubjectInfo;
use crate::variant::{Action, Variant};

/// Weak reference to the resident an entity belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkedResident {
    pub flat_no: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timestamps {
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub expected_at: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_entry_at: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_exit_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub status_changed_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Timestamps {
    pub fn at_creation(now: OffsetDateTime, expected_at: Option<OffsetDateTime>) -> Self {
        Timestamps {
            created_at: now,
            expected_at,
            last_entry_at: None,
            last_exit_at: None,
            status_changed_at: now,
            updated_at: now,
        }
    }
}

/// The current snapshot of a delivery, visitor, staff member, vehicle or alert.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedEntity {
    pub id: String,
    pub variant: Variant,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
    pub status: String,
    pub blocked: bool,
    #[serde(rename = "subjectInfo")]
    pub subject: SubjectInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linked_resident: Option<LinkedResident>,
    pub timestamps: Timestamps,
    pub version: i64,
}

impl TrackedEntity {
    pub fn machine(&self) -> &'static StateMachine {
        StateMachine::of(self.variant)
    }

    pub fn is_terminal(&self) -> bool {
        self.machine().is_terminal(&self.status)
    }

    /// Whether the entity is physically on the premises.
    pub fn is_inside(&self) -> bool {
        match self.variant {
            Variant::Staff | Variant::Vehicle => self.status == presence::INSIDE,
            Variant::Visitor => self.status == visitor::CHECKED_IN,
            Variant::Delivery => self.status == crate::machine::delivery::APPROVED,
            Variant::Emergency => false,
        }
    }

    pub fn linked_flat(&self) -> Option<&str> {
        self.linked_resident.as_ref().map(|r| r.flat_no.as_str())
    }

    pub fn available_actions(&self) -> Vec<Action> {
        if self.is_terminal() {
            return Vec::new();
        }
        self.machine().available_actions(&self.status, self.blocked)
    }
}

/// One immutable entry of the history ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionRecord {
    /// Global insertion order, assigned by storage at commit.
    pub seq: u64,
    pub entity_id: String,
    pub variant: Variant,
    pub action: Action,
    pub from_status: String,
    pub to_status: String,
    pub actor: String,
    pub actor_role: Role,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_taken: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subject::StaffSubject;
    use time::macros::datetime;

    fn staff(status: &str, blocked: bool) -> TrackedEntity {
        let now = datetime!(2026-10-16 09:00 UTC);
        TrackedEntity {
            id: "s1".into(),
            variant: Variant::Staff,
            credential: Some("S-42".into()),
            status: status.into(),
            blocked,
            subject: SubjectInfo::Staff(StaffSubject {
                name: "Meena".into(),
                role: "staff".into(),
                other_role: None,
                flat_no: None,
            }),
            linked_resident: None,
            timestamps: Timestamps::at_creation(now, None),
            version: 1,
        }
    }

    #[test]
    fn staff_inside_flag_follows_status() {
        assert!(!staff("outside", false).is_inside());
        assert!(staff("inside", false).is_inside());
    }

    #[test]
    fn blocked_staff_can_only_be_unblocked() {
        assert_eq!(staff("outside", true).available_actions(), vec![Action::Unblock]);
        assert_eq!(
            staff("inside", false).available_actions(),
            vec![Action::Exit, Action::Block]
        );
    }

    #[test]
    fn snapshot_serializes_camel_case() {
        let json = serde_json::to_value(staff("inside", false)).unwrap();
        assert_eq!(json["subjectInfo"]["name"], "Meena");
        assert_eq!(json["timestamps"]["createdAt"], "2026-10-16T09:00:00Z");
        assert!(json["timestamps"]["lastEntryAt"].is_null());
    }
}
