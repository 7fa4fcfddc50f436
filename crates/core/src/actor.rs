//! Who is acting, and what their role allows.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::GateError;
use crate::variant::{Action, Variant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Resident,
    Security,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Resident => "resident",
            Role::Security => "security",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = GateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "resident" => Ok(Role::Resident),
            "security" => Ok(Role::Security),
            "admin" => Ok(Role::Admin),
            other => Err(GateError::validation("role", format!("unknown role '{}'", other))),
        }
    }
}

/// An authenticated operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub name: String,
    pub role: Role,
    /// The resident's own flat. Only meaningful for `Role::Resident`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flat_no: Option<String>,
}

/// Something an actor asks to do, checked against [`Actor::authorize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation<'a> {
    Create {
        variant: Variant,
        flat: Option<&'a str>,
    },
    Edit {
        variant: Variant,
        flat: Option<&'a str>,
    },
    Transition {
        variant: Variant,
        action: Action,
        flat: Option<&'a str>,
    },
}

impl fmt::Display for Operation<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Create { variant, .. } => write!(f, "create {}", variant),
            Operation::Edit { variant, .. } => write!(f, "edit {}", variant),
            Operation::Transition {
                variant, action, ..
            } => write!(f, "{} {}", action, variant),
        }
    }
}

impl Actor {
    pub fn new(name: impl Into<String>, role: Role) -> Self {
        Actor {
            name: name.into(),
            role,
            flat_no: None,
        }
    }

    pub fn resident(name: impl Into<String>, flat_no: impl Into<String>) -> Self {
        Actor {
            name: name.into(),
            role: Role::Resident,
            flat_no: Some(flat_no.into()),
        }
    }

    fn owns(&self, flat: Option<&str>) -> bool {
        match (&self.flat_no, flat) {
            (Some(mine), Some(theirs)) => mine.eq_ignore_ascii_case(theirs),
            _ => false,
        }
    }

    /// Role check for `op`. Residents act only on entities of their own flat.
    ///
    /// A visitor created by a resident is a pre-registration; one created by
    /// security is a capture at the gate. Both are `Create { Visitor }`.
    pub fn authorize(&self, op: Operation<'_>) -> Result<(), GateError> {
        let allowed = match self.role {
            Role::Admin => true,
            Role::Security => match op {
                Operation::Transition { action, .. } => !action.is_flag(),
                Operation::Create { variant, .. } => variant != Variant::Delivery,
                Operation::Edit { .. } => true,
            },
            Role::Resident => match op {
                Operation::Create { variant, flat } => match variant {
                    Variant::Delivery | Variant::Visitor => self.owns(flat),
                    Variant::Emergency => true,
                    Variant::Staff | Variant::Vehicle => false,
                },
                Operation::Edit { flat, .. } => self.owns(flat),
                Operation::Transition {
                    variant: Variant::Visitor,
                    action: Action::Approve | Action::Deny,
                    flat,
                } => self.owns(flat),
                Operation::Transition { .. } => false,
            },
        };

        if allowed {
            Ok(())
        } else {
            Err(GateError::Unauthorized {
                actor: self.name.clone(),
                role: self.role.to_string(),
                operation: op.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(variant: Variant, action: Action) -> Operation<'static> {
        Operation::Transition {
            variant,
            action,
            flat: Some("A-101"),
        }
    }

    #[test]
    fn residents_cannot_scan() {
        let r = Actor::resident("Anil", "A-101");
        let err = r.authorize(scan(Variant::Delivery, Action::Entry)).unwrap_err();
        assert_eq!(err.kind(), "Unauthorized");
    }

    #[test]
    fn residents_approve_only_their_visitors() {
        let r = Actor::resident("Anil", "a-101");
        assert!(r.authorize(scan(Variant::Visitor, Action::Approve)).is_ok());
        let other = Operation::Transition {
            variant: Variant::Visitor,
            action: Action::Deny,
            flat: Some("B-202"),
        };
        assert!(r.authorize(other).is_err());
    }

    #[test]
    fn only_admin_blocks_staff() {
        let guard = Actor::new("Gate 1", Role::Security);
        assert!(guard.authorize(scan(Variant::Staff, Action::Block)).is_err());
        assert!(guard.authorize(scan(Variant::Staff, Action::Entry)).is_ok());
        let admin = Actor::new("Office", Role::Admin);
        assert!(admin.authorize(scan(Variant::Staff, Action::Block)).is_ok());
    }

    #[test]
    fn security_does_not_create_deliveries() {
        let guard = Actor::new("Gate 1", Role::Security);
        let op = Operation::Create {
            variant: Variant::Delivery,
            flat: Some("A-101"),
        };
        assert!(guard.authorize(op).is_err());
        let op = Operation::Create {
            variant: Variant::Vehicle,
            flat: None,
        };
        assert!(guard.authorize(op).is_ok());
    }

    #[test]
    fn role_parses() {
        assert_eq!("Security".parse::<Role>().unwrap(), Role::Security);
        assert!("guard".parse::<Role>().is_err());
    }
}
