//! Tracked entity kinds and the actions that move them between states.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::GateError;

/// The kind of a tracked entity.
///
/// `Emergency` alerts share the engine and the ledger with the four
/// credential-bearing variants but are addressed by id only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variant {
    Delivery,
    Visitor,
    Staff,
    Vehicle,
    Emergency,
}

impl Variant {
    pub const ALL: [Variant; 5] = [
        Variant::Delivery,
        Variant::Visitor,
        Variant::Staff,
        Variant::Vehicle,
        Variant::Emergency,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Variant::Delivery => "delivery",
            Variant::Visitor => "visitor",
            Variant::Staff => "staff",
            Variant::Vehicle => "vehicle",
            Variant::Emergency => "emergency",
        }
    }

    /// Whether entities of this variant are presented to the gate by credential.
    pub fn has_credential(self) -> bool {
        !matches!(self, Variant::Emergency)
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Variant {
    type Err = GateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Variant::ALL
            .into_iter()
            .find(|v| v.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| GateError::validation("variant", format!("unknown variant '{}'", s)))
    }
}

/// A named edge label in a variant's state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Entry,
    Exit,
    Approve,
    Deny,
    CheckIn,
    CheckOut,
    StartProcessing,
    Resolve,
    Block,
    Unblock,
}

impl Action {
    pub const ALL: [Action; 10] = [
        Action::Entry,
        Action::Exit,
        Action::Approve,
        Action::Deny,
        Action::CheckIn,
        Action::CheckOut,
        Action::StartProcessing,
        Action::Resolve,
        Action::Block,
        Action::Unblock,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Action::Entry => "entry",
            Action::Exit => "exit",
            Action::Approve => "approve",
            Action::Deny => "deny",
            Action::CheckIn => "check_in",
            Action::CheckOut => "check_out",
            Action::StartProcessing => "start_processing",
            Action::Resolve => "resolve",
            Action::Block => "block",
            Action::Unblock => "unblock",
        }
    }

    /// Block and unblock toggle the staff flag without moving `status`.
    pub fn is_flag(self) -> bool {
        matches!(self, Action::Block | Action::Unblock)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = GateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().replace('-', "_");
        Action::ALL
            .into_iter()
            .find(|a| a.as_str().eq_ignore_ascii_case(&wanted))
            .ok_or_else(|| GateError::validation("action", format!("unknown action '{}'", s)))
    }
}
