//! Per-variant lifecycle tables.
//!
//! Every variant is described by one [`StateMachine`]: its states, the
//! initial and terminal states, and the allowed edges. The engine never
//! branches on variant to decide legality; it asks the table.
//!
//! An edge marked `inferred` is the one a bare credential scan applies.
//! Each state has at most one inferred outgoing edge, so "scan again" is
//! never ambiguous. Edges without the mark (visitor approve/deny, direct
//! emergency resolution) must be requested explicitly.
//!
//! Staff carry an extra `blocked` flag, toggled by `block`/`unblock`.
//! While it is set, no `entry` or `exit` is permitted.

use serde::Serialize;

use crate::error::GateError;
use crate::variant::{Action, Variant};

/// Which timestamp an edge stamps when applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stamp {
    None,
    Entry,
    Exit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Edge {
    pub action: Action,
    pub from: &'static str,
    pub to: &'static str,
    pub stamp: Stamp,
    pub inferred: bool,
}

const fn edge(action: Action, from: &'static str, to: &'static str, stamp: Stamp) -> Edge {
    Edge {
        action,
        from,
        to,
        stamp,
        inferred: true,
    }
}

const fn explicit(action: Action, from: &'static str, to: &'static str, stamp: Stamp) -> Edge {
    Edge {
        action,
        from,
        to,
        stamp,
        inferred: false,
    }
}

#[derive(Debug, Serialize)]
pub struct StateMachine {
    pub variant: Variant,
    pub states: &'static [&'static str],
    pub initial: &'static str,
    pub terminal: &'static [&'static str],
    pub edges: &'static [Edge],
}

pub mod delivery {
    pub const PENDING: &str = "pending";
    pub const APPROVED: &str = "approved";
    pub const COMPLETED: &str = "completed";
}

pub mod visitor {
    pub const PENDING: &str = "pending";
    pub const GRANTED: &str = "granted";
    pub const DENIED: &str = "denied";
    pub const CHECKED_IN: &str = "checked_in";
    pub const CHECKED_OUT: &str = "checked_out";
}

/// Shared by staff and vehicles.
pub mod presence {
    pub const OUTSIDE: &str = "outside";
    pub const INSIDE: &str = "inside";
}

pub mod emergency {
    pub const PENDING: &str = "Pending";
    pub const PROCESSING: &str = "Processing";
    pub const RESOLVED: &str = "Resolved";
}

/// Minimum length of the action-taken text that resolves an emergency.
pub const MIN_ACTION_TAKEN_LEN: usize = 5;

static DELIVERY: StateMachine = StateMachine {
    variant: Variant::Delivery,
    states: &[delivery::PENDING, delivery::APPROVED, delivery::COMPLETED],
    initial: delivery::PENDING,
    terminal: &[delivery::COMPLETED],
    edges: &[
        edge(Action::Entry, delivery::PENDING, delivery::APPROVED, Stamp::Entry),
        edge(Action::Exit, delivery::APPROVED, delivery::COMPLETED, Stamp::Exit),
    ],
};

static VISITOR: StateMachine = StateMachine {
    variant: Variant::Visitor,
    states: &[
        visitor::PENDING,
        visitor::GRANTED,
        visitor::DENIED,
        visitor::CHECKED_IN,
        visitor::CHECKED_OUT,
    ],
    initial: visitor::PENDING,
    terminal: &[visitor::DENIED, visitor::CHECKED_OUT],
    edges: &[
        explicit(Action::Approve, visitor::PENDING, visitor::GRANTED, Stamp::None),
        explicit(Action::Deny, visitor::PENDING, visitor::DENIED, Stamp::None),
        edge(Action::CheckIn, visitor::GRANTED, visitor::CHECKED_IN, Stamp::Entry),
        edge(Action::CheckOut, visitor::CHECKED_IN, visitor::CHECKED_OUT, Stamp::Exit),
        explicit(Action::CheckOut, visitor::GRANTED, visitor::CHECKED_OUT, Stamp::Exit),
    ],
};

static STAFF: StateMachine = StateMachine {
    variant: Variant::Staff,
    states: &[presence::OUTSIDE, presence::INSIDE],
    initial: presence::OUTSIDE,
    terminal: &[],
    edges: &[
        edge(Action::Entry, presence::OUTSIDE, presence::INSIDE, Stamp::Entry),
        edge(Action::Exit, presence::INSIDE, presence::OUTSIDE, Stamp::Exit),
    ],
};

static VEHICLE: StateMachine = StateMachine {
    variant: Variant::Vehicle,
    states: &[presence::OUTSIDE, presence::INSIDE],
    initial: presence::OUTSIDE,
    terminal: &[],
    edges: &[
        edge(Action::Entry, presence::OUTSIDE, presence::INSIDE, Stamp::Entry),
        edge(Action::Exit, presence::INSIDE, presence::OUTSIDE, Stamp::Exit),
    ],
};

static EMERGENCY: StateMachine = StateMachine {
    variant: Variant::Emergency,
    states: &[emergency::PENDING, emergency::PROCESSING, emergency::RESOLVED],
    initial: emergency::PENDING,
    terminal: &[emergency::RESOLVED],
    edges: &[
        edge(
            Action::StartProcessing,
            emergency::PENDING,
            emergency::PROCESSING,
            Stamp::None,
        ),
        edge(
            Action::Resolve,
            emergency::PROCESSING,
            emergency::RESOLVED,
            Stamp::None,
        ),
        explicit(
            Action::Resolve,
            emergency::PENDING,
            emergency::RESOLVED,
            Stamp::None,
        ),
    ],
};

/// A validated step: where an action takes an entity, and what it stamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transit {
    pub action: Action,
    pub from: &'static str,
    pub to: &'static str,
    pub stamp: Stamp,
    /// Value of the staff `blocked` flag after the step.
    pub blocked: bool,
}

/// Result of folding a history through a machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replayed {
    pub status: String,
    pub blocked: bool,
    pub steps: usize,
}

/// One historical step fed to [`StateMachine::replay`].
#[derive(Debug, Clone, Copy)]
pub struct ReplayStep<'a> {
    pub action: Action,
    pub from: &'a str,
    pub to: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("history step {index} ({action} {from} -> {to}) does not follow: {reason}")]
pub struct ReplayError {
    pub index: usize,
    pub action: Action,
    pub from: String,
    pub to: String,
    pub reason: String,
}

impl StateMachine {
    pub fn of(variant: Variant) -> &'static StateMachine {
        match variant {
            Variant::Delivery => &DELIVERY,
            Variant::Visitor => &VISITOR,
            Variant::Staff => &STAFF,
            Variant::Vehicle => &VEHICLE,
            Variant::Emergency => &EMERGENCY,
        }
    }

    pub fn all() -> impl Iterator<Item = &'static StateMachine> {
        Variant::ALL.into_iter().map(StateMachine::of)
    }

    /// The interned name of `status` in this machine, if it is one of its states.
    pub fn state(&self, status: &str) -> Option<&'static str> {
        self.states.iter().copied().find(|s| *s == status)
    }

    pub fn is_terminal(&self, status: &str) -> bool {
        self.terminal.contains(&status)
    }

    pub fn outgoing<'s>(&'s self, from: &'s str) -> impl Iterator<Item = &'static Edge> + 's {
        self.edges.iter().filter(move |e| e.from == from)
    }

    pub fn edge(&self, from: &str, action: Action) -> Option<&'static Edge> {
        self.edges
            .iter()
            .find(|e| e.from == from && e.action == action)
    }

    /// The edge a bare scan applies from `from`, if any.
    pub fn inferred(&self, from: &str) -> Option<&'static Edge> {
        self.edges.iter().find(|e| e.from == from && e.inferred)
    }

    pub fn supports_block(&self) -> bool {
        self.variant == Variant::Staff
    }

    /// Whether applying `action` must carry action-taken text.
    pub fn requires_action_taken(&self, action: Action) -> bool {
        self.variant == Variant::Emergency && action == Action::Resolve
    }

    /// Action text recorded by a one-step quick update when none is given.
    pub fn default_action_taken(&self, action: Action) -> Option<&'static str> {
        match (self.variant, action) {
            (Variant::Emergency, Action::StartProcessing) => Some("Started processing by security"),
            (Variant::Emergency, Action::Resolve) => Some("Quickly resolved by security"),
            _ => None,
        }
    }

    /// Actions available from `status`, for error messages and the API.
    pub fn available_actions(&self, status: &str, blocked: bool) -> Vec<Action> {
        let mut actions: Vec<Action> = if blocked {
            Vec::new()
        } else {
            self.outgoing(status).map(|e| e.action).collect()
        };
        actions.dedup();
        if self.supports_block() {
            actions.push(if blocked {
                Action::Unblock
            } else {
                Action::Block
            });
        }
        actions
    }

    /// Validate `action` from the entity's current status and flag.
    pub fn check(
        &self,
        entity_id: &str,
        status: &str,
        blocked: bool,
        action: Action,
    ) -> Result<Transit, GateError> {
        let from = self.state(status).ok_or_else(|| GateError::IllegalTransition {
            variant: self.variant.to_string(),
            entity_id: entity_id.to_string(),
            action: action.to_string(),
            reason: format!("'{}' is not a {} status", status, self.variant),
        })?;

        if self.is_terminal(from) {
            return Err(GateError::AlreadyTerminal {
                variant: self.variant.to_string(),
                entity_id: entity_id.to_string(),
                status: from.to_string(),
            });
        }

        let illegal = |reason: String| GateError::IllegalTransition {
            variant: self.variant.to_string(),
            entity_id: entity_id.to_string(),
            action: action.to_string(),
            reason,
        };

        if action.is_flag() {
            if !self.supports_block() {
                return Err(illegal(format!("{} cannot be blocked", self.variant)));
            }
            let target = action == Action::Block;
            if blocked == target {
                return Err(illegal(format!(
                    "already {}",
                    if blocked { "blocked" } else { "unblocked" }
                )));
            }
            return Ok(Transit {
                action,
                from,
                to: from,
                stamp: Stamp::None,
                blocked: target,
            });
        }

        if blocked {
            return Err(illegal("staff member is blocked".to_string()));
        }

        match self.edge(from, action) {
            Some(e) => Ok(Transit {
                action,
                from: e.from,
                to: e.to,
                stamp: e.stamp,
                blocked,
            }),
            None => {
                let allowed: Vec<&str> = self.outgoing(from).map(|e| e.action.as_str()).collect();
                Err(illegal(if allowed.is_empty() {
                    format!("no action is possible while {}", from)
                } else {
                    format!("status is {}; allowed: {}", from, allowed.join(", "))
                }))
            }
        }
    }

    /// Fold a recorded history from the initial state.
    ///
    /// Each step must start where the previous one ended and must be a legal
    /// edge (or flag toggle) of this machine.
    pub fn replay<'a>(
        &self,
        steps: impl IntoIterator<Item = ReplayStep<'a>>,
    ) -> Result<Replayed, ReplayError> {
        let mut status: &'static str = self.initial;
        let mut blocked = false;
        let mut count = 0;

        for (index, step) in steps.into_iter().enumerate() {
            let fail = |reason: String| ReplayError {
                index,
                action: step.action,
                from: step.from.to_string(),
                to: step.to.to_string(),
                reason,
            };
            if step.from != status {
                return Err(fail(format!("replayed status is {}", status)));
            }
            let transit = self
                .check("replay", status, blocked, step.action)
                .map_err(|e| fail(e.to_string()))?;
            if transit.to != step.to {
                return Err(fail(format!("edge leads to {}", transit.to)));
            }
            status = transit.to;
            blocked = transit.blocked;
            count += 1;
        }

        Ok(Replayed {
            status: status.to_string(),
            blocked,
            steps: count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step<'a>(action: Action, from: &'a str, to: &'a str) -> ReplayStep<'a> {
        ReplayStep { action, from, to }
    }

    #[test]
    fn every_state_has_at_most_one_inferred_edge() {
        for m in StateMachine::all() {
            for s in m.states {
                let n = m.outgoing(s).filter(|e| e.inferred).count();
                assert!(n <= 1, "{} state {} has {} inferred edges", m.variant, s, n);
            }
        }
    }

    #[test]
    fn edges_reference_declared_states() {
        for m in StateMachine::all() {
            assert!(m.states.contains(&m.initial));
            for e in m.edges {
                assert!(m.states.contains(&e.from), "{:?}", e);
                assert!(m.states.contains(&e.to), "{:?}", e);
                assert!(!m.is_terminal(e.from), "edge out of terminal: {:?}", e);
            }
        }
    }

    #[test]
    fn delivery_scan_sequence() {
        let m = StateMachine::of(Variant::Delivery);
        let first = m.inferred(delivery::PENDING).unwrap();
        assert_eq!(first.to, delivery::APPROVED);
        assert_eq!(first.stamp, Stamp::Entry);
        let second = m.inferred(delivery::APPROVED).unwrap();
        assert_eq!(second.to, delivery::COMPLETED);
        assert!(m.inferred(delivery::COMPLETED).is_none());
    }

    #[test]
    fn terminal_status_reports_already_terminal() {
        let m = StateMachine::of(Variant::Delivery);
        let err = m
            .check("d1", delivery::COMPLETED, false, Action::Exit)
            .unwrap_err();
        assert_eq!(err.kind(), "AlreadyTerminal");
    }

    #[test]
    fn staff_exit_without_entry_is_illegal() {
        let m = StateMachine::of(Variant::Staff);
        let err = m
            .check("s", presence::OUTSIDE, false, Action::Exit)
            .unwrap_err();
        assert_eq!(err.kind(), "IllegalTransition");
        let ok = m.check("s", presence::OUTSIDE, false, Action::Entry).unwrap();
        assert_eq!(ok.to, presence::INSIDE);
    }

    #[test]
    fn blocked_staff_cannot_move() {
        let m = StateMachine::of(Variant::Staff);
        let err = m
            .check("s", presence::OUTSIDE, true, Action::Entry)
            .unwrap_err();
        assert!(err.to_string().contains("blocked"));
        let unblock = m
            .check("s", presence::OUTSIDE, true, Action::Unblock)
            .unwrap();
        assert!(!unblock.blocked);
        assert_eq!(unblock.to, presence::OUTSIDE);
    }

    #[test]
    fn vehicles_cannot_be_blocked() {
        let m = StateMachine::of(Variant::Vehicle);
        assert!(m
            .check("v", presence::OUTSIDE, false, Action::Block)
            .is_err());
    }

    #[test]
    fn visitor_pending_has_no_inferred_edge() {
        let m = StateMachine::of(Variant::Visitor);
        assert!(m.inferred(visitor::PENDING).is_none());
        let actions = m.available_actions(visitor::PENDING, false);
        assert_eq!(actions, vec![Action::Approve, Action::Deny]);
    }

    #[test]
    fn emergency_is_monotonic() {
        let m = StateMachine::of(Variant::Emergency);
        assert!(m
            .check("e", emergency::PROCESSING, false, Action::StartProcessing)
            .is_err());
        assert!(m.requires_action_taken(Action::Resolve));
        assert!(!m.requires_action_taken(Action::StartProcessing));
        assert_eq!(
            m.default_action_taken(Action::Resolve),
            Some("Quickly resolved by security")
        );
    }

    #[test]
    fn replay_reproduces_final_state() {
        let m = StateMachine::of(Variant::Staff);
        let replayed = m
            .replay([
                step(Action::Entry, "outside", "inside"),
                step(Action::Block, "inside", "inside"),
                step(Action::Unblock, "inside", "inside"),
                step(Action::Exit, "inside", "outside"),
            ])
            .unwrap();
        assert_eq!(replayed.status, "outside");
        assert!(!replayed.blocked);
        assert_eq!(replayed.steps, 4);
    }

    #[test]
    fn replay_rejects_gaps() {
        let m = StateMachine::of(Variant::Delivery);
        let err = m
            .replay([step(Action::Exit, "approved", "completed")])
            .unwrap_err();
        assert_eq!(err.index, 0);
    }

    #[test]
    fn replay_of_empty_history_is_initial() {
        let m = StateMachine::of(Variant::Emergency);
        let replayed = m.replay(std::iter::empty()).unwrap();
        assert_eq!(replayed.status, emergency::PENDING);
    }
}
