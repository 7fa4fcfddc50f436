//! Gatehouse domain model.
//!
//! Pure types and rules shared by the engine and the server: the tracked
//! entity variants, their lifecycle tables, subject info validation,
//! credential normalization and the error taxonomy. Nothing in this crate
//! performs I/O.

pub mod actor;
pub mod credential;
pub mod entity;
pub mod error;
pub mod machine;
pub mod subject;
pub mod variant;

pub use actor::{Actor, Operation, Role};
pub use entity::{LinkedResident, Timestamps, TrackedEntity, TransitionRecord};
pub use error::{ErrorBody, GateError};
pub use machine::{Edge, ReplayStep, Replayed, Stamp, StateMachine, Transit};
pub use subject::SubjectInfo;
pub use variant::{Action, Variant};
