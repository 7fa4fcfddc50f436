//! Gatehouse engine.
//!
//! The four services of the verification desk, generic over a
//! [`GateStorage`](gatehouse_storage::GateStorage) backend:
//!
//! - [`CredentialStore`]: create, resolve, edit and delete tracked entities
//! - [`TransitionEngine`]: move one entity along one edge, atomically
//! - [`HistoryLedger`]: per-entity history, replay and the change feed
//! - [`Gateway`]: authenticated entry point used by the HTTP server
//!
//! Identity, the resident directory and post-transition notification are
//! injected through the [`IdentityProvider`], [`ResidentDirectory`] and
//! [`Notifier`] traits.

pub mod codes;
pub mod directory;
pub mod engine;
pub mod gateway;
pub mod identity;
pub mod ledger;
pub mod notify;
mod records;
pub mod store;

pub use directory::{AnyFlat, Resident, ResidentDirectory, StaticResidentDirectory};
pub use engine::{Applied, TransitionEngine, TransitionRequest};
pub use gateway::{Gateway, Outcome, DEFAULT_RESCAN_WINDOW};
pub use identity::{IdentityProvider, StaticIdentityProvider};
pub use ledger::{ChangeFeed, Consistency, History, HistoryLedger};
pub use notify::{Notifier, TracingNotifier};
pub use store::{Created, CredentialStore, EntityFilter, NewEntity};
