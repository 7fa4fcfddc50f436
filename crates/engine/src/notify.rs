//! Post-transition hook.

use gatehouse_core::{TrackedEntity, TransitionRecord};

/// Told about every committed transition. Runs after commit, outside the
/// entity lock; it cannot fail the transition.
pub trait Notifier: Send + Sync {
    fn notify(&self, entity: &TrackedEntity, record: &TransitionRecord);
}

/// Logs each transition as a structured `tracing` event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, entity: &TrackedEntity, record: &TransitionRecord) {
        tracing::info!(
            target: "gatehouse::notify",
            entity_id = %entity.id,
            variant = %entity.variant,
            action = %record.action,
            from = %record.from_status,
            to = %record.to_status,
            flat = entity.linked_flat().unwrap_or("-"),
            actor = %record.actor,
            seq = record.seq,
            "transition committed"
        );
    }
}
