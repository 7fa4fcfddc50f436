/// All errors that can be returned by a GateStorage implementation.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Optimistic concurrency control conflict: another snapshot modified
    /// the entity first. The expected version was not found.
    #[error("concurrent conflict on entity {entity_id}: expected version {expected_version}")]
    ConcurrentConflict {
        entity_id: String,
        expected_version: i64,
    },

    /// No record with the given id.
    #[error("entity not found: {entity_id}")]
    EntityNotFound { entity_id: String },

    /// A record with this id already exists.
    #[error("entity already exists: {entity_id}")]
    AlreadyExists { entity_id: String },

    /// Another active record of the same variant holds the credential.
    #[error("credential {credential} already held by active {variant} {holder}")]
    CredentialTaken {
        variant: String,
        credential: String,
        holder: String,
    },

    /// A backend-specific storage error (connection, serialization, etc.).
    #[error("storage backend error: {0}")]
    Backend(String),
}
