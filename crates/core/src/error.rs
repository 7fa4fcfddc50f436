use serde::Serialize;

/// Every failure a gatehouse operation can report to its caller.
///
/// None of these are fatal to the process. A failed operation leaves the
/// entity and its history exactly as they were before the call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GateError {
    /// Unknown credential or entity id.
    #[error("{message}")]
    NotFound { message: String },

    /// An active entity of the same variant already holds the credential.
    #[error("credential '{credential}' is already held by active {variant} {holder}")]
    DuplicateCredential {
        variant: String,
        credential: String,
        holder: String,
    },

    /// The requested edge is not an outgoing edge of the current status.
    #[error("cannot {action} {variant} {entity_id}: {reason}")]
    IllegalTransition {
        variant: String,
        entity_id: String,
        action: String,
        reason: String,
    },

    /// A mutation was attempted after the entity reached a terminal status.
    #[error("{variant} {entity_id} is already {status}")]
    AlreadyTerminal {
        variant: String,
        entity_id: String,
        status: String,
    },

    /// Malformed subject info, credential, or transition payload.
    #[error("invalid {field}: {message}")]
    Validation { field: String, message: String },

    /// No identity, or an identity the provider does not recognise.
    #[error("authentication required")]
    Unauthenticated,

    /// The actor's role does not permit the operation.
    #[error("{actor} ({role}) may not {operation}")]
    Unauthorized {
        actor: String,
        role: String,
        operation: String,
    },

    /// Another writer committed to the same entity first.
    #[error("concurrent update of {entity_id}; retry the request")]
    Conflict { entity_id: String },

    /// The storage backend failed.
    #[error("storage failure: {0}")]
    Storage(String),
}

impl GateError {
    pub fn not_found(message: impl Into<String>) -> Self {
        GateError::NotFound {
            message: message.into(),
        }
    }

    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        GateError::Validation {
            field: field.to_string(),
            message: message.into(),
        }
    }

    /// Stable machine-readable name of the error, used as `errorKind` on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            GateError::NotFound { .. } => "NotFound",
            GateError::DuplicateCredential { .. } => "DuplicateCredential",
            GateError::IllegalTransition { .. } => "IllegalTransition",
            GateError::AlreadyTerminal { .. } => "AlreadyTerminal",
            GateError::Validation { .. } => "ValidationError",
            GateError::Unauthenticated => "Unauthenticated",
            GateError::Unauthorized { .. } => "Unauthorized",
            GateError::Conflict { .. } => "Conflict",
            GateError::Storage(_) => "Storage",
        }
    }

    /// Wire representation: `{"errorKind": ..., "message": ...}`.
    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            error_kind: self.kind(),
            message: self.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub error_kind: &'static str,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        assert_eq!(GateError::not_found("x").kind(), "NotFound");
        assert_eq!(
            GateError::validation("phone", "bad").kind(),
            "ValidationError"
        );
        assert_eq!(GateError::Unauthenticated.kind(), "Unauthenticated");
    }

    #[test]
    fn body_serializes_camel_case() {
        let body = GateError::AlreadyTerminal {
            variant: "delivery".into(),
            entity_id: "abc".into(),
            status: "completed".into(),
        }
        .to_body();
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["errorKind"], "AlreadyTerminal");
        assert_eq!(json["message"], "delivery abc is already completed");
    }
}
