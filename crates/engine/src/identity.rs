//! Who is calling: bearer token to [`Actor`].

use std::collections::HashMap;

use async_trait::async_trait;
use gatehouse_core::{Actor, GateError};

/// Resolves a presented token to the operator behind it.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// `None` when the token is unknown.
    async fn identify(&self, token: &str) -> Option<Actor>;
}

/// Authenticate an optional token against `provider`.
pub async fn authenticate(
    provider: &dyn IdentityProvider,
    token: Option<&str>,
) -> Result<Actor, GateError> {
    let token = token
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(GateError::Unauthenticated)?;
    provider
        .identify(token)
        .await
        .ok_or(GateError::Unauthenticated)
}

/// A fixed token table, loaded from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentityProvider {
    operators: HashMap<String, Actor>,
}

impl StaticIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_operator(mut self, token: impl Into<String>, actor: Actor) -> Self {
        self.insert(token, actor);
        self
    }

    pub fn insert(&mut self, token: impl Into<String>, actor: Actor) {
        self.operators.insert(token.into(), actor);
    }

    pub fn len(&self) -> usize {
        self.operators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn identify(&self, token: &str) -> Option<Actor> {
        self.operators.get(token).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatehouse_core::Role;

    #[tokio::test]
    async fn missing_and_unknown_tokens_are_unauthenticated() {
        let ids = StaticIdentityProvider::new()
            .with_operator("t-gate", Actor::new("Gate 1", Role::Security));
        assert_eq!(
            authenticate(&ids, None).await.unwrap_err(),
            GateError::Unauthenticated
        );
        assert_eq!(
            authenticate(&ids, Some("  ")).await.unwrap_err(),
            GateError::Unauthenticated
        );
        assert_eq!(
            authenticate(&ids, Some("nope")).await.unwrap_err(),
            GateError::Unauthenticated
        );
        let actor = authenticate(&ids, Some("t-gate")).await.unwrap();
        assert_eq!(actor.role, Role::Security);
    }
}
