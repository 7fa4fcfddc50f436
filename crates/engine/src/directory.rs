//! Flat number to resident lookup.

use std::collections::HashMap;

use async_trait::async_trait;
use gatehouse_core::{GateError, LinkedResident};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resident {
    pub flat_no: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

/// Resolves the flat an entity is linked to.
#[async_trait]
pub trait ResidentDirectory: Send + Sync {
    /// `ValidationError` on `flat_no` when the flat is unknown.
    async fn resolve(&self, flat_no: &str) -> Result<LinkedResident, GateError>;
}

/// A fixed resident table, loaded from configuration. Flat numbers match
/// case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct StaticResidentDirectory {
    residents: HashMap<String, Resident>,
}

impl StaticResidentDirectory {
    pub fn new(residents: impl IntoIterator<Item = Resident>) -> Self {
        Self {
            residents: residents
                .into_iter()
                .map(|r| (r.flat_no.trim().to_uppercase(), r))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.residents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.residents.is_empty()
    }
}

#[async_trait]
impl ResidentDirectory for StaticResidentDirectory {
    async fn resolve(&self, flat_no: &str) -> Result<LinkedResident, GateError> {
        let key = flat_no.trim().to_uppercase();
        match self.residents.get(&key) {
            Some(r) => Ok(LinkedResident {
                flat_no: key,
                name: Some(r.name.clone()),
            }),
            None => Err(GateError::validation(
                "flat_no",
                format!("no resident is registered for flat {key}"),
            )),
        }
    }
}

/// Accepts every flat and resolves no names. Used when no resident table is
/// configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnyFlat;

#[async_trait]
impl ResidentDirectory for AnyFlat {
    async fn resolve(&self, flat_no: &str) -> Result<LinkedResident, GateError> {
        Ok(LinkedResident {
            flat_no: flat_no.trim().to_uppercase(),
            name: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lookup_ignores_case() {
        let dir = StaticResidentDirectory::new([Resident {
            flat_no: "A-101".into(),
            name: "Anil".into(),
            phone: None,
        }]);
        let linked = dir.resolve("a-101 ").await.unwrap();
        assert_eq!(linked.flat_no, "A-101");
        assert_eq!(linked.name.as_deref(), Some("Anil"));
        assert_eq!(dir.resolve("Z-9").await.unwrap_err().kind(), "ValidationError");
    }
}
