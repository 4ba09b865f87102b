use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Declares a UUID-backed identifier newtype.
///
/// Each identifier wraps a UUID to provide type safety and prevent mixing
/// up saga IDs, entity IDs and lock tokens.
macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Creates an identifier from an existing UUID.
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the underlying UUID.
            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

uuid_id! {
    /// Unique identifier of one orchestrated saga run.
    SagaId
}

uuid_id! {
    /// Identifier of the business entity a saga operates on
    /// (a customer, an order, ...). At most one active saga per entity.
    EntityId
}

uuid_id! {
    /// Proof of ownership handed out when an entity lock is acquired.
    LockToken
}

/// Identifier of a saga configuration (the step template).
///
/// Configurations are authored by an administrative service and keyed by a
/// human-readable name such as `"order-placement"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SagaConfigId(String);

impl SagaConfigId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SagaConfigId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SagaConfigId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for SagaConfigId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saga_id_new_creates_unique_ids() {
        let id1 = SagaId::new();
        let id2 = SagaId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn entity_id_from_uuid_preserves_value() {
        let uuid = Uuid::new_v4();
        let id = EntityId::from_uuid(uuid);
        assert_eq!(id.as_uuid(), uuid);
        assert_eq!(Uuid::from(id), uuid);
    }

    #[test]
    fn ids_serialize_as_bare_values() {
        let uuid = Uuid::new_v4();
        let json = serde_json::to_string(&LockToken::from_uuid(uuid)).unwrap();
        assert_eq!(json, format!("\"{uuid}\""));

        let config_id = SagaConfigId::new("order-placement");
        let json = serde_json::to_string(&config_id).unwrap();
        assert_eq!(json, "\"order-placement\"");
        let back: SagaConfigId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config_id);
    }

    #[test]
    fn config_id_display() {
        assert_eq!(SagaConfigId::from("credit-check").to_string(), "credit-check");
    }
}
