//! Entity model — structured facts extracted from message bodies.

pub mod resolver;

pub use resolver::EntityResolver;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A person, organization, or project extracted from a message.
///
/// `attrs` holds the free-form relationship attributes (membership,
/// reporting lines, …); their string values may be names of other
/// entities until resolution rewrites them to identifiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    /// Kind-prefixed stable identifier, assigned by resolution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(flatten)]
    pub attrs: BTreeMap<String, serde_json::Value>,
}

impl Entity {
    /// Identifier prefix for an entity kind, e.g. `Person` → `person`.
    pub fn id_prefix(kind: &str) -> String {
        kind.to_lowercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extra_fields_land_in_attrs() {
        let entity: Entity = serde_json::from_value(json!({
            "name": "IT",
            "type": "Organization",
            "description": "The IT department.",
            "member": "John Smith"
        }))
        .unwrap();
        assert_eq!(entity.name.as_deref(), Some("IT"));
        assert_eq!(entity.kind.as_deref(), Some("Organization"));
        assert_eq!(entity.attrs["member"], json!("John Smith"));
    }

    #[test]
    fn missing_name_and_type_deserialize_as_none() {
        let entity: Entity = serde_json::from_value(json!({"description": "??"})).unwrap();
        assert!(entity.name.is_none());
        assert!(entity.kind.is_none());
    }

    #[test]
    fn id_prefix_is_lowercased_kind() {
        assert_eq!(Entity::id_prefix("Person"), "person");
        assert_eq!(Entity::id_prefix("Organization"), "organization");
    }
}
