//! Entity resolution — match extracted entities against existing records,
//! mint stable identifiers, and rewrite cross-references.
//!
//! Resolution runs as a background task per message, concurrently with
//! that message's execution loop. Its failures are logged and never reach
//! the loop.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::Entity;
use crate::graph::mint_id;
use crate::llm::{Capability, EntityCandidate, MatchDecision};
use crate::store::RowStore;
use crate::store::rows::str_cell;

const ENTITY_FIELDS: &[&str] = &["id", "name", "description"];

/// Resolves extracted entities against the store.
pub struct EntityResolver {
    store: Arc<dyn RowStore>,
    capability: Arc<dyn Capability>,
}

impl EntityResolver {
    pub fn new(store: Arc<dyn RowStore>, capability: Arc<dyn Capability>) -> Self {
        Self { store, capability }
    }

    /// Resolve a batch of extracted entities.
    ///
    /// Each entity is matched against existing records of the same kind
    /// (substring search on the name, then a match decision from the
    /// capability); unmatched entities get a fresh kind-prefixed id. After
    /// the whole batch is resolved, every attribute value equal to another
    /// batch entity's name is rewritten to that entity's identifier, and
    /// the batch is persisted. Entities missing a name or kind are
    /// discarded with a warning.
    pub async fn resolve_batch(&self, entities: Vec<Entity>) -> Vec<Entity> {
        let mut resolved: Vec<Entity> = Vec::new();

        for mut entity in entities {
            let (Some(kind), Some(name)) = (entity.kind.clone(), entity.name.clone()) else {
                warn!(entity = ?entity, "entity missing type or name, discarding");
                continue;
            };

            let id = match self.find_existing(&kind, &name, &entity).await {
                Some(id) => {
                    info!(name = %name, id = %id, "matched existing entity");
                    id
                }
                None => {
                    let id = mint_id(&Entity::id_prefix(&kind));
                    info!(name = %name, id = %id, "minted new entity");
                    id
                }
            };
            entity.id = Some(id);
            resolved.push(entity);
        }

        self.rewrite_cross_references(&mut resolved);
        self.persist(&resolved).await;
        resolved
    }

    /// Search the store for same-kind records whose name contains the
    /// candidate name, then ask the capability whether any is the same
    /// real-world thing. Read and decision failures degrade to "no match".
    async fn find_existing(&self, kind: &str, name: &str, entity: &Entity) -> Option<String> {
        let condition = format!("name CONTAINS '{}'", name.replace('\'', ""));
        let rows = match self
            .store
            .lookup(kind, ENTITY_FIELDS, Some(&condition))
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                warn!(kind = %kind, error = %e, "entity candidate lookup failed");
                return None;
            }
        };

        let candidates: Vec<EntityCandidate> = rows
            .rows
            .iter()
            .filter_map(|row| {
                Some(EntityCandidate {
                    id: str_cell(row, 0)?,
                    name: str_cell(row, 1)?,
                    description: str_cell(row, 2).unwrap_or_default(),
                })
            })
            .collect();
        if candidates.is_empty() {
            return None;
        }

        match self.capability.decide_match(&candidates, entity).await {
            Ok(MatchDecision::Matched(id)) => Some(id),
            Ok(MatchDecision::NoMatch) => None,
            Err(e) => {
                warn!(name = %name, error = %e, "match decision failed, minting new id");
                None
            }
        }
    }

    /// Rewrite attribute values that name another entity in the batch to
    /// that entity's resolved identifier. After this pass every
    /// relationship attribute is a literal string or an identifier, never
    /// a raw name.
    fn rewrite_cross_references(&self, resolved: &mut [Entity]) {
        let ids_by_name: HashMap<String, String> = resolved
            .iter()
            .filter_map(|e| Some((e.name.clone()?, e.id.clone()?)))
            .collect();

        for entity in resolved.iter_mut() {
            for value in entity.attrs.values_mut() {
                if let Value::String(s) = value
                    && let Some(id) = ids_by_name.get(s.as_str())
                {
                    debug!(name = %s, id = %id, "rewrote cross-reference");
                    *value = Value::String(id.clone());
                }
            }
        }
    }

    /// Upsert each resolved entity into its kind's table. Write failures
    /// are logged, not fatal.
    async fn persist(&self, resolved: &[Entity]) {
        for entity in resolved {
            let (Some(kind), Some(id)) = (&entity.kind, &entity.id) else {
                continue;
            };
            let mut fields: Vec<&str> = vec!["id", "name", "type", "description"];
            let mut row = vec![
                json!(id),
                json!(entity.name),
                json!(kind),
                json!(entity.description),
            ];
            for (key, value) in &entity.attrs {
                fields.push(key);
                row.push(value.clone());
            }
            if let Err(e) = self
                .store
                .upsert(kind, &fields, vec![row], None, vec![])
                .await
            {
                warn!(id = %id, error = %e, "entity persist failed");
            }
        }
    }
}

/// Fire-and-forget extraction for one message: extract entities from the
/// body, then resolve the batch. Runs independently of the message's
/// execution loop; failures stay here.
pub fn spawn_extraction(
    capability: Arc<dyn Capability>,
    resolver: Arc<EntityResolver>,
    message_id: String,
    body: String,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        match capability.extract_entities(&body).await {
            Ok(entities) if entities.is_empty() => {
                debug!(message_id = %message_id, "no entities extracted");
            }
            Ok(entities) => {
                let resolved = resolver.resolve_batch(entities).await;
                info!(message_id = %message_id, count = resolved.len(), "entities resolved");
            }
            Err(e) => {
                error!(message_id = %message_id, error = %e, "entity extraction failed");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CapabilityError;
    use crate::intake::EmailMessage;
    use crate::llm::{Decomposition, ExecutionOutcome};
    use crate::store::MemoryRowStore;
    use async_trait::async_trait;
    use serde_json::json;

    /// Match-decision stub; every other capability call is unreachable in
    /// these tests.
    struct MatchOnly {
        decision: MatchDecision,
    }

    #[async_trait]
    impl Capability for MatchOnly {
        async fn detect_objective(
            &self,
            _message: &EmailMessage,
        ) -> Result<Option<String>, CapabilityError> {
            unreachable!("not used in resolver tests")
        }

        async fn execute_task(
            &self,
            _task_name: &str,
            _prior_results: &[String],
            _similar_context: &[String],
        ) -> Result<ExecutionOutcome, CapabilityError> {
            unreachable!("not used in resolver tests")
        }

        async fn decompose_task(
            &self,
            _task_name: &str,
            _prior_results: &[String],
        ) -> Result<Decomposition, CapabilityError> {
            unreachable!("not used in resolver tests")
        }

        async fn extract_entities(&self, _body: &str) -> Result<Vec<Entity>, CapabilityError> {
            unreachable!("not used in resolver tests")
        }

        async fn decide_match(
            &self,
            _candidates: &[EntityCandidate],
            _entity: &Entity,
        ) -> Result<MatchDecision, CapabilityError> {
            Ok(self.decision.clone())
        }
    }

    fn entity(name: &str, kind: &str, attrs: &[(&str, &str)]) -> Entity {
        Entity {
            id: None,
            name: Some(name.to_string()),
            kind: Some(kind.to_string()),
            description: None,
            attrs: attrs
                .iter()
                .map(|(k, v)| (k.to_string(), json!(v)))
                .collect(),
        }
    }

    #[tokio::test]
    async fn new_entities_get_prefixed_ids_and_rewritten_references() {
        let store = Arc::new(MemoryRowStore::new());
        let resolver = EntityResolver::new(
            store.clone(),
            Arc::new(MatchOnly {
                decision: MatchDecision::NoMatch,
            }),
        );

        let batch = vec![
            entity("IT", "Organization", &[("member", "John Smith")]),
            entity("John Smith", "Person", &[("memberOf", "IT")]),
        ];
        let resolved = resolver.resolve_batch(batch).await;
        assert_eq!(resolved.len(), 2);

        let org = &resolved[0];
        let person = &resolved[1];
        assert!(org.id.as_deref().unwrap().starts_with("organization_"));
        assert!(person.id.as_deref().unwrap().starts_with("person_"));

        // Cross-references rewritten both ways.
        assert_eq!(org.attrs["member"], json!(person.id.clone().unwrap()));
        assert_eq!(person.attrs["memberOf"], json!(org.id.clone().unwrap()));

        // Persisted under their kind tables.
        assert_eq!(store.row_count("Organization"), 1);
        assert_eq!(store.row_count("Person"), 1);
    }

    #[tokio::test]
    async fn matched_entity_reuses_existing_id() {
        let store = Arc::new(MemoryRowStore::new());
        store
            .insert(
                "Person",
                ENTITY_FIELDS,
                vec![vec![
                    json!("person_existing"),
                    json!("John Smith"),
                    json!("Employee in IT."),
                ]],
            )
            .await
            .unwrap();

        let resolver = EntityResolver::new(
            store.clone(),
            Arc::new(MatchOnly {
                decision: MatchDecision::Matched("person_existing".to_string()),
            }),
        );

        let resolved = resolver
            .resolve_batch(vec![entity("John", "Person", &[])])
            .await;
        assert_eq!(resolved[0].id.as_deref(), Some("person_existing"));
    }

    #[tokio::test]
    async fn nameless_entities_are_discarded() {
        let store = Arc::new(MemoryRowStore::new());
        let resolver = EntityResolver::new(
            store,
            Arc::new(MatchOnly {
                decision: MatchDecision::NoMatch,
            }),
        );

        let mut nameless = entity("x", "Person", &[]);
        nameless.name = None;
        let mut kindless = entity("Jane", "x", &[]);
        kindless.kind = None;

        let resolved = resolver.resolve_batch(vec![nameless, kindless]).await;
        assert!(resolved.is_empty());
    }

    #[tokio::test]
    async fn literal_attribute_values_stay_literal() {
        let store = Arc::new(MemoryRowStore::new());
        let resolver = EntityResolver::new(
            store,
            Arc::new(MatchOnly {
                decision: MatchDecision::NoMatch,
            }),
        );

        let resolved = resolver
            .resolve_batch(vec![entity(
                "Apollo",
                "Project",
                &[("department", "Engineering")],
            )])
            .await;
        assert_eq!(resolved[0].attrs["department"], json!("Engineering"));
    }
}
