//! Strict parsing of capability text output.
//!
//! Capability responses are near-JSON: models emit trailing commas and
//! stray whitespace. Responses are sanitized and then parsed strictly
//! with `serde_json`; anything that still fails parsing is preserved as a
//! `Malformed` variant for diagnosis. Model output is never executed.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};

use crate::entities::Entity;
use crate::error::CapabilityError;
use crate::graph::TaskOwner;

/// Remove trailing commas before closing brackets or braces.
pub fn sanitize_near_json(raw: &str) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r",\s*([\]}])").expect("trailing-comma pattern"));
    re.replace_all(raw, "$1").into_owned()
}

/// A candidate sub-task produced by the decomposition capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtaskSpec {
    pub task: String,
    #[serde(default, deserialize_with = "lenient_owner")]
    pub agent: TaskOwner,
}

fn lenient_owner<'de, D>(deserializer: D) -> Result<TaskOwner, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    Ok(TaskOwner::parse(&s))
}

/// Result of parsing a decomposition response.
#[derive(Debug, Clone)]
pub enum Decomposition {
    Parsed(Vec<SubtaskSpec>),
    /// Unparseable response, raw text preserved. Treated as "no
    /// sub-tasks" by the execution loop.
    Malformed(String),
}

/// Parse a decomposition response into an ordered sub-task list.
pub fn parse_subtasks(raw: &str) -> Decomposition {
    let cleaned = sanitize_near_json(raw.trim());
    match serde_json::from_str::<Vec<SubtaskSpec>>(&cleaned) {
        Ok(list) => Decomposition::Parsed(list),
        Err(_) => Decomposition::Malformed(raw.to_string()),
    }
}

#[derive(Debug, Deserialize)]
struct EntityEnvelope {
    #[serde(default)]
    entities: Vec<Entity>,
}

/// Parse an extraction response (`{"entities": [...]}`).
pub fn parse_entities(raw: &str) -> Result<Vec<Entity>, CapabilityError> {
    let cleaned = sanitize_near_json(raw.trim());
    serde_json::from_str::<EntityEnvelope>(&cleaned)
        .map(|envelope| envelope.entities)
        .map_err(|e| CapabilityError::Malformed {
            reason: e.to_string(),
            raw: raw.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizer_removes_trailing_commas() {
        let raw = r#"{"entities": [{"name": "IT",}, ],}"#;
        assert_eq!(sanitize_near_json(raw), r#"{"entities": [{"name": "IT"}]}"#);
    }

    #[test]
    fn sanitizer_leaves_valid_json_untouched() {
        let raw = r#"[{"task": "a, b", "agent": "AI"}]"#;
        assert_eq!(sanitize_near_json(raw), raw);
    }

    #[test]
    fn parses_subtask_list() {
        let raw = r#"[{"task": "look up tee times", "agent": "AI"},
                      {"task": "call the club", "agent": "Human"}]"#;
        let Decomposition::Parsed(list) = parse_subtasks(raw) else {
            panic!("expected parsed list");
        };
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].agent, TaskOwner::Ai);
        assert_eq!(list[1].agent, TaskOwner::Human);
    }

    #[test]
    fn subtask_agent_defaults_to_human() {
        let raw = r#"[{"task": "review the draft"}]"#;
        let Decomposition::Parsed(list) = parse_subtasks(raw) else {
            panic!("expected parsed list");
        };
        assert_eq!(list[0].agent, TaskOwner::Human);
    }

    #[test]
    fn subtask_list_with_trailing_comma_parses() {
        let raw = r#"[{"task": "a", "agent": "AI"},]"#;
        assert!(matches!(parse_subtasks(raw), Decomposition::Parsed(l) if l.len() == 1));
    }

    #[test]
    fn prose_response_is_malformed() {
        let raw = "Sure! Here are the sub-tasks you asked for: ...";
        let Decomposition::Malformed(kept) = parse_subtasks(raw) else {
            panic!("expected malformed");
        };
        assert_eq!(kept, raw);
    }

    #[test]
    fn entity_response_with_trailing_commas_parses() {
        let raw = r#"{
            "entities": [
                {
                    "name": "John Smith",
                    "type": "Person",
                    "description": "Employee in the IT department.",
                    "memberOf": "IT",
                },
            ]
        }"#;
        let entities = parse_entities(raw).unwrap();
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].name.as_deref(), Some("John Smith"));
        assert_eq!(entities[0].kind.as_deref(), Some("Person"));
    }

    #[test]
    fn entity_response_missing_entities_key_is_empty() {
        assert!(parse_entities("{}").unwrap().is_empty());
    }

    #[test]
    fn unparseable_entity_response_keeps_raw_text() {
        let raw = "not json at all";
        match parse_entities(raw) {
            Err(CapabilityError::Malformed { raw: kept, .. }) => assert_eq!(kept, raw),
            other => panic!("expected malformed error, got {other:?}"),
        }
    }
}
