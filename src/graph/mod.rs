//! Task graph model.

pub mod adapter;

pub use adapter::{TaskGraph, TaskScope};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Execution status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Active,
    Complete,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "Active",
            Self::Complete => "Complete",
        }
    }

    /// Lenient parse for store cells; anything that isn't `Complete`
    /// counts as `Active`.
    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("complete") {
            Self::Complete
        } else {
            Self::Active
        }
    }
}

/// Who is expected to perform a task. The execution loop only ever
/// advances `AI`-owned tasks; `Human` tasks wait for manual completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskOwner {
    #[serde(rename = "AI")]
    Ai,
    #[default]
    Human,
}

impl TaskOwner {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ai => "AI",
            Self::Human => "Human",
        }
    }

    /// Lenient parse; anything that isn't `AI` counts as `Human`.
    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("ai") {
            Self::Ai
        } else {
            Self::Human
        }
    }
}

/// The unit of work in a message's decomposition tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Stable identifier, assigned at creation, never reused.
    pub id: String,
    /// Human-readable description of the action.
    pub name: String,
    /// Message id for root tasks, parent task id for sub-tasks.
    pub object: String,
    /// Position in the depth-first execution order; the root objective
    /// is 0. Assigned once, immutable.
    pub sequence: i64,
    pub status: TaskStatus,
    pub agent: TaskOwner,
    /// Child task ids, set once when the task is expanded. In projections
    /// returned by `TaskGraph`, entries are resolved to the child's name
    /// when the child is part of the same result set.
    pub children: Option<Vec<String>>,
    /// Text produced on completion, retained for future context retrieval.
    pub result: Option<String>,
}

impl Task {
    /// A fresh root objective for a message: sequence 0, AI-owned, Active.
    pub fn root(message_id: &str, name: String) -> Self {
        Self {
            id: mint_id("task"),
            name,
            object: message_id.to_string(),
            sequence: 0,
            status: TaskStatus::Active,
            agent: TaskOwner::Ai,
            children: None,
            result: None,
        }
    }
}

/// Mint a type-prefixed identifier, e.g. `task_8f14e45fceea…`.
pub fn mint_id(prefix: &str) -> String {
    format!("{}_{}", prefix, Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parse_is_lenient() {
        assert_eq!(TaskStatus::parse("Complete"), TaskStatus::Complete);
        assert_eq!(TaskStatus::parse("complete"), TaskStatus::Complete);
        assert_eq!(TaskStatus::parse("Active"), TaskStatus::Active);
        assert_eq!(TaskStatus::parse("garbage"), TaskStatus::Active);
    }

    #[test]
    fn owner_parse_defaults_to_human() {
        assert_eq!(TaskOwner::parse("AI"), TaskOwner::Ai);
        assert_eq!(TaskOwner::parse("ai"), TaskOwner::Ai);
        assert_eq!(TaskOwner::parse("Human"), TaskOwner::Human);
        assert_eq!(TaskOwner::parse("robot"), TaskOwner::Human);
    }

    #[test]
    fn minted_ids_carry_prefix_and_are_unique() {
        let a = mint_id("task");
        let b = mint_id("task");
        assert!(a.starts_with("task_"));
        assert_ne!(a, b);
    }

    #[test]
    fn owner_serializes_as_wire_labels() {
        assert_eq!(serde_json::to_string(&TaskOwner::Ai).unwrap(), "\"AI\"");
        assert_eq!(serde_json::to_string(&TaskOwner::Human).unwrap(), "\"Human\"");
    }
}
