//! LLM capability seam.
//!
//! The engine consumes the inference service through the `Capability`
//! trait — five typed request shapes and nothing else. `ollama.rs`
//! provides the production implementation over the Ollama HTTP API;
//! `parse.rs` holds the sanitizer and the strict response parsers.

pub mod ollama;
pub mod parse;

pub use ollama::{ChatMessage, OllamaCapability, OllamaClient, OllamaConfig};
pub use parse::{Decomposition, SubtaskSpec, parse_entities, parse_subtasks, sanitize_near_json};

use async_trait::async_trait;
use serde::Serialize;

use crate::entities::Entity;
use crate::error::CapabilityError;
use crate::intake::EmailMessage;

/// Literal response the execution capability returns when a task cannot
/// be completed with the context provided.
pub const MORE_CONTEXT_SENTINEL: &str = "More context needed";

/// Literal no-match response from the match-decision capability.
pub const NO_MATCHES: &str = "No Matches";

/// Outcome of attempting a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// A concrete result; the task is done.
    Completed(String),
    /// The sentinel came back; the task must be decomposed.
    NeedsContext,
}

/// Outcome of an entity match decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchDecision {
    /// Identifier of the existing record the entity refers to.
    Matched(String),
    NoMatch,
}

/// An existing store record offered to the match decision.
#[derive(Debug, Clone, Serialize)]
pub struct EntityCandidate {
    pub id: String,
    pub name: String,
    pub description: String,
}

/// The inference service, as the engine sees it.
#[async_trait]
pub trait Capability: Send + Sync {
    /// Decide whether a message contains an actionable objective.
    /// Returns the objective text, or `None` for no actionable content.
    async fn detect_objective(
        &self,
        message: &EmailMessage,
    ) -> Result<Option<String>, CapabilityError>;

    /// Attempt a task given prior results and similar past context.
    async fn execute_task(
        &self,
        task_name: &str,
        prior_results: &[String],
        similar_context: &[String],
    ) -> Result<ExecutionOutcome, CapabilityError>;

    /// Split a task into ordered sub-task candidates. Dependencies are
    /// listed after their dependents, so execution is bottom-up.
    async fn decompose_task(
        &self,
        task_name: &str,
        prior_results: &[String],
    ) -> Result<Decomposition, CapabilityError>;

    /// Extract structured entities from a message body. A response that
    /// cannot be parsed yields an empty list, logged with the raw text.
    async fn extract_entities(&self, body: &str) -> Result<Vec<Entity>, CapabilityError>;

    /// Decide whether any candidate record plausibly refers to the same
    /// real-world thing as `entity`, allowing partial names, nicknames,
    /// and organizational-name variants.
    async fn decide_match(
        &self,
        candidates: &[EntityCandidate],
        entity: &Entity,
    ) -> Result<MatchDecision, CapabilityError>;
}

/// Embedding generation, separated so the store adapter can index result
/// text without depending on the full capability surface.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, CapabilityError>;
}
