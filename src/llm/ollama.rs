//! Ollama-backed capability implementation.
//!
//! Plain HTTP against a local Ollama daemon: `/api/generate` for one-shot
//! prompts, `/api/chat` for the few-shot conversations, `/api/embeddings`
//! for vectors. Streaming is disabled; each call returns one JSON body.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, error, info};

use super::parse::{Decomposition, parse_entities, parse_subtasks};
use super::{
    Capability, Embedder, EntityCandidate, ExecutionOutcome, MORE_CONTEXT_SENTINEL, MatchDecision,
    NO_MATCHES,
};
use crate::entities::Entity;
use crate::error::CapabilityError;
use crate::intake::EmailMessage;

/// Ollama connection settings.
#[derive(Debug, Clone)]
pub struct OllamaConfig {
    pub base_url: String,
    /// Model used for generation and chat.
    pub model: String,
    /// Model used for embeddings.
    pub embed_model: String,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:11434".to_string(),
            model: "llama3".to_string(),
            embed_model: "mxbai-embed-large".to_string(),
        }
    }
}

impl OllamaConfig {
    /// Build config from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: std::env::var("TASKWEAVE_OLLAMA_URL").unwrap_or(defaults.base_url),
            model: std::env::var("TASKWEAVE_MODEL").unwrap_or(defaults.model),
            embed_model: std::env::var("TASKWEAVE_EMBED_MODEL").unwrap_or(defaults.embed_model),
        }
    }
}

/// A chat turn for `/api/chat`.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// HTTP client for the Ollama API.
#[derive(Clone)]
pub struct OllamaClient {
    config: OllamaConfig,
    http: reqwest::Client,
}

impl OllamaClient {
    pub fn new(config: OllamaConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value, CapabilityError> {
        let url = format!("{}/{}", self.config.base_url.trim_end_matches('/'), path);
        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| CapabilityError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CapabilityError::Unavailable(format!(
                "{path} returned {status}"
            )));
        }

        response.json().await.map_err(|e| CapabilityError::Malformed {
            reason: e.to_string(),
            raw: String::new(),
        })
    }

    /// One-shot completion via `/api/generate`.
    pub async fn generate(&self, prompt: &str) -> Result<String, CapabilityError> {
        let payload = self
            .post(
                "api/generate",
                json!({ "model": self.config.model, "prompt": prompt, "stream": false }),
            )
            .await?;
        let text = payload
            .get("response")
            .and_then(Value::as_str)
            .ok_or_else(|| CapabilityError::Malformed {
                reason: "missing 'response' field".to_string(),
                raw: payload.to_string(),
            })?;
        Ok(text.trim().to_string())
    }

    /// Multi-turn completion via `/api/chat`.
    pub async fn chat(&self, messages: &[ChatMessage]) -> Result<String, CapabilityError> {
        let payload = self
            .post(
                "api/chat",
                json!({ "model": self.config.model, "messages": messages, "stream": false }),
            )
            .await?;
        let text = payload
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(Value::as_str)
            .ok_or_else(|| CapabilityError::Malformed {
                reason: "missing 'message.content' field".to_string(),
                raw: payload.to_string(),
            })?;
        Ok(text.trim().to_string())
    }
}

#[async_trait]
impl Embedder for OllamaClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, CapabilityError> {
        let prompt = text.replace('\n', " ");
        let payload = self
            .post(
                "api/embeddings",
                json!({ "model": self.config.embed_model, "prompt": prompt }),
            )
            .await?;
        let vector = payload
            .get("embedding")
            .and_then(Value::as_array)
            .ok_or_else(|| CapabilityError::Malformed {
                reason: "missing 'embedding' field".to_string(),
                raw: payload.to_string(),
            })?;
        Ok(vector
            .iter()
            .filter_map(Value::as_f64)
            .map(|f| f as f32)
            .collect())
    }
}

// ── Prompts ─────────────────────────────────────────────────────────

const NO_TASKS_FOUND: &str = "No tasks found.";

const EXTRACTION_SYSTEM: &str = "You are an expert at entity identification, capturing the relationships expressed in a given input. \
You receive input in various forms such as a paragraph, an email, or a text file. \
Build an entities list from the input. \
Only use organizations, people, and projects as entities; do not include concepts or products. \
Organization entities can have attributes: name, type, description, member, memberOf. \
Person entities can have attributes: name, type, description, memberOf, parent, sibling, spouse, children, colleague, relatedTo, worksFor. \
Project entities can have attributes: name, type, description, department, member, memberOf. \
Only add entities that have a relationship with at least one other entity. \
Return the entities list as a valid JSON object. NEVER INCLUDE COMMENTS, THEY ARE NOT VALID JSON. DO NOT INCLUDE ANYTHING ELSE IN THE RESPONSE.";

const EXTRACTION_EXAMPLE_INPUT: &str = "Can you please help John Smith from IT get access to the system? He needs it as part of the IT Modernization effort.";

const EXTRACTION_EXAMPLE_OUTPUT: &str = r#"{
    "entities": [
        {
            "name": "Modernization of the IT infrastructure",
            "type": "Project",
            "description": "A project to modernize the IT infrastructure of the company.",
            "department": "IT"
        },
        {
            "name": "John Smith",
            "type": "Person",
            "description": "Employee in the IT department.",
            "memberOf": "IT"
        },
        {
            "name": "IT",
            "type": "Organization",
            "description": "The IT department of the company.",
            "member": "John Smith"
        }
    ]
}"#;

const MATCH_SYSTEM: &str = "You decide whether new input data matches a record already in our database. \
Review the search results provided, compare them against the input data, and if one matches respond with the ID of the match, and only the ID. \
If none match, respond with 'No Matches'. Your response is ALWAYS an ID alone, or 'No Matches'. \
Names may not match exactly: one record might carry just a first name or a nickname while the other has a full name, so use the additional details to judge whether they are likely the same person. \
Treat different names for the same company, such as EA and Electronic Arts, as the same organization. \
If the likelihood of a match is strong, respond with the ID and nothing else; if it is weak, respond with 'No Matches'.";

fn list_json(items: &[String]) -> String {
    serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string())
}

/// The five capability request shapes, served by Ollama.
pub struct OllamaCapability {
    client: OllamaClient,
}

impl OllamaCapability {
    pub fn new(client: OllamaClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Capability for OllamaCapability {
    async fn detect_objective(
        &self,
        message: &EmailMessage,
    ) -> Result<Option<String>, CapabilityError> {
        let prompt = format!(
            "You are an assistant that processes emails. You have received an email with the following details:\n\
             To: {}\nFrom: {}\nSubject: {}\nTimestamp: {}\nBody: {}\nAttachments: {}\n\
             Determine whether the email contains any actionable tasks for the recipient. \
             An actionable task is a specific request or instruction that requires the recipient to take some action. \
             If there are actionable tasks, list each one as a separate line. \
             If there are none, respond with \"{NO_TASKS_FOUND}\"\n\
             RETURN ONLY THIS STRING AND DO NOT INCLUDE ANY OTHER OUTPUT.",
            message.to,
            message.from,
            message.subject,
            message.timestamp.to_rfc3339(),
            message.body,
            "",
        );
        let response = self.client.generate(&prompt).await?;
        if response.is_empty() || response == NO_TASKS_FOUND {
            return Ok(None);
        }
        let objective = response
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string);
        Ok(objective)
    }

    async fn execute_task(
        &self,
        task_name: &str,
        prior_results: &[String],
        similar_context: &[String],
    ) -> Result<ExecutionOutcome, CapabilityError> {
        let prompt = format!(
            "Perform the following task: {task_name}.\n\
             Take into account these previously completed tasks and their results: {}.\n\
             Additionally, consider these similar tasks and their contexts: {}.\n\
             If you can complete the task based on the context provided, execute it and respond with the result.\n\
             If more context is needed, respond with \"{MORE_CONTEXT_SENTINEL}\" - DO NOT SAY ANYTHING ELSE.\n\
             Response:",
            list_json(prior_results),
            list_json(similar_context),
        );
        let response = self.client.generate(&prompt).await?;
        if response == MORE_CONTEXT_SENTINEL {
            debug!(task = task_name, "execution asked for more context");
            Ok(ExecutionOutcome::NeedsContext)
        } else {
            Ok(ExecutionOutcome::Completed(response))
        }
    }

    async fn decompose_task(
        &self,
        task_name: &str,
        prior_results: &[String],
    ) -> Result<Decomposition, CapabilityError> {
        let prompt = format!(
            "You are a task creation AI building a list of sub-tasks as a JSON array, considering the ultimate objective: {task_name}.\n\
             The results of the previous tasks are: {}.\n\
             If the sub-tasks are dependent, dependencies should be lower on the list (execution is bottom-up).\n\
             Specify whether each sub-task can be completed by an AI assistant or requires human intervention, as agent = 'AI' or 'Human'.\n\
             Return the sub-tasks as a structured list with the following format:\n\
             [{{\"task\": str, \"agent\": str}}, {{\"task\": str, \"agent\": str}}, ...]\n\
             SHARE ONLY THIS LIST - DO NOT INCLUDE ANYTHING ELSE IN THE RESPONSE.",
            list_json(prior_results),
        );
        let response = self.client.generate(&prompt).await?;
        Ok(parse_subtasks(&response))
    }

    async fn extract_entities(&self, body: &str) -> Result<Vec<Entity>, CapabilityError> {
        let messages = [
            ChatMessage::system(EXTRACTION_SYSTEM),
            ChatMessage::user(EXTRACTION_EXAMPLE_INPUT),
            ChatMessage::assistant(EXTRACTION_EXAMPLE_OUTPUT),
            ChatMessage::user(body),
        ];
        let response = self.client.chat(&messages).await?;
        match parse_entities(&response) {
            Ok(entities) => Ok(entities),
            Err(e) => {
                error!(error = %e, raw = %response, "entity extraction response unparseable, treating as none");
                Ok(Vec::new())
            }
        }
    }

    async fn decide_match(
        &self,
        candidates: &[EntityCandidate],
        entity: &Entity,
    ) -> Result<MatchDecision, CapabilityError> {
        let candidates_json =
            serde_json::to_string(candidates).unwrap_or_else(|_| "[]".to_string());
        let entity_json = serde_json::to_string(entity).unwrap_or_else(|_| "{}".to_string());
        let messages = [
            ChatMessage::system(MATCH_SYSTEM),
            ChatMessage::user(format!(
                "Here are the search results: {candidates_json}. \
                 Does any entry match the input data: {entity_json}?"
            )),
        ];
        let response = self.client.chat(&messages).await?;
        if response.is_empty() || response.eq_ignore_ascii_case(NO_MATCHES) {
            Ok(MatchDecision::NoMatch)
        } else {
            info!(id = %response, "match decision found an existing record");
            Ok(MatchDecision::Matched(response))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let cfg = OllamaConfig::default();
        assert_eq!(cfg.base_url, "http://127.0.0.1:11434");
        assert_eq!(cfg.model, "llama3");
    }

    #[test]
    fn chat_message_roles() {
        assert_eq!(ChatMessage::system("x").role, "system");
        assert_eq!(ChatMessage::user("x").role, "user");
        assert_eq!(ChatMessage::assistant("x").role, "assistant");
    }

    #[test]
    fn extraction_example_is_valid_json() {
        // The few-shot example must parse with the same parser applied to
        // real responses.
        let entities = parse_entities(EXTRACTION_EXAMPLE_OUTPUT).unwrap();
        assert_eq!(entities.len(), 3);
    }
}
