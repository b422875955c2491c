//! Per-message decomposition/execution loop.
//!
//! The state machine for one message: detect the objective, create the
//! root task, then descend the frontier — execute the highest-sequence
//! incomplete AI task, decompose it into sub-tasks when it cannot be
//! completed with current context, and ascend as tasks finish. The loop
//! is inherently serial; concurrency lives one level up, in the
//! dispatcher.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::entities::EntityResolver;
use crate::entities::resolver::spawn_extraction;
use crate::error::{CapabilityError, Result};
use crate::graph::{Task, TaskGraph, TaskOwner, TaskScope, TaskStatus};
use crate::intake::EmailMessage;
use crate::llm::{Capability, Decomposition, ExecutionOutcome};

/// Terminal state of one message's pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    /// The loop ran to its stopping point.
    Done,
    /// No actionable content, or the tree was already fully processed.
    Skipped,
}

/// Runs the decomposition/execution loop, one message at a time.
pub struct Executor {
    graph: Arc<TaskGraph>,
    capability: Arc<dyn Capability>,
    resolver: Arc<EntityResolver>,
    config: EngineConfig,
}

impl Executor {
    pub fn new(
        graph: Arc<TaskGraph>,
        capability: Arc<dyn Capability>,
        resolver: Arc<EntityResolver>,
        config: EngineConfig,
    ) -> Self {
        Self {
            graph,
            capability,
            resolver,
            config,
        }
    }

    /// Drive one message's task tree as far as it will go.
    pub async fn process_message(&self, message: &EmailMessage) -> Result<MessageOutcome> {
        let existing = self.graph.get_tasks(TaskScope::Message(&message.id)).await?;

        // Idempotent re-delivery guard: a complete root means the whole
        // tree was finished on an earlier delivery.
        if existing
            .values()
            .any(|t| t.sequence == 0 && t.status == TaskStatus::Complete)
        {
            info!(id = %message.id, "message already fully processed, skipping");
            return Ok(MessageOutcome::Skipped);
        }

        let mut tasks: HashMap<String, Task>;
        let mut frontier: i64;
        let mut max_sequence: i64;

        if existing.is_empty() {
            // Fresh message. Entity extraction runs as its own task,
            // concurrently with the loop below; it never gates execution.
            spawn_extraction(
                Arc::clone(&self.capability),
                Arc::clone(&self.resolver),
                message.id.clone(),
                message.body.clone(),
            );

            let objective = self
                .with_timeout(self.capability.detect_objective(message))
                .await?;
            let Some(objective) = objective else {
                info!(id = %message.id, "no actionable content");
                return Ok(MessageOutcome::Skipped);
            };
            info!(id = %message.id, objective = %objective, "objective detected");

            let mut root = Task::root(&message.id, objective);
            self.graph.create_task(&mut root).await?;
            frontier = 0;
            max_sequence = 0;
            tasks = HashMap::from([(root.id.clone(), root)]);
        } else {
            let resume_at = existing
                .values()
                .filter(|t| t.status != TaskStatus::Complete)
                .map(|t| t.sequence)
                .max();
            let Some(resume_at) = resume_at else {
                info!(id = %message.id, "all tasks already complete");
                return Ok(MessageOutcome::Done);
            };
            frontier = resume_at;
            // Sequences are never reused, so new expansions must start
            // above everything assigned so far, completed tasks included.
            max_sequence = existing
                .values()
                .map(|t| t.sequence)
                .max()
                .unwrap_or(resume_at);
            tasks = existing;
            info!(id = %message.id, frontier, "resuming existing task tree");
        }

        while frontier >= 0 {
            let found = tasks
                .values()
                .find(|t| t.sequence == frontier && t.agent == TaskOwner::Ai)
                .cloned();
            let Some(task) = found else {
                // A human-owned frontier is never auto-advanced.
                info!(id = %message.id, frontier, "no AI-owned task at frontier, stopping");
                break;
            };

            debug!(task = %task.name, sequence = frontier, "attempting task");

            let prior_results = match self.graph.prior_results(&message.id).await {
                Ok(results) => results,
                Err(e) => {
                    warn!(error = %e, "prior results unavailable, continuing with none");
                    Vec::new()
                }
            };
            let context = self
                .graph
                .similar_context(&task.name, self.config.similar_context_k)
                .await;

            let outcome = self
                .with_timeout(self.capability.execute_task(
                    &task.name,
                    &prior_results,
                    &context,
                ))
                .await?;

            match outcome {
                ExecutionOutcome::Completed(result) => {
                    self.graph
                        .complete_task(&task.id, &task.name, &result)
                        .await?;
                    if let Some(entry) = tasks.get_mut(&task.id) {
                        entry.status = TaskStatus::Complete;
                        entry.result = Some(result);
                    }
                    info!(task = %task.name, sequence = frontier, "task complete");
                    frontier -= 1;
                }
                ExecutionOutcome::NeedsContext => {
                    if task.children.is_some() {
                        // A task is expanded at most once; a second
                        // decomposition here would re-number the tree.
                        warn!(task = %task.name, "needs context but already expanded, leaving active");
                        break;
                    }
                    let decomposition = self
                        .with_timeout(
                            self.capability.decompose_task(&task.name, &prior_results),
                        )
                        .await?;
                    let subtasks = match decomposition {
                        Decomposition::Parsed(subtasks) => subtasks,
                        Decomposition::Malformed(raw) => {
                            error!(task = %task.name, raw = %raw, "decomposition unparseable, treating as none");
                            Vec::new()
                        }
                    };

                    let (new_max, created) = self
                        .graph
                        .expand(&task.id, &task.name, &subtasks, max_sequence)
                        .await?;
                    if created.is_empty() {
                        // Dead end: the task stays Active until a human
                        // intervenes or a future delivery retries it.
                        warn!(task = %task.name, "decomposition produced no sub-tasks, leaving task active");
                        break;
                    }
                    info!(task = %task.name, count = created.len(), "expanded into sub-tasks");
                    if let Some(parent) = tasks.get_mut(&task.id) {
                        parent.children = Some(created.keys().cloned().collect());
                    }
                    tasks.extend(created);
                    max_sequence = new_max;
                    // Resume at the newest sub-task: dependencies are
                    // listed after their dependents, so the bottom of the
                    // list executes first.
                    frontier = new_max;
                }
            }

            tokio::time::sleep(self.config.step_delay).await;
        }

        Ok(MessageOutcome::Done)
    }

    /// Bound a capability call to the configured timeout.
    async fn with_timeout<T>(
        &self,
        call: impl Future<Output = std::result::Result<T, CapabilityError>>,
    ) -> std::result::Result<T, CapabilityError> {
        let limit = self.config.capability_timeout;
        match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => Err(CapabilityError::Timeout(limit)),
        }
    }
}
