//! Task graph store adapter.
//!
//! Typed façade over the external row store: the only writer of task and
//! entity records. The execution loop and the entity resolver request all
//! reads and writes through it, holding no authoritative state of their
//! own beyond the in-flight task map for the message being processed.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Value, json};
use tracing::{debug, warn};

use super::{Task, TaskOwner, TaskStatus, mint_id};
use crate::error::StorageError;
use crate::llm::{Embedder, SubtaskSpec};
use crate::store::{Embedding, RowSet, RowStore};
use crate::store::rows::{int_cell, str_cell};

pub const TASK_TABLE: &str = "task";
const GRAPH_RELATION: &str = "graph";
const TASK_FIELDS: &[&str] = &[
    "id", "name", "object", "sequence", "status", "agent", "children", "result",
];

/// Scope for a task query.
#[derive(Debug, Clone, Copy)]
pub enum TaskScope<'a> {
    /// All tasks belonging to a message's tree, resolved by walking from
    /// the root objective down through all descendants.
    Message(&'a str),
    /// An arbitrary condition, e.g. `status = 'Active'`.
    Where(&'a str),
}

/// Typed adapter over the row store for task records.
pub struct TaskGraph {
    store: Arc<dyn RowStore>,
    embedder: Arc<dyn Embedder>,
}

impl TaskGraph {
    pub fn new(store: Arc<dyn RowStore>, embedder: Arc<dyn Embedder>) -> Self {
        Self { store, embedder }
    }

    /// Persist a new task. Mints an id if the task has none and forces
    /// status to `Active`.
    pub async fn create_task(&self, task: &mut Task) -> Result<(), StorageError> {
        if task.id.is_empty() {
            task.id = mint_id("task");
        }
        task.status = TaskStatus::Active;
        debug!(id = %task.id, name = %task.name, "creating task");
        self.store
            .insert(TASK_TABLE, TASK_FIELDS, vec![task_to_row(task)])
            .await
    }

    /// Fetch tasks in a scope, keyed by id. `children` entries are
    /// resolved to the child task's name where the child is part of the
    /// returned set; otherwise the raw identifier is kept.
    pub async fn get_tasks(
        &self,
        scope: TaskScope<'_>,
    ) -> Result<HashMap<String, Task>, StorageError> {
        let condition = match scope {
            TaskScope::Where(condition) => condition.to_string(),
            TaskScope::Message(message_id) => {
                let roots = self
                    .store
                    .lookup(
                        TASK_TABLE,
                        &["id"],
                        Some(&format!(
                            "object = '{}' AND sequence = 0",
                            quoted(message_id)
                        )),
                    )
                    .await?;
                match roots.first_column().into_iter().next() {
                    None => format!("object = '{}'", quoted(message_id)),
                    Some(root_id) => {
                        let mut ids = vec![root_id.clone()];
                        match self
                            .store
                            .recursive_traversal(
                                GRAPH_RELATION,
                                "source_id",
                                "target_id",
                                &format!("target_id = '{}'", quoted(&root_id)),
                            )
                            .await
                        {
                            Ok(related) => ids.extend(related.first_column()),
                            Err(e) => {
                                warn!(error = %e, root = %root_id, "descendant walk failed, falling back to root only");
                            }
                        }
                        let list = ids
                            .iter()
                            .map(|id| format!("'{}'", quoted(id)))
                            .collect::<Vec<_>>()
                            .join(", ");
                        format!("id IN ({list})")
                    }
                }
            }
        };

        let rows = self
            .store
            .lookup(TASK_TABLE, TASK_FIELDS, Some(&condition))
            .await?;
        Ok(decode_tasks(&rows))
    }

    /// Expand a task into sub-tasks.
    ///
    /// Assigns each sub-task a new id and a strictly increasing sequence
    /// starting at `next_sequence_base + 1`, persists them as Active tasks
    /// under `parent_id`, then records the parent's `children`. Returns the
    /// highest sequence assigned and the new tasks; an empty `subtasks`
    /// list returns the base unchanged and leaves the parent unexpanded.
    pub async fn expand(
        &self,
        parent_id: &str,
        parent_name: &str,
        subtasks: &[SubtaskSpec],
        next_sequence_base: i64,
    ) -> Result<(i64, HashMap<String, Task>), StorageError> {
        if subtasks.is_empty() {
            return Ok((next_sequence_base, HashMap::new()));
        }

        let mut sequence = next_sequence_base;
        let mut created = HashMap::new();
        let mut rows = Vec::new();
        let mut child_ids = Vec::new();
        for spec in subtasks {
            sequence += 1;
            let task = Task {
                id: mint_id("task"),
                name: spec.task.clone(),
                object: parent_id.to_string(),
                sequence,
                status: TaskStatus::Active,
                agent: spec.agent,
                children: None,
                result: None,
            };
            rows.push(task_to_row(&task));
            child_ids.push(task.id.clone());
            created.insert(task.id.clone(), task);
        }
        self.store
            .upsert(
                TASK_TABLE,
                TASK_FIELDS,
                rows,
                None,
                vec![(TASK_TABLE.to_string(), vec![parent_id.to_string()])],
            )
            .await?;

        self.store
            .update(
                TASK_TABLE,
                &["id", "name", "children"],
                vec![vec![json!(parent_id), json!(parent_name), json!(child_ids)]],
            )
            .await?;

        debug!(parent = %parent_id, count = created.len(), max_sequence = sequence, "expanded task");
        Ok((sequence, created))
    }

    /// Mark a task complete and store its result, then index the result
    /// text for similarity retrieval. The two persistence steps are
    /// ordered; a failed index write is logged and tolerated, the task
    /// stays complete.
    pub async fn complete_task(
        &self,
        id: &str,
        name: &str,
        result: &str,
    ) -> Result<(), StorageError> {
        self.store
            .update(
                TASK_TABLE,
                &["id", "name", "status", "result"],
                vec![vec![
                    json!(id),
                    json!(name),
                    json!(TaskStatus::Complete.as_str()),
                    json!(result),
                ]],
            )
            .await?;

        match self.embedder.embed(result).await {
            Ok(vector) => {
                let indexed = self
                    .store
                    .upsert(
                        TASK_TABLE,
                        &[],
                        vec![],
                        Some(Embedding {
                            text: result.to_string(),
                            vector,
                        }),
                        vec![(TASK_TABLE.to_string(), vec![id.to_string()])],
                    )
                    .await;
                if let Err(e) = indexed {
                    warn!(id = %id, error = %e, "result indexing failed, task stays complete");
                }
            }
            Err(e) => {
                warn!(id = %id, error = %e, "result embedding failed, task stays complete");
            }
        }
        Ok(())
    }

    /// Results of all completed tasks belonging to a message, in sequence
    /// order.
    pub async fn prior_results(&self, message_id: &str) -> Result<Vec<String>, StorageError> {
        let tasks = self.get_tasks(TaskScope::Message(message_id)).await?;
        let mut completed: Vec<&Task> = tasks
            .values()
            .filter(|t| t.status == TaskStatus::Complete && t.result.is_some())
            .collect();
        completed.sort_by_key(|t| t.sequence);
        Ok(completed
            .into_iter()
            .filter_map(|t| t.result.clone())
            .collect())
    }

    /// Up to `k` previously stored result texts most similar to
    /// `query_text`. Failures never cross this boundary: they are logged
    /// and yield an empty list.
    pub async fn similar_context(&self, query_text: &str, k: usize) -> Vec<String> {
        let vector = match self.embedder.embed(query_text).await {
            Ok(vector) => vector,
            Err(e) => {
                warn!(error = %e, "context query embedding failed");
                return Vec::new();
            }
        };
        let rows = match self.store.similarity_search(&vector, k).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "similarity search failed");
                return Vec::new();
            }
        };
        rows.rows
            .iter()
            .filter_map(|row| str_cell(row, 1))
            .map(|text| text.trim_matches('"').to_string())
            .collect()
    }
}

// ── Row codecs ──────────────────────────────────────────────────────

fn task_to_row(task: &Task) -> Vec<Value> {
    vec![
        json!(task.id),
        json!(task.name),
        json!(task.object),
        json!(task.sequence),
        json!(task.status.as_str()),
        json!(task.agent.as_str()),
        task.children.as_ref().map_or(Value::Null, |c| json!(c)),
        task.result.as_ref().map_or(Value::Null, |r| json!(r)),
    ]
}

fn task_from_row(row: &[Value]) -> Option<Task> {
    let id = str_cell(row, 0)?;
    let name = str_cell(row, 1)?;
    let object = str_cell(row, 2).unwrap_or_default();
    let sequence = int_cell(row, 3)?;
    let status = TaskStatus::parse(&str_cell(row, 4).unwrap_or_default());
    let agent = TaskOwner::parse(&str_cell(row, 5).unwrap_or_default());
    let children = row.get(6).and_then(Value::as_array).map(|ids| {
        ids.iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect()
    });
    let result = str_cell(row, 7);
    Some(Task {
        id,
        name,
        object,
        sequence,
        status,
        agent,
        children,
        result,
    })
}

fn decode_tasks(rows: &RowSet) -> HashMap<String, Task> {
    let mut tasks: HashMap<String, Task> = rows
        .rows
        .iter()
        .filter_map(|row| {
            let task = task_from_row(row);
            if task.is_none() {
                warn!("undecodable task row, skipping");
            }
            task
        })
        .map(|t| (t.id.clone(), t))
        .collect();

    // Resolve children ids to names where the child is in the set.
    let names: HashMap<String, String> = tasks
        .iter()
        .map(|(id, t)| (id.clone(), t.name.clone()))
        .collect();
    for task in tasks.values_mut() {
        if let Some(children) = &mut task.children {
            for child in children.iter_mut() {
                if let Some(name) = names.get(child) {
                    *child = name.clone();
                }
            }
        }
    }
    tasks
}

fn quoted(s: &str) -> String {
    s.replace('\'', "")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CapabilityError;
    use crate::store::MemoryRowStore;
    use async_trait::async_trait;

    struct HashEmbedder;

    #[async_trait]
    impl Embedder for HashEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, CapabilityError> {
            // Deterministic toy vector, good enough to rank exact matches
            // first.
            let mut v = [0.0_f32; 8];
            for (i, b) in text.bytes().enumerate() {
                v[i % 8] += f32::from(b);
            }
            Ok(v.to_vec())
        }
    }

    fn graph() -> (Arc<MemoryRowStore>, TaskGraph) {
        let store = Arc::new(MemoryRowStore::new());
        let graph = TaskGraph::new(store.clone(), Arc::new(HashEmbedder));
        (store, graph)
    }

    fn spec(task: &str, agent: TaskOwner) -> SubtaskSpec {
        SubtaskSpec {
            task: task.to_string(),
            agent,
        }
    }

    #[tokio::test]
    async fn create_and_fetch_by_message() {
        let (_, graph) = graph();
        let mut root = Task::root("msg-1", "do the thing".into());
        graph.create_task(&mut root).await.unwrap();

        let tasks = graph.get_tasks(TaskScope::Message("msg-1")).await.unwrap();
        assert_eq!(tasks.len(), 1);
        let fetched = &tasks[&root.id];
        assert_eq!(fetched.sequence, 0);
        assert_eq!(fetched.status, TaskStatus::Active);
        assert_eq!(fetched.agent, TaskOwner::Ai);
    }

    #[tokio::test]
    async fn expand_assigns_strictly_increasing_sequences() {
        let (_, graph) = graph();
        let mut root = Task::root("msg-1", "objective".into());
        graph.create_task(&mut root).await.unwrap();

        let specs = vec![
            spec("first", TaskOwner::Ai),
            spec("second", TaskOwner::Human),
            spec("third", TaskOwner::Ai),
        ];
        let (max, created) = graph.expand(&root.id, &root.name, &specs, 0).await.unwrap();
        assert_eq!(max, 3);

        let mut sequences: Vec<i64> = created.values().map(|t| t.sequence).collect();
        sequences.sort_unstable();
        assert_eq!(sequences, vec![1, 2, 3]);

        // Another expansion from the new base continues the sequence.
        let child_id = created
            .values()
            .find(|t| t.sequence == 3)
            .map(|t| t.id.clone())
            .unwrap();
        let (max2, created2) = graph
            .expand(&child_id, "third", &[spec("deeper", TaskOwner::Ai)], max)
            .await
            .unwrap();
        assert_eq!(max2, 4);
        assert_eq!(created2.len(), 1);

        // No sequence reused anywhere in the tree.
        let tasks = graph.get_tasks(TaskScope::Message("msg-1")).await.unwrap();
        let mut all: Vec<i64> = tasks.values().map(|t| t.sequence).collect();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), tasks.len());
        assert_eq!(tasks.len(), 5);
    }

    #[tokio::test]
    async fn expand_with_no_candidates_is_a_no_op() {
        let (store, graph) = graph();
        let mut root = Task::root("msg-1", "objective".into());
        graph.create_task(&mut root).await.unwrap();

        let (max, created) = graph.expand(&root.id, &root.name, &[], 7).await.unwrap();
        assert_eq!(max, 7);
        assert!(created.is_empty());
        assert_eq!(store.row_count(TASK_TABLE), 1);

        // Parent remains unexpanded.
        let tasks = graph.get_tasks(TaskScope::Message("msg-1")).await.unwrap();
        assert!(tasks[&root.id].children.is_none());
    }

    #[tokio::test]
    async fn children_resolved_to_names_in_projection() {
        let (_, graph) = graph();
        let mut root = Task::root("msg-1", "objective".into());
        graph.create_task(&mut root).await.unwrap();
        graph
            .expand(&root.id, &root.name, &[spec("child task", TaskOwner::Ai)], 0)
            .await
            .unwrap();

        let tasks = graph.get_tasks(TaskScope::Message("msg-1")).await.unwrap();
        let children = tasks[&root.id].children.clone().unwrap();
        assert_eq!(children, vec!["child task"]);
    }

    #[tokio::test]
    async fn complete_then_prior_results_in_sequence_order() {
        let (_, graph) = graph();
        let mut root = Task::root("msg-1", "objective".into());
        graph.create_task(&mut root).await.unwrap();
        let (_, created) = graph
            .expand(
                &root.id,
                &root.name,
                &[spec("a", TaskOwner::Ai), spec("b", TaskOwner::Ai)],
                0,
            )
            .await
            .unwrap();

        // Complete in execution order: highest sequence first.
        let by_seq = |n: i64| {
            created
                .values()
                .find(|t| t.sequence == n)
                .cloned()
                .unwrap()
        };
        graph
            .complete_task(&by_seq(2).id, "b", "result-two")
            .await
            .unwrap();
        graph
            .complete_task(&by_seq(1).id, "a", "result-one")
            .await
            .unwrap();

        let results = graph.prior_results("msg-1").await.unwrap();
        assert_eq!(results, vec!["result-one", "result-two"]);
    }

    #[tokio::test]
    async fn similar_context_returns_indexed_results() {
        let (_, graph) = graph();
        let mut root = Task::root("msg-1", "objective".into());
        graph.create_task(&mut root).await.unwrap();
        graph
            .complete_task(&root.id, "objective", "a haiku about golf")
            .await
            .unwrap();

        let context = graph.similar_context("a haiku about golf", 5).await;
        assert_eq!(context, vec!["a haiku about golf"]);
    }

    #[tokio::test]
    async fn status_condition_scope() {
        let (_, graph) = graph();
        let mut root = Task::root("msg-1", "objective".into());
        graph.create_task(&mut root).await.unwrap();
        graph
            .complete_task(&root.id, "objective", "done")
            .await
            .unwrap();
        let mut other = Task::root("msg-2", "still open".into());
        graph.create_task(&mut other).await.unwrap();

        let active = graph
            .get_tasks(TaskScope::Where("status = 'Active'"))
            .await
            .unwrap();
        assert_eq!(active.len(), 1);
        assert!(active.contains_key(&other.id));
    }
}
